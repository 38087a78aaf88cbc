use crate::{
    domain::item::{
        IssueStatus, ItemId, Journal, Membership, Project, ProjectId, Relation, StatusId, Tracker,
        User, UserId, Version, VersionId, Watcher, WorkItem,
    },
    domain::sorting::PositionMap,
    error::Result,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

pub mod memory_storage;

pub use memory_storage::{InMemoryStore, Snapshot};

/// Store-level selection pushed down ahead of in-memory filtering
#[derive(Debug, Clone, PartialEq)]
pub struct ItemQuery {
    pub project_ids: Vec<ProjectId>,
    /// `None` selects every status
    pub status_ids: Option<Vec<StatusId>>,
}

/// One atomic write: field changes, a note and position rewrites
#[derive(Debug, Clone, PartialEq)]
pub struct ItemUpdate {
    pub item_id: ItemId,
    pub status_id: Option<StatusId>,
    pub fixed_version_id: Option<Option<VersionId>>,
    pub assigned_to_id: Option<Option<UserId>>,
    pub note: Option<Journal>,
    /// Full order of each reordered column. Members of such a column that are
    /// left out keep their relative order after the listed ones.
    pub positions: PositionMap,
    pub updated_at: DateTime<Utc>,
}

/// Issue store the board reads from and writes moves to
#[async_trait]
pub trait Store: Send + Sync {
    async fn projects(&self) -> Result<Vec<Project>>;

    /// All statuses ordered by position
    async fn statuses(&self) -> Result<Vec<IssueStatus>>;

    async fn trackers(&self) -> Result<Vec<Tracker>>;

    async fn users(&self, ids: &[UserId]) -> Result<Vec<User>>;

    /// Statuses used by the workflows of the projects' trackers, ordered by position
    async fn workflow_statuses(&self, project_ids: &[ProjectId]) -> Result<Vec<IssueStatus>>;

    /// Statuses the issue may move to, its current status included
    async fn allowed_statuses(&self, item: &WorkItem) -> Result<Vec<StatusId>>;

    async fn find_items(&self, query: &ItemQuery) -> Result<Vec<WorkItem>>;

    async fn item(&self, id: ItemId) -> Result<Option<WorkItem>>;

    /// Issues with the given ids; unknown ids are skipped
    async fn items_by_ids(&self, ids: &[ItemId]) -> Result<Vec<WorkItem>>;

    /// The subset of `ids` having at least one child issue
    async fn parents_with_children(&self, ids: &[ItemId]) -> Result<HashSet<ItemId>>;

    /// Relations touching any of the given issues, in either direction
    async fn relations(&self, ids: &[ItemId]) -> Result<Vec<Relation>>;

    async fn watchers(&self, ids: &[ItemId]) -> Result<Vec<Watcher>>;

    async fn memberships(&self, project_ids: &[ProjectId]) -> Result<Vec<Membership>>;

    /// Versions usable by issues of the project, whatever their status
    async fn shared_versions(&self, project_id: ProjectId) -> Result<Vec<Version>>;

    async fn versions(&self, ids: &[VersionId]) -> Result<Vec<Version>>;

    /// Latest note of each issue that has one
    async fn last_notes(&self, ids: &[ItemId]) -> Result<Vec<Journal>>;

    /// Applies the update atomically and returns the updated issue
    async fn apply_update(&self, update: &ItemUpdate) -> Result<WorkItem>;
}

/// Permission checks owned by the host application
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn can_edit(&self, user_id: UserId, item: &WorkItem) -> Result<bool>;

    async fn is_project_member(&self, user_id: UserId, project_id: ProjectId) -> Result<bool>;
}
