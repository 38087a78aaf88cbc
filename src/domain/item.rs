use crate::error::BoardError;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::{fmt, str::FromStr};
use uuid::Uuid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(u64);

        impl $name {
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl FromStr for $name {
            type Err = BoardError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                // Issue references are often written as "#12"
                s.trim()
                    .trim_start_matches('#')
                    .parse::<u64>()
                    .map(Self)
                    .map_err(|_| BoardError::InvalidId(format!("{} '{}'", $label, s)))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Identifier of a work item (issue)
    ItemId,
    "issue"
);
define_id!(ProjectId, "project");
define_id!(StatusId, "status");
define_id!(TrackerId, "tracker");
define_id!(UserId, "user");
define_id!(VersionId, "version");
define_id!(RoleId, "role");

/// Issue status; `position` is the workflow order used for board columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueStatus {
    pub id: StatusId,
    pub name: String,
    pub is_closed: bool,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracker {
    pub id: TrackerId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub parent_id: Option<ProjectId>,
    /// Whether the agile board module is enabled for this project
    #[serde(default)]
    pub board_enabled: bool,
    #[serde(default)]
    pub tracker_ids: Vec<TrackerId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub admin: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    #[serde(default)]
    pub edit_issues: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: UserId,
    pub project_id: ProjectId,
    pub role_ids: Vec<RoleId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    Open,
    Locked,
    Closed,
}

/// How far a version is visible outside its own project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionSharing {
    #[default]
    None,
    Descendants,
    Hierarchy,
    Tree,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: VersionId,
    pub project_id: ProjectId,
    pub name: String,
    pub status: VersionStatus,
    #[serde(default)]
    pub sharing: VersionSharing,
    #[serde(default)]
    pub effective_date: Option<NaiveDate>,
}

impl Version {
    pub fn is_open(&self) -> bool {
        self.status == VersionStatus::Open
    }

    /// Checks whether issues of `target` may use this version
    pub fn is_shared_with(&self, target: ProjectId, tree: &ProjectTree<'_>) -> bool {
        let owner = self.project_id;
        if owner == target {
            return true;
        }
        match self.sharing {
            VersionSharing::None => false,
            VersionSharing::Descendants => tree.is_ancestor(owner, target),
            VersionSharing::Hierarchy => {
                tree.is_ancestor(owner, target) || tree.is_ancestor(target, owner)
            }
            VersionSharing::Tree => tree.root(owner) == tree.root(target),
            VersionSharing::System => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    Relates,
    Blocks,
    Precedes,
    Duplicates,
    CopiedTo,
}

/// Directed edge between two issues
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub issue_from: ItemId,
    pub issue_to: ItemId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watcher {
    pub item_id: ItemId,
    pub user_id: UserId,
}

/// A note appended to an issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journal {
    pub id: Uuid,
    pub item_id: ItemId,
    pub user_id: UserId,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

impl Journal {
    pub fn new(item_id: ItemId, user_id: UserId, notes: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id,
            user_id,
            notes,
            created_at: Utc::now(),
        }
    }
}

/// Allowed status change for issues of one tracker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTransition {
    pub tracker_id: TrackerId,
    pub old_status_id: StatusId,
    pub new_status_id: StatusId,
}

/// An issue as seen by the board
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: ItemId,
    pub subject: String,
    pub project_id: ProjectId,
    pub tracker_id: TrackerId,
    pub status_id: StatusId,
    pub author_id: UserId,
    #[serde(default)]
    pub assigned_to_id: Option<UserId>,
    #[serde(default)]
    pub parent_id: Option<ItemId>,
    #[serde(default)]
    pub fixed_version_id: Option<VersionId>,
    #[serde(default)]
    pub estimated_hours: Option<f64>,
    #[serde(default)]
    pub story_points: Option<u32>,
    #[serde(default)]
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_changed_at: Option<DateTime<Utc>>,
    /// Rank inside the current column; unset items sort after ranked ones
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<u32>,
}

impl WorkItem {
    pub fn new(
        id: ItemId,
        subject: String,
        project_id: ProjectId,
        tracker_id: TrackerId,
        status_id: StatusId,
        author_id: UserId,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            subject,
            project_id,
            tracker_id,
            status_id,
            author_id,
            assigned_to_id: None,
            parent_id: None,
            fixed_version_id: None,
            estimated_hours: None,
            story_points: None,
            is_private: false,
            created_at: now,
            updated_at: now,
            status_changed_at: None,
            position: None,
        }
    }

    /// Moves the issue to another status and restarts its time in state
    pub fn set_status(&mut self, status_id: StatusId, at: DateTime<Utc>) {
        if self.status_id != status_id {
            self.status_id = status_id;
            self.status_changed_at = Some(at);
        }
        self.updated_at = at;
    }

    /// Time spent in the current status as of `as_of`
    pub fn time_in_state(&self, as_of: DateTime<Utc>) -> Duration {
        let since = self.status_changed_at.unwrap_or(self.created_at);
        (as_of - since).max(Duration::zero())
    }
}

/// Read-only view over the project hierarchy
pub struct ProjectTree<'a> {
    by_id: HashMap<ProjectId, &'a Project>,
}

impl<'a> ProjectTree<'a> {
    pub fn new(projects: &'a [Project]) -> Self {
        Self {
            by_id: projects.iter().map(|p| (p.id, p)).collect(),
        }
    }

    pub fn get(&self, id: ProjectId) -> Option<&'a Project> {
        self.by_id.get(&id).copied()
    }

    /// All projects below `id`, depth first, children in id order
    pub fn descendants(&self, id: ProjectId) -> Vec<ProjectId> {
        let mut children: Vec<ProjectId> = self
            .by_id
            .values()
            .filter(|p| p.parent_id == Some(id))
            .map(|p| p.id)
            .collect();
        children.sort();

        let mut result = Vec::new();
        for child in children {
            result.push(child);
            result.extend(self.descendants(child));
        }
        result
    }

    /// Checks whether `ancestor` lies strictly above `id`
    pub fn is_ancestor(&self, ancestor: ProjectId, id: ProjectId) -> bool {
        let mut current = self.get(id).and_then(|p| p.parent_id);
        while let Some(parent) = current {
            if parent == ancestor {
                return true;
            }
            current = self.get(parent).and_then(|p| p.parent_id);
        }
        false
    }

    pub fn root(&self, id: ProjectId) -> ProjectId {
        let mut current = id;
        while let Some(parent) = self.get(current).and_then(|p| p.parent_id) {
            current = parent;
        }
        current
    }
}
