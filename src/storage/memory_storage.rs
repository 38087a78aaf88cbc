use crate::{
    domain::item::{
        IssueStatus, ItemId, Journal, Membership, Project, ProjectId, ProjectTree, Relation, Role,
        StatusId, Tracker, User, UserId, Version, VersionId, Watcher, WorkItem,
        WorkflowTransition,
    },
    error::{BoardError, Result},
    storage::{Authorizer, ItemQuery, ItemUpdate, Store},
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::{fs, sync::RwLock};
use tracing::debug;

/// Complete data set served by [`InMemoryStore`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Snapshot {
    pub projects: Vec<Project>,
    pub statuses: Vec<IssueStatus>,
    pub trackers: Vec<Tracker>,
    pub users: Vec<User>,
    pub roles: Vec<Role>,
    pub memberships: Vec<Membership>,
    pub versions: Vec<Version>,
    pub workflows: Vec<WorkflowTransition>,
    pub items: Vec<WorkItem>,
    pub relations: Vec<Relation>,
    pub watchers: Vec<Watcher>,
    pub journals: Vec<Journal>,
}

/// In-process store and authorizer over a [`Snapshot`]
pub struct InMemoryStore {
    data: RwLock<Snapshot>,
    unavailable: AtomicBool,
}

impl InMemoryStore {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            data: RwLock::new(snapshot),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Loads a snapshot from a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BoardError::ConfigError(format!(
                "snapshot not found: {}",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path).await?;
        let snapshot: Snapshot = serde_json::from_str(&contents)?;
        debug!(
            path = %path.display(),
            items = snapshot.items.len(),
            "Snapshot loaded"
        );
        Ok(Self::new(snapshot))
    }

    /// Writes the current data to a JSON file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = {
            let data = self.data.read().await;
            serde_json::to_string_pretty(&*data)?
        };
        fs::write(path, json).await?;
        Ok(())
    }

    pub async fn snapshot(&self) -> Snapshot {
        self.data.read().await.clone()
    }

    pub async fn modify(&self, change: impl FnOnce(&mut Snapshot)) {
        let mut data = self.data.write().await;
        change(&mut data);
    }

    /// Makes every call fail as if the backing store timed out
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self, context: &str) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BoardError::Transient {
                context: context.to_string(),
                source: anyhow::anyhow!("store timed out"),
            });
        }
        Ok(())
    }

    async fn read(&self, context: &str) -> Result<tokio::sync::RwLockReadGuard<'_, Snapshot>> {
        self.check_available(context)?;
        Ok(self.data.read().await)
    }
}

fn statuses_in_order(data: &Snapshot, ids: &BTreeSet<StatusId>) -> Vec<IssueStatus> {
    let mut statuses: Vec<IssueStatus> = data
        .statuses
        .iter()
        .filter(|s| ids.contains(&s.id))
        .cloned()
        .collect();
    statuses.sort_by_key(|s| (s.position, s.id));
    statuses
}

#[async_trait]
impl Store for InMemoryStore {
    async fn projects(&self) -> Result<Vec<Project>> {
        Ok(self.read("loading projects").await?.projects.clone())
    }

    async fn statuses(&self) -> Result<Vec<IssueStatus>> {
        let data = self.read("loading statuses").await?;
        let ids = data.statuses.iter().map(|s| s.id).collect();
        Ok(statuses_in_order(&data, &ids))
    }

    async fn trackers(&self) -> Result<Vec<Tracker>> {
        Ok(self.read("loading trackers").await?.trackers.clone())
    }

    async fn users(&self, ids: &[UserId]) -> Result<Vec<User>> {
        let data = self.read("loading users").await?;
        Ok(data
            .users
            .iter()
            .filter(|u| ids.contains(&u.id))
            .cloned()
            .collect())
    }

    async fn workflow_statuses(&self, project_ids: &[ProjectId]) -> Result<Vec<IssueStatus>> {
        let data = self.read("loading workflows").await?;
        let trackers: HashSet<_> = data
            .projects
            .iter()
            .filter(|p| project_ids.contains(&p.id))
            .flat_map(|p| p.tracker_ids.iter().copied())
            .collect();

        let ids: BTreeSet<StatusId> = data
            .workflows
            .iter()
            .filter(|w| trackers.contains(&w.tracker_id))
            .flat_map(|w| [w.old_status_id, w.new_status_id])
            .collect();
        Ok(statuses_in_order(&data, &ids))
    }

    async fn allowed_statuses(&self, item: &WorkItem) -> Result<Vec<StatusId>> {
        let data = self.read("loading workflow transitions").await?;
        let mut allowed = vec![item.status_id];
        allowed.extend(
            data.workflows
                .iter()
                .filter(|w| w.tracker_id == item.tracker_id && w.old_status_id == item.status_id)
                .map(|w| w.new_status_id),
        );
        allowed.sort();
        allowed.dedup();
        Ok(allowed)
    }

    async fn find_items(&self, query: &ItemQuery) -> Result<Vec<WorkItem>> {
        let data = self.read("loading issues").await?;
        Ok(data
            .items
            .iter()
            .filter(|i| query.project_ids.contains(&i.project_id))
            .filter(|i| {
                query
                    .status_ids
                    .as_ref()
                    .map(|ids| ids.contains(&i.status_id))
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }

    async fn item(&self, id: ItemId) -> Result<Option<WorkItem>> {
        let data = self.read("loading issue").await?;
        Ok(data.items.iter().find(|i| i.id == id).cloned())
    }

    async fn items_by_ids(&self, ids: &[ItemId]) -> Result<Vec<WorkItem>> {
        let data = self.read("loading issues").await?;
        Ok(data
            .items
            .iter()
            .filter(|i| ids.contains(&i.id))
            .cloned()
            .collect())
    }

    async fn parents_with_children(&self, ids: &[ItemId]) -> Result<HashSet<ItemId>> {
        let data = self.read("loading sub-issues").await?;
        Ok(data
            .items
            .iter()
            .filter_map(|i| i.parent_id)
            .filter(|parent| ids.contains(parent))
            .collect())
    }

    async fn relations(&self, ids: &[ItemId]) -> Result<Vec<Relation>> {
        let data = self.read("loading relations").await?;
        Ok(data
            .relations
            .iter()
            .filter(|r| ids.contains(&r.issue_from) || ids.contains(&r.issue_to))
            .cloned()
            .collect())
    }

    async fn watchers(&self, ids: &[ItemId]) -> Result<Vec<Watcher>> {
        let data = self.read("loading watchers").await?;
        Ok(data
            .watchers
            .iter()
            .filter(|w| ids.contains(&w.item_id))
            .cloned()
            .collect())
    }

    async fn memberships(&self, project_ids: &[ProjectId]) -> Result<Vec<Membership>> {
        let data = self.read("loading memberships").await?;
        Ok(data
            .memberships
            .iter()
            .filter(|m| project_ids.contains(&m.project_id))
            .cloned()
            .collect())
    }

    async fn shared_versions(&self, project_id: ProjectId) -> Result<Vec<Version>> {
        let data = self.read("loading versions").await?;
        let tree = ProjectTree::new(&data.projects);
        Ok(data
            .versions
            .iter()
            .filter(|v| v.is_shared_with(project_id, &tree))
            .cloned()
            .collect())
    }

    async fn versions(&self, ids: &[VersionId]) -> Result<Vec<Version>> {
        let data = self.read("loading versions").await?;
        Ok(data
            .versions
            .iter()
            .filter(|v| ids.contains(&v.id))
            .cloned()
            .collect())
    }

    async fn last_notes(&self, ids: &[ItemId]) -> Result<Vec<Journal>> {
        let data = self.read("loading notes").await?;
        let mut latest: HashMap<ItemId, &Journal> = HashMap::new();
        for journal in data
            .journals
            .iter()
            .filter(|j| ids.contains(&j.item_id) && !j.notes.trim().is_empty())
        {
            let newer = latest
                .get(&journal.item_id)
                .map(|current| journal.created_at >= current.created_at)
                .unwrap_or(true);
            if newer {
                latest.insert(journal.item_id, journal);
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    async fn apply_update(&self, update: &ItemUpdate) -> Result<WorkItem> {
        self.check_available("applying move")?;
        let mut data = self.data.write().await;

        // Validate everything before the first write so a rejected update changes nothing
        let index = data
            .items
            .iter()
            .position(|i| i.id == update.item_id)
            .ok_or(BoardError::NotFound(update.item_id))?;
        let assignments: HashMap<ItemId, u32> =
            update.positions.assignments().into_iter().collect();
        for id in assignments.keys() {
            if !data.items.iter().any(|i| i.id == *id) {
                return Err(BoardError::NotFound(*id));
            }
        }

        let item = &mut data.items[index];
        if let Some(status_id) = update.status_id {
            item.set_status(status_id, update.updated_at);
        }
        if let Some(version) = update.fixed_version_id {
            item.fixed_version_id = version;
        }
        if let Some(assignee) = update.assigned_to_id {
            item.assigned_to_id = assignee;
        }
        item.updated_at = update.updated_at;

        for item in data.items.iter_mut() {
            if let Some(position) = assignments.get(&item.id) {
                item.position = Some(*position);
            }
        }
        for status_id in update.positions.statuses() {
            let listed = update.positions.column(status_id).unwrap_or_default();
            let mut rest: Vec<&mut WorkItem> = data
                .items
                .iter_mut()
                .filter(|i| i.status_id == status_id && !listed.contains(&i.id))
                .collect();
            rest.sort_by_key(|i| (i.position.is_none(), i.position, i.id));
            for (offset, item) in rest.into_iter().enumerate() {
                item.position = Some((listed.len() + offset) as u32 + 1);
            }
        }

        if let Some(note) = &update.note {
            data.journals.push(note.clone());
        }

        Ok(data.items[index].clone())
    }
}

#[async_trait]
impl Authorizer for InMemoryStore {
    async fn can_edit(&self, user_id: UserId, item: &WorkItem) -> Result<bool> {
        let data = self.read("checking permissions").await?;
        if data.users.iter().any(|u| u.id == user_id && u.admin) {
            return Ok(true);
        }
        let editing_roles: HashSet<_> = data
            .roles
            .iter()
            .filter(|r| r.edit_issues)
            .map(|r| r.id)
            .collect();
        Ok(data.memberships.iter().any(|m| {
            m.user_id == user_id
                && m.project_id == item.project_id
                && m.role_ids.iter().any(|r| editing_roles.contains(r))
        }))
    }

    async fn is_project_member(&self, user_id: UserId, project_id: ProjectId) -> Result<bool> {
        let data = self.read("checking membership").await?;
        Ok(data
            .memberships
            .iter()
            .any(|m| m.user_id == user_id && m.project_id == project_id))
    }
}
