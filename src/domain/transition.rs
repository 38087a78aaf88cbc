//! Drag-and-drop moves.
//!
//! A move is validated in full before anything is written: the issue must
//! exist and be editable, the target status/version/assignee must be legal and
//! the position lists must not repeat an issue. The store then applies field
//! changes, auto-assignment, the optional note and every position rewrite as
//! one update, and the source and destination columns are recomputed.
//!
//! The refresh query is planned before the write so a bad board query rejects
//! the move untouched. Once the update is committed the move stands: a failed
//! refresh only leaves [`UpdatedColumns::refreshed`] unset.

use crate::domain::board::{BoardAssembler, Column};
use crate::domain::item::{ItemId, Journal, StatusId, UserId, VersionId, WorkItem};
use crate::domain::query::{self, BoardQuery, BoardRequest};
use crate::domain::settings::BoardSettings;
use crate::domain::sorting::PositionMap;
use crate::error::{BoardError, Result};
use crate::storage::{Authorizer, ItemUpdate, Store};
use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info, warn};

/// Field edits carried by a move; absent fields stay unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldChanges {
    pub status_id: Option<StatusId>,
    /// `Some(None)` clears the version
    #[serde(deserialize_with = "double_option")]
    pub fixed_version_id: Option<Option<VersionId>>,
    /// `Some(None)` unassigns the issue
    #[serde(deserialize_with = "double_option")]
    pub assigned_to_id: Option<Option<UserId>>,
    pub notes: Option<String>,
}

/// Distinguishes an explicit `null` from a missing key
fn double_option<'de, T, D>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// A move as sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub item_id: ItemId,
    #[serde(default)]
    pub changes: FieldChanges,
    #[serde(default)]
    pub positions: PositionMap,
    /// Board the client is looking at; defaults to the issue's project board
    #[serde(default)]
    pub board: Option<BoardRequest>,
}

/// Result of a move: the updated issue and its refreshed columns
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdatedColumns {
    pub item: WorkItem,
    pub auto_assigned: bool,
    /// Source column first, then the destination when it differs
    pub columns: Vec<Column>,
    /// False when the columns could not be rebuilt after the committed write
    pub refreshed: bool,
}

pub struct TransitionProcessor<'a, S: ?Sized, A: ?Sized> {
    store: &'a S,
    authorizer: &'a A,
    settings: &'a BoardSettings,
}

impl<'a, S, A> TransitionProcessor<'a, S, A>
where
    S: Store + ?Sized,
    A: Authorizer + ?Sized,
{
    pub fn new(store: &'a S, authorizer: &'a A, settings: &'a BoardSettings) -> Self {
        Self {
            store,
            authorizer,
            settings,
        }
    }

    pub async fn apply_move(
        &self,
        user_id: UserId,
        item_id: ItemId,
        changes: &FieldChanges,
        positions: &PositionMap,
        query: Option<&BoardQuery>,
    ) -> Result<UpdatedColumns> {
        let item = self
            .store
            .item(item_id)
            .await?
            .ok_or(BoardError::NotFound(item_id))?;

        if !self.authorizer.can_edit(user_id, &item).await? {
            return Err(BoardError::Forbidden { user_id, item_id });
        }

        positions.validate(item_id)?;
        let status_id = self.check_status(&item, changes).await?;
        self.check_version(&item, changes).await?;
        self.check_assignee(&item, changes).await?;

        // Moves never change the project
        let default_query;
        let query = match query {
            Some(query) => query,
            None => {
                default_query = BoardQuery::for_project(item.project_id);
                &default_query
            }
        };
        let plan = query::plan(self.store, query, Some(user_id)).await?;

        let status_changed = status_id.is_some();
        let mut assigned_to_id = changes.assigned_to_id;
        let mut auto_assigned = false;
        if status_changed
            && self.settings.auto_assign_on_move
            && item.assigned_to_id.is_none()
            && changes.assigned_to_id.is_none()
        {
            if self
                .authorizer
                .is_project_member(user_id, item.project_id)
                .await?
            {
                assigned_to_id = Some(Some(user_id));
                auto_assigned = true;
            } else {
                debug!(
                    item_id = %item_id,
                    user_id = %user_id,
                    "Skipping auto-assign, user is not a project member"
                );
            }
        }

        let note = changes
            .notes
            .as_deref()
            .map(str::trim)
            .filter(|notes| !notes.is_empty())
            .map(|notes| Journal::new(item_id, user_id, notes.to_string()));

        let update = ItemUpdate {
            item_id,
            status_id,
            fixed_version_id: changes.fixed_version_id,
            assigned_to_id,
            note,
            positions: positions.clone(),
            updated_at: Utc::now(),
        };
        let updated = self.store.apply_update(&update).await?;

        info!(
            item_id = %item_id,
            user_id = %user_id,
            from_status = %item.status_id,
            to_status = %updated.status_id,
            auto_assigned,
            reordered_columns = update.positions.statuses().count(),
            "Move applied"
        );

        let refresh = BoardAssembler::new(self.store, self.authorizer, self.settings)
            .assemble_columns(&plan, &[item.status_id, updated.status_id])
            .await;
        let (columns, refreshed) = match refresh {
            Ok(columns) => (columns, true),
            Err(e) => {
                warn!(
                    item_id = %item_id,
                    error = %e,
                    "Move committed but its columns could not be refreshed"
                );
                (Vec::new(), false)
            }
        };

        Ok(UpdatedColumns {
            item: updated,
            auto_assigned,
            columns,
            refreshed,
        })
    }

    /// Target status when it differs from the current one
    async fn check_status(
        &self,
        item: &WorkItem,
        changes: &FieldChanges,
    ) -> Result<Option<StatusId>> {
        let Some(target) = changes.status_id.filter(|s| *s != item.status_id) else {
            return Ok(None);
        };
        let allowed = self.store.allowed_statuses(item).await?;
        if !allowed.contains(&target) {
            return Err(BoardError::invalid_transition(
                item.id,
                format!(
                    "status {} is not reachable from status {}",
                    target, item.status_id
                ),
            ));
        }
        Ok(Some(target))
    }

    async fn check_version(&self, item: &WorkItem, changes: &FieldChanges) -> Result<()> {
        let Some(Some(target)) = changes.fixed_version_id else {
            return Ok(());
        };
        if item.fixed_version_id == Some(target) {
            return Ok(());
        }
        let usable = self
            .store
            .shared_versions(item.project_id)
            .await?
            .iter()
            .any(|v| v.id == target && v.is_open());
        if !usable {
            return Err(BoardError::invalid_transition(
                item.id,
                format!("version {} is not open or not shared with the project", target),
            ));
        }
        Ok(())
    }

    async fn check_assignee(&self, item: &WorkItem, changes: &FieldChanges) -> Result<()> {
        let Some(Some(target)) = changes.assigned_to_id else {
            return Ok(());
        };
        if item.assigned_to_id == Some(target) {
            return Ok(());
        }
        if !self
            .authorizer
            .is_project_member(target, item.project_id)
            .await?
        {
            return Err(BoardError::invalid_transition(
                item.id,
                format!("user {} is not a member of the project", target),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::grouping::CardField;
    use crate::domain::item::ProjectId;
    use crate::storage::InMemoryStore;
    use crate::test_helpers::fixture;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn auto_assign() -> BoardSettings {
        BoardSettings {
            auto_assign_on_move: true,
            ..BoardSettings::default()
        }
    }

    fn to_status(status: u64) -> FieldChanges {
        FieldChanges {
            status_id: Some(StatusId::new(status)),
            ..FieldChanges::default()
        }
    }

    async fn apply(
        store: &InMemoryStore,
        settings: &BoardSettings,
        user: u64,
        item: u64,
        changes: FieldChanges,
        positions: PositionMap,
    ) -> Result<UpdatedColumns> {
        TransitionProcessor::new(store, store, settings)
            .apply_move(
                UserId::new(user),
                ItemId::new(item),
                &changes,
                &positions,
                None,
            )
            .await
    }

    fn card_ids(column: &Column) -> Vec<u64> {
        column.cards.iter().map(|c| c.id.get()).collect()
    }

    async fn item(store: &InMemoryStore, id: u64) -> WorkItem {
        store.item(ItemId::new(id)).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_move_to_next_status() {
        let store = fixture();
        let positions = PositionMap::new()
            .with_column(StatusId::new(2), vec![ItemId::new(1), ItemId::new(2)]);

        let result = apply(&store, &BoardSettings::default(), 2, 1, to_status(2), positions)
            .await
            .unwrap();

        assert_eq!(result.item.status_id, StatusId::new(2));
        assert!(!result.auto_assigned);
        assert!(result.refreshed);
        assert_eq!(result.item.assigned_to_id, None);

        let statuses: Vec<u64> = result.columns.iter().map(|c| c.status.id.get()).collect();
        assert_eq!(statuses, vec![1, 2]);
        assert_eq!(card_ids(&result.columns[0]), vec![3, 5, 10, 11, 14, 15, 16]);
        assert_eq!(card_ids(&result.columns[1]), vec![1, 2, 13]);
        let ranks: Vec<u32> = result.columns[1].cards.iter().map(|c| c.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_reorder_within_column() {
        let store = fixture();
        store
            .modify(|snapshot| {
                for item in snapshot.items.iter_mut() {
                    if item.id.get() == 1 || item.id.get() == 3 {
                        item.position = None;
                    }
                }
            })
            .await;
        let positions = PositionMap::new()
            .with_column(StatusId::new(1), vec![ItemId::new(3), ItemId::new(1)]);

        let result = apply(&store, &auto_assign(), 2, 1, to_status(1), positions)
            .await
            .unwrap();

        assert_eq!(result.columns.len(), 1);
        let new = &result.columns[0];
        assert_eq!(new.cards[0].id, ItemId::new(3));
        assert_eq!(new.cards[0].rank, 1);
        assert_eq!(new.cards[1].id, ItemId::new(1));
        assert_eq!(new.cards[1].rank, 2);

        // Same status: no auto-assignment even though it is switched on
        assert!(!result.auto_assigned);
        assert_eq!(item(&store, 1).await.assigned_to_id, None);

        // The rest of the column is renumbered after the supplied order
        assert_eq!(item(&store, 5).await.position, Some(3));
    }

    #[tokio::test]
    async fn test_auto_assign_member_on_status_change() {
        let store = fixture();
        let result = apply(&store, &auto_assign(), 2, 1, to_status(2), PositionMap::new())
            .await
            .unwrap();

        assert!(result.auto_assigned);
        assert_eq!(result.item.assigned_to_id, Some(UserId::new(2)));
    }

    #[tokio::test]
    async fn test_no_auto_assign_for_non_member() {
        let store = fixture();
        // The admin may edit everything but is not a member of project 1
        let result = apply(&store, &auto_assign(), 1, 1, to_status(2), PositionMap::new())
            .await
            .unwrap();

        assert!(!result.auto_assigned);
        assert_eq!(result.item.assigned_to_id, None);
        assert_eq!(result.item.status_id, StatusId::new(2));
    }

    #[tokio::test]
    async fn test_no_auto_assign_when_disabled_or_assigned() {
        let store = fixture();
        let result = apply(
            &store,
            &BoardSettings::default(),
            2,
            1,
            to_status(2),
            PositionMap::new(),
        )
        .await
        .unwrap();
        assert_eq!(result.item.assigned_to_id, None);

        // Issue 2 already belongs to user 2; user 3 moves it
        let result = apply(&store, &auto_assign(), 3, 2, to_status(3), PositionMap::new())
            .await
            .unwrap();
        assert!(!result.auto_assigned);
        assert_eq!(result.item.assigned_to_id, Some(UserId::new(2)));
    }

    #[tokio::test]
    async fn test_explicit_assignee_suppresses_auto_assign() {
        let store = fixture();
        let changes = FieldChanges {
            status_id: Some(StatusId::new(2)),
            assigned_to_id: Some(Some(UserId::new(3))),
            ..FieldChanges::default()
        };
        let result = apply(&store, &auto_assign(), 2, 1, changes, PositionMap::new())
            .await
            .unwrap();
        assert!(!result.auto_assigned);
        assert_eq!(result.item.assigned_to_id, Some(UserId::new(3)));
    }

    #[tokio::test]
    async fn test_status_outside_workflow_is_rejected() {
        let store = fixture();
        let err = apply(&store, &auto_assign(), 2, 1, to_status(4), PositionMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::InvalidTransition { item_id, .. } if item_id == ItemId::new(1)));

        let unchanged = item(&store, 1).await;
        assert_eq!(unchanged.status_id, StatusId::new(1));
        assert_eq!(unchanged.assigned_to_id, None);
    }

    #[tokio::test]
    async fn test_version_must_be_open_and_shared() {
        let store = fixture();
        let with_version = |id: u64| FieldChanges {
            fixed_version_id: Some(Some(VersionId::new(id))),
            ..FieldChanges::default()
        };
        let settings = BoardSettings::default();

        // Closed version, foreign version
        for version in [1, 4] {
            let err = apply(&store, &settings, 2, 3, with_version(version), PositionMap::new())
                .await
                .unwrap_err();
            assert!(matches!(err, BoardError::InvalidTransition { .. }));
        }

        let result = apply(&store, &settings, 2, 3, with_version(3), PositionMap::new())
            .await
            .unwrap();
        assert_eq!(result.item.fixed_version_id, Some(VersionId::new(3)));

        // Issue 1 keeps its closed version when the value does not change
        assert!(apply(&store, &settings, 2, 1, with_version(1), PositionMap::new())
            .await
            .is_ok());

        let clear = FieldChanges {
            fixed_version_id: Some(None),
            ..FieldChanges::default()
        };
        let result = apply(&store, &settings, 2, 3, clear, PositionMap::new())
            .await
            .unwrap();
        assert_eq!(result.item.fixed_version_id, None);
    }

    #[tokio::test]
    async fn test_assignee_must_be_member() {
        let store = fixture();
        let changes = FieldChanges {
            assigned_to_id: Some(Some(UserId::new(4))),
            ..FieldChanges::default()
        };
        let err = apply(&store, &BoardSettings::default(), 2, 1, changes, PositionMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn test_forbidden_and_missing_items() {
        let store = fixture();
        let settings = BoardSettings::default();

        let err = apply(&store, &settings, 4, 1, to_status(2), PositionMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::Forbidden { .. }));

        let err = apply(&store, &settings, 2, 404, to_status(2), PositionMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::NotFound(id) if id == ItemId::new(404)));
    }

    #[tokio::test]
    async fn test_bad_positions_leave_no_trace() {
        let store = fixture();
        let settings = auto_assign();

        let duplicated = PositionMap::new().with_column(
            StatusId::new(2),
            vec![ItemId::new(1), ItemId::new(2), ItemId::new(1)],
        );
        let err = apply(&store, &settings, 2, 1, to_status(2), duplicated)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::InvalidTransition { .. }));

        let unknown = PositionMap::new()
            .with_column(StatusId::new(2), vec![ItemId::new(1), ItemId::new(999)]);
        let err = apply(&store, &settings, 2, 1, to_status(2), unknown)
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::NotFound(id) if id == ItemId::new(999)));

        let unchanged = item(&store, 1).await;
        assert_eq!(unchanged.status_id, StatusId::new(1));
        assert_eq!(unchanged.assigned_to_id, None);
        assert_eq!(unchanged.position, Some(1));
    }

    #[tokio::test]
    async fn test_bad_board_query_leaves_no_trace() {
        let store = fixture();
        let settings = BoardSettings::default();
        let changes = FieldChanges {
            status_id: Some(StatusId::new(2)),
            notes: Some("hello".to_string()),
            ..FieldChanges::default()
        };
        let missing = BoardQuery::for_project(ProjectId::new(99));

        let err = TransitionProcessor::new(&store, &store, &settings)
            .apply_move(
                UserId::new(2),
                ItemId::new(1),
                &changes,
                &PositionMap::new(),
                Some(&missing),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BoardError::ProjectNotFound(_)));

        assert_eq!(item(&store, 1).await.status_id, StatusId::new(1));
        assert!(store.last_notes(&[ItemId::new(1)]).await.unwrap().is_empty());
    }

    /// Allows the pre-write permission check, then times out
    struct FailsAfterFirstCheck<'a> {
        store: &'a InMemoryStore,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl<'a> Authorizer for FailsAfterFirstCheck<'a> {
        async fn can_edit(&self, user_id: UserId, item: &WorkItem) -> Result<bool> {
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(BoardError::Transient {
                    context: "can_edit".to_string(),
                    source: anyhow::anyhow!("authorization service timed out"),
                });
            }
            self.store.can_edit(user_id, item).await
        }

        async fn is_project_member(&self, user_id: UserId, project_id: ProjectId) -> Result<bool> {
            self.store.is_project_member(user_id, project_id).await
        }
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_committed_move() {
        let store = fixture();
        let authorizer = FailsAfterFirstCheck {
            store: &store,
            calls: AtomicUsize::new(0),
        };
        let settings = BoardSettings::default();
        let changes = FieldChanges {
            status_id: Some(StatusId::new(2)),
            notes: Some("hello".to_string()),
            ..FieldChanges::default()
        };

        let result = TransitionProcessor::new(&store, &authorizer, &settings)
            .apply_move(
                UserId::new(2),
                ItemId::new(1),
                &changes,
                &PositionMap::new(),
                None,
            )
            .await
            .unwrap();

        assert!(!result.refreshed);
        assert!(result.columns.is_empty());
        assert_eq!(result.item.status_id, StatusId::new(2));
        assert_eq!(item(&store, 1).await.status_id, StatusId::new(2));
        assert_eq!(store.last_notes(&[ItemId::new(1)]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_note_is_recorded() {
        let store = fixture();
        let changes = FieldChanges {
            notes: Some("  Picked up  ".to_string()),
            ..FieldChanges::default()
        };
        apply(&store, &BoardSettings::default(), 2, 1, changes, PositionMap::new())
            .await
            .unwrap();

        let notes = store.last_notes(&[ItemId::new(1)]).await.unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].notes, "Picked up");
        assert_eq!(notes[0].user_id, UserId::new(2));

        let blank = FieldChanges {
            notes: Some("   ".to_string()),
            ..FieldChanges::default()
        };
        apply(&store, &BoardSettings::default(), 2, 3, blank, PositionMap::new())
            .await
            .unwrap();
        assert!(store.last_notes(&[ItemId::new(3)]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_move_resets_time_in_state() {
        let store = fixture();
        let before = item(&store, 2).await;
        assert!(before.status_changed_at.is_some());

        let result = apply(&store, &BoardSettings::default(), 2, 2, to_status(3), PositionMap::new())
            .await
            .unwrap();
        assert!(result.item.status_changed_at > before.status_changed_at);
        assert!(result.item.time_in_state(Utc::now()) < chrono::Duration::minutes(1));
    }

    #[tokio::test]
    async fn test_columns_follow_supplied_query() {
        let store = fixture();
        let query = BoardQuery::for_project(ProjectId::new(1))
            .with_filter(
                crate::domain::filter::FilterClause::parse("tracker_id", "=", &["1".to_string()])
                    .unwrap(),
            )
            .with_card_fields(vec![CardField::Tracker]);
        let settings = BoardSettings::default();

        let result = TransitionProcessor::new(&store, &store, &settings)
            .apply_move(
                UserId::new(2),
                ItemId::new(1),
                &to_status(2),
                &PositionMap::new(),
                Some(&query),
            )
            .await
            .unwrap();

        // Only Bug issues are listed; 2 and 13 are feature requests
        assert_eq!(card_ids(&result.columns[1]), vec![1]);
        assert_eq!(result.columns[1].cards[0].tracker.as_deref(), Some("Bug"));
    }

    #[test]
    fn test_move_request_json() {
        let request: MoveRequest = serde_json::from_str(
            r#"{
                "item_id": 1,
                "changes": {"status_id": 2, "assigned_to_id": null, "notes": "done"},
                "positions": {"2": [1, 2]}
            }"#,
        )
        .unwrap();

        assert_eq!(request.changes.status_id, Some(StatusId::new(2)));
        assert_eq!(request.changes.assigned_to_id, Some(None));
        assert_eq!(request.changes.fixed_version_id, None);
        assert_eq!(
            request.positions.column(StatusId::new(2)),
            Some(&[ItemId::new(1), ItemId::new(2)][..])
        );
        assert!(request.board.is_none());
    }
}
