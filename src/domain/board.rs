use crate::domain::evaluate::EvalContext;
use crate::domain::grouping::{CardField, GroupBy, GroupKey};
use crate::domain::item::{
    IssueStatus, ItemId, ProjectId, StatusId, TrackerId, UserId, VersionId, WorkItem,
};
use crate::domain::query::QueryPlan;
use crate::domain::settings::BoardSettings;
use crate::domain::sorting::{sort_by_position, PositionIndex};
use crate::error::Result;
use crate::storage::{Authorizer, Store};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use tracing::{debug, warn};

const LAST_COMMENT_LENGTH: usize = 100;

/// Which estimate figures a board displays
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EstimateDisplay {
    pub hours: bool,
    pub story_points: bool,
}

impl EstimateDisplay {
    pub fn new(settings: &BoardSettings, card_fields: &[CardField]) -> Self {
        Self {
            hours: card_fields.contains(&CardField::EstimatedHours),
            story_points: settings.story_points_enabled()
                && card_fields.contains(&CardField::StoryPoints),
        }
    }

    /// `"20.00h"`, `"5sp"`, `"20.00h/5sp"`, or nothing when both parts are hidden or zero
    pub fn format(&self, hours: f64, story_points: u32) -> Option<String> {
        let mut parts = Vec::new();
        if self.hours && hours > 0.0 {
            parts.push(format!("{:.2}h", hours));
        }
        if self.story_points && story_points > 0 {
            parts.push(format!("{}sp", story_points));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("/"))
        }
    }
}

/// One issue as rendered inside a column
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Card {
    pub id: ItemId,
    pub subject: String,
    pub status_id: StatusId,
    /// Dense 1-based rank inside the column
    pub rank: u32,
    pub closed: bool,
    /// Closed issue whose details are withheld by the board settings
    pub detail_hidden: bool,
    pub editable: bool,
    pub commentable: bool,
    pub swimlane: Option<GroupKey>,
    pub tracker: Option<String>,
    pub project: Option<String>,
    pub assigned_to: Option<String>,
    pub author: Option<String>,
    pub fixed_version: Option<String>,
    pub parent: Option<String>,
    /// e.g. `(20.00h/5sp)`
    pub estimate: Option<String>,
    pub hours_in_state: Option<i64>,
    pub last_comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Column {
    pub status: IssueStatus,
    pub cards: Vec<Card>,
    /// Matching issues in this status, including any cut by the board cap
    pub item_count: usize,
    pub estimated_hours: f64,
    pub story_points: u32,
    pub totals: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Swimlane {
    pub key: GroupKey,
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Board {
    pub columns: Vec<Column>,
    /// Empty unless the query groups rows
    pub swimlanes: Vec<Swimlane>,
    pub total_items: usize,
    pub item_limit: Option<usize>,
    pub truncated: bool,
}

impl Board {
    pub fn column(&self, status_id: StatusId) -> Option<&Column> {
        self.columns.iter().find(|c| c.status.id == status_id)
    }

    pub fn card_count(&self) -> usize {
        self.columns.iter().map(|c| c.cards.len()).sum()
    }
}

/// Builds boards and single columns from a [`QueryPlan`]
pub struct BoardAssembler<'a, S: ?Sized, A: ?Sized> {
    store: &'a S,
    authorizer: &'a A,
    settings: &'a BoardSettings,
    as_of: DateTime<Utc>,
}

impl<'a, S, A> BoardAssembler<'a, S, A>
where
    S: Store + ?Sized,
    A: Authorizer + ?Sized,
{
    pub fn new(store: &'a S, authorizer: &'a A, settings: &'a BoardSettings) -> Self {
        Self {
            store,
            authorizer,
            settings,
            as_of: Utc::now(),
        }
    }

    /// Fixes the clock used for time in state
    pub fn as_of(mut self, as_of: DateTime<Utc>) -> Self {
        self.as_of = as_of;
        self
    }

    /// Runs the plan and lays the matches out in status columns, capped board-wide
    pub async fn assemble(&self, plan: &QueryPlan) -> Result<Board> {
        let (matched, ctx) = self.matched(plan).await?;
        let total_items = matched.len();
        let statuses = column_order(plan, &matched, &ctx);
        let mut buckets = bucket(matched);

        let item_limit = self.settings.item_limit();
        let mut remaining = item_limit;
        let mut layout = Vec::with_capacity(statuses.len());
        for status in statuses {
            let items = buckets.remove(&status.id).unwrap_or_default();
            let shown = match remaining {
                Some(left) => {
                    let shown = left.min(items.len());
                    remaining = Some(left - shown);
                    shown
                }
                None => items.len(),
            };
            layout.push((status, items, shown));
        }

        let shown_total: usize = layout.iter().map(|(_, _, shown)| *shown).sum();
        let truncated = shown_total < total_items;
        if truncated {
            warn!(
                limit = ?item_limit,
                total_items,
                shown = shown_total,
                "Board truncated to the configured item limit"
            );
        }

        let columns = self.build_columns(plan, layout).await?;
        let swimlanes = self.swimlanes(plan, &columns).await?;

        Ok(Board {
            columns,
            swimlanes,
            total_items,
            item_limit,
            truncated,
        })
    }

    /// Recomputes the given columns in full, without the board cap
    pub async fn assemble_columns(
        &self,
        plan: &QueryPlan,
        status_ids: &[StatusId],
    ) -> Result<Vec<Column>> {
        let (matched, ctx) = self.matched(plan).await?;
        let mut buckets = bucket(matched);

        let mut layout = Vec::new();
        let mut seen = Vec::new();
        for status_id in status_ids {
            if seen.contains(status_id) {
                continue;
            }
            seen.push(*status_id);
            let status = ctx
                .statuses
                .get(status_id)
                .cloned()
                .unwrap_or_else(|| unknown_status(*status_id));
            let items = buckets.remove(status_id).unwrap_or_default();
            let shown = items.len();
            layout.push((status, items, shown));
        }
        self.build_columns(plan, layout).await
    }

    async fn matched(&self, plan: &QueryPlan) -> Result<(Vec<WorkItem>, EvalContext)> {
        let candidates = self.store.find_items(&plan.item_query).await?;
        let ctx =
            EvalContext::load(self.store, &plan.filters, &candidates, plan.acting_user).await?;
        let candidate_count = candidates.len();
        let matched: Vec<WorkItem> = candidates
            .into_iter()
            .filter(|item| ctx.matches_all(&plan.filters, item))
            .collect();
        debug!(
            candidates = candidate_count,
            matched = matched.len(),
            "Board items selected"
        );
        Ok((matched, ctx))
    }

    async fn build_columns(
        &self,
        plan: &QueryPlan,
        layout: Vec<(IssueStatus, Vec<WorkItem>, usize)>,
    ) -> Result<Vec<Column>> {
        let visible: Vec<&WorkItem> = layout
            .iter()
            .flat_map(|(_, items, shown)| items.iter().take(*shown))
            .collect();
        let labels = Labels::load(self.store, plan, &visible).await?;
        let display = EstimateDisplay::new(self.settings, &plan.card_fields);

        let mut columns = Vec::with_capacity(layout.len());
        for (status, items, shown) in layout {
            let estimated_hours: f64 = items.iter().filter_map(|i| i.estimated_hours).sum();
            let story_points: u32 = items.iter().filter_map(|i| i.story_points).sum();

            let index = PositionIndex::from_sorted(&items);
            let mut cards = Vec::with_capacity(shown);
            for item in items.iter().take(shown) {
                let Some(rank) = index.rank(item.id) else {
                    continue;
                };
                cards.push(self.card(plan, &status, item, rank, &labels, display).await?);
            }

            columns.push(Column {
                totals: display.format(estimated_hours, story_points),
                status,
                cards,
                item_count: items.len(),
                estimated_hours,
                story_points,
            });
        }
        Ok(columns)
    }

    async fn card(
        &self,
        plan: &QueryPlan,
        status: &IssueStatus,
        item: &WorkItem,
        rank: u32,
        labels: &Labels,
        display: EstimateDisplay,
    ) -> Result<Card> {
        let closed = status.is_closed;
        let detail_hidden = closed && self.settings.hide_closed_issues_data;
        let editable = match plan.acting_user {
            Some(user_id) => self.authorizer.can_edit(user_id, item).await?,
            None => false,
        };

        let mut card = Card {
            id: item.id,
            subject: item.subject.clone(),
            status_id: item.status_id,
            rank,
            closed,
            detail_hidden,
            editable,
            commentable: editable && self.settings.allow_inline_comments,
            swimlane: plan.group_by.key(item, self.as_of),
            tracker: None,
            project: None,
            assigned_to: None,
            author: None,
            fixed_version: None,
            parent: None,
            estimate: None,
            hours_in_state: None,
            last_comment: None,
        };
        if detail_hidden {
            return Ok(card);
        }

        let shows = |field| plan.shows(field);
        if shows(CardField::Tracker) {
            card.tracker = Some(labels.tracker(item.tracker_id));
        }
        if shows(CardField::Project) {
            card.project = Some(labels.project(item.project_id));
        }
        if shows(CardField::AssignedTo) {
            card.assigned_to = item.assigned_to_id.map(|id| labels.user(id));
        }
        if shows(CardField::Author) {
            card.author = Some(labels.user(item.author_id));
        }
        if shows(CardField::FixedVersion) {
            card.fixed_version = item.fixed_version_id.map(|id| labels.version(id));
        }
        if shows(CardField::Parent) {
            card.parent = item.parent_id.map(|id| labels.parent(id));
        }
        if shows(CardField::DayInState) {
            card.hours_in_state = Some(item.time_in_state(self.as_of).num_hours());
        }
        if shows(CardField::LastComment) {
            card.last_comment = labels.notes.get(&item.id).cloned();
        }
        card.estimate = display
            .format(
                item.estimated_hours.unwrap_or(0.0),
                item.story_points.unwrap_or(0),
            )
            .map(|estimate| format!("({})", estimate));

        Ok(card)
    }

    async fn swimlanes(&self, plan: &QueryPlan, columns: &[Column]) -> Result<Vec<Swimlane>> {
        if plan.group_by == GroupBy::None {
            return Ok(Vec::new());
        }

        let mut counts: BTreeMap<GroupKey, usize> = BTreeMap::new();
        for key in columns
            .iter()
            .flat_map(|c| c.cards.iter())
            .filter_map(|card| card.swimlane)
        {
            *counts.entry(key).or_default() += 1;
        }

        let labels = Labels::for_lanes(self.store, plan.group_by, counts.keys()).await?;
        Ok(counts
            .into_iter()
            .map(|(key, count)| Swimlane {
                label: labels.lane(plan.group_by, key),
                key,
                count,
            })
            .collect())
    }
}

fn bucket(items: Vec<WorkItem>) -> HashMap<StatusId, Vec<WorkItem>> {
    let mut buckets: HashMap<StatusId, Vec<WorkItem>> = HashMap::new();
    for item in items {
        buckets.entry(item.status_id).or_default().push(item);
    }
    for items in buckets.values_mut() {
        sort_by_position(items);
    }
    buckets
}

/// Pre-seeded columns followed by any other status a matched issue holds
fn column_order(plan: &QueryPlan, matched: &[WorkItem], ctx: &EvalContext) -> Vec<IssueStatus> {
    let mut statuses = plan.column_statuses.clone();
    let mut extra: Vec<IssueStatus> = Vec::new();
    for item in matched {
        let known = statuses.iter().chain(extra.iter()).any(|s| s.id == item.status_id);
        if !known {
            extra.push(
                ctx.statuses
                    .get(&item.status_id)
                    .cloned()
                    .unwrap_or_else(|| unknown_status(item.status_id)),
            );
        }
    }
    extra.sort_by_key(|s| (s.position, s.id));
    statuses.extend(extra);
    statuses
}

fn unknown_status(id: StatusId) -> IssueStatus {
    IssueStatus {
        id,
        name: format!("Status {}", id),
        is_closed: false,
        position: u32::MAX,
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

/// Display names fetched for the fields a board shows
#[derive(Debug, Default)]
struct Labels {
    trackers: HashMap<TrackerId, String>,
    projects: HashMap<ProjectId, String>,
    users: HashMap<UserId, String>,
    versions: HashMap<VersionId, String>,
    parents: HashMap<ItemId, String>,
    notes: HashMap<ItemId, String>,
}

impl Labels {
    async fn load<S: Store + ?Sized>(
        store: &S,
        plan: &QueryPlan,
        items: &[&WorkItem],
    ) -> Result<Self> {
        let mut labels = Labels::default();
        if items.is_empty() {
            return Ok(labels);
        }

        if plan.shows(CardField::Tracker) {
            labels.load_trackers(store).await?;
        }
        if plan.shows(CardField::Project) {
            labels.load_projects(store).await?;
        }
        let mut user_ids = Vec::new();
        if plan.shows(CardField::AssignedTo) {
            user_ids.extend(items.iter().filter_map(|i| i.assigned_to_id));
        }
        if plan.shows(CardField::Author) {
            user_ids.extend(items.iter().map(|i| i.author_id));
        }
        if !user_ids.is_empty() {
            labels.load_users(store, user_ids).await?;
        }
        if plan.shows(CardField::FixedVersion) {
            labels
                .load_versions(store, items.iter().filter_map(|i| i.fixed_version_id).collect())
                .await?;
        }
        if plan.shows(CardField::Parent) {
            labels
                .load_parents(store, items.iter().filter_map(|i| i.parent_id).collect())
                .await?;
        }
        if plan.shows(CardField::LastComment) {
            let ids: Vec<ItemId> = items.iter().map(|i| i.id).collect();
            for journal in store.last_notes(&ids).await? {
                labels.notes.insert(
                    journal.item_id,
                    truncate_chars(&journal.notes, LAST_COMMENT_LENGTH),
                );
            }
        }
        Ok(labels)
    }

    async fn for_lanes<'k, S: Store + ?Sized>(
        store: &S,
        group_by: GroupBy,
        keys: impl Iterator<Item = &'k GroupKey>,
    ) -> Result<Self> {
        let ids: Vec<u64> = keys
            .filter_map(|key| match key {
                GroupKey::Value(id) => Some(*id),
                GroupKey::NoValue => None,
            })
            .collect();
        let mut labels = Labels::default();
        match group_by {
            GroupBy::Tracker => labels.load_trackers(store).await?,
            GroupBy::Project => labels.load_projects(store).await?,
            GroupBy::AssignedTo | GroupBy::Author => {
                labels
                    .load_users(store, ids.into_iter().map(UserId::new).collect())
                    .await?
            }
            GroupBy::FixedVersion => {
                labels
                    .load_versions(store, ids.into_iter().map(VersionId::new).collect())
                    .await?
            }
            GroupBy::Parent => {
                labels
                    .load_parents(store, ids.into_iter().map(ItemId::new).collect())
                    .await?
            }
            GroupBy::DayInState | GroupBy::None => {}
        }
        Ok(labels)
    }

    async fn load_trackers<S: Store + ?Sized>(&mut self, store: &S) -> Result<()> {
        self.trackers = store
            .trackers()
            .await?
            .into_iter()
            .map(|t| (t.id, t.name))
            .collect();
        Ok(())
    }

    async fn load_projects<S: Store + ?Sized>(&mut self, store: &S) -> Result<()> {
        self.projects = store
            .projects()
            .await?
            .into_iter()
            .map(|p| (p.id, p.name))
            .collect();
        Ok(())
    }

    async fn load_users<S: Store + ?Sized>(&mut self, store: &S, mut ids: Vec<UserId>) -> Result<()> {
        ids.sort();
        ids.dedup();
        self.users = store
            .users(&ids)
            .await?
            .into_iter()
            .map(|u| (u.id, u.name))
            .collect();
        Ok(())
    }

    async fn load_versions<S: Store + ?Sized>(
        &mut self,
        store: &S,
        mut ids: Vec<VersionId>,
    ) -> Result<()> {
        ids.sort();
        ids.dedup();
        self.versions = store
            .versions(&ids)
            .await?
            .into_iter()
            .map(|v| (v.id, v.name))
            .collect();
        Ok(())
    }

    async fn load_parents<S: Store + ?Sized>(&mut self, store: &S, mut ids: Vec<ItemId>) -> Result<()> {
        ids.sort();
        ids.dedup();
        self.parents = store
            .items_by_ids(&ids)
            .await?
            .into_iter()
            .map(|p| (p.id, format!("#{} {}", p.id, p.subject)))
            .collect();
        Ok(())
    }

    fn tracker(&self, id: TrackerId) -> String {
        name_or_id(&self.trackers, id)
    }

    fn project(&self, id: ProjectId) -> String {
        name_or_id(&self.projects, id)
    }

    fn user(&self, id: UserId) -> String {
        name_or_id(&self.users, id)
    }

    fn version(&self, id: VersionId) -> String {
        name_or_id(&self.versions, id)
    }

    fn parent(&self, id: ItemId) -> String {
        self.parents
            .get(&id)
            .cloned()
            .unwrap_or_else(|| format!("#{}", id))
    }

    fn lane(&self, group_by: GroupBy, key: GroupKey) -> String {
        let GroupKey::Value(id) = key else {
            return "None".to_string();
        };
        match group_by {
            GroupBy::Tracker => self.tracker(TrackerId::new(id)),
            GroupBy::Project => self.project(ProjectId::new(id)),
            GroupBy::AssignedTo | GroupBy::Author => self.user(UserId::new(id)),
            GroupBy::FixedVersion => self.version(VersionId::new(id)),
            GroupBy::Parent => self.parent(ItemId::new(id)),
            GroupBy::DayInState => match id {
                1 => "1 day".to_string(),
                days => format!("{} days", days),
            },
            GroupBy::None => id.to_string(),
        }
    }
}

fn name_or_id<K: Eq + Hash + std::fmt::Display>(names: &HashMap<K, String>, id: K) -> String {
    names.get(&id).cloned().unwrap_or_else(|| id.to_string())
}
