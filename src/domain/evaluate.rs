//! Clause evaluation against prefetched collaborator data.
//!
//! Derived fields (sub-issues, watchers, relations, parent tracker, assignee
//! role) cannot be answered from an issue row alone. [`EvalContext::load`]
//! fetches exactly what the active clauses need, after which matching is
//! synchronous and side-effect free.

use crate::domain::filter::{Direction, Field, FilterClause, FilterSet, Join, Operand, Operator};
use crate::domain::item::{
    IssueStatus, ItemId, ProjectId, Relation, RoleId, StatusId, Tracker, UserId, Version,
    VersionId, WorkItem,
};
use crate::error::Result;
use crate::storage::Store;
use chrono::NaiveDate;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Picks the open version with the earliest effective date; undated versions come last
pub fn current_version(versions: &[Version]) -> Option<VersionId> {
    versions
        .iter()
        .filter(|v| v.is_open())
        .min_by_key(|v| (v.effective_date.is_none(), v.effective_date, v.id))
        .map(|v| v.id)
}

/// Whether a status passes a `status_id` clause
pub fn status_accepts(clause: &FilterClause, status: &IssueStatus) -> bool {
    match clause.operator() {
        Operator::Open => !status.is_closed,
        Operator::Closed => status.is_closed,
        Operator::Any => true,
        Operator::Equals => ids(clause.operands(), None).contains(&status.id.get()),
        Operator::NotEquals => !ids(clause.operands(), None).contains(&status.id.get()),
        _ => false,
    }
}

/// Data the clauses of one query need beyond the issue rows
#[derive(Debug, Default)]
pub struct EvalContext {
    pub acting_user: Option<UserId>,
    pub statuses: HashMap<StatusId, IssueStatus>,
    pub trackers: Vec<Tracker>,
    /// Parents and related issues, which may sit outside the board scope
    pub linked: HashMap<ItemId, WorkItem>,
    pub parents_with_children: HashSet<ItemId>,
    pub relations: HashMap<ItemId, Vec<Relation>>,
    pub watchers: HashMap<ItemId, HashSet<UserId>>,
    pub member_roles: HashMap<(ProjectId, UserId), HashSet<RoleId>>,
    pub current_versions: HashMap<ProjectId, Option<VersionId>>,
    pub status_clause: Option<FilterClause>,
}

impl EvalContext {
    /// Prefetches everything `filters` needs to judge `candidates`
    pub async fn load<S: Store + ?Sized>(
        store: &S,
        filters: &FilterSet,
        candidates: &[WorkItem],
        acting_user: Option<UserId>,
    ) -> Result<Self> {
        let mut ctx = EvalContext {
            acting_user,
            statuses: store
                .statuses()
                .await?
                .into_iter()
                .map(|s| (s.id, s))
                .collect(),
            status_clause: filters.get(Field::Status).cloned(),
            ..Default::default()
        };
        let ids: Vec<ItemId> = candidates.iter().map(|i| i.id).collect();

        if filters.contains(Field::ParentTracker) {
            ctx.trackers = store.trackers().await?;
            let parent_ids: Vec<ItemId> = unique(candidates.iter().filter_map(|i| i.parent_id));
            ctx.remember(store.items_by_ids(&parent_ids).await?);
        }

        if filters.contains(Field::HasSubIssues) {
            ctx.parents_with_children = store.parents_with_children(&ids).await?;
        }

        if filters.any_field(|f| matches!(f, Field::Relation(_))) {
            let relations = store.relations(&ids).await?;
            let mut other_ends = Vec::new();
            for relation in relations {
                other_ends.push(relation.issue_from);
                other_ends.push(relation.issue_to);
                ctx.relations
                    .entry(relation.issue_from)
                    .or_default()
                    .push(relation.clone());
                if relation.issue_to != relation.issue_from {
                    ctx.relations
                        .entry(relation.issue_to)
                        .or_default()
                        .push(relation);
                }
            }
            ctx.remember(store.items_by_ids(&unique(other_ends.into_iter())).await?);
        }

        if filters.contains(Field::Watcher) {
            for watcher in store.watchers(&ids).await? {
                ctx.watchers
                    .entry(watcher.item_id)
                    .or_default()
                    .insert(watcher.user_id);
            }
        }

        let projects: Vec<ProjectId> = unique(candidates.iter().map(|i| i.project_id));

        if filters.contains(Field::AssignedToRole) {
            for membership in store.memberships(&projects).await? {
                ctx.member_roles
                    .entry((membership.project_id, membership.user_id))
                    .or_default()
                    .extend(membership.role_ids);
            }
        }

        let wants_current_version = filters
            .get(Field::FixedVersion)
            .map(|c| c.operands().contains(&Operand::CurrentVersion))
            .unwrap_or(false);
        if wants_current_version {
            for project_id in projects {
                let versions = store.shared_versions(project_id).await?;
                let current = current_version(&versions);
                debug!(project_id = %project_id, current = ?current, "Resolved current version");
                ctx.current_versions.insert(project_id, current);
            }
        }

        debug!(
            candidates = candidates.len(),
            linked = ctx.linked.len(),
            relations = ctx.relations.len(),
            "Filter context loaded"
        );
        Ok(ctx)
    }

    fn remember(&mut self, items: Vec<WorkItem>) {
        for item in items {
            self.linked.insert(item.id, item);
        }
    }

    fn is_closed(&self, status_id: StatusId) -> bool {
        self.statuses
            .get(&status_id)
            .map(|s| s.is_closed)
            .unwrap_or(false)
    }

    /// AND of every clause in the set
    pub fn matches_all(&self, filters: &FilterSet, item: &WorkItem) -> bool {
        filters.iter().all(|clause| clause.matches(item, self))
    }

    fn related_ids(&self, item: &WorkItem, join: Join) -> Vec<ItemId> {
        let Join::Relation(filter) = join else {
            return Vec::new();
        };
        self.relations
            .get(&item.id)
            .map(|edges| {
                edges
                    .iter()
                    .filter(|r| r.kind == filter.kind)
                    .filter_map(|r| match filter.direction {
                        Direction::Outgoing if r.issue_from == item.id => Some(r.issue_to),
                        Direction::Incoming if r.issue_to == item.id => Some(r.issue_from),
                        Direction::Either if r.issue_from == item.id => Some(r.issue_to),
                        Direction::Either if r.issue_to == item.id => Some(r.issue_from),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl FilterClause {
    /// Evaluates this clause for one issue
    pub fn matches(&self, item: &WorkItem, ctx: &EvalContext) -> bool {
        let op = self.operator();
        let operands = self.operands();
        let me = ctx.acting_user;

        match self.field() {
            Field::IssueId => {
                compare_ordered(Some(item.id.get()), op, &ids(operands, None))
            }
            Field::Subject => {
                let subject = item.subject.to_lowercase();
                let found = texts(operands)
                    .iter()
                    .any(|t| subject.contains(&t.to_lowercase()));
                match op {
                    Operator::Contains => found,
                    Operator::NotContains => !found,
                    _ => false,
                }
            }
            Field::IsPrivate => flag_matches(item.is_private, op, operands),
            Field::EstimatedHours => {
                compare_ordered(item.estimated_hours, op, &numbers(operands))
            }
            Field::StoryPoints => compare_ordered(
                item.story_points.map(f64::from),
                op,
                &numbers(operands),
            ),
            Field::CreatedOn => {
                compare_ordered(Some(item.created_at.date_naive()), op, &dates(operands))
            }
            Field::UpdatedOn => {
                compare_ordered(Some(item.updated_at.date_naive()), op, &dates(operands))
            }
            Field::Status => ctx
                .statuses
                .get(&item.status_id)
                .map(|status| status_accepts(self, status))
                .unwrap_or_else(|| {
                    reference_matches(Some(item.status_id.get()), op, &ids(operands, None))
                }),
            Field::Tracker => {
                reference_matches(Some(item.tracker_id.get()), op, &ids(operands, None))
            }
            Field::Project => {
                reference_matches(Some(item.project_id.get()), op, &ids(operands, None))
            }
            Field::AssignedTo => reference_matches(
                item.assigned_to_id.map(UserId::get),
                op,
                &ids(operands, me),
            ),
            Field::Author => {
                reference_matches(Some(item.author_id.get()), op, &ids(operands, me))
            }
            Field::FixedVersion => {
                let mut wanted = ids(operands, None);
                if operands.contains(&Operand::CurrentVersion) {
                    // No open version means the token selects nothing for this project
                    if let Some(Some(current)) = ctx.current_versions.get(&item.project_id) {
                        wanted.push(current.get());
                    }
                }
                reference_matches(item.fixed_version_id.map(VersionId::get), op, &wanted)
            }
            Field::Parent => {
                reference_matches(item.parent_id.map(ItemId::get), op, &ids(operands, None))
            }
            Field::HasSubIssues => {
                flag_matches(ctx.parents_with_children.contains(&item.id), op, operands)
            }
            Field::Watcher => {
                let wanted = ids(operands, me);
                let watched = ctx
                    .watchers
                    .get(&item.id)
                    .map(|users| users.iter().any(|u| wanted.contains(&u.get())))
                    .unwrap_or(false);
                match op {
                    Operator::Equals => watched,
                    Operator::NotEquals => !watched,
                    _ => false,
                }
            }
            Field::AssignedToRole => {
                let roles = item
                    .assigned_to_id
                    .and_then(|user| ctx.member_roles.get(&(item.project_id, user)));
                let wanted = ids(operands, None);
                let has_wanted = roles
                    .map(|r| r.iter().any(|role| wanted.contains(&role.get())))
                    .unwrap_or(false);
                let has_any = roles.map(|r| !r.is_empty()).unwrap_or(false);
                match op {
                    Operator::Equals => has_wanted,
                    Operator::NotEquals => !has_wanted,
                    Operator::Any => has_any,
                    Operator::None => !has_any,
                    _ => false,
                }
            }
            Field::ParentTracker => {
                let parent_tracker = item
                    .parent_id
                    .and_then(|id| ctx.linked.get(&id))
                    .map(|parent| parent.tracker_id);
                let matched = parent_tracker
                    .map(|tracker_id| {
                        operands.iter().any(|operand| match operand {
                            Operand::Id(id) => tracker_id.get() == *id,
                            Operand::Text(name) => ctx
                                .trackers
                                .iter()
                                .any(|t| t.id == tracker_id && t.name.eq_ignore_ascii_case(name)),
                            _ => false,
                        })
                    })
                    .unwrap_or(false);
                match op {
                    Operator::Equals => matched,
                    Operator::NotEquals => !matched,
                    _ => false,
                }
            }
            Field::Relation(filter) => {
                let others = ctx.related_ids(item, Join::Relation(filter));
                let any_open = || {
                    others.iter().any(|id| {
                        ctx.linked
                            .get(id)
                            .map(|other| !ctx.is_closed(other.status_id))
                            .unwrap_or(false)
                    })
                };
                match op {
                    Operator::Any => !others.is_empty(),
                    Operator::None => others.is_empty(),
                    Operator::Equals => {
                        let wanted = ids(operands, None);
                        others.iter().any(|id| wanted.contains(&id.get()))
                    }
                    Operator::NotEquals => {
                        let wanted = ids(operands, None);
                        !others.iter().any(|id| wanted.contains(&id.get()))
                    }
                    Operator::AnyOpen => any_open(),
                    Operator::NoneOpen => !any_open(),
                    Operator::AnySelected => others.iter().any(|id| {
                        let Some(other) = ctx.linked.get(id) else {
                            return false;
                        };
                        match (&ctx.status_clause, ctx.statuses.get(&other.status_id)) {
                            (Some(clause), Some(status)) => status_accepts(clause, status),
                            (Some(_), None) => false,
                            (None, _) => true,
                        }
                    }),
                    _ => false,
                }
            }
            Field::DayInState => false,
        }
    }
}

fn unique<T: Ord + Copy>(values: impl Iterator<Item = T>) -> Vec<T> {
    let mut values: Vec<T> = values.collect();
    values.sort();
    values.dedup();
    values
}

fn ids(operands: &[Operand], me: Option<UserId>) -> Vec<u64> {
    operands
        .iter()
        .filter_map(|operand| match operand {
            Operand::Id(id) => Some(*id),
            Operand::Me => me.map(UserId::get),
            _ => None,
        })
        .collect()
}

fn numbers(operands: &[Operand]) -> Vec<f64> {
    operands
        .iter()
        .filter_map(|operand| match operand {
            Operand::Number(n) => Some(*n),
            _ => None,
        })
        .collect()
}

fn dates(operands: &[Operand]) -> Vec<NaiveDate> {
    operands
        .iter()
        .filter_map(|operand| match operand {
            Operand::Date(d) => Some(*d),
            _ => None,
        })
        .collect()
}

fn texts(operands: &[Operand]) -> Vec<&str> {
    operands
        .iter()
        .filter_map(|operand| match operand {
            Operand::Text(t) => Some(t.as_str()),
            _ => None,
        })
        .collect()
}

fn flag_matches(value: bool, op: Operator, operands: &[Operand]) -> bool {
    let hit = operands
        .iter()
        .any(|operand| matches!(operand, Operand::Flag(flag) if *flag == value));
    match op {
        Operator::Equals => hit,
        Operator::NotEquals => !hit,
        _ => false,
    }
}

/// `!` also selects issues where the reference is unset
fn reference_matches(value: Option<u64>, op: Operator, wanted: &[u64]) -> bool {
    match op {
        Operator::Equals => value.map(|v| wanted.contains(&v)).unwrap_or(false),
        Operator::NotEquals => value.map(|v| !wanted.contains(&v)).unwrap_or(true),
        Operator::Any => value.is_some(),
        Operator::None => value.is_none(),
        _ => false,
    }
}

fn compare_ordered<T: PartialOrd + Copy>(value: Option<T>, op: Operator, bounds: &[T]) -> bool {
    match op {
        Operator::Any => return value.is_some(),
        Operator::None => return value.is_none(),
        _ => {}
    }
    let Some(value) = value else {
        return false;
    };
    match op {
        Operator::Equals => bounds.iter().any(|b| *b == value),
        Operator::NotEquals => !bounds.iter().any(|b| *b == value),
        Operator::GreaterOrEqual => bounds.first().map(|b| value >= *b).unwrap_or(false),
        Operator::LessOrEqual => bounds.first().map(|b| value <= *b).unwrap_or(false),
        Operator::Between => match bounds {
            [low, high] => value >= *low && value <= *high,
            _ => false,
        },
        _ => false,
    }
}
