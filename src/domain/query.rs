//! Query assembly: scope resolution, default status injection and the
//! pre-seeded column set.
//!
//! A [`BoardQuery`] is an explicit value built per request; nothing here keeps
//! state between calls.

use crate::domain::evaluate::status_accepts;
use crate::domain::filter::{Field, FilterClause, FilterParam, FilterSet, Operator};
use crate::domain::grouping::{CardField, GroupBy};
use crate::domain::item::{IssueStatus, Project, ProjectId, ProjectTree, StatusId, UserId};
use crate::error::{BoardError, Result};
use crate::storage::{ItemQuery, Store};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// What a board shows: scope, filters, row grouping and card details
#[derive(Debug, Clone, PartialEq)]
pub struct BoardQuery {
    /// `None` spans every project with the board enabled
    pub project_id: Option<ProjectId>,
    pub filters: FilterSet,
    pub group_by: GroupBy,
    pub card_fields: Vec<CardField>,
}

impl Default for BoardQuery {
    fn default() -> Self {
        Self {
            project_id: None,
            filters: FilterSet::new(),
            group_by: GroupBy::None,
            card_fields: CardField::DEFAULT.to_vec(),
        }
    }
}

impl BoardQuery {
    pub fn for_project(project_id: ProjectId) -> Self {
        Self {
            project_id: Some(project_id),
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, clause: FilterClause) -> Self {
        self.filters.insert(clause);
        self
    }

    pub fn with_group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = group_by;
        self
    }

    pub fn with_card_fields(mut self, card_fields: Vec<CardField>) -> Self {
        self.card_fields = card_fields;
        self
    }

    pub fn shows(&self, field: CardField) -> bool {
        self.card_fields.contains(&field)
    }
}

/// Board query as sent by a client
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardRequest {
    pub project_id: Option<ProjectId>,
    pub filters: Vec<FilterParam>,
    pub group_by: String,
    /// `None` keeps the default card fields
    pub fields: Option<Vec<String>>,
}

impl BoardRequest {
    pub fn to_query(&self) -> Result<BoardQuery> {
        let card_fields = match &self.fields {
            Some(names) => names
                .iter()
                .filter(|name| !name.trim().is_empty())
                .map(|name| name.parse())
                .collect::<Result<Vec<CardField>>>()?,
            None => CardField::DEFAULT.to_vec(),
        };

        Ok(BoardQuery {
            project_id: self.project_id,
            filters: FilterSet::from_params(&self.filters)?,
            group_by: self.group_by.parse()?,
            card_fields,
        })
    }
}

/// Everything the board assembler needs to run a query
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub scope: Vec<ProjectId>,
    /// Request filters plus the default status clause when none was given
    pub filters: FilterSet,
    pub group_by: GroupBy,
    pub card_fields: Vec<CardField>,
    /// Selection pushed down to the store
    pub item_query: ItemQuery,
    /// Statuses that get a column even when empty, in workflow order
    pub column_statuses: Vec<IssueStatus>,
    pub acting_user: Option<UserId>,
}

impl QueryPlan {
    pub fn shows(&self, field: CardField) -> bool {
        self.card_fields.contains(&field)
    }
}

/// The project plus its board-enabled descendants, or every board-enabled project
pub fn resolve_scope(projects: &[Project], project_id: Option<ProjectId>) -> Result<Vec<ProjectId>> {
    let tree = ProjectTree::new(projects);
    match project_id {
        Some(id) => {
            tree.get(id).ok_or(BoardError::ProjectNotFound(id))?;
            let mut scope = vec![id];
            scope.extend(
                tree.descendants(id)
                    .into_iter()
                    .filter(|child| tree.get(*child).map(|p| p.board_enabled).unwrap_or(false)),
            );
            Ok(scope)
        }
        None => {
            let mut scope: Vec<ProjectId> = projects
                .iter()
                .filter(|p| p.board_enabled)
                .map(|p| p.id)
                .collect();
            scope.sort();
            Ok(scope)
        }
    }
}

/// Resolves a query into a retrieval plan
pub async fn plan<S: Store + ?Sized>(
    store: &S,
    query: &BoardQuery,
    acting_user: Option<UserId>,
) -> Result<QueryPlan> {
    let projects = store.projects().await?;
    let scope = resolve_scope(&projects, query.project_id)?;

    let mut filters = query.filters.clone();
    let status_clause = match filters.get(Field::Status) {
        Some(clause) => clause.clone(),
        None => {
            let open = FilterClause::open_statuses();
            filters.insert(open.clone());
            open
        }
    };

    let status_ids: Option<Vec<StatusId>> = match status_clause.operator() {
        Operator::Any => None,
        _ => Some(
            store
                .statuses()
                .await?
                .iter()
                .filter(|s| status_accepts(&status_clause, s))
                .map(|s| s.id)
                .collect(),
        ),
    };

    let column_statuses: Vec<IssueStatus> = store
        .workflow_statuses(&scope)
        .await?
        .into_iter()
        .filter(|s| status_accepts(&status_clause, s))
        .collect();

    debug!(
        project_id = ?query.project_id,
        scope = scope.len(),
        clauses = filters.len(),
        columns = column_statuses.len(),
        "Query planned"
    );

    Ok(QueryPlan {
        item_query: ItemQuery {
            project_ids: scope.clone(),
            status_ids,
        },
        scope,
        filters,
        group_by: query.group_by,
        card_fields: query.card_fields.clone(),
        column_statuses,
        acting_user,
    })
}
