//! Filter registry and clause construction.
//!
//! Every filterable field belongs to a [`FieldKind`] that fixes its legal
//! operators and how operand strings are parsed, so a [`FilterClause`] that
//! exists is always well formed. Evaluation lives in [`crate::domain::evaluate`].

use crate::domain::item::RelationKind;
use crate::error::{BoardError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Comparison applied by a clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    Open,
    Closed,
    Any,
    None,
    GreaterOrEqual,
    LessOrEqual,
    Between,
    Contains,
    NotContains,
    AnyOpen,
    NoneOpen,
    /// Related to an issue that passes the query's status clause
    AnySelected,
}

impl Operator {
    pub fn token(&self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::NotEquals => "!",
            Self::Open => "o",
            Self::Closed => "c",
            Self::Any => "*",
            Self::None => "!*",
            Self::GreaterOrEqual => ">=",
            Self::LessOrEqual => "<=",
            Self::Between => "><",
            Self::Contains => "~",
            Self::NotContains => "!~",
            Self::AnyOpen => "*o",
            Self::NoneOpen => "!o",
            Self::AnySelected => "*s",
        }
    }

    /// Number of operands the operator consumes; `None` means one or more
    fn arity(&self) -> Option<usize> {
        match self {
            Self::Equals | Self::NotEquals | Self::Contains | Self::NotContains => None,
            Self::GreaterOrEqual | Self::LessOrEqual => Some(1),
            Self::Between => Some(2),
            Self::Open
            | Self::Closed
            | Self::Any
            | Self::None
            | Self::AnyOpen
            | Self::NoneOpen
            | Self::AnySelected => Some(0),
        }
    }
}

impl FromStr for Operator {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "=" => Ok(Self::Equals),
            "!" => Ok(Self::NotEquals),
            "o" => Ok(Self::Open),
            "c" => Ok(Self::Closed),
            "*" => Ok(Self::Any),
            "!*" => Ok(Self::None),
            ">=" => Ok(Self::GreaterOrEqual),
            "<=" => Ok(Self::LessOrEqual),
            "><" => Ok(Self::Between),
            "~" => Ok(Self::Contains),
            "!~" => Ok(Self::NotContains),
            "*o" => Ok(Self::AnyOpen),
            "!o" => Ok(Self::NoneOpen),
            "*s" => Ok(Self::AnySelected),
            other => Err(BoardError::invalid_filter("", other, "unknown operator")),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Integer,
    Decimal,
    Boolean,
    Text,
    Date,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    Status,
    Tracker,
    Project,
    User,
    Version,
    Issue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Join {
    Watcher,
    AssigneeRole,
    ParentTracker,
    Relation(RelationFilter),
}

/// Storage kind of a field; decides operators and operand parsing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    NativeScalar(ScalarType),
    NativeReference(Reference),
    DerivedBoolean,
    DerivedJoin(Join),
    DerivedDuration,
}

impl FieldKind {
    pub fn operators(&self) -> &'static [Operator] {
        use Operator::*;
        match self {
            Self::NativeScalar(ScalarType::Integer) => {
                &[Equals, NotEquals, GreaterOrEqual, LessOrEqual, Between]
            }
            Self::NativeScalar(ScalarType::Decimal) => {
                &[Equals, GreaterOrEqual, LessOrEqual, Between, Any, None]
            }
            Self::NativeScalar(ScalarType::Boolean) => &[Equals, NotEquals],
            Self::NativeScalar(ScalarType::Text) => &[Contains, NotContains],
            Self::NativeScalar(ScalarType::Date) => {
                &[Equals, GreaterOrEqual, LessOrEqual, Between]
            }
            Self::NativeReference(Reference::Status) => &[Open, Closed, Any, Equals, NotEquals],
            Self::NativeReference(Reference::Tracker | Reference::Project) => {
                &[Equals, NotEquals]
            }
            Self::NativeReference(Reference::User | Reference::Version | Reference::Issue) => {
                &[Equals, NotEquals, Any, None]
            }
            Self::DerivedBoolean => &[Equals, NotEquals],
            Self::DerivedJoin(Join::Watcher | Join::ParentTracker) => &[Equals, NotEquals],
            Self::DerivedJoin(Join::AssigneeRole) => &[Equals, NotEquals, Any, None],
            Self::DerivedJoin(Join::Relation(_)) => {
                &[Any, None, Equals, NotEquals, AnyOpen, NoneOpen, AnySelected]
            }
            // Time in state only feeds grouping and card display
            Self::DerivedDuration => &[],
        }
    }

    fn parse_operand(&self, raw: &str) -> std::result::Result<Operand, String> {
        let raw = raw.trim();
        match self {
            Self::NativeScalar(ScalarType::Integer)
            | Self::NativeReference(
                Reference::Status | Reference::Tracker | Reference::Project | Reference::Issue,
            )
            | Self::DerivedJoin(Join::AssigneeRole | Join::Relation(_)) => parse_id(raw),
            Self::NativeScalar(ScalarType::Decimal) => raw
                .parse::<f64>()
                .map(Operand::Number)
                .map_err(|_| format!("'{}' is not a number", raw)),
            Self::NativeScalar(ScalarType::Boolean) => match raw {
                "1" | "true" => Ok(Operand::Flag(true)),
                "0" | "false" => Ok(Operand::Flag(false)),
                _ => Err(format!("'{}' is not a boolean", raw)),
            },
            Self::NativeScalar(ScalarType::Text) => Ok(Operand::Text(raw.to_string())),
            Self::NativeScalar(ScalarType::Date) => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map(Operand::Date)
                .map_err(|_| format!("'{}' is not a YYYY-MM-DD date", raw)),
            Self::NativeReference(Reference::User) | Self::DerivedJoin(Join::Watcher) => {
                match raw {
                    "me" => Ok(Operand::Me),
                    _ => parse_id(raw),
                }
            }
            Self::NativeReference(Reference::Version) => match raw {
                "current_version" => Ok(Operand::CurrentVersion),
                _ => parse_id(raw),
            },
            Self::DerivedBoolean => match raw {
                "yes" | "1" => Ok(Operand::Flag(true)),
                "no" | "0" => Ok(Operand::Flag(false)),
                _ => Err(format!("'{}' is not yes/no", raw)),
            },
            Self::DerivedJoin(Join::ParentTracker) => match raw.parse::<u64>() {
                Ok(id) => Ok(Operand::Id(id)),
                Err(_) => Ok(Operand::Text(raw.to_string())),
            },
            Self::DerivedDuration => Err("field is not filterable".to_string()),
        }
    }

    /// Whether one raw value may hold a comma separated list
    fn splits_lists(&self) -> bool {
        matches!(
            self,
            Self::NativeScalar(ScalarType::Integer)
                | Self::NativeReference(Reference::Issue)
                | Self::DerivedJoin(Join::Relation(_))
        )
    }
}

fn parse_id(raw: &str) -> std::result::Result<Operand, String> {
    raw.trim_start_matches('#')
        .parse::<u64>()
        .map(Operand::Id)
        .map_err(|_| format!("'{}' is not an id", raw))
}

/// Which end of a relation edge the filtered issue sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outgoing,
    Incoming,
    Either,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationFilter {
    pub kind: RelationKind,
    pub direction: Direction,
}

const RELATION_FIELDS: [(&str, RelationKind, Direction); 9] = [
    ("relates", RelationKind::Relates, Direction::Either),
    ("blocks", RelationKind::Blocks, Direction::Outgoing),
    ("blocked", RelationKind::Blocks, Direction::Incoming),
    ("precedes", RelationKind::Precedes, Direction::Outgoing),
    ("follows", RelationKind::Precedes, Direction::Incoming),
    ("duplicates", RelationKind::Duplicates, Direction::Outgoing),
    ("duplicated", RelationKind::Duplicates, Direction::Incoming),
    ("copied_to", RelationKind::CopiedTo, Direction::Outgoing),
    ("copied_from", RelationKind::CopiedTo, Direction::Incoming),
];

/// Filterable fields known to the board
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    IssueId,
    Subject,
    IsPrivate,
    EstimatedHours,
    StoryPoints,
    CreatedOn,
    UpdatedOn,
    Status,
    Tracker,
    Project,
    AssignedTo,
    Author,
    FixedVersion,
    Parent,
    HasSubIssues,
    Watcher,
    AssignedToRole,
    ParentTracker,
    Relation(RelationFilter),
    DayInState,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Self::IssueId => "issue_id",
            Self::Subject => "subject",
            Self::IsPrivate => "is_private",
            Self::EstimatedHours => "estimated_hours",
            Self::StoryPoints => "story_points",
            Self::CreatedOn => "created_on",
            Self::UpdatedOn => "updated_on",
            Self::Status => "status_id",
            Self::Tracker => "tracker_id",
            Self::Project => "project_id",
            Self::AssignedTo => "assigned_to_id",
            Self::Author => "author_id",
            Self::FixedVersion => "fixed_version_id",
            Self::Parent => "parent_issue_id",
            Self::HasSubIssues => "has_sub_issues",
            Self::Watcher => "watcher_id",
            Self::AssignedToRole => "assigned_to_role",
            Self::ParentTracker => "parent_issue_tracker_id",
            Self::Relation(filter) => RELATION_FIELDS
                .iter()
                .find(|(_, kind, direction)| {
                    *kind == filter.kind && *direction == filter.direction
                })
                .map(|(name, _, _)| *name)
                .unwrap_or("relates"),
            Self::DayInState => "day_in_state",
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Self::IssueId => FieldKind::NativeScalar(ScalarType::Integer),
            Self::Subject => FieldKind::NativeScalar(ScalarType::Text),
            Self::IsPrivate => FieldKind::NativeScalar(ScalarType::Boolean),
            Self::EstimatedHours | Self::StoryPoints => {
                FieldKind::NativeScalar(ScalarType::Decimal)
            }
            Self::CreatedOn | Self::UpdatedOn => FieldKind::NativeScalar(ScalarType::Date),
            Self::Status => FieldKind::NativeReference(Reference::Status),
            Self::Tracker => FieldKind::NativeReference(Reference::Tracker),
            Self::Project => FieldKind::NativeReference(Reference::Project),
            Self::AssignedTo | Self::Author => FieldKind::NativeReference(Reference::User),
            Self::FixedVersion => FieldKind::NativeReference(Reference::Version),
            Self::Parent => FieldKind::NativeReference(Reference::Issue),
            Self::HasSubIssues => FieldKind::DerivedBoolean,
            Self::Watcher => FieldKind::DerivedJoin(Join::Watcher),
            Self::AssignedToRole => FieldKind::DerivedJoin(Join::AssigneeRole),
            Self::ParentTracker => FieldKind::DerivedJoin(Join::ParentTracker),
            Self::Relation(filter) => FieldKind::DerivedJoin(Join::Relation(*filter)),
            Self::DayInState => FieldKind::DerivedDuration,
        }
    }
}

impl FromStr for Field {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self> {
        let field = match s.trim() {
            "issue_id" => Self::IssueId,
            "subject" => Self::Subject,
            "is_private" => Self::IsPrivate,
            "estimated_hours" => Self::EstimatedHours,
            "story_points" => Self::StoryPoints,
            "created_on" => Self::CreatedOn,
            "updated_on" => Self::UpdatedOn,
            "status_id" => Self::Status,
            "tracker_id" => Self::Tracker,
            "project_id" => Self::Project,
            "assigned_to_id" => Self::AssignedTo,
            "author_id" => Self::Author,
            "fixed_version_id" => Self::FixedVersion,
            "parent_issue_id" => Self::Parent,
            "has_sub_issues" => Self::HasSubIssues,
            "watcher_id" => Self::Watcher,
            "assigned_to_role" => Self::AssignedToRole,
            "parent_issue_tracker_id" => Self::ParentTracker,
            "day_in_state" => Self::DayInState,
            other => {
                return RELATION_FIELDS
                    .iter()
                    .find(|(name, _, _)| *name == other)
                    .map(|(_, kind, direction)| {
                        Self::Relation(RelationFilter {
                            kind: *kind,
                            direction: *direction,
                        })
                    })
                    .ok_or_else(|| BoardError::invalid_filter(other, "", "unknown field"));
            }
        };
        Ok(field)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Parsed operand value
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Id(u64),
    Number(f64),
    Flag(bool),
    Text(String),
    Date(NaiveDate),
    /// The acting user
    Me,
    /// The nearest open shared version of the issue's project
    CurrentVersion,
}

/// One validated `field operator values` condition
#[derive(Debug, Clone, PartialEq)]
pub struct FilterClause {
    field: Field,
    operator: Operator,
    operands: Vec<Operand>,
}

impl FilterClause {
    pub fn new(field: Field, operator: Operator, values: &[String]) -> Result<Self> {
        let kind = field.kind();
        let reject = |reason: String| {
            BoardError::invalid_filter(field.name(), operator.token(), reason)
        };

        if !kind.operators().contains(&operator) {
            return Err(reject("operator not supported for this field".to_string()));
        }

        let raw_values: Vec<&str> = values
            .iter()
            .flat_map(|value| {
                if kind.splits_lists() {
                    value.split(',').collect::<Vec<_>>()
                } else {
                    vec![value.as_str()]
                }
            })
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .collect();

        let operands = match operator.arity() {
            Some(0) => Vec::new(),
            Some(expected) if raw_values.len() != expected => {
                return Err(reject(format!(
                    "expected {} value(s), got {}",
                    expected,
                    raw_values.len()
                )));
            }
            None if raw_values.is_empty() => {
                return Err(reject("at least one value is required".to_string()));
            }
            _ => raw_values
                .iter()
                .map(|raw| kind.parse_operand(raw))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(reject)?,
        };

        Ok(Self {
            field,
            operator,
            operands,
        })
    }

    /// Builds a clause from raw request strings
    pub fn parse(field: &str, operator: &str, values: &[String]) -> Result<Self> {
        let field: Field = field.parse()?;
        let operator: Operator = operator.parse().map_err(|_| {
            BoardError::invalid_filter(field.name(), operator, "unknown operator")
        })?;
        Self::new(field, operator, values)
    }

    pub fn field(&self) -> Field {
        self.field
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn operands(&self) -> &[Operand] {
        &self.operands
    }

    pub fn open_statuses() -> Self {
        Self {
            field: Field::Status,
            operator: Operator::Open,
            operands: Vec::new(),
        }
    }
}

/// Raw filter triple as sent by a client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterParam {
    pub field: String,
    #[serde(rename = "op")]
    pub operator: String,
    #[serde(default, rename = "v")]
    pub values: Vec<String>,
}

/// Clauses keyed by field name; a later clause on the same field replaces the earlier one
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    clauses: Vec<FilterClause>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_params(params: &[FilterParam]) -> Result<Self> {
        let mut set = Self::new();
        for param in params.iter().filter(|p| !p.field.trim().is_empty()) {
            set.insert(FilterClause::parse(
                &param.field,
                &param.operator,
                &param.values,
            )?);
        }
        Ok(set)
    }

    pub fn insert(&mut self, clause: FilterClause) {
        match self
            .clauses
            .iter_mut()
            .find(|existing| existing.field == clause.field)
        {
            Some(existing) => *existing = clause,
            None => self.clauses.push(clause),
        }
    }

    pub fn get(&self, field: Field) -> Option<&FilterClause> {
        self.clauses.iter().find(|clause| clause.field == field)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.get(field).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &FilterClause> {
        self.clauses.iter()
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub(crate) fn any_field(&self, predicate: impl Fn(Field) -> bool) -> bool {
        self.clauses.iter().any(|clause| predicate(clause.field))
    }
}
