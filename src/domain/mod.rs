pub mod board;
pub mod evaluate;
pub mod filter;
pub mod grouping;
pub mod item;
pub mod query;
pub mod settings;
pub mod sorting;
pub mod transition;

pub use board::{Board, BoardAssembler, Card, Column, EstimateDisplay, Swimlane};
pub use evaluate::{current_version, EvalContext};
pub use filter::{Field, FieldKind, FilterClause, FilterParam, FilterSet, Operand, Operator};
pub use grouping::{CardField, GroupBy, GroupKey};
pub use item::{
    IssueStatus, ItemId, Project, ProjectId, StatusId, TrackerId, UserId, Version, VersionId,
    WorkItem,
};
pub use query::{plan, resolve_scope, BoardQuery, BoardRequest, QueryPlan};
pub use settings::{BoardSettings, EstimateUnits, SettingsProvider, StaticSettings};
pub use sorting::{sort_by_position, PositionIndex, PositionMap};
pub use transition::{FieldChanges, MoveRequest, TransitionProcessor, UpdatedColumns};
