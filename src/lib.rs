//! # Agile Board Core
//!
//! Query engine and column-transition logic for kanban boards laid over an
//! issue tracker.
//!
//! This crate computes what a board contains (filtered issues bucketed into
//! status columns, with ranks, caps and estimate totals) and how a
//! drag-and-drop move mutates issues, without depending on a particular issue
//! store, permission system or renderer. Those are reached through the
//! [`Store`], [`Authorizer`] and [`SettingsProvider`] traits.

pub mod domain;
pub mod error;
pub mod service;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_helpers;

// Re-export commonly used types
pub use domain::{
    board::{Board, Card, Column},
    filter::{FilterClause, FilterSet},
    item::{ItemId, ProjectId, StatusId, UserId, WorkItem},
    query::{BoardQuery, BoardRequest},
    settings::{BoardSettings, SettingsProvider, StaticSettings},
    sorting::PositionMap,
    transition::{FieldChanges, MoveRequest, UpdatedColumns},
};
pub use error::{BoardError, Result};
pub use service::BoardService;
pub use storage::{Authorizer, InMemoryStore, Store};
