use crate::domain::item::{ItemId, ProjectId, UserId};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BoardError>;

#[derive(Debug, Error)]
pub enum BoardError {
    #[error("Invalid filter on '{field}' with operator '{operator}': {reason}")]
    InvalidFilter {
        field: String,
        operator: String,
        reason: String,
    },

    #[error("Invalid transition for issue #{item_id}: {reason}")]
    InvalidTransition { item_id: ItemId, reason: String },

    #[error("User {user_id} is not allowed to edit issue #{item_id}")]
    Forbidden { user_id: UserId, item_id: ItemId },

    #[error("Issue not found: #{0}")]
    NotFound(ItemId),

    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("Store unavailable while {context}")]
    Transient {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl BoardError {
    pub(crate) fn invalid_filter(
        field: impl Into<String>,
        operator: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidFilter {
            field: field.into(),
            operator: operator.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_transition(item_id: ItemId, reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            item_id,
            reason: reason.into(),
        }
    }

    /// Only store outages may be retried by the caller; every other error is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}
