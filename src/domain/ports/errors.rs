use std::time::Duration;
use thiserror::Error;

use crate::domain::errors::HandlerError;

/// Failure reported by an external collaborator.
///
/// Stage handlers translate these into [`HandlerError`]; the bus never sees
/// collaborator errors directly.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollaboratorError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Collaborator timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unexpected response: {0}")]
    Protocol(String),

    #[error("Tool {tool} failed: {reason}")]
    ToolFailed { tool: String, reason: String },
}

impl CollaboratorError {
    /// Transient failures are worth retrying with the same input.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Timeout(_) | Self::Transport(_)
        )
    }
}

impl From<CollaboratorError> for HandlerError {
    fn from(err: CollaboratorError) -> Self {
        if err.is_transient() {
            Self::Retryable(err.to_string())
        } else {
            Self::Fatal(err.to_string())
        }
    }
}
