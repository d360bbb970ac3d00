//! Error taxonomy of the pipeline engine.
//!
//! Handlers translate collaborator failures into [`HandlerError`] before they
//! reach the bus; the bus turns those into a [`FailureReason`] on the session;
//! the outward surface reports [`PipelineError`].

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use super::models::message::{CommandKind, SessionId};
use super::models::stage::Stage;

/// Handler wiring problems, detected while the registry is built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("Duplicate handler registered for command {0}")]
    DuplicateCommandHandler(CommandKind),

    #[error("No handler registered for command {0}")]
    MissingCommandHandler(CommandKind),
}

/// Outcome of a failed handler invocation, as seen by the bus.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Guardrail verdict. Expected and terminal.
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Transient collaborator failure; the bus may retry the same command.
    #[error("Retryable collaborator failure: {0}")]
    Retryable(String),

    /// The stage exceeded its time budget. Retried like a transient failure.
    #[error("Stage timed out after {}ms", .0.as_millis())]
    TimedOut(Duration),

    /// Unrecoverable failure.
    #[error("Fatal: {0}")]
    Fatal(String),
}

impl HandlerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_) | Self::TimedOut(_))
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }
}

/// Why a session ended in `Failed`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    #[error("{stage} failed: {message}")]
    Fatal { stage: Stage, message: String },

    #[error("{stage} failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        stage: Stage,
        attempts: u32,
        last_error: String,
    },

    #[error("Cancelled at {stage}")]
    Cancelled { stage: Stage },

    #[error("Pipeline stalled: {stage} produced neither a follow-up command nor an answer")]
    Stalled { stage: Stage },

    #[error("Illegal stage transition: {from} -> {to}")]
    IllegalTransition { from: Stage, to: Stage },
}

impl FailureReason {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Errors surfaced to the transport layer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Invalid question: {0}")]
    InvalidQuestion(String),

    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("Session already exists: {0}")]
    SessionAlreadyExists(SessionId),

    #[error("Session {0} already has a subscriber")]
    AlreadySubscribed(SessionId),

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Pipeline failed: {0}")]
    Failed(FailureReason),
}

pub type PipelineResult<T> = Result<T, PipelineError>;
