//! Session: the correlation context of one question-answering run.
//!
//! A session records every message the bus dequeued, in dequeue order, and
//! tracks the current pipeline stage. Status changes go through the stage
//! state machine, so exactly one terminal status is ever reached.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::message::{Message, MessageId, MessageKind, SessionId};
use super::stage::{IllegalTransition, Stage};
use crate::domain::errors::FailureReason;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Rejected,
    Completed,
    Failed,
}

impl SessionStatus {
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Rejected => write!(f, "rejected"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One dequeued message in the session trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailEntry {
    /// Position in dequeue order, starting at 0.
    pub position: usize,
    pub message_id: MessageId,
    pub kind: MessageKind,
    /// Stage driven by this message, for commands.
    pub stage: Option<Stage>,
    pub dequeued_at: DateTime<Utc>,
    /// Handler attempts made for this message (commands only).
    pub attempts: u32,
    /// Last error reported while handling this message.
    pub error: Option<String>,
    pub message: Message,
}

impl TrailEntry {
    /// True for commands that drive one of the seven processing stages.
    pub fn is_stage(&self) -> bool {
        self.stage.is_some_and(Stage::is_processing)
    }
}

/// What the outward transport sees for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SessionOutcome {
    Pending,
    Answered { answer: String },
    Rejected { reason: String },
    Failed { reason: FailureReason },
}

/// Correlation context for one end-to-end run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub question: String,
    pub status: SessionStatus,
    pub stage: Stage,
    trail: Vec<TrailEntry>,
    pub result: Option<String>,
    pub rejection: Option<String>,
    pub failure: Option<FailureReason>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Session {
    pub fn new(id: SessionId, question: impl Into<String>) -> Self {
        Self {
            id,
            question: question.into(),
            status: SessionStatus::Running,
            stage: Stage::initial(),
            trail: Vec::new(),
            result: None,
            rejection: None,
            failure: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Append a dequeued message to the trail and return its position.
    pub fn record(&mut self, message: &Message) -> usize {
        let position = self.trail.len();
        let stage = match message {
            Message::Command(c) => Some(c.kind().stage()),
            Message::Event(_) => None,
        };
        self.trail.push(TrailEntry {
            position,
            message_id: message.meta().id(),
            kind: message.kind(),
            stage,
            dequeued_at: Utc::now(),
            attempts: 0,
            error: None,
            message: message.clone(),
        });
        position
    }

    pub fn note_attempt(&mut self, position: usize) {
        if let Some(entry) = self.trail.get_mut(position) {
            entry.attempts += 1;
        }
    }

    pub fn note_error(&mut self, position: usize, error: impl Into<String>) {
        if let Some(entry) = self.trail.get_mut(position) {
            entry.error = Some(error.into());
        }
    }

    /// Every dequeued message, commands and events, in dequeue order.
    pub fn trail(&self) -> &[TrailEntry] {
        &self.trail
    }

    /// Dequeued stage commands, in dequeue order.
    pub fn history(&self) -> Vec<&TrailEntry> {
        self.trail.iter().filter(|e| e.is_stage()).collect()
    }

    /// Stages visited, in order.
    pub fn stages(&self) -> Vec<Stage> {
        self.history().iter().filter_map(|e| e.stage).collect()
    }

    /// Move to the next non-terminal stage.
    pub fn advance(&mut self, to: Stage) -> Result<(), IllegalTransition> {
        if to.is_terminal() {
            return Err(IllegalTransition {
                from: self.stage,
                to,
            });
        }
        self.stage = self.stage.transition(to)?;
        Ok(())
    }

    pub fn complete(&mut self, answer: impl Into<String>) -> Result<(), IllegalTransition> {
        self.stage = self.stage.transition(Stage::Completed)?;
        self.status = SessionStatus::Completed;
        self.result = Some(answer.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    pub fn reject(&mut self, reason: impl Into<String>) -> Result<(), IllegalTransition> {
        self.stage = self.stage.transition(Stage::Rejected)?;
        self.status = SessionStatus::Rejected;
        self.rejection = Some(reason.into());
        self.finished_at = Some(Utc::now());
        Ok(())
    }

    /// Terminate as `Failed`. A session that already ended keeps its status.
    pub fn fail(&mut self, reason: FailureReason) -> bool {
        if self.stage.transition(Stage::Failed).is_err() {
            return false;
        }
        self.stage = Stage::Failed;
        self.status = SessionStatus::Failed;
        self.failure = Some(reason);
        self.result = None;
        self.finished_at = Some(Utc::now());
        true
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn outcome(&self) -> SessionOutcome {
        match self.status {
            SessionStatus::Running => SessionOutcome::Pending,
            SessionStatus::Completed => SessionOutcome::Answered {
                answer: self.result.clone().unwrap_or_default(),
            },
            SessionStatus::Rejected => SessionOutcome::Rejected {
                reason: self.rejection.clone().unwrap_or_default(),
            },
            SessionStatus::Failed => SessionOutcome::Failed {
                reason: self.failure.clone().unwrap_or(FailureReason::Fatal {
                    stage: self.stage,
                    message: "unknown".to_string(),
                }),
            },
        }
    }
}
