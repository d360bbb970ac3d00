//! Commands, events and the envelope metadata they share.
//!
//! A [`Command`] is an intent to do work and is consumed by exactly one
//! handler. An [`Event`] records something that happened and fans out to any
//! number of listeners. Both carry a [`MessageMeta`] whose correlation id ties
//! the message to its session for the whole of its life.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

use super::context::{GenerationContext, RetrievalParams, ScoredDocument, ToolDescriptor, ToolResult};
use super::stage::Stage;

static MESSAGE_SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Identifier of a session; also the correlation id of its messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unique identifier of a single message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata shared by every message.
///
/// `sequence` is process-wide and strictly increasing, so it breaks ties
/// between messages created within the same clock tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageMeta {
    id: MessageId,
    correlation_id: SessionId,
    created_at: DateTime<Utc>,
    sequence: u64,
}

impl MessageMeta {
    fn new(correlation_id: SessionId) -> Self {
        Self {
            id: MessageId::new(),
            correlation_id,
            created_at: Utc::now(),
            sequence: MESSAGE_SEQUENCE.fetch_add(1, Ordering::SeqCst),
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn correlation_id(&self) -> &SessionId {
        &self.correlation_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Closed set of command types; the handler registry is indexed by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    Question,
    Check,
    Retrieve,
    Rerank,
    Enhance,
    UseTools,
    GenerateResponse,
    FinalCheck,
}

impl CommandKind {
    pub const COUNT: usize = 8;

    pub const ALL: [Self; Self::COUNT] = [
        Self::Question,
        Self::Check,
        Self::Retrieve,
        Self::Rerank,
        Self::Enhance,
        Self::UseTools,
        Self::GenerateResponse,
        Self::FinalCheck,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// The pipeline stage a command of this kind drives.
    pub const fn stage(self) -> Stage {
        match self {
            Self::Question => Stage::Question,
            Self::Check => Stage::Checking,
            Self::Retrieve => Stage::Retrieving,
            Self::Rerank => Stage::Reranking,
            Self::Enhance => Stage::Enhancing,
            Self::UseTools => Stage::UsingTools,
            Self::GenerateResponse => Stage::Generating,
            Self::FinalCheck => Stage::FinalChecking,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Question => "Question",
            Self::Check => "Check",
            Self::Retrieve => "Retrieve",
            Self::Rerank => "Rerank",
            Self::Enhance => "Enhance",
            Self::UseTools => "UseTools",
            Self::GenerateResponse => "GenerateResponse",
            Self::FinalCheck => "FinalCheck",
        }
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage-specific command data. Each variant carries what its stage needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum CommandPayload {
    Question {
        text: String,
    },
    Check {
        question: String,
    },
    Retrieve {
        question: String,
        params: RetrievalParams,
    },
    Rerank {
        question: String,
        documents: Vec<ScoredDocument>,
    },
    Enhance {
        question: String,
        documents: Vec<ScoredDocument>,
    },
    UseTools {
        question: String,
        refined_question: String,
        documents: Vec<ScoredDocument>,
        catalog: Vec<ToolDescriptor>,
    },
    GenerateResponse {
        question: String,
        refined_question: String,
        context: GenerationContext,
    },
    FinalCheck {
        question: String,
        answer: String,
    },
}

impl CommandPayload {
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::Question { .. } => CommandKind::Question,
            Self::Check { .. } => CommandKind::Check,
            Self::Retrieve { .. } => CommandKind::Retrieve,
            Self::Rerank { .. } => CommandKind::Rerank,
            Self::Enhance { .. } => CommandKind::Enhance,
            Self::UseTools { .. } => CommandKind::UseTools,
            Self::GenerateResponse { .. } => CommandKind::GenerateResponse,
            Self::FinalCheck { .. } => CommandKind::FinalCheck,
        }
    }

    /// The user's original question, present on every stage.
    pub fn question(&self) -> &str {
        match self {
            Self::Question { text } => text,
            Self::Check { question }
            | Self::Retrieve { question, .. }
            | Self::Rerank { question, .. }
            | Self::Enhance { question, .. }
            | Self::UseTools { question, .. }
            | Self::GenerateResponse { question, .. }
            | Self::FinalCheck { question, .. } => question,
        }
    }
}

/// An intent to do work, consumed by exactly one handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    meta: MessageMeta,
    payload: CommandPayload,
}

impl Command {
    pub fn new(session_id: SessionId, payload: CommandPayload) -> Self {
        Self {
            meta: MessageMeta::new(session_id),
            payload,
        }
    }

    /// Seed command for a new session.
    pub fn question(session_id: SessionId, text: impl Into<String>) -> Self {
        Self::new(session_id, CommandPayload::Question { text: text.into() })
    }

    /// Build the next command of the same session.
    pub fn follow_up(&self, payload: CommandPayload) -> Self {
        Self::new(self.meta.correlation_id.clone(), payload)
    }

    /// Build an event of the same session.
    pub fn event(&self, payload: EventPayload) -> Event {
        Event::new(self.meta.correlation_id.clone(), payload)
    }

    pub fn meta(&self) -> &MessageMeta {
        &self.meta
    }

    pub fn payload(&self) -> &CommandPayload {
        &self.payload
    }

    pub fn kind(&self) -> CommandKind {
        self.payload.kind()
    }

    pub fn correlation_id(&self) -> &SessionId {
        self.meta.correlation_id()
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Closed set of event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StatusUpdate,
    StageCompleted,
    ToolInvoked,
    Evaluation,
    RetryScheduled,
    RequestRejected,
    AnswerRejected,
    ResponseReady,
    RequestFailed,
    EndOfStream,
}

impl EventKind {
    pub const COUNT: usize = 10;

    pub const ALL: [Self; Self::COUNT] = [
        Self::StatusUpdate,
        Self::StageCompleted,
        Self::ToolInvoked,
        Self::Evaluation,
        Self::RetryScheduled,
        Self::RequestRejected,
        Self::AnswerRejected,
        Self::ResponseReady,
        Self::RequestFailed,
        Self::EndOfStream,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    /// Terminal events close a session's notification stream.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::RequestRejected | Self::AnswerRejected | Self::ResponseReady | Self::RequestFailed
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StatusUpdate => "StatusUpdate",
            Self::StageCompleted => "StageCompleted",
            Self::ToolInvoked => "ToolInvoked",
            Self::Evaluation => "Evaluation",
            Self::RetryScheduled => "RetryScheduled",
            Self::RequestRejected => "RequestRejected",
            Self::AnswerRejected => "AnswerRejected",
            Self::ResponseReady => "ResponseReady",
            Self::RequestFailed => "RequestFailed",
            Self::EndOfStream => "EndOfStream",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum EventPayload {
    StatusUpdate {
        stage: Stage,
    },
    StageCompleted {
        stage: Stage,
        detail: String,
    },
    ToolInvoked {
        tool: String,
        succeeded: bool,
    },
    Evaluation {
        approved: bool,
        summary: String,
    },
    RetryScheduled {
        stage: Stage,
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    RequestRejected {
        question: String,
        reason: String,
    },
    AnswerRejected {
        question: String,
        answer: String,
        reason: String,
    },
    ResponseReady {
        question: String,
        answer: String,
    },
    RequestFailed {
        question: String,
        reason: String,
    },
    EndOfStream,
}

impl EventPayload {
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::StatusUpdate { .. } => EventKind::StatusUpdate,
            Self::StageCompleted { .. } => EventKind::StageCompleted,
            Self::ToolInvoked { .. } => EventKind::ToolInvoked,
            Self::Evaluation { .. } => EventKind::Evaluation,
            Self::RetryScheduled { .. } => EventKind::RetryScheduled,
            Self::RequestRejected { .. } => EventKind::RequestRejected,
            Self::AnswerRejected { .. } => EventKind::AnswerRejected,
            Self::ResponseReady { .. } => EventKind::ResponseReady,
            Self::RequestFailed { .. } => EventKind::RequestFailed,
            Self::EndOfStream => EventKind::EndOfStream,
        }
    }
}

/// Something that happened; observed by zero or more listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    meta: MessageMeta,
    payload: EventPayload,
}

impl Event {
    pub fn new(session_id: SessionId, payload: EventPayload) -> Self {
        Self {
            meta: MessageMeta::new(session_id),
            payload,
        }
    }

    /// Build another event of the same session.
    pub fn derive(&self, payload: EventPayload) -> Self {
        Self::new(self.meta.correlation_id.clone(), payload)
    }

    pub fn meta(&self) -> &MessageMeta {
        &self.meta
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn correlation_id(&self) -> &SessionId {
        self.meta.correlation_id()
    }

    /// Plain-text rendering for terminals and logs.
    pub fn to_message(&self) -> String {
        match &self.payload {
            EventPayload::StatusUpdate { stage } => format!("Starting step: {stage}"),
            EventPayload::StageCompleted { stage, detail } => {
                format!("Completed step: {stage} ({detail})")
            }
            EventPayload::ToolInvoked { tool, succeeded } => {
                let status = if *succeeded { "succeeded" } else { "failed" };
                format!("Tool {tool} {status}")
            }
            EventPayload::Evaluation { approved, summary } => {
                format!("Evaluation approved={approved}: {summary}")
            }
            EventPayload::RetryScheduled {
                stage,
                attempt,
                delay_ms,
                reason,
            } => format!("Retrying {stage} (attempt {attempt}) in {delay_ms}ms: {reason}"),
            EventPayload::RequestRejected { question, reason } => {
                format!("\nQuestion:\n{question}\n was rejected. Response:\n{reason}")
            }
            EventPayload::AnswerRejected {
                question,
                answer,
                reason,
            } => format!(
                "Question:\n{question}\nResponse:\n{answer}\nRejection Reason:\n{reason}"
            ),
            EventPayload::ResponseReady { question, answer } => {
                format!("\nQuestion:\n{question}\nResponse:\n{answer}")
            }
            EventPayload::RequestFailed { question, reason } => {
                format!("\nQuestion:\n{question}\nException:\n{reason}")
            }
            EventPayload::EndOfStream => "end".to_string(),
        }
    }

    /// Markdown rendering for rich clients.
    pub fn to_markdown(&self) -> String {
        match &self.payload {
            EventPayload::StatusUpdate { stage } => {
                format!("## Status Update\n\n**Starting:**\n\n{stage}")
            }
            EventPayload::StageCompleted { stage, detail } => {
                format!("## Stage Completed\n\n**{stage}:** {detail}")
            }
            EventPayload::ToolInvoked { tool, succeeded } => {
                format!("## Tool\n\n`{tool}` succeeded: {succeeded}")
            }
            EventPayload::Evaluation { approved, summary } => {
                format!("## Evaluation\n\n{summary}\n\n**Approved:** {approved}")
            }
            EventPayload::RetryScheduled { .. } => format!("## Retry\n\n{}", self.to_message()),
            EventPayload::RequestRejected { reason, .. } => {
                format!("## Rejected Request\n\n{reason}")
            }
            EventPayload::AnswerRejected { answer, reason, .. } => {
                format!("## Rejected Answer\n\n{answer}\n\n### Rejection Reason\n\n{reason}")
            }
            EventPayload::ResponseReady { answer, .. } => format!("## Response\n\n{answer}"),
            EventPayload::RequestFailed { reason, .. } => {
                format!("## Failed Request\n\n```\n{reason}\n```")
            }
            EventPayload::EndOfStream => "## End of Event\n\nend".to_string(),
        }
    }

    /// Server-sent-event line. Progress markers use `event:`, content uses `data:`.
    pub fn to_event_string(&self) -> String {
        match self.payload {
            EventPayload::StatusUpdate { .. }
            | EventPayload::RetryScheduled { .. }
            | EventPayload::EndOfStream => format!("event: {}", self.to_message()),
            _ => format!("data: {}\n\n", self.to_markdown()),
        }
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Anything the bus can queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message", rename_all = "snake_case")]
pub enum Message {
    Command(Command),
    Event(Event),
}

/// Type tag of a [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "message", content = "kind", rename_all = "snake_case")]
pub enum MessageKind {
    Command(CommandKind),
    Event(EventKind),
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(kind) => write!(f, "command:{kind}"),
            Self::Event(kind) => write!(f, "event:{kind}"),
        }
    }
}

impl Message {
    pub fn meta(&self) -> &MessageMeta {
        match self {
            Self::Command(c) => c.meta(),
            Self::Event(e) => e.meta(),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Command(c) => MessageKind::Command(c.kind()),
            Self::Event(e) => MessageKind::Event(e.kind()),
        }
    }

    pub fn correlation_id(&self) -> &SessionId {
        self.meta().correlation_id()
    }
}

impl From<Command> for Message {
    fn from(command: Command) -> Self {
        Self::Command(command)
    }
}

impl From<Event> for Message {
    fn from(event: Event) -> Self {
        Self::Event(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_follow_up_keeps_correlation_id() {
        let session = SessionId::from("abc");
        let seed = Command::question(session.clone(), "What is X?");
        let next = seed.follow_up(CommandPayload::Check {
            question: "What is X?".to_string(),
        });
        assert_eq!(next.correlation_id(), &session);
        assert_ne!(next.meta().id(), seed.meta().id());
        assert!(next.meta().sequence() > seed.meta().sequence());
        assert_eq!(next.kind(), CommandKind::Check);
    }

    #[test]
    fn test_command_kind_table_is_dense() {
        for (i, kind) in CommandKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
        for (i, kind) in EventKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), i);
        }
    }

    #[test]
    fn test_only_question_is_not_a_processing_stage() {
        let processing: Vec<_> = CommandKind::ALL
            .iter()
            .filter(|k| k.stage().is_processing())
            .collect();
        assert_eq!(processing.len(), 7);
        assert!(!CommandKind::Question.stage().is_processing());
    }

    #[test]
    fn test_event_renderings() {
        let event = Event::new(
            SessionId::from("s1"),
            EventPayload::ResponseReady {
                question: "q".to_string(),
                answer: "42".to_string(),
            },
        );
        assert_eq!(event.to_message(), "\nQuestion:\nq\nResponse:\n42");
        assert_eq!(event.to_markdown(), "## Response\n\n42");
        assert_eq!(event.to_event_string(), "data: ## Response\n\n42\n\n");

        let status = event.derive(EventPayload::StatusUpdate {
            stage: Stage::Retrieving,
        });
        assert_eq!(status.to_event_string(), "event: Starting step: retrieving");
        assert_eq!(status.correlation_id().as_str(), "s1");
    }

    #[test]
    fn test_message_kind_display() {
        let cmd: Message = Command::question(SessionId::new(), "q").into();
        assert_eq!(cmd.kind().to_string(), "command:Question");
        let ev: Message = Event::new(SessionId::new(), EventPayload::EndOfStream).into();
        assert_eq!(ev.kind().to_string(), "event:EndOfStream");
        assert!(!EventKind::EndOfStream.is_terminal());
        assert!(EventKind::ResponseReady.is_terminal());
    }

    #[test]
    fn test_payload_question_accessor() {
        let payload = CommandPayload::FinalCheck {
            question: "orig".to_string(),
            answer: "42".to_string(),
        };
        assert_eq!(payload.question(), "orig");
    }
}
