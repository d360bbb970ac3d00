pub mod config;
pub mod context;
pub mod message;
pub mod session;
pub mod stage;

pub use config::{
    BackendConfig, BackendMode, Config, LlmConfig, LoggingConfig, NotifierConfig, OverflowPolicy,
    RagConfig, RetrievalConfig, RetryConfig, TimeoutConfig, ToolsConfig,
};
pub use context::{
    Direction, GenerationContext, RetrievalParams, ScoredDocument, ToolDescriptor, ToolOutcome,
    ToolResult, Verdict,
};
pub use message::{
    Command, CommandKind, CommandPayload, Event, EventKind, EventPayload, Message, MessageId,
    MessageKind, MessageMeta, SessionId,
};
pub use session::{Session, SessionOutcome, SessionStatus, TrailEntry};
pub use stage::{IllegalTransition, Stage};
