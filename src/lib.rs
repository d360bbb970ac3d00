//! askbus - staged question answering over a message bus
//!
//! A question enters as a `Question` command and moves through guardrail
//! check, retrieval, reranking, refinement, tool use, generation and a final
//! guardrail check. Each stage is a command handler; handlers return the next
//! command, and listeners observe the events they emit. Every session runs on
//! its own queue and publishes progress to a bounded notifier channel.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): messages, sessions, stage state machine, ports
//! - **Service Layer** (`services`): registry, dispatch bus, handlers, notifier
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **Adapters** (`adapters`): HTTP and in-memory collaborators
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```no_run
//! use askbus::adapters::memory;
//! use askbus::{Config, PipelineService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let service = PipelineService::from_config(&Config::default(), memory::offline_collaborators())?;
//!     let id = service.submit_question("What is the max value of X in April?", None)?;
//!     let session = service.wait(&id).await?;
//!     println!("{:?}", session.outcome());
//!     Ok(())
//! }
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{
    ConfigurationError, FailureReason, HandlerError, PipelineError, PipelineResult,
};
pub use domain::models::{
    Command, CommandKind, CommandPayload, Config, Event, EventKind, EventPayload, Message,
    Session, SessionId, SessionOutcome, SessionStatus, Stage,
};
pub use domain::ports::{Collaborators, CollaboratorError};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{MessageBus, NotifierHub, PipelineService, RetryPolicy};
