//! Domain layer for the askbus pipeline engine
//!
//! Messages, sessions, the stage state machine, the error taxonomy and the
//! collaborator ports. Nothing in here performs I/O.

pub mod errors;
pub mod models;
pub mod ports;

pub use errors::{
    ConfigurationError, FailureReason, HandlerError, PipelineError, PipelineResult,
};
