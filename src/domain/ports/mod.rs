//! Port trait definitions (Hexagonal Architecture)
//!
//! The pipeline only reaches external systems through these traits:
//! - Retriever / Reranker / Enhancer: knowledge-base search and refinement
//! - ToolExecutor: named tools
//! - Generator: answer generation
//! - GuardrailChecker: inbound and outbound policy checks
//! - NotifierSink: progress events for the outward transport

pub mod errors;
pub mod generation;
pub mod notifier;
pub mod retrieval;
pub mod tools;

use std::sync::Arc;

pub use errors::CollaboratorError;
pub use generation::{Generator, GuardrailChecker};
pub use notifier::{NotifierSink, NullNotifier};
pub use retrieval::{Enhancer, Reranker, Retriever};
pub use tools::ToolExecutor;

/// The collaborators a pipeline run may call. Shared by every session.
#[derive(Clone)]
pub struct Collaborators {
    pub retriever: Arc<dyn Retriever>,
    pub reranker: Arc<dyn Reranker>,
    pub enhancer: Arc<dyn Enhancer>,
    pub tools: Arc<dyn ToolExecutor>,
    pub generator: Arc<dyn Generator>,
    pub guardrail: Arc<dyn GuardrailChecker>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators").finish_non_exhaustive()
    }
}
