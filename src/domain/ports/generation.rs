use async_trait::async_trait;

use super::errors::CollaboratorError;
use crate::domain::models::{Direction, GenerationContext, Verdict};

/// Produces the answer text.
///
/// `Unavailable` is retried by the pipeline; `InvalidInput` is not.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        prompt: &str,
        context: &GenerationContext,
    ) -> Result<String, CollaboratorError>;
}

/// Content policy check run before retrieval and after generation.
#[async_trait]
pub trait GuardrailChecker: Send + Sync {
    async fn check(&self, content: &str, direction: Direction)
        -> Result<Verdict, CollaboratorError>;
}
