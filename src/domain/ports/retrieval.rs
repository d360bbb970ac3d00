//! Retrieval-side collaborators: search, ranking and question refinement.

use async_trait::async_trait;

use super::errors::CollaboratorError;
use crate::domain::models::{RetrievalParams, ScoredDocument};

/// Knowledge-base search.
#[async_trait]
pub trait Retriever: Send + Sync {
    /// Ordered candidates for `query`. An empty result is not an error.
    async fn search(
        &self,
        query: &str,
        params: &RetrievalParams,
    ) -> Result<Vec<ScoredDocument>, CollaboratorError>;
}

/// Reorders candidates by relevance to the query.
///
/// Must be a pure function of its inputs.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<ScoredDocument>,
    ) -> Result<Vec<ScoredDocument>, CollaboratorError>;
}

/// Rewrites the question using retrieved context.
#[async_trait]
pub trait Enhancer: Send + Sync {
    /// Returns the refined question, or the original one unchanged when no
    /// refinement applies. Never returns an empty string.
    async fn enhance(
        &self,
        question: &str,
        context: &[ScoredDocument],
    ) -> Result<String, CollaboratorError>;
}
