//! Concrete collaborators for the pipeline ports.

pub mod http;
pub mod memory;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use crate::domain::models::{BackendMode, Config};
use crate::domain::ports::Collaborators;

/// Build the collaborators selected by `backend.mode`.
///
/// In http mode the tool server is optional: without `backend.tools.api_base`
/// the catalog is empty.
pub fn build_collaborators(config: &Config) -> Result<Collaborators> {
    match config.backend.mode {
        BackendMode::Offline => {
            info!("Using offline collaborators");
            Ok(memory::offline_collaborators())
        }
        BackendMode::Http => {
            let rag = Arc::new(
                http::RagClient::new(config.backend.rag.clone(), config.retrieval.table.clone())
                    .context("Failed to configure RAG client")?,
            );
            let llm = Arc::new(
                http::ChatModelClient::new(config.backend.llm.clone())
                    .context("Failed to configure chat model client")?,
            );
            let tools: Arc<dyn crate::domain::ports::ToolExecutor> =
                if config.backend.tools.api_base.is_empty() {
                    Arc::new(memory::StaticToolExecutor::new())
                } else {
                    Arc::new(
                        http::HttpToolExecutor::new(&config.backend.tools)
                            .context("Failed to configure tool executor")?,
                    )
                };
            info!(model = %config.backend.llm.model_id, "Using HTTP collaborators");
            Ok(Collaborators {
                retriever: rag.clone(),
                reranker: rag,
                enhancer: llm.clone(),
                tools,
                generator: llm.clone(),
                guardrail: llm,
            })
        }
    }
}
