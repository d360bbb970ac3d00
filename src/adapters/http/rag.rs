//! Knowledge-base service client.
//!
//! Three endpoints:
//! - `GET embedding_url?text=` returns `{"embedding": [f32]}`
//! - `POST retrieval_url {embedding, n_items, table}` returns `{"results": [..]}`
//! - `GET ranking_url?text=&question=&table=` returns `{"score": f64}`

use anyhow::{ensure, Result};
use async_trait::async_trait;
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

use super::{build_client, from_send_error, read_json};
use crate::domain::models::{RagConfig, RetrievalParams, ScoredDocument};
use crate::domain::ports::{CollaboratorError, Reranker, Retriever};

/// Client for the embedding, retrieval and ranking endpoints.
#[derive(Debug, Clone)]
pub struct RagClient {
    http_client: ReqwestClient,
    config: RagConfig,
    table: Option<String>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct RetrievalRequest<'a> {
    embedding: &'a [f32],
    n_items: usize,
    table: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct RetrievalResponse {
    #[serde(default)]
    results: Vec<Map<String, Value>>,
}

#[derive(Debug, Deserialize)]
struct RankingResponse {
    score: f64,
}

impl RagClient {
    /// `table` is forwarded to the ranking endpoint with every candidate.
    pub fn new(config: RagConfig, table: Option<String>) -> Result<Self> {
        ensure!(
            !config.embedding_url.is_empty()
                && !config.retrieval_url.is_empty()
                && !config.ranking_url.is_empty(),
            "RAG client needs embedding, retrieval and ranking URLs"
        );
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            http_client: build_client(timeout)?,
            config,
            table,
            timeout,
        })
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>, CollaboratorError> {
        let response = self
            .http_client
            .get(&self.config.embedding_url)
            .query(&[("text", text)])
            .send()
            .await
            .map_err(|e| from_send_error(&e, self.timeout))?;
        let body: EmbeddingResponse = read_json(response, self.timeout).await?;
        Ok(body.embedding)
    }

    async fn score(&self, question: &str, text: &str) -> Result<f64, CollaboratorError> {
        let mut query = vec![("text", text), ("question", question)];
        if let Some(table) = self.table.as_deref() {
            query.push(("table", table));
        }
        let response = self
            .http_client
            .get(&self.config.ranking_url)
            .query(&query)
            .send()
            .await
            .map_err(|e| from_send_error(&e, self.timeout))?;
        let body: RankingResponse = read_json(response, self.timeout).await?;
        Ok(body.score)
    }
}

/// Turn one retrieval hit into a document. The text is taken from
/// `description` or `text`; remaining fields become metadata.
fn candidate_to_document(index: usize, mut fields: Map<String, Value>) -> ScoredDocument {
    let id = match fields.remove("id") {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => index.to_string(),
    };
    let text = ["description", "text"]
        .iter()
        .find_map(|key| match fields.remove(*key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        })
        .unwrap_or_default();
    let score = fields
        .remove("score")
        .and_then(|v| v.as_f64())
        .unwrap_or_default();
    ScoredDocument {
        id,
        text,
        score,
        metadata: fields.into_iter().collect(),
    }
}

#[async_trait]
impl Retriever for RagClient {
    async fn search(
        &self,
        query: &str,
        params: &RetrievalParams,
    ) -> Result<Vec<ScoredDocument>, CollaboratorError> {
        let embedding = self.embed(query).await?;
        let request = RetrievalRequest {
            embedding: &embedding,
            n_items: params.top_k,
            table: params.table.as_deref(),
        };
        let response = self
            .http_client
            .post(&self.config.retrieval_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| from_send_error(&e, self.timeout))?;
        let body: RetrievalResponse = read_json(response, self.timeout).await?;

        let documents: Vec<ScoredDocument> = body
            .results
            .into_iter()
            .enumerate()
            .map(|(i, fields)| candidate_to_document(i, fields))
            .collect();
        debug!(candidates = documents.len(), "Retrieved candidates");
        Ok(documents)
    }
}

#[async_trait]
impl Reranker for RagClient {
    /// Scores every candidate against the question and sorts descending.
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<ScoredDocument>,
    ) -> Result<Vec<ScoredDocument>, CollaboratorError> {
        let mut ranked = Vec::with_capacity(documents.len());
        for mut doc in documents {
            doc.score = self.score(query, &doc.text).await?;
            ranked.push(doc);
        }
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        Ok(ranked)
    }
}
