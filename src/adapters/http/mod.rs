//! HTTP collaborators: RAG endpoints, an OpenAI-compatible chat model and a
//! tool server.
//!
//! All clients share one error mapping: 429 and 5xx are `Unavailable`,
//! other 4xx are `InvalidInput`, undecodable bodies are `Protocol`.

pub mod llm;
pub mod rag;
pub mod tools;

use anyhow::{Context, Result};
use reqwest::{Client as ReqwestClient, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::domain::ports::CollaboratorError;

pub use llm::ChatModelClient;
pub use rag::RagClient;
pub use tools::HttpToolExecutor;

pub(crate) fn build_client(timeout: Duration) -> Result<ReqwestClient> {
    ReqwestClient::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(10)
        .tcp_nodelay(true)
        .build()
        .context("Failed to build HTTP client")
}

/// Map a non-success status and its body.
pub(crate) fn from_status(status: StatusCode, body: &str) -> CollaboratorError {
    let detail = if body.is_empty() {
        format!("HTTP {status}")
    } else {
        format!("HTTP {status}: {body}")
    };
    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        CollaboratorError::Unavailable(detail)
    } else if status.is_client_error() {
        CollaboratorError::InvalidInput(detail)
    } else {
        CollaboratorError::Protocol(detail)
    }
}

pub(crate) fn from_send_error(err: &reqwest::Error, timeout: Duration) -> CollaboratorError {
    if err.is_timeout() {
        CollaboratorError::Timeout(timeout)
    } else if err.is_connect() {
        CollaboratorError::Unavailable(err.to_string())
    } else {
        CollaboratorError::Transport(err.to_string())
    }
}

/// Check the status and decode a JSON body.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: Response,
    timeout: Duration,
) -> Result<T, CollaboratorError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(from_status(status, &body));
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| from_send_error(&e, timeout))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| CollaboratorError::Protocol(format!("Failed to decode response: {e}")))
}
