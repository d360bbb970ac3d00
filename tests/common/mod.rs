//! Common test utilities for integration tests
//!
//! Shared collaborators and bus construction used across the pipeline,
//! concurrency and adapter suites.
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use askbus::adapters::memory::{self, ExtractiveGenerator, StaticRetriever, StaticToolExecutor};
use askbus::domain::models::{
    Config, GenerationContext, RetrievalConfig, ScoredDocument, TimeoutConfig, ToolDescriptor,
};
use askbus::domain::ports::{CollaboratorError, Collaborators, Generator, Reranker};
use askbus::services::{default_registry, MessageBus, RetryPolicy};

pub const SCENARIO_QUESTION: &str = "What is the max value of X in April?";

/// Setup test logging
///
/// Call at the start of a test to see the bus trace with `--nocapture`.
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Corpus, a `max_value` tool answering 42 and extractive generation.
pub fn scenario_collaborators() -> Collaborators {
    let retriever = StaticRetriever::new(vec![
        ScoredDocument::new("x-april", "Series X was sampled daily in April", 0.0),
        ScoredDocument::new("y-april", "Series Y was flat in April", 0.0),
        ScoredDocument::new("z-march", "Series Z peaked in March", 0.0),
    ]);
    let tools = StaticToolExecutor::new()
        .with_tool(
            ToolDescriptor::new("max_value", "Maximum of a series over a month")
                .with_keywords(["max", "maximum"]),
            json!(42),
        )
        .with_tool(
            ToolDescriptor::new("average", "Mean of a series").with_keywords(["average", "mean"]),
            json!(17.5),
        );
    Collaborators {
        retriever: Arc::new(retriever),
        tools: Arc::new(tools),
        generator: Arc::new(ExtractiveGenerator),
        ..memory::offline_collaborators()
    }
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(5))
}

/// A bus wired with the standard handlers.
pub fn bus(collaborators: Collaborators, retry: RetryPolicy) -> MessageBus {
    bus_with_timeouts(collaborators, retry, TimeoutConfig::default())
}

pub fn bus_with_timeouts(
    collaborators: Collaborators,
    retry: RetryPolicy,
    timeouts: TimeoutConfig,
) -> MessageBus {
    let registry = default_registry(&RetrievalConfig::default()).unwrap();
    MessageBus::new(Arc::new(registry), Arc::new(collaborators), retry, timeouts)
}

pub fn config_with_retry(max_attempts: u32) -> Config {
    let mut config = Config::default();
    config.retry.max_attempts = max_attempts;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 5;
    config
}

/// Fails with `Unavailable` a fixed number of times, then answers.
#[derive(Debug)]
pub struct FlakyGenerator {
    failures_left: AtomicU32,
    calls: AtomicU32,
    answer: String,
}

impl FlakyGenerator {
    pub fn new(failures: u32, answer: &str) -> Self {
        Self {
            failures_left: AtomicU32::new(failures),
            calls: AtomicU32::new(0),
            answer: answer.to_string(),
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for FlakyGenerator {
    async fn generate(
        &self,
        _prompt: &str,
        _context: &GenerationContext,
    ) -> Result<String, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.failures_left.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_left.store(remaining - 1, Ordering::SeqCst);
            return Err(CollaboratorError::Unavailable("model overloaded".into()));
        }
        Ok(self.answer.clone())
    }
}

/// Sleeps before answering.
#[derive(Debug)]
pub struct SlowGenerator(pub Duration);

#[async_trait]
impl Generator for SlowGenerator {
    async fn generate(
        &self,
        _prompt: &str,
        _context: &GenerationContext,
    ) -> Result<String, CollaboratorError> {
        tokio::time::sleep(self.0).await;
        Ok("slow answer".into())
    }
}

/// Always fails with a non-transient error.
#[derive(Debug)]
pub struct BrokenGenerator;

#[async_trait]
impl Generator for BrokenGenerator {
    async fn generate(
        &self,
        _prompt: &str,
        _context: &GenerationContext,
    ) -> Result<String, CollaboratorError> {
        Err(CollaboratorError::InvalidInput("prompt too long".into()))
    }
}

/// Requests cancellation of the run while reranking, then returns normally.
#[derive(Debug)]
pub struct CancellingReranker(pub CancellationToken);

#[async_trait]
impl Reranker for CancellingReranker {
    async fn rerank(
        &self,
        _query: &str,
        documents: Vec<ScoredDocument>,
    ) -> Result<Vec<ScoredDocument>, CollaboratorError> {
        self.0.cancel();
        Ok(documents)
    }
}
