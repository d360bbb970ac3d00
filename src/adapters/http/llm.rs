//! OpenAI-compatible chat model client.
//!
//! One client serves three roles: answer generation, question refinement and
//! the guardrail checks. Requests go to `{api_base}/chat/completions` and are
//! rate limited with a token bucket.

use anyhow::{ensure, Result};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::Client as ReqwestClient;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{build_client, from_send_error, read_json};
use crate::domain::models::{Direction, GenerationContext, LlmConfig, ScoredDocument, Verdict};
use crate::domain::ports::{CollaboratorError, Enhancer, Generator, GuardrailChecker};

const ANSWER_PROMPT: &str = "You are a helpful assistant.";

const ENHANCE_PROMPT: &str = "Rewrite the user's question so it can be answered from the \
provided context. Keep its meaning. Reply with the rewritten question only.";

const INBOUND_GUARD_PROMPT: &str = "You review questions sent to a question answering \
assistant. Reject questions that are harmful, abusive or unrelated to data analysis. \
Reply with JSON only: {\"approved\": true|false, \"reason\": \"...\"}";

const OUTBOUND_GUARD_PROMPT: &str = "You review answers produced by a question answering \
assistant. Reject answers that are implausible, inconsistent, unclear or incomplete. \
Reply with JSON only: {\"approved\": true|false, \"reason\": \"...\"}";

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Debug, Deserialize)]
struct ChatReply {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GuardrailReply {
    approved: bool,
    #[serde(default)]
    reason: String,
}

/// Chat completions client.
#[derive(Clone)]
pub struct ChatModelClient {
    http_client: ReqwestClient,
    config: LlmConfig,
    api_key: Option<String>,
    rate_limiter: Arc<DefaultDirectRateLimiter>,
    timeout: Duration,
}

impl std::fmt::Debug for ChatModelClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatModelClient")
            .field("api_base", &self.config.api_base)
            .field("model_id", &self.config.model_id)
            .finish_non_exhaustive()
    }
}

impl ChatModelClient {
    /// Build a client. The API key is read from `config.api_key_env`; a
    /// missing key is allowed for local servers.
    pub fn new(config: LlmConfig) -> Result<Self> {
        ensure!(!config.api_base.is_empty(), "Chat model needs an api_base");
        let per_second = NonZeroU32::new(config.requests_per_second)
            .ok_or_else(|| anyhow::anyhow!("requests_per_second must be positive"))?;
        let burst = NonZeroU32::new(config.burst_size).unwrap_or(per_second);
        let quota = Quota::per_second(per_second).allow_burst(burst);

        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        if api_key.is_none() {
            debug!(env = %config.api_key_env, "No API key set, sending unauthenticated requests");
        }

        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            http_client: build_client(timeout)?,
            config,
            api_key,
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
            timeout,
        })
    }

    async fn complete(&self, system: &str, user: &str) -> Result<String, CollaboratorError> {
        if user.trim().is_empty() {
            return Err(CollaboratorError::InvalidInput("empty prompt".to_string()));
        }

        self.rate_limiter.until_ready().await;

        let request = ChatRequest {
            model: &self.config.model_id,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system,
                },
                ChatMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: self.config.temperature,
        };
        let url = format!("{}/chat/completions", self.config.api_base.trim_end_matches('/'));
        let mut builder = self.http_client.post(url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| from_send_error(&e, self.timeout))?;
        let body: ChatResponse = read_json(response, self.timeout).await?;

        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .ok_or_else(|| CollaboratorError::Protocol("chat response has no content".to_string()))
    }
}

/// Guardrail models sometimes wrap their JSON in a code fence.
fn parse_guardrail_reply(content: &str) -> Result<GuardrailReply, CollaboratorError> {
    let trimmed = content.trim();
    let json = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(trimmed);
    serde_json::from_str(json.trim())
        .map_err(|e| CollaboratorError::Protocol(format!("guardrail reply is not valid JSON: {e}")))
}

#[async_trait]
impl Generator for ChatModelClient {
    async fn generate(
        &self,
        prompt: &str,
        context: &GenerationContext,
    ) -> Result<String, CollaboratorError> {
        let user = if context.is_empty() {
            prompt.to_string()
        } else {
            format!("Context:\n{}\nQuestion: {prompt}", context.render())
        };
        self.complete(ANSWER_PROMPT, &user).await
    }
}

#[async_trait]
impl Enhancer for ChatModelClient {
    async fn enhance(
        &self,
        question: &str,
        context: &[ScoredDocument],
    ) -> Result<String, CollaboratorError> {
        if context.is_empty() {
            return Ok(question.to_string());
        }
        let rendered = GenerationContext {
            documents: context.to_vec(),
            tool_results: Vec::new(),
        }
        .render();
        let refined = self
            .complete(ENHANCE_PROMPT, &format!("Context:\n{rendered}\nQuestion: {question}"))
            .await?;
        if refined.is_empty() {
            warn!("Chat model returned an empty refinement, keeping the question");
            return Ok(question.to_string());
        }
        Ok(refined)
    }
}

#[async_trait]
impl GuardrailChecker for ChatModelClient {
    async fn check(&self, content: &str, direction: Direction) -> Result<Verdict, CollaboratorError> {
        let system = match direction {
            Direction::Inbound => INBOUND_GUARD_PROMPT,
            Direction::Outbound => OUTBOUND_GUARD_PROMPT,
        };
        let reply = parse_guardrail_reply(&self.complete(system, content).await?)?;
        if reply.approved {
            Ok(Verdict::Allow)
        } else if reply.reason.is_empty() {
            Ok(Verdict::Reject(format!("{direction} guardrail declined")))
        } else {
            Ok(Verdict::Reject(reply.reason))
        }
    }
}
