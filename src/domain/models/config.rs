use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use super::stage::Stage;

/// Main configuration structure for askbus
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct Config {
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Retry policy for transient collaborator failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-stage handler timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Session notifier channel configuration
    #[serde(default)]
    pub notifier: NotifierConfig,

    /// Retrieval and ranking candidate counts
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Collaborator backends
    #[serde(default)]
    pub backend: BackendConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json or pretty
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Directory for rolling log files; stdout only when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<String>,

    /// Rotation policy for log files: daily, hourly or never
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetryConfig {
    /// Total attempts per command, the first one included
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

const fn default_max_attempts() -> u32 {
    3
}

const fn default_initial_backoff_ms() -> u64 {
    200
}

const fn default_max_backoff_ms() -> u64 {
    5_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

/// Handler timeouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Timeout applied to every stage without an override
    #[serde(default = "default_timeout_ms")]
    pub default_ms: u64,

    /// Overrides keyed by stage name (e.g. `generating`)
    #[serde(default)]
    pub stages: HashMap<Stage, u64>,
}

const fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_ms: default_timeout_ms(),
            stages: HashMap::new(),
        }
    }
}

impl TimeoutConfig {
    pub fn for_stage(&self, stage: Stage) -> Duration {
        Duration::from_millis(self.stages.get(&stage).copied().unwrap_or(self.default_ms))
    }
}

/// What a full notifier channel discards
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    #[default]
    DropOldest,
    DropNewest,
}

/// Session notifier channel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct NotifierConfig {
    /// Events buffered per session before the overflow policy applies
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    #[serde(default)]
    pub overflow: OverflowPolicy,

    /// Finished sessions kept for polling before the oldest is evicted
    #[serde(default = "default_retain_finished")]
    pub retain_finished: usize,
}

impl NotifierConfig {
    /// Room for the terminal notification plus the end-of-stream marker.
    pub const MIN_CAPACITY: usize = 2;
}

const fn default_capacity() -> usize {
    64
}

const fn default_retain_finished() -> usize {
    256
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            overflow: OverflowPolicy::default(),
            retain_finished: default_retain_finished(),
        }
    }
}

/// Candidate counts for the retrieval and ranking stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RetrievalConfig {
    #[serde(default = "default_n_retrieval_candidates")]
    pub n_retrieval_candidates: usize,

    #[serde(default = "default_n_ranking_candidates")]
    pub n_ranking_candidates: usize,

    /// Knowledge-base table to search
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
}

const fn default_n_retrieval_candidates() -> usize {
    20
}

const fn default_n_ranking_candidates() -> usize {
    5
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            n_retrieval_candidates: default_n_retrieval_candidates(),
            n_ranking_candidates: default_n_ranking_candidates(),
            table: None,
        }
    }
}

/// Which collaborator implementations to wire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// In-memory collaborators; no network access
    #[default]
    Offline,
    /// HTTP RAG, chat-model and tool servers
    Http,
}

/// Collaborator backends configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BackendConfig {
    #[serde(default)]
    pub mode: BackendMode,

    #[serde(default)]
    pub rag: RagConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub tools: ToolsConfig,
}

/// RAG endpoints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct RagConfig {
    #[serde(default)]
    pub embedding_url: String,

    #[serde(default)]
    pub retrieval_url: String,

    #[serde(default)]
    pub ranking_url: String,

    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_http_timeout_secs() -> u64 {
    30
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            embedding_url: String::new(),
            retrieval_url: String::new(),
            ranking_url: String::new(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}

/// OpenAI-compatible chat model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct LlmConfig {
    /// Base URL, e.g. `http://localhost:8000/v1`
    #[serde(default)]
    pub api_base: String,

    #[serde(default = "default_model_id")]
    pub model_id: String,

    #[serde(default)]
    pub temperature: f32,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Requests per second allowed
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,

    /// Burst size for token bucket
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

fn default_model_id() -> String {
    "gpt-4o-mini".to_string()
}

fn default_api_key_env() -> String {
    "ASKBUS_LLM_API_KEY".to_string()
}

const fn default_llm_timeout_secs() -> u64 {
    120
}

const fn default_requests_per_second() -> u32 {
    5
}

const fn default_burst_size() -> u32 {
    10
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            model_id: default_model_id(),
            temperature: 0.0,
            api_key_env: default_api_key_env(),
            timeout_secs: default_llm_timeout_secs(),
            requests_per_second: default_requests_per_second(),
            burst_size: default_burst_size(),
        }
    }
}

/// HTTP tool server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ToolsConfig {
    /// Base URL of the tool server; tools are disabled when empty
    #[serde(default)]
    pub api_base: String,

    #[serde(default = "default_http_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            api_base: String::new(),
            timeout_secs: default_http_timeout_secs(),
        }
    }
}
