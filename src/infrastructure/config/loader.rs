use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::{BackendMode, Config, NotifierConfig};

/// Directory holding project configuration, relative to the working directory
pub const CONFIG_DIR: &str = ".askbus";

/// Prefix of environment overrides; `__` separates nested keys
pub const ENV_PREFIX: &str = "ASKBUS_";

/// Configuration error types
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Invalid max_attempts: 0. At least one attempt is required")]
    InvalidMaxAttempts,

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must not exceed max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid timeout for {0}: must be positive")]
    InvalidTimeout(String),

    #[error("Invalid notifier capacity: {0}. Must be at least 2")]
    InvalidCapacity(usize),

    #[error(
        "Invalid candidate counts: retrieval {retrieval}, ranking {ranking}. Both must be positive and ranking must not exceed retrieval"
    )]
    InvalidCandidates { retrieval: usize, ranking: usize },

    #[error("Missing {0}: required when backend.mode is http")]
    MissingUrl(&'static str),

    #[error("Invalid rate limit: requests_per_second and burst_size must be positive")]
    InvalidRateLimit,
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .askbus/config.yaml
    /// 3. .askbus/local.yaml (optional local overrides)
    /// 4. Environment variables (ASKBUS_* prefix)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".")
    }

    /// Same as [`ConfigLoader::load`] with the project rooted at `root`.
    pub fn load_from_dir(root: impl AsRef<Path>) -> Result<Config> {
        let dir = root.as_ref().join(CONFIG_DIR);
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(dir.join("config.yaml")))
            .merge(Yaml::file(dir.join("local.yaml")))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honouring env overrides
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        if config.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidMaxAttempts);
        }

        if config.retry.initial_backoff_ms > config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if config.timeouts.default_ms == 0 {
            return Err(ConfigError::InvalidTimeout("default_ms".to_string()));
        }
        if let Some((stage, _)) = config.timeouts.stages.iter().find(|(_, ms)| **ms == 0) {
            return Err(ConfigError::InvalidTimeout(stage.to_string()));
        }

        if config.notifier.capacity < NotifierConfig::MIN_CAPACITY {
            return Err(ConfigError::InvalidCapacity(config.notifier.capacity));
        }

        let retrieval = &config.retrieval;
        if retrieval.n_retrieval_candidates == 0
            || retrieval.n_ranking_candidates == 0
            || retrieval.n_ranking_candidates > retrieval.n_retrieval_candidates
        {
            return Err(ConfigError::InvalidCandidates {
                retrieval: retrieval.n_retrieval_candidates,
                ranking: retrieval.n_ranking_candidates,
            });
        }

        if config.backend.mode == BackendMode::Http {
            let backend = &config.backend;
            let required = [
                ("backend.rag.embedding_url", &backend.rag.embedding_url),
                ("backend.rag.retrieval_url", &backend.rag.retrieval_url),
                ("backend.rag.ranking_url", &backend.rag.ranking_url),
                ("backend.llm.api_base", &backend.llm.api_base),
            ];
            if let Some((key, _)) = required.iter().find(|(_, url)| url.trim().is_empty()) {
                return Err(ConfigError::MissingUrl(*key));
            }
            if backend.llm.requests_per_second == 0 || backend.llm.burst_size == 0 {
                return Err(ConfigError::InvalidRateLimit);
            }
        }

        Ok(())
    }
}
