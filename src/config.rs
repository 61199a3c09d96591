//! Configuration types.

use std::time::Duration;

use crate::error::ConfigError;
use crate::llm::LlmBackend;

/// Top-level agent configuration, assembled from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// LLM backend to use.
    pub backend: LlmBackend,
    /// Model identifier passed to the provider.
    pub model: String,
    /// Path to the local database file.
    pub db_path: String,
    /// How often the extraction worker polls for pending messages.
    pub extract_interval: Duration,
}

/// Default model when `ATTACHE_MODEL` is unset.
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Default extraction poll interval: 5 minutes.
const DEFAULT_EXTRACT_INTERVAL_SECS: u64 = 300;

impl AppConfig {
    /// Load configuration from `ATTACHE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = match std::env::var("ATTACHE_BACKEND").as_deref() {
            Ok("openai") => LlmBackend::OpenAi,
            Ok("anthropic") | Err(_) => LlmBackend::Anthropic,
            Ok(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "ATTACHE_BACKEND".into(),
                    message: format!("unknown backend '{other}' (expected anthropic or openai)"),
                });
            }
        };

        let model = std::env::var("ATTACHE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        let db_path =
            std::env::var("ATTACHE_DB_PATH").unwrap_or_else(|_| "./data/attache.db".to_string());

        let interval_secs = match std::env::var("ATTACHE_EXTRACT_INTERVAL_SECS") {
            Ok(s) => s.parse().map_err(|_| ConfigError::InvalidValue {
                key: "ATTACHE_EXTRACT_INTERVAL_SECS".into(),
                message: format!("'{s}' is not a valid number of seconds"),
            })?,
            Err(_) => DEFAULT_EXTRACT_INTERVAL_SECS,
        };

        Ok(Self {
            backend,
            model,
            db_path,
            extract_interval: Duration::from_secs(interval_secs),
        })
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            backend: LlmBackend::Anthropic,
            model: DEFAULT_MODEL.to_string(),
            db_path: "./data/attache.db".to_string(),
            extract_interval: Duration::from_secs(DEFAULT_EXTRACT_INTERVAL_SECS),
        }
    }
}
