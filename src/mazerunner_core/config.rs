//! System-level configuration: the "shared config store" of spec §4.6.
//!
//! Loaded once at process startup and never re-read mid-experiment (spec §5,
//! "Config store: read-only at admission; never re-read mid-experiment").
//! Values here are stable across a sweep — `recall_interval`,
//! `max_recall_actions`, `max_moves`, `max_duration_minutes`, and per-model
//! rate limits. Per-request sampling parameters (`temperature`, `num_ctx`,
//! ...) are NOT here; those travel in the trigger event per the "atomic
//! config-in-event rule".

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::mazerunner_core::error::Error;

/// Rate limit and pricing knobs for one `(model_name, llm_provider)` pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelEndpointConfig {
    /// Requests-per-minute ceiling enforced by the Turn Loop Scheduler's
    /// wait computation (spec §4.5). Must be positive.
    pub rate_limit_rpm: f64,
    /// USD price per 1000 input tokens, used to compute `cost_usd`.
    #[serde(default)]
    pub input_price_per_1k: f64,
    /// USD price per 1000 output tokens, used to compute `cost_usd`.
    #[serde(default)]
    pub output_price_per_1k: f64,
    /// Base URL for the chat backend (only meaningful for `local-chat`).
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SystemConfig {
    /// Database connection string. Falls back to the `DATABASE_URL`
    /// environment variable when absent (teacher's own clients read
    /// secrets from the environment, e.g. `OPEN_AI_SECRET`).
    #[serde(default)]
    pub database_url: Option<String>,

    /// Minimum number of movement actions between successful recalls.
    pub recall_interval: u32,
    /// Cap on the number of tiles returned by a successful recall.
    pub max_recall_actions: u32,
    /// Cap on total movement actions for an experiment.
    pub max_moves: u32,
    /// Wall-clock budget for an experiment, in minutes.
    pub max_duration_minutes: f64,
    /// Cap on tool executions within a single turn.
    pub max_actions_per_turn: u32,
    /// Upper bound on concurrently in-flight experiments across the
    /// deployment (spec §4.6 "Bounded concurrency").
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_experiments: usize,

    /// Keyed by `"{model_name}:{llm_provider}"`.
    #[serde(default)]
    pub model_endpoints: HashMap<String, ModelEndpointConfig>,

    /// API key header value for the local-chat backend. Falls back to the
    /// `MAZE_CHAT_API_KEY` environment variable when absent.
    #[serde(default)]
    pub chat_api_key: Option<String>,
}

fn default_max_concurrent() -> usize {
    1
}

impl SystemConfig {
    pub fn load(path: &Path) -> Result<Self, Error> {
        let content = std::fs::read_to_string(path)?;
        let mut config: SystemConfig = toml::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if self.database_url.is_none() {
            self.database_url = std::env::var("DATABASE_URL").ok();
        }
        if self.chat_api_key.is_none() {
            self.chat_api_key = std::env::var("MAZE_CHAT_API_KEY").ok();
        }
    }

    pub fn database_url(&self) -> Result<&str, Error> {
        self.database_url
            .as_deref()
            .ok_or_else(|| Error::config_missing("database_url not set"))
    }

    /// Resolve the RPM ceiling for a `(model, provider)` pair. Spec §4.5:
    /// "negative or unset RPM -> fail fast with CONFIG_MISSING".
    pub fn rate_limit_rpm(&self, model_name: &str, provider: &str) -> Result<f64, Error> {
        let key = format!("{model_name}:{provider}");
        let endpoint = self.model_endpoints.get(&key).ok_or_else(|| {
            Error::config_missing(format!("no rate_limit_rpm configured for {key}"))
        })?;
        if endpoint.rate_limit_rpm <= 0.0 {
            return Err(Error::config_missing(format!(
                "rate_limit_rpm for {key} must be positive, got {}",
                endpoint.rate_limit_rpm
            )));
        }
        Ok(endpoint.rate_limit_rpm)
    }

    pub fn endpoint(&self, model_name: &str, provider: &str) -> Option<&ModelEndpointConfig> {
        self.model_endpoints
            .get(&format!("{model_name}:{provider}"))
    }

    pub fn default_path() -> PathBuf {
        std::env::var_os("MAZE_CONFIG_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("maze_config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_toml() -> &'static str {
        r#"
recall_interval = 3
max_recall_actions = 20
max_moves = 200
max_duration_minutes = 30.0
max_actions_per_turn = 5
max_concurrent_experiments = 1

[model_endpoints."llama3:local-chat"]
rate_limit_rpm = 60.0
input_price_per_1k = 0.0
output_price_per_1k = 0.0
base_url = "http://localhost:11434"
"#
    }

    #[test]
    fn load_and_resolve_rate_limit() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, sample_toml()).unwrap();

        let config = SystemConfig::load(&path).unwrap();
        assert_eq!(config.recall_interval, 3);
        assert_eq!(
            config.rate_limit_rpm("llama3", "local-chat").unwrap(),
            60.0
        );
    }

    #[test]
    fn missing_rate_limit_is_config_missing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, sample_toml()).unwrap();

        let config = SystemConfig::load(&path).unwrap();
        let err = config.rate_limit_rpm("unknown-model", "local-chat").unwrap_err();
        assert_eq!(err.kind, crate::mazerunner_core::error::ErrorKind::ConfigMissing);
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut toml_content = sample_toml().to_string();
        toml_content.push_str(
            "\n[model_endpoints.\"broken:local-chat\"]\nrate_limit_rpm = 0.0\n",
        );
        std::fs::write(&path, toml_content).unwrap();

        let config = SystemConfig::load(&path).unwrap();
        assert!(config.rate_limit_rpm("broken", "local-chat").is_err());
    }
}
