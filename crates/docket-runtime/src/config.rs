//! Runtime configuration.
//!
//! Loaded from YAML. Every field has a default, so an empty file (or no
//! file) is a valid configuration. Durations are human strings such as
//! `"60s"` or `"600ms"`.
//!
//! ```yaml
//! socrata:
//!   base_url: "https://datacatalog.cookcountyil.gov/resource"
//!   timeout: 30s
//!   retry:
//!     max_retries: 4
//!     min_backoff: 600ms
//! stats:
//!   cache_ttl: 6h
//! llm:
//!   model: "claude-sonnet-4-5-20250514"
//!   temperature: 0.2
//! sessions:
//!   max_sessions: 500
//!   max_messages: 200
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use docket_core::Dataset;

use crate::providers::CompletionConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config YAML: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub socrata: SocrataConfig,
    pub stats: StatsConfig,
    pub llm: LlmConfig,
    pub sessions: SessionConfig,
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = if yaml.trim().is_empty() {
            RuntimeConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let base = &self.socrata.base_url;
        if !base.starts_with("http://") && !base.starts_with("https://") {
            return Err(ConfigError::Invalid(
                "socrata.base_url must start with http:// or https://".to_string(),
            ));
        }
        if self.socrata.page_size == 0 {
            return Err(ConfigError::Invalid("socrata.page_size must be > 0".to_string()));
        }
        if !(0.0..=1.0).contains(&self.llm.temperature) {
            return Err(ConfigError::Invalid(format!(
                "llm.temperature must be within 0.0..=1.0, got {}",
                self.llm.temperature
            )));
        }
        if self.sessions.max_sessions == 0 {
            return Err(ConfigError::Invalid("sessions.max_sessions must be > 0".to_string()));
        }
        if self.sessions.max_messages == 0 {
            return Err(ConfigError::Invalid("sessions.max_messages must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Socrata resource ids for the four datasets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetIds {
    pub intake: String,
    pub initiation: String,
    pub disposition: String,
    pub sentencing: String,
}

impl Default for DatasetIds {
    fn default() -> Self {
        Self {
            intake: "3k7z-hchi".to_string(),
            initiation: "7mck-ehwz".to_string(),
            disposition: "apwk-dzx8".to_string(),
            sentencing: "tg8v-tm6u".to_string(),
        }
    }
}

impl DatasetIds {
    pub fn id(&self, dataset: Dataset) -> &str {
        match dataset {
            Dataset::Intake => &self.intake,
            Dataset::Initiation => &self.initiation,
            Dataset::Disposition => &self.disposition,
            Dataset::Sentencing => &self.sentencing,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: usize,
    #[serde(with = "duration_str")]
    pub min_backoff: Duration,
    #[serde(with = "duration_str")]
    pub max_backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            min_backoff: Duration::from_millis(600),
            max_backoff: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SocrataConfig {
    pub base_url: String,
    pub datasets: DatasetIds,
    /// `$limit` for each disposition page.
    pub page_size: usize,
    /// Per-request timeout for case lookups.
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    /// Per-request timeout for disposition pages, which can be large.
    #[serde(with = "duration_str")]
    pub disposition_timeout: Duration,
    pub retry: RetryConfig,
    /// Overrides `SOCRATA_APP_TOKEN`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_token: Option<String>,
}

impl Default for SocrataConfig {
    fn default() -> Self {
        Self {
            base_url: "https://datacatalog.cookcountyil.gov/resource".to_string(),
            datasets: DatasetIds::default(),
            page_size: 50_000,
            timeout: Duration::from_secs(30),
            disposition_timeout: Duration::from_secs(60),
            retry: RetryConfig::default(),
            app_token: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatsConfig {
    pub cache_max_entries: u64,
    /// `None` keeps entries until evicted by capacity.
    #[serde(with = "duration_str::option", skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<Duration>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            cache_max_entries: 1_024,
            cache_ttl: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    #[serde(with = "duration_str")]
    pub timeout: Duration,
    pub prompt_caching: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Overrides the provider's API key environment variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "anthropic".to_string(),
            model: "claude-sonnet-4-5-20250514".to_string(),
            max_tokens: 1_024,
            temperature: 0.2,
            timeout: Duration::from_secs(60),
            prompt_caching: true,
            base_url: None,
            api_key: None,
        }
    }
}

impl LlmConfig {
    pub fn completion_config(&self) -> CompletionConfig {
        CompletionConfig {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            timeout: self.timeout,
            prompt_caching: self.prompt_caching,
            ..CompletionConfig::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub max_sessions: usize,
    /// Messages kept per session; older ones are dropped first.
    pub max_messages: usize,
    /// Turns rendered into the pack's `chat_history`.
    pub history_turns: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_sessions: 500,
            max_messages: 200,
            history_turns: 12,
        }
    }
}

/// Serde adapter for `humantime` duration strings.
pub mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(raw.trim()).map_err(serde::de::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S: Serializer>(
            value: &Option<Duration>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(d) => super::serialize(d, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<Duration>, D::Error> {
            let raw: Option<String> = Option::deserialize(deserializer)?;
            raw.map(|r| humantime::parse_duration(r.trim()).map_err(serde::de::Error::custom))
                .transpose()
        }
    }
}
