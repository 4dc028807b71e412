pub mod validation;

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::ProviderKind;

use self::validation::validate_config;

/// Error type for configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Runtime configuration.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeConfig {
    /// `Some(1)` selects the current-thread runtime; `None` lets Tokio size the pool.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_threads: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct RuntimeConfigWire {
    #[serde(default, deserialize_with = "deserialize_present")]
    worker_threads: Option<Option<usize>>,
}

/// Distinguish an explicit `null` (`Some(None)`) from a missing key (`None`).
fn deserialize_present<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    T::deserialize(deserializer).map(Some)
}

const DEFAULT_WORKER_THREADS: usize = 1;

impl<'de> Deserialize<'de> for RuntimeConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let wire = RuntimeConfigWire::deserialize(deserializer)?;
        // missing => Some(default), explicit null => None
        let worker_threads = wire.worker_threads.unwrap_or(Some(DEFAULT_WORKER_THREADS));
        Ok(Self { worker_threads })
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            worker_threads: Some(DEFAULT_WORKER_THREADS),
        }
    }
}

/// Outbound HTTP client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub api_url: String,
    pub api_key: String,
    #[serde(default)]
    pub provider: ProviderKind,
    /// Extra headers sent with every request; replaceable at runtime.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_pool_max_idle_per_host")]
    pub pool_max_idle_per_host: usize,
    #[serde(default)]
    pub use_env_proxy: bool,
    #[serde(default)]
    pub proxy: Option<String>,
}

fn default_connect_timeout_secs() -> u64 {
    10
}
fn default_pool_max_idle_per_host() -> usize {
    8
}

impl ClientConfig {
    #[must_use]
    pub fn new(api_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            api_key: api_key.into(),
            provider: ProviderKind::default(),
            headers: BTreeMap::new(),
            timeout_secs: None,
            connect_timeout_secs: default_connect_timeout_secs(),
            pool_max_idle_per_host: default_pool_max_idle_per_host(),
            use_env_proxy: false,
            proxy: None,
        }
    }

    #[must_use]
    pub fn with_provider(mut self, provider: ProviderKind) -> Self {
        self.provider = provider;
        self
    }
}

/// Base generation fields merged into every request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_true")]
    pub stream: bool,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_top_p")]
    pub top_p: f64,
    #[serde(default)]
    pub frequency_penalty: f64,
    #[serde(default)]
    pub presence_penalty: f64,
    /// Sent as `chatFlowId` when set.
    #[serde(default)]
    pub chat_flow_id: Option<String>,
    /// Additional free-form base fields.
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}
fn default_true() -> bool {
    true
}
fn default_temperature() -> f64 {
    0.6
}
fn default_top_p() -> f64 {
    1.0
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            stream: true,
            temperature: default_temperature(),
            top_p: default_top_p(),
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            chat_flow_id: None,
            extra: serde_json::Map::new(),
        }
    }
}

/// Inclusive bounds of the per-character typing delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingDelay {
    #[serde(default = "default_typing_min_ms")]
    pub min_ms: u64,
    #[serde(default = "default_typing_max_ms")]
    pub max_ms: u64,
}

fn default_typing_min_ms() -> u64 {
    10
}
fn default_typing_max_ms() -> u64 {
    20
}

impl Default for TypingDelay {
    fn default() -> Self {
        Self {
            min_ms: default_typing_min_ms(),
            max_ms: default_typing_max_ms(),
        }
    }
}

/// Inline reasoning markers split out of answer text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkTagsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_think_open")]
    pub open: String,
    #[serde(default = "default_think_close")]
    pub close: String,
}

fn default_think_open() -> String {
    "<think>".to_string()
}
fn default_think_close() -> String {
    "</think>".to_string()
}

impl Default for ThinkTagsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            open: default_think_open(),
            close: default_think_close(),
        }
    }
}

/// Chat engine behavior.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub typing_effect: bool,
    #[serde(default)]
    pub typing_delay: TypingDelay,
    #[serde(default)]
    pub think_tags: ThinkTagsConfig,
    /// Send the whole conversation instead of only the newest user message.
    #[serde(default)]
    pub include_history: bool,
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    1000
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            typing_effect: false,
            typing_delay: TypingDelay::default(),
            think_tags: ThinkTagsConfig::default(),
            include_history: false,
        }
    }
}

impl ChatConfig {
    #[must_use]
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// Session pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_max_concurrent_chats")]
    pub max_concurrent_chats: usize,
}

fn default_max_concurrent_chats() -> usize {
    3
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_chats: default_max_concurrent_chats(),
        }
    }
}

/// Log output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Feature flags and settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturesConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_log_level() -> String {
    "INFO".to_string()
}

impl Default for FeaturesConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    pub client: ClientConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub features: FeaturesConfig,
}

/// Load configuration from a YAML file and validate it.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] when reading the file fails, [`ConfigError::Yaml`]
/// when parsing fails, or [`ConfigError::Validation`] when semantic validation fails.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    parse_config(&contents)
}

/// Parse and validate configuration from YAML text.
///
/// # Errors
///
/// Returns [`ConfigError::Yaml`] when parsing fails or [`ConfigError::Validation`]
/// when semantic validation fails.
pub fn parse_config(contents: &str) -> Result<AppConfig, ConfigError> {
    let config: AppConfig = serde_yaml::from_str(contents)?;
    validate_config(&config)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_example_config() {
        // The example config should load and validate successfully
        let config = load_config("config.example.yaml");
        assert!(
            config.is_ok(),
            "Failed to load example config: {:?}",
            config.err()
        );
        let config = config.unwrap();
        assert_eq!(config.client.provider, ProviderKind::OpenAi);
        assert_eq!(config.chat.max_retries, 3);
        assert_eq!(config.sessions.max_concurrent_chats, 3);
        assert_eq!(config.runtime.worker_threads, Some(1));
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = parse_config(
            "client:\n  api_url: http://127.0.0.1:11434/api/generate\n  api_key: local\n  provider: ollama\n",
        )
        .unwrap();
        assert_eq!(config.client.provider, ProviderKind::Ollama);
        assert_eq!(config.client.connect_timeout_secs, 10);
        assert!(config.client.timeout_secs.is_none());
        assert_eq!(config.generation.model, "gpt-4o");
        assert!((config.generation.temperature - 0.6).abs() < f64::EPSILON);
        assert!(config.generation.stream);
        assert_eq!(config.chat.retry_delay(), Duration::from_millis(1000));
        assert_eq!(config.chat.typing_delay, TypingDelay { min_ms: 10, max_ms: 20 });
        assert!(!config.chat.typing_effect);
        assert!(!config.chat.think_tags.enabled);
        assert_eq!(config.features.log_format, LogFormat::Text);
    }

    #[test]
    fn test_runtime_worker_threads_null_means_auto() {
        let config = parse_config(
            "runtime:\n  worker_threads: null\nclient:\n  api_url: https://example.com\n  api_key: k\n",
        )
        .unwrap();
        assert_eq!(config.runtime.worker_threads, None);
    }

    #[test]
    fn test_missing_client_is_yaml_error() {
        let err = parse_config("chat:\n  max_retries: 1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Yaml(_)));
    }
}
