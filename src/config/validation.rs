use http::header::{HeaderName, HeaderValue};

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_runtime_config(config)?;
    validate_client_config(config)?;
    validate_chat_config(config)?;
    validate_sessions_config(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_runtime_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.runtime.worker_threads == Some(0) {
        return Err(validation_err(
            "runtime.worker_threads must be greater than 0 when set",
        ));
    }
    Ok(())
}

fn validate_client_config(config: &AppConfig) -> Result<(), ConfigError> {
    let client = &config.client;
    let api_url = url::Url::parse(client.api_url.trim())
        .map_err(|err| validation_err(format!("client.api_url is not a valid URL: {err}")))?;
    if !matches!(api_url.scheme(), "http" | "https") {
        return Err(validation_err(
            "client.api_url must start with http:// or https://",
        ));
    }
    if client.api_key.trim().is_empty() {
        return Err(validation_err("client.api_key cannot be empty"));
    }
    if client.pool_max_idle_per_host == 0 {
        return Err(validation_err(
            "client.pool_max_idle_per_host must be greater than 0",
        ));
    }
    if client.timeout_secs == Some(0) {
        return Err(validation_err(
            "client.timeout_secs must be greater than 0 when set",
        ));
    }
    for (name, value) in &client.headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(validation_err(format!(
                "client.headers: '{name}' is not a valid header name"
            )));
        }
        if HeaderValue::from_str(value).is_err() {
            return Err(validation_err(format!(
                "client.headers: value for '{name}' is not a valid header value"
            )));
        }
    }
    validate_proxy_url("proxy", client.proxy.as_deref())
}

fn validate_proxy_url(field_name: &str, proxy: Option<&str>) -> Result<(), ConfigError> {
    let Some(proxy) = proxy.map(str::trim) else {
        return Ok(());
    };
    if proxy.is_empty() {
        return Err(validation_err(format!(
            "client.{field_name} cannot be empty when set"
        )));
    }
    let parsed = url::Url::parse(proxy).map_err(|err| {
        validation_err(format!("client.{field_name} is not a valid URL: {err}"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "client.{field_name} must use http:// or https://"
        )));
    }
    Ok(())
}

fn validate_chat_config(config: &AppConfig) -> Result<(), ConfigError> {
    let chat = &config.chat;
    if chat.typing_delay.min_ms > chat.typing_delay.max_ms {
        return Err(validation_err(format!(
            "chat.typing_delay.min_ms ({}) must not exceed max_ms ({})",
            chat.typing_delay.min_ms, chat.typing_delay.max_ms
        )));
    }
    if chat.think_tags.enabled {
        let tags = &chat.think_tags;
        if tags.open.is_empty() || tags.close.is_empty() {
            return Err(validation_err(
                "chat.think_tags.open and close cannot be empty",
            ));
        }
        if tags.open == tags.close {
            return Err(validation_err(
                "chat.think_tags.open and close must differ",
            ));
        }
    }
    Ok(())
}

fn validate_sessions_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.sessions.max_concurrent_chats == 0 {
        return Err(validation_err(
            "sessions.max_concurrent_chats must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let valid_levels = ["DEBUG", "INFO", "WARNING", "ERROR", "CRITICAL", "DISABLED"];
    if !valid_levels.contains(&config.features.log_level.to_uppercase().as_str()) {
        return Err(validation_err(format!(
            "log_level must be one of {valid_levels:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;

    fn make_valid_config() -> AppConfig {
        AppConfig {
            runtime: RuntimeConfig::default(),
            client: ClientConfig::new("https://api.openai.com/v1/chat/completions", "sk-test"),
            generation: GenerationConfig::default(),
            chat: ChatConfig::default(),
            sessions: SessionsConfig::default(),
            features: FeaturesConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = make_valid_config();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_api_url() {
        let mut config = make_valid_config();
        config.client.api_url = "ftp://example.com".to_string();
        assert!(validate_config(&config).is_err());
        config.client.api_url = "not a url".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_empty_api_key() {
        let mut config = make_valid_config();
        config.client.api_key = "  ".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_header_name() {
        let mut config = make_valid_config();
        config
            .client
            .headers
            .insert("bad header".to_string(), "v".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_invalid_header_value() {
        let mut config = make_valid_config();
        config
            .client
            .headers
            .insert("x-token".to_string(), "line\nbreak".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_typing_delay_bounds() {
        let mut config = make_valid_config();
        config.chat.typing_delay = TypingDelay { min_ms: 30, max_ms: 20 };
        assert!(validate_config(&config).is_err());
        config.chat.typing_delay = TypingDelay { min_ms: 20, max_ms: 20 };
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_think_tags_must_differ() {
        let mut config = make_valid_config();
        config.chat.think_tags = ThinkTagsConfig {
            enabled: true,
            open: "|".to_string(),
            close: "|".to_string(),
        };
        assert!(validate_config(&config).is_err());
        config.chat.think_tags.enabled = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_capacity() {
        let mut config = make_valid_config();
        config.sessions.max_concurrent_chats = 0;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_worker_threads() {
        let mut config = make_valid_config();
        config.runtime.worker_threads = Some(0);
        assert!(validate_config(&config).is_err());
        config.runtime.worker_threads = None;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_log_level() {
        let mut config = make_valid_config();
        config.features.log_level = "VERBOSE".to_string();
        assert!(validate_config(&config).is_err());
        config.features.log_level = "warning".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_invalid_proxy_url() {
        let mut config = make_valid_config();
        config.client.proxy = Some("not a url".to_string());
        assert!(validate_config(&config).is_err());
        config.client.proxy = Some("http://127.0.0.1:8080".to_string());
        assert!(validate_config(&config).is_ok());
    }
}
