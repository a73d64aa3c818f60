//! LLM connection settings.
//!
//! Built by [`crate::config::AppConfig::llm_config`] from the environment.

use std::fmt;
use std::time::Duration;

use super::errors::InferenceError;

/// Default model when `TOOLCHAT_MODEL` is unset.
pub const DEFAULT_MODEL: &str = "claude-3-5-haiku-latest";

/// Default response budget when `TOOLCHAT_MAX_TOKENS` is unset.
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Default API root when `ANTHROPIC_BASE_URL` is unset.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";

/// Messages API version header value.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Total request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Settings for one provider endpoint.
#[derive(Clone)]
pub struct LlmConfig {
    pub api_key: String,
    pub model: String,
    pub max_tokens: u32,
    pub base_url: String,
    pub request_timeout: Duration,
}

impl LlmConfig {
    /// Settings with every optional field at its default.
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: DEFAULT_MODEL.to_string(),
            max_tokens: DEFAULT_MAX_TOKENS,
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// Reject settings the provider would refuse anyway.
    pub fn validate(&self) -> Result<(), InferenceError> {
        if self.api_key.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "API key is empty".into(),
            });
        }
        if self.model.trim().is_empty() {
            return Err(InferenceError::ConfigError {
                reason: "model name is empty".into(),
            });
        }
        if self.max_tokens == 0 {
            return Err(InferenceError::ConfigError {
                reason: "max_tokens must be greater than zero".into(),
            });
        }
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(InferenceError::ConfigError {
                reason: format!("base URL '{}' is not an http(s) URL", self.base_url),
            });
        }
        Ok(())
    }

    /// `{base_url}/messages`, tolerating a trailing slash on the base.
    pub fn messages_url(&self) -> String {
        format!("{}/messages", self.base_url.trim_end_matches('/'))
    }
}

impl fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("base_url", &self.base_url)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LlmConfig::new("sk-ant-test");
        assert_eq!(config.model, DEFAULT_MODEL);
        assert_eq!(config.max_tokens, 4096);
        assert_eq!(config.messages_url(), "https://api.anthropic.com/v1/messages");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_messages_url_trailing_slash() {
        let mut config = LlmConfig::new("k");
        config.base_url = "http://localhost:8080/v1/".into();
        assert_eq!(config.messages_url(), "http://localhost:8080/v1/messages");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = LlmConfig::new("  ");
        assert!(config.validate().is_err());

        config = LlmConfig::new("k");
        config.max_tokens = 0;
        assert!(config.validate().is_err());

        config = LlmConfig::new("k");
        config.base_url = "api.anthropic.com".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let config = LlmConfig::new("sk-ant-secret");
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-ant-secret"));
        assert!(debug.contains("<redacted>"));
    }
}
