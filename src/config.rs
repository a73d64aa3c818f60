//! Process configuration: environment variables and the servers file.
//!
//! `.env` is read once at startup (if present). The servers file is the
//! `mcpServers` JSON document; the well-known `google-maps` and `tavily`
//! servers get their API keys injected from the environment.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::inference::config::{LlmConfig, DEFAULT_BASE_URL, DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use crate::mcp_client::types::ServersConfig;

// ─── Constants ──────────────────────────────────────────────────────────────

pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
pub const GOOGLE_MAPS_API_KEY: &str = "GOOGLE_MAPS_API_KEY";
pub const TAVILY_API_KEY: &str = "TAVILY_API_KEY";
pub const MODEL_VAR: &str = "TOOLCHAT_MODEL";
pub const MAX_TOKENS_VAR: &str = "TOOLCHAT_MAX_TOKENS";
pub const BASE_URL_VAR: &str = "ANTHROPIC_BASE_URL";

/// Servers that receive an API key from the environment: (server, variable).
const INJECTED_KEYS: &[(&str, &str)] = &[
    ("google-maps", GOOGLE_MAPS_API_KEY),
    ("tavily", TAVILY_API_KEY),
];

// ─── Errors ─────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} is not set")]
    MissingVar { name: String },

    #[error("{name}='{value}' is invalid: {reason}")]
    InvalidVar {
        name: String,
        value: String,
        reason: String,
    },

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

// ─── AppConfig ──────────────────────────────────────────────────────────────

/// Environment-derived settings. Blank values count as unset.
#[derive(Clone, Default)]
pub struct AppConfig {
    pub anthropic_api_key: Option<String>,
    pub google_maps_api_key: Option<String>,
    pub tavily_api_key: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<String>,
    pub base_url: Option<String>,
}

impl AppConfig {
    /// Read `.env` (if any), then the process environment.
    pub fn load() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => tracing::info!(path = %path.display(), "loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => tracing::warn!(error = %e, "failed to load .env"),
        }
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            anthropic_api_key: get(ANTHROPIC_API_KEY),
            google_maps_api_key: get(GOOGLE_MAPS_API_KEY),
            tavily_api_key: get(TAVILY_API_KEY),
            model: get(MODEL_VAR),
            max_tokens: get(MAX_TOKENS_VAR),
            base_url: get(BASE_URL_VAR),
        }
    }

    /// Provider settings. Fails when the API key is missing.
    pub fn llm_config(&self) -> Result<LlmConfig, ConfigError> {
        let api_key = self
            .anthropic_api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingVar {
                name: ANTHROPIC_API_KEY.into(),
            })?;

        let max_tokens = match self.max_tokens.as_deref() {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or_else(|| ConfigError::InvalidVar {
                    name: MAX_TOKENS_VAR.into(),
                    value: raw.to_string(),
                    reason: "expected a positive integer".into(),
                })?,
            None => DEFAULT_MAX_TOKENS,
        };

        let mut config = LlmConfig::new(api_key);
        config.model = self.model.clone().unwrap_or_else(|| DEFAULT_MODEL.into());
        config.max_tokens = max_tokens;
        config.base_url = self
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.into());
        Ok(config)
    }

    fn injected_key(&self, var: &str) -> Option<&str> {
        match var {
            GOOGLE_MAPS_API_KEY => self.google_maps_api_key.as_deref(),
            TAVILY_API_KEY => self.tavily_api_key.as_deref(),
            _ => None,
        }
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let set = |v: &Option<String>| if v.is_some() { "<set>" } else { "<unset>" };
        f.debug_struct("AppConfig")
            .field("anthropic_api_key", &set(&self.anthropic_api_key))
            .field("google_maps_api_key", &set(&self.google_maps_api_key))
            .field("tavily_api_key", &set(&self.tavily_api_key))
            .field("model", &self.model)
            .field("max_tokens", &self.max_tokens)
            .field("base_url", &self.base_url)
            .finish()
    }
}

// ─── Servers File ───────────────────────────────────────────────────────────

/// Parse the `mcpServers` document at `path`.
pub fn load_servers_config(path: &Path) -> Result<ServersConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: ServersConfig =
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

    tracing::info!(
        path = %path.display(),
        servers = config.servers.len(),
        "loaded servers config"
    );
    Ok(config)
}

/// Add the environment's API key to each well-known server's `env`.
///
/// A missing key is a warning; the server still starts without it.
pub fn inject_api_keys(servers: &mut ServersConfig, app: &AppConfig) {
    for (server, var) in INJECTED_KEYS {
        let Some(entry) = servers.servers.get_mut(*server) else {
            continue;
        };
        match app.injected_key(var) {
            Some(key) => {
                entry.env.insert(var.to_string(), key.to_string());
            }
            None => {
                tracing::warn!(server = %server, var = %var, "API key not set, server may not work");
            }
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
