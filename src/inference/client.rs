//! Anthropic Messages API client.
//!
//! Stateless: every call sends the full message list it is given. The client
//! estimates the request's token count before sending and logs the provider's
//! reported usage after. Nothing is retried here.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;

use super::config::{LlmConfig, ANTHROPIC_VERSION};
use super::errors::InferenceError;
use super::types::{ApiErrorBody, ChatResponse, MessagesRequest, ToolDefinition, WireMessage};
use crate::agent_core::tokens::{estimate_request, HeuristicEstimator, TokenEstimator};

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

// ─── ChatProvider ────────────────────────────────────────────────────────────

/// A model that answers a message list.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    async fn get_response(
        &self,
        messages: &[WireMessage],
        tools: Option<&[ToolDefinition]>,
        system_prompt: Option<&str>,
    ) -> Result<ChatResponse, InferenceError>;
}

// ─── LlmClient ───────────────────────────────────────────────────────────────

/// HTTP client for the Messages endpoint.
pub struct LlmClient {
    http: HttpClient,
    config: LlmConfig,
    estimator: Box<dyn TokenEstimator>,
}

impl LlmClient {
    /// Create a client. Does NOT check connectivity; that happens on the first request.
    pub fn new(config: LlmConfig) -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: config.base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Self::with_http_client(config, http)
    }

    pub(crate) fn with_http_client(
        config: LlmConfig,
        http: HttpClient,
    ) -> Result<Self, InferenceError> {
        config.validate()?;
        Ok(Self {
            http,
            config,
            estimator: Box::new(HeuristicEstimator),
        })
    }

    /// Replace the token estimator used for request logging.
    pub fn with_estimator(mut self, estimator: Box<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// The configured model name.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn map_send_error(&self, url: &str, e: reqwest::Error) -> InferenceError {
        if e.is_timeout() {
            InferenceError::Timeout {
                duration_secs: self.config.request_timeout.as_secs(),
            }
        } else {
            InferenceError::ConnectionFailed {
                endpoint: url.to_string(),
                reason: e.to_string(),
            }
        }
    }
}

#[async_trait]
impl ChatProvider for LlmClient {
    async fn get_response(
        &self,
        messages: &[WireMessage],
        tools: Option<&[ToolDefinition]>,
        system_prompt: Option<&str>,
    ) -> Result<ChatResponse, InferenceError> {
        let url = self.config.messages_url();

        match estimate_request(self.estimator.as_ref(), messages, tools, system_prompt) {
            Some(estimate) => tracing::info!(
                model = %self.config.model,
                message_count = messages.len(),
                tool_count = tools.map(|t| t.len()).unwrap_or(0),
                system_tokens = estimate.system,
                tool_tokens = estimate.tools,
                message_tokens = estimate.messages,
                estimated_input_tokens = estimate.total(),
                "=== LLM REQUEST ==="
            ),
            None => tracing::info!(
                model = %self.config.model,
                message_count = messages.len(),
                tool_count = tools.map(|t| t.len()).unwrap_or(0),
                "=== LLM REQUEST === (token estimate unavailable)"
            ),
        }

        let body = MessagesRequest {
            model: &self.config.model,
            max_tokens: self.config.max_tokens,
            messages,
            tools,
            system: system_prompt,
        };

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(&url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ApiErrorBody>(&body_text)
                .map(|b| format!("{}: {}", b.error.r#type, b.error.message))
                .unwrap_or_else(|_| body_text.clone());
            tracing::warn!(status = status.as_u16(), error = %message, "LLM request failed");
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let parsed: ChatResponse =
            response
                .json()
                .await
                .map_err(|e| InferenceError::ResponseParse {
                    reason: e.to_string(),
                })?;

        match parsed.usage {
            Some(usage) => tracing::info!(
                input_tokens = usage.input_tokens,
                output_tokens = usage.output_tokens,
                stop_reason = parsed.stop_reason.as_deref().unwrap_or("unknown"),
                "=== LLM RESPONSE ==="
            ),
            None => tracing::info!(
                stop_reason = parsed.stop_reason.as_deref().unwrap_or("unknown"),
                "=== LLM RESPONSE === (no usage reported)"
            ),
        }

        Ok(parsed)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
