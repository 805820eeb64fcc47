//! AnthropicProvider -- concrete [`LlmProvider`] implementation for Anthropic Claude.
//!
//! Sends requests to the Anthropic Messages API (`/v1/messages`) with
//! proper authentication headers. Supports both non-streaming (`complete`)
//! and streaming (`stream`) modes.
//!
//! The API key is wrapped in [`secrecy::SecretString`] and is never logged
//! or included in `Debug` output.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use hive_core::llm::provider::{LlmProvider, LlmStream};
use hive_types::llm::{CompletionRequest, CompletionResponse, LlmError};

use super::streaming::{create_anthropic_stream, error_from_payload};
use super::types::{
    AnthropicContentBlock, AnthropicNonStreamResponse, AnthropicRequest, ErrorPayload,
    parse_stop_reason,
};

/// The Anthropic API version header value.
pub(crate) const API_VERSION: &str = "2023-06-01";

/// Beta features requested on every call.
pub(crate) const BETA_FEATURES: &str = "extended-cache-ttl-2025-04-11";

/// Default API origin.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Output budget used when a request leaves `max_tokens` unset.
pub const DEFAULT_MAX_TOKENS: u32 = 8096;

/// Error bodies are truncated to this many bytes.
const MAX_ERROR_BODY: usize = 4096;

/// Anthropic Claude LLM provider.
///
/// # API Key Security
///
/// The API key is stored as a [`SecretString`] and is only exposed when
/// constructing HTTP request headers. It never appears in Debug output,
/// Display output, or tracing logs.
pub struct AnthropicProvider {
    client: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    default_max_tokens: u32,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: SecretString) -> Result<Self, LlmError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(|e| LlmError::Provider {
                message: format!("failed to create HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            default_max_tokens: DEFAULT_MAX_TOKENS,
        })
    }

    /// Override the base URL (useful for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_default_max_tokens(mut self, max_tokens: u32) -> Self {
        self.default_max_tokens = max_tokens;
        self
    }

    /// Build the full API URL for a given path.
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Convert a generic [`CompletionRequest`] into an [`AnthropicRequest`].
    fn to_anthropic_request(&self, request: &CompletionRequest, stream: bool) -> AnthropicRequest {
        AnthropicRequest {
            model: normalize_model(&request.model).to_string(),
            max_tokens: request.max_tokens.unwrap_or(self.default_max_tokens),
            messages: request.messages.clone(),
            system: request.system.clone().filter(|s| !s.is_empty()),
            tools: request.tools.clone(),
            stream,
        }
    }
}

/// Strip the `anthropic/` provider prefix from a model ID.
pub fn normalize_model(model: &str) -> &str {
    model.strip_prefix("anthropic/").unwrap_or(model)
}

/// Turn a non-2xx response into an [`LlmError`], reading at most
/// [`MAX_ERROR_BODY`] bytes of its body.
pub(crate) async fn error_from_response(response: reqwest::Response) -> LlmError {
    let status = response.status();
    let retry_after_ms = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(|secs| secs * 1000);
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    tracing::warn!(status = %status, body = %body, "Anthropic API error response");
    error_from_status(status.as_u16(), retry_after_ms, body)
}

fn error_from_status(status: u16, retry_after_ms: Option<u64>, body: String) -> LlmError {
    match status {
        401 | 403 => LlmError::AuthenticationFailed,
        429 => LlmError::RateLimited { retry_after_ms },
        529 => LlmError::Overloaded(body),
        _ => match serde_json::from_str::<ErrorPayload>(&body) {
            Ok(payload) if status == 400 => error_from_payload(payload),
            _ => LlmError::Provider {
                message: format!("HTTP {status}: {body}"),
            },
        },
    }
}

// No Debug impl: the struct holds the API key.

impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let body = self.to_anthropic_request(request, false);
        let url = self.url("/v1/messages");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .header("anthropic-beta", BETA_FEATURES)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Provider {
                message: format!("HTTP request failed: {e}"),
            })?;

        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }

        let anthropic_resp: AnthropicNonStreamResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Deserialization(format!("failed to parse response: {e}")))?;

        let content = anthropic_resp
            .content
            .iter()
            .filter_map(|block| match block {
                AnthropicContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<String>();

        Ok(CompletionResponse {
            id: anthropic_resp.id,
            content,
            model: anthropic_resp.model,
            stop_reason: parse_stop_reason(anthropic_resp.stop_reason.as_deref()),
            usage: anthropic_resp.usage.into(),
        })
    }

    fn stream(&self, request: CompletionRequest) -> LlmStream {
        let body = self.to_anthropic_request(&request, true);
        let url = self.url("/v1/messages");
        create_anthropic_stream(&self.client, &url, body, &self.api_key)
    }
}
