//! LLM Client - HTTP client for OpenAI-compatible APIs
//!
//! Uses reqwest to call chat-completion endpoints. Compatible with:
//! - OpenAI
//! - Groq
//! - DeepSeek
//! - Self-hosted OpenAI-compatible gateways
//!
//! Transient upstream failures (gateway-class statuses, timeouts, network
//! drops) are retried with exponential backoff; client errors are not.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::LlmConfig;

/// Seconds before the first retry; doubles each attempt
const RETRY_BASE_DELAY_SECS: u64 = 2;

/// LLM oracle errors
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("LLM API key not configured")]
    ApiKeyMissing,

    #[error("LLM API error: {0}")]
    ApiError(String),

    #[error("LLM response parsing error: {0}")]
    ParseError(String),

    #[error("LLM timeout after {0}s")]
    Timeout(u64),

    #[error("LLM rate limited, retry after {0}s")]
    RateLimited(u64),

    #[error("LLM endpoint unavailable: {0}")]
    Unavailable(String),
}

impl LlmError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_) | Self::Unavailable(_))
    }
}

/// LLM HTTP Client
pub struct LlmClient {
    http_client: Client,
    config: LlmConfig,
}

impl LlmClient {
    pub fn new(config: LlmConfig) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { http_client, config }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Default temperature for deterministic callers (classification, SQL)
    pub fn sql_temperature(&self) -> f64 {
        self.config.sql_temperature
    }

    /// Default temperature for conversational callers
    pub fn chat_temperature(&self) -> f64 {
        self.config.chat_temperature
    }

    /// Call the chat completion API and return the raw completion text.
    ///
    /// Retries on 502/503/504, request timeouts and connection errors up to
    /// the configured attempt count with exponential backoff. 429 responses
    /// surface as `RateLimited` without retrying.
    pub async fn complete(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
        stop: Option<Vec<String>>,
    ) -> Result<String, LlmError> {
        let api_key = self.config.api_key.as_ref().ok_or(LlmError::ApiKeyMissing)?;

        let chat_request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage { role: "user".to_string(), content: prompt.to_string() }],
            max_tokens: Some(max_tokens),
            temperature: Some(temperature),
            top_p: Some(0.9),
            stop,
        };

        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let max_attempts = self.config.max_retries.max(1);
        let mut last_err = LlmError::Unavailable("no attempts made".to_string());

        for attempt in 0..max_attempts {
            if attempt > 0 {
                let wait = Duration::from_secs(RETRY_BASE_DELAY_SECS << (attempt - 1));
                tracing::warn!(
                    "LLM call retry {}/{} after {:?}: {}",
                    attempt + 1,
                    max_attempts,
                    wait,
                    last_err
                );
                tokio::time::sleep(wait).await;
            }

            match self.try_complete(&url, api_key, &chat_request).await {
                Ok(text) => return Ok(text),
                Err(err) if err.is_retryable() => last_err = err,
                Err(err) => return Err(err),
            }
        }

        Err(last_err)
    }

    async fn try_complete(
        &self,
        url: &str,
        api_key: &str,
        request: &ChatCompletionRequest,
    ) -> Result<String, LlmError> {
        tracing::debug!("Calling LLM API: {} with model {}", url, request.model);

        let response = self
            .http_client
            .post(url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout(self.config.timeout_secs)
                } else if e.is_connect() {
                    LlmError::Unavailable(format!("Connection failed: {}", e))
                } else {
                    LlmError::ApiError(e.to_string())
                }
            })?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(60);
            return Err(LlmError::RateLimited(retry_after));
        }

        // Gateway-class errors are transient; everything else non-2xx is final
        if matches!(status.as_u16(), 502 | 503 | 504) {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::Unavailable(format!("status {}: {}", status, error_text)));
        }

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(LlmError::ApiError(format!("API error {}: {}", status, error_text)));
        }

        let chat_response: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| LlmError::ParseError(e.to_string()))?;

        extract_content(&chat_response)
            .ok_or_else(|| LlmError::ParseError("Empty response from LLM".to_string()))
    }
}

/// Pull completion text out of either response shape:
/// chat (`choices[0].message.content`) or legacy (`choices[0].text`).
fn extract_content(response: &ChatCompletionResponse) -> Option<String> {
    let choice = response.choices.first()?;
    if let Some(message) = &choice.message
        && let Some(content) = &message.content
    {
        return Some(content.clone());
    }
    choice.text.clone()
}

// ============================================================================
// OpenAI API Request/Response Types
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    #[serde(default)]
    message: Option<ResponseMessage>,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}
