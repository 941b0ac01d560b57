//! LLM Oracle Module
//!
//! Text-in/text-out completion against an OpenAI-compatible API.
//! Several pipeline stages consult the oracle with different prompts and
//! temperatures: intent classification (near zero), SQL generation (low),
//! conversation and narration (higher).

mod client;

pub use client::{LlmClient, LlmError};

use async_trait::async_trait;

/// The oracle seam: one operation, prompt in, completion text out.
/// Lets callers be written against the contract rather than the HTTP
/// client when a stub is needed.
#[async_trait]
pub trait LlmOracle: Send + Sync {
    async fn complete(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
        stop: Option<Vec<String>>,
    ) -> Result<String, LlmError>;
}

#[async_trait]
impl LlmOracle for LlmClient {
    async fn complete(
        &self,
        prompt: &str,
        temperature: f64,
        max_tokens: u32,
        stop: Option<Vec<String>>,
    ) -> Result<String, LlmError> {
        LlmClient::complete(self, prompt, temperature, max_tokens, stop).await
    }
}
