//! The provider trait and the name-based factory

use crate::types::{ChatMessage, ChatResponse, ToolSchema};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Errors surfaced by providers.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transport-level failure (connect, timeout, TLS).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response from the API.
    #[error("api error (status {status}): {body}")]
    Api { status: u16, body: String },

    /// The response body did not match the expected wire shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// `provider_for` was asked for a name it does not know.
    #[error("unknown provider: {0} (available: anthropic, openai, kimi, ollama)")]
    UnknownProvider(String),
}

/// Contract every concrete provider implements.
///
/// One call, no streaming: the whole conversation goes in, one assistant
/// turn (text and/or tool calls) comes out. Keys are passed per call so a
/// single provider instance can serve every agent in a session.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Provider name for logs and status display.
    fn name(&self) -> &str;

    /// Send a chat request and return the standardized response.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        api_key: &str,
        model: Option<&str>,
    ) -> Result<ChatResponse, ProviderError>;
}

/// Return a provider instance for the given name.
pub fn provider_for(name: &str) -> Result<Arc<dyn LlmProvider>, ProviderError> {
    match name.to_ascii_lowercase().as_str() {
        "anthropic" => Ok(Arc::new(crate::anthropic::AnthropicProvider::anthropic()?)),
        "kimi" => Ok(Arc::new(crate::anthropic::AnthropicProvider::kimi()?)),
        "openai" => Ok(Arc::new(crate::openai::OpenAiProvider::openai()?)),
        "ollama" => Ok(Arc::new(crate::openai::OpenAiProvider::ollama()?)),
        other => Err(ProviderError::UnknownProvider(other.to_string())),
    }
}
