//! OpenAI `chat/completions` wire — shared by `openai` and `ollama`.

use crate::provider::{LlmProvider, ProviderError};
use crate::types::{ChatMessage, ChatResponse, ToolCall, ToolSchema, Usage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const OPENAI_BASE: &str = "https://api.openai.com/v1";
const OLLAMA_BASE: &str = "http://localhost:11434/v1";
const REQUEST_TIMEOUT_SECS: u64 = 120;

// --- Raw wire shapes (serde only) ---

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
}

#[derive(Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    type_: &'static str,
    function: WireFunction<'a>,
}

#[derive(Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct WireResponse {
    choices: Option<Vec<WireChoice>>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct WireChoice {
    message: Option<WireMessage>,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    content: Option<String>,
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Deserialize)]
struct WireToolCall {
    id: String,
    function: WireToolCallFunction,
}

#[derive(Deserialize)]
struct WireToolCallFunction {
    name: String,
    /// Arguments arrive as a JSON-encoded string on this wire.
    arguments: String,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
}

/// Map the neutral tool schemas onto the function-calling wire shape.
fn wire_tools<'a>(tools: &'a [ToolSchema]) -> Option<Vec<WireTool<'a>>> {
    if tools.is_empty() {
        return None;
    }
    Some(
        tools
            .iter()
            .map(|t| WireTool {
                type_: "function",
                function: WireFunction {
                    name: &t.name,
                    description: &t.description,
                    parameters: &t.parameters,
                },
            })
            .collect(),
    )
}

/// Decode the wire response into the neutral [`ChatResponse`].
///
/// An empty `choices` array yields an empty response rather than an error.
fn decode_response(wire: WireResponse) -> Result<ChatResponse, ProviderError> {
    let usage = wire
        .usage
        .map(|u| Usage {
            prompt_tokens: u.prompt_tokens.unwrap_or(0),
            completion_tokens: u.completion_tokens.unwrap_or(0),
        })
        .unwrap_or_default();

    let Some(choice) = wire.choices.and_then(|mut c| {
        if c.is_empty() { None } else { Some(c.remove(0)) }
    }) else {
        return Ok(ChatResponse {
            usage,
            ..Default::default()
        });
    };

    let mut tool_calls = Vec::new();
    let mut content = String::new();
    if let Some(message) = choice.message {
        content = message.content.unwrap_or_default();
        for tc in message.tool_calls.unwrap_or_default() {
            let arguments: serde_json::Value = if tc.function.arguments.trim().is_empty() {
                serde_json::json!({})
            } else {
                serde_json::from_str(&tc.function.arguments).map_err(|e| {
                    ProviderError::Decode(format!(
                        "tool call {} arguments are not valid JSON: {e}",
                        tc.id
                    ))
                })?
            };
            tool_calls.push(ToolCall {
                id: tc.id,
                name: tc.function.name,
                arguments,
            });
        }
    }

    Ok(ChatResponse {
        content,
        tool_calls,
        usage,
        stop_reason: choice.finish_reason,
    })
}

/// Provider speaking the OpenAI chat-completions wire.
pub struct OpenAiProvider {
    name: &'static str,
    base_url: String,
    default_model: &'static str,
    client: reqwest::Client,
}

impl OpenAiProvider {
    fn new(
        name: &'static str,
        base_url: impl Into<String>,
        default_model: &'static str,
    ) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            name,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model,
            client,
        })
    }

    pub fn openai() -> Result<Self, ProviderError> {
        Self::new("openai", OPENAI_BASE, "gpt-4o")
    }

    /// Ollama serves the same wire locally; no API key is required.
    pub fn ollama() -> Result<Self, ProviderError> {
        Self::new("ollama", OLLAMA_BASE, "llama3.2")
    }

    /// Custom-endpoint constructor for OpenAI-compatible servers.
    pub fn with_base_url(
        name: &'static str,
        base_url: impl Into<String>,
        default_model: &'static str,
    ) -> Result<Self, ProviderError> {
        Self::new(name, base_url, default_model)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        self.name
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        api_key: &str,
        model: Option<&str>,
    ) -> Result<ChatResponse, ProviderError> {
        let model = model.unwrap_or(self.default_model);
        let body = WireRequest {
            model,
            messages,
            tools: wire_tools(tools),
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!(provider = self.name, model, url = %url, "chat request");

        let mut request = self.client.post(&url).json(&body);
        if !api_key.is_empty() {
            request = request.bearer_auth(api_key);
        }
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        decode_response(wire)
    }
}
