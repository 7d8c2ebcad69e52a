//! Anthropic `v1/messages` wire — shared by `anthropic` and `kimi`.
//!
//! Differences from the chat-completions wire that this module absorbs:
//! the system prompt travels as a top-level field, the conversation must
//! start with a user turn, tool schemas are called `input_schema`, and tool
//! calls come back as `tool_use` content blocks.

use crate::provider::{LlmProvider, ProviderError};
use crate::types::{ChatMessage, ChatResponse, Role, ToolCall, ToolSchema, Usage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const ANTHROPIC_BASE: &str = "https://api.anthropic.com";
const KIMI_BASE: &str = "https://api.moonshot.cn/anthropic";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u64 = 4096;
const REQUEST_TIMEOUT_SECS: u64 = 120;

// --- Raw wire shapes (serde only) ---

#[derive(Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    max_tokens: u64,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<WireTool<'a>>>,
}

#[derive(Serialize)]
struct WireMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct WireTool<'a> {
    name: &'a str,
    description: &'a str,
    input_schema: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct WireResponse {
    content: Vec<WireBlock>,
    usage: Option<WireUsage>,
    stop_reason: Option<String>,
}

#[derive(Deserialize)]
#[serde(tag = "type")]
enum WireBlock {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_use")]
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    #[serde(other)]
    Other,
}

#[derive(Deserialize)]
struct WireUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

/// Split the neutral message list into (system prompt, wire messages),
/// forcing the conversation to open with a user turn.
fn wire_messages(messages: &[ChatMessage]) -> (Option<String>, Vec<WireMessage>) {
    let mut system = None;
    let mut wire: Vec<WireMessage> = Vec::with_capacity(messages.len());
    for m in messages {
        match m.role {
            Role::System => system = Some(m.content.clone()),
            Role::User => wire.push(WireMessage {
                role: "user",
                content: m.content.clone(),
            }),
            Role::Assistant => wire.push(WireMessage {
                role: "assistant",
                content: m.content.clone(),
            }),
        }
    }
    if wire.first().is_none_or(|m| m.role != "user") {
        wire.insert(
            0,
            WireMessage {
                role: "user",
                content: "Begin.".to_string(),
            },
        );
    }
    (system, wire)
}

fn decode_response(wire: WireResponse) -> ChatResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();
    for block in wire.content {
        match block {
            WireBlock::Text { text } => content.push_str(&text),
            WireBlock::ToolUse { id, name, input } => tool_calls.push(ToolCall {
                id,
                name,
                arguments: input,
            }),
            WireBlock::Other => {}
        }
    }
    let usage = wire
        .usage
        .map(|u| Usage {
            prompt_tokens: u.input_tokens.unwrap_or(0),
            completion_tokens: u.output_tokens.unwrap_or(0),
        })
        .unwrap_or_default();
    ChatResponse {
        content,
        tool_calls,
        usage,
        stop_reason: wire.stop_reason,
    }
}

/// Provider speaking the Anthropic messages wire.
pub struct AnthropicProvider {
    name: &'static str,
    base_url: String,
    default_model: &'static str,
    client: reqwest::Client,
}

impl AnthropicProvider {
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

    pub fn anthropic() -> Result<Self, ProviderError> {
        Self::new("anthropic", ANTHROPIC_BASE, "claude-sonnet-4-6-20250514")
    }

    /// Moonshot's Kimi models behind their Anthropic-compatible endpoint.
    pub fn kimi() -> Result<Self, ProviderError> {
        Self::new("kimi", KIMI_BASE, "kimi-k2-0905-preview")
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
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
        let (system, wire_msgs) = wire_messages(messages);
        let wire_tools: Option<Vec<WireTool>> = if tools.is_empty() {
            None
        } else {
            Some(
                tools
                    .iter()
                    .map(|t| WireTool {
                        name: &t.name,
                        description: &t.description,
                        input_schema: &t.parameters,
                    })
                    .collect(),
            )
        };
        let body = WireRequest {
            model,
            max_tokens: MAX_TOKENS,
            messages: wire_msgs,
            system,
            tools: wire_tools,
        };

        let url = format!("{}/v1/messages", self.base_url);
        debug!(provider = self.name, model, url = %url, "chat request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;

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
        Ok(decode_response(wire))
    }
}
