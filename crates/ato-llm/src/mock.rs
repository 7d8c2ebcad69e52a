//! Deterministic scripted provider for tests.

use crate::provider::{LlmProvider, ProviderError};
use crate::types::{ChatMessage, ChatResponse, ToolCall, ToolSchema, Usage};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

/// Captured arguments of one `chat` call.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSchema>,
    pub model: Option<String>,
}

/// A pre-scripted provider. Each `chat` call pops the next response from
/// the front of the queue, so tests can specify exact turn sequences —
/// including tool calls — without network access.
///
/// Every request is recorded and can be inspected through [`requests`] /
/// [`last_request`] after the fact.
///
/// [`requests`]: ScriptedProvider::requests
/// [`last_request`]: ScriptedProvider::last_request
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    scripts: Arc<Mutex<VecDeque<ChatResponse>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<ChatResponse>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Provider that answers every call with the same text.
    pub fn always_text(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        let mut scripts = VecDeque::new();
        for _ in 0..64 {
            scripts.push_back(response_with_usage(ChatResponse::text(reply.clone())));
        }
        Self {
            scripts: Arc::new(Mutex::new(scripts)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue one more scripted response.
    pub fn push(&self, response: ChatResponse) {
        self.scripts.lock().unwrap().push_back(response);
    }

    /// A response consisting of a single tool call.
    pub fn tool_call_response(name: &str, arguments: serde_json::Value) -> ChatResponse {
        response_with_usage(ChatResponse {
            tool_calls: vec![ToolCall {
                id: format!("call_{name}"),
                name: name.to_string(),
                arguments,
            }],
            ..Default::default()
        })
    }

    /// A plain text response with nominal usage numbers.
    pub fn text_response(content: impl Into<String>) -> ChatResponse {
        response_with_usage(ChatResponse::text(content))
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last_request(&self) -> Option<RecordedRequest> {
        self.requests.lock().unwrap().last().cloned()
    }

    /// Number of `chat` calls made so far.
    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

fn response_with_usage(mut response: ChatResponse) -> ChatResponse {
    if response.usage == Usage::default() {
        response.usage = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
        };
    }
    response
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted-mock"
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolSchema],
        _api_key: &str,
        model: Option<&str>,
    ) -> Result<ChatResponse, ProviderError> {
        self.requests.lock().unwrap().push(RecordedRequest {
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            model: model.map(str::to_string),
        });
        let next = self.scripts.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| ChatResponse::text("[script exhausted]")))
    }
}

/// Provider that fails every call; used to exercise error paths.
pub struct FailingProvider;

#[async_trait]
impl LlmProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing-mock"
    }

    async fn chat(
        &self,
        _messages: &[ChatMessage],
        _tools: &[ToolSchema],
        _api_key: &str,
        _model: Option<&str>,
    ) -> Result<ChatResponse, ProviderError> {
        Err(ProviderError::Api {
            status: 500,
            body: "scripted failure".to_string(),
        })
    }
}
