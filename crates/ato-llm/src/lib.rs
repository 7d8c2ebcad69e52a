//! LLM provider layer: `chat(messages, tools, api_key, model) -> response`.
//!
//! One narrow, non-streaming contract ([`LlmProvider`]) behind which every
//! vendor wire lives. Two wire shapes cover the four supported providers:
//!
//! - OpenAI `chat/completions` — `openai`, `ollama` (local, keyless)
//! - Anthropic `v1/messages` — `anthropic`, `kimi` (Moonshot's
//!   Anthropic-compatible endpoint)
//!
//! [`mock::ScriptedProvider`] is the deterministic test double used by the
//! engine's tests; no test in this workspace talks to a real endpoint.

pub mod anthropic;
pub mod mock;
pub mod openai;
pub mod provider;
pub mod types;

pub use provider::{LlmProvider, ProviderError, provider_for};
pub use types::{ChatMessage, ChatResponse, Role, ToolCall, ToolSchema, Usage};
