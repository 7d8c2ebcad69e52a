//! Agent roster configuration for a session

use serde::{Deserialize, Serialize};

/// Position of an agent in the team hierarchy.
///
/// Leaders delegate and collect results; teammates do the work. A leader
/// that reports to another leader acts as a sub-leader — that distinction
/// is derived from the resolved hierarchy, not configured directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Leader,
    #[default]
    Teammate,
}

/// Configuration for a single agent in the team
///
/// `name` is the session-unique identifier used for inbox routing and task
/// ownership. `connections` lists the agents this agent may message
/// directly; an empty list means the whole roster is reachable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent display name, e.g. "researcher"
    pub name: String,

    /// LLM provider name: anthropic, openai, kimi, ollama
    pub provider: String,

    /// Model id, e.g. "claude-sonnet-4-6"
    pub model: String,

    /// System prompt that defines this agent's role
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Hierarchy role
    #[serde(default)]
    pub role: AgentRole,

    /// Names of agents this agent can message
    #[serde(default)]
    pub connections: Vec<String>,
}

fn default_system_prompt() -> String {
    "You are a helpful AI assistant.".to_string()
}

impl AgentConfig {
    /// Minimal config used by tests and examples.
    pub fn new(name: impl Into<String>, provider: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            model: model.into(),
            system_prompt: default_system_prompt(),
            role: AgentRole::Teammate,
            connections: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: AgentRole) -> Self {
        self.role = role;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_connections(mut self, connections: Vec<String>) -> Self {
        self.connections = connections;
        self
    }
}
