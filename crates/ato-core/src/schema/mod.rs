//! Schema types shared across the orchestrator

pub mod agent;
pub mod message;
pub mod task;

pub use agent::{AgentConfig, AgentRole};
pub use message::Message;
pub use task::{Task, TaskStatus, TaskUpdate};

use chrono::{SecondsFormat, Utc};

/// Current UTC instant in ISO 8601 form with a trailing `Z`.
///
/// This is the timestamp format stored in inbox messages and protocol
/// envelopes.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}
