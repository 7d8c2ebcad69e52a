//! Inbox message schema for inter-agent communication

use crate::protocol::ProtocolEnvelope;
use crate::text::{SUMMARY_MAX_CHARS, truncate_chars};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Message in an agent's inbox
///
/// Messages are stored in `sessions/{session_id}/inboxes/{agent_name}.json`
/// as a JSON array of Message objects. `text` is either a human-readable
/// payload or a serialized protocol envelope (see [`crate::protocol`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Sender agent name, or `"user"` / `"system"` for external senders
    pub from: String,

    /// Message body (may contain serialized JSON)
    pub text: String,

    /// Brief preview (at most 80 characters)
    pub summary: String,

    /// ISO 8601 UTC timestamp
    pub timestamp: String,

    /// Display color tag of the sender, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,

    /// Whether the message has been read
    pub read: bool,

    /// Unknown fields for forward compatibility
    #[serde(flatten)]
    pub unknown_fields: HashMap<String, serde_json::Value>,
}

impl Message {
    /// Build a plain unread message stamped with the current time.
    ///
    /// When `summary` is `None` the first [`SUMMARY_MAX_CHARS`] characters of
    /// `text` are used.
    pub fn new(
        from: impl Into<String>,
        text: impl Into<String>,
        summary: Option<String>,
        color: Option<String>,
    ) -> Self {
        let text = text.into();
        let summary =
            summary.unwrap_or_else(|| truncate_chars(&text, SUMMARY_MAX_CHARS).to_string());
        Self {
            from: from.into(),
            text,
            summary,
            timestamp: super::now_iso(),
            color,
            read: false,
            unknown_fields: HashMap::new(),
        }
    }

    /// Build a message carrying a serialized protocol envelope.
    ///
    /// The summary takes the form `"<type> from <sender>"` so inbox previews
    /// stay readable without parsing the payload.
    pub fn protocol(envelope: &ProtocolEnvelope) -> Self {
        let summary = format!("{} from {}", envelope.event.type_name(), envelope.from);
        Self::new(envelope.from.clone(), envelope.serialize(), Some(summary), None)
    }
}
