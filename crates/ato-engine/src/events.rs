//! Session event model and the emitter handle shared by runners and the
//! engine.

use crate::broadcast::EventBroadcaster;
use crate::history::HistorySink;
use ato_core::schema::{Message, Task, now_iso};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Everything observable that a session produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    SessionStart,
    SessionEnd,
    TurnStart,
    TurnEnd,
    Thinking,
    AgentResponse,
    AgentMessage,
    ToolCall,
    ToolResult,
    ProtocolMessage,
    TaskUpdate,
    Error,
}

/// One event on a session's stream.
///
/// `data` is a free-form JSON object whose shape depends on `type`; see the
/// emit sites in [`crate::runner`] and [`crate::team`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
    pub timestamp: String,
}

impl SessionEvent {
    pub fn new(
        kind: EventKind,
        session_id: impl Into<String>,
        agent: Option<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            kind,
            session_id: session_id.into(),
            agent,
            data,
            timestamp: now_iso(),
        }
    }
}

/// Clonable emit handle: stamps session id and timestamp, fans the event
/// out to live subscribers, and mirrors it into the history sink on a
/// detached task that is never joined.
#[derive(Clone)]
pub struct EventEmitter {
    session_id: String,
    broadcaster: Arc<EventBroadcaster>,
    sink: Arc<dyn HistorySink>,
}

impl EventEmitter {
    pub fn new(
        session_id: impl Into<String>,
        broadcaster: Arc<EventBroadcaster>,
        sink: Arc<dyn HistorySink>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            broadcaster,
            sink,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Emit one event to the stream and the sink.
    pub fn emit(&self, kind: EventKind, agent: Option<&str>, data: serde_json::Value) {
        let event = SessionEvent::new(kind, &self.session_id, agent.map(str::to_string), data);
        self.broadcaster.broadcast(&self.session_id, event.clone());

        let sink = Arc::clone(&self.sink);
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            sink.record_event(&session_id, &event).await;
        });
    }

    /// Mirror a delivered inbox message into the sink.
    pub fn record_message(&self, recipient: &str, message: &Message) {
        let sink = Arc::clone(&self.sink);
        let session_id = self.session_id.clone();
        let recipient = recipient.to_string();
        let message = message.clone();
        tokio::spawn(async move {
            sink.record_message(&session_id, &recipient, &message).await;
        });
    }

    /// Mirror a task snapshot into the sink.
    pub fn record_task(&self, task: &Task) {
        let sink = Arc::clone(&self.sink);
        let session_id = self.session_id.clone();
        let task = task.clone();
        tokio::spawn(async move {
            sink.record_task(&session_id, &task).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&EventKind::SessionStart).unwrap(),
            "\"session_start\""
        );
        assert_eq!(
            serde_json::to_string(&EventKind::ProtocolMessage).unwrap(),
            "\"protocol_message\""
        );
    }

    #[test]
    fn test_event_wire_shape() {
        let event = SessionEvent::new(
            EventKind::Thinking,
            "sid-1",
            Some("worker".into()),
            serde_json::json!({"loop": 2}),
        );
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "thinking");
        assert_eq!(value["session_id"], "sid-1");
        assert_eq!(value["agent"], "worker");
        assert_eq!(value["data"]["loop"], 2);
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[test]
    fn test_event_agent_omitted_when_absent() {
        let event = SessionEvent::new(EventKind::SessionEnd, "sid", None, serde_json::json!({}));
        let text = serde_json::to_string(&event).unwrap();
        assert!(!text.contains("\"agent\""));
    }
}
