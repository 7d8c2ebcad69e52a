//! Best-effort history mirroring
//!
//! The secondary history store lives behind this interface. Every call is
//! fire-and-forget: implementations swallow their own errors (logging at
//! warn), and callers spawn a detached task per record and never join it.
//! Losing records here never affects a live session.

use crate::events::SessionEvent;
use ato_core::schema::{Message, Task};
use async_trait::async_trait;
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use tracing::warn;

/// Write-only mirror of session activity.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn record_event(&self, _session_id: &str, _event: &SessionEvent) {}

    async fn record_message(&self, _session_id: &str, _recipient: &str, _message: &Message) {}

    async fn record_task(&self, _session_id: &str, _task: &Task) {}
}

/// Sink that drops everything. The default when no mirror is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl HistorySink for NullSink {}

/// Appends one JSON line per record to a log file.
///
/// The file and its parent directory are created on first write. Failures
/// are logged and otherwise ignored.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn append_line(&self, line: &serde_json::Value) {
        let result = (|| -> std::io::Result<()> {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            writeln!(file, "{line}")
        })();
        if let Err(e) = result {
            warn!(path = %self.path.display(), "history sink write failed: {e}");
        }
    }
}

#[async_trait]
impl HistorySink for JsonlSink {
    async fn record_event(&self, session_id: &str, event: &SessionEvent) {
        self.append_line(&json!({
            "record": "event",
            "session_id": session_id,
            "event": event,
        }));
    }

    async fn record_message(&self, session_id: &str, recipient: &str, message: &Message) {
        self.append_line(&json!({
            "record": "message",
            "session_id": session_id,
            "recipient": recipient,
            "message": message,
        }));
    }

    async fn record_task(&self, session_id: &str, task: &Task) {
        self.append_line(&json!({
            "record": "task",
            "session_id": session_id,
            "task": task,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_jsonl_sink_appends_records() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("history/session.jsonl");
        let sink = JsonlSink::new(&path);

        let event = SessionEvent::new(EventKind::TurnStart, "s1", Some("a".into()), json!({}));
        sink.record_event("s1", &event).await;
        sink.record_message("s1", "worker", &Message::new("lead", "go", None, None))
            .await;

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["record"], "event");
        assert_eq!(first["event"]["type"], "turn_start");

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["record"], "message");
        assert_eq!(second["recipient"], "worker");
    }

    #[tokio::test]
    async fn test_jsonl_sink_swallows_write_failures() {
        // A path under a file (not a directory) cannot be created.
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let sink = JsonlSink::new(blocker.join("nested/log.jsonl"));

        // Must not panic or error.
        sink.record_task("s1", &sample_task()).await;
    }

    fn sample_task() -> Task {
        serde_json::from_value(json!({
            "id": "1",
            "subject": "s",
            "description": "d",
            "status": "pending"
        }))
        .unwrap()
    }
}
