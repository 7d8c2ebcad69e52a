//! Protocol envelope codec — the JSON-in-JSON pattern used for
//! agent-to-agent coordination messages.
//!
//! A protocol message is an ordinary inbox [`crate::Message`] whose `text`
//! field holds a serialized JSON object `{type, from, timestamp, ...}`.
//! Anything that fails to parse as such an object is treated as plain text
//! by every consumer, so malformed payloads degrade gracefully.

use serde::{Deserialize, Serialize};

use crate::schema::now_iso;

/// Typed payload of a protocol envelope.
///
/// The `type` tag and the per-variant field names are the wire format:
/// `idleReason`, `taskId`, `taskSubject`, `requestId`, `approve`, `plan`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ProtocolEvent {
    /// Sent to the parent after every completed turn.
    IdleNotification { idle_reason: String },
    /// Ask an agent to wind down. `target` names the intended recipient when
    /// the request is fanned out by the session itself.
    ShutdownRequest {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    /// Auto-reply to a shutdown request, echoing its id when present.
    ShutdownApproved {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        request_id: Option<String>,
    },
    /// A task was assigned to the recipient.
    TaskAssignment { task_id: String, task_subject: String },
    /// A task owned by the sender reached `completed`.
    TaskCompleted { task_id: String, task_subject: String },
    /// A teammate asks its leader to approve a plan before acting.
    PlanApprovalRequest { request_id: String, plan: String },
    /// Leader's verdict on a plan approval request.
    PlanApprovalResponse {
        request_id: String,
        approve: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        plan: Option<String>,
    },
}

impl ProtocolEvent {
    /// The wire `type` tag of this event.
    pub fn type_name(&self) -> &'static str {
        match self {
            ProtocolEvent::IdleNotification { .. } => "idle_notification",
            ProtocolEvent::ShutdownRequest { .. } => "shutdown_request",
            ProtocolEvent::ShutdownApproved { .. } => "shutdown_approved",
            ProtocolEvent::TaskAssignment { .. } => "task_assignment",
            ProtocolEvent::TaskCompleted { .. } => "task_completed",
            ProtocolEvent::PlanApprovalRequest { .. } => "plan_approval_request",
            ProtocolEvent::PlanApprovalResponse { .. } => "plan_approval_response",
        }
    }
}

/// A complete protocol envelope: sender + timestamp + typed payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolEnvelope {
    pub from: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub event: ProtocolEvent,
}

impl ProtocolEnvelope {
    /// Wrap an event with the sender name and the current timestamp.
    pub fn new(from: impl Into<String>, event: ProtocolEvent) -> Self {
        Self {
            from: from.into(),
            timestamp: now_iso(),
            event,
        }
    }

    pub fn idle_notification(from: impl Into<String>, idle_reason: impl Into<String>) -> Self {
        Self::new(
            from,
            ProtocolEvent::IdleNotification {
                idle_reason: idle_reason.into(),
            },
        )
    }

    pub fn shutdown_request(
        from: impl Into<String>,
        reason: impl Into<String>,
        target: Option<String>,
    ) -> Self {
        Self::new(
            from,
            ProtocolEvent::ShutdownRequest {
                reason: reason.into(),
                target,
                request_id: None,
            },
        )
    }

    pub fn shutdown_approved(from: impl Into<String>, request_id: Option<String>) -> Self {
        Self::new(from, ProtocolEvent::ShutdownApproved { request_id })
    }

    pub fn task_assignment(
        from: impl Into<String>,
        task_id: impl Into<String>,
        task_subject: impl Into<String>,
    ) -> Self {
        Self::new(
            from,
            ProtocolEvent::TaskAssignment {
                task_id: task_id.into(),
                task_subject: task_subject.into(),
            },
        )
    }

    pub fn task_completed(
        from: impl Into<String>,
        task_id: impl Into<String>,
        task_subject: impl Into<String>,
    ) -> Self {
        Self::new(
            from,
            ProtocolEvent::TaskCompleted {
                task_id: task_id.into(),
                task_subject: task_subject.into(),
            },
        )
    }

    pub fn plan_approval_request(
        from: impl Into<String>,
        request_id: impl Into<String>,
        plan: impl Into<String>,
    ) -> Self {
        Self::new(
            from,
            ProtocolEvent::PlanApprovalRequest {
                request_id: request_id.into(),
                plan: plan.into(),
            },
        )
    }

    pub fn plan_approval_response(
        from: impl Into<String>,
        request_id: impl Into<String>,
        approve: bool,
        plan: Option<String>,
    ) -> Self {
        Self::new(
            from,
            ProtocolEvent::PlanApprovalResponse {
                request_id: request_id.into(),
                approve,
                plan,
            },
        )
    }

    /// Serialize to the JSON string stored in a message's `text` field.
    pub fn serialize(&self) -> String {
        // Envelope fields are plain strings/bools; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Try to parse a message `text` field as a protocol envelope.
    ///
    /// Returns `None` for anything that is not a JSON object with a known
    /// `type` tag — the caller then treats the message as plain text.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}
