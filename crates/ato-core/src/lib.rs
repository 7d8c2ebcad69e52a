//! Core types and stores for agent-team-orchestrator
//!
//! This crate provides the substrate that a team session runs on: the
//! message and task schemas, the JSON-in-JSON protocol envelope codec, and
//! the file-based per-session stores rooted at
//! `<base>/sessions/<session-id>/`.
//!
//! All schema types are designed to:
//! - Preserve unknown fields for forward compatibility
//! - Use proper serde configuration for camelCase ↔ snake_case
//! - Support round-trip serialization without data loss

pub mod logging;
pub mod protocol;
pub mod schema;
pub mod store;
pub mod text;

pub use protocol::{ProtocolEnvelope, ProtocolEvent};
pub use schema::{AgentConfig, AgentRole, Message, Task, TaskStatus, TaskUpdate, now_iso};
pub use store::{InboxStore, StoreError, TaskStore, TaskUpdateOutcome};
