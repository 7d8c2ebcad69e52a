//! File-based session stores
//!
//! Everything a live session persists lives under
//! `<base>/sessions/<session-id>/`: one inbox JSON array per agent and one
//! JSON file per task. This module provides the two stores plus their
//! shared error type. Concurrency contracts:
//!
//! - **Inboxes**: every operation on an agent is serialized against other
//!   operations on the same agent via a lazily created, never reclaimed
//!   per-agent mutex.
//! - **Tasks**: a single session-wide mutex covers id allocation, file
//!   writes, and the high-watermark update.

pub mod error;
pub mod inbox;
pub mod task;

pub use error::StoreError;
pub use inbox::InboxStore;
pub use task::{TaskStore, TaskUpdateOutcome};
