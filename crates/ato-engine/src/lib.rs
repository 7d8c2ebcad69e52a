//! Orchestration kernel for agent teams
//!
//! One [`team::TeamEngine`] per session drives the whole show: it resolves
//! the leader hierarchy from the roster, builds one [`runner::AgentRunner`]
//! per agent, and runs the scheduler loop — every round, all agents with
//! unread inbox messages take a turn concurrently, with a barrier between
//! rounds so the next readiness snapshot sees a stable state.
//!
//! A turn is the bounded loop inbox → context → model call → tool dispatch
//! → tool-result reinjection. Tools talk to the file stores in `ato_core`;
//! everything observable flows out through the [`broadcast::EventBroadcaster`]
//! and is mirrored best-effort into a [`history::HistorySink`].

pub mod broadcast;
pub mod context;
pub mod events;
pub mod history;
pub mod runner;
pub mod team;
pub mod tools;

pub use broadcast::{EventBroadcaster, EventStream};
pub use events::{EventEmitter, EventKind, SessionEvent};
pub use history::{HistorySink, JsonlSink, NullSink};
pub use runner::{AgentRunner, TurnReport};
pub use team::{EngineConfig, TeamEngine, create_session};
pub use tools::{ToolEvent, ToolExecutor, tool_definitions};
