//! The agent turn engine
//!
//! One runner per agent, owning that agent's persistent conversation
//! history. A turn is a bounded loop of model call → tool dispatch →
//! tool-result reinjection; at most one turn per agent runs at a time (the
//! scheduler barriers each round), so the history needs no locking.

use crate::context::ContextBuilder;
use crate::events::{EventEmitter, EventKind};
use crate::tools::{ToolEvent, ToolExecutor, tool_definitions};
use ato_core::protocol::{ProtocolEnvelope, ProtocolEvent};
use ato_core::schema::Message;
use ato_core::store::{InboxStore, StoreError};
use ato_llm::{ChatMessage, LlmProvider};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Hard cap on model calls within one turn.
pub const MAX_TOOL_LOOPS: usize = 10;

/// History length that triggers compaction.
pub const MAX_HISTORY_MESSAGES: usize = 40;

/// How many recent history entries survive a compaction.
const HISTORY_KEEP_RECENT: usize = 20;

/// Summary of one completed turn.
#[derive(Debug, Clone)]
pub struct TurnReport {
    pub agent: String,
    pub content: String,
    pub loops: usize,
    pub shutdown: bool,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// Runs a single agent's turns: read inbox → LLM → tool calls → repeat.
pub struct AgentRunner {
    name: String,
    provider: Arc<dyn LlmProvider>,
    model: String,
    api_key: String,
    inbox: Arc<InboxStore>,
    context: ContextBuilder,
    executor: ToolExecutor,
    tool_events: mpsc::UnboundedReceiver<ToolEvent>,
    /// Who this agent reports to (None for the top leader).
    lead_agent: Option<String>,
    is_leader: bool,
    color: String,
    /// Conversation history persisted across turns within a session.
    history: Vec<ChatMessage>,
    total_prompt_tokens: u64,
    total_completion_tokens: u64,
    emitter: EventEmitter,
}

impl AgentRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: impl Into<String>,
        provider: Arc<dyn LlmProvider>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        inbox: Arc<InboxStore>,
        context: ContextBuilder,
        executor: ToolExecutor,
        tool_events: mpsc::UnboundedReceiver<ToolEvent>,
        lead_agent: Option<String>,
        is_leader: bool,
        color: impl Into<String>,
        emitter: EventEmitter,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            model: model.into(),
            api_key: api_key.into(),
            inbox,
            context,
            executor,
            tool_events,
            lead_agent,
            is_leader,
            color: color.into(),
            history: Vec::new(),
            total_prompt_tokens: 0,
            total_completion_tokens: 0,
            emitter,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn color(&self) -> &str {
        &self.color
    }

    pub fn lead_agent(&self) -> Option<&str> {
        self.lead_agent.as_deref()
    }

    pub fn is_leader(&self) -> bool {
        self.is_leader
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Test hook: preload conversation history.
    pub fn seed_history(&mut self, messages: Vec<ChatMessage>) {
        self.history = messages;
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    fn emit(&self, kind: EventKind, data: serde_json::Value) {
        self.emitter.emit(kind, Some(&self.name), data);
    }

    /// Inject a plain message from the human user into this agent's inbox.
    pub async fn inject_user_message(&self, text: &str) -> Result<(), StoreError> {
        self.inbox
            .append(&self.name, Message::new("user", text, None, None))
            .await
    }

    /// Trim the history when it exceeds [`MAX_HISTORY_MESSAGES`].
    ///
    /// Keeps a summary marker plus the last [`HISTORY_KEEP_RECENT`] entries.
    /// The system prompt rebuilds team context and the task list every
    /// turn, so state recovery is automatic.
    fn maybe_compact_history(&mut self) {
        if self.history.len() <= MAX_HISTORY_MESSAGES {
            return;
        }
        let trimmed_count = self.history.len() - HISTORY_KEEP_RECENT;
        let marker = ChatMessage::user(format!(
            "[System: {trimmed_count} earlier messages were compacted to save context. \
             Team context and task list are rebuilt in the system prompt above.]"
        ));
        let tail = self.history.split_off(self.history.len() - HISTORY_KEEP_RECENT);
        self.history = std::iter::once(marker).chain(tail).collect();
        info!(agent = %self.name, trimmed = trimmed_count, "compacted history");
    }

    /// Scan the unread inbox for a shutdown request. When one is found,
    /// auto-approve it to the parent (echoing the request id), mark the
    /// whole inbox read, and report `true` — the model is not invoked.
    async fn check_shutdown_request(&self) -> Result<bool, StoreError> {
        let all = self.inbox.read_all(&self.name).await?;
        for m in &all {
            if m.read {
                continue;
            }
            let Some(env) = ProtocolEnvelope::parse(&m.text) else {
                continue;
            };
            let ProtocolEvent::ShutdownRequest { request_id, .. } = env.event else {
                continue;
            };
            if let Some(lead) = &self.lead_agent {
                let approved = ProtocolEnvelope::shutdown_approved(&self.name, request_id);
                self.inbox.append(lead, Message::protocol(&approved)).await?;
                self.emit(
                    EventKind::ProtocolMessage,
                    json!({"protocol_type": "shutdown_approved", "from": self.name}),
                );
            }
            self.inbox.mark_read(&self.name, None).await?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Forward a tool side effect: protocol envelopes to the affected
    /// inboxes, events to the stream, mirrors to the history sink.
    async fn handle_tool_event(&self, event: ToolEvent) -> Result<(), StoreError> {
        match event {
            ToolEvent::MessageSent { to, message } => {
                self.emit(
                    EventKind::AgentMessage,
                    json!({"to": to, "text": message.text, "summary": message.summary}),
                );
                self.emitter.record_message(&to, &message);
            }
            ToolEvent::TaskChanged { task } => {
                self.emit(
                    EventKind::TaskUpdate,
                    json!({
                        "id": task.id,
                        "subject": task.subject,
                        "description": task.description,
                        "status": task.status,
                        "owner": task.owner,
                    }),
                );
                self.emitter.record_task(&task);
            }
            ToolEvent::TaskAssigned { owner, task } => {
                let env = ProtocolEnvelope::task_assignment(&self.name, &task.id, &task.subject);
                self.inbox.append(&owner, Message::protocol(&env)).await?;
                self.emit(
                    EventKind::ProtocolMessage,
                    json!({
                        "protocol_type": "task_assignment",
                        "task_id": task.id,
                        "assigned_to": owner,
                    }),
                );
            }
            ToolEvent::TaskCompleted { task } => {
                if let Some(lead) = &self.lead_agent
                    && lead != &self.name
                {
                    let env = ProtocolEnvelope::task_completed(&self.name, &task.id, &task.subject);
                    self.inbox.append(lead, Message::protocol(&env)).await?;
                    self.emit(
                        EventKind::ProtocolMessage,
                        json!({
                            "protocol_type": "task_completed",
                            "task_id": task.id,
                            "task_subject": task.subject,
                            "from": self.name,
                        }),
                    );
                }
            }
        }
        Ok(())
    }

    async fn drain_tool_events(&mut self) -> Result<(), StoreError> {
        while let Ok(event) = self.tool_events.try_recv() {
            self.handle_tool_event(event).await?;
        }
        Ok(())
    }

    /// Execute one full turn. May invoke the model several times when tools
    /// are used; never more than [`MAX_TOOL_LOOPS`] times.
    pub async fn run_turn(&mut self) -> Result<TurnReport, StoreError> {
        if self.check_shutdown_request().await? {
            self.emit(EventKind::TurnEnd, json!({"shutdown": true}));
            return Ok(TurnReport {
                agent: self.name.clone(),
                content: String::new(),
                loops: 0,
                shutdown: true,
                prompt_tokens: self.total_prompt_tokens,
                completion_tokens: self.total_completion_tokens,
            });
        }

        self.emit(EventKind::TurnStart, json!({}));

        self.maybe_compact_history();

        let mut messages = self.context.build_messages(&self.history).await?;
        let tools = tool_definitions();

        let mut loop_count = 0;
        let mut final_content = String::new();
        // Set once the agent sends its own shutdown_request; the turn ends
        // after the current batch of tool results.
        let mut should_stop = false;

        while loop_count < MAX_TOOL_LOOPS && !should_stop {
            loop_count += 1;
            self.emit(EventKind::Thinking, json!({"loop": loop_count}));

            let response = match self
                .provider
                .chat(&messages, &tools, &self.api_key, Some(&self.model))
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    warn!(agent = %self.name, "LLM call failed: {e}");
                    self.emit(EventKind::Error, json!({"message": e.to_string()}));
                    break;
                }
            };

            self.total_prompt_tokens += response.usage.prompt_tokens;
            self.total_completion_tokens += response.usage.completion_tokens;

            if !response.content.is_empty() {
                final_content = response.content.clone();
                self.emit(EventKind::AgentResponse, json!({"content": response.content}));
                let assistant = ChatMessage::assistant(response.content.clone());
                messages.push(assistant.clone());
                self.history.push(assistant);
            }

            if response.tool_calls.is_empty() {
                break;
            }

            let mut tool_results = Vec::with_capacity(response.tool_calls.len());
            for tc in &response.tool_calls {
                self.emit(
                    EventKind::ToolCall,
                    json!({"tool": tc.name, "arguments": tc.arguments, "call_id": tc.id}),
                );

                let result = self.executor.execute(&tc.name, &tc.arguments).await;
                self.drain_tool_events().await?;

                self.emit(
                    EventKind::ToolResult,
                    json!({"tool": tc.name, "call_id": tc.id, "result": result}),
                );

                tool_results.push(format!("[Tool {} result]: {result}", tc.name));

                if tc.name == "SendMessage"
                    && tc.arguments["type"].as_str() == Some("shutdown_request")
                {
                    should_stop = true;
                }
            }

            // Reinject all tool results as a single user message for the
            // next loop iteration.
            let combined = ChatMessage::user(tool_results.join("\n\n"));
            messages.push(combined.clone());
            self.history.push(combined);
        }

        // Tell the parent this agent has gone idle and is ready for more work.
        if let Some(lead) = self.lead_agent.clone()
            && lead != self.name
        {
            let env = ProtocolEnvelope::idle_notification(&self.name, "available");
            self.inbox.append(&lead, Message::protocol(&env)).await?;
            self.emit(
                EventKind::ProtocolMessage,
                json!({"protocol_type": "idle_notification", "from": self.name}),
            );
        }

        self.emit(
            EventKind::TurnEnd,
            json!({
                "loops": loop_count,
                "prompt_tokens": self.total_prompt_tokens,
                "completion_tokens": self.total_completion_tokens,
            }),
        );

        Ok(TurnReport {
            agent: self.name.clone(),
            content: final_content,
            loops: loop_count,
            shutdown: false,
            prompt_tokens: self.total_prompt_tokens,
            completion_tokens: self.total_completion_tokens,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compaction_shape() {
        // |H| > 40 compacts to exactly marker + last 20.
        let dir = tempfile::TempDir::new().unwrap();
        let mut runner = test_runner(&dir);
        let history: Vec<ChatMessage> = (0..45)
            .map(|i| ChatMessage::assistant(format!("entry {i}")))
            .collect();
        runner.seed_history(history);

        runner.maybe_compact_history();

        assert_eq!(runner.history_len(), 21);
        let first = &runner.history()[0];
        assert_eq!(first.role, ato_llm::Role::User);
        assert!(first.content.contains("25 earlier messages were compacted"));
        assert_eq!(runner.history()[1].content, "entry 25");
        assert_eq!(runner.history()[20].content, "entry 44");
    }

    #[test]
    fn test_compaction_noop_at_threshold() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut runner = test_runner(&dir);
        let history: Vec<ChatMessage> = (0..MAX_HISTORY_MESSAGES)
            .map(|i| ChatMessage::assistant(format!("entry {i}")))
            .collect();
        runner.seed_history(history);
        runner.maybe_compact_history();
        assert_eq!(runner.history_len(), MAX_HISTORY_MESSAGES);
    }

    fn test_runner(dir: &tempfile::TempDir) -> AgentRunner {
        use crate::broadcast::EventBroadcaster;
        use crate::context::ContextBuilder;
        use crate::history::NullSink;
        use ato_core::store::TaskStore;

        let inbox = Arc::new(InboxStore::new(dir.path(), "s"));
        let tasks = Arc::new(TaskStore::new(dir.path(), "s").unwrap());
        let context = ContextBuilder::new(
            Arc::clone(&inbox),
            Arc::clone(&tasks),
            "me",
            "prompt",
            vec!["me".into()],
            vec![],
            false,
            None,
        );
        let (executor, rx) = ToolExecutor::new(
            Arc::clone(&inbox),
            Arc::clone(&tasks),
            "me",
            vec!["me".into()],
        );
        let emitter = EventEmitter::new(
            "s",
            Arc::new(EventBroadcaster::new()),
            Arc::new(NullSink),
        );
        AgentRunner::new(
            "me",
            Arc::new(ato_llm::mock::ScriptedProvider::always_text("ok")),
            "mock-model",
            "",
            inbox,
            context,
            executor,
            rx,
            None,
            false,
            "blue",
            emitter,
        )
    }
}
