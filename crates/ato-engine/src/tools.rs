//! The five team tools and their executor
//!
//! Tool names are case-sensitive identifiers. Results are always strings:
//! structured results are JSON-encoded, and every failure mode an agent can
//! trigger comes back as an in-band `{"error": "..."}` payload — tool
//! execution never raises into the scheduler.
//!
//! Side effects that other components care about (a message landed, a task
//! changed hands) are not handled through callbacks; the executor pushes
//! [`ToolEvent`]s onto a channel that the owning runner drains after each
//! dispatch. This keeps the executor stateless beyond its store handles.

use ato_core::protocol::ProtocolEnvelope;
use ato_core::schema::{Message, Task, TaskUpdate};
use ato_core::store::{InboxStore, StoreError, TaskStore};
use ato_core::text::{SUMMARY_MAX_CHARS, truncate_chars};
use ato_llm::ToolSchema;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::error;

/// Side effect notifications drained by the owning runner.
#[derive(Debug, Clone)]
pub enum ToolEvent {
    /// A message was appended to `to`'s inbox.
    MessageSent { to: String, message: Message },
    /// A task was created or updated (never fired for deletes).
    TaskChanged { task: Task },
    /// A TaskUpdate carried a non-null owner.
    TaskAssigned { owner: String, task: Task },
    /// A TaskUpdate moved status to completed.
    TaskCompleted { task: Task },
}

/// Tool definitions sent to the model (JSON schemas).
pub fn tool_definitions() -> Vec<ToolSchema> {
    vec![
        ToolSchema {
            name: "SendMessage".into(),
            description: "Send a message to another agent on the team.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "type": {
                        "type": "string",
                        "enum": ["message", "broadcast", "shutdown_request", "shutdown_response", "plan_approval_request", "plan_approval_response"],
                        "description": "message = DM, broadcast = all, or protocol message types"
                    },
                    "recipient": {
                        "type": "string",
                        "description": "Name of the recipient agent (required for type=message)"
                    },
                    "content": {
                        "type": "string",
                        "description": "The message text"
                    },
                    "summary": {
                        "type": "string",
                        "description": "Short 5-10 word summary"
                    },
                    "request_id": {
                        "type": "string",
                        "description": "Request ID (for shutdown_response, plan_approval_request/response)"
                    },
                    "approve": {
                        "type": "boolean",
                        "description": "Whether to approve (for shutdown_response, plan_approval_response)"
                    }
                },
                "required": ["type"]
            }),
        },
        ToolSchema {
            name: "TaskCreate".into(),
            description: "Create a new task in the shared task list.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "subject": {"type": "string", "description": "Brief task title"},
                    "description": {"type": "string", "description": "Detailed description"},
                    "activeForm": {"type": "string", "description": "Present continuous form for spinner"},
                    "metadata": {"type": "object", "description": "Arbitrary metadata to attach to the task"}
                },
                "required": ["subject", "description"]
            }),
        },
        ToolSchema {
            name: "TaskUpdate".into(),
            description: "Update an existing task's status, owner, or details.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "taskId": {"type": "string", "description": "ID of the task to update"},
                    "status": {"type": "string", "enum": ["pending", "in_progress", "completed", "deleted"]},
                    "owner": {"type": "string"},
                    "subject": {"type": "string"},
                    "description": {"type": "string"},
                    "activeForm": {"type": "string"},
                    "addBlockedBy": {"type": "array", "items": {"type": "string"}},
                    "addBlocks": {"type": "array", "items": {"type": "string"}},
                    "metadata": {"type": "object", "description": "Metadata keys to merge (set key to null to delete)"}
                },
                "required": ["taskId"]
            }),
        },
        ToolSchema {
            name: "TaskList".into(),
            description: "List all tasks in the shared task list.".into(),
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
        },
        ToolSchema {
            name: "TaskGet".into(),
            description: "Get a single task by ID.".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "taskId": {"type": "string", "description": "The task ID"}
                },
                "required": ["taskId"]
            }),
        },
    ]
}

/// Executes tool calls against the stores on behalf of one agent.
pub struct ToolExecutor {
    inbox: Arc<InboxStore>,
    tasks: Arc<TaskStore>,
    agent_name: String,
    team_agents: Vec<String>,
    events: mpsc::UnboundedSender<ToolEvent>,
}

impl ToolExecutor {
    /// Build an executor plus the receiving end of its event channel.
    pub fn new(
        inbox: Arc<InboxStore>,
        tasks: Arc<TaskStore>,
        agent_name: impl Into<String>,
        team_agents: Vec<String>,
    ) -> (Self, mpsc::UnboundedReceiver<ToolEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        (
            Self {
                inbox,
                tasks,
                agent_name: agent_name.into(),
                team_agents,
                events,
            },
            rx,
        )
    }

    fn notify(&self, event: ToolEvent) {
        // The receiver lives as long as the runner; a closed channel just
        // means the turn already ended.
        let _ = self.events.send(event);
    }

    /// Execute a tool call and return the result as a string.
    pub async fn execute(&self, tool_name: &str, args: &Value) -> String {
        let result = match tool_name {
            "SendMessage" => self.handle_send_message(args).await,
            "TaskCreate" => self.handle_task_create(args).await,
            "TaskUpdate" => self.handle_task_update(args).await,
            "TaskList" => self.handle_task_list().await,
            "TaskGet" => self.handle_task_get(args).await,
            other => Ok(json!({"error": format!("Unknown tool: {other}")})),
        };
        match result {
            Ok(value) => match value {
                Value::String(s) => s,
                other => other.to_string(),
            },
            Err(e) => {
                error!(agent = %self.agent_name, tool = tool_name, "tool execution error: {e}");
                json!({"error": e.to_string()}).to_string()
            }
        }
    }

    async fn deliver(&self, recipient: &str, message: Message) -> Result<(), StoreError> {
        self.inbox.append(recipient, message.clone()).await?;
        self.notify(ToolEvent::MessageSent {
            to: recipient.to_string(),
            message,
        });
        Ok(())
    }

    async fn handle_send_message(&self, args: &Value) -> Result<Value, StoreError> {
        let msg_type = args["type"].as_str().unwrap_or("message");
        let content = args["content"].as_str().unwrap_or("");
        let summary = args["summary"]
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| truncate_chars(content, SUMMARY_MAX_CHARS).to_string());
        let recipient = args["recipient"].as_str().unwrap_or("");
        let request_id = args["request_id"].as_str().map(str::to_string);

        match msg_type {
            "shutdown_request" => {
                if recipient.is_empty() {
                    return Ok(json!({"error": "recipient is required for shutdown_request"}));
                }
                let reason = if content.is_empty() { "requested by agent" } else { content };
                let env = ProtocolEnvelope::shutdown_request(
                    &self.agent_name,
                    reason,
                    Some(recipient.to_string()),
                );
                self.deliver(recipient, Message::protocol(&env)).await?;
                Ok(json!({"status": "shutdown_request_sent", "to": recipient}))
            }
            "shutdown_response" => {
                if recipient.is_empty() {
                    return Ok(json!({"error": "recipient is required for shutdown_response"}));
                }
                let env = ProtocolEnvelope::shutdown_approved(&self.agent_name, request_id);
                self.deliver(recipient, Message::protocol(&env)).await?;
                Ok(json!({"status": "shutdown_approved_sent", "to": recipient}))
            }
            "plan_approval_request" => {
                let Some(request_id) = request_id.filter(|r| !r.is_empty()) else {
                    return Ok(json!({
                        "error": "recipient and request_id are required for plan_approval_request"
                    }));
                };
                if recipient.is_empty() {
                    return Ok(json!({
                        "error": "recipient and request_id are required for plan_approval_request"
                    }));
                }
                let env = ProtocolEnvelope::plan_approval_request(
                    &self.agent_name,
                    &request_id,
                    content,
                );
                self.deliver(recipient, Message::protocol(&env)).await?;
                Ok(json!({
                    "status": "plan_approval_request_sent",
                    "to": recipient,
                    "request_id": request_id
                }))
            }
            "plan_approval_response" => {
                let approve = args["approve"].as_bool().unwrap_or(false);
                let Some(request_id) = request_id.filter(|r| !r.is_empty()) else {
                    return Ok(json!({
                        "error": "recipient and request_id are required for plan_approval_response"
                    }));
                };
                if recipient.is_empty() {
                    return Ok(json!({
                        "error": "recipient and request_id are required for plan_approval_response"
                    }));
                }
                let plan = (!content.is_empty()).then(|| content.to_string());
                let env = ProtocolEnvelope::plan_approval_response(
                    &self.agent_name,
                    &request_id,
                    approve,
                    plan,
                );
                self.deliver(recipient, Message::protocol(&env)).await?;
                Ok(json!({
                    "status": "plan_approval_response_sent",
                    "to": recipient,
                    "request_id": request_id,
                    "approve": approve
                }))
            }
            "broadcast" => {
                let mut sent_to = Vec::new();
                for agent in &self.team_agents {
                    if agent == &self.agent_name {
                        continue;
                    }
                    let message =
                        Message::new(&self.agent_name, content, Some(summary.clone()), None);
                    self.deliver(agent, message).await?;
                    sent_to.push(agent.clone());
                }
                Ok(json!({"status": "broadcast_sent", "sent_to": sent_to}))
            }
            // type == "message" (default)
            _ => {
                if recipient.is_empty() {
                    return Ok(json!({"error": "recipient is required for type=message"}));
                }
                let message = Message::new(&self.agent_name, content, Some(summary), None);
                self.deliver(recipient, message).await?;
                Ok(json!({"status": "message_sent", "to": recipient}))
            }
        }
    }

    async fn handle_task_create(&self, args: &Value) -> Result<Value, StoreError> {
        let Some(subject) = args["subject"].as_str() else {
            return Ok(json!({"error": "subject is required for TaskCreate"}));
        };
        let description = args["description"].as_str().unwrap_or("");
        let active_form = args["activeForm"].as_str().map(str::to_string);
        let metadata: Option<HashMap<String, Value>> = args
            .get("metadata")
            .and_then(Value::as_object)
            .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect());

        let task = self
            .tasks
            .create_task(subject, description, None, active_form, metadata)
            .await?;
        self.notify(ToolEvent::TaskChanged { task: task.clone() });
        Ok(serde_json::to_value(&task).unwrap_or_default())
    }

    async fn handle_task_update(&self, args: &Value) -> Result<Value, StoreError> {
        let Some(task_id) = args["taskId"].as_str() else {
            return Ok(json!({"error": "taskId is required for TaskUpdate"}));
        };
        let update: TaskUpdate = match serde_json::from_value(args.clone()) {
            Ok(u) => u,
            Err(e) => return Ok(json!({"error": format!("invalid TaskUpdate arguments: {e}")})),
        };
        let assigned_owner = update.owner.clone();
        let marked_completed =
            update.status == Some(ato_core::schema::TaskStatus::Completed);

        let Some(outcome) = self.tasks.update_task(task_id, update).await? else {
            return Ok(json!({"error": format!("Task {task_id} not found")}));
        };

        let task = outcome.task().clone();
        if !outcome.is_deleted() {
            self.notify(ToolEvent::TaskChanged { task: task.clone() });
            if let Some(owner) = assigned_owner {
                self.notify(ToolEvent::TaskAssigned {
                    owner,
                    task: task.clone(),
                });
            }
            if marked_completed {
                self.notify(ToolEvent::TaskCompleted { task: task.clone() });
            }
        }
        Ok(serde_json::to_value(&task).unwrap_or_default())
    }

    async fn handle_task_list(&self) -> Result<Value, StoreError> {
        let tasks = self.tasks.list_tasks().await?;
        Ok(serde_json::to_value(&tasks).unwrap_or_default())
    }

    async fn handle_task_get(&self, args: &Value) -> Result<Value, StoreError> {
        let Some(task_id) = args["taskId"].as_str() else {
            return Ok(json!({"error": "taskId is required for TaskGet"}));
        };
        match self.tasks.get_task(task_id).await? {
            Some(task) => Ok(serde_json::to_value(&task).unwrap_or_default()),
            None => Ok(json!({"error": format!("Task {task_id} not found")})),
        }
    }
}
