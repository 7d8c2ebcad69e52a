//! Per-turn context assembly
//!
//! The system prompt is rebuilt from scratch every turn — team shape, role
//! instructions, and the scoped task list all live there, which is what
//! makes blunt history compaction safe: whatever the trimmed history lost
//! is reconstructed here on the next call.

use ato_core::protocol::ProtocolEnvelope;
use ato_core::schema::AgentRole;
use ato_core::store::{InboxStore, StoreError, TaskStore};
use ato_llm::ChatMessage;
use std::sync::Arc;

/// Roster information about one direct connection.
#[derive(Debug, Clone)]
pub struct RosterEntry {
    pub name: String,
    pub role: AgentRole,
    /// First ~200 characters of that agent's system prompt.
    pub description: String,
}

/// Builds LLM-ready messages for a single agent turn.
pub struct ContextBuilder {
    inbox: Arc<InboxStore>,
    tasks: Arc<TaskStore>,
    agent_name: String,
    agent_system_prompt: String,
    /// Self plus direct connections.
    team_agents: Vec<String>,
    /// Direct connections only.
    team_roster: Vec<RosterEntry>,
    is_leader: bool,
    /// Who this agent reports to (None for the top leader).
    lead_agent: Option<String>,
}

impl ContextBuilder {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        inbox: Arc<InboxStore>,
        tasks: Arc<TaskStore>,
        agent_name: impl Into<String>,
        agent_system_prompt: impl Into<String>,
        team_agents: Vec<String>,
        team_roster: Vec<RosterEntry>,
        is_leader: bool,
        lead_agent: Option<String>,
    ) -> Self {
        Self {
            inbox,
            tasks,
            agent_name: agent_name.into(),
            agent_system_prompt: agent_system_prompt.into(),
            team_agents,
            team_roster,
            is_leader,
            lead_agent,
        }
    }

    fn direct_connections(&self) -> Vec<&str> {
        self.team_agents
            .iter()
            .filter(|a| **a != self.agent_name)
            .map(String::as_str)
            .collect()
    }

    /// Build the full system prompt including team context and the scoped
    /// task list.
    pub async fn build_system_prompt(&self) -> Result<String, StoreError> {
        let connections = self.direct_connections();

        // Scope: tasks owned by this agent or a direct connection, plus
        // unassigned ones.
        let all_tasks = self.tasks.list_tasks().await?;
        let relevant: Vec<_> = all_tasks
            .iter()
            .filter(|t| match t.owner.as_deref() {
                Some(owner) => owner == self.agent_name || connections.contains(&owner),
                None => true,
            })
            .collect();

        let task_summary = if relevant.is_empty() {
            String::new()
        } else {
            let lines: Vec<String> = relevant
                .iter()
                .map(|t| {
                    let owner = t.owner.as_deref().unwrap_or("unassigned");
                    let blocked = if t.blocked_by.is_empty() {
                        String::new()
                    } else {
                        format!(" (blocked by: {:?})", t.blocked_by)
                    };
                    format!(
                        "  #{} [{}] {} — owner: {}{}",
                        t.id, t.status, t.subject, owner, blocked
                    )
                })
                .collect();
            format!("\n\nCurrent tasks:\n{}", lines.join("\n"))
        };

        let conn_lines: Vec<String> = connections
            .iter()
            .map(|name| {
                match self
                    .team_roster
                    .iter()
                    .find(|r| r.name == *name && !r.description.is_empty())
                {
                    Some(entry) => {
                        let role_label = match entry.role {
                            AgentRole::Leader => "leader",
                            AgentRole::Teammate => "teammate",
                        };
                        format!("  - {name} ({role_label}): {}", entry.description)
                    }
                    None => format!("  - {name}"),
                }
            })
            .collect();
        let conn_block = if conn_lines.is_empty() {
            "  (none)".to_string()
        } else {
            conn_lines.join("\n")
        };

        let superior_line = match &self.lead_agent {
            Some(lead) => format!("\nYou report to: {lead}"),
            None => String::new(),
        };

        Ok(format!(
            "{}\n\n\
             # Team Context\n\
             You are agent \"{}\".{}\n\
             Your direct team:\n\
             {}\n\n\
             Tools available:\n\
             - SendMessage: Send a message (type=message, recipient=name) or broadcast (type=broadcast)\n\
             - TaskCreate: Create a new task\n\
             - TaskUpdate: Update task status/owner\n\
             - TaskList: List all tasks\n\
             - TaskGet: Get task details\n\n\
             IMPORTANT: Before creating tasks, check the \"Current tasks\" list below. \
             Do NOT create tasks that already exist. Use each agent's name exactly as shown above.\n\
             {}\n\
             {}",
            self.agent_system_prompt,
            self.agent_name,
            superior_line,
            conn_block,
            self.role_instructions(),
            task_summary
        ))
    }

    /// Role-specific instructions derived from the hierarchy position.
    ///
    /// Leaders are recursive: a leader with a parent leader acts as a
    /// sub-leader and reports upward instead of answering the user.
    fn role_instructions(&self) -> String {
        if !self.is_leader {
            let lead_name = self.lead_agent.as_deref().unwrap_or("the leader");
            return format!(
                "\n## Teammate Responsibilities\n\
                 You are a TEAMMATE. You report to \"{lead_name}\". You must:\n\
                 1. When you receive a task, do the work described — produce the FULL deliverable\n\
                 2. Send your COMPLETE work product back to \"{lead_name}\" via SendMessage. \
                 Include ALL of your output in the message — your lead cannot see your thinking, \
                 only what you explicitly send. Do NOT just say \"done\" or \"task complete\" — \
                 send the actual content (spec, analysis, design, code, etc.)\n\
                 3. Mark your assigned task as completed using TaskUpdate (status=\"completed\")\n\
                 4. After completing ALL your tasks, request shutdown by sending: \
                 SendMessage with type=\"shutdown_request\", recipient=\"{lead_name}\", \
                 content=\"All tasks complete\"\n"
            );
        }

        let direct_reports: Vec<&str> = self
            .team_agents
            .iter()
            .filter(|a| **a != self.agent_name && Some(a.as_str()) != self.lead_agent.as_deref())
            .map(String::as_str)
            .collect();
        let reports_str = if direct_reports.is_empty() {
            "your teammates".to_string()
        } else {
            direct_reports
                .iter()
                .map(|r| format!("\"{r}\""))
                .collect::<Vec<_>>()
                .join(", ")
        };

        let (reporting, completion) = match &self.lead_agent {
            Some(lead) => (
                format!(
                    "You report to \"{lead}\".\n\
                     When you receive tasks from \"{lead}\", delegate them to your team."
                ),
                format!(
                    "After ALL your reports have completed and shut down:\n\
                     7. Compile your team's deliverables into a COMPLETE report and send it to \
                     \"{lead}\" via SendMessage. Include ALL the actual content from your reports — \
                     your lead cannot see what your teammates sent you, only what you explicitly \
                     forward. Do NOT just say \"work is done\" — send the full compiled output.\n\
                     8. Then request shutdown: SendMessage with type=\"shutdown_request\", \
                     recipient=\"{lead}\", content=\"All tasks complete\""
                ),
            ),
            None => (
                "You receive requests directly from the user.".to_string(),
                "After ALL your reports have completed and shut down:\n\
                 7. Write a comprehensive FINAL REPORT as your text response (not via SendMessage). \
                 This report is shown directly to the user and should include:\n\
                 \x20  - A summary of what was accomplished\n\
                 \x20  - Key results or findings from each teammate\n\
                 \x20  - Any issues encountered\n\
                 \x20  This is CRITICAL — the user cannot see inter-agent messages, so your final \
                 text response is their ONLY way to see the results."
                    .to_string(),
            ),
        };

        format!(
            "\n## Leader Responsibilities\n\
             You are a LEADER who manages: {reports_str}.\n\
             {reporting}\n\n\
             CRITICAL: You must NEVER do the work yourself. Your job is to DELEGATE to your team.\n\n\
             1. Break tasks into sub-tasks using TaskCreate — one per report\n\
             2. Assign each sub-task using TaskUpdate (set owner to their exact name)\n\
             3. Send each report a message via SendMessage explaining their assignment\n\
             4. WAIT for your reports to complete — do NOT do their work\n\
             5. When a report sends a shutdown_request, approve it: SendMessage with \
             type=\"shutdown_response\", recipient=their name\n\
             6. Make sure every task is marked as completed (status=\"completed\") using TaskUpdate\n\
             {completion}\n\n\
             ## Handling Unresponsive Teammates\n\
             The system will send you status checks when the team is idle. Pay attention to task status:\n\
             - Task is \"in_progress\" → the teammate is actively working. Be patient, do NOT interrupt.\n\
             - Task is \"pending\" and owner has been idle → the teammate has NOT started. \
             Send them a follow-up message.\n\
             - If a teammate still doesn't respond after a follow-up, REASSIGN the task to another \
             teammate using TaskUpdate (change owner).\n\
             - As a LAST RESORT only — if no teammates are available, you may do the work yourself."
        )
    }

    /// Build the full message list for an LLM call.
    ///
    /// Reads and consumes the unread inbox; the new messages become the
    /// final user message, with protocol envelopes rendered as a compact
    /// `[Protocol: ...]` tag instead of their raw JSON.
    pub async fn build_messages(
        &self,
        conversation_history: &[ChatMessage],
    ) -> Result<Vec<ChatMessage>, StoreError> {
        let system_prompt = self.build_system_prompt().await?;
        let mut messages = Vec::with_capacity(conversation_history.len() + 2);
        messages.push(ChatMessage::system(system_prompt));
        messages.extend_from_slice(conversation_history);

        let unread = self.inbox.read_unread(&self.agent_name).await?;
        if !unread.is_empty() {
            let parts: Vec<String> = unread
                .iter()
                .map(|m| match ProtocolEnvelope::parse(&m.text) {
                    Some(env) => {
                        format!("[Protocol: {} from {}]", env.event.type_name(), m.from)
                    }
                    None => format!("[Message from {}]: {}", m.from, m.text),
                })
                .collect();
            messages.push(ChatMessage::user(parts.join("\n\n")));
        }

        Ok(messages)
    }
}
