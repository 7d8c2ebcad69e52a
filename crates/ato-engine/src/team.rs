//! Session orchestration: hierarchy resolution, the scheduler loop, idle
//! nudges, user-message routing, and graceful shutdown.

use crate::broadcast::EventBroadcaster;
use crate::context::{ContextBuilder, RosterEntry};
use crate::events::{EventEmitter, EventKind};
use crate::history::HistorySink;
use crate::runner::AgentRunner;
use crate::tools::ToolExecutor;
use ato_core::protocol::ProtocolEnvelope;
use ato_core::schema::{AgentConfig, AgentRole, Message, Task};
use ato_core::store::{InboxStore, TaskStore};
use ato_core::text::truncate_chars;
use ato_llm::{LlmProvider, ProviderError, provider_for};
use serde_json::json;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Fixed palette assigned to runners by roster index.
pub const AGENT_COLORS: [&str; 4] = ["blue", "green", "orange", "purple"];

/// Seconds of no unread messages before the session terminates itself.
pub const IDLE_TIMEOUT_SECS: u64 = 300;

/// Seconds of idleness before leaders get a status-check nudge.
pub const LEADER_NUDGE_INTERVAL_SECS: u64 = 60;

/// Pause between scheduler rounds, letting in-flight appends land.
const INTER_ROUND_PAUSE: Duration = Duration::from_millis(500);

/// Length cap for roster descriptions shown to teammates.
const ROSTER_DESCRIPTION_CHARS: usize = 200;

/// Immutable inputs for one session.
#[derive(Clone)]
pub struct EngineConfig {
    pub session_id: String,
    pub agents: Vec<AgentConfig>,
    pub api_keys: HashMap<String, String>,
    pub base_dir: PathBuf,
}

/// Resolves a concrete provider for an agent. Swappable so tests can hand
/// every agent a scripted mock.
pub type ProviderFactory =
    Arc<dyn Fn(&AgentConfig) -> Result<Arc<dyn LlmProvider>, ProviderError> + Send + Sync>;

/// The resolved leader hierarchy for a session.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    /// The unique agent with no parent. `None` only for an empty roster.
    pub top_leader: Option<String>,
    /// Parent pointer per agent (`None` for the top leader).
    pub parent: HashMap<String, Option<String>>,
}

/// Resolve the hierarchy once from the roster.
///
/// Top leader: first agent whose role is leader, else the first listed
/// agent. Every other agent reports to the first leader among its
/// connections (excluding itself), falling back to the top leader.
pub fn resolve_hierarchy(configs: &[AgentConfig]) -> Hierarchy {
    let role_of: HashMap<&str, AgentRole> =
        configs.iter().map(|c| (c.name.as_str(), c.role)).collect();

    let top_leader = configs
        .iter()
        .find(|c| c.role == AgentRole::Leader)
        .or_else(|| configs.first())
        .map(|c| c.name.clone());

    let mut parent = HashMap::new();
    for cfg in configs {
        if Some(&cfg.name) == top_leader.as_ref() {
            parent.insert(cfg.name.clone(), None);
            continue;
        }
        let lead = cfg
            .connections
            .iter()
            .find(|conn| {
                *conn != &cfg.name && role_of.get(conn.as_str()) == Some(&AgentRole::Leader)
            })
            .cloned()
            .or_else(|| top_leader.clone());
        parent.insert(cfg.name.clone(), lead);
    }

    Hierarchy { top_leader, parent }
}

struct EngineShared {
    config: EngineConfig,
    hierarchy: Hierarchy,
    agent_names: Vec<String>,
    inbox: Arc<InboxStore>,
    tasks: Arc<TaskStore>,
    runners: HashMap<String, Arc<Mutex<AgentRunner>>>,
    emitter: EventEmitter,
    /// Wall-clock of each agent's last completed turn.
    last_active: StdMutex<HashMap<String, Instant>>,
    running: AtomicBool,
}

/// Orchestrates a team of agents for a single session.
pub struct TeamEngine {
    shared: Arc<EngineShared>,
    cancel: CancellationToken,
    scheduler: StdMutex<Option<JoinHandle<()>>>,
}

/// Factory: mint a session id and build the engine for a roster.
pub fn create_session(
    agents: Vec<AgentConfig>,
    api_keys: HashMap<String, String>,
    base_dir: impl Into<PathBuf>,
    broadcaster: Arc<EventBroadcaster>,
    sink: Arc<dyn HistorySink>,
) -> anyhow::Result<(String, TeamEngine)> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let engine = TeamEngine::new(
        EngineConfig {
            session_id: session_id.clone(),
            agents,
            api_keys,
            base_dir: base_dir.into(),
        },
        broadcaster,
        sink,
    )?;
    Ok((session_id, engine))
}

impl TeamEngine {
    /// Build an engine resolving providers by name through
    /// [`ato_llm::provider_for`].
    pub fn new(
        config: EngineConfig,
        broadcaster: Arc<EventBroadcaster>,
        sink: Arc<dyn HistorySink>,
    ) -> anyhow::Result<Self> {
        Self::with_provider_factory(
            config,
            broadcaster,
            sink,
            Arc::new(|cfg: &AgentConfig| provider_for(&cfg.provider)),
        )
    }

    /// Build an engine with an explicit provider factory (tests use this to
    /// wire scripted providers per agent).
    pub fn with_provider_factory(
        config: EngineConfig,
        broadcaster: Arc<EventBroadcaster>,
        sink: Arc<dyn HistorySink>,
        providers: ProviderFactory,
    ) -> anyhow::Result<Self> {
        let inbox = Arc::new(InboxStore::new(&config.base_dir, &config.session_id));
        let tasks = Arc::new(TaskStore::new(&config.base_dir, &config.session_id)?);
        let emitter = EventEmitter::new(&config.session_id, broadcaster, sink);

        let hierarchy = resolve_hierarchy(&config.agents);
        info!(
            session = %config.session_id,
            top_leader = ?hierarchy.top_leader,
            "hierarchy resolved"
        );

        let agent_names: Vec<String> = config.agents.iter().map(|c| c.name.clone()).collect();
        let roster_of: HashMap<&str, &AgentConfig> =
            config.agents.iter().map(|c| (c.name.as_str(), c)).collect();

        let mut runners = HashMap::new();
        for (i, cfg) in config.agents.iter().enumerate() {
            // Per-agent scope: explicit connections when given, the whole
            // roster otherwise.
            let team_agents: Vec<String> = if cfg.connections.is_empty() {
                agent_names.clone()
            } else {
                std::iter::once(cfg.name.clone())
                    .chain(cfg.connections.iter().cloned())
                    .collect()
            };

            let team_roster: Vec<RosterEntry> = team_agents
                .iter()
                .filter(|name| **name != cfg.name)
                .filter_map(|name| roster_of.get(name.as_str()))
                .map(|c| RosterEntry {
                    name: c.name.clone(),
                    role: c.role,
                    description: truncate_chars(&c.system_prompt, ROSTER_DESCRIPTION_CHARS)
                        .to_string(),
                })
                .collect();

            let lead_agent = hierarchy.parent.get(&cfg.name).cloned().flatten();
            let is_leader = cfg.role == AgentRole::Leader;
            let api_key = config.api_keys.get(&cfg.provider).cloned().unwrap_or_default();
            let provider = providers(cfg)?;

            let context = ContextBuilder::new(
                Arc::clone(&inbox),
                Arc::clone(&tasks),
                &cfg.name,
                &cfg.system_prompt,
                team_agents.clone(),
                team_roster,
                is_leader,
                lead_agent.clone(),
            );
            let (executor, tool_events) = ToolExecutor::new(
                Arc::clone(&inbox),
                Arc::clone(&tasks),
                &cfg.name,
                team_agents,
            );

            let runner = AgentRunner::new(
                &cfg.name,
                provider,
                &cfg.model,
                api_key,
                Arc::clone(&inbox),
                context,
                executor,
                tool_events,
                lead_agent,
                is_leader,
                AGENT_COLORS[i % AGENT_COLORS.len()],
                emitter.clone(),
            );
            runners.insert(cfg.name.clone(), Arc::new(Mutex::new(runner)));
        }

        Ok(Self {
            shared: Arc::new(EngineShared {
                config,
                hierarchy,
                agent_names,
                inbox,
                tasks,
                runners,
                emitter,
                last_active: StdMutex::new(HashMap::new()),
                running: AtomicBool::new(false),
            }),
            cancel: CancellationToken::new(),
            scheduler: StdMutex::new(None),
        })
    }

    pub fn session_id(&self) -> &str {
        &self.shared.config.session_id
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.shared.hierarchy
    }

    pub fn runner(&self, name: &str) -> Option<Arc<Mutex<AgentRunner>>> {
        self.shared.runners.get(name).cloned()
    }

    pub fn inbox_store(&self) -> Arc<InboxStore> {
        Arc::clone(&self.shared.inbox)
    }

    pub fn task_store(&self) -> Arc<TaskStore> {
        Arc::clone(&self.shared.tasks)
    }

    /// Announce the session and start the scheduler loop.
    pub async fn start(&self) {
        self.shared.running.store(true, Ordering::SeqCst);
        self.shared.emitter.emit(
            EventKind::SessionStart,
            None,
            json!({
                "session_id": self.shared.config.session_id,
                "agents": self.shared.agent_names,
            }),
        );

        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            scheduler_loop(shared, cancel).await;
        });
        *self.scheduler.lock().expect("scheduler handle poisoned") = Some(handle);
    }

    /// Route a user chat message; defaults to the top leader's inbox.
    pub async fn send_user_message(
        &self,
        text: &str,
        target_agent: Option<&str>,
    ) -> anyhow::Result<()> {
        let target = target_agent
            .map(str::to_string)
            .or_else(|| self.shared.hierarchy.top_leader.clone())
            .ok_or_else(|| anyhow::anyhow!("session has no agents"))?;
        let message = Message::new("user", text, None, None);
        self.shared.inbox.append(&target, message.clone()).await?;
        self.shared.emitter.record_message(&target, &message);
        info!(session = %self.shared.config.session_id, target = %target, "user message delivered");
        Ok(())
    }

    /// Stop the session: fan a shutdown request into every inbox, then
    /// cancel and await the scheduler.
    pub async fn stop(&self) -> anyhow::Result<()> {
        self.shared.running.store(false, Ordering::SeqCst);

        for name in &self.shared.agent_names {
            let env =
                ProtocolEnvelope::shutdown_request("system", "session ending", Some(name.clone()));
            self.shared.inbox.append(name, Message::protocol(&env)).await?;
        }
        self.shared.emitter.emit(
            EventKind::ProtocolMessage,
            None,
            json!({"protocol_type": "shutdown_request", "reason": "session ending"}),
        );

        self.cancel.cancel();
        let handle = self
            .scheduler
            .lock()
            .expect("scheduler handle poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        Ok(())
    }

    /// Remove all session data from disk.
    pub fn cleanup(&self) -> anyhow::Result<()> {
        self.shared.inbox.cleanup()?;
        Ok(())
    }
}

/// Main loop: wait for unread messages, then run the ready agents.
async fn scheduler_loop(shared: Arc<EngineShared>, cancel: CancellationToken) {
    let mut idle_seconds: u64 = 0;
    let mut last_nudge_at: u64 = 0;

    while shared.running.load(Ordering::SeqCst) && !cancel.is_cancelled() {
        let ready = match agents_with_unread(&shared).await {
            Ok(ready) => ready,
            Err(e) => {
                error!(session = %shared.config.session_id, "readiness scan failed: {e}");
                shared.emitter.emit(
                    EventKind::Error,
                    None,
                    json!({"message": format!("Orchestration error: {e}")}),
                );
                break;
            }
        };

        if ready.is_empty() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            }
            idle_seconds += 1;

            if idle_seconds >= LEADER_NUDGE_INTERVAL_SECS
                && idle_seconds - last_nudge_at >= LEADER_NUDGE_INTERVAL_SECS
                && has_incomplete_tasks(&shared).await
            {
                if let Err(e) = nudge_leaders(&shared).await {
                    warn!(session = %shared.config.session_id, "leader nudge failed: {e}");
                }
                last_nudge_at = idle_seconds;
            }

            if idle_seconds >= IDLE_TIMEOUT_SECS {
                info!(
                    session = %shared.config.session_id,
                    "idle timeout after {IDLE_TIMEOUT_SECS}s"
                );
                break;
            }
            continue;
        }

        idle_seconds = 0;

        // Run every ready agent concurrently; the join below is the barrier
        // that keeps the next readiness snapshot stable.
        let mut turns: JoinSet<(String, anyhow::Result<()>)> = JoinSet::new();
        for name in ready {
            let Some(runner) = shared.runners.get(&name).map(Arc::clone) else {
                continue;
            };
            let name_owned = name.clone();
            turns.spawn(async move {
                let mut runner = runner.lock().await;
                let outcome = runner.run_turn().await.map(|_| ()).map_err(Into::into);
                (name_owned, outcome)
            });
        }
        while let Some(joined) = turns.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    shared
                        .last_active
                        .lock()
                        .expect("last_active poisoned")
                        .insert(name, Instant::now());
                }
                Ok((name, Err(e))) => {
                    error!(session = %shared.config.session_id, agent = %name, "turn failed: {e}");
                    shared.emitter.emit(
                        EventKind::Error,
                        Some(&name),
                        json!({"message": e.to_string()}),
                    );
                }
                Err(e) => {
                    error!(session = %shared.config.session_id, "turn task panicked: {e}");
                }
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(INTER_ROUND_PAUSE) => {}
        }
    }

    shared.emitter.emit(
        EventKind::SessionEnd,
        None,
        json!({"session_id": shared.config.session_id}),
    );
}

async fn agents_with_unread(shared: &EngineShared) -> Result<Vec<String>, ato_core::StoreError> {
    let mut ready = Vec::new();
    for name in &shared.agent_names {
        let messages = shared.inbox.read_all(name).await?;
        if messages.iter().any(|m| !m.read) {
            ready.push(name.clone());
        }
    }
    Ok(ready)
}

async fn has_incomplete_tasks(shared: &EngineShared) -> bool {
    match shared.tasks.list_tasks().await {
        Ok(tasks) => tasks.iter().any(|t| !t.status.is_terminal()),
        Err(e) => {
            warn!(session = %shared.config.session_id, "task scan failed: {e}");
            false
        }
    }
}

/// Send each leader a status check about its own reports' open tasks.
async fn nudge_leaders(shared: &EngineShared) -> Result<(), ato_core::StoreError> {
    let tasks = shared.tasks.list_tasks().await?;
    let incomplete: Vec<&Task> = tasks.iter().filter(|t| !t.status.is_terminal()).collect();
    if incomplete.is_empty() {
        return Ok(());
    }

    // leader -> direct reports, from the resolved parent map.
    let mut leader_reports: HashMap<&str, Vec<&str>> = HashMap::new();
    for (agent, lead) in &shared.hierarchy.parent {
        if let Some(lead) = lead {
            leader_reports.entry(lead.as_str()).or_default().push(agent.as_str());
        }
    }

    let top_leader = shared.hierarchy.top_leader.as_deref();
    let last_active = shared
        .last_active
        .lock()
        .expect("last_active poisoned")
        .clone();

    for (leader, reports) in leader_reports {
        let report_tasks: Vec<&&Task> = incomplete
            .iter()
            .filter(|t| match t.owner.as_deref() {
                Some(owner) => reports.contains(&owner),
                None => Some(leader) == top_leader,
            })
            .collect();
        if report_tasks.is_empty() {
            continue;
        }

        let lines: Vec<String> = report_tasks
            .iter()
            .map(|t| {
                let owner = t.owner.as_deref().unwrap_or("unassigned");
                let idle_info = if owner == "unassigned" {
                    String::new()
                } else {
                    match last_active.get(owner) {
                        Some(instant) => {
                            let idle_secs = instant.elapsed().as_secs();
                            match t.status {
                                ato_core::TaskStatus::InProgress => {
                                    format!(" — working (last active {idle_secs}s ago)")
                                }
                                ato_core::TaskStatus::Pending => {
                                    format!(" — NOT STARTED, idle {idle_secs}s")
                                }
                                _ => String::new(),
                            }
                        }
                        None => " — never ran a turn".to_string(),
                    }
                };
                format!("  #{} {} [{}] owner: {}{}", t.id, t.subject, t.status, owner, idle_info)
            })
            .collect();

        let text = format!(
            "[Status check] Your team has been idle. Tasks needing attention:\n{}\n\n\
             If a task is 'in_progress', the teammate may still be working — be patient. \
             If a task is 'pending' and the owner has been idle, follow up or reassign the task.",
            lines.join("\n")
        );
        shared
            .inbox
            .append(
                leader,
                Message::new(
                    "system",
                    text,
                    Some("Status check: tasks needing attention".to_string()),
                    None,
                ),
            )
            .await?;
        info!(
            session = %shared.config.session_id,
            leader,
            tasks = report_tasks.len(),
            "nudged leader"
        );
    }
    Ok(())
}
