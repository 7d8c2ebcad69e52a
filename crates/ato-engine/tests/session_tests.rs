//! Session-level scenarios: construction, scheduling, routing, shutdown.

use ato_core::protocol::{ProtocolEnvelope, ProtocolEvent};
use ato_core::schema::{AgentConfig, AgentRole};
use ato_engine::broadcast::EventBroadcaster;
use ato_engine::events::EventKind;
use ato_engine::history::NullSink;
use ato_engine::team::{EngineConfig, TeamEngine, create_session};
use ato_llm::mock::ScriptedProvider;
use ato_llm::{LlmProvider, ProviderError};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn three_agent_roster() -> Vec<AgentConfig> {
    vec![
        AgentConfig::new("lead", "anthropic", "claude-sonnet-4-6")
            .with_role(AgentRole::Leader)
            .with_system_prompt("You coordinate the team.")
            .with_connections(vec!["worker-a".into(), "worker-b".into()]),
        AgentConfig::new("worker-a", "anthropic", "claude-sonnet-4-6")
            .with_system_prompt("You research.")
            .with_connections(vec!["lead".into()]),
        AgentConfig::new("worker-b", "anthropic", "claude-sonnet-4-6")
            .with_system_prompt("You write.")
            .with_connections(vec!["lead".into()]),
    ]
}

fn scripted_engine(
    dir: &TempDir,
    agents: Vec<AgentConfig>,
    providers: HashMap<String, Arc<dyn LlmProvider>>,
    broadcaster: Arc<EventBroadcaster>,
) -> TeamEngine {
    ato_core::logging::init();
    let config = EngineConfig {
        session_id: "session-under-test".into(),
        agents,
        api_keys: HashMap::new(),
        base_dir: dir.path().to_path_buf(),
    };
    TeamEngine::with_provider_factory(
        config,
        broadcaster,
        Arc::new(NullSink),
        Arc::new(move |cfg: &AgentConfig| {
            providers
                .get(&cfg.name)
                .cloned()
                .ok_or_else(|| ProviderError::UnknownProvider(cfg.name.clone()))
        }),
    )
    .unwrap()
}

fn all_scripted(names: &[&str]) -> HashMap<String, Arc<dyn LlmProvider>> {
    names
        .iter()
        .map(|n| {
            (
                n.to_string(),
                Arc::new(ScriptedProvider::always_text("ok")) as Arc<dyn LlmProvider>,
            )
        })
        .collect()
}

#[tokio::test]
async fn colors_and_hierarchy_are_assigned_at_construction() {
    let dir = TempDir::new().unwrap();
    let engine = scripted_engine(
        &dir,
        three_agent_roster(),
        all_scripted(&["lead", "worker-a", "worker-b"]),
        Arc::new(EventBroadcaster::new()),
    );

    let hierarchy = engine.hierarchy();
    assert_eq!(hierarchy.top_leader.as_deref(), Some("lead"));
    assert_eq!(hierarchy.parent["lead"], None);
    assert_eq!(hierarchy.parent["worker-a"].as_deref(), Some("lead"));
    assert_eq!(hierarchy.parent["worker-b"].as_deref(), Some("lead"));

    let expected = [("lead", "blue"), ("worker-a", "green"), ("worker-b", "orange")];
    for (name, color) in expected {
        let runner = engine.runner(name).unwrap();
        let runner = runner.lock().await;
        assert_eq!(runner.color(), color, "color of {name}");
        assert_eq!(runner.name(), name);
    }
    let lead = engine.runner("lead").unwrap();
    assert!(lead.lock().await.is_leader());
    assert_eq!(
        engine.runner("worker-a").unwrap().lock().await.lead_agent(),
        Some("lead")
    );
}

#[tokio::test]
async fn fifth_agent_wraps_around_the_palette() {
    let dir = TempDir::new().unwrap();
    let names = ["a", "b", "c", "d", "e"];
    let agents: Vec<AgentConfig> = names
        .iter()
        .map(|n| AgentConfig::new(*n, "anthropic", "claude-sonnet-4-6"))
        .collect();
    let engine = scripted_engine(
        &dir,
        agents,
        all_scripted(&names),
        Arc::new(EventBroadcaster::new()),
    );
    assert_eq!(engine.runner("e").unwrap().lock().await.color(), "blue");
}

#[tokio::test]
async fn user_messages_default_to_the_top_leader() {
    let dir = TempDir::new().unwrap();
    let engine = scripted_engine(
        &dir,
        three_agent_roster(),
        all_scripted(&["lead", "worker-a", "worker-b"]),
        Arc::new(EventBroadcaster::new()),
    );

    engine.send_user_message("hello team", None).await.unwrap();
    let inbox = engine.inbox_store().read_all("lead").await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].from, "user");
    assert_eq!(inbox[0].text, "hello team");
    assert!(!inbox[0].read);

    // Explicit target overrides the default.
    engine
        .send_user_message("psst, direct question", Some("worker-b"))
        .await
        .unwrap();
    let inbox = engine.inbox_store().read_all("worker-b").await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].from, "user");
}

#[tokio::test]
async fn stop_fans_shutdown_requests_into_every_inbox() {
    let dir = TempDir::new().unwrap();
    let broadcaster = Arc::new(EventBroadcaster::new());
    let engine = scripted_engine(
        &dir,
        three_agent_roster(),
        all_scripted(&["lead", "worker-a", "worker-b"]),
        Arc::clone(&broadcaster),
    );
    let mut stream = broadcaster.subscribe(engine.session_id());

    engine.start().await;
    engine.stop().await.unwrap();

    for name in ["lead", "worker-a", "worker-b"] {
        let inbox = engine.inbox_store().read_all(name).await.unwrap();
        let shutdowns: Vec<_> = inbox
            .iter()
            .filter_map(|m| ProtocolEnvelope::parse(&m.text))
            .filter(|e| e.event.type_name() == "shutdown_request")
            .collect();
        assert_eq!(shutdowns.len(), 1, "{name} should hold one shutdown request");
        assert_eq!(shutdowns[0].from, "system");
        match &shutdowns[0].event {
            ProtocolEvent::ShutdownRequest { reason, target, .. } => {
                assert_eq!(reason, "session ending");
                assert_eq!(target.as_deref(), Some(name));
            }
            other => panic!("expected ShutdownRequest, got {other:?}"),
        }
    }

    // The stream saw session_start, the fan-out protocol event, and the
    // terminal session_end.
    let mut kinds = Vec::new();
    while let Ok(Some(event)) =
        tokio::time::timeout(Duration::from_secs(2), stream.next_event()).await
    {
        kinds.push(event.kind);
    }
    assert_eq!(kinds.first(), Some(&EventKind::SessionStart));
    assert!(kinds.contains(&EventKind::ProtocolMessage));
    assert_eq!(kinds.last(), Some(&EventKind::SessionEnd));
}

#[tokio::test]
async fn agents_short_circuit_on_the_next_turn_after_stop() {
    let dir = TempDir::new().unwrap();
    let engine = scripted_engine(
        &dir,
        three_agent_roster(),
        all_scripted(&["lead", "worker-a", "worker-b"]),
        Arc::new(EventBroadcaster::new()),
    );

    engine.start().await;
    engine.stop().await.unwrap();

    for name in ["lead", "worker-a", "worker-b"] {
        let runner = engine.runner(name).unwrap();
        let report = runner.lock().await.run_turn().await.unwrap();
        assert!(report.shutdown, "{name} should short-circuit");
        assert_eq!(report.loops, 0);
    }

    // Workers approved to the lead; the lead (no parent) approved nobody.
    let approvals: Vec<_> = engine
        .inbox_store()
        .read_all("lead")
        .await
        .unwrap()
        .iter()
        .filter_map(|m| ProtocolEnvelope::parse(&m.text))
        .filter(|e| e.event.type_name() == "shutdown_approved")
        .collect();
    assert_eq!(approvals.len(), 2);
}

#[tokio::test]
async fn scheduler_drives_delegation_end_to_end() {
    let dir = TempDir::new().unwrap();
    let broadcaster = Arc::new(EventBroadcaster::new());

    // Lead: create a task, hand it to worker-a, then report.
    let lead_provider = ScriptedProvider::new(vec![
        ScriptedProvider::tool_call_response(
            "TaskCreate",
            json!({"subject": "Summarize the findings", "description": "one page"}),
        ),
        ScriptedProvider::tool_call_response(
            "TaskUpdate",
            json!({"taskId": "1", "owner": "worker-a"}),
        ),
        ScriptedProvider::text_response("delegated to worker-a"),
    ]);
    // Worker-a: complete the task, then answer in text.
    let worker_a_provider = ScriptedProvider::new(vec![
        ScriptedProvider::tool_call_response(
            "TaskUpdate",
            json!({"taskId": "1", "status": "completed"}),
        ),
        ScriptedProvider::text_response("summary attached"),
    ]);

    let mut providers: HashMap<String, Arc<dyn LlmProvider>> = HashMap::new();
    providers.insert("lead".into(), Arc::new(lead_provider));
    providers.insert("worker-a".into(), Arc::new(worker_a_provider.clone()));
    providers.insert(
        "worker-b".into(),
        Arc::new(ScriptedProvider::always_text("idle hands")),
    );

    let engine = scripted_engine(&dir, three_agent_roster(), providers, broadcaster);
    engine.start().await;
    engine
        .send_user_message("please summarize the findings", None)
        .await
        .unwrap();

    // Wait until the worker completed the task through the scheduler.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let task = engine.task_store().get_task("1").await.unwrap();
        if task.map(|t| t.status == ato_core::TaskStatus::Completed).unwrap_or(false) {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "task never reached completed"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // worker-a received the assignment envelope along the way.
    let assignment_seen = engine
        .inbox_store()
        .read_all("worker-a")
        .await
        .unwrap()
        .iter()
        .filter_map(|m| ProtocolEnvelope::parse(&m.text))
        .any(|e| e.event.type_name() == "task_assignment");
    assert!(assignment_seen);

    // The lead eventually hears about the completion.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let completed_seen = engine
            .inbox_store()
            .read_all("lead")
            .await
            .unwrap()
            .iter()
            .filter_map(|m| ProtocolEnvelope::parse(&m.text))
            .any(|e| e.event.type_name() == "task_completed");
        if completed_seen {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "lead never saw task_completed"
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    engine.stop().await.unwrap();
    engine.cleanup().unwrap();
    assert!(!dir.path().join("sessions/session-under-test").exists());
}

#[tokio::test]
async fn create_session_mints_unique_ids() {
    let dir = TempDir::new().unwrap();
    let agents = vec![AgentConfig::new("solo", "ollama", "llama3.2")];
    let (sid_a, engine_a) = create_session(
        agents.clone(),
        HashMap::new(),
        dir.path(),
        Arc::new(EventBroadcaster::new()),
        Arc::new(NullSink),
    )
    .unwrap();
    let (sid_b, _engine_b) = create_session(
        agents,
        HashMap::new(),
        dir.path(),
        Arc::new(EventBroadcaster::new()),
        Arc::new(NullSink),
    )
    .unwrap();

    assert_ne!(sid_a, sid_b);
    assert_eq!(engine_a.session_id(), sid_a);
    assert!(dir.path().join("sessions").join(&sid_a).join("tasks").exists());
}

#[tokio::test]
async fn sse_chunks_are_framed_for_the_wire() {
    let dir = TempDir::new().unwrap();
    let broadcaster = Arc::new(EventBroadcaster::new());
    let engine = scripted_engine(
        &dir,
        three_agent_roster(),
        all_scripted(&["lead", "worker-a", "worker-b"]),
        Arc::clone(&broadcaster),
    );
    let mut stream = broadcaster.subscribe(engine.session_id());

    engine.start().await;
    engine.stop().await.unwrap();

    let mut chunks = Vec::new();
    while let Ok(Some(chunk)) =
        tokio::time::timeout(Duration::from_secs(2), stream.next_chunk()).await
    {
        chunks.push(chunk);
    }
    assert!(!chunks.is_empty());
    for chunk in &chunks {
        assert!(chunk.starts_with("data: "));
        assert!(chunk.ends_with("\n\n"));
        let payload: serde_json::Value =
            serde_json::from_str(chunk.trim_start_matches("data: ").trim_end()).unwrap();
        assert_eq!(payload["session_id"], "session-under-test");
        assert!(payload["type"].is_string());
    }
    // Terminated by session_end.
    assert!(chunks.last().unwrap().contains("session_end"));
}
