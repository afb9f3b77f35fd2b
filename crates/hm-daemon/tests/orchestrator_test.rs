//! End-to-end orchestrator checks driven through the public surface:
//! client commands in, dispatch ticks, pipelines against mock backends,
//! snapshots out.

use std::time::Duration;

use hm_backend::{Backend, MockBackend};
use hm_bus::broadcaster::SnapshotSource;
use hm_bus::ClientCommand;
use hm_core::config::{AgentSpec, Config};
use hm_core::types::{AgentStatus, ProviderKind, TaskStatus};
use hm_daemon::Orchestrator;

fn mock_spec(id: &str) -> AgentSpec {
    AgentSpec {
        id: id.into(),
        display_name: id.to_uppercase(),
        provider: ProviderKind::Mock,
        endpoint: None,
        api_key_env: None,
        model: "test-model".into(),
        avatar: "robot".into(),
        role: "coder".into(),
        max_tokens: 512,
        energy_recharge_rate: 10,
        chat_template_kwargs: None,
    }
}

fn orchestrator(dir: &std::path::Path, agents: Vec<AgentSpec>) -> Orchestrator {
    let mut config = Config::default();
    config.workspace.root = dir.join("workspace");
    config.memory.dir = dir.join("memory");
    config.agents = agents;
    Orchestrator::from_config(&config).unwrap()
}

/// Poll until every live task settled or the deadline passes.
async fn settle(orch: &Orchestrator) {
    for _ in 0..100 {
        let busy = orch
            .manager()
            .list()
            .iter()
            .any(|t| matches!(t.status, TaskStatus::Pending | TaskStatus::Active));
        if !busy && orch.registry().working_count() == 0 {
            return;
        }
        orch.dispatch_tick();
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("tasks did not settle in time");
}

#[tokio::test]
async fn command_to_completion_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), vec![mock_spec("coder-1")]);
    orch.registry()
        .set_backend(
            "coder-1",
            Backend::Mock(
                MockBackend::new("test-model")
                    .with_text("FILE\npath: hello.js\nCONTENT\nconsole.log('hi');\nEND_FILE"),
            ),
        )
        .unwrap();

    orch.handle_command(ClientCommand::CreateTask {
        title: "write hello.js".into(),
        description: "print hi".into(),
        agent_id: None,
        agent_ids: None,
    })
    .await
    .unwrap();

    settle(&orch).await;

    let tasks = orch.manager().list();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].status, TaskStatus::Completed);
    assert!(dir.path().join("workspace/hello.js").exists());

    let snapshot = orch.snapshot();
    assert_eq!(snapshot.tasks[0].status, TaskStatus::Completed);
    assert!(snapshot.tasks[0].perf_score.unwrap() >= 35);
}

#[tokio::test]
async fn no_agent_is_double_booked() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), vec![mock_spec("a1"), mock_spec("a2")]);

    for i in 0..6 {
        orch.manager()
            .create_task(hm_agents::NewTask::user(format!("task {}", i), ""));
    }

    // a single tick can book each agent at most once
    orch.dispatch_tick();
    let active_per_agent = |orch: &Orchestrator| {
        let mut counts = std::collections::HashMap::new();
        for task in orch.manager().list() {
            if task.status == TaskStatus::Active {
                *counts
                    .entry(task.assigned_agent_id.clone().unwrap())
                    .or_insert(0usize) += 1;
            }
        }
        counts
    };
    for (agent, count) in active_per_agent(&orch) {
        assert_eq!(count, 1, "agent {agent} double-booked");
    }

    settle(&orch).await;
    assert!(orch
        .manager()
        .list()
        .iter()
        .all(|t| t.status == TaskStatus::Completed));
}

#[tokio::test]
async fn task_ids_stay_monotone_across_subtasks() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), vec![mock_spec("coder-1")]);
    orch.registry()
        .set_backend(
            "coder-1",
            Backend::Mock(
                MockBackend::new("test-model")
                    .with_text("SUBTASK\ntitle: child\nagent: auto\ndescription: d\nEND_SUBTASK"),
            ),
        )
        .unwrap();

    orch.manager().create_task(hm_agents::NewTask::user("parent", ""));
    settle(&orch).await;

    let ids: Vec<u64> = orch
        .manager()
        .list()
        .iter()
        .map(|t| t.id.trim_start_matches("TASK-").parse().unwrap())
        .collect();
    for pair in ids.windows(2) {
        assert!(pair[0] < pair[1], "ids out of order: {ids:?}");
    }
}

#[tokio::test]
async fn rate_limited_agent_recovers_after_cooldown() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), vec![mock_spec("coder-1")]);
    orch.registry()
        .set_backend(
            "coder-1",
            Backend::Mock(
                MockBackend::new("test-model")
                    .with_error(hm_backend::BackendError::RateLimited {
                        retry_after: Some(Duration::from_secs(60)),
                    })
                    .with_text("recovered"),
            ),
        )
        .unwrap();

    let first = orch.manager().create_task(hm_agents::NewTask::user("first", ""));
    orch.dispatch_tick();
    // wait for the failure to settle
    for _ in 0..50 {
        if orch.manager().get(&first.id).unwrap().status == TaskStatus::Failed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        orch.registry().get("coder-1").unwrap().runtime.status,
        AgentStatus::Cooldown
    );

    // while cooling, new tasks stay pending
    let second = orch.manager().create_task(hm_agents::NewTask::user("second", ""));
    orch.dispatch_tick();
    assert_eq!(
        orch.manager().get(&second.id).unwrap().status,
        TaskStatus::Pending
    );

    // expire the cooldown, let the recharge tick clear it, dispatch again
    orch.registry()
        .set_cooldown("coder-1", Duration::from_secs(0))
        .unwrap();
    orch.registry().recharge_all();
    settle(&orch).await;
    assert_eq!(
        orch.manager().get(&second.id).unwrap().status,
        TaskStatus::Completed
    );
}

#[tokio::test]
async fn review_flow_through_commands() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), vec![mock_spec("coder-1")]);
    orch.handle_command(ClientCommand::ToggleAutoApprove)
        .await
        .unwrap();
    orch.registry()
        .set_backend(
            "coder-1",
            Backend::Mock(
                MockBackend::new("test-model")
                    .with_text("FILE\npath: risky.rs\nCONTENT\nfn main() {}\nEND_FILE"),
            ),
        )
        .unwrap();

    let task = orch
        .manager()
        .create_task(hm_agents::NewTask::user("rewrite the core", ""));
    orch.dispatch_tick();
    for _ in 0..50 {
        if orch.manager().get(&task.id).unwrap().status == TaskStatus::Review {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!dir.path().join("workspace/risky.rs").exists());

    orch.handle_command(ClientCommand::ApproveTask {
        task_id: task.id.clone(),
    })
    .await
    .unwrap();
    assert_eq!(
        orch.manager().get(&task.id).unwrap().status,
        TaskStatus::Completed
    );
    assert!(dir.path().join("workspace/risky.rs").exists());
}

#[tokio::test]
async fn performance_feedback_biases_future_selection() {
    let dir = tempfile::tempdir().unwrap();
    let orch = orchestrator(dir.path(), vec![mock_spec("strong"), mock_spec("weak")]);
    // strong emits files (high scores), weak emits bare text (low scores)
    orch.registry()
        .set_backend("strong", Backend::Mock(MockBackend::new("test-model")))
        .unwrap();
    orch.registry()
        .set_backend("weak", Backend::Mock(MockBackend::new("test-model")))
        .unwrap();

    // seed history directly through the memory store
    for i in 0..10 {
        orch.memory().record_performance(
            "strong",
            &["javascript".to_string()],
            90,
            &format!("SEED-A{}", i),
            chrono::Utc::now(),
        );
        orch.memory().record_performance(
            "weak",
            &["javascript".to_string()],
            5,
            &format!("SEED-B{}", i),
            chrono::Utc::now(),
        );
    }

    let perf = orch.memory().performance();
    let callable = orch.registry().callable();
    let task = orch
        .manager()
        .create_task(hm_agents::NewTask::user("write hello.js", "javascript"));
    // with these seeds the weak agent's weight collapses to the floor;
    // any roll in the strong agent's band picks it
    let picked = hm_daemon::select_agent(&task, &callable, &perf, 0).unwrap();
    assert_eq!(picked, "strong");
}
