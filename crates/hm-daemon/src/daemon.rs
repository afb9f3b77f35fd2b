//! Daemon wiring: the shared [`Orchestrator`] handle, the tick loops,
//! client command handling, and snapshot composition.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use hm_agents::{AgentRegistry, NewTask, TaskError, TaskManager};
use hm_backend::prompt::SkillTemplate;
use hm_backend::{env_snapshot, BackendError};
use hm_bus::broadcaster::SnapshotSource;
use hm_bus::protocol::{AgentPerformanceView, AgentView, CategoryScoreView, LightTask};
use hm_bus::{ClientCommand, EventBus, StateSnapshot};
use hm_core::config::{Config, ConfigError};
use hm_exec::{ExecError, WorkspaceExecutor};
use hm_memory::{MemoryError, MemoryStore};

use crate::dispatch::select_agent;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Task(#[from] TaskError),
    #[error(transparent)]
    Registry(#[from] hm_agents::RegistryError),
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error(transparent)]
    Memory(#[from] MemoryError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("task `{0}` is not awaiting review")]
    NotInReview(String),
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Cheap-clone handle over the state owners. Each task execution, the
/// tick loops, and the broadcaster all hold their own clone.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) bus: EventBus,
    pub(crate) registry: Arc<AgentRegistry>,
    pub(crate) manager: Arc<TaskManager>,
    pub(crate) memory: Arc<MemoryStore>,
    pub(crate) executor: Arc<WorkspaceExecutor>,
    pub(crate) skills: Arc<Vec<SkillTemplate>>,
    pub(crate) max_concurrent: usize,
    pub(crate) dispatch_interval: Duration,
    pub(crate) recharge_interval: Duration,
    pub(crate) cooldown: Duration,
}

impl Orchestrator {
    /// Assemble every component from configuration.
    pub fn from_config(config: &Config) -> Result<Self, DaemonError> {
        config.validate()?;
        let bus = EventBus::new();
        let env = env_snapshot();
        let registry = Arc::new(AgentRegistry::load(bus.clone(), &config.agents, &env));
        let manager = Arc::new(TaskManager::new(bus.clone()));
        let memory = Arc::new(MemoryStore::open(&config.memory.dir)?);
        let executor = Arc::new(WorkspaceExecutor::new(&config.workspace.root)?);

        Ok(Self {
            bus,
            registry,
            manager,
            memory,
            executor,
            skills: Arc::new(Vec::new()),
            max_concurrent: config.orchestrator.max_concurrent,
            dispatch_interval: Duration::from_millis(config.orchestrator.dispatch_interval_ms),
            recharge_interval: Duration::from_secs(config.orchestrator.recharge_interval_secs),
            cooldown: Duration::from_secs(config.orchestrator.rate_limit_cooldown_secs),
        })
    }

    /// Attach skill templates (discovered by the host, e.g. from markdown
    /// files).
    pub fn with_skills(mut self, skills: Vec<SkillTemplate>) -> Self {
        self.skills = Arc::new(skills);
        self
    }

    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn manager(&self) -> &TaskManager {
        &self.manager
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    // -- Dispatch -----------------------------------------------------------

    /// One dispatch pass: while there is headroom under the concurrency
    /// cap, pair the highest-priority pending task with an agent and
    /// launch its pipeline. Never blocks on execution.
    pub fn dispatch_tick(&self) {
        loop {
            if self.registry.working_count() >= self.max_concurrent {
                return;
            }
            let Some(task) = self.manager.pending_queue().into_iter().next() else {
                return;
            };
            let callable = self.registry.callable();
            let perf = self.memory.performance();
            let Some(agent_id) = select_agent(&task, &callable, &perf, rand::random()) else {
                // nothing callable: tasks stay pending, no failure recorded
                return;
            };

            if self.registry.mark_working(&agent_id, &task.id).is_err() {
                continue;
            }
            if self.manager.assign(&task.id, &agent_id).is_err() {
                // task vanished between picks (e.g. cancelled); undo the gate
                let _ = self.registry.release(&agent_id);
                continue;
            }

            info!(task_id = %task.id, agent = %agent_id, "dispatching task");
            let ctx = self.clone();
            let task_id = task.id.clone();
            tokio::spawn(async move {
                ctx.execute_task(&task_id, &agent_id).await;
            });
        }
    }

    /// Drive the dispatch and recharge ticks until the future is dropped.
    pub async fn run(&self) {
        let mut dispatch = tokio::time::interval(self.dispatch_interval);
        let mut recharge = tokio::time::interval(self.recharge_interval);
        loop {
            tokio::select! {
                _ = dispatch.tick() => self.dispatch_tick(),
                _ = recharge.tick() => self.registry.recharge_all(),
            }
        }
    }

    // -- Client commands ----------------------------------------------------

    pub async fn handle_command(&self, command: ClientCommand) -> Result<(), DaemonError> {
        match command {
            ClientCommand::CreateTask {
                title,
                description,
                agent_id,
                agent_ids,
            } => {
                let preferred: Vec<String> = match agent_ids {
                    Some(ids) if !ids.is_empty() => ids,
                    _ => vec![agent_id.unwrap_or_else(|| "auto".to_string())],
                };
                for agent in preferred {
                    self.manager.create_task(
                        NewTask::user(title.clone(), description.clone())
                            .with_preferred_agent(agent),
                    );
                }
                Ok(())
            }
            ClientCommand::AddAgent { agent } => {
                self.registry.add(agent, &env_snapshot())?;
                Ok(())
            }
            ClientCommand::ApproveTask { task_id } => self.approve_task(&task_id).await,
            ClientCommand::RejectTask { task_id } => self.reject_task(&task_id),
            ClientCommand::ToggleAutoApprove => {
                let on = self.manager.toggle_auto_approve();
                info!(auto_approve_all = on, "auto-approve toggled");
                Ok(())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot composition
// ---------------------------------------------------------------------------

impl SnapshotSource for Orchestrator {
    /// Copy observable state out under brief locks; encoding and sending
    /// happen elsewhere.
    fn snapshot(&self) -> StateSnapshot {
        let agents = self.registry.list();
        let perf = self.memory.performance();

        let performance = agents
            .iter()
            .map(|agent| {
                let id = agent.spec.id.as_str();
                let categories = perf
                    .0
                    .get(id)
                    .map(|cats| {
                        cats.iter()
                            .filter(|(_, rec)| rec.count > 0)
                            .map(|(tag, rec)| {
                                (
                                    tag.clone(),
                                    CategoryScoreView {
                                        avg: rec.avg,
                                        count: rec.count,
                                    },
                                )
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                (
                    id.to_string(),
                    AgentPerformanceView {
                        overall: perf.overall_score(id),
                        categories,
                    },
                )
            })
            .collect();

        StateSnapshot {
            agents: agents
                .iter()
                .map(|a| AgentView::new(&a.spec, &a.runtime))
                .collect(),
            tasks: self.manager.list().iter().map(LightTask::from).collect(),
            performance,
            recent_memory: self
                .memory
                .recent_history(10)
                .into_iter()
                .map(|(_, entry)| entry)
                .collect(),
            activity: self.bus.recent_activity(50),
            auto_approve_all: self.manager.auto_approve_all(),
            archived_tasks: self.manager.archived_count(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
