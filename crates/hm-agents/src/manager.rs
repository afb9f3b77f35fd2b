//! Task lifecycle owner.
//!
//! Tasks get monotone zero-padded ids, a priority-then-insertion pending
//! queue, and a strict transition table. New tasks are classified into
//! category tags and risk-gated: documentation-ish work auto-applies,
//! everything else parks in review unless the session-wide
//! auto-approve-all flag is on (it starts on; the toggle command flips
//! it). Terminal tasks beyond the newest 30 leave the live board; an
//! archived counter keeps the aggregate.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use tracing::{debug, info};

use hm_bus::{BusEvent, EventBus};
use hm_core::types::{
    detect_risk, CreatedBy, RiskLevel, Task, TaskOutcome, TaskPriority, TaskStatus,
};
use hm_scoring::classify;

/// Terminal tasks kept on the live board before eviction.
pub const LIVE_TERMINAL_CAP: usize = 30;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("task not found: `{0}`")]
    NotFound(String),
    #[error("invalid transition: {from} → {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },
}

// ---------------------------------------------------------------------------
// NewTask
// ---------------------------------------------------------------------------

/// Parameters for task creation.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority: TaskPriority,
    /// Concrete agent id, or `"auto"`.
    pub preferred_agent: String,
    pub created_by: CreatedBy,
    pub parent_task_id: Option<String>,
    pub depth: u8,
    /// Paths known up front; feeds risk detection.
    pub file_paths: Vec<String>,
}

impl NewTask {
    /// A root task submitted by the user.
    pub fn user(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            priority: TaskPriority::Medium,
            preferred_agent: "auto".to_string(),
            created_by: CreatedBy::User,
            parent_task_id: None,
            depth: 0,
            file_paths: Vec::new(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_preferred_agent(mut self, agent: impl Into<String>) -> Self {
        self.preferred_agent = agent.into();
        self
    }
}

// ---------------------------------------------------------------------------
// TaskManager
// ---------------------------------------------------------------------------

struct Board {
    tasks: HashMap<String, Task>,
    /// Insertion order; queue ordering ties break on it.
    order: Vec<String>,
    counter: u64,
    archived: u64,
    auto_approve_all: bool,
}

pub struct TaskManager {
    inner: Mutex<Board>,
    bus: EventBus,
}

impl TaskManager {
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Mutex::new(Board {
                tasks: HashMap::new(),
                order: Vec::new(),
                counter: 0,
                archived: 0,
                auto_approve_all: true,
            }),
            bus,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Board> {
        self.inner.lock().expect("TaskManager lock poisoned")
    }

    // -- Creation -----------------------------------------------------------

    /// Create a task: mint the next id, classify it, and auto-detect its
    /// risk (the global auto-approve flag forces low).
    pub fn create_task(&self, params: NewTask) -> Task {
        let task = {
            let mut board = self.lock();
            board.counter += 1;
            let id = format!("TASK-{:03}", board.counter);

            let risk = if board.auto_approve_all {
                RiskLevel::Low
            } else {
                detect_risk(&params.title, &params.file_paths)
            };

            let mut task = Task::new(
                id.clone(),
                params.title,
                params.description,
                risk,
                params.priority,
                params.created_by,
            );
            task.preferred_agent = params.preferred_agent;
            task.parent_task_id = params.parent_task_id;
            task.depth = params.depth;
            task.file_paths = params.file_paths;
            task.tags = classify(&task.title, &task.description);

            board.order.push(id.clone());
            board.tasks.insert(id, task.clone());
            task
        };

        info!(task_id = %task.id, risk = ?task.risk, tags = ?task.tags, "task created");
        self.bus.publish(BusEvent::TaskCreated {
            task_id: task.id.clone(),
            title: task.title.clone(),
        });
        task
    }

    // -- Reads --------------------------------------------------------------

    pub fn get(&self, id: &str) -> Option<Task> {
        self.lock().tasks.get(id).cloned()
    }

    /// Every live task, in insertion order.
    pub fn list(&self) -> Vec<Task> {
        let board = self.lock();
        board
            .order
            .iter()
            .filter_map(|id| board.tasks.get(id))
            .cloned()
            .collect()
    }

    /// Pending tasks ordered by priority (critical first), then insertion.
    pub fn pending_queue(&self) -> Vec<Task> {
        let board = self.lock();
        let mut pending: Vec<Task> = board
            .order
            .iter()
            .filter_map(|id| board.tasks.get(id))
            .filter(|t| t.status == TaskStatus::Pending)
            .cloned()
            .collect();
        // stable sort keeps insertion order within a priority band
        pending.sort_by(|a, b| b.priority.rank().cmp(&a.priority.rank()));
        pending
    }

    pub fn archived_count(&self) -> u64 {
        self.lock().archived
    }

    pub fn auto_approve_all(&self) -> bool {
        self.lock().auto_approve_all
    }

    /// Flip the session-wide flag; returns the new value.
    pub fn toggle_auto_approve(&self) -> bool {
        let mut board = self.lock();
        board.auto_approve_all = !board.auto_approve_all;
        board.auto_approve_all
    }

    // -- Mutations ----------------------------------------------------------

    /// Hand a pending task to an agent: `pending → active`.
    pub fn assign(&self, task_id: &str, agent_id: &str) -> Result<Task, TaskError> {
        let mut board = self.lock();
        let task = board
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
        check_transition(task.status, TaskStatus::Active)?;
        task.status = TaskStatus::Active;
        task.assigned_agent_id = Some(agent_id.to_string());
        task.started_at = Some(Utc::now());
        Ok(task.clone())
    }

    /// Attach the execution result and update the task's known file paths.
    pub fn attach_result(&self, task_id: &str, outcome: TaskOutcome) -> Result<(), TaskError> {
        let mut board = self.lock();
        let task = board
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
        task.file_paths = outcome.files.iter().map(|f| f.path.clone()).collect();
        task.result = Some(outcome);
        Ok(())
    }

    /// Move a task along its lifecycle, enforcing the transition table.
    /// Terminal arrivals are timestamped and may evict the oldest settled
    /// task from the live board.
    pub fn transition(&self, task_id: &str, to: TaskStatus) -> Result<Task, TaskError> {
        let task = {
            let mut board = self.lock();
            let task = board
                .tasks
                .get_mut(task_id)
                .ok_or_else(|| TaskError::NotFound(task_id.to_string()))?;
            check_transition(task.status, to)?;
            task.status = to;
            if to.is_terminal() {
                task.completed_at = Some(Utc::now());
            }
            let task = task.clone();
            if to.is_terminal() {
                evict_settled(&mut board);
            }
            task
        };
        debug!(task_id = %task.id, status = %task.status, "task transitioned");
        Ok(task)
    }
}

fn check_transition(from: TaskStatus, to: TaskStatus) -> Result<(), TaskError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(TaskError::InvalidTransition { from, to })
    }
}

/// Keep only the newest [`LIVE_TERMINAL_CAP`] terminal tasks live; count
/// the rest into the archive.
fn evict_settled(board: &mut Board) {
    let mut settled: Vec<(usize, String)> = board
        .order
        .iter()
        .enumerate()
        .filter(|(_, id)| {
            board
                .tasks
                .get(*id)
                .map(|t| t.status.is_terminal())
                .unwrap_or(false)
        })
        .map(|(i, id)| (i, id.clone()))
        .collect();

    if settled.len() <= LIVE_TERMINAL_CAP {
        return;
    }
    let excess = settled.len() - LIVE_TERMINAL_CAP;
    for (_, id) in settled.drain(..excess) {
        board.tasks.remove(&id);
        board.order.retain(|o| o != &id);
        board.archived += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> TaskManager {
        TaskManager::new(EventBus::new())
    }

    /// A manager with the auto-approve flag off, so risk detection runs.
    fn strict_manager() -> TaskManager {
        let mgr = manager();
        mgr.toggle_auto_approve();
        assert!(!mgr.auto_approve_all());
        mgr
    }

    #[test]
    fn ids_are_monotone_and_padded() {
        let mgr = manager();
        let t1 = mgr.create_task(NewTask::user("one", ""));
        let t2 = mgr.create_task(NewTask::user("two", ""));
        assert_eq!(t1.id, "TASK-001");
        assert_eq!(t2.id, "TASK-002");
    }

    #[test]
    fn new_tasks_are_classified() {
        let mgr = manager();
        let task = mgr.create_task(NewTask::user("write hello.js", "print hi"));
        assert!(task.tags.contains(&"javascript".to_string()));
    }

    #[test]
    fn auto_approve_forces_low_risk() {
        let mgr = manager();
        let task = mgr.create_task(NewTask::user("deploy the service", ""));
        assert_eq!(task.risk, RiskLevel::Low);
    }

    #[test]
    fn strict_mode_detects_risk() {
        let mgr = strict_manager();
        let high = mgr.create_task(NewTask::user("rewrite the auth core", ""));
        assert_eq!(high.risk, RiskLevel::High);
        let low = mgr.create_task(NewTask::user("update docs", ""));
        assert_eq!(low.risk, RiskLevel::Low);
    }

    #[test]
    fn pending_queue_priority_then_insertion() {
        let mgr = manager();
        mgr.create_task(NewTask::user("m1", "").with_priority(TaskPriority::Medium));
        mgr.create_task(NewTask::user("c1", "").with_priority(TaskPriority::Critical));
        mgr.create_task(NewTask::user("m2", "").with_priority(TaskPriority::Medium));
        mgr.create_task(NewTask::user("l1", "").with_priority(TaskPriority::Low));
        mgr.create_task(NewTask::user("h1", "").with_priority(TaskPriority::High));

        let titles: Vec<String> = mgr.pending_queue().into_iter().map(|t| t.title).collect();
        assert_eq!(titles, vec!["c1", "h1", "m1", "m2", "l1"]);
    }

    #[test]
    fn assign_moves_pending_to_active() {
        let mgr = manager();
        let task = mgr.create_task(NewTask::user("t", ""));
        let assigned = mgr.assign(&task.id, "coder-1").unwrap();
        assert_eq!(assigned.status, TaskStatus::Active);
        assert_eq!(assigned.assigned_agent_id.as_deref(), Some("coder-1"));
        assert!(assigned.started_at.is_some());
        assert!(mgr.pending_queue().is_empty());
    }

    #[test]
    fn double_assign_rejected() {
        let mgr = manager();
        let task = mgr.create_task(NewTask::user("t", ""));
        mgr.assign(&task.id, "a").unwrap();
        let err = mgr.assign(&task.id, "b").unwrap_err();
        assert!(matches!(err, TaskError::InvalidTransition { .. }));
    }

    #[test]
    fn lifecycle_happy_path() {
        let mgr = manager();
        let task = mgr.create_task(NewTask::user("t", ""));
        mgr.assign(&task.id, "a").unwrap();
        let done = mgr.transition(&task.id, TaskStatus::Completed).unwrap();
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(done.completed_at.is_some());
    }

    #[test]
    fn review_approval_and_rejection_paths() {
        let mgr = manager();
        let t1 = mgr.create_task(NewTask::user("t1", ""));
        mgr.assign(&t1.id, "a").unwrap();
        mgr.transition(&t1.id, TaskStatus::Review).unwrap();
        mgr.transition(&t1.id, TaskStatus::Completed).unwrap();

        let t2 = mgr.create_task(NewTask::user("t2", ""));
        mgr.assign(&t2.id, "a").unwrap();
        mgr.transition(&t2.id, TaskStatus::Review).unwrap();
        let rejected = mgr.transition(&t2.id, TaskStatus::Cancelled).unwrap();
        assert_eq!(rejected.status, TaskStatus::Cancelled);
    }

    #[test]
    fn invalid_transitions_rejected() {
        let mgr = manager();
        let task = mgr.create_task(NewTask::user("t", ""));
        // pending cannot complete directly
        assert!(mgr.transition(&task.id, TaskStatus::Completed).is_err());
        // pending can be rejected before pickup
        assert!(mgr.transition(&task.id, TaskStatus::Cancelled).is_ok());
        // and a settled task stays settled
        assert!(mgr.transition(&task.id, TaskStatus::Active).is_err());
    }

    #[test]
    fn missing_task_errors() {
        let mgr = manager();
        assert!(matches!(
            mgr.transition("TASK-999", TaskStatus::Cancelled),
            Err(TaskError::NotFound(_))
        ));
    }

    #[test]
    fn attach_result_updates_file_paths() {
        let mgr = manager();
        let task = mgr.create_task(NewTask::user("t", ""));
        let outcome = TaskOutcome {
            success: true,
            files: vec![hm_core::types::FileIntent {
                path: "src/a.rs".into(),
                content: "x".into(),
            }],
            ..Default::default()
        };
        mgr.attach_result(&task.id, outcome).unwrap();
        let task = mgr.get(&task.id).unwrap();
        assert_eq!(task.file_paths, vec!["src/a.rs"]);
        assert!(task.result.is_some());
    }

    #[test]
    fn settled_tasks_beyond_cap_are_archived() {
        let mgr = manager();
        for i in 0..(LIVE_TERMINAL_CAP + 5) {
            let task = mgr.create_task(NewTask::user(format!("t{}", i), ""));
            mgr.transition(&task.id, TaskStatus::Cancelled).unwrap();
        }
        let live_settled = mgr
            .list()
            .into_iter()
            .filter(|t| t.status.is_terminal())
            .count();
        assert_eq!(live_settled, LIVE_TERMINAL_CAP);
        assert_eq!(mgr.archived_count(), 5);
        // the earliest ones were evicted
        assert!(mgr.get("TASK-001").is_none());
        assert!(mgr.get("TASK-035").is_some());
    }

    #[test]
    fn live_pending_tasks_never_evicted() {
        let mgr = manager();
        let keeper = mgr.create_task(NewTask::user("keeper", ""));
        for i in 0..(LIVE_TERMINAL_CAP + 10) {
            let t = mgr.create_task(NewTask::user(format!("t{}", i), ""));
            mgr.transition(&t.id, TaskStatus::Cancelled).unwrap();
        }
        assert!(mgr.get(&keeper.id).is_some());
    }

    #[test]
    fn creation_publishes_event() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        let mgr = TaskManager::new(bus);
        mgr.create_task(NewTask::user("t", ""));
        let published = rx.try_recv().unwrap();
        assert_eq!(published.event.tag(), "task:created");
    }
}
