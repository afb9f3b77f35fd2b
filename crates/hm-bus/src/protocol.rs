//! Typed events, client commands, server messages, and snapshot shapes.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use hm_core::config::AgentSpec;
use hm_core::types::{
    truncate_chars, ActivityEntry, AgentRuntime, AgentStatus, CreatedBy, RiskLevel, Task,
    TaskHistoryEntry, TaskPriority, TaskStatus, EXPLANATION_CAP,
};

// ---------------------------------------------------------------------------
// BusEvent
// ---------------------------------------------------------------------------

/// Every state change the orchestrator announces. Each variant knows its
/// activity tag, its actor label, and a short human-readable message, so
/// the bus can append a feed entry without consumers re-deriving one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BusEvent {
    TaskCreated { task_id: String, title: String },
    TaskCancelled { task_id: String },
    TaskApproved { task_id: String },
    TaskRejected { task_id: String },
    TaskInReview { task_id: String, agent_id: String },
    AgentWorking { agent_id: String, task_id: String },
    AgentCompleted { agent_id: String, task_id: String, score: u32 },
    AgentError { agent_id: String, message: String },
    AgentStatus { agent_id: String, status: AgentStatus },
    AgentCooldown { agent_id: String, until: DateTime<Utc> },
    AgentXpGained { agent_id: String, xp: u64, level: u32 },
    AgentAdded { agent_id: String },
    AgentRemoved { agent_id: String },
    FilesWritten { task_id: String, agent_id: String, paths: Vec<String> },
    FileRejected { task_id: String, path: String },
    CommandDone { task_id: String, agent_id: String, command: String, success: bool },
    Scored { task_id: String, agent_id: String, score: u32, tags: Vec<String> },
}

impl BusEvent {
    /// Short event tag used in the activity feed.
    pub fn tag(&self) -> &'static str {
        match self {
            BusEvent::TaskCreated { .. } => "task:created",
            BusEvent::TaskCancelled { .. } => "task:cancelled",
            BusEvent::TaskApproved { .. } => "task:approved",
            BusEvent::TaskRejected { .. } => "task:rejected",
            BusEvent::TaskInReview { .. } => "task:review",
            BusEvent::AgentWorking { .. } => "agent:working",
            BusEvent::AgentCompleted { .. } => "agent:completed",
            BusEvent::AgentError { .. } => "agent:error",
            BusEvent::AgentStatus { .. } => "agent:status",
            BusEvent::AgentCooldown { .. } => "agent:cooldown",
            BusEvent::AgentXpGained { .. } => "agent:xp-gained",
            BusEvent::AgentAdded { .. } => "agent:added",
            BusEvent::AgentRemoved { .. } => "agent:removed",
            BusEvent::FilesWritten { .. } => "exec:files",
            BusEvent::FileRejected { .. } => "exec:rejected",
            BusEvent::CommandDone { .. } => "exec:done",
            BusEvent::Scored { .. } => "rl:scored",
        }
    }

    /// Agent id this event belongs to, or `"system"`.
    pub fn actor(&self) -> &str {
        match self {
            BusEvent::AgentWorking { agent_id, .. }
            | BusEvent::AgentCompleted { agent_id, .. }
            | BusEvent::AgentError { agent_id, .. }
            | BusEvent::AgentStatus { agent_id, .. }
            | BusEvent::AgentCooldown { agent_id, .. }
            | BusEvent::AgentXpGained { agent_id, .. }
            | BusEvent::AgentAdded { agent_id }
            | BusEvent::AgentRemoved { agent_id }
            | BusEvent::TaskInReview { agent_id, .. }
            | BusEvent::FilesWritten { agent_id, .. }
            | BusEvent::CommandDone { agent_id, .. }
            | BusEvent::Scored { agent_id, .. } => agent_id,
            _ => "system",
        }
    }

    /// One-line human-readable message for the activity feed.
    pub fn describe(&self) -> String {
        match self {
            BusEvent::TaskCreated { task_id, title } => format!("{} created: {}", task_id, title),
            BusEvent::TaskCancelled { task_id } => format!("{} cancelled", task_id),
            BusEvent::TaskApproved { task_id } => format!("{} approved, side effects applied", task_id),
            BusEvent::TaskRejected { task_id } => format!("{} rejected, side effects discarded", task_id),
            BusEvent::TaskInReview { task_id, .. } => format!("{} awaiting review", task_id),
            BusEvent::AgentWorking { agent_id, task_id } => {
                format!("{} picked up {}", agent_id, task_id)
            }
            BusEvent::AgentCompleted { task_id, score, .. } => {
                format!("{} completed (score {})", task_id, score)
            }
            BusEvent::AgentError { message, .. } => format!("error: {}", message),
            BusEvent::AgentStatus { status, .. } => format!("now {}", status),
            BusEvent::AgentCooldown { until, .. } => {
                format!("cooling down until {}", until.format("%H:%M:%S"))
            }
            BusEvent::AgentXpGained { xp, level, .. } => {
                format!("xp {} (level {})", xp, level)
            }
            BusEvent::AgentAdded { agent_id } => format!("agent {} registered", agent_id),
            BusEvent::AgentRemoved { agent_id } => format!("agent {} removed", agent_id),
            BusEvent::FilesWritten { paths, .. } => format!("wrote {} file(s)", paths.len()),
            BusEvent::FileRejected { path, .. } => {
                format!("dropped file escaping workspace: {}", path)
            }
            BusEvent::CommandDone { command, success, .. } => {
                let verdict = if *success { "ok" } else { "failed" };
                format!("`{}` {}", command, verdict)
            }
            BusEvent::Scored { score, tags, .. } => {
                format!("scored {} for [{}]", score, tags.join(", "))
            }
        }
    }

    /// Render this event into a numbered activity feed entry.
    pub fn to_activity(&self, id: u64) -> ActivityEntry {
        ActivityEntry {
            id,
            timestamp: Utc::now(),
            agent: self.actor().to_string(),
            tag: self.tag().to_string(),
            message: self.describe(),
        }
    }
}

// ---------------------------------------------------------------------------
// ClientCommand (inbound)
// ---------------------------------------------------------------------------

/// Commands clients send over the (externally provided) transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientCommand {
    #[serde(rename = "command:createTask", rename_all = "camelCase")]
    CreateTask {
        title: String,
        description: String,
        /// Pin the task to one agent.
        #[serde(default)]
        agent_id: Option<String>,
        /// Fan the same task out to several agents.
        #[serde(default)]
        agent_ids: Option<Vec<String>>,
    },
    #[serde(rename = "command:addAgent")]
    AddAgent { agent: AgentSpec },
    #[serde(rename = "command:approveTask", rename_all = "camelCase")]
    ApproveTask { task_id: String },
    #[serde(rename = "command:rejectTask", rename_all = "camelCase")]
    RejectTask { task_id: String },
    #[serde(rename = "command:toggleAutoApprove")]
    ToggleAutoApprove,
}

// ---------------------------------------------------------------------------
// ServerMessage (outbound)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    #[serde(rename = "state:full")]
    StateFull(StateSnapshot),
    #[serde(rename = "activity:log")]
    ActivityLog(ActivityEntry),
}

// ---------------------------------------------------------------------------
// Snapshot shapes
// ---------------------------------------------------------------------------

/// Immutable by-value copy of observable state, delivered to clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub agents: Vec<AgentView>,
    pub tasks: Vec<LightTask>,
    pub performance: BTreeMap<String, AgentPerformanceView>,
    pub recent_memory: Vec<TaskHistoryEntry>,
    pub activity: Vec<ActivityEntry>,
    pub auto_approve_all: bool,
    pub archived_tasks: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentView {
    pub id: String,
    pub display_name: String,
    pub avatar: String,
    pub role: String,
    pub model: String,
    pub status: AgentStatus,
    pub energy: u32,
    pub xp: u64,
    pub level: u32,
    pub current_task_id: Option<String>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub total_tokens_used: u64,
    pub error_count: u32,
    pub tasks_completed: u64,
}

impl AgentView {
    pub fn new(spec: &AgentSpec, runtime: &AgentRuntime) -> Self {
        Self {
            id: spec.id.clone(),
            display_name: spec.display_name.clone(),
            avatar: spec.avatar.clone(),
            role: spec.role.clone(),
            model: spec.model.clone(),
            status: runtime.status,
            energy: runtime.energy,
            xp: runtime.xp,
            level: runtime.level(),
            current_task_id: runtime.current_task_id.clone(),
            cooldown_until: runtime.cooldown_until,
            total_tokens_used: runtime.total_tokens_used,
            error_count: runtime.error_count,
            tasks_completed: runtime.tasks_completed,
        }
    }
}

/// Per-category rolling average, as shown to clients.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategoryScoreView {
    pub avg: u32,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentPerformanceView {
    pub overall: u32,
    pub categories: BTreeMap<String, CategoryScoreView>,
}

/// Task projection for the wire: no raw output, no file contents, and the
/// explanation cut to 500 characters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LightTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub risk: RiskLevel,
    pub priority: TaskPriority,
    pub assigned_agent_id: Option<String>,
    pub created_by: CreatedBy,
    pub parent_task_id: Option<String>,
    pub depth: u8,
    pub tags: Vec<String>,
    pub file_paths: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub explanation: Option<String>,
    pub perf_score: Option<u32>,
    pub tokens_used: Option<u64>,
}

impl From<&Task> for LightTask {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id.clone(),
            title: task.title.clone(),
            description: task.description.clone(),
            status: task.status,
            risk: task.risk,
            priority: task.priority,
            assigned_agent_id: task.assigned_agent_id.clone(),
            created_by: task.created_by.clone(),
            parent_task_id: task.parent_task_id.clone(),
            depth: task.depth,
            tags: task.tags.clone(),
            file_paths: task.file_paths.clone(),
            created_at: task.created_at,
            started_at: task.started_at,
            completed_at: task.completed_at,
            explanation: task
                .result
                .as_ref()
                .map(|r| truncate_chars(&r.explanation, EXPLANATION_CAP)),
            perf_score: task.result.as_ref().map(|r| r.perf_score),
            tokens_used: task.result.as_ref().map(|r| r.tokens_used),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use hm_core::types::TaskOutcome;

    #[test]
    fn event_tags_and_actors() {
        let ev = BusEvent::AgentWorking {
            agent_id: "coder-1".into(),
            task_id: "TASK-001".into(),
        };
        assert_eq!(ev.tag(), "agent:working");
        assert_eq!(ev.actor(), "coder-1");

        let ev = BusEvent::TaskCreated {
            task_id: "TASK-002".into(),
            title: "t".into(),
        };
        assert_eq!(ev.tag(), "task:created");
        assert_eq!(ev.actor(), "system");

        let ev = BusEvent::Scored {
            task_id: "TASK-002".into(),
            agent_id: "coder-1".into(),
            score: 80,
            tags: vec!["javascript".into()],
        };
        assert_eq!(ev.tag(), "rl:scored");
        assert!(ev.describe().contains("80"));
    }

    #[test]
    fn to_activity_carries_id_and_tag() {
        let ev = BusEvent::CommandDone {
            task_id: "TASK-003".into(),
            agent_id: "coder-1".into(),
            command: "npm test".into(),
            success: true,
        };
        let entry = ev.to_activity(42);
        assert_eq!(entry.id, 42);
        assert_eq!(entry.tag, "exec:done");
        assert_eq!(entry.agent, "coder-1");
        assert!(entry.message.contains("npm test"));
    }

    #[test]
    fn client_command_wire_shape() {
        let json = r#"{"type":"command:createTask","payload":{"title":"write hello.js","description":"print hi","agentId":"coder-1"}}"#;
        let cmd: ClientCommand = serde_json::from_str(json).unwrap();
        match cmd {
            ClientCommand::CreateTask {
                title, agent_id, ..
            } => {
                assert_eq!(title, "write hello.js");
                assert_eq!(agent_id.as_deref(), Some("coder-1"));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let json = r#"{"type":"command:approveTask","payload":{"taskId":"TASK-007"}}"#;
        let cmd: ClientCommand = serde_json::from_str(json).unwrap();
        assert!(matches!(cmd, ClientCommand::ApproveTask { task_id } if task_id == "TASK-007"));

        let json = r#"{"type":"command:toggleAutoApprove"}"#;
        let cmd: ClientCommand = serde_json::from_str(json).unwrap();
        assert!(matches!(cmd, ClientCommand::ToggleAutoApprove));
    }

    #[test]
    fn server_message_type_tags() {
        let msg = ServerMessage::StateFull(StateSnapshot::default());
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"state:full\""));

        let msg = ServerMessage::ActivityLog(
            BusEvent::TaskCreated {
                task_id: "TASK-001".into(),
                title: "t".into(),
            }
            .to_activity(1),
        );
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"activity:log\""));
    }

    #[test]
    fn light_task_strips_heavy_fields() {
        let mut task = Task::new(
            "TASK-010",
            "title",
            "desc",
            RiskLevel::Low,
            TaskPriority::Medium,
            CreatedBy::User,
        );
        task.result = Some(TaskOutcome {
            success: true,
            explanation: "x".repeat(1200),
            raw_output: "FILE...giant".into(),
            tokens_used: 321,
            perf_score: 70,
            ..Default::default()
        });

        let light = LightTask::from(&task);
        assert_eq!(light.explanation.as_ref().unwrap().len(), EXPLANATION_CAP);
        assert_eq!(light.perf_score, Some(70));
        assert_eq!(light.tokens_used, Some(321));

        // the wire form carries neither raw output nor file contents
        let json = serde_json::to_string(&light).unwrap();
        assert!(!json.contains("raw_output"));
        assert!(!json.contains("giant"));
    }

    #[test]
    fn light_task_without_result() {
        let task = Task::new(
            "TASK-011",
            "title",
            "desc",
            RiskLevel::High,
            TaskPriority::Low,
            CreatedBy::Trigger,
        );
        let light = LightTask::from(&task);
        assert!(light.explanation.is_none());
        assert!(light.perf_score.is_none());
    }
}
