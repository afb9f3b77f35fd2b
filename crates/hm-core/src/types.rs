use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Ceiling of the agent energy gauge.
pub const MAX_ENERGY: u32 = 100;

/// XP needed per level; level is derived, never stored.
pub const XP_PER_LEVEL: u64 = 300;

/// Maximum parent-chain length for spawned subtasks.
pub const MAX_TASK_DEPTH: u8 = 3;

// ---------------------------------------------------------------------------
// AgentStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Working,
    Cooldown,
    Offline,
    Error,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Working => "working",
            AgentStatus::Cooldown => "cooldown",
            AgentStatus::Offline => "offline",
            AgentStatus::Error => "error",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// ProviderKind
// ---------------------------------------------------------------------------

/// Closed set of backend wire protocols an agent can be configured with.
///
/// `Nim` is the NVIDIA-hosted OpenAI-compatible endpoint that must be
/// streamed; the bridge kinds are executed by the host IDE, never by the
/// core, and `Mock` serves offline runs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenaiCompatible,
    Nim,
    Anthropic,
    Gemini,
    CursorBridge,
    CopilotBridge,
    Mock,
}

impl ProviderKind {
    /// Bridge kinds are dispatched by the host IDE, not the core.
    pub fn is_bridge(&self) -> bool {
        matches!(self, ProviderKind::CursorBridge | ProviderKind::CopilotBridge)
    }
}

// ---------------------------------------------------------------------------
// AgentRuntime
// ---------------------------------------------------------------------------

/// Mutable per-agent counters owned by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRuntime {
    pub status: AgentStatus,
    pub energy: u32,
    pub xp: u64,
    pub current_task_id: Option<String>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub total_tokens_used: u64,
    pub error_count: u32,
    pub tasks_completed: u64,
}

impl AgentRuntime {
    pub fn new(status: AgentStatus) -> Self {
        Self {
            status,
            energy: MAX_ENERGY,
            xp: 0,
            current_task_id: None,
            cooldown_until: None,
            total_tokens_used: 0,
            error_count: 0,
            tasks_completed: 0,
        }
    }

    /// Level derived from xp via the fixed threshold ladder.
    pub fn level(&self) -> u32 {
        level_for_xp(self.xp)
    }
}

/// Fixed ladder: one level per 300 xp, starting at level 1.
pub fn level_for_xp(xp: u64) -> u32 {
    (xp / XP_PER_LEVEL) as u32 + 1
}

// ---------------------------------------------------------------------------
// Task lifecycle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Active,
    Review,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Returns `true` when a transition from `self` to `target` is valid.
    pub fn can_transition_to(&self, target: TaskStatus) -> bool {
        matches!(
            (self, target),
            (TaskStatus::Pending, TaskStatus::Active)
                | (TaskStatus::Pending, TaskStatus::Cancelled)
                | (TaskStatus::Active, TaskStatus::Completed)
                | (TaskStatus::Active, TaskStatus::Review)
                | (TaskStatus::Active, TaskStatus::Failed)
                | (TaskStatus::Review, TaskStatus::Completed)
                | (TaskStatus::Review, TaskStatus::Cancelled)
        )
    }

    /// Terminal states leave the live board eventually.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Active => "active",
            TaskStatus::Review => "review",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", label)
    }
}

// ---------------------------------------------------------------------------
// RiskLevel / TaskPriority
// ---------------------------------------------------------------------------

/// Binary gate: low-risk results auto-apply, high-risk results park in
/// review until a human approves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl TaskPriority {
    /// Numeric rank for queue ordering (higher = sooner).
    pub fn rank(&self) -> u8 {
        match self {
            TaskPriority::Critical => 3,
            TaskPriority::High => 2,
            TaskPriority::Medium => 1,
            TaskPriority::Low => 0,
        }
    }
}

impl Default for TaskPriority {
    fn default() -> Self {
        TaskPriority::Medium
    }
}

// ---------------------------------------------------------------------------
// CreatedBy
// ---------------------------------------------------------------------------

/// Who enqueued a task. Serialized as `"user"`, `"agent:<id>"`, or
/// `"trigger"` so the memory document stays readable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreatedBy {
    User,
    Agent(String),
    Trigger,
}

impl fmt::Display for CreatedBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreatedBy::User => write!(f, "user"),
            CreatedBy::Agent(id) => write!(f, "agent:{}", id),
            CreatedBy::Trigger => write!(f, "trigger"),
        }
    }
}

impl Serialize for CreatedBy {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CreatedBy {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(match s.as_str() {
            "user" => CreatedBy::User,
            "trigger" => CreatedBy::Trigger,
            other => match other.strip_prefix("agent:") {
                Some(id) => CreatedBy::Agent(id.to_string()),
                None => CreatedBy::User,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Intents parsed from model output
// ---------------------------------------------------------------------------

/// A file the model asked to write, relative to the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileIntent {
    pub path: String,
    pub content: String,
}

/// A shell command the model asked to run, relative to the workspace root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandIntent {
    pub cwd: String,
    pub command: String,
}

/// A child task the model asked to spawn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubtaskIntent {
    pub title: String,
    /// Concrete agent id, or `"auto"` for selector choice.
    pub agent: String,
    pub description: String,
}

/// Outcome of one executed command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecOutcome {
    pub cwd: String,
    pub command: String,
    pub success: bool,
    /// Captured output tail (last 500 bytes on success, ~300 of stderr on failure).
    pub output: String,
}

// ---------------------------------------------------------------------------
// TaskOutcome
// ---------------------------------------------------------------------------

/// Everything a completed (or reviewed) task carries back: the parsed
/// intents, the residual explanation, and the audit trail.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub success: bool,
    /// Residual text after block extraction.
    pub explanation: String,
    /// Pre-parse model text, retained for audit.
    pub raw_output: String,
    pub tokens_used: u64,
    pub agent_name: String,
    pub model: String,
    pub files: Vec<FileIntent>,
    pub commands: Vec<CommandIntent>,
    #[serde(default)]
    pub exec_results: Vec<ExecOutcome>,
    pub perf_score: u32,
    pub task_types: Vec<String>,
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub status: TaskStatus,
    pub risk: RiskLevel,
    pub priority: TaskPriority,
    pub assigned_agent_id: Option<String>,
    pub created_by: CreatedBy,
    pub parent_task_id: Option<String>,
    /// Root tasks are depth 0; children inherit parent depth + 1, capped at 3.
    pub depth: u8,
    /// Concrete agent id, or `"auto"` for selector choice.
    pub preferred_agent: String,
    pub file_paths: Vec<String>,
    /// Category labels attached by the classifier.
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<TaskOutcome>,
}

impl Task {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        risk: RiskLevel,
        priority: TaskPriority,
        created_by: CreatedBy,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: description.into(),
            status: TaskStatus::Pending,
            risk,
            priority,
            assigned_agent_id: None,
            created_by,
            parent_task_id: None,
            depth: 0,
            preferred_agent: "auto".to_string(),
            file_paths: Vec::new(),
            tags: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Risk auto-detection
// ---------------------------------------------------------------------------

fn low_risk_path_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?i)(^|/)docs?/",
            r"(?i)(^|/)tests?/",
            r"(?i)\.md$",
            r"(?i)readme",
            r"\.d\.ts$",
            r"(?i)[._]test\.",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("low-risk pattern compiles"))
        .collect()
    })
}

const LOW_RISK_TITLE_KEYWORDS: &[&str] = &["doc", "test", "readme"];

/// Classify a task as low or high risk from its title and any known file
/// paths. Documentation, tests, READMEs and type declarations auto-apply;
/// anything else parks in review.
pub fn detect_risk(title: &str, file_paths: &[String]) -> RiskLevel {
    let title_lower = title.to_lowercase();
    if LOW_RISK_TITLE_KEYWORDS.iter().any(|k| title_lower.contains(k)) {
        return RiskLevel::Low;
    }
    if file_paths
        .iter()
        .any(|p| low_risk_path_patterns().iter().any(|re| re.is_match(p)))
    {
        return RiskLevel::Low;
    }
    RiskLevel::High
}

// ---------------------------------------------------------------------------
// ActivityEntry
// ---------------------------------------------------------------------------

/// One line of the live activity feed. Retained in a bounded ring of the
/// 100 most recent entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEntry {
    /// Monotone per-process counter.
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    /// Agent id, or `"system"` for events with no agent actor.
    pub agent: String,
    /// Short event tag, e.g. `task:created`, `agent:working`, `rl:scored`.
    pub tag: String,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Memory records
// ---------------------------------------------------------------------------

/// Cap on retained history entries; oldest-by-timestamp evicted beyond it.
pub const TASK_HISTORY_CAP: usize = 50;

/// Explanations stored in history and light projections are cut here.
pub const EXPLANATION_CAP: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskHistoryEntry {
    pub title: String,
    pub agent_id: String,
    pub agent_name: String,
    pub model: String,
    /// Truncated to [`EXPLANATION_CAP`] characters.
    pub explanation: String,
    pub file_paths: Vec<String>,
    pub tokens: u64,
    pub success: bool,
    pub timestamp: DateTime<Utc>,
}

/// Per-agent aggregate counters kept alongside the performance log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentStats {
    pub tasks_completed: u64,
    pub total_tokens: u64,
    pub successes: u64,
}

/// Truncate to at most `cap` characters on a char boundary.
pub fn truncate_chars(s: &str, cap: usize) -> String {
    if s.chars().count() <= cap {
        return s.to_string();
    }
    s.chars().take(cap).collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
