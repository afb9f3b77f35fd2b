//! File-system-backed memory.
//!
//! Two artifacts live under the memory directory:
//! - `memory.json`: facts, decisions, task history (capped at 50),
//!   per-agent aggregate stats, and the performance log. Rewritten
//!   atomically (write-temp + rename) on every save.
//! - `audit.md`: append-only markdown trail, one line per recorded task.
//!
//! Writes are eventually durable, not transactional: a crash can lose up
//! to the most recent task entry. Loading tolerates missing files and
//! partially empty documents by falling back to defaults.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use hm_core::types::{AgentStats, TaskHistoryEntry, TASK_HISTORY_CAP};
use hm_scoring::PerformanceLog;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("memory I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("memory serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// MemoryDocument
// ---------------------------------------------------------------------------

/// The whole persisted state. Every field defaults so partially written
/// or hand-edited documents still load.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryDocument {
    #[serde(default)]
    pub facts: Vec<String>,
    #[serde(default)]
    pub decisions: Vec<String>,
    #[serde(default)]
    pub task_history: BTreeMap<String, TaskHistoryEntry>,
    #[serde(default)]
    pub agent_stats: BTreeMap<String, AgentStats>,
    #[serde(default)]
    pub performance_log: PerformanceLog,
}

impl MemoryDocument {
    /// Drop oldest-by-timestamp history entries beyond the cap.
    fn enforce_history_cap(&mut self) {
        while self.task_history.len() > TASK_HISTORY_CAP {
            let oldest = self
                .task_history
                .iter()
                .min_by_key(|(_, e)| e.timestamp)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    self.task_history.remove(&id);
                }
                None => break,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// Mutex-owned memory document with disk persistence.
pub struct MemoryStore {
    dir: PathBuf,
    inner: Mutex<MemoryDocument>,
}

impl MemoryStore {
    /// Open (or initialize) the store under `dir`. A missing or
    /// unreadable document starts from defaults.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, MemoryError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        let doc = Self::load_document(&dir.join("memory.json"));
        Ok(Self {
            dir,
            inner: Mutex::new(doc),
        })
    }

    fn load_document(path: &Path) -> MemoryDocument {
        match std::fs::read_to_string(path) {
            Ok(text) => match serde_json::from_str::<MemoryDocument>(&text) {
                Ok(mut doc) => {
                    doc.enforce_history_cap();
                    doc
                }
                Err(e) => {
                    warn!(error = %e, "memory document unparseable, starting fresh");
                    MemoryDocument::default()
                }
            },
            Err(_) => MemoryDocument::default(),
        }
    }

    fn json_path(&self) -> PathBuf {
        self.dir.join("memory.json")
    }

    fn audit_path(&self) -> PathBuf {
        self.dir.join("audit.md")
    }

    // -- Mutations ----------------------------------------------------------

    /// Record a finished task: history entry (cap enforced), per-agent
    /// aggregates, and one audit line.
    pub fn record_task(&self, task_id: &str, entry: TaskHistoryEntry) -> Result<(), MemoryError> {
        let audit_line = format!(
            "- `{}` {}: {} ({}, {} tok, {})\n",
            entry.timestamp.to_rfc3339(),
            task_id,
            entry.title,
            entry.agent_name,
            entry.tokens,
            if entry.success { "ok" } else { "failed" },
        );

        {
            let mut doc = self.inner.lock().expect("MemoryStore lock poisoned");
            let stats = doc.agent_stats.entry(entry.agent_id.clone()).or_default();
            stats.tasks_completed += 1;
            stats.total_tokens += entry.tokens;
            if entry.success {
                stats.successes += 1;
            }
            doc.task_history.insert(task_id.to_string(), entry);
            doc.enforce_history_cap();
        }

        self.append_audit(&audit_line)
    }

    /// Record a scored task under every classified tag.
    pub fn record_performance(
        &self,
        agent_id: &str,
        tags: &[String],
        score: u32,
        task_id: &str,
        timestamp: DateTime<Utc>,
    ) {
        let mut doc = self.inner.lock().expect("MemoryStore lock poisoned");
        doc.performance_log
            .record(agent_id, tags, score, task_id, timestamp);
    }

    /// Append a line to the markdown audit trail.
    pub fn append_audit(&self, line: &str) -> Result<(), MemoryError> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.audit_path())?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Persist the document: serialize pretty, write a temp file, rename
    /// over the old one. The cap is re-enforced on every save.
    pub fn save(&self) -> Result<(), MemoryError> {
        let mut doc = self.inner.lock().expect("MemoryStore lock poisoned");
        doc.enforce_history_cap();
        let json = serde_json::to_string_pretty(&*doc)?;
        drop(doc);

        let tmp = self.dir.join(format!(".memory-{}.tmp", Uuid::new_v4()));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, self.json_path())?;
        debug!(path = %self.json_path().display(), "memory persisted");
        Ok(())
    }

    // -- Reads --------------------------------------------------------------

    /// By-value copy of the whole document.
    pub fn document(&self) -> MemoryDocument {
        self.inner.lock().expect("MemoryStore lock poisoned").clone()
    }

    /// By-value copy of the performance log.
    pub fn performance(&self) -> PerformanceLog {
        self.inner
            .lock()
            .expect("MemoryStore lock poisoned")
            .performance_log
            .clone()
    }

    /// The `n` newest history entries, newest first.
    pub fn recent_history(&self, n: usize) -> Vec<(String, TaskHistoryEntry)> {
        let doc = self.inner.lock().expect("MemoryStore lock poisoned");
        let mut entries: Vec<(String, TaskHistoryEntry)> = doc
            .task_history
            .iter()
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect();
        entries.sort_by(|a, b| b.1.timestamp.cmp(&a.1.timestamp));
        entries.truncate(n);
        entries
    }

    pub fn history_len(&self) -> usize {
        self.inner
            .lock()
            .expect("MemoryStore lock poisoned")
            .task_history
            .len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
