//! Bounded per-agent/per-category performance records.
//!
//! Two-level mapping: agent id → category tag → rolling list of the last
//! 20 `{score, task_id, timestamp}` samples with a derived rounded mean.
//! The category tag set is closed (see the classifier); an unseen tag
//! simply starts an empty inner record.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Samples retained per (agent, category).
pub const CATEGORY_RECORD_CAP: usize = 20;

/// Samples inspected by [`PerformanceLog::recent_failures`].
pub const RECENT_WINDOW: usize = 5;

/// A sample below this counts as a recent failure.
pub const FAILURE_THRESHOLD: u32 = 30;

/// Score assumed for agents (or categories) with no history yet.
pub const DEFAULT_SCORE: u32 = 50;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfSample {
    pub score: u32,
    pub task_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub samples: Vec<PerfSample>,
    /// Rounded arithmetic mean of `samples`.
    pub avg: u32,
    pub count: usize,
}

impl CategoryRecord {
    fn push(&mut self, sample: PerfSample) {
        self.samples.push(sample);
        if self.samples.len() > CATEGORY_RECORD_CAP {
            let excess = self.samples.len() - CATEGORY_RECORD_CAP;
            self.samples.drain(..excess);
        }
        self.count = self.samples.len();
        let sum: u64 = self.samples.iter().map(|s| s.score as u64).sum();
        self.avg = (sum as f64 / self.count as f64).round() as u32;
    }
}

// ---------------------------------------------------------------------------
// PerformanceLog
// ---------------------------------------------------------------------------

/// agent id → category → bounded rolling record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PerformanceLog(pub BTreeMap<String, BTreeMap<String, CategoryRecord>>);

impl PerformanceLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one scored task under every tag it was classified with.
    pub fn record(
        &mut self,
        agent_id: &str,
        tags: &[String],
        score: u32,
        task_id: &str,
        timestamp: DateTime<Utc>,
    ) {
        let categories = self.0.entry(agent_id.to_string()).or_default();
        for tag in tags {
            categories.entry(tag.clone()).or_default().push(PerfSample {
                score,
                task_id: task_id.to_string(),
                timestamp,
            });
        }
    }

    /// Rolling average for one (agent, category); [`DEFAULT_SCORE`] when
    /// there is no history.
    pub fn category_score(&self, agent_id: &str, category: &str) -> u32 {
        self.0
            .get(agent_id)
            .and_then(|cats| cats.get(category))
            .filter(|rec| rec.count > 0)
            .map(|rec| rec.avg)
            .unwrap_or(DEFAULT_SCORE)
    }

    /// Arithmetic mean of the agent's per-category averages, or
    /// [`DEFAULT_SCORE`] with no records at all.
    pub fn overall_score(&self, agent_id: &str) -> u32 {
        let Some(categories) = self.0.get(agent_id) else {
            return DEFAULT_SCORE;
        };
        let avgs: Vec<u32> = categories
            .values()
            .filter(|rec| rec.count > 0)
            .map(|rec| rec.avg)
            .collect();
        if avgs.is_empty() {
            return DEFAULT_SCORE;
        }
        let sum: u64 = avgs.iter().map(|a| *a as u64).sum();
        (sum as f64 / avgs.len() as f64).round() as u32
    }

    /// How many of the agent's 5 newest samples (across all categories)
    /// scored below the failure threshold.
    pub fn recent_failures(&self, agent_id: &str) -> usize {
        let Some(categories) = self.0.get(agent_id) else {
            return 0;
        };
        let mut samples: Vec<&PerfSample> = categories
            .values()
            .flat_map(|rec| rec.samples.iter())
            .collect();
        samples.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        samples
            .iter()
            .take(RECENT_WINDOW)
            .filter(|s| s.score < FAILURE_THRESHOLD)
            .count()
    }

    /// Total samples this agent holds across the given tags. The selector
    /// grants an exploration bonus while this is small.
    pub fn observations(&self, agent_id: &str, tags: &[String]) -> usize {
        let Some(categories) = self.0.get(agent_id) else {
            return 0;
        };
        tags.iter()
            .filter_map(|t| categories.get(t))
            .map(|rec| rec.count)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
