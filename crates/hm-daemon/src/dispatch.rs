//! Performance-weighted agent selection.
//!
//! For a task's category tags, every callable agent gets a score: the
//! mean of its per-category rolling averages, plus an exploration bonus
//! while it has little history, minus a penalty per recent failure. The
//! top three scores go into a weighted draw so a strong specialist wins
//! most of the time without starving the rest.
//!
//! The draw itself is a pure function of a caller-supplied roll, which
//! keeps the whole selection deterministic under test; the daemon feeds
//! it `rand::random()`.

use hm_agents::AgentSnapshot;
use hm_core::types::Task;
use hm_scoring::performance::PerformanceLog;

/// Score bonus while an agent has fewer than this many observations
/// across the task's tags.
const EXPLORATION_OBSERVATIONS: usize = 3;
const EXPLORATION_BONUS: i64 = 15;

/// Penalty per sub-threshold score in the agent's recent window.
const FAILURE_PENALTY: i64 = 10;

/// Candidates entering the weighted draw.
const DRAW_POOL: usize = 3;

/// One scored candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub agent_id: String,
    pub score: i64,
}

/// Score every agent for the task's tags and keep the top three.
pub fn rank_candidates(
    agents: &[AgentSnapshot],
    tags: &[String],
    perf: &PerformanceLog,
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = agents
        .iter()
        .map(|agent| {
            let id = agent.spec.id.as_str();
            let type_score = if tags.is_empty() {
                hm_scoring::performance::DEFAULT_SCORE as f64
            } else {
                let sum: u64 = tags
                    .iter()
                    .map(|t| perf.category_score(id, t) as u64)
                    .sum();
                sum as f64 / tags.len() as f64
            };

            let mut score = type_score.round() as i64;
            if perf.observations(id, tags) < EXPLORATION_OBSERVATIONS {
                score += EXPLORATION_BONUS;
            }
            score -= perf.recent_failures(id) as i64 * FAILURE_PENALTY;

            Candidate {
                agent_id: id.to_string(),
                score,
            }
        })
        .collect();

    candidates.sort_by(|a, b| b.score.cmp(&a.score));
    candidates.truncate(DRAW_POOL);
    candidates
}

/// Draw one candidate with probability proportional to `max(1, score)`.
/// `roll` is reduced modulo the total weight, so any random u64 works.
pub fn weighted_pick(candidates: &[Candidate], roll: u64) -> Option<&Candidate> {
    if candidates.is_empty() {
        return None;
    }
    let weights: Vec<u64> = candidates.iter().map(|c| c.score.max(1) as u64).collect();
    let total: u64 = weights.iter().sum();
    let mut point = roll % total;
    for (candidate, weight) in candidates.iter().zip(&weights) {
        if point < *weight {
            return Some(candidate);
        }
        point -= weight;
    }
    candidates.last()
}

/// Choose the agent for a task.
///
/// A concrete preferred agent wins outright when it is callable; anything
/// else goes through the scored draw. `None` means nothing is callable
/// and the task stays pending.
pub fn select_agent(
    task: &Task,
    callable: &[AgentSnapshot],
    perf: &PerformanceLog,
    roll: u64,
) -> Option<String> {
    if callable.is_empty() {
        return None;
    }
    if task.preferred_agent != "auto" {
        if let Some(agent) = callable.iter().find(|a| a.spec.id == task.preferred_agent) {
            return Some(agent.spec.id.clone());
        }
    }
    let candidates = rank_candidates(callable, &task.tags, perf);
    weighted_pick(&candidates, roll).map(|c| c.agent_id.clone())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
