//! The orchestrator daemon.
//!
//! Ties the owners together: a dispatch tick pairs pending tasks with
//! agents chosen by the performance-weighted selector, each execution
//! runs its own pipeline (backend call → parse → side effects → score →
//! persist → subtasks), a recharge tick refills energy and clears
//! cooldowns, and the broadcaster fans snapshots to clients.

pub mod daemon;
pub mod dispatch;
pub mod pipeline;

pub use daemon::{DaemonError, Orchestrator};
pub use dispatch::{rank_candidates, select_agent, weighted_pick, Candidate};
