//! Reinforcement signal for agent selection.
//!
//! - [`classifier`]: maps free-form task text onto category labels
//! - [`scorer`]: turns a completed (or failed) task into a 0-100 score,
//!   plus the energy/xp arithmetic tied to token usage
//! - [`performance`]: bounded per-agent/per-category rolling record with
//!   the derived averages the selector weighs

pub mod classifier;
pub mod performance;
pub mod scorer;

pub use classifier::classify;
pub use performance::PerformanceLog;
pub use scorer::{energy_cost, failure_score, score_completion, xp_gain, ScoreInput};
