//! Completion scoring and the token-tied agent arithmetic.

use hm_core::types::ExecOutcome;

/// Inputs to [`score_completion`], gathered after the post-processing
/// pipeline ran.
#[derive(Debug, Clone, Default)]
pub struct ScoreInput<'a> {
    /// Parsed file intents.
    pub files: usize,
    /// Whether the raw (pre-parse) text carried `FILE` markers at all.
    pub raw_has_file_marker: bool,
    /// Parsed command intents.
    pub commands: usize,
    /// Executed outcomes; `None` when commands were parsed but not run
    /// (review path).
    pub exec_results: Option<&'a [ExecOutcome]>,
    pub tokens: u64,
    /// Final task status was `failed`.
    pub failed: bool,
}

/// Score a completed task 0-100.
///
/// Rewards concrete output (files written, commands that succeeded),
/// penalizes token bloat via decreasing buckets, and adds a flat bonus
/// for not failing.
pub fn score_completion(input: &ScoreInput<'_>) -> u32 {
    let mut base: i64 = 0;

    if input.files > 0 {
        base += 20 + (5 * input.files as i64).min(20);
    }
    if input.raw_has_file_marker {
        base += 15;
    }

    if input.commands > 0 {
        if let Some(results) = input.exec_results {
            let successes = results.iter().filter(|r| r.success).count();
            let ratio = successes as f64 / input.commands as f64;
            base += (15.0 * ratio).round() as i64;
        }
    } else {
        base += 10;
    }

    base += match input.tokens {
        t if t > 0 && t < 500 => 15,
        t if (500..2_000).contains(&t) => 12,
        t if (2_000..5_000).contains(&t) => 8,
        t if (5_000..10_000).contains(&t) => 4,
        _ => 0,
    };

    if !input.failed {
        base += 15;
    }

    base.clamp(0, 100) as u32
}

/// Score for a task whose pipeline threw: 25 when the error looked like a
/// transport/API problem (the model never got a fair chance), 0 otherwise.
pub fn failure_score(transport_related: bool) -> u32 {
    if transport_related {
        25
    } else {
        0
    }
}

/// Energy drained by one completion: `min(5, ⌈tokens/1000⌉)`.
pub fn energy_cost(tokens: u64) -> u32 {
    (tokens.div_ceil(1000)).min(5) as u32
}

/// XP granted by one completion: flat 20 plus a token-proportional bonus
/// capped at 30.
pub fn xp_gain(tokens: u64) -> u64 {
    20 + (tokens / 100).min(30)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
