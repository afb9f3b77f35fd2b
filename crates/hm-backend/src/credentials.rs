//! Credential resolution.
//!
//! A pure function from (agent spec, environment snapshot) to an optional
//! secret. The snapshot is captured once at load/reload time; adapters
//! receive the resolved secret and never touch the environment
//! themselves.

use std::collections::HashMap;

use hm_core::config::AgentSpec;

/// Environment captured at a point in time.
pub type EnvSnapshot = HashMap<String, String>;

/// Capture the current process environment.
pub fn env_snapshot() -> EnvSnapshot {
    std::env::vars().collect()
}

/// The secret for an agent, when its spec declares a credential env var
/// and the snapshot holds a non-empty value for it.
pub fn resolve_credential(spec: &AgentSpec, env: &EnvSnapshot) -> Option<String> {
    let var = spec.api_key_env.as_deref()?;
    env.get(var).filter(|v| !v.is_empty()).cloned()
}

/// `true` when the agent either needs no credential or its declared one
/// resolves. Agents failing this load as offline.
pub fn credential_satisfied(spec: &AgentSpec, env: &EnvSnapshot) -> bool {
    spec.api_key_env.is_none() || resolve_credential(spec, env).is_some()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
