//! The canonical agent map.
//!
//! Exclusively owns every agent's runtime counters. Mutation goes through
//! narrow verbs that keep the invariants: `working` status and a current
//! task id come and go together; an agent whose declared credential does
//! not resolve loads as `offline`; a cooldown always carries its expiry.
//! Every mutation publishes an `agent:*` event.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, warn};

use hm_backend::{credential_satisfied, resolve_credential, Backend, EnvSnapshot};
use hm_bus::{BusEvent, EventBus};
use hm_core::config::AgentSpec;
use hm_core::types::{AgentRuntime, AgentStatus, MAX_ENERGY};
use hm_scoring::{energy_cost, xp_gain};

/// Consecutive pipeline errors before an agent is parked in `error`.
const ERROR_STATUS_THRESHOLD: u32 = 3;

/// Floor applied to the configured per-tick recharge rate.
const MIN_RECHARGE: u32 = 5;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("agent not found: `{0}`")]
    NotFound(String),
    #[error("duplicate agent id: `{0}`")]
    Duplicate(String),
    #[error("agent `{0}` is not idle")]
    NotIdle(String),
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// By-value copy of one agent, safe to hold outside the lock.
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub spec: AgentSpec,
    pub runtime: AgentRuntime,
}

struct AgentEntry {
    spec: AgentSpec,
    runtime: AgentRuntime,
    backend: Backend,
}

/// Summary of a hot reload.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReloadReport {
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
}

// ---------------------------------------------------------------------------
// AgentRegistry
// ---------------------------------------------------------------------------

pub struct AgentRegistry {
    inner: Mutex<BTreeMap<String, AgentEntry>>,
    bus: EventBus,
}

impl AgentRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            inner: Mutex::new(BTreeMap::new()),
            bus,
        }
    }

    /// Build a registry from the configured roster.
    pub fn load(bus: EventBus, specs: &[AgentSpec], env: &EnvSnapshot) -> Self {
        let registry = Self::new(bus);
        for spec in specs {
            if let Err(e) = registry.add(spec.clone(), env) {
                warn!(agent = %spec.id, error = %e, "skipping agent at load");
            }
        }
        registry
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, AgentEntry>> {
        self.inner.lock().expect("AgentRegistry lock poisoned")
    }

    // -- Roster -------------------------------------------------------------

    /// Register an agent. Loads `offline` when its declared credential
    /// env var does not resolve, `idle` otherwise.
    pub fn add(&self, spec: AgentSpec, env: &EnvSnapshot) -> Result<(), RegistryError> {
        let status = if credential_satisfied(&spec, env) {
            AgentStatus::Idle
        } else {
            warn!(agent = %spec.id, var = ?spec.api_key_env, "credential unresolved, loading offline");
            AgentStatus::Offline
        };
        let backend = Backend::from_spec(&spec, resolve_credential(&spec, env));
        let id = spec.id.clone();

        {
            let mut agents = self.lock();
            if agents.contains_key(&id) {
                return Err(RegistryError::Duplicate(id));
            }
            agents.insert(
                id.clone(),
                AgentEntry {
                    spec,
                    runtime: AgentRuntime::new(status),
                    backend,
                },
            );
        }

        info!(agent = %id, status = %status, "agent registered");
        self.bus.publish(BusEvent::AgentAdded { agent_id: id });
        Ok(())
    }

    pub fn remove(&self, id: &str) -> Result<(), RegistryError> {
        {
            let mut agents = self.lock();
            if agents.remove(id).is_none() {
                return Err(RegistryError::NotFound(id.to_string()));
            }
        }
        self.bus.publish(BusEvent::AgentRemoved {
            agent_id: id.to_string(),
        });
        Ok(())
    }

    /// Reconcile the roster against a freshly loaded config: new ids are
    /// added, existing ones get their spec (and backend) rebuilt with the
    /// runtime counters kept, absent ones are removed.
    pub fn reload(&self, specs: &[AgentSpec], env: &EnvSnapshot) -> ReloadReport {
        let mut report = ReloadReport::default();
        let incoming: BTreeMap<&str, &AgentSpec> =
            specs.iter().map(|s| (s.id.as_str(), s)).collect();

        let stale: Vec<String> = {
            let agents = self.lock();
            agents
                .keys()
                .filter(|id| !incoming.contains_key(id.as_str()))
                .cloned()
                .collect()
        };
        for id in stale {
            if self.remove(&id).is_ok() {
                report.removed += 1;
            }
        }

        for spec in specs {
            let existing = self.lock().contains_key(&spec.id);
            if existing {
                let backend = Backend::from_spec(spec, resolve_credential(spec, env));
                let mut agents = self.lock();
                if let Some(entry) = agents.get_mut(&spec.id) {
                    entry.spec = spec.clone();
                    entry.backend = backend;
                    // a credential appearing or vanishing flips offline
                    if credential_satisfied(spec, env) {
                        if entry.runtime.status == AgentStatus::Offline {
                            entry.runtime.status = AgentStatus::Idle;
                        }
                    } else if entry.runtime.status == AgentStatus::Idle {
                        entry.runtime.status = AgentStatus::Offline;
                    }
                }
                report.updated += 1;
            } else if self.add(spec.clone(), env).is_ok() {
                report.added += 1;
            }
        }

        info!(?report, "agent roster reloaded");
        report
    }

    // -- Reads --------------------------------------------------------------

    pub fn get(&self, id: &str) -> Option<AgentSnapshot> {
        self.lock().get(id).map(|e| AgentSnapshot {
            spec: e.spec.clone(),
            runtime: e.runtime.clone(),
        })
    }

    pub fn list(&self) -> Vec<AgentSnapshot> {
        self.lock()
            .values()
            .map(|e| AgentSnapshot {
                spec: e.spec.clone(),
                runtime: e.runtime.clone(),
            })
            .collect()
    }

    /// Agents eligible for dispatch: idle, not a bridge kind.
    pub fn callable(&self) -> Vec<AgentSnapshot> {
        self.lock()
            .values()
            .filter(|e| e.runtime.status == AgentStatus::Idle && !e.spec.provider.is_bridge())
            .map(|e| AgentSnapshot {
                spec: e.spec.clone(),
                runtime: e.runtime.clone(),
            })
            .collect()
    }

    pub fn working_count(&self) -> usize {
        self.lock()
            .values()
            .filter(|e| e.runtime.status == AgentStatus::Working)
            .count()
    }

    /// The backend built for this agent (clones share HTTP clients).
    pub fn backend(&self, id: &str) -> Option<Backend> {
        self.lock().get(id).map(|e| e.backend.clone())
    }

    /// Swap an agent's backend (tests inject mocks through this).
    pub fn set_backend(&self, id: &str, backend: Backend) -> Result<(), RegistryError> {
        let mut agents = self.lock();
        let entry = agents
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        entry.backend = backend;
        Ok(())
    }

    // -- Status verbs -------------------------------------------------------

    /// Gate an idle agent into `working` on a task. Fails when the agent
    /// is anything but idle, which is what keeps one agent on one task.
    pub fn mark_working(&self, id: &str, task_id: &str) -> Result<(), RegistryError> {
        {
            let mut agents = self.lock();
            let entry = agents
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            if entry.runtime.status != AgentStatus::Idle {
                return Err(RegistryError::NotIdle(id.to_string()));
            }
            entry.runtime.status = AgentStatus::Working;
            entry.runtime.current_task_id = Some(task_id.to_string());
        }
        self.bus.publish(BusEvent::AgentStatus {
            agent_id: id.to_string(),
            status: AgentStatus::Working,
        });
        Ok(())
    }

    /// Settle a finished task into the agent's counters: drain energy by
    /// token cost, credit tokens and xp, bump the completion count, and
    /// return to idle. Energy and xp only ever move here, never mid-call.
    pub fn credit_completion(&self, id: &str, tokens: u64) -> Result<(u64, u32), RegistryError> {
        let (xp, level) = {
            let mut agents = self.lock();
            let entry = agents
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            let rt = &mut entry.runtime;
            rt.energy = rt.energy.saturating_sub(energy_cost(tokens));
            rt.total_tokens_used += tokens;
            rt.tasks_completed += 1;
            rt.xp += xp_gain(tokens);
            rt.error_count = 0;
            rt.status = AgentStatus::Idle;
            rt.current_task_id = None;
            (rt.xp, rt.level())
        };

        self.bus.publish(BusEvent::AgentXpGained {
            agent_id: id.to_string(),
            xp,
            level,
        });
        self.bus.publish(BusEvent::AgentStatus {
            agent_id: id.to_string(),
            status: AgentStatus::Idle,
        });
        Ok((xp, level))
    }

    /// Return a working agent to idle without touching its counters
    /// (dispatch rollback when the task vanished between picks).
    pub fn release(&self, id: &str) -> Result<(), RegistryError> {
        {
            let mut agents = self.lock();
            let entry = agents
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            if entry.runtime.status == AgentStatus::Working {
                entry.runtime.status = AgentStatus::Idle;
                entry.runtime.current_task_id = None;
            }
        }
        self.bus.publish(BusEvent::AgentStatus {
            agent_id: id.to_string(),
            status: AgentStatus::Idle,
        });
        Ok(())
    }

    /// Record a failed pipeline: back to idle, or parked in `error` after
    /// repeated occurrences.
    pub fn record_failure(&self, id: &str) -> Result<AgentStatus, RegistryError> {
        let status = {
            let mut agents = self.lock();
            let entry = agents
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            let rt = &mut entry.runtime;
            rt.error_count += 1;
            rt.current_task_id = None;
            rt.status = if rt.error_count >= ERROR_STATUS_THRESHOLD {
                AgentStatus::Error
            } else {
                AgentStatus::Idle
            };
            rt.status
        };
        self.bus.publish(BusEvent::AgentStatus {
            agent_id: id.to_string(),
            status,
        });
        Ok(status)
    }

    /// Park a rate-limited agent until `duration` from now.
    pub fn set_cooldown(&self, id: &str, duration: Duration) -> Result<(), RegistryError> {
        let until = Utc::now()
            + chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::seconds(60));
        {
            let mut agents = self.lock();
            let entry = agents
                .get_mut(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            entry.runtime.status = AgentStatus::Cooldown;
            entry.runtime.cooldown_until = Some(until);
            entry.runtime.current_task_id = None;
        }
        self.bus.publish(BusEvent::AgentCooldown {
            agent_id: id.to_string(),
            until,
        });
        Ok(())
    }

    /// Recharge every non-offline agent by `max(5, configured rate)` up
    /// to the energy ceiling, and clear expired cooldowns.
    pub fn recharge_all(&self) {
        let now = Utc::now();
        let mut cleared: Vec<String> = Vec::new();
        {
            let mut agents = self.lock();
            for (id, entry) in agents.iter_mut() {
                let rt = &mut entry.runtime;
                if rt.status == AgentStatus::Offline {
                    continue;
                }
                let rate = entry.spec.energy_recharge_rate.max(MIN_RECHARGE);
                rt.energy = (rt.energy + rate).min(MAX_ENERGY);

                if rt.status == AgentStatus::Cooldown {
                    let expired = rt.cooldown_until.map(|t| t <= now).unwrap_or(true);
                    if expired {
                        rt.cooldown_until = None;
                        rt.status = AgentStatus::Idle;
                        cleared.push(id.clone());
                    }
                }
            }
        }
        for id in cleared {
            debug!(agent = %id, "cooldown expired");
            self.bus.publish(BusEvent::AgentStatus {
                agent_id: id,
                status: AgentStatus::Idle,
            });
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
