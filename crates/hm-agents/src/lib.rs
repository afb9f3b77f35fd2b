//! Agent and task state owners.
//!
//! The [`registry`] holds the canonical agent map (spec + runtime
//! counters + backend) and the [`manager`] owns every task's lifecycle.
//! Both serialize mutations behind a mutex and hand out by-value
//! snapshots; no lock is held across I/O.

pub mod manager;
pub mod registry;

pub use manager::{NewTask, TaskError, TaskManager};
pub use registry::{AgentRegistry, AgentSnapshot, RegistryError};
