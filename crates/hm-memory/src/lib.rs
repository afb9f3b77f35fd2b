//! Persistent memory: a JSON document of task history, per-agent stats
//! and the performance log, plus an append-only markdown audit trail.

pub mod store;

pub use store::{MemoryDocument, MemoryError, MemoryStore};
