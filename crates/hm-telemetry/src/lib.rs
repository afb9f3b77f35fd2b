//! Logging initialization shared by the hivemind binaries.

pub mod logging;

pub use logging::{init_logging, init_logging_json};
