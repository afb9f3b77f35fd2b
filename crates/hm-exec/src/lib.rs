//! Workspace-confined side effects: file writes and shell commands.
//!
//! This is deliberately not a sandbox. The only guarantee is prefix
//! confinement: every resolved path must stay under the workspace root
//! after lexical (symlink-free) normalization.

pub mod executor;

pub use executor::{ExecError, WorkspaceExecutor, WriteReport, COMMAND_TIMEOUT};
