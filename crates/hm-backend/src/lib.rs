//! Model backend adapters.
//!
//! Every provider an agent can be configured with is normalized to the
//! same capability: take a system prompt and a user prompt, return
//! `{text, tokens, model, finish_reason}`, and fail with a typed error
//! that distinguishes rate limiting from other transport faults. The
//! provider set is closed (dispatch is by variant tag, not virtual
//! lookup) and every call sits behind a five-minute wall clock.

pub mod anthropic;
pub mod credentials;
pub mod gemini;
pub mod mock;
pub mod openai;
pub mod prompt;
pub mod provider;

pub use credentials::{credential_satisfied, env_snapshot, resolve_credential, EnvSnapshot};
pub use mock::MockBackend;
pub use provider::{estimate_tokens, Backend, BackendError, Completion, ErrorKind};
