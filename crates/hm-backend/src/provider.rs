//! Shared adapter types and the closed backend variant set.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use hm_core::config::AgentSpec;
use hm_core::types::ProviderKind;

use crate::anthropic::AnthropicBackend;
use crate::gemini::GeminiBackend;
use crate::mock::MockBackend;
use crate::openai::{NimBackend, OpenAiBackend};

/// Wall-clock ceiling on any single adapter call.
pub const BACKEND_TIMEOUT: Duration = Duration::from_secs(300);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Connection failure, DNS, TLS, refused socket.
    #[error("HTTP error: {0}")]
    Http(String),

    /// The API answered with a non-success status.
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("parse error: {0}")]
    Parse(String),

    /// HTTP 429 or the provider's equivalent signal.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// The five-minute wall clock expired.
    #[error("backend call timed out")]
    Timeout,

    /// A bridge-kind provider reached the core; it belongs to the host IDE.
    #[error("bridge provider `{0}` is executed by the host IDE, not the core")]
    Bridge(String),
}

/// Coarse classification the orchestrator keys its reaction on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    RateLimited,
    Transport,
    Other,
}

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BackendError::RateLimited { .. } => ErrorKind::RateLimited,
            BackendError::Http(_) | BackendError::Api { .. } | BackendError::Timeout => {
                ErrorKind::Transport
            }
            BackendError::Parse(_) | BackendError::Bridge(_) => ErrorKind::Other,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Http(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Completion
// ---------------------------------------------------------------------------

/// Normalized return of every adapter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub tokens: u64,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Fallback token count when the provider reports no usage: `⌈len/4⌉`.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Pull a `Retry-After` seconds value out of a response, if present.
pub(crate) fn retry_after_header(resp: &reqwest::Response) -> Option<Duration> {
    resp.headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// The closed set of wire protocols. One instance is built per agent and
/// kept on its registry entry; clones share the underlying HTTP client
/// (and, for mocks, the response queue).
#[derive(Clone)]
pub enum Backend {
    OpenAi(OpenAiBackend),
    Nim(NimBackend),
    Anthropic(AnthropicBackend),
    Gemini(GeminiBackend),
    /// Inert: rejected with a typed error before any I/O.
    Bridge { label: String },
    Mock(MockBackend),
}

impl Backend {
    /// Build the adapter an agent spec describes. `secret` is the
    /// credential already resolved from the environment snapshot; the
    /// adapter itself never reads the environment.
    pub fn from_spec(spec: &AgentSpec, secret: Option<String>) -> Self {
        match spec.provider {
            ProviderKind::OpenaiCompatible => Backend::OpenAi(OpenAiBackend::new(
                spec.endpoint.clone().unwrap_or_default(),
                secret,
                spec.model.clone(),
                spec.max_tokens,
            )),
            ProviderKind::Nim => Backend::Nim(NimBackend::new(
                spec.endpoint.clone().unwrap_or_default(),
                secret,
                spec.model.clone(),
                spec.max_tokens,
                spec.chat_template_kwargs.clone(),
            )),
            ProviderKind::Anthropic => Backend::Anthropic(AnthropicBackend::new(
                secret.unwrap_or_default(),
                spec.model.clone(),
                spec.max_tokens,
            )),
            ProviderKind::Gemini => Backend::Gemini(GeminiBackend::new(
                secret.unwrap_or_default(),
                spec.model.clone(),
                spec.max_tokens,
            )),
            ProviderKind::CursorBridge => Backend::Bridge {
                label: "cursor".to_string(),
            },
            ProviderKind::CopilotBridge => Backend::Bridge {
                label: "copilot".to_string(),
            },
            ProviderKind::Mock => Backend::Mock(MockBackend::new(spec.model.clone())),
        }
    }

    /// Run one completion under the five-minute wall clock.
    pub async fn execute(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion, BackendError> {
        match tokio::time::timeout(
            BACKEND_TIMEOUT,
            self.execute_inner(system_prompt, user_prompt),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!("backend call hit the wall-clock deadline");
                Err(BackendError::Timeout)
            }
        }
    }

    async fn execute_inner(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion, BackendError> {
        match self {
            Backend::OpenAi(b) => b.complete(system_prompt, user_prompt).await,
            Backend::Nim(b) => b.complete(system_prompt, user_prompt).await,
            Backend::Anthropic(b) => b.complete(system_prompt, user_prompt).await,
            Backend::Gemini(b) => b.complete(system_prompt, user_prompt).await,
            Backend::Bridge { label } => Err(BackendError::Bridge(label.clone())),
            Backend::Mock(b) => b.complete(system_prompt, user_prompt).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
