//! OpenAI-compatible adapters.
//!
//! [`OpenAiBackend`] issues one buffered chat completion against any
//! `/v1/chat/completions` endpoint. [`NimBackend`] targets the
//! NVIDIA-hosted variant of the same protocol, where streaming is
//! mandatory (a non-streaming request against that host hangs) and the
//! per-model `chat_template_kwargs` object is passed through unmodified.

use std::time::Duration;

use futures_util::StreamExt;
use serde::Deserialize;
use tracing::debug;

use crate::provider::{estimate_tokens, retry_after_header, BackendError, Completion};

fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn chat_messages(system_prompt: &str, user_prompt: &str) -> serde_json::Value {
    serde_json::json!([
        {"role": "system", "content": system_prompt},
        {"role": "user", "content": user_prompt},
    ])
}

// ---------------------------------------------------------------------------
// OpenAiBackend (buffered)
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
}

impl OpenAiBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        max_tokens: u32,
    ) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
            max_tokens,
        }
    }

    /// Override the base URL (useful for testing with a local server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn build_request_body(&self, system_prompt: &str, user_prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "messages": chat_messages(system_prompt, user_prompt),
            "max_tokens": self.max_tokens,
            "temperature": 0.7,
        })
    }

    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion, BackendError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&self.build_request_body(system_prompt, user_prompt));
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();

        if status == 429 {
            return Err(BackendError::RateLimited {
                retry_after: retry_after_header(&resp),
            });
        }
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BackendError::Api { status, message });
        }

        let api_resp: ChatResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        let choice = api_resp
            .choices
            .first()
            .ok_or_else(|| BackendError::Parse("no choices in response".into()))?;
        let text = choice.message.content.clone().unwrap_or_default();
        let tokens = api_resp
            .usage
            .and_then(|u| u.total_tokens)
            .unwrap_or_else(|| estimate_tokens(&text));

        Ok(Completion {
            text,
            tokens,
            model: api_resp.model.unwrap_or_else(|| self.model.clone()),
            finish_reason: choice.finish_reason.clone(),
        })
    }
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    model: Option<String>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    total_tokens: Option<u64>,
}

// ---------------------------------------------------------------------------
// NimBackend (streaming required)
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct NimBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    /// Forwarded verbatim; the host keys thinking modes off it.
    chat_template_kwargs: Option<serde_json::Value>,
}

impl NimBackend {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        max_tokens: u32,
        chat_template_kwargs: Option<serde_json::Value>,
    ) -> Self {
        Self {
            client: http_client(),
            base_url: base_url.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            model: model.into(),
            max_tokens,
            chat_template_kwargs,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn build_request_body(&self, system_prompt: &str, user_prompt: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": chat_messages(system_prompt, user_prompt),
            "max_tokens": self.max_tokens,
            "temperature": 0.7,
            "stream": true,
        });
        if let Some(ref kwargs) = self.chat_template_kwargs {
            body["chat_template_kwargs"] = kwargs.clone();
        }
        body
    }

    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion, BackendError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream")
            .json(&self.build_request_body(system_prompt, user_prompt));
        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let resp = req.send().await?;
        let status = resp.status().as_u16();

        if status == 429 {
            return Err(BackendError::RateLimited {
                retry_after: retry_after_header(&resp),
            });
        }
        if !resp.status().is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(BackendError::Api { status, message });
        }

        let mut acc = SseAccumulator::default();
        let mut buffer = String::new();
        let mut stream = resp.bytes_stream();

        'outer: while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| BackendError::Http(format!("stream read: {}", e)))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(newline) = buffer.find('\n') {
                let line = buffer[..newline].trim().to_string();
                buffer.drain(..=newline);
                if acc.apply_line(&line) {
                    break 'outer;
                }
            }
        }

        debug!(model = %self.model, chars = acc.text.len(), "stream drained");
        Ok(acc.into_completion(&self.model))
    }
}

// ---------------------------------------------------------------------------
// SSE accumulation
// ---------------------------------------------------------------------------

/// State built up over `data:` lines of a chat-completions SSE stream.
#[derive(Debug, Default)]
pub(crate) struct SseAccumulator {
    pub text: String,
    pub usage_tokens: Option<u64>,
    pub finish_reason: Option<String>,
}

impl SseAccumulator {
    /// Feed one line; returns `true` on the `[DONE]` terminator. Comment
    /// lines, blanks, and unparseable payloads are skipped.
    pub fn apply_line(&mut self, line: &str) -> bool {
        if line.is_empty() || line.starts_with(':') {
            return false;
        }
        let Some(data) = line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")) else {
            return false;
        };
        if data.trim() == "[DONE]" {
            return true;
        }
        let Ok(event) = serde_json::from_str::<serde_json::Value>(data) else {
            return false;
        };

        if let Some(total) = event["usage"]["total_tokens"].as_u64() {
            self.usage_tokens = Some(total);
        }
        let choice = &event["choices"][0];
        if let Some(reason) = choice["finish_reason"].as_str() {
            self.finish_reason = Some(reason.to_string());
        }
        if let Some(content) = choice["delta"]["content"].as_str() {
            self.text.push_str(content);
        }
        false
    }

    pub fn into_completion(self, fallback_model: &str) -> Completion {
        let tokens = self.usage_tokens.unwrap_or_else(|| estimate_tokens(&self.text));
        Completion {
            tokens,
            model: fallback_model.to_string(),
            finish_reason: self.finish_reason,
            text: self.text,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_request_body_shape() {
        let backend = OpenAiBackend::new("http://localhost:8000", None, "gpt-4o-mini", 2048);
        let body = backend.build_request_body("be terse", "write hello");

        assert_eq!(body["model"], "gpt-4o-mini");
        assert_eq!(body["max_tokens"], 2048);
        assert!(body.get("stream").is_none());
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 2);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[0]["content"], "be terse");
        assert_eq!(msgs[1]["role"], "user");
    }

    #[test]
    fn nim_request_body_streams_and_passes_kwargs_through() {
        let kwargs = serde_json::json!({"enable_thinking": true, "clear_thinking": false});
        let backend = NimBackend::new(
            "https://integrate.api.nvidia.com",
            Some("key".into()),
            "qwen/qwen3-coder",
            4096,
            Some(kwargs.clone()),
        );
        let body = backend.build_request_body("sys", "user");

        assert_eq!(body["stream"], true);
        assert_eq!(body["chat_template_kwargs"], kwargs);
    }

    #[test]
    fn nim_request_body_without_kwargs() {
        let backend = NimBackend::new("https://h", None, "m", 1024, None);
        let body = backend.build_request_body("sys", "user");
        assert!(body.get("chat_template_kwargs").is_none());
        assert_eq!(body["stream"], true);
    }

    #[test]
    fn sse_accumulates_deltas() {
        let mut acc = SseAccumulator::default();
        assert!(!acc.apply_line(r#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#));
        assert!(!acc.apply_line(r#"data: {"choices":[{"delta":{"content":"lo"}}]}"#));
        assert!(!acc.apply_line(
            r#"data: {"choices":[{"delta":{},"finish_reason":"stop"}],"usage":{"total_tokens":42}}"#
        ));
        assert!(acc.apply_line("data: [DONE]"));

        let completion = acc.into_completion("m");
        assert_eq!(completion.text, "Hello");
        assert_eq!(completion.tokens, 42);
        assert_eq!(completion.finish_reason.as_deref(), Some("stop"));
    }

    #[test]
    fn sse_skips_comments_blanks_and_garbage() {
        let mut acc = SseAccumulator::default();
        assert!(!acc.apply_line(""));
        assert!(!acc.apply_line(": keep-alive"));
        assert!(!acc.apply_line("event: ping"));
        assert!(!acc.apply_line("data: {not json"));
        assert!(acc.text.is_empty());
    }

    #[test]
    fn sse_estimates_tokens_without_usage() {
        let mut acc = SseAccumulator::default();
        acc.apply_line(r#"data: {"choices":[{"delta":{"content":"abcdefgh"}}]}"#);
        let completion = acc.into_completion("m");
        assert_eq!(completion.tokens, 2); // ⌈8/4⌉
    }

    #[tokio::test]
    async fn buffered_connection_refused_is_transport() {
        let backend = OpenAiBackend::new("http://127.0.0.1:19999", None, "m", 128);
        let err = backend.complete("s", "u").await.unwrap_err();
        assert!(matches!(
            err,
            BackendError::Http(_) | BackendError::Timeout
        ));
    }

    #[test]
    fn empty_api_key_treated_as_none() {
        let backend = OpenAiBackend::new("http://h", Some(String::new()), "m", 128);
        assert!(backend.api_key.is_none());
    }
}
