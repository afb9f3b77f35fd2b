//! Anthropic Messages API adapter, normalized to the common completion shape.

use std::time::Duration;

use serde::Deserialize;

use crate::provider::{estimate_tokens, retry_after_header, BackendError, Completion};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicBackend {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
            model: model.into(),
            max_tokens,
        }
    }

    /// Override the base URL (useful for testing with a mock server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// The Messages API takes the system prompt as a top-level field, not
    /// as a message.
    pub fn build_request_body(&self, system_prompt: &str, user_prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system_prompt,
            "messages": [
                {"role": "user", "content": user_prompt},
            ],
        })
    }

    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion, BackendError> {
        let url = format!("{}/v1/messages", self.base_url);
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(&self.build_request_body(system_prompt, user_prompt))
            .send()
            .await?;

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

        let api_resp: MessagesResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        let text = api_resp
            .content
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        let tokens = match api_resp.usage {
            Some(usage) => usage.input_tokens + usage.output_tokens,
            None => estimate_tokens(&text),
        };

        Ok(Completion {
            text,
            tokens,
            model: api_resp.model.unwrap_or_else(|| self.model.clone()),
            finish_reason: api_resp.stop_reason,
        })
    }
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
    model: Option<String>,
    stop_reason: Option<String>,
    usage: Option<MessagesUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    text: Option<String>,
}

#[derive(Deserialize)]
struct MessagesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_puts_system_at_top_level() {
        let backend = AnthropicBackend::new("key", "claude-sonnet-4-20250514", 8192);
        let body = backend.build_request_body("be helpful", "write hello");

        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["max_tokens"], 8192);
        assert_eq!(body["system"], "be helpful");
        let msgs = body["messages"].as_array().unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["role"], "user");
        assert_eq!(msgs[0]["content"], "write hello");
    }

    #[test]
    fn response_shape_deserializes() {
        let json = r#"{
            "content": [{"type": "text", "text": "Hello"}, {"type": "text", "text": " there"}],
            "model": "claude-sonnet-4-20250514",
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 30, "output_tokens": 12}
        }"#;
        let resp: MessagesResponse = serde_json::from_str(json).unwrap();
        let text: String = resp
            .content
            .iter()
            .filter_map(|b| b.text.as_deref())
            .collect();
        assert_eq!(text, "Hello there");
        let usage = resp.usage.unwrap();
        assert_eq!(usage.input_tokens + usage.output_tokens, 42);
    }

    #[test]
    fn response_without_usage_is_tolerated() {
        let json = r#"{"content": [{"type": "text", "text": "hi"}]}"#;
        let resp: MessagesResponse = serde_json::from_str(json).unwrap();
        assert!(resp.usage.is_none());
        assert!(resp.model.is_none());
    }

    #[tokio::test]
    async fn connection_refused_is_transport() {
        let backend = AnthropicBackend::new("key", "m", 128)
            .with_base_url("http://127.0.0.1:19998");
        let err = backend.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, BackendError::Http(_) | BackendError::Timeout));
    }
}
