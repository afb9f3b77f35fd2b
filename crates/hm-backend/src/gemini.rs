//! Google Gemini `generateContent` adapter, normalized to the common
//! completion shape.

use std::time::Duration;

use serde::Deserialize;

use crate::provider::{estimate_tokens, retry_after_header, BackendError, Completion};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

#[derive(Clone)]
pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    max_tokens: u32,
}

impl GeminiBackend {
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

    pub fn build_request_body(&self, system_prompt: &str, user_prompt: &str) -> serde_json::Value {
        serde_json::json!({
            "system_instruction": {"parts": [{"text": system_prompt}]},
            "contents": [
                {"role": "user", "parts": [{"text": user_prompt}]},
            ],
            "generationConfig": {
                "maxOutputTokens": self.max_tokens,
                "temperature": 0.7,
            },
        })
    }

    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion, BackendError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );
        let resp = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
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

        let api_resp: GenerateResponse = resp
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        let candidate = api_resp
            .candidates
            .first()
            .ok_or_else(|| BackendError::Parse("no candidates in response".into()))?;
        let text = candidate
            .content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect::<Vec<_>>()
            .join("");
        let tokens = api_resp
            .usage_metadata
            .and_then(|u| u.total_token_count)
            .unwrap_or_else(|| estimate_tokens(&text));

        Ok(Completion {
            text,
            tokens,
            model: self.model.clone(),
            finish_reason: candidate.finish_reason.clone(),
        })
    }
}

#[derive(Deserialize)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
    #[serde(rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Deserialize)]
struct UsageMetadata {
    #[serde(rename = "totalTokenCount")]
    total_token_count: Option<u64>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let backend = GeminiBackend::new("key", "gemini-2.0-flash", 4096);
        let body = backend.build_request_body("be terse", "write hello");

        assert_eq!(body["system_instruction"]["parts"][0]["text"], "be terse");
        assert_eq!(body["contents"][0]["role"], "user");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "write hello");
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 4096);
    }

    #[test]
    fn response_shape_deserializes() {
        let json = r#"{
            "candidates": [{
                "content": {"parts": [{"text": "Hi"}, {"text": " there"}], "role": "model"},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 10, "candidatesTokenCount": 5, "totalTokenCount": 15}
        }"#;
        let resp: GenerateResponse = serde_json::from_str(json).unwrap();
        let text: String = resp.candidates[0]
            .content
            .parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        assert_eq!(text, "Hi there");
        assert_eq!(resp.usage_metadata.unwrap().total_token_count, Some(15));
        assert_eq!(resp.candidates[0].finish_reason.as_deref(), Some("STOP"));
    }

    #[test]
    fn empty_parts_tolerated() {
        let json = r#"{"candidates": [{"content": {"role": "model"}}]}"#;
        let resp: GenerateResponse = serde_json::from_str(json).unwrap();
        assert!(resp.candidates[0].content.parts.is_empty());
    }

    #[tokio::test]
    async fn connection_refused_is_transport() {
        let backend =
            GeminiBackend::new("key", "gemini-2.0-flash", 128).with_base_url("http://127.0.0.1:19997");
        let err = backend.complete("s", "u").await.unwrap_err();
        assert!(matches!(err, BackendError::Http(_) | BackendError::Timeout));
    }
}
