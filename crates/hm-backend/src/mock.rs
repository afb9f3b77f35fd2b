//! Queued-response mock backend for tests and offline runs.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use crate::provider::{estimate_tokens, BackendError, Completion};

/// Pops a pre-queued response per call; falls back to a default
/// completion when the queue is empty. Clones share the queue and the
/// captured prompts, so a handle kept by a test observes calls made
/// through the registry's copy.
#[derive(Clone)]
pub struct MockBackend {
    model: String,
    responses: Arc<Mutex<VecDeque<Result<Completion, BackendError>>>>,
    captured: Arc<Mutex<Vec<(String, String)>>>,
}

impl MockBackend {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            responses: Arc::new(Mutex::new(VecDeque::new())),
            captured: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Queue a full completion.
    pub fn with_response(self, completion: Completion) -> Self {
        self.responses.lock().unwrap().push_back(Ok(completion));
        self
    }

    /// Queue a plain-text completion with estimated tokens.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        let text = text.into();
        let completion = Completion {
            tokens: estimate_tokens(&text),
            model: self.model.clone(),
            finish_reason: Some("stop".into()),
            text,
        };
        self.with_response(completion)
    }

    /// Queue an error.
    pub fn with_error(self, error: BackendError) -> Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    /// Prompts captured across all calls, in order.
    pub fn captured_prompts(&self) -> Vec<(String, String)> {
        self.captured.lock().unwrap().clone()
    }

    pub async fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<Completion, BackendError> {
        self.captured
            .lock()
            .unwrap()
            .push((system_prompt.to_string(), user_prompt.to_string()));

        let queued = self.responses.lock().unwrap().pop_front();
        match queued {
            Some(result) => result,
            None => Ok(Completion {
                text: "Mock response".to_string(),
                tokens: 12,
                model: self.model.clone(),
                finish_reason: Some("stop".into()),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
