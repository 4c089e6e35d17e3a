//! Provider-neutral text generation interface.
//!
//! Services talk to [`LlmClient`]; the Gemini REST client lives in
//! `gemini_client`, and tests inject scripted implementations.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::metrics;

pub const DEFAULT_RETRY_AFTER_SECS: u64 = 60;
/// Longest provider backoff waited out in-request; longer hints surface as 429
pub const MAX_RETRY_WAIT_SECS: u64 = DEFAULT_RETRY_AFTER_SECS;

lazy_static! {
    static ref RETRY_IN_RE: Regex = Regex::new(r"(?i)retry in\s+([\d.]+)s").unwrap();
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Failed to decode provider response: {0}")]
    Decode(String),
    #[error("{message}")]
    RateLimited {
        message: String,
        retry_after_secs: u64,
    },
    #[error("API error [{status}]: {message}")]
    Api { status: u16, message: String },
    #[error("Provider returned an empty response")]
    EmptyResponse,
}

impl LlmError {
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            LlmError::RateLimited {
                retry_after_secs, ..
            } => Some(*retry_after_secs),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmTurn {
    pub role: LlmRole,
    pub text: String,
}

impl LlmTurn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: LlmRole::User,
            text: text.into(),
        }
    }

    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: LlmRole::Model,
            text: text.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub candidate_count: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmRequest {
    pub model: String,
    pub system_instruction: Option<String>,
    pub contents: Vec<LlmTurn>,
    pub generation_config: Option<GenerationConfig>,
    /// Ask the provider to block medium-and-above harmful content
    pub block_harmful_content: bool,
}

impl LlmRequest {
    /// Single user prompt with provider defaults
    pub fn prompt(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            system_instruction: None,
            contents: vec![LlmTurn::user(prompt)],
            generation_config: None,
            block_harmful_content: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmResponse {
    pub text: String,
    pub model: String,
    pub total_tokens: u32,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError>;
}

/// Provider messages that indicate quota exhaustion
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("429") || lower.contains("quota") || lower.contains("too many requests")
}

/// Parses `retry in 12.3s` style hints, rounding up
pub fn extract_retry_seconds(message: &str) -> Option<u64> {
    RETRY_IN_RE
        .captures(message)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(|secs| secs.ceil() as u64)
}

/// Calls the provider, waiting out rate limits up to `max_retries` times
/// as long as the requested backoff is within `MAX_RETRY_WAIT_SECS`.
pub async fn generate_with_retry(
    client: &dyn LlmClient,
    request: LlmRequest,
    max_retries: usize,
    operation: &str,
) -> Result<LlmResponse, LlmError> {
    let mut attempt = 0;
    loop {
        let start = Instant::now();
        let result = client.generate(request.clone()).await;
        let elapsed = start.elapsed().as_secs_f64();

        match result {
            Ok(response) => {
                metrics::record_llm_request(operation, "success", elapsed);
                return Ok(response);
            }
            Err(LlmError::RateLimited {
                message,
                retry_after_secs,
            }) if attempt < max_retries && retry_after_secs <= MAX_RETRY_WAIT_SECS => {
                metrics::record_llm_request(operation, "rate_limited", elapsed);
                attempt += 1;
                tracing::warn!(
                    operation,
                    attempt,
                    retry_after_secs,
                    "LLM rate limited, retrying: {}",
                    message
                );
                tokio::time::sleep(Duration::from_secs(retry_after_secs)).await;
            }
            Err(err) => {
                let status = if err.retry_after().is_some() {
                    "rate_limited"
                } else {
                    "error"
                };
                metrics::record_llm_request(operation, status, elapsed);
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use super::*;

    /// Replays canned results in order and records every request.
    #[derive(Default)]
    pub struct ScriptedLlm {
        replies: Mutex<VecDeque<Result<String, LlmError>>>,
        pub requests: Mutex<Vec<LlmRequest>>,
    }

    impl ScriptedLlm {
        pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            }
        }

        pub fn calls(&self) -> usize {
            self.requests.lock().unwrap().len()
        }

        pub fn prompt(&self, index: usize) -> String {
            let requests = self.requests.lock().unwrap();
            requests[index]
                .contents
                .iter()
                .map(|turn| turn.text.as_str())
                .collect::<Vec<_>>()
                .join("\n")
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlm {
        async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
            let model = request.model.clone();
            self.requests.lock().unwrap().push(request);
            let next = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(LlmError::EmptyResponse));
            next.map(|text| LlmResponse {
                text,
                model,
                total_tokens: 42,
            })
        }
    }

    pub fn rate_limited(secs: u64) -> LlmError {
        LlmError::RateLimited {
            message: "429 Too Many Requests".into(),
            retry_after_secs: secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{rate_limited, ScriptedLlm};
    use super::*;

    #[test]
    fn detects_rate_limit_messages() {
        assert!(is_rate_limit_message("[429 Too Many Requests] slow down"));
        assert!(is_rate_limit_message("You exceeded your current QUOTA"));
        assert!(is_rate_limit_message("too many requests"));
        assert!(!is_rate_limit_message("invalid argument"));
    }

    #[test]
    fn extracts_retry_hint_rounding_up() {
        assert_eq!(extract_retry_seconds("Please retry in 12.3s."), Some(13));
        assert_eq!(extract_retry_seconds("RETRY IN 4s"), Some(4));
        assert_eq!(extract_retry_seconds("quota exceeded"), None);
    }

    #[tokio::test]
    async fn retries_once_after_rate_limit() {
        let llm = ScriptedLlm::new(vec![Err(rate_limited(0)), Ok("hello".into())]);
        let response = generate_with_retry(&llm, LlmRequest::prompt("m", "hi"), 1, "test")
            .await
            .unwrap();
        assert_eq!(response.text, "hello");
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn persistent_rate_limit_surfaces() {
        let llm = ScriptedLlm::new(vec![Err(rate_limited(0)), Err(rate_limited(7))]);
        let err = generate_with_retry(&llm, LlmRequest::prompt("m", "hi"), 1, "test")
            .await
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(7));
        assert_eq!(llm.calls(), 2);
    }

    #[tokio::test]
    async fn long_backoff_hints_surface_without_waiting() {
        let llm = ScriptedLlm::new(vec![Err(rate_limited(86_400)), Ok("late".into())]);
        let err = generate_with_retry(&llm, LlmRequest::prompt("m", "hi"), 1, "test")
            .await
            .unwrap_err();
        assert_eq!(err.retry_after(), Some(86_400));
        assert_eq!(llm.calls(), 1);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let llm = ScriptedLlm::new(vec![Err(LlmError::Api {
            status: 400,
            message: "bad".into(),
        })]);
        let err = generate_with_retry(&llm, LlmRequest::prompt("m", "hi"), 1, "test")
            .await
            .unwrap_err();
        assert!(matches!(err, LlmError::Api { status: 400, .. }));
        assert_eq!(llm.calls(), 1);
    }
}
