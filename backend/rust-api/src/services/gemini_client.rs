use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use serde_json::{json, Value};

use crate::config::GeminiSettings;
use crate::services::llm::{
    extract_retry_seconds, is_rate_limit_message, LlmClient, LlmError, LlmRequest, LlmResponse,
    DEFAULT_RETRY_AFTER_SECS,
};

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

/// Gemini `generateContent` over REST
pub struct GeminiClient {
    api_key: String,
    base_url: String,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(settings: &GeminiSettings) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .context("Failed to build Gemini HTTP client")?;

        Ok(Self {
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn endpoint(&self, model: &str) -> String {
        format!("{}/v1beta/models/{}:generateContent", self.base_url, model)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        let body = build_request_body(&request);

        let response = self
            .http
            .post(self.endpoint(&request.model))
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let text = response.text().await?;

        if status >= 400 {
            let err = classify_error(status, &text, retry_after.as_deref());
            tracing::warn!(status, model = %request.model, "Gemini request failed: {}", err);
            return Err(err);
        }

        let json: Value =
            serde_json::from_str(&text).map_err(|e| LlmError::Decode(e.to_string()))?;
        parse_generate_response(&json, &request.model)
    }
}

pub(crate) fn build_request_body(request: &LlmRequest) -> Value {
    let contents: Vec<Value> = request
        .contents
        .iter()
        .map(|turn| {
            json!({
                "role": turn.role,
                "parts": [{ "text": turn.text }]
            })
        })
        .collect();

    let mut body = json!({ "contents": contents });
    if let Some(system) = &request.system_instruction {
        body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
    }
    if let Some(config) = &request.generation_config {
        body["generationConfig"] = json!(config);
    }
    if request.block_harmful_content {
        body["safetySettings"] = Value::Array(
            HARM_CATEGORIES
                .iter()
                .map(|category| {
                    json!({ "category": category, "threshold": "BLOCK_MEDIUM_AND_ABOVE" })
                })
                .collect(),
        );
    }
    body
}

pub(crate) fn parse_generate_response(json: &Value, model: &str) -> Result<LlmResponse, LlmError> {
    let text: String = json["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        if let Some(reason) = json["promptFeedback"]["blockReason"].as_str() {
            return Err(LlmError::Api {
                status: 400,
                message: format!("Prompt blocked: {}", reason),
            });
        }
        return Err(LlmError::EmptyResponse);
    }

    Ok(LlmResponse {
        text,
        model: json["modelVersion"].as_str().unwrap_or(model).to_string(),
        total_tokens: json["usageMetadata"]["totalTokenCount"]
            .as_u64()
            .unwrap_or(0) as u32,
    })
}

/// Maps an error response to `RateLimited` or `Api`.
pub(crate) fn classify_error(status: u16, body: &str, retry_after_header: Option<&str>) -> LlmError {
    let json: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let message = json["error"]["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| body.chars().take(500).collect());

    if status == 429 || is_rate_limit_message(&message) {
        let retry_after_secs = extract_retry_seconds(&message)
            .or_else(|| retry_info_delay(&json))
            .or_else(|| retry_after_header.and_then(|v| v.trim().parse().ok()))
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
        return LlmError::RateLimited {
            message,
            retry_after_secs,
        };
    }

    LlmError::Api { status, message }
}

/// `google.rpc.RetryInfo` detail, e.g. `"retryDelay": "37s"`
fn retry_info_delay(json: &Value) -> Option<u64> {
    json["error"]["details"]
        .as_array()?
        .iter()
        .filter(|detail| {
            detail["@type"]
                .as_str()
                .is_some_and(|t| t.ends_with("RetryInfo"))
        })
        .filter_map(|detail| detail["retryDelay"].as_str())
        .filter_map(|delay| delay.trim_end_matches('s').parse::<f64>().ok())
        .map(|secs| secs.ceil() as u64)
        .next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::llm::{GenerationConfig, LlmTurn};

    #[test]
    fn request_body_uses_gemini_shape() {
        let request = LlmRequest {
            model: "gemini-2.5-flash".into(),
            system_instruction: Some("Be helpful".into()),
            contents: vec![LlmTurn::user("hi"), LlmTurn::model("hello")],
            generation_config: Some(GenerationConfig {
                temperature: Some(0.4),
                top_k: Some(40),
                ..Default::default()
            }),
            block_harmful_content: true,
        };
        let body = build_request_body(&request);

        assert_eq!(body["contents"][1]["role"], "model");
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hi");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be helpful");
        assert_eq!(body["generationConfig"]["topK"], 40);
        assert!(body["generationConfig"].get("topP").is_none());
        assert_eq!(body["safetySettings"].as_array().unwrap().len(), 4);
    }

    #[test]
    fn plain_prompt_omits_optional_sections() {
        let body = build_request_body(&LlmRequest::prompt("m", "hi"));
        assert!(body.get("systemInstruction").is_none());
        assert!(body.get("safetySettings").is_none());
        assert!(body.get("generationConfig").is_none());
    }

    #[test]
    fn response_text_joins_parts() {
        let json = json!({
            "candidates": [{ "content": { "parts": [{ "text": "Hello " }, { "text": "world" }] } }],
            "usageMetadata": { "totalTokenCount": 17 }
        });
        let response = parse_generate_response(&json, "gemini-2.5-flash").unwrap();
        assert_eq!(response.text, "Hello world");
        assert_eq!(response.total_tokens, 17);
        assert_eq!(response.model, "gemini-2.5-flash");

        let empty = json!({ "candidates": [] });
        assert!(matches!(
            parse_generate_response(&empty, "m"),
            Err(LlmError::EmptyResponse)
        ));
    }

    #[test]
    fn rate_limit_prefers_message_hint_then_retry_info_then_header() {
        let body = r#"{"error": {"code": 429, "message": "Quota exceeded. Please retry in 12.2s.",
            "details": [{"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "40s"}]}}"#;
        assert_eq!(classify_error(429, body, Some("5")).retry_after(), Some(13));

        let body = r#"{"error": {"code": 429, "message": "Resource exhausted",
            "details": [{"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "40s"}]}}"#;
        assert_eq!(classify_error(429, body, Some("5")).retry_after(), Some(40));

        assert_eq!(classify_error(429, "{}", Some("5")).retry_after(), Some(5));
        assert_eq!(
            classify_error(429, "busy", None).retry_after(),
            Some(DEFAULT_RETRY_AFTER_SECS)
        );
    }

    #[test]
    fn quota_message_counts_as_rate_limit_regardless_of_status() {
        let body = r#"{"error": {"message": "You exceeded your current quota"}}"#;
        assert!(classify_error(403, body, None).retry_after().is_some());

        let err = classify_error(400, r#"{"error": {"message": "API key not valid"}}"#, None);
        assert!(matches!(err, LlmError::Api { status: 400, ref message } if message == "API key not valid"));
    }
}
