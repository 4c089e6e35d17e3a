use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Map, Value};

use crate::services::errors::ServiceError;
use crate::services::llm::LlmError;

pub const RATE_LIMIT_MESSAGE: &str = "Rate limit reached. Please try again in a few seconds.";

/// JSON error body returned by every handler:
/// `{error, message?, details?, retryAfterSeconds?}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Map<String, Value>,
    retry_after_secs: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        let mut body = Map::new();
        body.insert("error".to_string(), Value::String(error.into()));
        Self {
            status,
            body,
            retry_after_secs: None,
        }
    }

    pub fn bad_request(error: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error)
    }

    pub fn not_found(error: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, error)
    }

    pub fn with_field(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.body.insert(key.to_string(), value.into());
        self
    }

    /// Adds `retryAfterSeconds` to the body and a matching `Retry-After` header
    pub fn with_retry_after(mut self, retry_after_secs: u64) -> Self {
        self.retry_after_secs = Some(retry_after_secs);
        self.with_field("retryAfterSeconds", retry_after_secs)
    }

    pub fn rate_limited(retry_after_secs: u64) -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, "RATE_LIMIT")
            .with_field("message", RATE_LIMIT_MESSAGE)
            .with_retry_after(retry_after_secs)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Maps domain and provider failures onto their status codes; anything
    /// else becomes a 500 labelled with `label`.
    pub fn from_anyhow(err: anyhow::Error, label: &str) -> Self {
        if let Some(service_error) = err.downcast_ref::<ServiceError>() {
            return Self::from_service(service_error);
        }
        if let Some(LlmError::RateLimited {
            retry_after_secs, ..
        }) = err.downcast_ref::<LlmError>()
        {
            tracing::warn!(retry_after_secs, "LLM provider rate limit: {}", err);
            return Self::rate_limited(*retry_after_secs);
        }

        tracing::error!("{}: {:#}", label, err);
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, label).with_field("details", err.to_string())
    }

    fn from_service(err: &ServiceError) -> Self {
        let status = match err {
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ServiceError::Forbidden(_) => StatusCode::FORBIDDEN,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::TooManyRequests {
                message,
                retry_after_secs,
            } => {
                return Self::new(StatusCode::TOO_MANY_REQUESTS, message.clone())
                    .with_retry_after(*retry_after_secs);
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::from_anyhow(err, "Internal server error")
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        Self::from_service(&err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let message = errors
            .field_errors()
            .values()
            .flat_map(|list| list.iter())
            .find_map(|e| e.message.as_ref().map(|m| m.to_string()))
            .unwrap_or_else(|| "Invalid request".to_string());

        Self::bad_request("Validation error")
            .with_field("message", message)
            .with_field("details", errors.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(Value::Object(self.body))).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// `{success: true, message}` acknowledgement body
pub fn success(message: &str) -> Json<Value> {
    Json(json!({ "success": true, "message": message }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    async fn body_json(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn service_errors_keep_their_status() {
        let err: anyhow::Error = ServiceError::NotFound("Article not found".to_string()).into();
        let response = ApiError::from_anyhow(err.context("while loading"), "Analysis failed").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(response).await["error"], "Article not found");
    }

    #[tokio::test]
    async fn provider_rate_limit_sets_retry_after() {
        let err: anyhow::Error = LlmError::RateLimited {
            message: "quota exceeded".to_string(),
            retry_after_secs: 17,
        }
        .into();
        let response = ApiError::from_anyhow(err, "Failed to process request").into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "17");
        let body = body_json(response).await;
        assert_eq!(body["error"], "RATE_LIMIT");
        assert_eq!(body["retryAfterSeconds"], 17);
    }

    #[tokio::test]
    async fn login_lockout_is_a_429() {
        let err: anyhow::Error = ServiceError::TooManyRequests {
            message: "Too many failed login attempts".to_string(),
            retry_after_secs: 900,
        }
        .into();
        let response = ApiError::from(err).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "900");
    }

    #[tokio::test]
    async fn unexpected_errors_carry_label_and_details() {
        let err = Err::<(), _>(std::io::Error::other("socket closed"))
            .context("Failed to query article")
            .unwrap_err();
        let response = ApiError::from_anyhow(err, "Analysis failed").into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Analysis failed");
        assert_eq!(body["details"], "Failed to query article");
    }
}
