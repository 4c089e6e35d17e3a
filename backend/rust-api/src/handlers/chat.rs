use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::{
    extractors::AppJson,
    handlers::error::ApiError,
    middlewares::auth::JwtClaims,
    models::message::{ChatMessageResponse, ChatRequest},
    services::{
        chat_service::ChatService,
        errors::{parse_object_id, ServiceError},
        llm::LlmError,
        AppState,
    },
};

const CHAT_ERROR: &str = "Failed to process chat";
const BUSY_MESSAGE: &str = "The service is busy right now. Please try again in a moment.";
const INVALID_REQUEST_MESSAGE: &str = "The request could not be processed. Please rephrase your question.";
const GENERIC_MESSAGE: &str = "Something went wrong while processing your request.";

fn chat_service(state: &AppState) -> ChatService {
    ChatService::new(
        state.mongo.clone(),
        state.llm.clone(),
        state.config.gemini.chat_model.clone(),
    )
}

/// Provider failures keep the chat envelope with a message the UI can show as-is.
fn chat_error(err: anyhow::Error) -> ApiError {
    if err.downcast_ref::<ServiceError>().is_some() {
        return ApiError::from(err);
    }

    let friendly = match err.downcast_ref::<LlmError>() {
        Some(LlmError::RateLimited { retry_after_secs, .. }) => {
            let retry_after_secs = *retry_after_secs;
            tracing::warn!(retry_after_secs, "Chat rate limited by provider: {}", err);
            return ApiError::new(StatusCode::TOO_MANY_REQUESTS, CHAT_ERROR)
                .with_field("details", err.to_string())
                .with_field("userFriendlyMessage", BUSY_MESSAGE)
                .with_retry_after(retry_after_secs);
        }
        Some(LlmError::Api { status: 400, .. }) => INVALID_REQUEST_MESSAGE,
        _ => GENERIC_MESSAGE,
    };

    ApiError::from_anyhow(err, CHAT_ERROR).with_field("userFriendlyMessage", friendly)
}

/// POST /api/v1/chat
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<ChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = chat_service(&state)
        .chat(claims.user_id()?, req)
        .await
        .map_err(chat_error)?;
    Ok(Json(response))
}

/// GET /api/v1/chat/{article_id}/history - Oldest first, empty on read errors
pub async fn chat_history(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(article_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.user_id()?;
    let article_id = parse_object_id(&article_id, "Article")?;

    let messages: Vec<ChatMessageResponse> = match chat_service(&state).history(&user_id, &article_id).await {
        Ok(messages) => messages.into_iter().map(ChatMessageResponse::from).collect(),
        Err(e) => {
            tracing::error!(article_id = %article_id.to_hex(), "Failed to load chat history: {:#}", e);
            Vec::new()
        }
    };
    Ok(Json(messages))
}

/// DELETE /api/v1/chat/{article_id}/history
pub async fn clear_chat_history(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(article_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let article_id = parse_object_id(&article_id, "Article")?;
    let deleted = chat_service(&state)
        .clear_history(&claims.user_id()?, &article_id)
        .await?;

    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn render(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn rate_limits_are_429_with_busy_message() {
        let err = LlmError::RateLimited {
            message: "quota".to_string(),
            retry_after_secs: 5,
        };
        let response = chat_error(err.into()).into_response();
        assert_eq!(response.headers()[axum::http::header::RETRY_AFTER], "5");

        let err = LlmError::RateLimited {
            message: "quota".to_string(),
            retry_after_secs: 5,
        };
        let (status, body) = render(chat_error(err.into())).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "Failed to process chat");
        assert!(body["details"].as_str().unwrap().contains("quota"));
        assert_eq!(body["retryAfterSeconds"], 5);
        assert_eq!(body["userFriendlyMessage"], BUSY_MESSAGE);
    }

    #[tokio::test]
    async fn provider_rejections_are_500_with_details() {
        let err = LlmError::Api {
            status: 400,
            message: "bad content".to_string(),
        };
        let (status, body) = render(chat_error(err.into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Failed to process chat");
        assert_eq!(body["userFriendlyMessage"], INVALID_REQUEST_MESSAGE);
        assert!(body["details"].as_str().unwrap().contains("bad content"));

        let (_, body) = render(chat_error(LlmError::EmptyResponse.into())).await;
        assert_eq!(body["userFriendlyMessage"], GENERIC_MESSAGE);
    }

    #[tokio::test]
    async fn validation_errors_pass_through() {
        let err = ServiceError::BadRequest("Missing articleId or message".to_string());
        let (status, body) = render(chat_error(err.into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing articleId or message");
        assert!(body.get("userFriendlyMessage").is_none());
    }
}
