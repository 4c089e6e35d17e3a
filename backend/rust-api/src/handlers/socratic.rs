use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use std::sync::Arc;

use crate::{
    extractors::AppJson,
    handlers::error::ApiError,
    middlewares::auth::JwtClaims,
    models::socratic::{
        ActiveSessionQuery, CreateSessionRequest, SessionResponse, SocraticStepRequest,
    },
    services::{
        errors::parse_object_id, progress_service::ProgressService,
        socratic_service::SocraticService, AppState,
    },
};

fn socratic_service(state: &AppState) -> SocraticService {
    SocraticService::new(
        state.mongo.clone(),
        state.llm.clone(),
        state.config.gemini.model.clone(),
    )
}

/// POST /api/v1/socraticbot - Next question, or grade the submitted answer
pub async fn socratic_step(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<SocraticStepRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let response = socratic_service(&state)
        .step(claims.user_id()?, req)
        .await
        .map_err(|e| ApiError::from_anyhow(e, "Failed to process request"))?;
    Ok(Json(response))
}

/// POST /api/v1/socratic/sessions
pub async fn create_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<CreateSessionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let session = socratic_service(&state)
        .create_session(claims.user_id()?, &req.article_id)
        .await?;
    Ok((StatusCode::CREATED, Json(SessionResponse::from(session))))
}

/// GET /api/v1/socratic/sessions/active?articleId= - `null` when there is none
pub async fn active_session(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<ActiveSessionQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let session = socratic_service(&state)
        .active_session(&claims.user_id()?, &query.article_id)
        .await?;
    Ok(Json(session.map(SessionResponse::from)))
}

/// GET /api/v1/socratic/progress/{article_id}
pub async fn article_progress(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(article_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.user_id()?;
    let article_id = parse_object_id(&article_id, "Article")?;

    let records = ProgressService::new(state.mongo.clone())
        .for_article(&user_id, &article_id)
        .await
        .unwrap_or_else(|e| {
            tracing::error!(article_id = %article_id.to_hex(), "Failed to load progress: {:#}", e);
            Vec::new()
        });
    Ok(Json(records))
}
