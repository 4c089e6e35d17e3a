use axum::{extract::State, http::StatusCode, response::IntoResponse, Extension, Json};
use axum_extra::extract::cookie::CookieJar;
use std::sync::Arc;
use validator::Validate;

use crate::{
    extractors::AppJson,
    handlers::{auth::cleared_refresh_cookie, error::ApiError},
    middlewares::auth::JwtClaims,
    models::user::UpdateProfileRequest,
    services::{profile_service::ProfileService, AppState},
};

/// GET /api/v1/profile
pub async fn get_profile(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let profile = ProfileService::new(state.mongo.clone())
        .profile(&claims.user_id()?)
        .await?;
    Ok(Json(profile))
}

/// PATCH /api/v1/profile
pub async fn update_profile(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<UpdateProfileRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    let user = ProfileService::new(state.mongo.clone())
        .update_full_name(&claims.user_id()?, &req.full_name)
        .await?;
    Ok(Json(user))
}

/// DELETE /api/v1/profile - Removes the account and signs the browser out
pub async fn delete_account(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    ProfileService::new(state.mongo.clone())
        .delete_account(&claims.user_id()?)
        .await?;

    Ok((StatusCode::NO_CONTENT, jar.add(cleared_refresh_cookie(&state))))
}
