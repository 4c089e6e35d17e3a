use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::{
    handlers::{attachment, error::ApiError, file_stem, XLSX_CONTENT_TYPE},
    middlewares::auth::JwtClaims,
    services::{
        article_service::{ArticleService, DeleteScope},
        errors::parse_object_id,
        export_service,
        instructor_service::InstructorService,
        progress_service::ProgressService,
        AppState,
    },
};

fn instructor_service(state: &AppState) -> InstructorService {
    InstructorService::new(state.mongo.clone())
}

/// GET /api/v1/instructor/stats
pub async fn get_stats(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(instructor_service(&state).stats().await?))
}

/// GET /api/v1/instructor/students
pub async fn list_students(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(instructor_service(&state).students().await?))
}

/// GET /api/v1/instructor/students/{id}/progress
pub async fn student_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let student_id = parse_object_id(&id, "Student")?;
    instructor_service(&state).student(&student_id).await?;

    let progress = ProgressService::new(state.mongo.clone())
        .for_user_with_articles(&student_id)
        .await?;
    Ok(Json(progress))
}

/// GET /api/v1/instructor/students/{id}/progress/export - XLSX workbook
pub async fn export_student_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let student_id = parse_object_id(&id, "Student")?;
    let student = instructor_service(&state).student(&student_id).await?;

    let rows = ProgressService::new(state.mongo.clone())
        .for_user_with_articles(&student_id)
        .await?;
    let bytes = export_service::progress_xlsx(&student.full_name, &rows)
        .map_err(|e| ApiError::from_anyhow(e, "Failed to build workbook"))?;

    tracing::info!(student_id = %id, rows = rows.len(), "Progress workbook exported");
    Ok(attachment(
        bytes,
        XLSX_CONTENT_TYPE,
        &format!("{}-progress.xlsx", file_stem(&student.full_name)),
    ))
}

/// GET /api/v1/instructor/articles
pub async fn list_articles(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(instructor_service(&state).articles().await?))
}

/// DELETE /api/v1/instructor/articles/{id} - Any article, regardless of owner
pub async fn delete_article(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let article_id = parse_object_id(&id, "Article")?;
    ArticleService::new(state.mongo.clone())
        .delete(
            &article_id,
            &claims.user_id()?,
            DeleteScope::Any,
            state.storage.as_ref(),
        )
        .await?;

    tracing::info!(article_id = %id, instructor_id = %claims.sub, "Article deleted by instructor");
    Ok(Json(json!({ "success": true })))
}

/// GET /api/v1/instructor/analytics
pub async fn get_analytics(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(instructor_service(&state).analytics().await?))
}
