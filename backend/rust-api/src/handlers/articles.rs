use axum::{
    extract::{Multipart, Path, Query, State},
    response::IntoResponse,
    Extension, Json,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::{
    extractors::AppJson,
    handlers::{attachment, error::ApiError, file_stem, PDF_CONTENT_TYPE},
    middlewares::auth::JwtClaims,
    models::article::{
        AnalyzeRequest, ArticleResponse, CompareQuery, ComparisonResponse, ListArticlesQuery,
    },
    services::{
        analysis_service::AnalysisService,
        article_service::{ArticleService, DeleteScope},
        comparison::compare_articles,
        errors::parse_object_id,
        export_service, pdf_text, AppState,
    },
};

const DOWNLOAD_URL_TTL: Duration = Duration::from_secs(15 * 60);

struct UploadForm {
    title: String,
    filename: String,
    bytes: Vec<u8>,
}

async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, ApiError> {
    let mut title = None;
    let mut file = None;

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::bad_request("Invalid multipart body").with_field("details", e.body_text())
    })? {
        match field.name() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .filter(|name| !name.trim().is_empty())
                    .unwrap_or("article.pdf")
                    .to_string();
                let bytes = field.bytes().await.map_err(|e| {
                    ApiError::bad_request("Failed to read uploaded file").with_field("details", e.body_text())
                })?;
                if !bytes.is_empty() {
                    file = Some((filename, bytes.to_vec()));
                }
            }
            Some("title") => {
                let text = field.text().await.map_err(|e| {
                    ApiError::bad_request("Failed to read title").with_field("details", e.body_text())
                })?;
                title = Some(text.trim().to_string()).filter(|t| !t.is_empty());
            }
            _ => {}
        }
    }

    match (title, file) {
        (Some(title), Some((filename, bytes))) => Ok(UploadForm {
            title,
            filename,
            bytes,
        }),
        _ => Err(ApiError::bad_request("Missing file or title")),
    }
}

/// POST /api/v1/articles/upload - Store the PDF and queue metadata analysis
pub async fn upload_article(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.user_id()?;
    let form = read_upload_form(multipart).await?;

    let extracted = pdf_text::extract_text_blocking(form.bytes.clone()).await;
    tracing::info!(
        user_id = %user_id.to_hex(),
        filename = %form.filename,
        bytes = form.bytes.len(),
        pages = extracted.pages,
        "PDF received"
    );

    let article = ArticleService::new(state.mongo.clone())
        .create_from_upload(
            user_id,
            &form.title,
            &form.filename,
            form.bytes,
            extracted,
            state.storage.as_ref(),
        )
        .await
        .map_err(|e| ApiError::from_anyhow(e, "Upload failed"))?;

    if let Some(article_id) = article.id {
        let analysis = AnalysisService::new(
            state.mongo.clone(),
            state.llm.clone(),
            state.config.gemini.model.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = analysis.analyze(&article_id).await {
                tracing::error!(article_id = %article_id.to_hex(), "Background analysis failed: {:#}", e);
            }
        });
    }

    Ok(Json(json!({
        "success": true,
        "article": ArticleResponse::summary(article),
        "message": "Article uploaded successfully. Analysis in progress...",
    })))
}

/// POST /api/v1/articles/analyze
pub async fn analyze_article(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<AnalyzeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let raw_id = req
        .article_id
        .as_deref()
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("Article ID required"))?;
    let article_id = parse_object_id(raw_id, "Article")?;

    let data = AnalysisService::new(
        state.mongo.clone(),
        state.llm.clone(),
        state.config.gemini.model.clone(),
    )
    .analyze(&article_id)
    .await
    .map_err(|e| ApiError::from_anyhow(e, "Analysis failed"))?;

    Ok(Json(json!({
        "success": true,
        "message": "Analysis completed",
        "data": data,
    })))
}

/// GET /api/v1/articles - Library page, newest upload first
pub async fn list_articles(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListArticlesQuery>,
) -> impl IntoResponse {
    let articles = match ArticleService::new(state.mongo.clone())
        .list(query.limit, query.offset)
        .await
    {
        Ok(articles) => articles.into_iter().map(ArticleResponse::summary).collect(),
        Err(e) => {
            tracing::error!("Failed to list articles: {:#}", e);
            Vec::new()
        }
    };
    Json(articles)
}

/// GET /api/v1/articles/count
pub async fn count_articles(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let count = ArticleService::new(state.mongo.clone())
        .count()
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to count articles: {:#}", e);
            0
        });
    Json(json!({ "count": count }))
}

/// GET /api/v1/articles/mine
pub async fn my_articles(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let user_id = claims.user_id()?;
    let articles = match ArticleService::new(state.mongo.clone())
        .list_for_user(&user_id)
        .await
    {
        Ok(articles) => articles.into_iter().map(ArticleResponse::summary).collect(),
        Err(e) => {
            tracing::error!(user_id = %user_id.to_hex(), "Failed to list user articles: {:#}", e);
            Vec::new()
        }
    };
    Ok(Json(articles))
}

/// GET /api/v1/articles/{id}
pub async fn get_article(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let article_id = parse_object_id(&id, "Article")?;
    let article = ArticleService::new(state.mongo.clone()).get(&article_id).await?;
    Ok(Json(ArticleResponse::from(article)))
}

/// DELETE /api/v1/articles/{id} - Owners only
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
            DeleteScope::OwnerOnly,
            state.storage.as_ref(),
        )
        .await?;

    Ok(Json(json!({ "success": true })))
}

/// GET /api/v1/articles/{id}/download - Short-lived link to the stored PDF
pub async fn download_article(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let article_id = parse_object_id(&id, "Article")?;
    let article = ArticleService::new(state.mongo.clone()).get(&article_id).await?;

    let (Some(storage), Some(key)) = (state.storage.as_ref(), article.storage_path.as_deref()) else {
        return Err(ApiError::not_found("File not available"));
    };
    let url = storage.generate_presigned_download_url(key, DOWNLOAD_URL_TTL)?;

    Ok(Json(json!({
        "url": url,
        "expiresIn": DOWNLOAD_URL_TTL.as_secs(),
    })))
}

/// GET /api/v1/articles/{id}/abstract.pdf
pub async fn abstract_pdf(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let article_id = parse_object_id(&id, "Article")?;
    let article = ArticleService::new(state.mongo.clone()).get(&article_id).await?;

    let bytes = export_service::abstract_pdf(&article)
        .map_err(|e| ApiError::from_anyhow(e, "Failed to render PDF"))?;
    Ok(attachment(
        bytes,
        PDF_CONTENT_TYPE,
        &format!("{}-abstract.pdf", file_stem(&article.title)),
    ))
}

/// GET /api/v1/articles/compare?first=&second=
pub async fn compare_articles_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CompareQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let service = ArticleService::new(state.mongo.clone());
    let first = service.get(&parse_object_id(&query.first, "Article")?).await?;
    let second = service.get(&parse_object_id(&query.second, "Article")?).await?;

    let comparison = compare_articles(&first, &second);
    Ok(Json(ComparisonResponse {
        first: ArticleResponse::summary(first),
        second: ArticleResponse::summary(second),
        comparison,
    }))
}

/// GET /api/v1/articles/compare/report.pdf?first=&second=
pub async fn comparison_report(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CompareQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let service = ArticleService::new(state.mongo.clone());
    let first = service.get(&parse_object_id(&query.first, "Article")?).await?;
    let second = service.get(&parse_object_id(&query.second, "Article")?).await?;

    let comparison = compare_articles(&first, &second);
    let bytes = export_service::comparison_pdf(&first, &second, &comparison)
        .map_err(|e| ApiError::from_anyhow(e, "Failed to render PDF"))?;
    Ok(attachment(bytes, PDF_CONTENT_TYPE, "article-comparison.pdf"))
}
