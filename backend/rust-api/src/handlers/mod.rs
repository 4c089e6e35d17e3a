use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose, Engine as _};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics;
use crate::services::AppState;

pub mod articles;
pub mod auth;
pub mod chat;
pub mod error;
pub mod instructor;
pub mod profile;
pub mod socratic;

pub const PDF_CONTENT_TYPE: &str = "application/pdf";
pub const XLSX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

#[derive(Debug, Serialize)]
struct DependencyHealth {
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl DependencyHealth {
    fn from_probe<E: std::fmt::Display>(
        name: &str,
        limit: Duration,
        outcome: Result<Result<(), E>, tokio::time::error::Elapsed>,
    ) -> Self {
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{} error: {}", name, e)),
            Err(_) => Some(format!("{} timeout after {}ms", name, limit.as_millis())),
        };
        Self {
            status: if error.is_none() { "healthy" } else { "unhealthy" },
            error,
        }
    }

    fn healthy(&self) -> bool {
        self.error.is_none()
    }
}

/// GET /health - MongoDB and Redis reachability
pub async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mongo_limit = Duration::from_secs(1);
    let mongodb = DependencyHealth::from_probe(
        "MongoDB",
        mongo_limit,
        tokio::time::timeout(mongo_limit, async {
            state
                .mongo
                .run_command(mongodb::bson::doc! { "ping": 1 })
                .await
                .map(|_| ())
        })
        .await,
    );

    let redis_limit = Duration::from_millis(500);
    let mut conn = state.redis.clone();
    let redis = DependencyHealth::from_probe(
        "Redis",
        redis_limit,
        tokio::time::timeout(
            redis_limit,
            async { redis::cmd("PING").query_async::<String>(&mut conn).await.map(|_| ()) },
        )
        .await,
    );

    let all_healthy = mongodb.healthy() && redis.healthy();
    let status_code = if all_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": if all_healthy { "healthy" } else { "degraded" },
            "service": "deepreview-api",
            "version": env!("CARGO_PKG_VERSION"),
            "dependencies": { "mongodb": mongodb, "redis": redis },
        })),
    )
}

pub async fn metrics_handler() -> impl IntoResponse {
    match metrics::render_metrics() {
        Ok(metrics_text) => (StatusCode::OK, metrics_text),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Failed to render metrics: {}", e),
        ),
    }
}

fn basic_credentials(headers: &HeaderMap) -> Option<String> {
    let encoded = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())?
        .strip_prefix("Basic ")?;
    let decoded = general_purpose::STANDARD.decode(encoded.trim()).ok()?;
    String::from_utf8(decoded).ok()
}

/// Guards /metrics with HTTP Basic credentials from `METRICS_AUTH` (`user:password`).
pub async fn metrics_auth_middleware(
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let Ok(expected) = std::env::var("METRICS_AUTH") else {
        tracing::warn!("METRICS_AUTH is not set; refusing /metrics");
        return Err(StatusCode::UNAUTHORIZED);
    };

    match basic_credentials(&headers) {
        Some(credentials) if credentials == expected => Ok(next.run(request).await),
        _ => Err(StatusCode::UNAUTHORIZED),
    }
}

/// ASCII-only stem for Content-Disposition filenames.
pub(crate) fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect::<String>()
        .split('-')
        .filter(|part| !part.is_empty())
        .take(8)
        .collect::<Vec<_>>()
        .join("-");

    if stem.is_empty() {
        "document".to_string()
    } else {
        stem
    }
}

/// Binary download response
pub(crate) fn attachment(bytes: Vec<u8>, content_type: &str, filename: &str) -> Response {
    (
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response()
}
