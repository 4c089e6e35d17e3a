use axum::{extract::Request, middleware::Next, response::Response};
use std::time::Instant;

use crate::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS};

/// Records request count and latency per normalized route
pub async fn metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let response = next.run(req).await;

    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &path, &status])
        .inc();

    HTTP_REQUEST_DURATION_SECONDS
        .with_label_values(&[&method, &path])
        .observe(duration);

    response
}

/// Replaces ids in the path with `{id}` to keep label cardinality bounded
pub(crate) fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if is_object_id(segment) || is_uuid_like(segment) || is_numeric_id(segment) {
                "{id}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// MongoDB ObjectId: 24 hex characters
fn is_object_id(s: &str) -> bool {
    s.len() == 24 && s.chars().all(|c| c.is_ascii_hexdigit())
}

fn is_uuid_like(s: &str) -> bool {
    s.len() == 36 && s.chars().all(|c| c.is_ascii_hexdigit() || c == '-')
}

fn is_numeric_id(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path() {
        assert_eq!(
            normalize_path("/api/v1/articles/65f1c2a9e4b0a1b2c3d4e5f6/download"),
            "/api/v1/articles/{id}/download"
        );
        assert_eq!(
            normalize_path("/api/v1/chat/65f1c2a9e4b0a1b2c3d4e5f6/history"),
            "/api/v1/chat/{id}/history"
        );
        assert_eq!(
            normalize_path("/api/v1/instructor/students/550e8400-e29b-41d4-a716-446655440000/progress"),
            "/api/v1/instructor/students/{id}/progress"
        );
        assert_eq!(normalize_path("/api/v1/articles/count"), "/api/v1/articles/count");
        assert_eq!(normalize_path("/health"), "/health");
    }

    #[test]
    fn test_is_object_id() {
        assert!(is_object_id("65f1c2a9e4b0a1b2c3d4e5f6"));
        assert!(!is_object_id("65f1c2a9e4b0a1b2c3d4e5fz"));
        assert!(!is_object_id("abc"));
    }
}
