use axum::{
    extract::Request,
    http::{header::HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;
use uuid::Uuid;

pub const TRACE_ID_HEADER: &str = "x-trace-id";

#[derive(Clone, Debug)]
pub struct RequestTraceContext {
    pub trace_id: String,
}

fn incoming_trace_id(request: &Request) -> Option<String> {
    request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty() && value.len() <= 128)
        .map(str::to_string)
}

/// Reuses or mints an `x-trace-id`, runs the request inside a span carrying it,
/// and echoes it on the response.
pub async fn trace_context_middleware(mut request: Request, next: Next) -> Response {
    let trace_id = incoming_trace_id(&request).unwrap_or_else(|| Uuid::new_v4().to_string());
    let header_value = HeaderValue::from_str(&trace_id).ok();

    request.extensions_mut().insert(RequestTraceContext {
        trace_id: trace_id.clone(),
    });
    if let Some(value) = &header_value {
        request
            .headers_mut()
            .insert(HeaderName::from_static(TRACE_ID_HEADER), value.clone());
    }

    let span = tracing::info_span!(
        "request",
        trace_id = %trace_id,
        method = %request.method(),
        path = %request.uri().path(),
    );
    let mut response = next.run(request).instrument(span).await;

    if let Some(value) = header_value {
        response
            .headers_mut()
            .entry(HeaderName::from_static(TRACE_ID_HEADER))
            .or_insert(value);
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware, routing::get, Extension, Router};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/",
                get(|Extension(ctx): Extension<RequestTraceContext>| async move { ctx.trace_id }),
            )
            .layer(middleware::from_fn(trace_context_middleware))
    }

    #[tokio::test]
    async fn propagates_incoming_trace_id() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(TRACE_ID_HEADER, "abc-123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.headers()[TRACE_ID_HEADER], "abc-123");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"abc-123");
    }

    #[tokio::test]
    async fn mints_a_uuid_when_absent() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let trace_id = response.headers()[TRACE_ID_HEADER].to_str().unwrap();
        assert!(Uuid::parse_str(trace_id).is_ok());
    }
}
