use axum::{
    extract::Request,
    http::{Method, StatusCode},
    middleware::Next,
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use base64::{engine::general_purpose, Engine as _};
use rand::Rng;

use crate::config::CookieSettings;

pub const CSRF_COOKIE_NAME: &str = "csrf_token";
pub const CSRF_HEADER_NAME: &str = "x-csrf-token";

/// Double-submit check for state-changing requests.
///
/// The `csrf_token` cookie issued by `GET /api/v1/auth/csrf-token` must be
/// echoed back in the `X-CSRF-Token` header. Safe methods pass through.
pub async fn csrf_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    if matches!(*request.method(), Method::GET | Method::HEAD | Method::OPTIONS) {
        return Ok(next.run(request).await);
    }

    let jar = CookieJar::from_headers(request.headers());
    let cookie_token = jar.get(CSRF_COOKIE_NAME).map(|c| c.value().to_string());
    let header_token = request
        .headers()
        .get(CSRF_HEADER_NAME)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    match (cookie_token, header_token) {
        (Some(cookie), Some(header)) if tokens_match(&cookie, &header) => {
            tracing::debug!("CSRF validation passed");
            Ok(next.run(request).await)
        }
        (None, _) => {
            tracing::warn!(path = %request.uri().path(), "CSRF validation failed: missing cookie token");
            Err(StatusCode::FORBIDDEN)
        }
        (_, None) => {
            tracing::warn!(path = %request.uri().path(), "CSRF validation failed: missing header token");
            Err(StatusCode::FORBIDDEN)
        }
        _ => {
            tracing::warn!(path = %request.uri().path(), "CSRF validation failed: token mismatch");
            Err(StatusCode::FORBIDDEN)
        }
    }
}

fn tokens_match(a: &str, b: &str) -> bool {
    a.len() == b.len()
        && a.bytes()
            .zip(b.bytes())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
}

pub fn generate_csrf_token() -> String {
    let random_bytes: [u8; 32] = rand::rng().random();
    general_purpose::URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Site-wide cookie carrying the token; the SPA reads it from the JSON body.
pub fn csrf_cookie(token: String, settings: &CookieSettings) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE_NAME, token))
        .path("/")
        .http_only(true)
        .secure(settings.secure)
        .same_site(settings.parse_same_site())
        .build()
}
