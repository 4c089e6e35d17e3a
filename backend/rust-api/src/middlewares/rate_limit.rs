use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Extensions, HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use redis::aio::ConnectionManager;
use std::net::SocketAddr;
use std::sync::Arc;

use super::auth::JwtClaims;
use crate::services::AppState;

/// Fixed-window counter; a limit can be overridden through `env_override`.
#[derive(Debug, Clone, Copy)]
struct RateLimitRule {
    scope: &'static str,
    limit: u32,
    window_seconds: u64,
    env_override: &'static str,
}

impl RateLimitRule {
    fn effective_limit(&self) -> u32 {
        std::env::var(self.env_override)
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(self.limit)
    }

    fn key(&self, subject: &str) -> String {
        format!("ratelimit:{}:{}", self.scope, subject)
    }
}

const PER_USER: RateLimitRule = RateLimitRule {
    scope: "user",
    limit: 100,
    window_seconds: 60,
    env_override: "RATE_LIMIT_PER_USER",
};

const PER_IP: RateLimitRule = RateLimitRule {
    scope: "ip",
    limit: 200,
    window_seconds: 60,
    env_override: "RATE_LIMIT_PER_IP",
};

const LOGIN: RateLimitRule = RateLimitRule {
    scope: "login",
    limit: 10,
    window_seconds: 300,
    env_override: "RATE_LIMIT_LOGIN_ATTEMPTS",
};

const REGISTER: RateLimitRule = RateLimitRule {
    scope: "register",
    limit: 5,
    window_seconds: 3600,
    env_override: "RATE_LIMIT_REGISTER_ATTEMPTS",
};

// Chat, analysis and Socratic calls all spend provider quota
const LLM: RateLimitRule = RateLimitRule {
    scope: "llm",
    limit: 20,
    window_seconds: 60,
    env_override: "RATE_LIMIT_LLM_PER_USER",
};

const CHECK_AND_INCREMENT: &str = r#"
    local key = KEYS[1]
    local limit = tonumber(ARGV[1])
    local window = tonumber(ARGV[2])

    local current = redis.call('GET', key)

    if current == false then
        redis.call('SET', key, 1, 'EX', window)
        return 1
    end

    current = tonumber(current)

    if current >= limit then
        return 0
    end

    redis.call('INCR', key)
    return 1
"#;

fn rate_limit_disabled() -> bool {
    std::env::var("RATE_LIMIT_DISABLED").unwrap_or_default() == "1"
}

/// Client address: X-Forwarded-For, Forwarded, X-Real-IP, then the socket peer.
pub fn extract_client_ip(headers: &HeaderMap, extensions: &Extensions) -> String {
    if let Some(s) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        return s.split(',').next().unwrap_or(s).trim().to_string();
    }

    if let Some(s) = headers.get("forwarded").and_then(|v| v.to_str().ok()) {
        if let Some(value) = s
            .split(';')
            .map(str::trim)
            .find_map(|part| part.strip_prefix("for="))
        {
            return value.trim().trim_matches('"').to_string();
        }
    }

    if let Some(s) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return s.trim().to_string();
    }

    extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

async fn check_rate_limit(redis: &ConnectionManager, rule: RateLimitRule, subject: &str) -> anyhow::Result<bool> {
    let mut conn = redis.clone();
    let allowed: u32 = redis::Script::new(CHECK_AND_INCREMENT)
        .key(rule.key(subject))
        .arg(rule.effective_limit())
        .arg(rule.window_seconds)
        .invoke_async(&mut conn)
        .await?;

    Ok(allowed == 1)
}

async fn enforce(state: &AppState, rule: RateLimitRule, subject: &str) -> Result<(), StatusCode> {
    let allowed = check_rate_limit(&state.redis, rule, subject).await.map_err(|e| {
        tracing::error!(scope = rule.scope, "Rate limit check failed: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })?;

    if allowed {
        Ok(())
    } else {
        tracing::warn!(scope = rule.scope, subject, "Rate limit exceeded");
        Err(StatusCode::TOO_MANY_REQUESTS)
    }
}

/// General limits: per authenticated user, then per client IP
pub async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if rate_limit_disabled() {
        tracing::debug!("Rate limiting disabled via RATE_LIMIT_DISABLED=1");
        return Ok(next.run(request).await);
    }

    let user_id = request
        .extensions()
        .get::<JwtClaims>()
        .map(|claims| claims.sub.clone());
    let client_ip = extract_client_ip(request.headers(), request.extensions());

    if let Some(uid) = &user_id {
        enforce(&state, PER_USER, uid).await?;
    }
    enforce(&state, PER_IP, &client_ip).await?;

    Ok(next.run(request).await)
}

pub async fn login_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !rate_limit_disabled() {
        let client_ip = extract_client_ip(request.headers(), request.extensions());
        enforce(&state, LOGIN, &client_ip).await?;
    }
    Ok(next.run(request).await)
}

pub async fn register_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !rate_limit_disabled() {
        let client_ip = extract_client_ip(request.headers(), request.extensions());
        enforce(&state, REGISTER, &client_ip).await?;
    }
    Ok(next.run(request).await)
}

/// Per-user budget for LLM-backed endpoints; runs after `auth_middleware`.
pub async fn llm_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    if !rate_limit_disabled() {
        let subject = match request.extensions().get::<JwtClaims>() {
            Some(claims) => claims.sub.clone(),
            None => extract_client_ip(request.headers(), request.extensions()),
        };
        enforce(&state, LLM, &subject).await?;
    }
    Ok(next.run(request).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn prefers_forwarded_for_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "1.2.3.4, 10.0.0.1".parse().unwrap());
        headers.insert("x-real-ip", "9.9.9.9".parse().unwrap());
        assert_eq!(extract_client_ip(&headers, &Extensions::new()), "1.2.3.4");
    }

    #[test]
    fn parses_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("forwarded", "proto=http; for=\"5.6.7.8\"".parse().unwrap());
        assert_eq!(extract_client_ip(&headers, &Extensions::new()), "5.6.7.8");
    }

    #[test]
    fn falls_back_to_socket_peer() {
        let mut exts = Extensions::new();
        exts.insert(ConnectInfo::<SocketAddr>("7.7.7.7:1234".parse().unwrap()));
        assert_eq!(extract_client_ip(&HeaderMap::new(), &exts), "7.7.7.7");
        assert_eq!(extract_client_ip(&HeaderMap::new(), &Extensions::new()), "unknown");
    }

    #[test]
    fn keys_are_scoped() {
        assert_eq!(LOGIN.key("1.2.3.4"), "ratelimit:login:1.2.3.4");
        assert_eq!(LLM.key("abc"), "ratelimit:llm:abc");
    }

    #[test]
    #[serial]
    fn env_overrides_limit() {
        std::env::set_var("RATE_LIMIT_LLM_PER_USER", "3");
        assert_eq!(LLM.effective_limit(), 3);
        std::env::set_var("RATE_LIMIT_LLM_PER_USER", "nope");
        assert_eq!(LLM.effective_limit(), 20);
        std::env::remove_var("RATE_LIMIT_LLM_PER_USER");
    }
}
