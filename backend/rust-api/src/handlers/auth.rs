use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::{
    extractors::AppJson,
    handlers::error::{success, ApiError},
    middlewares::{
        auth::{JwtClaims, JwtService},
        csrf::{csrf_cookie, generate_csrf_token},
        rate_limit::extract_client_ip,
    },
    models::{
        refresh_token::RefreshTokenResponse,
        user::{
            AuthResponse, AuthResponseCookie, ChangePasswordRequest, LoginRequest,
            PasswordStrengthRequest, RegisterRequest, UserProfile,
        },
    },
    services::{
        auth_service::AuthService, captcha_service::CaptchaService, errors::ServiceError, AppState,
    },
    utils::password::calculate_password_strength,
};

pub const REFRESH_COOKIE_NAME: &str = "refresh_token";
const REFRESH_COOKIE_PATH: &str = "/api/v1/auth";
const LOGIN_BODY_LIMIT: usize = 64 * 1024;

fn auth_service(state: &AppState) -> AuthService {
    AuthService::new(
        state.mongo.clone(),
        state.redis.clone(),
        JwtService::new(&state.config.jwt_secret),
    )
}

fn refresh_cookie(state: &AppState, value: String, max_age: time::Duration) -> Cookie<'static> {
    Cookie::build((REFRESH_COOKIE_NAME, value))
        .path(REFRESH_COOKIE_PATH)
        .http_only(true)
        .secure(state.config.cookie.secure)
        .same_site(state.config.cookie.parse_same_site())
        .max_age(max_age)
        .build()
}

/// Expired refresh cookie, used on logout and account deletion
pub fn cleared_refresh_cookie(state: &AppState) -> Cookie<'static> {
    refresh_cookie(state, String::new(), time::Duration::ZERO)
}

/// Moves the refresh token into an HTTP-only cookie and adds the redirect target.
fn with_session_cookie(
    state: &AppState,
    jar: CookieJar,
    response: AuthResponse,
) -> (CookieJar, Json<AuthResponseCookie>) {
    let jar = jar.add(refresh_cookie(
        state,
        response.refresh_token,
        time::Duration::days(30),
    ));
    let body = AuthResponseCookie {
        access_token: response.access_token,
        redirect_to: response.user.role.dashboard_path(),
        user: response.user,
    };
    (jar, Json(body))
}

fn refresh_token_from(jar: &CookieJar) -> Result<String, ApiError> {
    jar.get(REFRESH_COOKIE_NAME)
        .map(|cookie| cookie.value().to_string())
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ServiceError::Unauthorized("Missing refresh token cookie".to_string()).into())
}

/// GET /api/v1/auth/captcha
pub async fn captcha(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    let challenge = CaptchaService::new(state.config.captcha_secret.clone()).generate()?;
    Ok(Json(challenge))
}

/// POST /api/v1/auth/register - Create a student account
pub async fn register(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    AppJson(req): AppJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    tracing::info!("Registering new user: {}", req.email);

    let captcha = CaptchaService::new(state.config.captcha_secret.clone());
    let response = auth_service(&state).register(req, &captcha).await?;

    let (jar, body) = with_session_cookie(&state, jar, response);
    Ok((StatusCode::CREATED, jar, body))
}

/// POST /api/v1/auth/login - Login with email and password
pub async fn login(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
    request: Request,
) -> Result<impl IntoResponse, ApiError> {
    let ip = Some(extract_client_ip(request.headers(), request.extensions()));
    let user_agent = request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let body_bytes = axum::body::to_bytes(request.into_body(), LOGIN_BODY_LIMIT)
        .await
        .map_err(|e| ApiError::bad_request("Failed to read body").with_field("details", e.to_string()))?;
    let req: LoginRequest = serde_json::from_slice(&body_bytes)
        .map_err(|e| ApiError::bad_request("Invalid JSON body").with_field("details", e.to_string()))?;
    req.validate()?;

    tracing::info!("Login attempt for user: {}", req.email);

    let response = auth_service(&state).login(req, ip, user_agent).await?;
    let (jar, body) = with_session_cookie(&state, jar, response);
    Ok((StatusCode::OK, jar, body))
}

/// POST /api/v1/auth/refresh - Exchange the refresh cookie for an access token
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let refresh_token = refresh_token_from(&jar)?;
    let access_token = auth_service(&state).refresh_token(&refresh_token).await?;

    tracing::debug!("Access token refreshed");
    Ok(Json(RefreshTokenResponse { access_token }))
}

/// POST /api/v1/auth/logout - Revoke the refresh token and clear its cookie
pub async fn logout(
    State(state): State<Arc<AppState>>,
    jar: CookieJar,
) -> Result<impl IntoResponse, ApiError> {
    let refresh_token = refresh_token_from(&jar)?;
    let user_id = auth_service(&state).logout(&refresh_token).await?;

    tracing::info!(user_id = %user_id, "User logged out");
    Ok((StatusCode::NO_CONTENT, jar.add(cleared_refresh_cookie(&state))))
}

/// GET /api/v1/auth/me
pub async fn get_current_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let user = auth_service(&state).get_user_by_id(&claims.user_id()?).await?;
    Ok(Json(UserProfile::from(user)))
}

/// GET /api/v1/auth/csrf-token - Token in the JSON body and in the cookie
pub async fn get_csrf_token(State(state): State<Arc<AppState>>, jar: CookieJar) -> impl IntoResponse {
    let token = generate_csrf_token();
    let jar = jar.add(csrf_cookie(token.clone(), &state.config.cookie));
    (jar, Json(json!({ "csrf_token": token })))
}

/// POST /api/v1/auth/password-strength
pub async fn password_strength(AppJson(req): AppJson<PasswordStrengthRequest>) -> impl IntoResponse {
    Json(calculate_password_strength(&req.password))
}

/// POST /api/v1/auth/change-password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    auth_service(&state)
        .change_password(&claims.user_id()?, &req.current_password, &req.new_password)
        .await?;

    Ok(success("Password changed successfully"))
}
