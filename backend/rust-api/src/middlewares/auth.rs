use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::models::user::UserRole;
use crate::services::errors::ServiceError;
use crate::services::AppState;

/// Access token lifetime
pub const ACCESS_TOKEN_TTL_MINUTES: i64 = 60;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub sub: String, // user_id
    pub role: UserRole,
    pub exp: usize,
    pub iat: usize,
}

impl JwtClaims {
    pub fn new(user_id: &ObjectId, role: UserRole) -> Self {
        let now = Utc::now();
        Self {
            sub: user_id.to_hex(),
            role,
            exp: (now + Duration::minutes(ACCESS_TOKEN_TTL_MINUTES)).timestamp() as usize,
            iat: now.timestamp() as usize,
        }
    }

    pub fn user_id(&self) -> Result<ObjectId, ServiceError> {
        ObjectId::parse_str(&self.sub)
            .map_err(|_| ServiceError::Unauthorized("Invalid user id in token".to_string()))
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,
    #[error("Token expired")]
    ExpiredToken,
    #[error("Invalid token signature")]
    InvalidSignature,
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn generate_token(&self, claims: &JwtClaims) -> Result<String, AuthError> {
        encode(&Header::default(), claims, &self.encoding_key).map_err(|_| AuthError::InvalidToken)
    }

    pub fn validate_token(&self, token: &str) -> Result<JwtClaims, AuthError> {
        decode::<JwtClaims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                _ => AuthError::InvalidToken,
            })
    }
}

/// Validates the bearer token and stores the claims in request extensions
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(StatusCode::UNAUTHORIZED)?;

    let jwt_service = JwtService::new(&state.config.jwt_secret);
    let claims = jwt_service.validate_token(token).map_err(|e| {
        tracing::warn!("JWT validation failed: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    tracing::debug!(user_id = %claims.sub, role = claims.role.as_str(), "Authenticated request");

    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

pub async fn instructor_guard_middleware(
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    match request.extensions().get::<JwtClaims>() {
        Some(claims) if claims.role == UserRole::Instructor => Ok(next.run(request).await),
        Some(claims) => {
            tracing::warn!(user_id = %claims.sub, "Access denied: instructor role required");
            Err(StatusCode::FORBIDDEN)
        }
        None => Err(StatusCode::UNAUTHORIZED),
    }
}
