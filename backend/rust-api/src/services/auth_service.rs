use crate::middlewares::auth::{JwtClaims, JwtService};
use crate::models::refresh_token::RefreshToken;
use crate::models::user::{AuthResponse, LoginRequest, RegisterRequest, User, UserProfile, UserRole};
use crate::services::captcha_service::CaptchaService;
use crate::services::collections::{REFRESH_TOKENS, USERS};
use crate::services::errors::ServiceError;
use crate::utils::time::now_bson;
use anyhow::{anyhow, Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::Database;
use redis::aio::ConnectionManager;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const MAX_FAILED_LOGINS: u32 = 5;
const FAILED_LOGIN_WINDOW_SECS: u64 = 900;
const SHORT_REFRESH_TTL_SECS: i64 = 86_400;

pub struct AuthService {
    mongo: Database,
    redis: ConnectionManager,
    jwt_service: JwtService,
    refresh_token_ttl_seconds: i64,
}

impl AuthService {
    pub fn new(mongo: Database, redis: ConnectionManager, jwt_service: JwtService) -> Self {
        let refresh_token_ttl_seconds = std::env::var("JWT_REFRESH_TOKEN_TTL_SECONDS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(30 * 86_400);

        Self {
            mongo,
            redis,
            jwt_service,
            refresh_token_ttl_seconds,
        }
    }

    pub fn hash_password(&self, password: &str) -> Result<String> {
        hash(password, DEFAULT_COST).context("Failed to hash password")
    }

    pub fn verify_password(&self, password: &str, hash: &str) -> Result<bool> {
        verify(password, hash).context("Failed to verify password")
    }

    /// Registers a student account after the captcha checks out
    pub async fn register(&self, req: RegisterRequest, captcha: &CaptchaService) -> Result<AuthResponse> {
        if !captcha.verify(&req.captcha_token, &req.captcha_answer) {
            return Err(ServiceError::BadRequest("Captcha verification failed".to_string()).into());
        }

        let users = self.mongo.collection::<User>(USERS);
        let email = req.email.trim().to_lowercase();

        let existing = users
            .find_one(doc! { "email": &email })
            .await
            .context("Failed to check existing user")?;
        if existing.is_some() {
            return Err(ServiceError::Conflict("User with this email already exists".to_string()).into());
        }

        let now = Utc::now();
        let mut user = User {
            id: None,
            email,
            password_hash: self.hash_password(&req.password)?,
            full_name: req.full_name.trim().to_string(),
            role: UserRole::Student,
            created_at: now,
            updated_at: now,
            last_login_at: None,
        };

        let insert_result = users
            .insert_one(&user)
            .await
            .context("Failed to insert user")?;
        let user_id = insert_result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| anyhow!("Failed to get inserted user ID"))?;
        user.id = Some(user_id);

        tracing::info!(user_id = %user_id.to_hex(), "Student registered");

        let access_token = self.generate_access_token(&user_id, user.role)?;
        let refresh_token = self.create_refresh_token(&user_id, true, None, None).await?;

        Ok(AuthResponse {
            access_token,
            refresh_token,
            user: UserProfile::from(user),
        })
    }

    /// Email/password sign-in with a Redis-backed lockout after repeated failures
    pub async fn login(
        &self,
        req: LoginRequest,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<AuthResponse> {
        let email = req.email.trim().to_lowercase();

        if self.check_failed_attempts(&email).await? {
            tracing::warn!(email = %email, ip = ?ip, "Login blocked: too many failed attempts");
            return Err(ServiceError::TooManyRequests {
                message: "Too many failed login attempts. Try again in 15 minutes.".to_string(),
                retry_after_secs: FAILED_LOGIN_WINDOW_SECS,
            }
            .into());
        }

        let users = self.mongo.collection::<User>(USERS);
        let user = users
            .find_one(doc! { "email": &email })
            .await
            .context("Failed to query user")?;

        let user = match user {
            Some(user) if self.verify_password(&req.password, &user.password_hash)? => user,
            _ => {
                let attempts = self.increment_failed_attempts(&email).await?;
                tracing::warn!(email = %email, ip = ?ip, attempts, "Failed login attempt");
                return Err(ServiceError::Unauthorized("Invalid email or password".to_string()).into());
            }
        };

        self.clear_failed_attempts(&email).await?;

        let user_id = user.id.ok_or_else(|| anyhow!("User ID not found"))?;
        users
            .update_one(
                doc! { "_id": user_id },
                doc! { "$set": { "lastLoginAt": now_bson() } },
            )
            .await
            .context("Failed to update last login timestamp")?;

        let access_token = self.generate_access_token(&user_id, user.role)?;
        let refresh_token = self
            .create_refresh_token(&user_id, req.remember_me, ip.clone(), user_agent)
            .await?;

        tracing::info!(
            user_id = %user_id.to_hex(),
            role = user.role.as_str(),
            ip = ?ip,
            "Successful login"
        );

        Ok(AuthResponse {
            access_token,
            refresh_token,
            user: UserProfile::from(user),
        })
    }

    fn generate_access_token(&self, user_id: &ObjectId, role: UserRole) -> Result<String> {
        self.jwt_service
            .generate_token(&JwtClaims::new(user_id, role))
            .map_err(|e| anyhow!("Failed to generate token: {}", e))
    }

    async fn create_refresh_token(
        &self,
        user_id: &ObjectId,
        remember_me: bool,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<String> {
        let token = Uuid::new_v4().to_string();
        let now = Utc::now();
        let ttl = if remember_me {
            self.refresh_token_ttl_seconds
        } else {
            SHORT_REFRESH_TTL_SECS
        };

        let refresh_token = RefreshToken {
            id: None,
            user_id: *user_id,
            token_hash: hash_token(&token),
            created_at: now,
            expires_at: now + Duration::seconds(ttl),
            last_used_at: now,
            user_agent,
            ip,
            revoked: false,
        };

        self.mongo
            .collection::<RefreshToken>(REFRESH_TOKENS)
            .insert_one(&refresh_token)
            .await
            .context("Failed to insert refresh token")?;

        Ok(token)
    }

    /// Exchanges a live refresh token for a new access token
    pub async fn refresh_token(&self, refresh_token: &str) -> Result<String> {
        let token_hash = hash_token(refresh_token);
        let collection = self.mongo.collection::<RefreshToken>(REFRESH_TOKENS);

        let token_doc = collection
            .find_one(doc! { "token_hash": &token_hash, "revoked": false })
            .await
            .context("Failed to query refresh token")?
            .ok_or_else(|| ServiceError::Unauthorized("Invalid or expired refresh token".to_string()))?;

        if token_doc.expires_at < Utc::now() {
            return Err(ServiceError::Unauthorized("Refresh token has expired".to_string()).into());
        }

        collection
            .update_one(
                doc! { "token_hash": &token_hash },
                doc! { "$set": { "lastUsedAt": now_bson() } },
            )
            .await
            .context("Failed to update refresh token")?;

        let user = self
            .mongo
            .collection::<User>(USERS)
            .find_one(doc! { "_id": token_doc.user_id })
            .await
            .context("Failed to query user")?
            .ok_or_else(|| ServiceError::Unauthorized("User not found".to_string()))?;

        let user_id = user.id.ok_or_else(|| anyhow!("User ID not found"))?;
        self.generate_access_token(&user_id, user.role)
    }

    /// Revokes the refresh token; returns the owning user id
    pub async fn logout(&self, refresh_token: &str) -> Result<String> {
        let token_hash = hash_token(refresh_token);
        let collection = self.mongo.collection::<RefreshToken>(REFRESH_TOKENS);

        let token_doc = collection
            .find_one_and_update(
                doc! { "token_hash": &token_hash, "revoked": false },
                doc! { "$set": { "revoked": true } },
            )
            .await
            .context("Failed to revoke refresh token")?
            .ok_or_else(|| ServiceError::Unauthorized("Invalid or already revoked refresh token".to_string()))?;

        Ok(token_doc.user_id.to_hex())
    }

    pub async fn get_user_by_id(&self, user_id: &ObjectId) -> Result<User> {
        self.mongo
            .collection::<User>(USERS)
            .find_one(doc! { "_id": user_id })
            .await
            .context("Failed to query user")?
            .ok_or_else(|| ServiceError::NotFound("User not found".to_string()).into())
    }

    pub async fn change_password(
        &self,
        user_id: &ObjectId,
        current_password: &str,
        new_password: &str,
    ) -> Result<()> {
        let user = self.get_user_by_id(user_id).await?;
        if !self.verify_password(current_password, &user.password_hash)? {
            return Err(ServiceError::BadRequest("Current password is incorrect".to_string()).into());
        }

        let password_hash = self.hash_password(new_password)?;
        self.mongo
            .collection::<User>(USERS)
            .update_one(
                doc! { "_id": user_id },
                doc! { "$set": { "password_hash": password_hash, "updatedAt": now_bson() } },
            )
            .await
            .context("Failed to update password")?;

        tracing::info!(user_id = %user_id.to_hex(), "Password changed");
        Ok(())
    }

    /// True once `MAX_FAILED_LOGINS` failures accumulated inside the window
    pub async fn check_failed_attempts(&self, email: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let count: Option<u32> = redis::cmd("GET")
            .arg(failed_login_key(email))
            .query_async(&mut conn)
            .await
            .context("Failed to query failed login attempts")?;

        Ok(count.unwrap_or(0) >= MAX_FAILED_LOGINS)
    }

    pub async fn increment_failed_attempts(&self, email: &str) -> Result<u32> {
        let key = failed_login_key(email);
        let mut conn = self.redis.clone();

        let count: u32 = redis::cmd("INCR")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .context("Failed to increment failed login attempts")?;

        if count == 1 {
            redis::cmd("EXPIRE")
                .arg(&key)
                .arg(FAILED_LOGIN_WINDOW_SECS)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to set TTL for failed login attempts")?;
        }

        Ok(count)
    }

    pub async fn clear_failed_attempts(&self, email: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        redis::cmd("DEL")
            .arg(failed_login_key(email))
            .query_async::<()>(&mut conn)
            .await
            .context("Failed to clear failed login attempts")?;
        Ok(())
    }
}

fn failed_login_key(email: &str) -> String {
    format!("failed_login:{}", email)
}

/// SHA-256 hex of an opaque token
pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_hash_is_stable_hex() {
        let hashed = hash_token("abc");
        assert_eq!(hashed.len(), 64);
        assert_eq!(
            hashed,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_ne!(hash_token("abd"), hashed);
    }

    #[test]
    fn failed_login_keys_are_per_email() {
        assert_eq!(failed_login_key("a@b.c"), "failed_login:a@b.c");
    }
}
