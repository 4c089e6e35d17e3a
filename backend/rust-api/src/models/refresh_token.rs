use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};

use super::user::bson_datetime_as_chrono;

/// Refresh token stored in MongoDB "refresh_tokens" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshToken {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    #[serde(rename = "userId")]
    pub user_id: ObjectId,

    /// SHA-256 hash of the opaque token handed to the client
    pub token_hash: String,

    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,

    #[serde(rename = "expiresAt", with = "bson_datetime_as_chrono")]
    pub expires_at: DateTime<Utc>,

    #[serde(rename = "lastUsedAt", with = "bson_datetime_as_chrono")]
    pub last_used_at: DateTime<Utc>,

    pub user_agent: Option<String>,

    pub ip: Option<String>,

    #[serde(default)]
    pub revoked: bool,
}

#[derive(Debug, Serialize)]
pub struct RefreshTokenResponse {
    pub access_token: String,
}
