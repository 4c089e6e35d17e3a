use std::sync::Arc;

use crate::config::Config;
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;

use self::llm::LlmClient;
use self::object_storage::ObjectStorageClient;

pub mod analysis_service;
pub mod article_service;
pub mod auth_service;
pub mod captcha_service;
pub mod chat_service;
pub mod comparison;
pub mod errors;
pub mod export_service;
pub mod gemini_client;
pub mod instructor_service;
pub mod llm;
pub mod object_storage;
pub mod pdf_text;
pub mod profile_service;
pub mod progress_service;
pub mod socratic_service;

/// MongoDB collection names
pub mod collections {
    pub const USERS: &str = "users";
    pub const REFRESH_TOKENS: &str = "refresh_tokens";
    pub const ARTICLES: &str = "articles";
    pub const MESSAGES: &str = "messages";
    pub const SOCRATIC_SESSIONS: &str = "socratic_sessions";
    pub const STUDENT_PROGRESS: &str = "student_progress";
}

pub struct AppState {
    pub config: Config,
    pub mongo: Database,
    pub redis: ConnectionManager,
    pub llm: Arc<dyn LlmClient>,
    pub storage: Option<ObjectStorageClient>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
        llm: Arc<dyn LlmClient>,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        let storage = match config.object_storage.clone() {
            Some(settings) => Some(ObjectStorageClient::new(settings)?),
            None => {
                tracing::warn!("Object storage is not configured, PDF blobs will not be stored");
                None
            }
        };

        Ok(Self {
            config,
            mongo,
            redis,
            llm,
            storage,
        })
    }
}
