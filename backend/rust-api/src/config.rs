use axum_extra::extract::cookie::SameSite;
use serde::Deserialize;
use std::env;

const DEFAULT_UPLOAD_MAX_BYTES: usize = 20 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    pub bind_addr: String,
    pub cookie: CookieSettings,
    pub gemini: GeminiSettings,
    pub captcha_secret: String,
    pub object_storage: Option<ObjectStorageSettings>,
    pub upload_max_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CookieSettings {
    pub secure: bool,
    pub same_site: String,
}

impl CookieSettings {
    pub fn parse_same_site(&self) -> SameSite {
        match self.same_site.to_ascii_lowercase().as_str() {
            "strict" => SameSite::Strict,
            "none" => SameSite::None,
            _ => SameSite::Lax,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeminiSettings {
    pub api_key: String,
    pub base_url: String,
    /// Model used for analysis, grading and Socratic questions.
    pub model: String,
    pub chat_model: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStorageSettings {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub access_key: String,
    pub secret_key: String,
    pub prefix: String,
}

fn lookup(settings: &config::Config, key: &str, env_key: &str) -> Option<String> {
    settings
        .get_string(key)
        .ok()
        .or_else(|| env::var(env_key).ok())
        .filter(|value| !value.trim().is_empty())
}

fn required(settings: &config::Config, key: &str, env_key: &str) -> Result<String, config::ConfigError> {
    lookup(settings, key, env_key)
        .ok_or_else(|| config::ConfigError::NotFound(format!("{key} (or {env_key})")))
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first (two levels up), then the crate-local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/{env}.toml, overridden by APP__SECTION__KEY variables
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mongo_uri = match lookup(&settings, "database.mongo_uri", "MONGO_URI") {
            Some(uri) => uri,
            None => {
                let user = required(&settings, "database.mongo_user", "MONGO_USER")?;
                let password = required(&settings, "database.mongo_password", "MONGO_PASSWORD")?;
                let host = env::var("MONGO_HOST").unwrap_or_else(|_| "localhost:27017".to_string());
                eprintln!("WARNING: Building MongoDB URI from MONGO_USER/MONGO_PASSWORD env vars");
                format!("mongodb://{}:{}@{}/?authSource=admin", user, password, host)
            }
        };

        let redis_uri = match lookup(&settings, "redis.uri", "REDIS_URI") {
            Some(uri) => uri,
            None => {
                let host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
                let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
                match env::var("REDIS_PASSWORD") {
                    Ok(password) => format!("redis://:{}@{}:{}/0", password, host, port),
                    Err(_) => format!("redis://{}:{}/0", host, port),
                }
            }
        };

        let mongo_database = lookup(&settings, "database.mongo_database", "MONGO_DATABASE")
            .unwrap_or_else(|| "deepreview".to_string());

        let jwt_secret = match lookup(&settings, "auth.jwt_secret", "JWT_SECRET") {
            Some(secret) => secret,
            None if app_env == "prod" => {
                return Err(config::ConfigError::Message(
                    "JWT_SECRET must be set in production".to_string(),
                ))
            }
            None => {
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                "dev-secret-only-for-local-testing".to_string()
            }
        };

        let captcha_secret = match lookup(&settings, "captcha.secret", "CAPTCHA_SECRET_KEY") {
            Some(secret) => secret,
            None if app_env == "prod" => {
                return Err(config::ConfigError::Message(
                    "CAPTCHA_SECRET_KEY must be set in production".to_string(),
                ))
            }
            None => "change-me-in-env".to_string(),
        };

        let bind_addr = lookup(&settings, "server.bind_addr", "BIND_ADDR")
            .unwrap_or_else(|| "0.0.0.0:8081".to_string());

        let cookie = CookieSettings {
            secure: lookup(&settings, "auth.cookie_secure", "COOKIE_SECURE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(app_env == "prod"),
            same_site: lookup(&settings, "auth.cookie_same_site", "COOKIE_SAME_SITE")
                .unwrap_or_else(|| "lax".to_string()),
        };

        let gemini = GeminiSettings {
            api_key: lookup(&settings, "gemini.api_key", "GEMINI_API_KEY").unwrap_or_default(),
            base_url: lookup(&settings, "gemini.base_url", "GEMINI_BASE_URL")
                .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string()),
            model: lookup(&settings, "gemini.model", "GEMINI_MODEL")
                .unwrap_or_else(|| "gemini-2.5-flash".to_string()),
            chat_model: lookup(&settings, "gemini.chat_model", "GEMINI_CHAT_MODEL")
                .unwrap_or_else(|| "gemini-2.5-flash".to_string()),
            request_timeout_secs: lookup(&settings, "gemini.request_timeout_secs", "GEMINI_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(120),
        };
        if gemini.api_key.is_empty() {
            eprintln!("WARNING: GEMINI_API_KEY is not set, LLM calls will fail");
        }

        let object_storage = match lookup(&settings, "object_storage.bucket", "OBJECT_STORAGE_BUCKET") {
            Some(bucket) => Some(ObjectStorageSettings {
                bucket,
                region: lookup(&settings, "object_storage.region", "OBJECT_STORAGE_REGION")
                    .unwrap_or_else(|| "us-east-1".to_string()),
                endpoint: lookup(&settings, "object_storage.endpoint", "OBJECT_STORAGE_ENDPOINT"),
                access_key: required(&settings, "object_storage.access_key", "OBJECT_STORAGE_ACCESS_KEY")?,
                secret_key: required(&settings, "object_storage.secret_key", "OBJECT_STORAGE_SECRET_KEY")?,
                prefix: lookup(&settings, "object_storage.prefix", "OBJECT_STORAGE_PREFIX")
                    .unwrap_or_else(|| "articles".to_string()),
            }),
            None => None,
        };

        let upload_max_bytes = lookup(&settings, "upload.max_bytes", "UPLOAD_MAX_BYTES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_UPLOAD_MAX_BYTES);

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            jwt_secret,
            bind_addr,
            cookie,
            gemini,
            captcha_secret,
            object_storage,
            upload_max_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_site_parsing_defaults_to_lax() {
        let mut cookie = CookieSettings {
            secure: false,
            same_site: "Strict".into(),
        };
        assert_eq!(cookie.parse_same_site(), SameSite::Strict);
        cookie.same_site = "none".into();
        assert_eq!(cookie.parse_same_site(), SameSite::None);
        cookie.same_site = "whatever".into();
        assert_eq!(cookie.parse_same_site(), SameSite::Lax);
    }
}
