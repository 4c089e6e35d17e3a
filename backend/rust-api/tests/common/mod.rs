#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::Utc;
use http_body_util::BodyExt;
use deepreview_api::{
    config::Config,
    create_router,
    models::{
        article::Article,
        user::{User, UserRole},
    },
    services::{
        llm::{LlmClient, LlmError, LlmRequest, LlmResponse},
        AppState,
    },
};
use mongodb::{bson::oid::ObjectId, Database};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tower::ServiceExt;

pub const TEST_PASSWORD: &str = "Valid#Pass123";

/// Answers by prompt shape so concurrent tests do not depend on call order.
#[derive(Default)]
pub struct FakeGemini {
    pub requests: Mutex<Vec<LlmRequest>>,
    /// When set, every call fails with this rate limit
    pub rate_limit_secs: Mutex<Option<u64>>,
}

impl FakeGemini {
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn reply_for(request: &LlmRequest) -> String {
        if request.system_instruction.is_some() {
            return "The article argues that sparse attention scales linearly.".to_string();
        }

        let prompt = request
            .contents
            .iter()
            .map(|turn| turn.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if prompt.contains("You are an educational grader") {
            if prompt.contains("Student Answer: wrong") {
                r#"{"isCorrect": false, "score": 40, "feedback": "Not quite."}"#.to_string()
            } else {
                "```json\n{\"isCorrect\": true, \"score\": 80, \"feedback\": \"Good.\"}\n```".to_string()
            }
        } else if prompt.contains("You are an expert educational evaluator") {
            r#"{"comprehensionScore": 70, "criticalThinkingScore": 60, "qualityScore": 65,
                "strengths": ["Clear"], "weaknesses": ["Brief"], "recommendations": ["Expand"],
                "summaryText": "Solid session."}"#
                .to_string()
        } else if prompt.contains("Analyze the following academic article") {
            r#"{"title": "Sparse Attention at Scale", "authors": ["A. Author"],
                "abstract": "We study sparse attention.", "keywords": ["attention", "sparsity"],
                "publication_year": 2024, "main_topics": ["transformers"]}"#
                .to_string()
        } else {
            "What problem does the article set out to solve?".to_string()
        }
    }
}

#[async_trait]
impl LlmClient for FakeGemini {
    async fn generate(&self, request: LlmRequest) -> Result<LlmResponse, LlmError> {
        if let Some(secs) = *self.rate_limit_secs.lock().unwrap() {
            return Err(LlmError::RateLimited {
                message: "429 quota exceeded".to_string(),
                retry_after_secs: secs,
            });
        }

        let text = Self::reply_for(&request);
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        Ok(LlmResponse {
            text,
            model,
            total_tokens: 64,
        })
    }
}

pub struct TestApp {
    pub router: Router,
    pub db: Database,
    pub llm: Arc<FakeGemini>,
}

pub async fn create_test_app() -> TestApp {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    // Load test environment from .env.test; variables already set win
    dotenvy::from_filename(".env.test").ok();

    let mut config = Config::load().expect("Failed to load test configuration");
    config.object_storage = None;

    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to connect to test MongoDB");
    let redis_client =
        redis::Client::open(config.redis_uri.clone()).expect("Failed to create test Redis client");

    let llm = Arc::new(FakeGemini::default());
    let db = mongo_client.database(&config.mongo_database);
    let app_state = Arc::new(
        AppState::new(config, mongo_client, redis_client, llm.clone())
            .await
            .expect("Failed to initialize test app state"),
    );

    TestApp {
        router: create_router(app_state),
        db,
        llm,
    }
}

pub fn unique_email(prefix: &str) -> String {
    format!("{}-{}@example.com", prefix, ObjectId::new().to_hex())
}

/// Inserts a user directly; instructors cannot self-register.
pub async fn seed_user(db: &Database, email: &str, role: UserRole) -> ObjectId {
    let now = Utc::now();
    let user = User {
        id: None,
        email: email.to_string(),
        password_hash: bcrypt::hash(TEST_PASSWORD, 4).unwrap(),
        full_name: "Test User".to_string(),
        role,
        created_at: now,
        updated_at: now,
        last_login_at: None,
    };
    db.collection::<User>("users")
        .insert_one(&user)
        .await
        .unwrap()
        .inserted_id
        .as_object_id()
        .unwrap()
}

pub async fn seed_article(db: &Database, owner: ObjectId, title: &str) -> ObjectId {
    let now = Utc::now();
    let article = Article {
        id: None,
        user_id: owner,
        title: title.to_string(),
        authors: vec!["A. Author".to_string()],
        abstract_text: Some("We study sparse attention.".to_string()),
        full_text: Some("Sparse attention reduces the quadratic cost of transformers.".to_string()),
        keywords: vec!["attention".to_string(), "sparsity".to_string()],
        main_topics: vec!["transformers".to_string()],
        pages: 3,
        publication_year: Some(2024),
        analysis_completed: true,
        storage_path: None,
        created_at: now,
        uploaded_at: now,
    };
    db.collection::<Article>("articles")
        .insert_one(&article)
        .await
        .unwrap()
        .inserted_id
        .as_object_id()
        .unwrap()
}

pub async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(&bytes).unwrap()
}

pub fn set_cookies(response: &axum::response::Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok().map(str::to_string))
        .collect()
}

pub fn cookie_value(cookies: &[String], name: &str) -> Option<String> {
    let prefix = format!("{}=", name);
    cookies
        .iter()
        .find(|c| c.starts_with(&prefix))
        .and_then(|c| c.split(';').next())
        .and_then(|pair| pair.strip_prefix(&prefix))
        .map(str::to_string)
}

pub async fn login(app: &Router, email: &str) -> (StatusCode, Value, Vec<String>) {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/v1/auth/login")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({ "email": email, "password": TEST_PASSWORD }).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let cookies = set_cookies(&response);
    (status, body_json(response).await, cookies)
}

/// Signed-in caller: bearer token plus a CSRF pair for mutations
pub struct Session {
    pub access_token: String,
    pub csrf_token: String,
}

pub async fn sign_in(app: &Router, email: &str) -> Session {
    let (status, body, _) = login(app, email).await;
    assert_eq!(status, StatusCode::OK, "login failed: {}", body);
    Session {
        access_token: body["access_token"].as_str().unwrap().to_string(),
        csrf_token: fetch_csrf_token(app).await,
    }
}

pub async fn fetch_csrf_token(app: &Router) -> String {
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/auth/csrf-token")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    body_json(response).await["csrf_token"]
        .as_str()
        .unwrap()
        .to_string()
}

impl Session {
    pub fn request(&self, method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.access_token))
            .header(header::COOKIE, format!("csrf_token={}", self.csrf_token))
            .header("x-csrf-token", &self.csrf_token);

        match body {
            Some(json) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    pub async fn send(&self, app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(self.request(method, uri, body)).await.unwrap();
        let status = response.status();
        (status, body_json(response).await)
    }
}
