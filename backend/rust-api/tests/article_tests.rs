use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
};
use deepreview_api::{models::user::UserRole, services::export_service::render_text_pdf};
use serde_json::json;
use std::time::Duration;
use tower::ServiceExt;

mod common;

use common::{body_json, create_test_app, seed_article, seed_user, sign_in, unique_email, Session};

const BOUNDARY: &str = "deepreview-test-boundary";

fn multipart_body(title: Option<&str>, pdf: Option<&[u8]>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(title) = title {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"title\"\r\n\r\n{title}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(pdf) = pdf {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"paper.pdf\"\r\nContent-Type: application/pdf\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(pdf);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

fn upload_request(session: &Session, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/v1/articles/upload")
        .header(header::AUTHORIZATION, format!("Bearer {}", session.access_token))
        .header(header::COOKIE, format!("csrf_token={}", session.csrf_token))
        .header("x-csrf-token", &session.csrf_token)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_upload_stores_article_and_analyzes_in_background() {
    let test_app = create_test_app().await;
    let email = unique_email("uploader");
    seed_user(&test_app.db, &email, UserRole::Student).await;
    let session = sign_in(&test_app.router, &email).await;

    let pdf = render_text_pdf(
        "Sparse Attention",
        &["Sparse attention reduces the quadratic cost of transformers.".to_string()],
    )
    .unwrap();

    let response = test_app
        .router
        .clone()
        .oneshot(upload_request(&session, multipart_body(Some("My upload"), Some(&pdf))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["article"]["title"], "My upload");
    assert_eq!(body["article"]["pages"], 1);
    assert!(body["article"].get("full_text").is_none());
    let article_id = body["article"]["id"].as_str().unwrap().to_string();

    // Background analysis overwrites metadata once the fake model answers
    let mut analyzed = serde_json::Value::Null;
    for _ in 0..50 {
        let (status, article) = session
            .send(&test_app.router, "GET", &format!("/api/v1/articles/{}", article_id), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        if article["analysis_completed"] == true {
            analyzed = article;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(analyzed["title"], "Sparse Attention at Scale");
    assert_eq!(analyzed["keywords"], json!(["attention", "sparsity"]));
    assert_eq!(analyzed["publication_year"], 2024);
    assert!(analyzed["full_text"].as_str().is_some());
}

#[tokio::test]
async fn test_upload_without_file_is_rejected() {
    let test_app = create_test_app().await;
    let email = unique_email("nofile");
    seed_user(&test_app.db, &email, UserRole::Student).await;
    let session = sign_in(&test_app.router, &email).await;

    let response = test_app
        .router
        .clone()
        .oneshot(upload_request(&session, multipart_body(Some("Only a title"), None)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "Missing file or title");
}

#[tokio::test]
async fn test_analyze_requires_article_id() {
    let test_app = create_test_app().await;
    let email = unique_email("analyze");
    seed_user(&test_app.db, &email, UserRole::Student).await;
    let session = sign_in(&test_app.router, &email).await;

    let (status, body) = session
        .send(&test_app.router, "POST", "/api/v1/articles/analyze", Some(json!({})))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Article ID required");

    let (status, _) = session
        .send(
            &test_app.router,
            "POST",
            "/api/v1/articles/analyze",
            Some(json!({ "articleId": "not-an-object-id" })),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_analyze_returns_extracted_metadata() {
    let test_app = create_test_app().await;
    let email = unique_email("analyze-ok");
    let user_id = seed_user(&test_app.db, &email, UserRole::Student).await;
    let article_id = seed_article(&test_app.db, user_id, "Draft title").await;
    let session = sign_in(&test_app.router, &email).await;

    let (status, body) = session
        .send(
            &test_app.router,
            "POST",
            "/api/v1/articles/analyze",
            Some(json!({ "articleId": article_id.to_hex() })),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["title"], "Sparse Attention at Scale");
    assert!(test_app.llm.calls() >= 1);
}

#[tokio::test]
async fn test_library_listing_and_count() {
    let test_app = create_test_app().await;
    let email = unique_email("library");
    let user_id = seed_user(&test_app.db, &email, UserRole::Student).await;
    let article_id = seed_article(&test_app.db, user_id, "Listed article").await;
    let session = sign_in(&test_app.router, &email).await;

    let (status, mine) = session.send(&test_app.router, "GET", "/api/v1/articles/mine", None).await;
    assert_eq!(status, StatusCode::OK);
    let mine = mine.as_array().unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0]["id"], article_id.to_hex());
    assert!(mine[0].get("full_text").is_none());

    let (status, all) = session
        .send(&test_app.router, "GET", "/api/v1/articles?limit=500", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(all
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a["id"] == article_id.to_hex()));

    let (status, count) = session.send(&test_app.router, "GET", "/api/v1/articles/count", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(count["count"].as_u64().unwrap() >= 1);
}

#[tokio::test]
async fn test_unknown_article_is_not_found() {
    let test_app = create_test_app().await;
    let email = unique_email("missing");
    seed_user(&test_app.db, &email, UserRole::Student).await;
    let session = sign_in(&test_app.router, &email).await;

    let missing = mongodb::bson::oid::ObjectId::new().to_hex();
    let (status, body) = session
        .send(&test_app.router, "GET", &format!("/api/v1/articles/{}", missing), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Article not found");

    let (status, _) = session
        .send(&test_app.router, "GET", "/api/v1/articles/garbage", None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_only_owner_can_delete() {
    let test_app = create_test_app().await;
    let owner_email = unique_email("owner");
    let other_email = unique_email("other");
    let owner_id = seed_user(&test_app.db, &owner_email, UserRole::Student).await;
    seed_user(&test_app.db, &other_email, UserRole::Student).await;
    let article_id = seed_article(&test_app.db, owner_id, "Owned").await;
    let uri = format!("/api/v1/articles/{}", article_id.to_hex());

    let other = sign_in(&test_app.router, &other_email).await;
    let (status, _) = other.send(&test_app.router, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let owner = sign_in(&test_app.router, &owner_email).await;
    let (status, body) = owner.send(&test_app.router, "DELETE", &uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    let (status, _) = owner.send(&test_app.router, "GET", &uri, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_download_without_storage_is_not_found() {
    let test_app = create_test_app().await;
    let email = unique_email("download");
    let user_id = seed_user(&test_app.db, &email, UserRole::Student).await;
    let article_id = seed_article(&test_app.db, user_id, "No blob").await;
    let session = sign_in(&test_app.router, &email).await;

    let (status, body) = session
        .send(
            &test_app.router,
            "GET",
            &format!("/api/v1/articles/{}/download", article_id.to_hex()),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "File not available");
}

#[tokio::test]
async fn test_compare_and_export_reports() {
    let test_app = create_test_app().await;
    let email = unique_email("compare");
    let user_id = seed_user(&test_app.db, &email, UserRole::Student).await;
    let first = seed_article(&test_app.db, user_id, "First").await;
    let second = seed_article(&test_app.db, user_id, "Second").await;
    let session = sign_in(&test_app.router, &email).await;

    let query = format!("first={}&second={}", first.to_hex(), second.to_hex());
    let (status, body) = session
        .send(&test_app.router, "GET", &format!("/api/v1/articles/compare?{}", query), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    // Seeded articles share every topic and keyword
    assert_eq!(body["comparison"]["similarityScore"], 100);
    assert_eq!(body["comparison"]["similarityLabel"], "High Similarity");
    assert_eq!(body["first"]["title"], "First");

    for uri in [
        format!("/api/v1/articles/compare/report.pdf?{}", query),
        format!("/api/v1/articles/{}/abstract.pdf", first.to_hex()),
    ] {
        let response = test_app
            .router
            .clone()
            .oneshot(session.request("GET", &uri, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/pdf");
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }
}

#[tokio::test]
async fn test_articles_require_authentication() {
    let app = create_test_app().await.router;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/articles")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}
