use axum::http::{header, StatusCode};
use deepreview_api::models::user::UserRole;
use serde_json::json;
use tower::ServiceExt;

mod common;

use common::{body_json, create_test_app, seed_article, seed_user, sign_in, unique_email};

#[tokio::test]
async fn test_chat_reply_is_persisted_to_history() {
    let test_app = create_test_app().await;
    let email = unique_email("chat");
    let user_id = seed_user(&test_app.db, &email, UserRole::Student).await;
    let article_id = seed_article(&test_app.db, user_id, "Chat article").await;
    let session = sign_in(&test_app.router, &email).await;

    let (status, body) = session
        .send(
            &test_app.router,
            "POST",
            "/api/v1/chat",
            Some(json!({
                "articleId": article_id.to_hex(),
                "message": "What is the main claim?",
                "chatHistory": [
                    { "role": "user", "content": "Hi" },
                    { "role": "assistant", "content": "Hello! Ask me about the article." }
                ]
            })),
        )
        .await;

    assert_eq!(status, StatusCode::OK, "body: {}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "The article argues that sparse attention scales linearly.");
    assert_eq!(body["metadata"]["tokensUsed"], 64);

    // History turns and the new question reach the model, article text goes in the system instruction
    let sent = test_app.llm.requests.lock().unwrap().last().cloned().unwrap();
    assert!(sent.system_instruction.as_deref().unwrap().contains("Chat article"));
    assert_eq!(sent.contents.last().unwrap().text, "What is the main claim?");
    assert!(sent.contents.len() >= 3);

    let history_uri = format!("/api/v1/chat/{}/history", article_id.to_hex());
    let (status, history) = session.send(&test_app.router, "GET", &history_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0]["role"], "user");
    assert_eq!(history[1]["role"], "assistant");

    let (status, cleared) = session.send(&test_app.router, "DELETE", &history_uri, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(cleared["deleted"], 2);

    let (_, history) = session.send(&test_app.router, "GET", &history_uri, None).await;
    assert!(history.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_requires_article_and_message() {
    let test_app = create_test_app().await;
    let email = unique_email("chat-missing");
    seed_user(&test_app.db, &email, UserRole::Student).await;
    let session = sign_in(&test_app.router, &email).await;

    let (status, body) = session
        .send(&test_app.router, "POST", "/api/v1/chat", Some(json!({ "message": "  " })))
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Missing articleId or message");
    assert_eq!(test_app.llm.calls(), 0);
}

#[tokio::test]
async fn test_chat_rate_limit_is_reported_as_busy() {
    let test_app = create_test_app().await;
    let email = unique_email("chat-busy");
    let user_id = seed_user(&test_app.db, &email, UserRole::Student).await;
    let article_id = seed_article(&test_app.db, user_id, "Busy article").await;
    let session = sign_in(&test_app.router, &email).await;
    *test_app.llm.rate_limit_secs.lock().unwrap() = Some(1);

    let response = test_app
        .router
        .clone()
        .oneshot(session.request(
            "POST",
            "/api/v1/chat",
            Some(json!({ "articleId": article_id.to_hex(), "message": "Summarize" })),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    let body = body_json(response).await;
    assert_eq!(body["error"], "Failed to process chat");
    assert!(body["details"].as_str().is_some());
    assert_eq!(body["retryAfterSeconds"], 1);
    assert!(body["userFriendlyMessage"].as_str().is_some());
}

#[tokio::test]
async fn test_chat_history_is_per_user() {
    let test_app = create_test_app().await;
    let first_email = unique_email("chat-a");
    let second_email = unique_email("chat-b");
    let first_id = seed_user(&test_app.db, &first_email, UserRole::Student).await;
    seed_user(&test_app.db, &second_email, UserRole::Student).await;
    let article_id = seed_article(&test_app.db, first_id, "Shared article").await;

    let first = sign_in(&test_app.router, &first_email).await;
    let (status, _) = first
        .send(
            &test_app.router,
            "POST",
            "/api/v1/chat",
            Some(json!({ "articleId": article_id.to_hex(), "message": "Question?" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let second = sign_in(&test_app.router, &second_email).await;
    let (status, history) = second
        .send(
            &test_app.router,
            "GET",
            &format!("/api/v1/chat/{}/history", article_id.to_hex()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(history.as_array().unwrap().is_empty());
}
