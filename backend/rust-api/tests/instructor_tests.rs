use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
};
use deepreview_api::{
    models::{
        progress::StudentProgressRecord,
        socratic::{FinalEvaluation, FinalFeedback, ScoreSummary},
        user::UserRole,
    },
    services::collections::STUDENT_PROGRESS,
};
use mongodb::{bson::oid::ObjectId, Database};
use tower::ServiceExt;

mod common;

use common::{create_test_app, seed_article, seed_user, sign_in, unique_email};

async fn seed_progress(db: &Database, user_id: ObjectId, article_id: ObjectId, scores: Vec<f64>) {
    let average = scores.iter().sum::<f64>() / scores.len() as f64;
    let summary = ScoreSummary {
        difficulty_path: vec![3; scores.len()],
        scores,
        average,
    };
    let feedback = FinalFeedback::new(summary, FinalEvaluation::fallback());
    let record = StudentProgressRecord::from_feedback(user_id, article_id, ObjectId::new(), &feedback);
    db.collection::<StudentProgressRecord>(STUDENT_PROGRESS)
        .insert_one(&record)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_students_cannot_open_dashboard() {
    let test_app = create_test_app().await;
    let email = unique_email("student-dash");
    seed_user(&test_app.db, &email, UserRole::Student).await;
    let session = sign_in(&test_app.router, &email).await;

    for uri in [
        "/api/v1/instructor/stats",
        "/api/v1/instructor/students",
        "/api/v1/instructor/articles",
        "/api/v1/instructor/analytics",
    ] {
        let (status, _) = session.send(&test_app.router, "GET", uri, None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{}", uri);
    }
}

#[tokio::test]
async fn test_dashboard_requires_login() {
    let app = create_test_app().await.router;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/instructor/stats")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_instructor_sees_students_and_progress() {
    let test_app = create_test_app().await;
    let instructor_email = unique_email("instructor");
    let student_email = unique_email("tracked-student");
    seed_user(&test_app.db, &instructor_email, UserRole::Instructor).await;
    let student_id = seed_user(&test_app.db, &student_email, UserRole::Student).await;
    let article_id = seed_article(&test_app.db, student_id, "Tracked article").await;
    seed_progress(&test_app.db, student_id, article_id, vec![80.0, 60.0, 100.0, 40.0, 70.0]).await;

    let session = sign_in(&test_app.router, &instructor_email).await;

    let (status, stats) = session.send(&test_app.router, "GET", "/api/v1/instructor/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(stats["totalStudents"].as_u64().unwrap() >= 1);
    assert!(stats["totalArticles"].as_u64().unwrap() >= 1);

    let (status, students) = session
        .send(&test_app.router, "GET", "/api/v1/instructor/students", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let tracked = students
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["email"] == student_email)
        .cloned()
        .expect("seeded student listed");
    assert_eq!(tracked["totalSessions"], 1);
    assert_eq!(tracked["averageScore"], 70);
    assert!(students
        .as_array()
        .unwrap()
        .iter()
        .all(|s| s["email"] != instructor_email));

    let (status, progress) = session
        .send(
            &test_app.router,
            "GET",
            &format!("/api/v1/instructor/students/{}/progress", student_id.to_hex()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let progress = progress.as_array().unwrap();
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0]["article_title"], "Tracked article");
    assert_eq!(progress[0]["question_scores"].as_array().unwrap().len(), 5);

    let response = test_app
        .router
        .clone()
        .oneshot(session.request(
            "GET",
            &format!("/api/v1/instructor/students/{}/progress/export", student_id.to_hex()),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[header::CONTENT_DISPOSITION]
        .to_str()
        .unwrap()
        .ends_with("-progress.xlsx\""));
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    // XLSX is a zip archive
    assert!(bytes.starts_with(b"PK"));

    let (status, analytics) = session
        .send(&test_app.router, "GET", "/api/v1/instructor/analytics", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(analytics["scoreDistribution"]["buckets"].as_array().unwrap().len(), 5);
    assert!(!analytics["progressOverTime"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_student_is_not_found() {
    let test_app = create_test_app().await;
    let email = unique_email("instructor-404");
    seed_user(&test_app.db, &email, UserRole::Instructor).await;
    let session = sign_in(&test_app.router, &email).await;

    let (status, _) = session
        .send(
            &test_app.router,
            "GET",
            &format!("/api/v1/instructor/students/{}/progress", ObjectId::new().to_hex()),
            None,
        )
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_instructor_deletes_any_article() {
    let test_app = create_test_app().await;
    let instructor_email = unique_email("instructor-del");
    seed_user(&test_app.db, &instructor_email, UserRole::Instructor).await;
    let student_id = seed_user(&test_app.db, &unique_email("owner"), UserRole::Student).await;
    let article_id = seed_article(&test_app.db, student_id, "Student upload").await;
    seed_progress(&test_app.db, student_id, article_id, vec![50.0; 5]).await;

    let session = sign_in(&test_app.router, &instructor_email).await;

    let (status, listed) = session
        .send(&test_app.router, "GET", "/api/v1/instructor/articles", None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(listed
        .as_array()
        .unwrap()
        .iter()
        .any(|a| a["id"] == article_id.to_hex()));

    let (status, body) = session
        .send(
            &test_app.router,
            "DELETE",
            &format!("/api/v1/instructor/articles/{}", article_id.to_hex()),
            None,
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);

    // Progress rows go with the article
    let remaining = test_app
        .db
        .collection::<StudentProgressRecord>(STUDENT_PROGRESS)
        .count_documents(mongodb::bson::doc! { "article_id": article_id })
        .await
        .unwrap();
    assert_eq!(remaining, 0);
}
