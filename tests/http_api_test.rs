//! HTTP surface: routing, status mapping, wire shapes.

mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::spawn_services;
use fee_service::build_router;
use serde_json::json;
use tower::util::ServiceExt;
use uuid::Uuid;

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, payload: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_and_readiness_report_the_service() {
    let app = spawn_services();
    let router = build_router(app.state.clone());

    let response = router
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "fee-service");
    assert!(body["version"].is_string());

    let response = router
        .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ready");
}

#[tokio::test]
async fn metrics_are_served_as_prometheus_text() {
    let app = spawn_services();
    let router = build_router(app.state.clone());

    let response = router
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"],
        "text/plain; charset=utf-8"
    );
}

#[tokio::test]
async fn student_creation_round_trips_through_the_api() {
    let app = spawn_services();
    let router = build_router(app.state.clone());

    let response = router
        .clone()
        .oneshot(post_json(
            "/students",
            json!({
                "full_name": "Ravi Kumar",
                "email": "ravi.kumar@example.edu",
                "course": "B.Tech CSE",
                "current_semester": 1,
                "total_semesters": 8
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    let id = created["id"].as_str().unwrap().to_string();
    assert_eq!(created["full_name"], "Ravi Kumar");
    assert_eq!(created["academic_status"], "active");

    let response = router
        .oneshot(
            Request::builder()
                .uri(format!("/students/{id}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["email"], "ravi.kumar@example.edu");
    assert_eq!(fetched["current_semester"], 1);
}

#[tokio::test]
async fn malformed_payloads_map_to_422() {
    let app = spawn_services();
    let router = build_router(app.state.clone());

    let response = router
        .oneshot(post_json(
            "/students",
            json!({
                "full_name": "No Email",
                "email": "not-an-address",
                "course": "B.Tech CSE",
                "current_semester": 1,
                "total_semesters": 8
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = body_json(response).await;
    assert_eq!(body["error"], "Validation error");
    assert!(body["details"].as_str().unwrap().contains("email"));
}

#[tokio::test]
async fn semantic_rejections_map_to_400() {
    let app = spawn_services();
    let router = build_router(app.state.clone());

    let response = router
        .oneshot(post_json(
            "/students",
            json!({
                "full_name": "Out Of Range",
                "email": "oor@example.edu",
                "course": "B.Tech CSE",
                "current_semester": 9,
                "total_semesters": 8
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("exceeds"));
}

#[tokio::test]
async fn unknown_resources_map_to_404() {
    let app = spawn_services();
    let router = build_router(app.state.clone());

    let response = router
        .oneshot(
            Request::builder()
                .uri(format!("/ledgers/{}", Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert!(body["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn forged_webhook_signatures_are_rejected() {
    let app = spawn_services();
    let router = build_router(app.state.clone());
    let event = json!({
        "event": "subscription.charged",
        "payload": {}
    });

    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/razorpay")
                .header("content-type", "application/json")
                .header("X-Razorpay-Signature", "deadbeef")
                .body(Body::from(event.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        body_json(response).await["error"],
        "Signature verification failed"
    );

    // No signature header at all is rejected the same way.
    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/webhooks/razorpay")
                .header("content-type", "application/json")
                .body(Body::from(event.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn ledger_entries_come_back_with_their_new_id() {
    let app = spawn_services();
    let (_, ledger) = app.seed_student_with_ledger().await;
    let router = build_router(app.state.clone());

    let response = router
        .oneshot(post_json(
            &format!("/ledgers/{}/fines", ledger.id),
            json!({
                "name": "Library fine",
                "amount": "500",
                "reason": "late return",
                "imposed_by": "librarian@example.edu"
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await;
    assert!(body["id"].as_str().is_some());
    assert_eq!(body["ledger"]["total_fines"], "500");
    assert_eq!(body["ledger"]["version"], 2);
}
