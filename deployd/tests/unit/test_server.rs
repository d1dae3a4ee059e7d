//! HTTP API tests

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use deployd::server::serve::router;
use deployd::server::state::ServerState;

use crate::common::Harness;

fn app(h: &Harness) -> Router {
    router(Arc::new(ServerState::new(h.orchestrator.clone())))
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_health() {
    let h = Harness::new(5).await;
    let app = app(&h);

    let (status, body) = call(&app, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "deployd");

    h.cleanup().await;
}

#[tokio::test]
async fn test_publish_list_stop_delete() {
    let h = Harness::new(5).await;
    let app = app(&h);

    let (status, published) = call(
        &app,
        Method::POST,
        "/deployments",
        Some(json!({"owner_id": "alice", "config_ref": "alice-bot"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(published["state"], "running");
    assert_eq!(published["port"], 8502);
    assert_eq!(published["url"], "http://chat.test:8502");
    let id = published["id"].as_str().unwrap().to_string();

    let (status, listed) = call(&app, Method::GET, "/deployments?owner_id=alice", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed["total"], 1);
    assert_eq!(listed["deployments"][0]["id"], id.as_str());

    let (_, listed) = call(&app, Method::GET, "/deployments?owner_id=bob", None).await;
    assert_eq!(listed["total"], 0);

    let (status, one) = call(&app, Method::GET, &format!("/deployments/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(one["state"], "running");

    let (status, stopped) =
        call(&app, Method::POST, &format!("/deployments/{}/stop", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(stopped["state"], "stopped");
    assert_eq!(stopped["url"], Value::Null);

    let (status, restarted) =
        call(&app, Method::POST, &format!("/deployments/{}/restart", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(restarted["state"], "running");

    let (status, _) = call(&app, Method::DELETE, &format!("/deployments/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(&app, Method::GET, &format!("/deployments/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    h.cleanup().await;
}

#[tokio::test]
async fn test_error_mapping() {
    let h = Harness::new(1).await;
    let app = app(&h);

    let (status, _) = call(
        &app,
        Method::POST,
        "/deployments",
        Some(json!({"owner_id": "alice", "config_ref": "alice-bot"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = call(
        &app,
        Method::POST,
        "/deployments",
        Some(json!({"owner_id": "bob", "config_ref": "bob-bot"})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "no_free_port");
    assert!(!body["message"].as_str().unwrap().contains("8502"));

    let (status, body) = call(
        &app,
        Method::POST,
        "/deployments",
        Some(json!({"owner_id": "bob", "config_ref": "bad/ref"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["kind"], "invalid_request");

    let (status, body) = call(&app, Method::POST, "/deployments/unknown/stop", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "not_found");

    h.cleanup().await;
}

#[tokio::test]
async fn test_owner_cascade_and_reconcile() {
    let h = Harness::new(5).await;
    let app = app(&h);

    for config in ["alice-bot", "alice-faq"] {
        let (status, _) = call(
            &app,
            Method::POST,
            "/deployments",
            Some(json!({"owner_id": "alice", "config_ref": config})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, report) = call(&app, Method::POST, "/reconcile", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["checked"], 2);
    assert_eq!(report["confirmed"], 2);

    let (status, body) = call(&app, Method::DELETE, "/owners/alice/deployments", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 2);

    let (_, listed) = call(&app, Method::GET, "/deployments", None).await;
    assert_eq!(listed["total"], 0);

    h.cleanup().await;
}
