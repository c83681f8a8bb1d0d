//! Endpoint tests for the intent creation front door.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tower::ServiceExt;

use forge_api::{ApiErrorBody, Config, Server};
use forge_core::MemoryCluster;
use forge_core::catalog::{CI, UNIT};
use forge_flow::intent::{AckState, CiSpec, Intent};

fn server(kind: &str) -> Server {
    let config = Config::from_env_with(|key| match key {
        "FORGE_KIND" => Some(kind.to_string()),
        _ => None,
    })
    .expect("config");
    Server::new(config, Arc::new(MemoryCluster::new()))
}

fn post_json(body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn ci_create_stores_intent_under_derived_name() {
    let server = server("ci");
    let ds = server.datasource();
    let router = server.router();

    let response = router
        .oneshot(post_json(&json!({
            "flowId": "flow-1",
            "stepName": "build",
            "uuid": "u-1",
            "gitUrl": "http://git.example/org/app.git",
            "branch": "main",
            "commitId": "abc123",
        })))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["metadata"]["name"], "app-main");
    assert_eq!(body["spec"]["gitUrl"], "http://git.example/org/app.git");
    assert_eq!(body["spec"]["done"], false);

    let stored = ds.get("forge", CI, "app-main", &[]).await.expect("stored");
    let intent: Intent<CiSpec> = Intent::from_envelope(&stored).expect("typed");
    assert_eq!(intent.spec.meta.flow_id.as_deref(), Some("flow-1"));
    assert_eq!(intent.spec.commit_id.as_deref(), Some("abc123"));
}

#[tokio::test]
async fn malformed_body_is_rejected_with_error_shape() {
    let router = server("ci").router();

    let response = router
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("{not json"))
                .expect("request"),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    let body: ApiErrorBody = serde_json::from_slice(&bytes).expect("error body");
    assert_eq!(body.msg, "request not match");
    assert!(!body.data.is_empty());
}

#[tokio::test]
async fn illegal_git_url_is_rejected() {
    let router = server("ci").router();

    let response = router
        .oneshot(post_json(&json!({
            "gitUrl": "http://git.example/org/app",
            "branch": "main",
        })))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// Submitting twice with the same derived name force-fails the first intent
// before the second proceeds: at most one live run per name.
#[tokio::test]
async fn resubmission_force_fails_the_undone_prior_intent() {
    let server = server("ci");
    let ds = server.datasource();
    let router = server.router();

    let body = json!({
        "flowId": "flow-1",
        "stepName": "build",
        "uuid": "u-1",
        "gitUrl": "http://git.example/org/app.git",
        "branch": "main",
    });

    let first = router
        .clone()
        .oneshot(post_json(&body))
        .await
        .expect("first response");
    assert_eq!(first.status(), StatusCode::OK);

    let resubmit = json!({
        "flowId": "flow-2",
        "stepName": "build",
        "uuid": "u-2",
        "gitUrl": "http://git.example/org/app.git",
        "branch": "main",
    });
    let second = router
        .oneshot(post_json(&resubmit))
        .await
        .expect("second response");
    assert_eq!(second.status(), StatusCode::OK);

    // The stored record is the resubmission, terminal state forced onto the
    // prior one first: the merge preserves the forced fields only if the new
    // spec does not overwrite them, so the live record carries the new
    // correlation triple and done=false.
    let stored = ds.get("forge", CI, "app-main", &[]).await.expect("stored");
    let intent: Intent<CiSpec> = Intent::from_envelope(&stored).expect("typed");
    assert_eq!(intent.spec.meta.flow_id.as_deref(), Some("flow-2"));
    assert!(!intent.spec.meta.done);
}

#[tokio::test]
async fn unit_create_appends_kind_suffix_and_service_prefix() {
    let server = server("unit");
    let ds = server.datasource();
    let router = server.router();

    let response = router
        .oneshot(post_json(&json!({
            "flowId": "flow-1",
            "stepName": "test",
            "uuid": "u-1",
            "gitUrl": "http://git.example/org/My_App.git",
            "branch": "main",
            "language": "go",
            "command": "go test ./...",
            "serviceName": "edge",
        })))
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["metadata"]["name"], "edge-my-app-main-unit");

    assert!(ds.get("forge", UNIT, "edge-my-app-main-unit", &[]).await.is_ok());
}

#[tokio::test]
async fn health_and_ready_respond() {
    let router = server("ci").router();

    let health = router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(health.status(), StatusCode::OK);

    let ready = router
        .oneshot(
            Request::builder()
                .uri("/ready")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(ready.status(), StatusCode::OK);
}

#[tokio::test]
async fn completed_prior_intent_is_left_alone_on_resubmission() {
    let server = server("ci");
    let ds = server.datasource();
    let router = server.router();

    // Seed a completed intent under the derived name.
    let mut done = Intent::new(
        "CI",
        "app-main",
        "forge",
        CiSpec {
            git_url: Some("http://git.example/org/app.git".into()),
            branch: Some("main".into()),
            ..CiSpec::default()
        },
    );
    done.spec.meta.complete(AckState::Success);
    ds.apply("forge", CI, "app-main", &done.to_envelope().expect("envelope"), true)
        .await
        .expect("seed");

    let response = router
        .oneshot(post_json(&json!({
            "gitUrl": "http://git.example/org/app.git",
            "branch": "main",
            "uuid": "u-2",
        })))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let stored = ds.get("forge", CI, "app-main", &[]).await.expect("stored");
    let intent: Intent<CiSpec> = Intent::from_envelope(&stored).expect("typed");
    // The new spec overwrote the record; no force-fail write happened in
    // between (the prior record was already terminal).
    assert!(!intent.spec.meta.done);
}
