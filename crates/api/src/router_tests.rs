//! Router-level tests driven through `tower::ServiceExt::oneshot`.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use engine::{ExecutorConfig, MemoryStore, NoCredentials, Node, Workflow};
use nodes::NodeTypes;
use runner::{InProcessLauncher, Stores, Supervisor, SupervisorConfig, Worker};
use webhooks::{
    ActivationMode, ActiveWorkflows, PushUiSink, TestWebhookConfig, TestWebhooks, WebhookRegistry,
};

use crate::{router, AppState, PushHub};

fn hook_workflow(id: &str, path: &str, mode: &str) -> Workflow {
    Workflow::new(
        id,
        "hooked",
        vec![
            Node::new("Hook", "webhook", json!({ "path": path, "httpMethod": "POST", "responseMode": mode })),
            Node::new("Tag", "set", json!({ "values": { "tagged": true } })),
        ],
    )
    .connect("Hook", "Tag")
}

fn state(store: Arc<MemoryStore>) -> AppState {
    let push = Arc::new(PushHub::new());
    let worker = Worker::new(
        NodeTypes::with_builtins(),
        ExecutorConfig { max_retries: 0, retry_base_delay: Duration::from_millis(1) },
    );
    let supervisor = Supervisor::with_ui(
        Arc::new(InProcessLauncher::new(worker)),
        NodeTypes::with_builtins(),
        Stores {
            workflows: store.clone(),
            executions: store.clone(),
            credentials: Arc::new(NoCredentials),
        },
        SupervisorConfig::default(),
        Some(Arc::new(PushUiSink(push.clone()))),
    );
    let registry = WebhookRegistry::new();
    AppState {
        workflows: store.clone(),
        supervisor: supervisor.clone(),
        active: Arc::new(ActiveWorkflows::new(
            registry.clone(),
            store,
            NodeTypes::with_builtins(),
            supervisor.clone(),
        )),
        tests: TestWebhooks::new(
            registry,
            NodeTypes::with_builtins(),
            supervisor,
            push.clone(),
            TestWebhookConfig::default(),
        ),
        push,
    }
}

async fn call(app: &Router, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

#[tokio::test]
async fn health_check_answers() {
    let app = router(state(Arc::new(MemoryStore::new())));
    let response = app
        .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn production_webhook_runs_the_active_workflow() {
    let store = Arc::new(MemoryStore::with_workflows([hook_workflow("1", "orders", "lastNode")]));
    let state = state(store);
    state.active.add("1", ActivationMode::Activate).await.unwrap();
    let app = router(state);

    let (status, body) = call(&app, Method::POST, "/webhook/orders?x=1", json!({ "n": 1 })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["tagged"], json!(true));
    assert_eq!(body["query"], json!({ "x": "1" }));
    assert_eq!(body["body"], json!({ "n": 1 }));
}

#[tokio::test]
async fn unknown_webhook_is_404_with_message() {
    let app = router(state(Arc::new(MemoryStore::new())));
    let (status, body) = call(&app, Method::POST, "/webhook/missing", Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], json!(404));
    assert!(body["message"].as_str().unwrap().contains("not registered"));
}

#[tokio::test]
async fn options_lists_allowed_methods() {
    let store = Arc::new(MemoryStore::with_workflows([hook_workflow("1", "orders", "onReceived")]));
    let state = state(store);
    state.active.add("1", ActivationMode::Activate).await.unwrap();
    let app = router(state);

    let response = app
        .oneshot(Request::builder().method(Method::OPTIONS).uri("/webhook/orders").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(response.headers()[header::ALLOW], "POST, OPTIONS");
}

#[tokio::test]
async fn test_webhook_arms_fires_once_and_cancels() {
    let store = Arc::new(MemoryStore::with_workflows([hook_workflow("1", "try", "onReceived")]));
    let app = router(state(store));

    let (status, body) = call(&app, Method::POST, "/rest/test-webhook/1?sessionId=tab", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["waitingForWebhook"], json!(true));

    let (status, body) = call(&app, Method::POST, "/webhook-test/try", json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], json!("Workflow was started"));

    let (status, _) = call(&app, Method::POST, "/webhook-test/try", json!({})).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    call(&app, Method::POST, "/rest/test-webhook/1", Value::Null).await;
    let (status, body) = call(&app, Method::DELETE, "/rest/test-webhook/1", Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!(true));
}

#[tokio::test]
async fn activation_errors_are_queryable() {
    let app = router(state(Arc::new(MemoryStore::new())));

    let (status, _) = call(&app, Method::POST, "/rest/active-workflows/9", Value::Null).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = call(&app, Method::GET, "/rest/active-workflows/9/error", Value::Null).await;
    assert!(body["data"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn push_stream_requires_a_session() {
    let app = router(state(Arc::new(MemoryStore::new())));
    let (status, _) = call(&app, Method::GET, "/rest/push", Value::Null).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
