//! Active and test lifecycles driving a real supervisor with in-process
//! workers.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};

use engine::{ExecutorConfig, MemoryStore, NoCredentials, Node, Workflow};
use nodes::{HttpMethod, NodeTypes};
use runner::{InProcessLauncher, Stores, Supervisor, SupervisorConfig, Worker};

use crate::{
    ActivationMode, ActiveWorkflows, ArmResult, Push, PushEvent, TestOutcome, TestWebhookConfig,
    TestWebhooks, WebhookError, WebhookRegistry, WebhookRequest, WebhookScope,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RecordingPush(Mutex<Vec<(String, PushEvent)>>);

impl RecordingPush {
    fn events(&self) -> Vec<(String, PushEvent)> {
        self.0.lock().unwrap().clone()
    }
}

impl Push for RecordingPush {
    fn push(&self, session_id: &str, event: PushEvent) {
        self.0.lock().unwrap().push((session_id.to_owned(), event));
    }
}

fn supervisor(store: &Arc<MemoryStore>) -> Supervisor {
    let worker = Worker::new(
        NodeTypes::with_builtins(),
        ExecutorConfig { max_retries: 0, retry_base_delay: Duration::from_millis(1) },
    );
    Supervisor::new(
        Arc::new(InProcessLauncher::new(worker)),
        NodeTypes::with_builtins(),
        Stores {
            workflows: store.clone(),
            executions: store.clone(),
            credentials: Arc::new(NoCredentials),
        },
        SupervisorConfig::default(),
    )
}

fn hook(name: &str, path: &str, method: &str) -> Node {
    Node::new(name, "webhook", json!({ "path": path, "httpMethod": method, "responseMode": "lastNode" }))
}

/// `Hook (POST path) -> Tag (set tagged=true)`.
fn hook_workflow(id: &str, path: &str) -> Workflow {
    let mut wf = Workflow::new(
        id,
        format!("workflow {id}"),
        vec![
            hook("Hook", path, "POST"),
            Node::new("Tag", "set", json!({ "values": { "tagged": true } })),
        ],
    )
    .connect("Hook", "Tag");
    wf.active = true;
    wf
}

fn active(store: &Arc<MemoryStore>) -> ActiveWorkflows {
    ActiveWorkflows::new(
        WebhookRegistry::new(),
        store.clone(),
        NodeTypes::with_builtins(),
        supervisor(store),
    )
}

fn test_webhooks(store: &Arc<MemoryStore>, push: &Arc<RecordingPush>, ttl: Duration) -> TestWebhooks {
    TestWebhooks::new(
        WebhookRegistry::new(),
        NodeTypes::with_builtins(),
        supervisor(store),
        push.clone(),
        TestWebhookConfig { ttl },
    )
}

fn armed(result: Result<ArmResult, WebhookError>) -> crate::TestWebhookHandle {
    match result.unwrap() {
        ArmResult::Armed(handle) => handle,
        ArmResult::NothingToTest => panic!("expected webhooks to be armed"),
    }
}

fn post(path: &str, body: Value) -> WebhookRequest {
    WebhookRequest::new(HttpMethod::Post, path).with_body(body)
}

// ---------------------------------------------------------------------------
// Active lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn init_isolates_a_failing_workflow() {
    let mut broken = hook_workflow("2", "users/:id");
    broken.nodes[0].webhook_id = None;
    let store = Arc::new(MemoryStore::with_workflows([
        hook_workflow("1", "orders"),
        broken,
        hook_workflow("3", "invoices"),
    ]));
    let active = active(&store);

    assert_eq!(active.init().await.unwrap(), 2);

    assert!(active.is_active("1"));
    assert!(active.is_active("3"));
    assert!(!active.is_active("2"));
    assert!(active.get_activation_error("2").unwrap().contains("webhook id"));
    assert_eq!(active.active_workflow_ids(), vec!["1".to_string(), "3".to_string()]);
}

#[tokio::test]
async fn webhook_call_runs_the_workflow_and_answers_with_last_node() {
    let store = Arc::new(MemoryStore::with_workflows([hook_workflow("1", "orders")]));
    let active = active(&store);
    active.add("1", ActivationMode::Activate).await.unwrap();

    let response = active.execute_webhook(post("/orders", json!({ "n": 1 }))).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.body["body"], json!({ "n": 1 }));
    assert_eq!(response.body["tagged"], json!(true));
    assert_eq!(store.execution_count(), 1);
}

#[tokio::test]
async fn dynamic_webhook_binds_request_params() {
    let mut wf = hook_workflow("1", "users/:id");
    wf.nodes[0].webhook_id = Some("f00d".into());
    let store = Arc::new(MemoryStore::with_workflows([wf]));
    let active = active(&store);
    active.add("1", ActivationMode::Create).await.unwrap();

    let response = active.execute_webhook(post("f00d/users/42", json!({}))).await.unwrap();
    assert_eq!(response.body["params"], json!({ "id": "42" }));
}

#[tokio::test]
async fn unknown_path_is_not_registered() {
    let store = Arc::new(MemoryStore::new());
    let active = active(&store);
    let err = active.execute_webhook(post("nowhere", Value::Null)).await.unwrap_err();
    assert!(matches!(err, WebhookError::NotRegistered { .. }));
    assert_eq!(err.status(), 404);
}

#[tokio::test]
async fn successful_re_add_clears_the_activation_error() {
    let store = Arc::new(MemoryStore::new());
    let active = active(&store);

    assert!(active.add("1", ActivationMode::Activate).await.is_err());
    assert!(active.get_activation_error("1").is_some());

    store.insert_workflow(hook_workflow("1", "orders"));
    active.add("1", ActivationMode::Update).await.unwrap();
    active.add("1", ActivationMode::Update).await.unwrap();
    assert!(active.get_activation_error("1").is_none());
    assert_eq!(active.registry().len(), 1);

    active.remove("1");
    active.remove("1");
    assert!(active.registry().is_empty());
}

#[tokio::test]
async fn failed_update_keeps_the_previous_webhooks() {
    let store = Arc::new(MemoryStore::with_workflows([
        hook_workflow("1", "orders"),
        hook_workflow("2", "taken"),
    ]));
    let active = active(&store);
    active.init().await.unwrap();

    let mut updated = hook_workflow("1", "orders-v2");
    updated.nodes.push(hook("Other", "taken", "POST"));
    store.insert_workflow(updated);
    let err = active.add("1", ActivationMode::Update).await.unwrap_err();

    assert!(matches!(err, WebhookError::ActivationFailed { .. }));
    assert!(active.get_activation_error("1").is_some());
    assert!(active.is_active("1"));
    assert_eq!(active.registry().len(), 2);
    assert!(active
        .registry()
        .find(WebhookScope::Production, HttpMethod::Post, "orders-v2")
        .is_err());

    let response = active.execute_webhook(post("orders", json!({}))).await.unwrap();
    assert_eq!(response.body["tagged"], json!(true));

    active.remove("1");
    assert_eq!(active.registry().len(), 1);
}

#[tokio::test]
async fn remove_all_deregisters_everything() {
    let store = Arc::new(MemoryStore::with_workflows([
        hook_workflow("1", "a"),
        hook_workflow("2", "b"),
    ]));
    let active = active(&store);
    active.init().await.unwrap();
    assert_eq!(active.registry().len(), 2);

    active.remove_all();
    assert!(active.registry().is_empty());
    assert!(active.active_workflow_ids().is_empty());
}

// ---------------------------------------------------------------------------
// Test lifecycle
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_hit_fires_and_tears_down_the_whole_group() {
    let store = Arc::new(MemoryStore::new());
    let push = Arc::new(RecordingPush::default());
    let tests = test_webhooks(&store, &push, Duration::from_secs(120));

    let mut wf = hook_workflow("7", "first");
    wf.nodes.push(hook("Other", "second", "POST"));
    let handle = armed(tests.arm(wf, Some("tab-1".into())));
    assert_eq!(handle.paths, vec!["first".to_string(), "second".to_string()]);
    assert_eq!(tests.registry().len(), 2);

    let response = tests.execute_webhook(post("first", json!({ "x": 1 }))).await.unwrap();
    assert_eq!(response.body["tagged"], json!(true));

    assert!(tests.registry().is_empty());
    assert!(!tests.is_armed("7"));
    assert_eq!(handle.wait().await, TestOutcome::Fired { execution_id: "1".into() });
    assert_eq!(
        push.events(),
        vec![(
            "tab-1".to_string(),
            PushEvent::TestWebhookReceived { workflow_id: "7".into(), execution_id: "1".into() }
        )]
    );

    let again = tests.execute_webhook(post("second", Value::Null)).await.unwrap_err();
    assert!(matches!(again, WebhookError::NotRegistered { .. }));
}

#[tokio::test(start_paused = true)]
async fn unused_session_expires_after_ttl() {
    let store = Arc::new(MemoryStore::new());
    let push = Arc::new(RecordingPush::default());
    let tests = test_webhooks(&store, &push, Duration::from_secs(1));

    let handle = armed(tests.arm(hook_workflow("7", "hook"), Some("tab-1".into())));
    assert!(tests.is_armed("7"));

    assert_eq!(handle.wait().await, TestOutcome::Expired);
    assert!(tests.registry().is_empty());
    assert!(!tests.is_armed("7"));
    assert_eq!(
        push.events(),
        vec![("tab-1".to_string(), PushEvent::TestWebhookDeleted { workflow_id: "7".into() })]
    );

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(push.events().len(), 1);
}

#[tokio::test]
async fn failed_group_registration_leaves_nothing_behind() {
    let store = Arc::new(MemoryStore::new());
    let push = Arc::new(RecordingPush::default());
    let tests = test_webhooks(&store, &push, Duration::from_secs(120));
    armed(tests.arm(hook_workflow("1", "shared"), None));

    let mut other = hook_workflow("2", "own-a");
    other.nodes.push(hook("B", "own-b", "POST"));
    other.nodes.push(hook("C", "own-a", "POST"));
    let err = tests.arm(other, None).err().unwrap();

    assert!(matches!(err, WebhookError::Conflict { .. }));
    assert_eq!(tests.registry().len(), 1);
    assert!(!tests.is_armed("2"));
    assert!(tests.registry().find(WebhookScope::Test, HttpMethod::Post, "own-a").is_err());
    assert!(tests.registry().find(WebhookScope::Test, HttpMethod::Post, "own-b").is_err());
}

#[tokio::test]
async fn two_workflows_can_be_tested_on_the_same_path() {
    let store = Arc::new(MemoryStore::new());
    let push = Arc::new(RecordingPush::default());
    let tests = test_webhooks(&store, &push, Duration::from_secs(120));

    let first = armed(tests.arm(hook_workflow("1", "shared"), Some("tab-1".into())));
    let second = armed(tests.arm(hook_workflow("2", "shared"), Some("tab-2".into())));
    assert_eq!(tests.registry().len(), 2);

    tests.execute_webhook(post("shared", json!({ "n": 1 }))).await.unwrap();
    assert_eq!(first.wait().await, TestOutcome::Fired { execution_id: "1".into() });
    assert!(!tests.is_armed("1"));
    assert!(tests.is_armed("2"));
    assert_eq!(tests.registry().len(), 1);

    tests.execute_webhook(post("shared", json!({ "n": 2 }))).await.unwrap();
    assert_eq!(second.wait().await, TestOutcome::Fired { execution_id: "2".into() });
    assert!(tests.registry().is_empty());
    assert_eq!(
        push.events(),
        vec![
            (
                "tab-1".to_string(),
                PushEvent::TestWebhookReceived { workflow_id: "1".into(), execution_id: "1".into() }
            ),
            (
                "tab-2".to_string(),
                PushEvent::TestWebhookReceived { workflow_id: "2".into(), execution_id: "2".into() }
            ),
        ]
    );
}

#[tokio::test]
async fn workflow_without_webhooks_has_nothing_to_test() {
    let store = Arc::new(MemoryStore::new());
    let push = Arc::new(RecordingPush::default());
    let tests = test_webhooks(&store, &push, Duration::from_secs(120));

    let wf = Workflow::new("1", "plain", vec![Node::new("n", "noOp", json!({}))]);
    assert!(matches!(tests.arm(wf, None), Ok(ArmResult::NothingToTest)));
    assert!(!tests.is_armed("1"));
}

#[tokio::test]
async fn cancel_removes_the_session_and_notifies() {
    let store = Arc::new(MemoryStore::new());
    let push = Arc::new(RecordingPush::default());
    let tests = test_webhooks(&store, &push, Duration::from_secs(120));

    let handle = armed(tests.arm(hook_workflow("7", "hook"), Some("tab-1".into())));
    assert!(tests.cancel("7"));
    assert!(!tests.cancel("7"));

    assert_eq!(handle.wait().await, TestOutcome::Cancelled);
    assert!(tests.registry().is_empty());
    assert_eq!(push.events().len(), 1);
}

#[tokio::test]
async fn re_arming_replaces_the_previous_session() {
    let store = Arc::new(MemoryStore::new());
    let push = Arc::new(RecordingPush::default());
    let tests = test_webhooks(&store, &push, Duration::from_secs(120));

    let first = armed(tests.arm(hook_workflow("7", "hook"), None));
    let _second = armed(tests.arm(hook_workflow("7", "hook"), None));

    assert_eq!(first.wait().await, TestOutcome::Cancelled);
    assert_eq!(tests.registry().len(), 1);
    assert!(tests.is_armed("7"));
}

#[tokio::test]
async fn same_workflow_can_be_active_and_under_test() {
    let store = Arc::new(MemoryStore::with_workflows([hook_workflow("1", "orders")]));
    let registry = WebhookRegistry::new();
    let active = ActiveWorkflows::new(
        registry.clone(),
        store.clone(),
        NodeTypes::with_builtins(),
        supervisor(&store),
    );
    let tests = TestWebhooks::new(
        registry.clone(),
        NodeTypes::with_builtins(),
        supervisor(&store),
        Arc::new(crate::NoPush),
        TestWebhookConfig::default(),
    );

    active.add("1", ActivationMode::Activate).await.unwrap();
    armed(tests.arm(hook_workflow("1", "orders"), None));
    assert_eq!(registry.len(), 2);

    tests.execute_webhook(post("orders", Value::Null)).await.unwrap();
    assert_eq!(registry.len(), 1);
    assert!(registry.find(WebhookScope::Production, HttpMethod::Post, "orders").is_ok());
}
