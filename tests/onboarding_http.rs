//! Integration tests for the onboarding REST API.
//!
//! Each test spins up an Axum server on a random port backed by a fresh
//! database file and exercises the real HTTP contract.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use onboarding_engine::onboarding::{
    NewField, NewStep, NormalizerRegistry, OnboardingRouteState, SessionManager,
    onboarding_routes,
};
use onboarding_engine::store::LibSqlBackend;

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

struct TestServer {
    port: u16,
    db: Arc<LibSqlBackend>,
    _dir: tempfile::TempDir,
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{path}", self.port)
    }
}

/// Start an Axum server with the two-step fitness catalog.
async fn start_server() -> TestServer {
    let dir = tempfile::tempdir().unwrap();
    let db = Arc::new(
        LibSqlBackend::new_local(&dir.path().join("http.db"))
            .await
            .unwrap(),
    );
    seed_catalog(&db).await;

    let manager = Arc::new(SessionManager::new(Arc::clone(&db), NormalizerRegistry::new()));
    let app = onboarding_routes(OnboardingRouteState { manager });

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    TestServer {
        port,
        db,
        _dir: dir,
    }
}

async fn seed_catalog(db: &LibSqlBackend) {
    let s1 = db
        .insert_step(&NewStep {
            step_key: "s1".into(),
            title: "About you".into(),
            order_index: 1,
            is_active: true,
        })
        .await
        .unwrap();
    db.insert_field(
        s1.step_id,
        &NewField {
            field_key: "age".into(),
            label: "Age".into(),
            input_type: "number".into(),
            required: true,
            order_index: 1,
            metadata: json!({"min": 13, "max": 100}),
        },
    )
    .await
    .unwrap();

    let s2 = db
        .insert_step(&NewStep {
            step_key: "s2".into(),
            title: "Goals".into(),
            order_index: 2,
            is_active: true,
        })
        .await
        .unwrap();
    db.insert_field(
        s2.step_id,
        &NewField {
            field_key: "goal".into(),
            label: "Goal".into(),
            input_type: "select".into(),
            required: true,
            order_index: 1,
            metadata: json!({"options": [{"key": "lose", "label": "Lose"}, {"key": "gain", "label": "Gain"}]}),
        },
    )
    .await
    .unwrap();
}

async fn submit(server: &TestServer, user: &str, step: &str, body: Value) -> reqwest::Response {
    reqwest::Client::new()
        .post(server.url(&format!("/api/onboarding/steps/{step}/answers")))
        .header("x-user-id", user)
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn status(server: &TestServer, user: &str) -> Value {
    let resp = reqwest::Client::new()
        .get(server.url("/api/onboarding/status"))
        .header("x-user-id", user)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    resp.json().await.unwrap()
}

#[tokio::test]
async fn health_endpoint() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;
        let resp = reqwest::get(server.url("/health")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "ok");
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn step_schema_shape() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let resp = reqwest::get(server.url("/api/onboarding/steps/s1")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["step"]["step_key"], "s1");
        assert_eq!(body["step"]["title"], "About you");
        assert!(body["step"]["step_id"].is_i64());
        let field = &body["fields"][0];
        assert_eq!(field["field_key"], "age");
        assert_eq!(field["input_type"], "number");
        assert_eq!(field["required"], true);
        assert_eq!(field["metadata"]["max"], 100);

        let missing = reqwest::get(server.url("/api/onboarding/steps/nope")).await.unwrap();
        assert_eq!(missing.status(), 404);
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn full_flow_over_http() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let initial = status(&server, "u1").await;
        assert_eq!(initial["required"], true);
        assert_eq!(initial["completed"], false);
        assert_eq!(initial["currentStepKey"], "s1");

        let resp = submit(&server, "u1", "s1", json!({"age": 150})).await;
        assert_eq!(resp.status(), 422);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Age must be at most 100");

        let resp = submit(&server, "u1", "s1", json!({"answers": {"age": 30}})).await;
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["nextStepKey"], "s2");
        assert_eq!(body["completed"], false);
        assert_eq!(body["sessionId"], initial["sessionId"]);

        let resp = submit(&server, "u1", "s2", json!({"goal": "bulk"})).await;
        assert_eq!(resp.status(), 422);

        let resp = submit(&server, "u1", "s2", json!({"goal": "gain"})).await;
        assert_eq!(resp.status(), 200);
        let body: Value = resp.json().await.unwrap();
        assert!(body["nextStepKey"].is_null());
        assert_eq!(body["completed"], true);

        let done = status(&server, "u1").await;
        assert_eq!(done["completed"], true);
        assert_eq!(done["required"], false);
        assert!(done["completedAt"].is_string());
        assert!(server.db.onboarding_completed_at("u1").await.unwrap().is_some());
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn rejects_bad_requests() {
    timeout(TEST_TIMEOUT, async {
        let server = start_server().await;

        let resp = submit(&server, "u1", "s1", json!([1, 2])).await;
        assert_eq!(resp.status(), 400);

        let resp = reqwest::Client::new()
            .post(server.url("/api/onboarding/steps/s1/answers"))
            .header("x-user-id", "u1")
            .header("content-type", "application/json")
            .body("{not json")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"], "Answers payload must be a JSON object");

        let resp = reqwest::Client::new()
            .post(server.url("/api/onboarding/steps/s1/answers"))
            .header("x-user-id", "u1")
            .body(r#"{"age": 20}"#)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);

        let resp = submit(&server, "u1", "missing", json!({"age": 20})).await;
        assert_eq!(resp.status(), 404);

        let resp = reqwest::Client::new()
            .get(server.url("/api/onboarding/status"))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 401);

        // Nothing was written for the rejected submissions.
        assert!(server.db.sessions_for_user("u1").await.unwrap().is_empty());
    })
    .await
    .expect("test timed out");
}
