//! Integration tests for the HTTP run surface.
//!
//! Each test spins up an Axum server on a random port backed by scripted
//! capabilities and exercises the real REST / SSE contract with reqwest.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use inbox_triage::config::EngineConfig;
use inbox_triage::ports::scripted::Scripted;
use inbox_triage::server::{AppState, RunRegistry, routes};
use inbox_triage::workflow::{Category, EmailRecord, WorkflowEngine};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn email(id: &str, body: &str) -> EmailRecord {
    EmailRecord {
        id: id.into(),
        sender: format!("client-{id}@client.example"),
        subject: "Deposit instruction".into(),
        body: body.into(),
        ..Default::default()
    }
}

/// Start an Axum server on a random port, return its base URL.
async fn start_server(scripted: &Scripted, webhook: bool) -> String {
    let engine = Arc::new(WorkflowEngine::new(
        scripted.capabilities(),
        EngineConfig::default(),
    ));
    let state = AppState {
        engine,
        registry: Arc::new(RunRegistry::new()),
    };
    let app = routes(state, webhook);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://127.0.0.1:{port}")
}

#[tokio::test]
async fn health_reports_ok() {
    let scripted = Scripted::new(Vec::new(), Category::MaturityRepayment, 1);
    let base = start_server(&scripted, false).await;

    let body: Value = timeout(TEST_TIMEOUT, async {
        reqwest::get(format!("{base}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    })
    .await
    .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn graph_lists_nodes_and_edges() {
    let scripted = Scripted::new(Vec::new(), Category::MaturityRepayment, 1);
    let base = start_server(&scripted, false).await;

    let body: Value = reqwest::get(format!("{base}/graph"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let nodes = body["nodes"].as_array().unwrap();
    assert!(nodes.iter().any(|n| n == "load_inbox"));
    assert!(nodes.iter().any(|n| n == "end"));
    assert!(!body["edges"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn invoke_with_seed_returns_final_state() {
    let scripted = Scripted::new(vec![email("fetched", "Repay")], Category::MaturityRepayment, 1);
    let base = start_server(&scripted, false).await;
    let client = reqwest::Client::new();

    let resp = timeout(
        TEST_TIMEOUT,
        client
            .post(format!("{base}/invoke"))
            .json(&json!({ "input": { "queue": [{ "id": "seeded", "body": "Reinvest" }] } }))
            .send(),
    )
    .await
    .unwrap()
    .unwrap();
    assert!(resp.status().is_success());

    let report: Value = resp.json().await.unwrap();
    let outcomes = report["state"]["outcomes"].as_array().unwrap();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0]["email_id"], "seeded");
    assert_eq!(outcomes[0]["outcome"], "replied");
    assert_eq!(report["cancelled"], false);

    // The finished run is visible through both status routes.
    let run_id = report["run_id"].as_str().unwrap();
    let status: Value = client
        .get(format!("{base}/runs/{run_id}"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["phase"], "completed");
    assert_eq!(status["node"], "end");
    assert_eq!(status["replied"], 2);
    assert_eq!(status["queue_remaining"], 0);

    let latest: Value = client
        .get(format!("{base}/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(latest["run_id"], run_id);
}

#[tokio::test]
async fn invoke_with_source_outage_is_bad_gateway() {
    let scripted = Scripted::new(Vec::new(), Category::MaturityRepayment, 1);
    scripted.inbox.log.fail_next(1);
    let base = start_server(&scripted, false).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/invoke"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_GATEWAY);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("unavailable"));
    assert!(body["run_id"].is_string());
}

#[tokio::test]
async fn invoke_rejects_malformed_body() {
    let scripted = Scripted::new(Vec::new(), Category::MaturityRepayment, 1);
    let base = start_server(&scripted, false).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/invoke"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_before_any_run_is_not_found() {
    let scripted = Scripted::new(Vec::new(), Category::MaturityRepayment, 1);
    let base = start_server(&scripted, false).await;

    let resp = reqwest::get(format!("{base}/status")).await.unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancel_unknown_run_is_not_found() {
    let scripted = Scripted::new(Vec::new(), Category::MaturityRepayment, 1);
    let base = start_server(&scripted, false).await;

    let resp = reqwest::Client::new()
        .post(format!("{base}/runs/{}/cancel", uuid::Uuid::new_v4()))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn stream_emits_node_events_then_report() {
    let scripted = Scripted::new(vec![email("1", "Repay")], Category::MaturityRepayment, 1);
    let base = start_server(&scripted, false).await;

    let text = timeout(TEST_TIMEOUT, async {
        reqwest::Client::new()
            .post(format!("{base}/stream"))
            .send()
            .await
            .unwrap()
            .text()
            .await
            .unwrap()
    })
    .await
    .unwrap();

    let started = text.find("event: run_started").unwrap();
    let first_node = text.find("event: node").unwrap();
    let report = text.find("event: report").unwrap();
    assert!(started < first_node);
    assert!(first_node < report);
    assert!(text.contains("Processing email"));
    assert!(text.contains("\"replied\""));
}

#[tokio::test]
async fn webhook_route_only_in_webhook_mode() {
    let scripted = Scripted::new(vec![email("1", "Repay")], Category::MaturityRepayment, 1);

    let disabled = start_server(&scripted, false).await;
    let resp = reqwest::Client::new()
        .post(format!("{disabled}/webhook/inbox"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    let enabled = start_server(&scripted, true).await;
    let client = reqwest::Client::new();
    let resp = client
        .post(format!("{enabled}/webhook/inbox"))
        .body(r#"{"history_id": "1234"}"#)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::ACCEPTED);
    let body: Value = resp.json().await.unwrap();
    let run_id = body["run_id"].as_str().unwrap().to_string();

    // The run finishes in the background.
    let finished = timeout(TEST_TIMEOUT, async {
        loop {
            let status: Value = client
                .get(format!("{enabled}/runs/{run_id}"))
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if status["phase"] == "completed" {
                return status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(finished["replied"], 1);
    assert_eq!(scripted.dispatcher.sent().len(), 1);
}
