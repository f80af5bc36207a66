//! JSON-lines protocol against a live engine.

use crate::common::{COOKING_NOTE, RUST_NOTE, TestWorkspace};
use semdex::protocol::INVALID_REQUEST;
use semdex::{ProtocolServer, Request, Response};
use serde_json::Value;
use std::sync::Arc;

async fn exchange(server: &ProtocolServer, requests: &[&str]) -> Vec<Value> {
    let input = requests.join("\n");
    let mut output = Vec::new();
    server
        .serve(input.as_bytes(), &mut output)
        .await
        .expect("serve failed");

    String::from_utf8(output)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn test_search_session_over_json_lines() {
    let workspace = TestWorkspace::new();
    workspace.add_file("notes/rust.md", RUST_NOTE);
    workspace.add_file("cooking.md", COOKING_NOTE);
    let server = ProtocolServer::with_engine(Arc::new(workspace.engine().await));

    let responses = exchange(
        &server,
        &[
            r#"{"type":"reindexAll"}"#,
            r#"{"type":"search","query":"ownership borrowing","limit":3}"#,
            r#"{"type":"status"}"#,
        ],
    )
    .await;
    assert_eq!(responses.len(), 3);

    assert_eq!(responses[0]["type"], "ack");
    assert_eq!(responses[0]["report"]["embedded"], 2);

    assert_eq!(responses[1]["type"], "searchResults");
    let first = &responses[1]["results"][0];
    assert_eq!(first["filePath"], "notes/rust.md");
    assert!(first["score"].as_f64().unwrap() > 0.3);
    assert!(first["range"].is_array());
    assert!(first["snippet"].as_str().unwrap().contains("ownership"));

    assert_eq!(responses[2]["type"], "status");
    assert_eq!(responses[2]["documents"], 2);
    assert_eq!(responses[2]["modelReady"], true);
}

#[tokio::test]
async fn test_clear_index_request_empties_results() {
    let workspace = TestWorkspace::new();
    workspace.add_file("note.md", RUST_NOTE);
    let engine = Arc::new(workspace.engine().await);
    engine.reindex_all().await;
    let server = ProtocolServer::with_engine(Arc::clone(&engine));

    let responses = exchange(
        &server,
        &[
            r#"{"type":"clearIndex"}"#,
            r#"{"type":"search","query":"ownership borrowing"}"#,
        ],
    )
    .await;

    assert_eq!(responses[0], serde_json::json!({"type": "ack"}));
    assert_eq!(responses[1]["results"], Value::Array(vec![]));
}

#[tokio::test]
async fn test_search_before_model_load_reports_retryable_error() {
    let workspace = TestWorkspace::new();
    let engine = semdex::Engine::open(workspace.settings()).unwrap();
    let server = ProtocolServer::with_engine(Arc::new(engine));

    let responses = exchange(&server, &[r#"{"type":"search","query":"anything"}"#]).await;

    assert_eq!(responses[0]["type"], "error");
    assert_eq!(responses[0]["code"], "MODEL_NOT_READY");
    assert_eq!(responses[0]["retryable"], true);
    assert_eq!(responses[0]["results"], Value::Array(vec![]));
}

#[tokio::test]
async fn test_engine_attached_after_startup() {
    let workspace = TestWorkspace::new();
    workspace.add_file("note.md", RUST_NOTE);
    let server = ProtocolServer::new();

    let before = server.handle_line(r#"{"type":"status"}"#).await;
    assert!(before.is_error());

    let engine = Arc::new(workspace.engine().await);
    assert!(server.attach(Arc::clone(&engine)));
    assert!(!server.attach(engine));

    match server.handle_line(r#"{"type":"reindexAll"}"#).await {
        Response::Ack { report: Some(report) } => assert_eq!(report.embedded, 1),
        other => panic!("unexpected response: {other:?}"),
    }
}

#[tokio::test]
async fn test_engine_handle_matches_protocol() {
    let workspace = TestWorkspace::new();
    workspace.add_file("note.md", RUST_NOTE);
    let engine = workspace.engine().await;
    engine.reindex_all().await;

    let response = engine
        .handle(Request::Search {
            query: "rust ownership rules".to_string(),
            limit: Some(1),
            path_prefix: None,
        })
        .await;
    match response {
        Response::SearchResults { results } => {
            assert_eq!(results.len(), 1);
            assert_eq!(results[0].file_path, "note.md");
        }
        other => panic!("unexpected response: {other:?}"),
    }

    let bad = ProtocolServer::new().handle_line("[]").await;
    match bad {
        Response::Error { code, .. } => assert_eq!(code, INVALID_REQUEST),
        other => panic!("unexpected response: {other:?}"),
    }
}
