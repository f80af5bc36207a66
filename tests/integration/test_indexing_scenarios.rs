//! End-to-end indexing behaviour through the engine facade.

use crate::common::{COOKING_NOTE, GARDEN_NOTE, RUST_NOTE, TestWorkspace};
use semdex::{ChangeEvent, codec};
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_new_file_is_indexed_then_found() {
    let workspace = TestWorkspace::new();
    workspace.add_file("notes/rust.md", RUST_NOTE);
    workspace.add_file("cooking.md", COOKING_NOTE);
    let engine = workspace.engine().await;

    let report = engine.reindex_all().await;
    assert_eq!(report.embedded, 2);
    assert_eq!(report.failed, 0);

    let results = engine
        .search("ownership borrowing", None, None)
        .await
        .unwrap();
    assert!(!results.is_empty());
    assert_eq!(results[0].file_path, "notes/rust.md");
    assert!(results[0].snippet.contains("ownership"));
    assert!(!results[0].snippet.contains("title:"));
    assert!(results.iter().all(|r| r.file_path != "cooking.md"));

    // A file created later goes through the coordinator
    let created = workspace.add_file("garden.md", GARDEN_NOTE);
    let report = engine.index_paths(&[created]).await;
    assert_eq!(report.embedded, 1);

    let results = engine.search("seedlings mulch", None, None).await.unwrap();
    assert_eq!(results[0].file_path, "garden.md");
}

#[tokio::test]
async fn test_deleted_file_leaves_index_and_cache() {
    let workspace = TestWorkspace::new();
    let rust = workspace.add_file("notes/rust.md", RUST_NOTE);
    workspace.add_file("cooking.md", COOKING_NOTE);
    let engine = workspace.engine().await;
    engine.reindex_all().await;
    assert!(workspace.cache_record("notes/rust.md").exists());

    workspace.remove_file("notes/rust.md");
    engine.coordinator().handle(ChangeEvent::Deleted(rust));

    let results = engine
        .search("ownership borrowing", None, None)
        .await
        .unwrap();
    assert!(results.iter().all(|r| r.file_path != "notes/rust.md"));
    assert!(!workspace.cache_record("notes/rust.md").exists());
    assert_eq!(engine.status().documents, 1);
}

#[tokio::test]
async fn test_deleted_directory_removes_every_document_below() {
    let workspace = TestWorkspace::new();
    workspace.add_file("notes/rust.md", RUST_NOTE);
    workspace.add_file("notes/garden.md", GARDEN_NOTE);
    workspace.add_file("cooking.md", COOKING_NOTE);
    let engine = workspace.engine().await;
    engine.reindex_all().await;
    assert_eq!(engine.status().documents, 3);

    std::fs::remove_dir_all(workspace.path().join("notes")).unwrap();
    engine
        .coordinator()
        .handle(ChangeEvent::Deleted(workspace.path().join("notes")));

    assert_eq!(engine.status().documents, 1);
}

#[tokio::test]
async fn test_rescan_drops_documents_that_vanished() {
    let workspace = TestWorkspace::new();
    workspace.add_file("notes/rust.md", RUST_NOTE);
    workspace.add_file("cooking.md", COOKING_NOTE);
    let engine = workspace.engine().await;
    engine.reindex_all().await;

    workspace.remove_file("cooking.md");
    let report = engine.reindex_all().await;

    assert_eq!(report.removed, 1);
    assert_eq!(report.unchanged, 1);
    assert_eq!(engine.status().documents, 1);
}

#[tokio::test]
async fn test_content_change_invalidates_cache() {
    let workspace = TestWorkspace::new();
    let path = workspace.add_file("note.md", RUST_NOTE);
    let (engine, calls) = workspace.counting_engine().await;
    engine.reindex_all().await;
    let first_pass = calls.load(Ordering::SeqCst);
    assert!(first_pass > 0);

    workspace.add_file("note.md", COOKING_NOTE);
    let report = engine.index_paths(&[path]).await;
    assert_eq!(report.embedded, 1);
    assert!(calls.load(Ordering::SeqCst) > first_pass);

    let record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(workspace.cache_record("note.md")).unwrap())
            .unwrap();
    assert_eq!(record["contentHash"], codec::hash(COOKING_NOTE));

    let results = engine.search("pasta tomato sauce", None, None).await.unwrap();
    assert_eq!(results[0].file_path, "note.md");
    let stale = engine
        .search("ownership borrowing", None, None)
        .await
        .unwrap();
    assert!(stale.is_empty());
}

#[tokio::test]
async fn test_reindex_of_unchanged_workspace_embeds_nothing() {
    let workspace = TestWorkspace::new();
    workspace.add_file("notes/rust.md", RUST_NOTE);
    workspace.add_file("cooking.md", COOKING_NOTE);
    let (engine, calls) = workspace.counting_engine().await;

    engine.reindex_all().await;
    let after_first = calls.load(Ordering::SeqCst);
    let chunks = engine.status().chunks;

    let report = engine.reindex_all().await;
    assert_eq!(report.unchanged, 2);
    assert_eq!(report.embedded, 0);
    assert_eq!(calls.load(Ordering::SeqCst), after_first);
    assert_eq!(engine.status().chunks, chunks);
}

#[tokio::test]
async fn test_burst_of_changes_is_coalesced() {
    let workspace = TestWorkspace::new();
    let path = workspace.add_file("note.md", RUST_NOTE);
    let engine = workspace.engine().await;

    for _ in 0..5 {
        engine
            .coordinator()
            .handle(ChangeEvent::Changed(path.clone()));
    }
    assert_eq!(engine.coordinator().pending_count(), 1);

    let report = engine.coordinator().flush_pending().await;
    assert_eq!(report.embedded, 1);
    assert_eq!(engine.coordinator().pending_count(), 0);
}

#[tokio::test]
async fn test_path_prefix_and_limit_filter_results() {
    let workspace = TestWorkspace::new();
    workspace.add_file("notes/rust.md", RUST_NOTE);
    workspace.add_file("archive/rust.md", RUST_NOTE);
    let engine = workspace.engine().await;
    engine.reindex_all().await;

    let all = engine
        .search("ownership borrowing", None, None)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);

    let archived = engine
        .search("ownership borrowing", None, Some("archive/"))
        .await
        .unwrap();
    assert_eq!(archived.len(), 1);
    assert_eq!(archived[0].file_path, "archive/rust.md");

    let limited = engine
        .search("ownership borrowing", Some(1), None)
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
}

#[tokio::test]
async fn test_ignored_and_non_document_files_are_skipped() {
    let workspace = TestWorkspace::new();
    workspace.add_file(".gitignore", "drafts/\n");
    workspace.add_file("drafts/wip.md", RUST_NOTE);
    workspace.add_file("src/main.rs", "fn main() {}\n");
    workspace.add_file("kept.md", RUST_NOTE);
    let engine = workspace.engine().await;

    let report = engine.reindex_all().await;
    assert_eq!(report.embedded, 1);
    assert_eq!(engine.status().documents, 1);
}

#[tokio::test]
async fn test_unreadable_snippet_is_empty_not_an_error() {
    let workspace = TestWorkspace::new();
    workspace.add_file("note.md", RUST_NOTE);
    let engine = workspace.engine().await;
    engine.reindex_all().await;

    // Gone from disk but not yet processed by the coordinator
    workspace.remove_file("note.md");
    let results = engine
        .search("ownership borrowing", None, None)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].snippet.is_empty());
}
