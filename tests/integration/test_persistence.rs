//! Snapshot and cache persistence across engine restarts.

use crate::common::{COOKING_NOTE, RUST_NOTE, TestWorkspace};
use semdex::index::SNAPSHOT_FILE;
use std::sync::atomic::Ordering;

#[tokio::test]
async fn test_index_survives_restart() {
    let workspace = TestWorkspace::new();
    workspace.add_file("notes/rust.md", RUST_NOTE);
    workspace.add_file("cooking.md", COOKING_NOTE);

    {
        let engine = workspace.engine().await;
        engine.reindex_all().await;
        engine.shutdown().await.unwrap();
    }
    assert!(workspace.path().join(".semdex").join(SNAPSHOT_FILE).exists());

    let engine = workspace.engine().await;
    let status = engine.status();
    assert_eq!(status.documents, 2);
    assert!(!status.unsaved_changes);

    let results = engine
        .search("ownership borrowing", None, None)
        .await
        .unwrap();
    assert_eq!(results[0].file_path, "notes/rust.md");
}

#[tokio::test]
async fn test_restart_with_snapshot_embeds_nothing() {
    let workspace = TestWorkspace::new();
    workspace.add_file("notes/rust.md", RUST_NOTE);
    workspace.add_file("cooking.md", COOKING_NOTE);

    {
        let engine = workspace.engine().await;
        engine.reindex_all().await;
        engine.shutdown().await.unwrap();
    }

    let (engine, calls) = workspace.counting_engine().await;
    let report = engine.reindex_all().await;
    assert_eq!(report.unchanged, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_lost_snapshot_is_rebuilt_from_cache() {
    let workspace = TestWorkspace::new();
    workspace.add_file("notes/rust.md", RUST_NOTE);
    workspace.add_file("cooking.md", COOKING_NOTE);

    {
        let engine = workspace.engine().await;
        engine.reindex_all().await;
        engine.shutdown().await.unwrap();
    }
    std::fs::remove_file(workspace.path().join(".semdex").join(SNAPSHOT_FILE)).unwrap();

    let (engine, calls) = workspace.counting_engine().await;
    assert_eq!(engine.status().documents, 0);

    let report = engine.reindex_all().await;
    assert_eq!(report.reused, 2);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(engine.status().documents, 2);
}

#[tokio::test]
async fn test_corrupt_snapshot_starts_empty() {
    let workspace = TestWorkspace::new();
    workspace.add_file("note.md", RUST_NOTE);
    workspace.add_file(".semdex/index.json", "{ not json");

    let engine = workspace.engine().await;
    assert_eq!(engine.status().documents, 0);

    let report = engine.reindex_all().await;
    assert_eq!(report.embedded, 1);
}

#[tokio::test]
async fn test_corrupt_cache_record_is_re_embedded() {
    let workspace = TestWorkspace::new();
    workspace.add_file("note.md", RUST_NOTE);

    {
        let engine = workspace.engine().await;
        engine.reindex_all().await;
        engine.shutdown().await.unwrap();
    }
    std::fs::remove_file(workspace.path().join(".semdex").join(SNAPSHOT_FILE)).unwrap();
    std::fs::write(workspace.cache_record("note.md"), "{\"model\":").unwrap();

    let (engine, calls) = workspace.counting_engine().await;
    let report = engine.reindex_all().await;
    assert_eq!(report.embedded, 1);
    assert!(calls.load(Ordering::SeqCst) > 0);
}

#[tokio::test]
async fn test_switching_model_invalidates_everything() {
    let workspace = TestWorkspace::new();
    workspace.add_file("note.md", RUST_NOTE);

    {
        let engine = workspace.engine().await;
        engine.reindex_all().await;
        engine.shutdown().await.unwrap();
    }

    // A different dimension is a different model identity
    let mut settings = workspace.settings();
    settings.embedding.hashing_dimension = 128;
    let engine = semdex::Engine::open(settings).unwrap();
    engine.init().await.unwrap();
    assert_eq!(engine.status().documents, 0);

    let report = engine.reindex_all().await;
    assert_eq!(report.embedded, 1);
}

#[tokio::test]
async fn test_clear_index_drops_snapshot_contents_and_cache() {
    let workspace = TestWorkspace::new();
    workspace.add_file("note.md", RUST_NOTE);

    let engine = workspace.engine().await;
    engine.reindex_all().await;
    assert!(workspace.cache_record("note.md").exists());

    engine.clear_index().unwrap();
    engine.shutdown().await.unwrap();
    assert!(!workspace.cache_record("note.md").exists());

    let reopened = workspace.engine().await;
    assert_eq!(reopened.status().documents, 0);
}
