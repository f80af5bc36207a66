//! Live filesystem watching. Polls with a deadline since event delivery is asynchronous.

use crate::common::{RUST_NOTE, TestWorkspace};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

async fn wait_for<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_indexes_created_and_deleted_files() {
    let workspace = TestWorkspace::new();
    let engine = workspace.engine().await;
    let shutdown = CancellationToken::new();
    let watcher = engine.watcher().unwrap();
    let task = tokio::spawn(watcher.run(engine.coordinator().clone(), shutdown.clone()));

    workspace.add_file("rust.md", RUST_NOTE);
    assert!(
        wait_for(|| engine.status().documents == 1).await,
        "created file was never indexed"
    );

    workspace.remove_file("rust.md");
    assert!(
        wait_for(|| engine.status().documents == 0).await,
        "deleted file stayed in the index"
    );

    shutdown.cancel();
    task.await.unwrap();
    engine.shutdown().await.unwrap();
}
