#![allow(clippy::unwrap_used, clippy::expect_used)]

use conductor_checkpoint::{fingerprint, Checkpoint, CheckpointStore, FileCheckpointStore};
use conductor_core::{ConductorError, Phase, PhaseResult, PhaseStatus};
use std::sync::Arc;

/// Helper: create a FileCheckpointStore in a temp directory.
async fn temp_store() -> (FileCheckpointStore, tempfile::TempDir) {
    let tmp = tempfile::tempdir().unwrap();
    let store = FileCheckpointStore::new(tmp.path().join("checkpoints"))
        .await
        .unwrap();
    (store, tmp)
}

fn completed(id: &str, output: &str) -> PhaseResult {
    let mut result = PhaseResult::pending(&Phase::new(id, "prompt"));
    result.status = PhaseStatus::Completed;
    result.output = output.to_string();
    result.input_tokens = 10;
    result.output_tokens = 5;
    result
}

fn new_checkpoint(request: &str) -> Checkpoint {
    let fp = fingerprint("code-review", request, "test-host");
    Checkpoint::new(fp, "code-review", "1.0.0", request, "test-host", 3)
}

#[tokio::test]
async fn test_save_and_find_checkpoint() {
    let (store, _tmp) = temp_store().await;
    let mut cp = new_checkpoint("src/lib.rs");
    cp.record(&completed("patterns", "builder pattern"));
    cp.finish_batch(0);

    store.save(&cp).await.unwrap();

    let loaded = store.find(&cp.fingerprint).await.unwrap().unwrap();
    assert_eq!(loaded.skill_id, "code-review");
    assert_eq!(loaded.completed("patterns").unwrap().output, "builder pattern");
    assert_eq!(loaded.last_completed_batch, Some(0));
    assert!(!loaded.complete);
}

#[tokio::test]
async fn test_find_nonexistent_returns_none() {
    let (store, _tmp) = temp_store().await;
    let fp = fingerprint("code-review", "never saved", "test-host");
    assert!(store.find(&fp).await.unwrap().is_none());
}

#[tokio::test]
async fn test_update_overwrites_previous_state() {
    let (store, _tmp) = temp_store().await;
    let mut cp = new_checkpoint("src/lib.rs");
    store.save(&cp).await.unwrap();

    cp.record(&completed("patterns", "p"));
    cp.record(&completed("security", "s"));
    cp.record(&completed("report", "final report"));
    cp.mark_complete("final report");
    store.save(&cp).await.unwrap();

    let loaded = store.find(&cp.fingerprint).await.unwrap().unwrap();
    assert!(loaded.complete);
    assert_eq!(loaded.final_output.as_deref(), Some("final report"));
    assert_eq!(loaded.completed_count(), 3);
}

#[tokio::test]
async fn test_list_and_delete() {
    let (store, _tmp) = temp_store().await;
    let a = new_checkpoint("request a");
    let b = new_checkpoint("request b");
    store.save(&a).await.unwrap();
    store.save(&b).await.unwrap();

    let listed = store.list().await.unwrap();
    assert_eq!(listed.len(), 2);
    assert!(listed.iter().all(|s| s.total_phases == 3));

    assert!(store.delete(&a.fingerprint).await.unwrap());
    assert!(!store.delete(&a.fingerprint).await.unwrap());

    let listed = store.list().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].fingerprint, b.fingerprint);
}

#[tokio::test]
async fn test_list_ignores_foreign_files() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("checkpoints");
    let store = FileCheckpointStore::new(dir.clone()).await.unwrap();
    store.save(&new_checkpoint("x")).await.unwrap();

    std::fs::write(dir.join("notes.txt"), "hello").unwrap();
    std::fs::write(dir.join("not-a-fingerprint.json"), "{}").unwrap();

    assert_eq!(store.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_corrupted_checkpoint_is_checkpoint_error() {
    let tmp = tempfile::tempdir().unwrap();
    let dir = tmp.path().join("checkpoints");
    let store = FileCheckpointStore::new(dir.clone()).await.unwrap();

    let cp = new_checkpoint("y");
    std::fs::write(dir.join(format!("{}.json", cp.fingerprint)), "{ not json").unwrap();

    let err = store.find(&cp.fingerprint).await.unwrap_err();
    assert!(matches!(err, ConductorError::Checkpoint(_)));
    // list skips it instead of failing
    assert!(store.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_concurrent_saves_same_fingerprint() {
    let (store, _tmp) = temp_store().await;
    let store = Arc::new(store);
    let base = new_checkpoint("busy request");

    let mut handles = Vec::new();
    for i in 0..16 {
        let store = store.clone();
        let mut cp = base.clone();
        handles.push(tokio::spawn(async move {
            cp.record(&completed(&format!("phase-{i}"), "out"));
            store.save(&cp).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Whatever write landed last, the file is a whole checkpoint.
    let loaded = store.find(&base.fingerprint).await.unwrap().unwrap();
    assert_eq!(loaded.completed_count(), 1);
}

#[tokio::test]
async fn test_distinct_fingerprints_are_independent() {
    let (store, _tmp) = temp_store().await;
    let store = Arc::new(store);

    let mut handles = Vec::new();
    for i in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            let cp = new_checkpoint(&format!("request {i}"));
            store.save(&cp).await.map(|_| cp.fingerprint)
        }));
    }

    let mut fingerprints = Vec::new();
    for handle in handles {
        fingerprints.push(handle.await.unwrap().unwrap());
    }
    fingerprints.sort();
    fingerprints.dedup();
    assert_eq!(fingerprints.len(), 8);
    assert_eq!(store.list().await.unwrap().len(), 8);
}
