use crate::checkpoint::{Checkpoint, CheckpointSummary};
use crate::fingerprint::is_valid_fingerprint;
use async_trait::async_trait;
use conductor_core::{ConductorError, ConductorResult};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Persistence port for checkpoints.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn find(&self, fingerprint: &str) -> ConductorResult<Option<Checkpoint>>;
    async fn save(&self, checkpoint: &Checkpoint) -> ConductorResult<()>;
    /// Summaries ordered by most recently updated first.
    async fn list(&self) -> ConductorResult<Vec<CheckpointSummary>>;
    /// Returns `true` if a checkpoint was removed.
    async fn delete(&self, fingerprint: &str) -> ConductorResult<bool>;
}

fn check_fingerprint(fingerprint: &str) -> ConductorResult<()> {
    if is_valid_fingerprint(fingerprint) {
        Ok(())
    } else {
        Err(ConductorError::Validation(format!(
            "invalid checkpoint fingerprint: {fingerprint}"
        )))
    }
}

fn sort_recent_first(summaries: &mut [CheckpointSummary]) {
    summaries.sort_by(|a, b| {
        b.updated_at
            .cmp(&a.updated_at)
            .then_with(|| a.fingerprint.cmp(&b.fingerprint))
    });
}

/// File-based checkpoint store: one JSON file per fingerprint.
///
/// Writes for the same fingerprint are serialized through a per-key async
/// mutex and land atomically via a temp file and rename. Different
/// fingerprints never contend.
pub struct FileCheckpointStore {
    dir: PathBuf,
    locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl FileCheckpointStore {
    /// Open a store in `dir`, creating the directory if needed.
    pub async fn new(dir: PathBuf) -> ConductorResult<Self> {
        tokio::fs::create_dir_all(&dir).await.map_err(|e| {
            ConductorError::Checkpoint(format!(
                "Failed to create checkpoint dir {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self {
            dir,
            locks: parking_lot::Mutex::new(HashMap::new()),
        })
    }

    fn checkpoint_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.json"))
    }

    fn key_lock(&self, fingerprint: &str) -> Arc<Mutex<()>> {
        self.locks
            .lock()
            .entry(fingerprint.to_string())
            .or_default()
            .clone()
    }

    async fn read(&self, path: PathBuf) -> ConductorResult<Option<Checkpoint>> {
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let checkpoint: Checkpoint = serde_json::from_str(&data).map_err(|e| {
            ConductorError::Checkpoint(format!(
                "Failed to parse checkpoint {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Some(checkpoint))
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpointStore {
    async fn find(&self, fingerprint: &str) -> ConductorResult<Option<Checkpoint>> {
        check_fingerprint(fingerprint)?;
        self.read(self.checkpoint_path(fingerprint)).await
    }

    async fn save(&self, checkpoint: &Checkpoint) -> ConductorResult<()> {
        check_fingerprint(&checkpoint.fingerprint)?;
        let lock = self.key_lock(&checkpoint.fingerprint);
        let _guard = lock.lock().await;

        let path = self.checkpoint_path(&checkpoint.fingerprint);
        let tmp = self.dir.join(format!("{}.json.tmp", checkpoint.fingerprint));
        let json = serde_json::to_string_pretty(checkpoint)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;

        debug!(
            fingerprint = %checkpoint.fingerprint,
            completed = checkpoint.completed_count(),
            "Checkpoint saved"
        );
        Ok(())
    }

    async fn list(&self) -> ConductorResult<Vec<CheckpointSummary>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut summaries = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_checkpoint = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(|n| n.strip_suffix(".json"))
                .is_some_and(is_valid_fingerprint);
            if !is_checkpoint {
                continue;
            }
            match self.read(path.clone()).await {
                Ok(Some(cp)) => summaries.push(cp.summary()),
                Ok(None) => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint");
                }
            }
        }
        sort_recent_first(&mut summaries);
        Ok(summaries)
    }

    async fn delete(&self, fingerprint: &str) -> ConductorResult<bool> {
        check_fingerprint(fingerprint)?;
        let lock = self.key_lock(fingerprint);
        let _guard = lock.lock().await;

        match tokio::fs::remove_file(self.checkpoint_path(fingerprint)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Checkpoint store held in memory, for embedding and tests.
pub struct InMemoryCheckpointStore {
    checkpoints: RwLock<HashMap<String, Checkpoint>>,
}

impl InMemoryCheckpointStore {
    /// An empty store.
    pub fn new() -> Self {
        Self {
            checkpoints: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn find(&self, fingerprint: &str) -> ConductorResult<Option<Checkpoint>> {
        Ok(self.checkpoints.read().await.get(fingerprint).cloned())
    }

    async fn save(&self, checkpoint: &Checkpoint) -> ConductorResult<()> {
        self.checkpoints
            .write()
            .await
            .insert(checkpoint.fingerprint.clone(), checkpoint.clone());
        Ok(())
    }

    async fn list(&self) -> ConductorResult<Vec<CheckpointSummary>> {
        let mut summaries: Vec<_> = self
            .checkpoints
            .read()
            .await
            .values()
            .map(Checkpoint::summary)
            .collect();
        sort_recent_first(&mut summaries);
        Ok(summaries)
    }

    async fn delete(&self, fingerprint: &str) -> ConductorResult<bool> {
        Ok(self.checkpoints.write().await.remove(fingerprint).is_some())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::fingerprint::fingerprint;

    #[tokio::test]
    async fn test_in_memory_store_round_trip() {
        let store = InMemoryCheckpointStore::new();
        let fp = fingerprint("s", "req", "host");
        store
            .save(&Checkpoint::new(&fp, "s", "0.1.0", "req", "host", 2))
            .await
            .unwrap();

        assert!(store.find(&fp).await.unwrap().is_some());
        assert_eq!(store.list().await.unwrap().len(), 1);
        assert!(store.delete(&fp).await.unwrap());
        assert!(!store.delete(&fp).await.unwrap());
    }

    #[tokio::test]
    async fn test_file_store_rejects_bad_fingerprint() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(tmp.path().to_path_buf())
            .await
            .unwrap();
        let err = store.find("../secrets").await.unwrap_err();
        assert!(matches!(err, ConductorError::Validation(_)));
    }
}
