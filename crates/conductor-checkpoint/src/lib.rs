//! Resumable checkpoints for workflow executions.
//!
//! A checkpoint mirrors the completed phase results of one execution and is
//! keyed by a fingerprint of (skill, normalized request, machine), so running
//! the same request again on the same machine finds it.

/// The checkpoint record and its listing summary.
pub mod checkpoint;
/// Fingerprints, request normalization and machine identity.
pub mod fingerprint;
/// Checkpoint persistence: the store trait, file and in-memory stores.
pub mod store;

pub use checkpoint::{Checkpoint, CheckpointSummary};
pub use fingerprint::{fingerprint, machine_id, normalize_request};
pub use store::{CheckpointStore, FileCheckpointStore, InMemoryCheckpointStore};
