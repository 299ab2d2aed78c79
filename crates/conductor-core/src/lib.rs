//! Core types and error definitions for the Conductor workflow engine.
//!
//! This crate provides the foundational types shared across all Conductor crates:
//! the error taxonomy, the skill/phase model, per-phase results, routing profiles,
//! and the message type exchanged with language-model providers.
//!
//! # Main types
//!
//! - [`ConductorError`] — Unified error enum for all Conductor subsystems.
//! - [`ConductorResult`] — Convenience alias for `Result<T, ConductorError>`.
//! - [`Skill`] / [`Phase`] — A workflow definition and its steps.
//! - [`PhaseResult`] / [`PhaseStatus`] — Outcome of running one phase.
//! - [`RoutingProfile`] — Cost/quality tradeoff used to pick a provider.
//! - [`Message`] — A single chat message sent to a provider.

/// Approval types for confirming an execution plan before it runs.
pub mod approval;
/// Chat message types.
pub mod message;
/// Routing profile names.
pub mod profile;
/// Per-phase execution results.
pub mod result;
/// Skill and phase definitions.
pub mod skill;

pub use message::{Message, Role};
pub use profile::RoutingProfile;
pub use result::{PhaseResult, PhaseStatus};
pub use skill::{FailurePolicy, Phase, Skill, SkillRouting};

// --- Error types ---

/// Top-level error type for the Conductor engine.
///
/// Variants follow the engine's error taxonomy: validation errors are rejected
/// before anything runs, provider errors advance the fallback chain, dependency
/// failures propagate as skipped phases, and checkpoint conflicts always need an
/// explicit decision from the caller.
#[derive(Debug, thiserror::Error)]
pub enum ConductorError {
    /// Unknown skill or phase, invalid profile, malformed phase graph,
    /// or no usable providers.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A provider call failed (network, timeout, authentication, rate limit).
    #[error("Provider error: {0}")]
    Provider(String),

    /// A phase could not run because one of its dependencies did not complete.
    #[error("Dependency failure: {0}")]
    DependencyFailure(String),

    /// An incomplete checkpoint already exists for this fingerprint.
    #[error("Checkpoint conflict: {0}")]
    CheckpointConflict(String),

    /// Checkpoint persistence failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// The workflow or a provider call was cancelled.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from an outbound HTTP request.
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConductorError {
    /// Short machine-readable name of the error class, used in JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            ConductorError::Validation(_) => "validation",
            ConductorError::Provider(_) => "provider",
            ConductorError::DependencyFailure(_) => "dependency_failure",
            ConductorError::CheckpointConflict(_) => "checkpoint_conflict",
            ConductorError::Checkpoint(_) => "checkpoint",
            ConductorError::Cancelled(_) => "cancelled",
            ConductorError::Config(_) => "config",
            ConductorError::Http(_) => "http",
            ConductorError::Json(_) => "json",
            ConductorError::Io(_) => "io",
        }
    }
}

/// A convenience `Result` alias using [`ConductorError`].
pub type ConductorResult<T> = Result<T, ConductorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind() {
        assert_eq!(ConductorError::Validation("x".into()).kind(), "validation");
        assert_eq!(
            ConductorError::CheckpointConflict("x".into()).kind(),
            "checkpoint_conflict"
        );
    }

    #[test]
    fn test_error_display() {
        let err = ConductorError::Provider("429 Too Many Requests".into());
        assert_eq!(err.to_string(), "Provider error: 429 Too Many Requests");
    }
}
