//! Approval types for confirming an execution plan before it runs.
//!
//! These types live in `conductor-core` so that the engine can describe what is
//! about to run and any front end (terminal prompt, web hook) can decide.

use crate::ConductorResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A request sent to a human reviewer before a planned workflow runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Skill name.
    pub skill: String,
    /// Routing profile in effect.
    pub profile: String,
    /// Number of phases.
    pub phase_count: usize,
    /// Number of batches.
    pub batch_count: usize,
    /// Estimated input plus output tokens.
    pub estimated_tokens: u64,
    /// Estimated spend.
    pub estimated_cost: f64,
    /// Rendered plan summary shown to the reviewer.
    pub summary: String,
}

/// The decision made by a human reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalDecision {
    /// The plan may run.
    pub approved: bool,
    /// Reviewer's note, usually given on rejection.
    pub reason: Option<String>,
}

impl ApprovalDecision {
    /// An approval with no reason attached.
    pub fn approve() -> Self {
        Self {
            approved: true,
            reason: None,
        }
    }

    /// A rejection with an optional reason.
    pub fn reject(reason: Option<String>) -> Self {
        Self {
            approved: false,
            reason,
        }
    }
}

/// Channel through which approval requests are sent and decisions are received.
#[async_trait]
pub trait ApprovalChannel: Send + Sync {
    async fn request_approval(&self, request: ApprovalRequest) -> ConductorResult<ApprovalDecision>;
}

/// Approves every request. Used for non-interactive runs.
pub struct AutoApprove;

#[async_trait]
impl ApprovalChannel for AutoApprove {
    async fn request_approval(&self, _request: ApprovalRequest) -> ConductorResult<ApprovalDecision> {
        Ok(ApprovalDecision::approve())
    }
}
