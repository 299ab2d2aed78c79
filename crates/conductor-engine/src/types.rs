use chrono::{DateTime, Utc};
use conductor_core::approval::ApprovalRequest;
use conductor_core::{PhaseResult, PhaseStatus, RoutingProfile};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Planned execution of one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhasePlan {
    /// Phase id within the skill.
    pub phase_id: String,
    /// Display name.
    pub name: String,
    /// Ids of the phases this one waits for.
    pub depends_on: Vec<String>,
    /// Routing profile in effect for the phase.
    pub profile: RoutingProfile,
    /// Model the phase is routed to.
    pub model_id: String,
    /// Provider the phase is routed to.
    pub provider: String,
    /// The provider is not the profile's first choice.
    pub is_fallback: bool,
    /// Estimated prompt tokens.
    pub estimated_input_tokens: u64,
    /// Estimated completion tokens.
    pub estimated_output_tokens: u64,
    /// Estimated spend; zero for local providers.
    pub estimated_cost: f64,
    /// Index of the batch this phase runs in.
    pub batch: usize,
}

/// Immutable preview of how a skill will run: batches, providers and estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Id of the planned skill.
    pub skill_id: String,
    /// Name of the planned skill.
    pub skill_name: String,
    /// Version of the planned skill.
    pub skill_version: String,
    /// The request the plan was made for.
    pub input: String,
    /// Caller profile, or the skill default when the caller picked none.
    pub profile: RoutingProfile,
    /// Phases in plan order: batch index, then declaration order.
    pub phases: Vec<PhasePlan>,
    /// Estimated prompt tokens.
    pub estimated_input_tokens: u64,
    /// Estimated completion tokens.
    pub estimated_output_tokens: u64,
    /// Estimated spend; zero for local providers.
    pub estimated_cost: f64,
    /// Non-fatal observations, e.g. a phase routed to a fallback provider.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// When the plan was made.
    pub created_at: DateTime<Utc>,
}

impl ExecutionPlan {
    /// Number of batches.
    pub fn batch_count(&self) -> usize {
        self.phases.iter().map(|p| p.batch + 1).max().unwrap_or(0)
    }

    /// Phases grouped by batch index.
    pub fn batches(&self) -> Vec<Vec<&PhasePlan>> {
        let mut batches: Vec<Vec<&PhasePlan>> = vec![Vec::new(); self.batch_count()];
        for phase in &self.phases {
            batches[phase.batch].push(phase);
        }
        batches
    }

    /// Plan entry for one phase.
    pub fn phase(&self, phase_id: &str) -> Option<&PhasePlan> {
        self.phases.iter().find(|p| p.phase_id == phase_id)
    }

    /// Estimated input plus output tokens.
    pub fn estimated_tokens(&self) -> u64 {
        self.estimated_input_tokens + self.estimated_output_tokens
    }

    /// Multi-line human-readable rendering used for previews and approval.
    pub fn summary(&self) -> String {
        let mut out = format!(
            "Plan for '{}' v{} (profile: {})\n",
            self.skill_name, self.skill_version, self.profile
        );
        for (index, batch) in self.batches().iter().enumerate() {
            out.push_str(&format!("Batch {index}:\n"));
            for phase in batch {
                let fallback = if phase.is_fallback { " [fallback]" } else { "" };
                out.push_str(&format!(
                    "  - {} -> {}/{}{} (~{} in / ~{} out tokens, ${:.4})\n",
                    phase.name,
                    phase.provider,
                    phase.model_id,
                    fallback,
                    phase.estimated_input_tokens,
                    phase.estimated_output_tokens,
                    phase.estimated_cost
                ));
            }
        }
        out.push_str(&format!(
            "Total: ~{} tokens, estimated cost ${:.4}",
            self.estimated_tokens(),
            self.estimated_cost
        ));
        for warning in &self.warnings {
            out.push_str(&format!("\nwarning: {warning}"));
        }
        out
    }

    /// Describe the plan to an approval channel.
    pub fn approval_request(&self) -> ApprovalRequest {
        ApprovalRequest {
            skill: self.skill_name.clone(),
            profile: self.profile.to_string(),
            phase_count: self.phases.len(),
            batch_count: self.batch_count(),
            estimated_tokens: self.estimated_tokens(),
            estimated_cost: self.estimated_cost,
            summary: self.summary(),
        }
    }
}

/// Overall outcome of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Every phase completed.
    Completed,
    /// At least one phase failed or was skipped.
    Failed,
    /// The run was cancelled before every phase finished.
    Cancelled,
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Completed => write!(f, "completed"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of running a skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Unique id of this run.
    pub run_id: Uuid,
    /// Name of the skill that ran.
    pub skill: String,
    /// Overall outcome.
    pub status: ExecutionStatus,
    /// Per-phase results keyed by phase id.
    pub phases: BTreeMap<String, PhaseResult>,
    /// Phase ids in plan order.
    pub phase_order: Vec<String>,
    /// Wall-clock time of the run.
    pub duration_ms: u64,
    /// Input plus output tokens over every phase.
    pub total_tokens: u64,
    /// Spend of this run. Phases reused from a checkpoint cost nothing.
    pub total_cost: f64,
    /// Output of the last phase in plan order, when it completed.
    pub final_output: Option<String>,
    /// Why the run did not complete.
    pub error: Option<String>,
    /// Checkpoint fingerprint, when checkpointing was on.
    pub fingerprint: Option<String>,
    /// The run continued from a checkpoint.
    pub resumed: bool,
}

impl ExecutionResult {
    /// Every phase completed.
    pub fn is_success(&self) -> bool {
        self.status == ExecutionStatus::Completed
    }

    /// Result of one phase.
    pub fn phase(&self, phase_id: &str) -> Option<&PhaseResult> {
        self.phases.get(phase_id)
    }

    /// Phase results in plan order.
    pub fn ordered_phases(&self) -> impl Iterator<Item = &PhaseResult> {
        self.phase_order.iter().filter_map(|id| self.phases.get(id))
    }

    /// Number of phases with `status`.
    pub fn count(&self, status: PhaseStatus) -> usize {
        self.phases.values().filter(|r| r.status == status).count()
    }

    /// Sum of input and output tokens over every phase result.
    pub fn sum_tokens(phases: &BTreeMap<String, PhaseResult>) -> u64 {
        phases.values().map(PhaseResult::total_tokens).sum()
    }
}

/// Caller options for one execution.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Overrides the skill's default profile. Phase overrides still win.
    pub profile: Option<RoutingProfile>,
    /// Continue from an existing checkpoint.
    pub resume: bool,
    /// Discard an existing checkpoint and start over.
    pub force: bool,
    /// Persist progress. When false the checkpoint store is never touched.
    pub checkpoint: bool,
    /// Cancels the run and every in-flight provider call.
    pub cancel: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            profile: None,
            resume: false,
            force: false,
            checkpoint: true,
            cancel: CancellationToken::new(),
        }
    }
}

impl RunOptions {
    /// Set the caller profile.
    pub fn with_profile(mut self, profile: RoutingProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Continue from an existing checkpoint.
    pub fn resume(mut self) -> Self {
        self.resume = true;
        self
    }

    /// Discard an existing checkpoint.
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    /// Never read or write checkpoints.
    pub fn without_checkpoint(mut self) -> Self {
        self.checkpoint = false;
        self
    }

    /// Use `cancel` as the run's cancellation token.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn phase_plan(id: &str, batch: usize, cost: f64) -> PhasePlan {
        PhasePlan {
            phase_id: id.into(),
            name: id.into(),
            depends_on: Vec::new(),
            profile: RoutingProfile::Balanced,
            model_id: "gpt-4o-mini".into(),
            provider: "openai".into(),
            is_fallback: false,
            estimated_input_tokens: 100,
            estimated_output_tokens: 50,
            estimated_cost: cost,
            batch,
        }
    }

    fn plan() -> ExecutionPlan {
        ExecutionPlan {
            skill_id: "code-review".into(),
            skill_name: "code-review".into(),
            skill_version: "1.0.0".into(),
            input: "src/lib.rs".into(),
            profile: RoutingProfile::Balanced,
            phases: vec![
                phase_plan("patterns", 0, 0.001),
                phase_plan("style", 0, 0.001),
                phase_plan("report", 1, 0.002),
            ],
            estimated_input_tokens: 300,
            estimated_output_tokens: 150,
            estimated_cost: 0.004,
            warnings: vec!["phase 'report' uses a fallback provider".into()],
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_batches_group_by_index() {
        let plan = plan();
        assert_eq!(plan.batch_count(), 2);
        let batches = plan.batches();
        assert_eq!(batches[0].len(), 2);
        assert_eq!(batches[1][0].phase_id, "report");
        assert_eq!(plan.estimated_tokens(), 450);
    }

    #[test]
    fn test_summary_and_approval_request() {
        let plan = plan();
        let summary = plan.summary();
        assert!(summary.contains("Batch 1:"));
        assert!(summary.contains("openai/gpt-4o-mini"));
        assert!(summary.contains("warning: phase 'report'"));

        let request = plan.approval_request();
        assert_eq!(request.phase_count, 3);
        assert_eq!(request.batch_count, 2);
        assert_eq!(request.profile, "balanced");
    }

    #[test]
    fn test_plan_json_round_trip() {
        let plan = plan();
        let json = serde_json::to_string_pretty(&plan).unwrap();
        assert!(json.contains("\"batch\": 1"));
        let back: ExecutionPlan = serde_json::from_str(&json).unwrap();
        assert_eq!(back, plan);
    }

    #[test]
    fn test_run_options_defaults() {
        let opts = RunOptions::default();
        assert!(opts.checkpoint);
        assert!(!opts.resume && !opts.force);
        let opts = RunOptions::default().without_checkpoint().resume();
        assert!(!opts.checkpoint);
        assert!(opts.resume);
    }
}
