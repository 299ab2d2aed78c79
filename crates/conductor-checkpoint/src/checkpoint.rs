use chrono::{DateTime, Utc};
use conductor_core::{PhaseResult, PhaseStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Persisted progress of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Hex SHA-256 of skill, request and machine.
    pub fingerprint: String,
    /// Id of the skill being run.
    pub skill_id: String,
    /// Skill version at the time the run started.
    pub skill_version: String,
    /// The request as given by the caller.
    pub request: String,
    /// Host that owns the run.
    pub machine_id: String,
    /// Number of phases in the skill.
    pub total_phases: usize,
    /// Completed phase results keyed by phase id.
    #[serde(default)]
    pub phases: BTreeMap<String, PhaseResult>,
    /// Highest batch index that has finished.
    #[serde(default)]
    pub last_completed_batch: Option<usize>,
    /// Output of the final phase once the run is complete.
    #[serde(default)]
    pub final_output: Option<String>,
    /// Every phase completed.
    #[serde(default)]
    pub complete: bool,
    /// When the run was first checkpointed.
    pub created_at: DateTime<Utc>,
    /// Last time progress was recorded.
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// An empty checkpoint for a run that is about to start.
    pub fn new(
        fingerprint: impl Into<String>,
        skill_id: impl Into<String>,
        skill_version: impl Into<String>,
        request: impl Into<String>,
        machine_id: impl Into<String>,
        total_phases: usize,
    ) -> Self {
        let now = Utc::now();
        Self {
            fingerprint: fingerprint.into(),
            skill_id: skill_id.into(),
            skill_version: skill_version.into(),
            request: request.into(),
            machine_id: machine_id.into(),
            total_phases,
            phases: BTreeMap::new(),
            last_completed_batch: None,
            final_output: None,
            complete: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Store a phase result. Only completed phases are kept; anything else
    /// must run again on resume.
    pub fn record(&mut self, result: &PhaseResult) {
        if result.status == PhaseStatus::Completed {
            self.phases.insert(result.phase_id.clone(), result.clone());
            self.updated_at = Utc::now();
        }
    }

    /// Mark a batch as finished.
    pub fn finish_batch(&mut self, batch: usize) {
        self.last_completed_batch = Some(self.last_completed_batch.map_or(batch, |b| b.max(batch)));
        self.updated_at = Utc::now();
    }

    /// Mark the run finished with its final output.
    pub fn mark_complete(&mut self, final_output: impl Into<String>) {
        self.final_output = Some(final_output.into());
        self.complete = true;
        self.updated_at = Utc::now();
    }

    /// Result of a phase that already completed.
    pub fn completed(&self, phase_id: &str) -> Option<&PhaseResult> {
        self.phases.get(phase_id)
    }

    /// Number of completed phases.
    pub fn completed_count(&self) -> usize {
        self.phases.len()
    }

    /// Human-readable progress, e.g. `2/3 phases completed (last batch 1)`.
    pub fn progress_summary(&self) -> String {
        let mut summary = format!(
            "{}/{} phases completed",
            self.completed_count(),
            self.total_phases
        );
        if let Some(batch) = self.last_completed_batch {
            summary.push_str(&format!(" (last batch {batch})"));
        }
        if self.complete {
            summary.push_str(", complete");
        }
        summary
    }

    /// Listing entry for this checkpoint.
    pub fn summary(&self) -> CheckpointSummary {
        CheckpointSummary {
            fingerprint: self.fingerprint.clone(),
            skill_id: self.skill_id.clone(),
            request: self.request.clone(),
            completed_phases: self.completed_count(),
            total_phases: self.total_phases,
            complete: self.complete,
            progress: self.progress_summary(),
            updated_at: self.updated_at,
        }
    }
}

/// One line of `checkpoints list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointSummary {
    /// Hex SHA-256 of skill, request and machine.
    pub fingerprint: String,
    /// Id of the skill being run.
    pub skill_id: String,
    /// The request as given by the caller.
    pub request: String,
    /// Number of completed phases.
    pub completed_phases: usize,
    /// Number of phases in the skill.
    pub total_phases: usize,
    /// Every phase completed.
    pub complete: bool,
    /// Output of [`Checkpoint::progress_summary`].
    pub progress: String,
    /// Last time progress was recorded.
    pub updated_at: DateTime<Utc>,
}
