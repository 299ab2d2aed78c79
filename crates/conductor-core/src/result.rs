use crate::Phase;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a phase during one execution.
///
/// `Pending → Running → {Completed, Failed, Skipped}`; the last three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    /// Waiting for its dependencies.
    Pending,
    /// A provider call is in flight.
    Running,
    /// The provider returned a response.
    Completed,
    /// Every provider in the fallback chain failed, or the call was cancelled.
    Failed,
    /// Not run because a dependency did not complete.
    Skipped,
}

impl PhaseStatus {
    /// Whether the phase can no longer change state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PhaseStatus::Completed | PhaseStatus::Failed | PhaseStatus::Skipped
        )
    }
}

impl std::fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PhaseStatus::Pending => write!(f, "pending"),
            PhaseStatus::Running => write!(f, "running"),
            PhaseStatus::Completed => write!(f, "completed"),
            PhaseStatus::Failed => write!(f, "failed"),
            PhaseStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Outcome of one phase within an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseResult {
    /// Phase id within the skill.
    pub phase_id: String,
    /// Display name.
    pub name: String,
    /// Lifecycle state.
    pub status: PhaseStatus,
    /// When the provider call started.
    pub started_at: Option<DateTime<Utc>>,
    /// Time spent in the provider call.
    pub duration_ms: u64,
    /// Prompt tokens reported by the provider.
    pub input_tokens: u64,
    /// Completion tokens reported by the provider.
    pub output_tokens: u64,
    /// Model that produced the output, as reported by the provider.
    #[serde(default)]
    pub model_used: Option<String>,
    /// Provider that served the call.
    #[serde(default)]
    pub provider_used: Option<String>,
    /// True when the provider used was not the profile's first choice.
    #[serde(default)]
    pub is_fallback: bool,
    /// Generated text; empty unless completed.
    #[serde(default)]
    pub output: String,
    /// Failure or skip reason.
    #[serde(default)]
    pub error: Option<String>,
}

impl PhaseResult {
    /// A result in the `Pending` state for the given phase.
    pub fn pending(phase: &Phase) -> Self {
        Self {
            phase_id: phase.id.clone(),
            name: phase.display_name().to_string(),
            status: PhaseStatus::Pending,
            started_at: None,
            duration_ms: 0,
            input_tokens: 0,
            output_tokens: 0,
            model_used: None,
            provider_used: None,
            is_fallback: false,
            output: String::new(),
            error: None,
        }
    }

    /// A `Skipped` result carrying the reason.
    pub fn skipped(phase: &Phase, reason: impl Into<String>) -> Self {
        let mut result = Self::pending(phase);
        result.status = PhaseStatus::Skipped;
        result.error = Some(reason.into());
        result
    }

    /// Input plus output tokens.
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!PhaseStatus::Pending.is_terminal());
        assert!(!PhaseStatus::Running.is_terminal());
        assert!(PhaseStatus::Completed.is_terminal());
        assert!(PhaseStatus::Failed.is_terminal());
        assert!(PhaseStatus::Skipped.is_terminal());
    }

    #[test]
    fn test_skipped_result() {
        let phase = Phase::new("report", "x").with_name("Report");
        let result = PhaseResult::skipped(&phase, "dependency 'security' failed");
        assert_eq!(result.status, PhaseStatus::Skipped);
        assert_eq!(result.name, "Report");
        assert_eq!(result.total_tokens(), 0);
        assert!(result.error.unwrap().contains("security"));
    }

    #[test]
    fn test_phase_result_serialization() {
        let mut result = PhaseResult::pending(&Phase::new("a", "x"));
        result.status = PhaseStatus::Completed;
        result.input_tokens = 10;
        result.output_tokens = 5;
        let json = serde_json::to_string(&result).unwrap();
        assert!(json.contains("\"completed\""));
        let parsed: PhaseResult = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.total_tokens(), 15);
    }
}
