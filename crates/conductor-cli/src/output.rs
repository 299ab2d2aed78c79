//! Human-readable and JSON rendering for command results.

use conductor_checkpoint::CheckpointSummary;
use conductor_core::{ConductorError, PhaseResult, PhaseStatus, Skill};
use conductor_engine::{ExecutionResult, WorkflowEvent};
use conductor_providers::ProviderUsage;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One line per phase in plan order, followed by totals and the error, if any.
pub fn render_result(result: &ExecutionResult) -> String {
    let mut out = format!(
        "Skill '{}' {} in {}ms ({} tokens, ${:.4})",
        result.skill, result.status, result.duration_ms, result.total_tokens, result.total_cost
    );
    if result.resumed {
        out.push_str(" [resumed]");
    }
    for phase in result.ordered_phases() {
        out.push('\n');
        out.push_str(&render_phase(phase));
    }
    if let Some(error) = &result.error {
        out.push_str(&format!("\nerror: {error}"));
    }
    out
}

fn render_phase(phase: &PhaseResult) -> String {
    let mut line = format!("  [{}] {}", phase.status, phase.phase_id);
    if phase.name != phase.phase_id {
        line.push_str(&format!(" ({})", phase.name));
    }
    match phase.status {
        PhaseStatus::Completed => {
            if let (Some(provider), Some(model)) = (&phase.provider_used, &phase.model_used) {
                line.push_str(&format!(" via {provider}/{model}"));
                if phase.is_fallback {
                    line.push_str(" [fallback]");
                }
            }
            line.push_str(&format!(
                ", {} in / {} out tokens, {}ms",
                phase.input_tokens, phase.output_tokens, phase.duration_ms
            ));
        }
        _ => {
            if let Some(error) = &phase.error {
                line.push_str(&format!(": {error}"));
            }
        }
    }
    line
}

/// Per-provider call counters for the run, one line per provider.
pub fn render_usage(usage: &BTreeMap<String, ProviderUsage>) -> Option<String> {
    if usage.is_empty() {
        return None;
    }
    let mut out = "Provider usage:".to_string();
    for (provider, u) in usage {
        out.push_str(&format!("\n  {provider}: {} calls", u.calls));
        if u.failures > 0 || u.fallbacks > 0 {
            out.push_str(&format!(" ({} failed, {} fallback)", u.failures, u.fallbacks));
        }
        out.push_str(&format!(
            ", {} in / {} out tokens, ${:.4}",
            u.input_tokens, u.output_tokens, u.cost
        ));
    }
    Some(out)
}

/// The run result with the router's usage counters under `"usage"`.
pub fn result_json(
    result: &ExecutionResult,
    usage: serde_json::Value,
) -> serde_json::Result<serde_json::Value> {
    let mut doc = serde_json::to_value(result)?;
    if let Some(map) = doc.as_object_mut() {
        map.insert("usage".to_string(), usage);
    }
    Ok(doc)
}

/// Lifecycle line for a streaming event. Text fragments and token totals
/// return `None`; the caller writes fragments to stdout as they arrive.
pub fn render_event(event: &WorkflowEvent) -> Option<String> {
    match event {
        WorkflowEvent::PhaseStarted { phase_id, name, index } => {
            Some(format!("▶ [{index}] {name} ({phase_id})"))
        }
        WorkflowEvent::PhaseCompleted {
            phase_id,
            input_tokens,
            output_tokens,
        } => Some(format!(
            "✓ {phase_id} ({input_tokens} in / {output_tokens} out tokens)"
        )),
        WorkflowEvent::PhaseFailed { phase_id, error } => Some(format!("✗ {phase_id}: {error}")),
        WorkflowEvent::PhaseSkipped { phase_id, reason } => {
            Some(format!("- {phase_id} skipped: {reason}"))
        }
        WorkflowEvent::WorkflowCompleted { success } => Some(if *success {
            "workflow completed".to_string()
        } else {
            "workflow failed".to_string()
        }),
        WorkflowEvent::PhaseProgress { .. } | WorkflowEvent::TokenUpdate { .. } => None,
    }
}

/// The `{"error","kind","skill","profile"}` document printed in JSON mode.
pub fn error_json(
    error: &anyhow::Error,
    skill: Option<&str>,
    profile: Option<&str>,
) -> serde_json::Value {
    let kind = error
        .downcast_ref::<ConductorError>()
        .map_or("internal", ConductorError::kind);
    json!({
        "error": error.to_string(),
        "kind": kind,
        "skill": skill,
        "profile": profile,
    })
}

pub fn render_skills(skills: &[&Arc<Skill>]) -> String {
    if skills.is_empty() {
        return "No skills found".to_string();
    }
    skills
        .iter()
        .map(|skill| {
            let mut line = format!(
                "{} v{} ({} phases)",
                skill.id,
                skill.version,
                skill.phases().len()
            );
            if skill.name != skill.id {
                line.push_str(&format!(" [{}]", skill.name));
            }
            if !skill.description.is_empty() {
                line.push_str(&format!(": {}", skill.description));
            }
            line
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn render_checkpoints(checkpoints: &[CheckpointSummary]) -> String {
    if checkpoints.is_empty() {
        return "No checkpoints".to_string();
    }
    checkpoints
        .iter()
        .map(|cp| {
            format!(
                "{}  {}  {}  updated {}  \"{}\"",
                cp.fingerprint,
                cp.skill_id,
                cp.progress,
                cp.updated_at.format("%Y-%m-%d %H:%M:%S"),
                truncate(&cp.request, 48)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut cut: String = flat.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use conductor_core::Phase;
    use conductor_engine::ExecutionStatus;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn completed(id: &str) -> PhaseResult {
        let mut result = PhaseResult::pending(&Phase::new(id, "p"));
        result.status = PhaseStatus::Completed;
        result.input_tokens = 100;
        result.output_tokens = 50;
        result.provider_used = Some("ollama".into());
        result.model_used = Some("llama3.1:8b".into());
        result.output = format!("out:{id}");
        result
    }

    fn sample_result() -> ExecutionResult {
        let security = Phase::new("security", "p").with_name("Security audit");
        let mut failed = PhaseResult::pending(&security);
        failed.status = PhaseStatus::Failed;
        failed.error = Some("all providers failed".into());
        let report = Phase::new("report", "p");

        let mut phases = BTreeMap::new();
        phases.insert("patterns".to_string(), completed("patterns"));
        phases.insert("security".to_string(), failed);
        phases.insert(
            "report".to_string(),
            PhaseResult::skipped(&report, "Dependency failure: 'security' failed"),
        );
        ExecutionResult {
            run_id: Uuid::new_v4(),
            skill: "code-review".into(),
            status: ExecutionStatus::Failed,
            phases,
            phase_order: vec!["patterns".into(), "security".into(), "report".into()],
            duration_ms: 42,
            total_tokens: 150,
            total_cost: 0.0,
            final_output: Some("out:patterns".into()),
            error: Some("workflow aborted: phase 'security' failed".into()),
            fingerprint: None,
            resumed: false,
        }
    }

    #[test]
    fn test_render_result_lists_phases_in_plan_order() {
        let text = render_result(&sample_result());
        let lines: Vec<&str> = text.lines().collect();
        assert!(lines[0].starts_with("Skill 'code-review' failed in 42ms (150 tokens"));
        assert_eq!(
            lines[1],
            "  [completed] patterns via ollama/llama3.1:8b, 100 in / 50 out tokens, 0ms"
        );
        assert_eq!(
            lines[2],
            "  [failed] security (Security audit): all providers failed"
        );
        assert!(lines[3].starts_with("  [skipped] report: Dependency failure"));
        assert_eq!(lines[4], "error: workflow aborted: phase 'security' failed");
    }

    #[test]
    fn test_render_event() {
        let started = WorkflowEvent::PhaseStarted {
            phase_id: "patterns".into(),
            name: "Pattern scan".into(),
            index: 0,
        };
        assert_eq!(
            render_event(&started).unwrap(),
            "▶ [0] Pattern scan (patterns)"
        );
        let progress = WorkflowEvent::PhaseProgress {
            phase_id: "patterns".into(),
            fragment: "abc".into(),
        };
        assert!(render_event(&progress).is_none());
        assert_eq!(
            render_event(&WorkflowEvent::WorkflowCompleted { success: false }).unwrap(),
            "workflow failed"
        );
    }

    #[test]
    fn test_error_json_carries_kind() {
        let err = anyhow::Error::from(ConductorError::CheckpointConflict(
            "checkpoint exists".into(),
        ));
        let doc = error_json(&err, Some("code-review"), Some("cheap"));
        assert_eq!(doc["kind"], "checkpoint_conflict");
        assert_eq!(doc["skill"], "code-review");
        assert_eq!(doc["profile"], "cheap");
        assert!(doc["error"].as_str().unwrap().contains("checkpoint exists"));

        let other = anyhow::anyhow!("boom");
        let doc = error_json(&other, None, None);
        assert_eq!(doc["kind"], "internal");
        assert!(doc["skill"].is_null());
    }

    #[test]
    fn test_render_usage_per_provider() {
        let mut usage = BTreeMap::new();
        usage.insert(
            "groq".to_string(),
            ProviderUsage {
                calls: 3,
                failures: 1,
                fallbacks: 2,
                input_tokens: 200,
                output_tokens: 100,
                cost: 0.0012,
                duration_ms: 900,
            },
        );
        usage.insert(
            "ollama".to_string(),
            ProviderUsage {
                calls: 1,
                input_tokens: 100,
                output_tokens: 50,
                ..Default::default()
            },
        );

        let text = render_usage(&usage).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Provider usage:");
        assert_eq!(
            lines[1],
            "  groq: 3 calls (1 failed, 2 fallback), 200 in / 100 out tokens, $0.0012"
        );
        assert_eq!(lines[2], "  ollama: 1 calls, 100 in / 50 out tokens, $0.0000");
        assert!(render_usage(&BTreeMap::new()).is_none());
    }

    #[test]
    fn test_result_json_carries_usage() {
        let usage = json!({ "providers": { "ollama": { "calls": 1 } }, "aggregate": { "calls": 1 } });
        let doc = result_json(&sample_result(), usage).unwrap();
        assert_eq!(doc["skill"], "code-review");
        assert_eq!(doc["status"], "failed");
        assert_eq!(doc["usage"]["providers"]["ollama"]["calls"], 1);
        assert_eq!(doc["usage"]["aggregate"]["calls"], 1);
    }

    #[test]
    fn test_truncate_flattens_whitespace() {
        assert_eq!(truncate("review\n  this", 48), "review this");
        assert_eq!(truncate("abcdef", 3), "abc…");
    }
}
