use async_trait::async_trait;
use conductor_core::approval::{ApprovalChannel, ApprovalDecision, ApprovalRequest};
use conductor_core::ConductorResult;
use std::time::Duration;

/// Terminal approval channel for `conductor plan --approve`.
///
/// Prints the plan summary to stderr and reads the decision from stdin, so
/// stdout stays clean for the run's output.
pub struct StdinApprovalChannel {
    timeout: Duration,
}

impl StdinApprovalChannel {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Five minutes to answer.
    pub fn default_timeout() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

/// Render the approval box shown before a plan runs.
pub fn format_approval_prompt(request: &ApprovalRequest) -> String {
    let (color, label) = cost_style(request.estimated_cost);

    let mut prompt = String::new();
    prompt.push_str("\n\x1b[1;37m╔══ APPROVE EXECUTION PLAN ══╗\x1b[0m\n");
    prompt.push_str(&format!("  Skill:   {}\n", request.skill));
    prompt.push_str(&format!("  Profile: {}\n", request.profile));
    prompt.push_str(&format!(
        "  Phases:  {} in {} batches\n",
        request.phase_count, request.batch_count
    ));
    prompt.push_str(&format!("  Tokens:  ~{}\n", request.estimated_tokens));
    prompt.push_str(&format!(
        "  Cost:    \x1b[{color}m${:.4} ({label})\x1b[0m\n",
        request.estimated_cost
    ));
    if !request.summary.is_empty() {
        prompt.push('\n');
        for line in request.summary.lines() {
            prompt.push_str(&format!("  {line}\n"));
        }
    }
    prompt.push_str("\x1b[1;37m╚════════════════════════════╝\x1b[0m\n");
    prompt.push_str("  Run this plan? [y/N/reason]: ");
    prompt
}

/// ANSI color and label for an estimated cost.
pub fn cost_style(cost: f64) -> (&'static str, &'static str) {
    if cost <= 0.0 {
        ("32", "FREE")
    } else if cost < 0.10 {
        ("36", "LOW")
    } else if cost < 1.0 {
        ("33", "MODERATE")
    } else {
        ("1;31", "HIGH")
    }
}

/// `y`/`yes` approves; `n`, `no` or an empty line rejects; anything else
/// rejects with the text as the reason.
pub fn parse_approval_input(input: &str) -> ApprovalDecision {
    let trimmed = input.trim();
    match trimmed.to_lowercase().as_str() {
        "y" | "yes" => ApprovalDecision::approve(),
        "n" | "no" | "" => ApprovalDecision::reject(None),
        _ => ApprovalDecision::reject(Some(trimmed.to_string())),
    }
}

#[async_trait]
impl ApprovalChannel for StdinApprovalChannel {
    async fn request_approval(&self, request: ApprovalRequest) -> ConductorResult<ApprovalDecision> {
        let timeout = self.timeout;
        eprint!("{}", format_approval_prompt(&request));

        let read = tokio::time::timeout(
            timeout,
            tokio::task::spawn_blocking(|| {
                let mut input = String::new();
                std::io::stdin().read_line(&mut input).map(|_| input)
            }),
        )
        .await;

        let decision = match read {
            Ok(Ok(Ok(input))) => parse_approval_input(&input),
            Ok(_) => ApprovalDecision::reject(Some("stdin read error".into())),
            Err(_) => {
                eprintln!();
                ApprovalDecision::reject(Some(format!(
                    "timed out after {}s",
                    timeout.as_secs()
                )))
            }
        };
        let label = if decision.approved { "APPROVED" } else { "REJECTED" };
        eprintln!("  → {label}\n");
        Ok(decision)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn request(cost: f64, summary: &str) -> ApprovalRequest {
        ApprovalRequest {
            skill: "code-review".into(),
            profile: "premium".into(),
            phase_count: 3,
            batch_count: 3,
            estimated_tokens: 4200,
            estimated_cost: cost,
            summary: summary.into(),
        }
    }

    #[test]
    fn test_prompt_shows_plan_totals() {
        let prompt = format_approval_prompt(&request(2.5, "Batch 0:\n  patterns"));
        assert!(prompt.contains("code-review"));
        assert!(prompt.contains("premium"));
        assert!(prompt.contains("3 in 3 batches"));
        assert!(prompt.contains("~4200"));
        assert!(prompt.contains("$2.5000"));
        assert!(prompt.contains("HIGH"));
        assert!(prompt.contains("1;31"));
        assert!(prompt.contains("  Batch 0:\n"));
    }

    #[test]
    fn test_prompt_without_summary() {
        let prompt = format_approval_prompt(&request(0.0, ""));
        assert!(prompt.contains("FREE"));
        assert!(!prompt.contains("Batch"));
    }

    #[test]
    fn test_cost_styles() {
        assert_eq!(cost_style(0.0), ("32", "FREE"));
        assert_eq!(cost_style(0.05), ("36", "LOW"));
        assert_eq!(cost_style(0.5), ("33", "MODERATE"));
        assert_eq!(cost_style(3.0), ("1;31", "HIGH"));
    }

    #[test]
    fn test_parse_approval_input() {
        assert!(parse_approval_input("y").approved);
        assert!(parse_approval_input("  YES \n").approved);

        let no = parse_approval_input("n");
        assert!(!no.approved);
        assert!(no.reason.is_none());
        assert!(!parse_approval_input("\n").approved);

        let reasoned = parse_approval_input("Too expensive\n");
        assert!(!reasoned.approved);
        assert_eq!(reasoned.reason.as_deref(), Some("Too expensive"));
    }
}
