use crate::context::EngineContext;
use crate::graph::PhaseGraph;
use crate::prompt::render_preview;
use crate::types::{ExecutionPlan, PhasePlan};
use chrono::Utc;
use conductor_core::{ConductorResult, Phase, RoutingProfile, Skill};
use std::sync::Arc;
use tracing::{debug, info};

/// Profile a phase runs under: its own override, else the caller's, else the
/// skill default.
pub fn effective_profile(phase: &Phase, caller: Option<RoutingProfile>, skill: &Skill) -> RoutingProfile {
    phase
        .profile
        .or(caller)
        .unwrap_or(skill.routing().default_profile)
}

/// Turns a skill and request into an [`ExecutionPlan`] without calling any
/// provider.
pub struct Planner {
    ctx: Arc<EngineContext>,
}

impl Planner {
    /// A planner over a shared context.
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Validate the skill and resolve batches, providers and estimates for `input`.
    pub fn plan(
        &self,
        skill: &Skill,
        input: &str,
        profile: Option<RoutingProfile>,
    ) -> ConductorResult<ExecutionPlan> {
        let graph = PhaseGraph::build(skill)?;
        let router = &self.ctx.router;
        let estimator = &self.ctx.estimator;

        let mut phases = Vec::with_capacity(graph.len());
        let mut warnings = Vec::new();

        for (batch, members) in graph.batches().iter().enumerate() {
            for phase in members {
                let phase_profile = effective_profile(phase, profile, skill);
                let selection = router.select(phase_profile)?;

                let prompt = render_preview(phase, input, self.ctx.memory());
                let mut input_tokens = estimator.input_tokens(&prompt);
                if let Some(system) = &phase.system_prompt {
                    input_tokens += estimator.input_tokens(system);
                }
                let output_tokens = estimator.output_tokens(phase.max_tokens);
                let cost = estimator.cost(
                    router.pricing(&selection),
                    router.is_local(&selection.provider),
                    input_tokens,
                    output_tokens,
                );

                if selection.is_fallback {
                    warnings.push(format!(
                        "phase '{}': no first-choice provider for profile {}, using {}",
                        phase.id, phase_profile, selection.provider
                    ));
                }
                let context_limit = router.config().profile(phase_profile).max_context_tokens;
                if let Some(limit) = context_limit {
                    if input_tokens + output_tokens > limit {
                        warnings.push(format!(
                            "phase '{}': ~{} tokens exceeds the {} context limit of {}",
                            phase.id,
                            input_tokens + output_tokens,
                            phase_profile,
                            limit
                        ));
                    }
                }

                debug!(
                    phase = %phase.id,
                    batch,
                    provider = %selection.provider,
                    model = %selection.model_id,
                    input_tokens,
                    output_tokens,
                    "Planned phase"
                );

                phases.push(PhasePlan {
                    phase_id: phase.id.clone(),
                    name: phase.display_name().to_string(),
                    depends_on: phase.depends_on.clone(),
                    profile: phase_profile,
                    model_id: selection.model_id,
                    provider: selection.provider,
                    is_fallback: selection.is_fallback,
                    estimated_input_tokens: input_tokens,
                    estimated_output_tokens: output_tokens,
                    estimated_cost: cost,
                    batch,
                });
            }
        }

        let plan = ExecutionPlan {
            skill_id: skill.id.clone(),
            skill_name: skill.name.clone(),
            skill_version: skill.version.clone(),
            input: input.to_string(),
            profile: profile.unwrap_or(skill.routing().default_profile),
            estimated_input_tokens: phases.iter().map(|p| p.estimated_input_tokens).sum(),
            estimated_output_tokens: phases.iter().map(|p| p.estimated_output_tokens).sum(),
            estimated_cost: phases.iter().map(|p| p.estimated_cost).sum(),
            phases,
            warnings,
            created_at: Utc::now(),
        };

        info!(
            skill = %plan.skill_name,
            phases = plan.phases.len(),
            batches = plan.batch_count(),
            estimated_tokens = plan.estimated_tokens(),
            estimated_cost = plan.estimated_cost,
            "Execution plan ready"
        );
        Ok(plan)
    }
}
