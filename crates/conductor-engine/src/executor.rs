use crate::context::EngineContext;
use crate::graph::PhaseGraph;
use crate::planner::effective_profile;
use crate::prompt::{render_prompt, DependencyOutput};
use crate::types::{ExecutionResult, ExecutionStatus, RunOptions};
use chrono::Utc;
use conductor_checkpoint::{fingerprint, Checkpoint, CheckpointStore};
use conductor_core::{
    ConductorError, ConductorResult, FailurePolicy, Phase, PhaseResult, PhaseStatus,
    RoutingProfile, Skill,
};
use conductor_providers::{CompletionRequest, RoutedCompletion};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Runs a skill batch by batch.
///
/// Phases of one batch run as concurrent tasks with a barrier before the next
/// batch. A phase runs only when every dependency completed; otherwise it is
/// skipped, and so are its dependents. Progress is checkpointed after each
/// batch when a store is configured and the run allows it.
pub struct Executor {
    ctx: Arc<EngineContext>,
}

/// Where a checkpointed run starts from.
enum Start {
    Fresh(Checkpoint),
    Resume(Checkpoint),
    Finished(Checkpoint),
}

pub(crate) struct PhaseOutcome {
    pub result: PhaseResult,
    pub cost: f64,
}

impl Executor {
    /// An executor over a shared context.
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Run `skill` against `input`, honoring checkpoints and cancellation in `options`.
    pub async fn execute(
        &self,
        skill: &Skill,
        input: &str,
        options: RunOptions,
    ) -> ConductorResult<ExecutionResult> {
        let started = Instant::now();
        let graph = PhaseGraph::build(skill)?;
        ensure_providers(&self.ctx)?;

        let store = if options.checkpoint {
            self.ctx.checkpoints.clone()
        } else {
            None
        };

        let mut results: BTreeMap<String, PhaseResult> = BTreeMap::new();
        let mut checkpoint = None;
        let mut resumed = false;

        if let Some(store) = &store {
            match self.open_checkpoint(store, skill, input, &options).await? {
                Start::Finished(cp) => {
                    info!(
                        skill = %skill.name,
                        fingerprint = %cp.fingerprint,
                        "Checkpoint already complete, returning stored output"
                    );
                    return Ok(finished_result(skill, &graph, cp, started));
                }
                Start::Resume(cp) => {
                    for phase in graph.ordered() {
                        if let Some(done) = cp.completed(&phase.id) {
                            results.insert(phase.id.clone(), done.clone());
                        }
                    }
                    info!(
                        skill = %skill.name,
                        fingerprint = %cp.fingerprint,
                        reused = results.len(),
                        progress = %cp.progress_summary(),
                        "Resuming from checkpoint"
                    );
                    resumed = true;
                    checkpoint = Some(cp);
                }
                Start::Fresh(cp) => checkpoint = Some(cp),
            }
        }

        info!(
            skill = %skill.name,
            phases = graph.len(),
            batches = graph.batch_count(),
            checkpoint = checkpoint.is_some(),
            "Starting workflow"
        );

        let cancel = options.cancel.clone();
        let policy = skill.routing().failure_policy;
        let mut halt: Option<String> = None;
        let mut first_error: Option<String> = None;
        let mut cancelled = false;
        let mut cost = 0.0;

        for (index, batch) in graph.batches().iter().enumerate() {
            if halt.is_none() && cancel.is_cancelled() {
                cancelled = true;
                halt = Some("cancelled".to_string());
            }
            if let Some(reason) = &halt {
                for phase in batch {
                    results
                        .entry(phase.id.clone())
                        .or_insert_with(|| PhaseResult::skipped(phase, reason.clone()));
                }
                continue;
            }

            let mut tasks = JoinSet::new();
            for phase in batch {
                if results
                    .get(&phase.id)
                    .is_some_and(|r| r.status == PhaseStatus::Completed)
                {
                    debug!(phase = %phase.id, "Reusing checkpointed result");
                    continue;
                }
                if let Some(reason) = blocked_reason(phase, &results) {
                    warn!(phase = %phase.id, reason = %reason, "Skipping phase");
                    results.insert(phase.id.clone(), PhaseResult::skipped(phase, reason));
                    continue;
                }

                let deps: Vec<DependencyOutput<'_>> = phase
                    .depends_on
                    .iter()
                    .filter_map(|id| {
                        let dep = skill.get_phase(id)?;
                        let done = results.get(id)?;
                        Some(DependencyOutput::new(dep, &done.output))
                    })
                    .collect();
                let prompt = render_prompt(&phase.prompt, input, &deps, self.ctx.memory());
                let profile = effective_profile(phase, options.profile, skill);

                let ctx = self.ctx.clone();
                let phase = phase.clone();
                let cancel = cancel.clone();
                tasks.spawn(async move { run_phase(&ctx, &phase, profile, prompt, &cancel).await });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(outcome) => {
                        cost += outcome.cost;
                        results.insert(outcome.result.phase_id.clone(), outcome.result);
                    }
                    Err(e) => error!(batch = index, error = %e, "Phase task did not finish"),
                }
            }

            for phase in batch {
                let result = results.entry(phase.id.clone()).or_insert_with(|| {
                    let mut lost = PhaseResult::pending(phase);
                    lost.status = PhaseStatus::Failed;
                    lost.error = Some("phase task did not finish".to_string());
                    lost
                });
                if result.status != PhaseStatus::Failed {
                    continue;
                }
                if first_error.is_none() {
                    let detail = result.error.as_deref().unwrap_or_default();
                    first_error = Some(format!("phase '{}' failed: {detail}", phase.id));
                }
                if halt.is_none() && (phase.required || policy == FailurePolicy::AbortWorkflow) {
                    halt = Some(format!("workflow aborted: phase '{}' failed", phase.id));
                }
            }

            if cancel.is_cancelled() {
                cancelled = true;
                halt = Some("cancelled".to_string());
            }

            if let (Some(store), Some(cp)) = (&store, checkpoint.as_mut()) {
                for phase in batch {
                    if let Some(result) = results.get(&phase.id) {
                        cp.record(result);
                    }
                }
                if batch.iter().all(|p| cp.completed(&p.id).is_some()) {
                    cp.finish_batch(index);
                }
                persist(store.as_ref(), cp).await;
            }
        }

        let phase_order: Vec<String> = graph.ordered().map(|p| p.id.clone()).collect();
        let all_completed = phase_order.iter().all(|id| {
            results
                .get(id)
                .is_some_and(|r| r.status == PhaseStatus::Completed)
        });

        let status = if all_completed {
            ExecutionStatus::Completed
        } else if cancelled {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Failed
        };
        let error = match status {
            ExecutionStatus::Completed => None,
            ExecutionStatus::Cancelled => Some("workflow cancelled".to_string()),
            ExecutionStatus::Failed => halt.or(first_error).or_else(|| {
                Some("not every phase completed".to_string())
            }),
        };
        let final_output = final_output(skill, &graph, &results);

        if status == ExecutionStatus::Completed {
            if let (Some(store), Some(cp)) = (&store, checkpoint.as_mut()) {
                cp.mark_complete(final_output.clone().unwrap_or_default());
                persist(store.as_ref(), cp).await;
            }
        }

        let result = ExecutionResult {
            run_id: Uuid::new_v4(),
            skill: skill.name.clone(),
            status,
            total_tokens: ExecutionResult::sum_tokens(&results),
            phases: results,
            phase_order,
            duration_ms: started.elapsed().as_millis() as u64,
            total_cost: cost,
            final_output,
            error,
            fingerprint: checkpoint.map(|cp| cp.fingerprint),
            resumed,
        };

        info!(
            skill = %result.skill,
            status = %result.status,
            completed = result.count(PhaseStatus::Completed),
            failed = result.count(PhaseStatus::Failed),
            skipped = result.count(PhaseStatus::Skipped),
            total_tokens = result.total_tokens,
            duration_ms = result.duration_ms,
            "Workflow finished"
        );
        Ok(result)
    }

    /// Look up the run's fingerprint and decide how to start.
    async fn open_checkpoint(
        &self,
        store: &Arc<dyn CheckpointStore>,
        skill: &Skill,
        input: &str,
        options: &RunOptions,
    ) -> ConductorResult<Start> {
        let fp = fingerprint(&skill.id, input, &self.ctx.machine_id);
        let fresh = || {
            Checkpoint::new(
                &fp,
                &skill.id,
                &skill.version,
                input,
                &self.ctx.machine_id,
                skill.phases().len(),
            )
        };

        let existing = match store.find(&fp).await {
            Ok(existing) => existing,
            Err(e) => {
                warn!(fingerprint = %fp, error = %e, "Ignoring unreadable checkpoint");
                None
            }
        };
        let Some(existing) = existing else {
            return Ok(Start::Fresh(fresh()));
        };

        if options.force {
            if let Err(e) = store.delete(&fp).await {
                warn!(fingerprint = %fp, error = %e, "Failed to delete checkpoint");
            }
            info!(fingerprint = %fp, "Discarded existing checkpoint");
            return Ok(Start::Fresh(fresh()));
        }

        if options.resume {
            if existing.skill_version != skill.version {
                warn!(
                    fingerprint = %fp,
                    checkpoint_version = %existing.skill_version,
                    skill_version = %skill.version,
                    "Resuming a checkpoint written by another skill version"
                );
            }
            return Ok(if existing.complete {
                Start::Finished(existing)
            } else {
                Start::Resume(existing)
            });
        }

        if existing.complete {
            debug!(fingerprint = %fp, "Previous run completed, starting over");
            return Ok(Start::Fresh(fresh()));
        }

        Err(ConductorError::CheckpointConflict(format!(
            "checkpoint exists for skill '{}' ({fp}): {}; use --resume to continue or --force to start over",
            skill.name,
            existing.progress_summary()
        )))
    }
}

pub(crate) fn ensure_providers(ctx: &EngineContext) -> ConductorResult<()> {
    if ctx.router.has_enabled_providers() {
        Ok(())
    } else {
        Err(ConductorError::Validation("no providers configured".into()))
    }
}

/// Why a phase cannot run, if any dependency did not complete.
pub(crate) fn blocked_reason(
    phase: &Phase,
    results: &BTreeMap<String, PhaseResult>,
) -> Option<String> {
    phase.depends_on.iter().find_map(|dep| {
        let status = match results.get(dep).map(|r| r.status) {
            Some(PhaseStatus::Completed) => return None,
            Some(status) => status.to_string(),
            None => "did not run".to_string(),
        };
        Some(ConductorError::DependencyFailure(format!("'{dep}' {status}")).to_string())
    })
}

/// The designated output phase's text, else the last completed phase in
/// plan order.
pub(crate) fn final_output(
    skill: &Skill,
    graph: &PhaseGraph,
    results: &BTreeMap<String, PhaseResult>,
) -> Option<String> {
    let completed = |id: &str| {
        results
            .get(id)
            .filter(|r| r.status == PhaseStatus::Completed)
    };
    skill
        .output_phase
        .as_deref()
        .and_then(completed)
        .or_else(|| graph.ordered().filter_map(|p| completed(&p.id)).last())
        .map(|r| r.output.clone())
}

pub(crate) fn phase_request(phase: &Phase, model_id: &str, prompt: String) -> CompletionRequest {
    CompletionRequest::new(model_id, prompt)
        .with_system_prompt(phase.system_prompt.clone())
        .with_max_tokens(phase.max_tokens)
        .with_temperature(phase.temperature)
}

/// Fold a routed response into a running phase result.
pub(crate) fn complete_result(result: &mut PhaseResult, routed: &RoutedCompletion) {
    result.status = PhaseStatus::Completed;
    result.input_tokens = routed.response.input_tokens;
    result.output_tokens = routed.response.output_tokens;
    result.model_used = Some(if routed.response.model_used.is_empty() {
        routed.selection.model_id.clone()
    } else {
        routed.response.model_used.clone()
    });
    result.provider_used = Some(routed.selection.provider.clone());
    result.is_fallback = routed.selection.is_fallback;
    result.output = routed.response.content.clone();
}

pub(crate) fn fail_result(result: &mut PhaseResult, err: &ConductorError) {
    result.status = PhaseStatus::Failed;
    result.error = Some(match err {
        ConductorError::Cancelled(_) => "cancelled".to_string(),
        other => other.to_string(),
    });
}

async fn run_phase(
    ctx: &EngineContext,
    phase: &Phase,
    profile: RoutingProfile,
    prompt: String,
    cancel: &CancellationToken,
) -> PhaseOutcome {
    let mut result = PhaseResult::pending(phase);
    result.status = PhaseStatus::Running;
    result.started_at = Some(Utc::now());
    let started = Instant::now();
    info!(phase = %phase.id, profile = %profile, "Phase started");

    let outcome: ConductorResult<RoutedCompletion> = async {
        let selection = ctx.router.select(profile)?;
        let request = phase_request(phase, &selection.model_id, prompt);
        ctx.router.complete(&selection, &request, cancel).await
    }
    .await;
    result.duration_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(routed) => {
            complete_result(&mut result, &routed);
            info!(
                phase = %phase.id,
                provider = %routed.selection.provider,
                model = %routed.selection.model_id,
                is_fallback = routed.selection.is_fallback,
                input_tokens = result.input_tokens,
                output_tokens = result.output_tokens,
                duration_ms = result.duration_ms,
                "Phase completed"
            );
            PhaseOutcome {
                result,
                cost: routed.cost,
            }
        }
        Err(e) => {
            fail_result(&mut result, &e);
            error!(phase = %phase.id, error = %e, "Phase failed");
            PhaseOutcome { result, cost: 0.0 }
        }
    }
}

async fn persist(store: &dyn CheckpointStore, checkpoint: &Checkpoint) {
    if let Err(e) = store.save(checkpoint).await {
        warn!(
            fingerprint = %checkpoint.fingerprint,
            error = %e,
            "Checkpoint save failed, continuing"
        );
    }
}

fn finished_result(
    skill: &Skill,
    graph: &PhaseGraph,
    checkpoint: Checkpoint,
    started: Instant,
) -> ExecutionResult {
    let phases = checkpoint.phases;
    ExecutionResult {
        run_id: Uuid::new_v4(),
        skill: skill.name.clone(),
        status: ExecutionStatus::Completed,
        total_tokens: ExecutionResult::sum_tokens(&phases),
        phases,
        phase_order: graph.ordered().map(|p| p.id.clone()).collect(),
        duration_ms: started.elapsed().as_millis() as u64,
        total_cost: 0.0,
        final_output: checkpoint.final_output,
        error: None,
        fingerprint: Some(checkpoint.fingerprint),
        resumed: true,
    }
}
