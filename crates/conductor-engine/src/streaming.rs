use crate::context::EngineContext;
use crate::executor::{blocked_reason, ensure_providers, fail_result, final_output, phase_request};
use crate::graph::PhaseGraph;
use crate::planner::effective_profile;
use crate::prompt::{render_prompt, DependencyOutput};
use crate::types::{ExecutionResult, ExecutionStatus, RunOptions};
use chrono::Utc;
use conductor_core::{
    ConductorError, ConductorResult, FailurePolicy, Phase, PhaseResult, PhaseStatus, Skill,
};
use conductor_providers::{CompletionResponse, ModelSelection, RoutedStream, StreamEvent};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Capacity of the event channel handed to the consumer.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle event of a streaming execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A phase is about to call its provider.
    PhaseStarted {
        phase_id: String,
        name: String,
        /// Position of the phase in plan order.
        index: usize,
    },
    /// A text fragment produced by the running phase.
    PhaseProgress { phase_id: String, fragment: String },
    /// Running totals over every phase finished so far.
    TokenUpdate {
        input_tokens: u64,
        output_tokens: u64,
    },
    /// A phase finished with its token counts.
    PhaseCompleted {
        phase_id: String,
        input_tokens: u64,
        output_tokens: u64,
    },
    /// A phase failed or was cancelled.
    PhaseFailed { phase_id: String, error: String },
    /// A phase did not run.
    PhaseSkipped { phase_id: String, reason: String },
    /// Last event of every run.
    WorkflowCompleted { success: bool },
}

/// Runs a skill one phase at a time, emitting [`WorkflowEvent`]s as it goes.
///
/// Phases run in plan order so events of different phases never interleave.
/// Streaming runs never read or write checkpoints.
pub struct StreamingExecutor {
    ctx: Arc<EngineContext>,
}

impl StreamingExecutor {
    /// A streaming executor over a shared context.
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        Self { ctx }
    }

    /// Validate the skill and start the run.
    ///
    /// Returns the event receiver and a handle resolving to the final result.
    /// The run stops emitting events once `options.cancel` fires or the
    /// receiver is dropped.
    pub fn execute(
        &self,
        skill: Arc<Skill>,
        input: impl Into<String>,
        options: RunOptions,
    ) -> ConductorResult<(
        mpsc::Receiver<WorkflowEvent>,
        JoinHandle<ConductorResult<ExecutionResult>>,
    )> {
        let graph = PhaseGraph::build(&skill)?;
        ensure_providers(&self.ctx)?;

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let run = StreamRun {
            ctx: self.ctx.clone(),
            skill,
            graph,
            input: input.into(),
            options,
            events: tx,
        };
        let handle = tokio::spawn(run.drive());
        Ok((rx, handle))
    }
}

struct StreamRun {
    ctx: Arc<EngineContext>,
    skill: Arc<Skill>,
    graph: PhaseGraph,
    input: String,
    options: RunOptions,
    events: mpsc::Sender<WorkflowEvent>,
}

impl StreamRun {
    async fn emit(&self, event: WorkflowEvent) {
        if self.options.cancel.is_cancelled() {
            return;
        }
        // A dropped receiver only means nobody is watching.
        let _ = self.events.send(event).await;
    }

    async fn drive(self) -> ConductorResult<ExecutionResult> {
        let started = Instant::now();
        let cancel = self.options.cancel.clone();
        let policy = self.skill.routing().failure_policy;
        let phases: Vec<Phase> = self.graph.ordered().cloned().collect();

        info!(skill = %self.skill.name, phases = phases.len(), "Starting streaming workflow");

        let mut results: BTreeMap<String, PhaseResult> = BTreeMap::new();
        let mut halt: Option<String> = None;
        let mut first_error: Option<String> = None;
        let mut cost = 0.0;
        let (mut input_total, mut output_total) = (0u64, 0u64);

        for (index, phase) in phases.iter().enumerate() {
            if halt.is_none() && cancel.is_cancelled() {
                halt = Some("cancelled".to_string());
            }
            let reason = halt.clone().or_else(|| blocked_reason(phase, &results));
            if let Some(reason) = reason {
                self.emit(WorkflowEvent::PhaseSkipped {
                    phase_id: phase.id.clone(),
                    reason: reason.clone(),
                })
                .await;
                results.insert(phase.id.clone(), PhaseResult::skipped(phase, reason));
                continue;
            }

            self.emit(WorkflowEvent::PhaseStarted {
                phase_id: phase.id.clone(),
                name: phase.display_name().to_string(),
                index,
            })
            .await;

            let (result, phase_cost) = self.run_phase(phase, &results, &cancel).await;
            cost += phase_cost;

            match result.status {
                PhaseStatus::Completed => {
                    input_total += result.input_tokens;
                    output_total += result.output_tokens;
                    self.emit(WorkflowEvent::PhaseCompleted {
                        phase_id: phase.id.clone(),
                        input_tokens: result.input_tokens,
                        output_tokens: result.output_tokens,
                    })
                    .await;
                    self.emit(WorkflowEvent::TokenUpdate {
                        input_tokens: input_total,
                        output_tokens: output_total,
                    })
                    .await;
                }
                _ => {
                    let message = result.error.clone().unwrap_or_default();
                    self.emit(WorkflowEvent::PhaseFailed {
                        phase_id: phase.id.clone(),
                        error: message.clone(),
                    })
                    .await;
                    if first_error.is_none() {
                        first_error = Some(format!("phase '{}' failed: {message}", phase.id));
                    }
                    if cancel.is_cancelled() {
                        halt = Some("cancelled".to_string());
                    } else if halt.is_none()
                        && (phase.required || policy == FailurePolicy::AbortWorkflow)
                    {
                        halt = Some(format!("workflow aborted: phase '{}' failed", phase.id));
                    }
                }
            }
            results.insert(phase.id.clone(), result);
        }

        let all_completed = results
            .values()
            .all(|r| r.status == PhaseStatus::Completed);
        let status = if all_completed {
            ExecutionStatus::Completed
        } else if cancel.is_cancelled() {
            ExecutionStatus::Cancelled
        } else {
            ExecutionStatus::Failed
        };
        let error = match status {
            ExecutionStatus::Completed => None,
            ExecutionStatus::Cancelled => Some("workflow cancelled".to_string()),
            ExecutionStatus::Failed => halt.or(first_error),
        };

        self.emit(WorkflowEvent::WorkflowCompleted {
            success: status == ExecutionStatus::Completed,
        })
        .await;

        let result = ExecutionResult {
            run_id: Uuid::new_v4(),
            skill: self.skill.name.clone(),
            status,
            total_tokens: ExecutionResult::sum_tokens(&results),
            final_output: final_output(&self.skill, &self.graph, &results),
            phases: results,
            phase_order: phases.iter().map(|p| p.id.clone()).collect(),
            duration_ms: started.elapsed().as_millis() as u64,
            total_cost: cost,
            error,
            fingerprint: None,
            resumed: false,
        };
        info!(
            skill = %result.skill,
            status = %result.status,
            total_tokens = result.total_tokens,
            duration_ms = result.duration_ms,
            "Streaming workflow finished"
        );
        Ok(result)
    }

    async fn run_phase(
        &self,
        phase: &Phase,
        results: &BTreeMap<String, PhaseResult>,
        cancel: &CancellationToken,
    ) -> (PhaseResult, f64) {
        let mut result = PhaseResult::pending(phase);
        result.status = PhaseStatus::Running;
        result.started_at = Some(Utc::now());
        let started = Instant::now();

        let deps: Vec<DependencyOutput<'_>> = phase
            .depends_on
            .iter()
            .filter_map(|id| {
                let dep = self.skill.get_phase(id)?;
                let done = results.get(id)?;
                Some(DependencyOutput::new(dep, &done.output))
            })
            .collect();
        let prompt = render_prompt(&phase.prompt, &self.input, &deps, self.ctx.memory());
        let profile = effective_profile(phase, self.options.profile, &self.skill);

        let opened: ConductorResult<RoutedStream> = async {
            let selection = self.ctx.router.select(profile)?;
            let request = phase_request(phase, &selection.model_id, prompt);
            self.ctx.router.stream(&selection, &request, cancel).await
        }
        .await;

        let outcome = match opened {
            Ok(stream) => self.pump(phase, stream, cancel).await,
            Err(e) => Err(e),
        };
        result.duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok((response, selection, cost)) => {
                result.status = PhaseStatus::Completed;
                result.input_tokens = response.input_tokens;
                result.output_tokens = response.output_tokens;
                result.model_used = Some(if response.model_used.is_empty() {
                    selection.model_id.clone()
                } else {
                    response.model_used
                });
                result.provider_used = Some(selection.provider);
                result.is_fallback = selection.is_fallback;
                result.output = response.content;
                (result, cost)
            }
            Err(e) => {
                fail_result(&mut result, &e);
                error!(phase = %phase.id, error = %e, "Streaming phase failed");
                (result, 0.0)
            }
        }
    }

    /// Forward text deltas until the provider finishes or the run is cancelled.
    async fn pump(
        &self,
        phase: &Phase,
        stream: RoutedStream,
        cancel: &CancellationToken,
    ) -> ConductorResult<(CompletionResponse, ModelSelection, f64)> {
        let RoutedStream {
            mut events,
            handle,
            selection,
        } = stream;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    handle.abort();
                    return Err(ConductorError::Cancelled(format!("phase '{}' cancelled", phase.id)));
                }
                event = events.recv() => match event {
                    Some(StreamEvent::TextDelta { text }) => {
                        self.emit(WorkflowEvent::PhaseProgress {
                            phase_id: phase.id.clone(),
                            fragment: text,
                        })
                        .await;
                    }
                    Some(StreamEvent::Error { message }) => {
                        warn!(phase = %phase.id, error = %message, "Provider reported a stream error");
                    }
                    Some(StreamEvent::Usage { .. }) => {}
                    Some(StreamEvent::Done) | None => break,
                }
            }
        }

        let response = match handle.await {
            Ok(response) => response?,
            Err(e) => {
                return Err(ConductorError::Provider(format!("stream task failed: {e}")));
            }
        };
        let cost = self
            .ctx
            .router
            .pricing(&selection)
            .map(|p| p.cost(response.input_tokens, response.output_tokens))
            .unwrap_or(0.0);
        Ok((response, selection, cost))
    }
}
