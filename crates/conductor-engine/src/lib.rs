//! Workflow execution engine: planning, batch execution and streaming.
//!
//! A skill's phases are layered into dependency batches. The planner resolves
//! a provider and model per phase and estimates tokens and cost without calling
//! anything. The executor runs batches in order with concurrent phases inside a
//! batch, chains outputs into dependents and checkpoints progress. The
//! streaming executor runs phases one by one and reports lifecycle events.
//!
//! # Main types
//!
//! - [`Engine`] — Resolves skills and drives plan, approval and execution.
//! - [`EngineContext`] — Router, estimator, checkpoint store and memory shared by every run.
//! - [`Planner`] / [`ExecutionPlan`] — Pre-execution preview with batches and estimates.
//! - [`Executor`] / [`ExecutionResult`] — Batch execution with checkpointing.
//! - [`StreamingExecutor`] / [`WorkflowEvent`] — Event-emitting execution.
//! - [`PhaseGraph`] — Dependency layering of a skill's phases.

/// Shared engine dependencies.
pub mod context;
/// Top-level engine facade.
pub mod engine;
/// Batch executor.
pub mod executor;
/// Phase dependency graph and batch layering.
pub mod graph;
/// Execution planner.
pub mod planner;
/// Prompt template rendering.
pub mod prompt;
/// Streaming executor and its events.
pub mod streaming;
/// Plans, results and run options.
pub mod types;

pub use context::EngineContext;
pub use engine::{ApprovedRun, Engine};
pub use executor::Executor;
pub use graph::PhaseGraph;
pub use planner::{effective_profile, Planner};
pub use prompt::{render_prompt, DependencyOutput};
pub use streaming::{StreamingExecutor, WorkflowEvent, EVENT_CHANNEL_CAPACITY};
pub use types::{ExecutionPlan, ExecutionResult, ExecutionStatus, PhasePlan, RunOptions};
