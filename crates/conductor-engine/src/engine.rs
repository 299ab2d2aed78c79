use crate::context::EngineContext;
use crate::executor::Executor;
use crate::planner::Planner;
use crate::streaming::{StreamingExecutor, WorkflowEvent};
use crate::types::{ExecutionPlan, ExecutionResult, RunOptions};
use conductor_core::approval::ApprovalChannel;
use conductor_core::{ConductorResult, RoutingProfile, Skill};
use conductor_skills::SkillSource;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

/// Entry point tying skills, planning and execution together.
///
/// Implements the plan → approve → execute pattern over a shared
/// [`EngineContext`].
pub struct Engine {
    ctx: Arc<EngineContext>,
    skills: Arc<dyn SkillSource>,
}

/// Outcome of a run that required approval first.
#[derive(Debug)]
pub enum ApprovedRun {
    /// The plan was approved and ran.
    Executed(Box<ExecutionResult>),
    /// The reviewer declined; nothing ran.
    Rejected {
        plan: Box<ExecutionPlan>,
        reason: Option<String>,
    },
}

impl Engine {
    /// An engine over a shared context and a skill source.
    pub fn new(ctx: Arc<EngineContext>, skills: Arc<dyn SkillSource>) -> Self {
        Self { ctx, skills }
    }

    /// The shared context, including the router and its usage counters.
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Resolve a skill by id, then by name.
    pub fn skill(&self, reference: &str) -> ConductorResult<Arc<Skill>> {
        self.skills.resolve(reference)
    }

    /// Plan a skill by id or name.
    pub fn plan(
        &self,
        skill: &str,
        input: &str,
        profile: Option<RoutingProfile>,
    ) -> ConductorResult<ExecutionPlan> {
        let skill = self.skill(skill)?;
        Planner::new(self.ctx.clone()).plan(&skill, input, profile)
    }

    /// Run a skill by id or name in batches.
    pub async fn run(
        &self,
        skill: &str,
        input: &str,
        options: RunOptions,
    ) -> ConductorResult<ExecutionResult> {
        let skill = self.skill(skill)?;
        Executor::new(self.ctx.clone())
            .execute(&skill, input, options)
            .await
    }

    /// Plan, ask `approval`, and execute only when approved.
    pub async fn run_approved(
        &self,
        skill: &str,
        input: &str,
        options: RunOptions,
        approval: &dyn ApprovalChannel,
    ) -> ConductorResult<ApprovedRun> {
        let skill = self.skill(skill)?;
        let plan = Planner::new(self.ctx.clone()).plan(&skill, input, options.profile)?;
        let decision = approval.request_approval(plan.approval_request()).await?;
        if !decision.approved {
            info!(skill = %skill.name, reason = ?decision.reason, "Execution plan rejected");
            return Ok(ApprovedRun::Rejected {
                plan: Box::new(plan),
                reason: decision.reason,
            });
        }
        let result = Executor::new(self.ctx.clone())
            .execute(&skill, input, options)
            .await?;
        Ok(ApprovedRun::Executed(Box::new(result)))
    }

    /// Run a skill by id or name phase by phase, emitting events.
    pub fn run_streaming(
        &self,
        skill: &str,
        input: &str,
        options: RunOptions,
    ) -> ConductorResult<(
        mpsc::Receiver<WorkflowEvent>,
        JoinHandle<ConductorResult<ExecutionResult>>,
    )> {
        let skill = self.skill(skill)?;
        StreamingExecutor::new(self.ctx.clone()).execute(skill, input, options)
    }
}
