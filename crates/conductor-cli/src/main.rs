//! `conductor`: plan, route and run multi-phase LLM skills from the terminal.

mod approval;
mod config;
mod output;

use crate::approval::StdinApprovalChannel;
use crate::config::{ConductorConfig, LogFormat};
use crate::output::{
    error_json, render_checkpoints, render_event, render_result, render_skills, render_usage,
    result_json,
};
use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use conductor_checkpoint::{CheckpointStore, FileCheckpointStore};
use conductor_core::{ConductorError, RoutingProfile, Skill};
use conductor_engine::{
    ApprovedRun, Engine, EngineContext, ExecutionResult, ExecutionStatus, RunOptions,
    WorkflowEvent,
};
use conductor_providers::ProviderRouter;
use conductor_skills::{SkillLoader, SkillRegistry};
use serde_json::json;
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "conductor",
    version,
    about = "Conductor — plan, route and run multi-phase LLM workflows"
)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, default_value = "conductor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a skill against a request
    Run(RunArgs),
    /// Show the execution plan for a skill, optionally approving and running it
    Plan(PlanArgs),
    /// Inspect loaded skills
    Skills {
        #[command(subcommand)]
        action: SkillAction,
    },
    /// Manage saved checkpoints
    Checkpoints {
        #[command(subcommand)]
        action: CheckpointAction,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Skill id or name
    skill: String,
    /// Request text handed to the skill as `{{input}}`
    request: String,
    /// Routing profile: cheap, balanced or premium
    #[arg(long, value_parser = parse_profile)]
    profile: Option<RoutingProfile>,
    /// Print phase output as it is generated
    #[arg(long)]
    stream: bool,
    /// Continue from an existing checkpoint
    #[arg(long, conflicts_with = "force")]
    resume: bool,
    /// Do not read or write checkpoints
    #[arg(long)]
    no_checkpoint: bool,
    /// Discard an existing checkpoint and start over
    #[arg(long)]
    force: bool,
    /// File whose contents are prepended to every phase prompt
    #[arg(long)]
    memory: Option<PathBuf>,
    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct PlanArgs {
    /// Skill id or name
    skill: String,
    /// Request text handed to the skill as `{{input}}`
    request: String,
    /// Routing profile: cheap, balanced or premium
    #[arg(long, value_parser = parse_profile)]
    profile: Option<RoutingProfile>,
    /// Ask for approval on the terminal, then run the plan
    #[arg(long, conflicts_with = "save_only")]
    approve: bool,
    /// Only write the plan to --output
    #[arg(long, requires = "output")]
    save_only: bool,
    /// Write the plan as JSON to this path
    #[arg(long)]
    output: Option<PathBuf>,
    /// Print machine-readable JSON
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
enum SkillAction {
    /// List loaded skills
    List {
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum CheckpointAction {
    /// List saved checkpoints
    List {
        #[arg(long)]
        json: bool,
    },
    /// Delete a checkpoint by fingerprint
    Delete { fingerprint: String },
}

impl Commands {
    fn json(&self) -> bool {
        match self {
            Commands::Run(args) => args.json,
            Commands::Plan(args) => args.json,
            Commands::Skills {
                action: SkillAction::List { json },
            } => *json,
            Commands::Checkpoints {
                action: CheckpointAction::List { json },
            } => *json,
            Commands::Checkpoints { .. } => false,
        }
    }

    /// Skill and profile named on the command line, for error reports.
    fn target(&self) -> (Option<String>, Option<String>) {
        match self {
            Commands::Run(args) => (
                Some(args.skill.clone()),
                args.profile.map(|p| p.to_string()),
            ),
            Commands::Plan(args) => (
                Some(args.skill.clone()),
                args.profile.map(|p| p.to_string()),
            ),
            _ => (None, None),
        }
    }
}

fn parse_profile(raw: &str) -> Result<RoutingProfile, String> {
    raw.parse().map_err(|e: ConductorError| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let json = cli.command.json();
    let (skill, profile) = cli.command.target();

    match run_cli(cli).await {
        Ok(code) => code,
        Err(e) => {
            if json {
                println!("{}", error_json(&e, skill.as_deref(), profile.as_deref()));
            } else {
                eprintln!("error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

async fn run_cli(cli: Cli) -> anyhow::Result<ExitCode> {
    let loaded = ConductorConfig::load(&cli.config).await?;
    let found = loaded.is_some();
    let config = loaded.unwrap_or_default();
    init_tracing(&config);
    if !found {
        warn!(path = %cli.config.display(), "Config file not found, using defaults");
    }

    match cli.command {
        Commands::Run(args) => run(&config, args).await,
        Commands::Plan(args) => plan(&config, args).await,
        Commands::Skills {
            action: SkillAction::List { json },
        } => list_skills(&config, json).await,
        Commands::Checkpoints { action } => checkpoints(&config, action).await,
    }
}

/// Logs go to stderr so stdout carries only results.
fn init_tracing(config: &ConductorConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn load_skills(config: &ConductorConfig) -> anyhow::Result<SkillRegistry> {
    let mut registry = SkillRegistry::new();
    let loaded = SkillLoader::new(config.skills_dir.clone())
        .load_all(&mut registry)
        .await?;
    if loaded == 0 {
        warn!(dir = %config.skills_dir.display(), "No skills loaded");
    }
    Ok(registry)
}

async fn build_engine(
    config: &ConductorConfig,
    memory: Option<String>,
    with_checkpoints: bool,
) -> anyhow::Result<Engine> {
    let router = ProviderRouter::from_config(config.routing.clone())?;
    let mut ctx = EngineContext::new(Arc::new(router));
    if with_checkpoints {
        let store = FileCheckpointStore::new(config.checkpoint_dir()).await?;
        ctx = ctx.with_checkpoints(Arc::new(store));
    }
    if let Some(machine_id) = &config.machine_id {
        ctx = ctx.with_machine_id(machine_id.clone());
    }
    if let Some(memory) = memory {
        ctx = ctx.with_memory(memory);
    }

    let skills = load_skills(config).await?;
    Ok(Engine::new(Arc::new(ctx), Arc::new(skills)))
}

fn cancel_on_ctrl_c(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling workflow");
            cancel.cancel();
        }
    });
}

fn run_options(profile: Option<RoutingProfile>) -> RunOptions {
    let cancel = CancellationToken::new();
    cancel_on_ctrl_c(cancel.clone());
    let options = RunOptions::default().with_cancel(cancel);
    match profile {
        Some(profile) => options.with_profile(profile),
        None => options,
    }
}

async fn run(config: &ConductorConfig, args: RunArgs) -> anyhow::Result<ExitCode> {
    let memory = match &args.memory {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read memory file {}", path.display()))?,
        ),
        None => None,
    };
    let engine = build_engine(config, memory, !args.no_checkpoint).await?;

    let mut options = run_options(args.profile);
    if args.resume {
        options = options.resume();
    }
    if args.force {
        options = options.force();
    }
    if args.no_checkpoint {
        options = options.without_checkpoint();
    }

    if !args.stream {
        let result = engine.run(&args.skill, &args.request, options).await?;
        return report(&engine, &result, args.json, true).await;
    }

    let (mut events, handle) = engine.run_streaming(&args.skill, &args.request, options)?;
    let mut stdout = std::io::stdout();
    while let Some(event) = events.recv().await {
        if args.json {
            println!("{}", serde_json::to_string(&event)?);
            continue;
        }
        match &event {
            WorkflowEvent::PhaseProgress { fragment, .. } => {
                write!(stdout, "{fragment}")?;
                stdout.flush()?;
            }
            WorkflowEvent::PhaseCompleted { .. } => {
                writeln!(stdout)?;
                if let Some(line) = render_event(&event) {
                    eprintln!("{line}");
                }
            }
            _ => {
                if let Some(line) = render_event(&event) {
                    eprintln!("{line}");
                }
            }
        }
    }
    let result = handle.await.context("streaming run did not finish")??;
    report(&engine, &result, args.json, false).await
}

/// Print a finished run with the router's per-provider usage and pick the
/// exit code.
async fn report(
    engine: &Engine,
    result: &ExecutionResult,
    json: bool,
    print_output: bool,
) -> anyhow::Result<ExitCode> {
    let usage = engine.context().router.usage();
    if json {
        let doc = result_json(result, usage.to_json().await)?;
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        if print_output && result.is_success() {
            if let Some(output) = &result.final_output {
                println!("{output}");
            }
        }
        eprintln!("{}", render_result(result));
        if let Some(lines) = render_usage(&usage.snapshot().await) {
            eprintln!("{lines}");
        }
    }

    Ok(match result.status {
        ExecutionStatus::Completed => ExitCode::SUCCESS,
        ExecutionStatus::Cancelled => ExitCode::from(130),
        ExecutionStatus::Failed => ExitCode::FAILURE,
    })
}

async fn plan(config: &ConductorConfig, args: PlanArgs) -> anyhow::Result<ExitCode> {
    let engine = build_engine(config, None, args.approve).await?;

    if args.approve {
        let approval = StdinApprovalChannel::default_timeout();
        let outcome = engine
            .run_approved(&args.skill, &args.request, run_options(args.profile), &approval)
            .await?;
        return match outcome {
            ApprovedRun::Executed(result) => report(&engine, &result, args.json, true).await,
            ApprovedRun::Rejected { plan, reason } => {
                if args.json {
                    let doc = json!({ "approved": false, "reason": reason, "plan": plan });
                    println!("{}", serde_json::to_string_pretty(&doc)?);
                } else {
                    match reason {
                        Some(reason) => eprintln!("Plan rejected: {reason}"),
                        None => eprintln!("Plan rejected"),
                    }
                }
                Ok(ExitCode::SUCCESS)
            }
        };
    }

    let plan = engine.plan(&args.skill, &args.request, args.profile)?;
    if let Some(path) = &args.output {
        let doc = serde_json::to_string_pretty(&plan)?;
        tokio::fs::write(path, doc)
            .await
            .with_context(|| format!("failed to write plan to {}", path.display()))?;
        info!(path = %path.display(), skill = %plan.skill_name, "Plan saved");
    }
    if args.save_only {
        return Ok(ExitCode::SUCCESS);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
    } else {
        println!("{}", plan.summary());
    }
    Ok(ExitCode::SUCCESS)
}

async fn list_skills(config: &ConductorConfig, json: bool) -> anyhow::Result<ExitCode> {
    let registry = load_skills(config).await?;
    let skills = registry.list();
    if json {
        let docs: Vec<&Skill> = skills.iter().map(|s| s.as_ref()).collect();
        println!("{}", serde_json::to_string_pretty(&docs)?);
    } else {
        println!("{}", render_skills(&skills));
    }
    Ok(ExitCode::SUCCESS)
}

async fn checkpoints(config: &ConductorConfig, action: CheckpointAction) -> anyhow::Result<ExitCode> {
    let store = FileCheckpointStore::new(config.checkpoint_dir()).await?;
    match action {
        CheckpointAction::List { json } => {
            let summaries = store.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                println!("{}", render_checkpoints(&summaries));
            }
            Ok(ExitCode::SUCCESS)
        }
        CheckpointAction::Delete { fingerprint } => {
            if store.delete(&fingerprint).await? {
                println!("Deleted checkpoint {fingerprint}");
                Ok(ExitCode::SUCCESS)
            } else {
                eprintln!("No checkpoint with fingerprint {fingerprint}");
                Ok(ExitCode::FAILURE)
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "conductor",
            "run",
            "code-review",
            "src/main.rs",
            "--profile",
            "cheap",
            "--resume",
            "--json",
            "--config",
            "custom.toml",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("custom.toml"));
        assert!(cli.command.json());
        assert_eq!(
            cli.command.target(),
            (Some("code-review".to_string()), Some("cheap".to_string()))
        );
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(args.resume);
        assert!(!args.force);
        assert!(!args.stream);
    }

    #[test]
    fn test_invalid_profile_rejected() {
        let err = Cli::try_parse_from(["conductor", "plan", "x", "y", "--profile", "fastest"]);
        assert!(err.is_err());
    }

    #[test]
    fn test_resume_conflicts_with_force() {
        let err = Cli::try_parse_from(["conductor", "run", "x", "y", "--resume", "--force"]);
        assert!(err.is_err());
    }

    #[test]
    fn test_save_only_requires_output() {
        assert!(Cli::try_parse_from(["conductor", "plan", "x", "y", "--save-only"]).is_err());
        let cli = Cli::try_parse_from([
            "conductor",
            "plan",
            "x",
            "y",
            "--save-only",
            "--output",
            "plan.json",
        ])
        .unwrap();
        let Commands::Plan(args) = cli.command else {
            panic!("expected plan");
        };
        assert_eq!(args.output, Some(PathBuf::from("plan.json")));
    }

    #[test]
    fn test_checkpoint_delete_parses() {
        let cli =
            Cli::try_parse_from(["conductor", "checkpoints", "delete", "abc123"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Checkpoints {
                action: CheckpointAction::Delete { ref fingerprint }
            } if fingerprint == "abc123"
        ));
    }
}
