//! covpipe - coverage CI pipeline CLI
//!
//! ## Commands
//!
//! - `run`: evaluate the trigger and run the coverage pipeline
//! - `should-run`: print whether an event would start a run
//! - `plan`: print every step's command and environment
//! - `workflow`: render the equivalent GitHub Actions workflow
//! - `verify-pin`: check the installed grcov against the pin

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use codecov_upload::{CodecovClient, CodecovConfig, UploadToken};
use covpipe_ci::telemetry::level_for;
use covpipe_ci::{
    CiGate, CommandRunner, CoveragePipeline, PipelineConfig, PipelineFingerprint, PipelineResult,
    PipelineStage, ProcessExecutor, RunContext, RunStatus, StageConfig, TriggerEvent, Workflow,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "covpipe")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Coverage CI pipeline for Rust workspaces", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Pipeline config (default: ./covpipe.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate the trigger and run the coverage pipeline
    Run {
        #[command(flatten)]
        event: EventArgs,

        /// Commit SHA the coverage belongs to
        #[arg(long, env = "GITHUB_SHA")]
        commit: Option<String>,

        /// Repository slug (owner/repo)
        #[arg(long, env = "GITHUB_REPOSITORY")]
        repository: Option<String>,

        /// Build identifier reported with the upload
        #[arg(long, env = "GITHUB_RUN_ID")]
        build: Option<String>,

        /// Workspace under test (overrides the config)
        #[arg(short, long)]
        workspace: Option<PathBuf>,

        /// Generate the report but do not upload it
        #[arg(long)]
        no_upload: bool,

        /// Write the run result as JSON to this file
        #[arg(long)]
        summary: Option<PathBuf>,
    },

    /// Print whether an event starts a run (true/false)
    ShouldRun {
        #[command(flatten)]
        event: EventArgs,
    },

    /// Print each stage's commands and environment without running them
    Plan {
        /// Also print the resolved configuration
        #[arg(long)]
        show_config: bool,
    },

    /// Render the equivalent GitHub Actions workflow
    Workflow {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compare the installed grcov version with the pin
    VerifyPin,
}

/// The source-control event, defaulting to what GitHub Actions exports.
#[derive(Args, Debug, Clone)]
struct EventArgs {
    /// Event name (push, pull_request, ...)
    #[arg(long, env = "GITHUB_EVENT_NAME", default_value = "push")]
    event: String,

    /// Branch pushed to; shorthand for --ref refs/heads/<branch>
    #[arg(long)]
    branch: Option<String>,

    /// Full git ref (refs/heads/..., refs/pull/<n>/merge)
    #[arg(long = "ref", env = "GITHUB_REF")]
    git_ref: Option<String>,

    /// Pull request target branch
    #[arg(long, env = "GITHUB_BASE_REF")]
    base_branch: Option<String>,

    /// Pull request source branch
    #[arg(long, env = "GITHUB_HEAD_REF")]
    head_branch: Option<String>,
}

impl EventArgs {
    fn to_event(&self) -> TriggerEvent {
        let git_ref = self
            .branch
            .as_ref()
            .map(|b| format!("refs/heads/{}", b))
            .or_else(|| self.git_ref.clone());
        TriggerEvent::from_github(
            &self.event,
            git_ref.as_deref(),
            self.base_branch.as_deref(),
            self.head_branch.as_deref(),
        )
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    covpipe_ci::init_tracing(cli.json, level_for(cli.verbose));

    let config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load pipeline config")?;

    match cli.command {
        Commands::Run {
            event,
            commit,
            repository,
            build,
            workspace,
            no_upload,
            summary,
        } => {
            let overrides = ContextOverrides {
                commit,
                repository,
                build,
            };
            cmd_run(
                config,
                &event,
                overrides,
                workspace,
                no_upload,
                summary.as_deref(),
            )
            .await
        }
        Commands::ShouldRun { event } => cmd_should_run(&config, &event),
        Commands::Plan { show_config } => cmd_plan(&config, show_config),
        Commands::Workflow { output } => cmd_workflow(&config, output.as_deref()),
        Commands::VerifyPin => cmd_verify_pin(&config).await,
    }
}

/// CLI values that replace what the environment provides.
struct ContextOverrides {
    commit: Option<String>,
    repository: Option<String>,
    build: Option<String>,
}

impl ContextOverrides {
    fn apply(self, ctx: &mut RunContext) {
        if self.commit.is_some() {
            ctx.commit_sha = self.commit;
        }
        ctx.override_build(self.repository, self.build);
    }
}

async fn cmd_run(
    mut config: PipelineConfig,
    event: &EventArgs,
    overrides: ContextOverrides,
    workspace: Option<PathBuf>,
    no_upload: bool,
    summary_path: Option<&Path>,
) -> Result<ExitCode> {
    if let Some(workspace) = workspace {
        config.workspace = workspace;
    }
    if no_upload {
        config.upload.enabled = false;
    }

    let mut ctx = RunContext::from_env();
    ctx.event = event.to_event();
    overrides.apply(&mut ctx);

    let token = UploadToken::from_env(&config.upload.token_env);
    if config.upload.enabled && token.is_none() {
        warn!(
            token_env = %config.upload.token_env,
            "No upload token set; only public repositories accept tokenless uploads"
        );
    }
    let mut codecov = CodecovConfig::new(&config.upload.url);
    if let Some(token) = token {
        codecov = codecov.with_token(token);
    }
    let uploader = Arc::new(CodecovClient::new(codecov).context("Failed to build Codecov client")?);

    println!("Running coverage pipeline for workspace: {:?}", config.workspace);
    println!("Event: {}", ctx.event);
    if let Some(sha) = &ctx.commit_sha {
        println!("Git SHA: {}", sha);
    }
    println!();

    let upload_policy = config.policy.upload_failure;
    let pipeline = CoveragePipeline::new(config, Arc::new(ProcessExecutor), uploader);
    let shutdown = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler available; never cancel.
            std::future::pending::<()>().await;
        }
    };
    let result = pipeline
        .run_with_shutdown(&ctx, shutdown)
        .await
        .context("Coverage pipeline failed to run")?;

    if let Some(path) = summary_path {
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write summary to {:?}", path))?;
        info!(path = %path.display(), "Wrote run summary");
    }

    print_result(&result);

    let verdict = CiGate::evaluate(&result.events, upload_policy);
    if result.status != RunStatus::Skipped {
        println!("Gate: {}", if verdict.passed { "✓ PASSED" } else { "✗ FAILED" });
        for violation in &verdict.violations {
            println!("  - {}", violation);
        }
        for warning in &verdict.coverage_warnings {
            println!("  ! {}", warning);
        }
    }

    Ok(exit_code(result.status))
}

fn print_result(result: &PipelineResult) {
    println!("Run ID: {}", result.run_id);
    println!("Fingerprint: {}", result.fingerprint.short());
    println!("Status: {}", result.status);
    println!("Duration: {}ms", result.duration_ms);
    println!();

    for step in &result.steps {
        let mark = if step.result.passed() { "✓" } else { "✗" };
        println!(
            "  {} {}/{} ({}ms, exit code: {})",
            mark, step.stage, step.result.stage_name, step.result.duration_ms, step.result.exit_code
        );
    }

    if let Some(summary) = result.report.as_ref().and_then(|r| r.summary) {
        println!();
        println!(
            "Coverage: {:.2}% lines ({}/{}), {:.2}% functions ({}/{}) across {} file(s)",
            summary.line_percent(),
            summary.lines_hit,
            summary.lines_found,
            summary.function_percent(),
            summary.functions_hit,
            summary.functions_found,
            summary.files
        );
    }
    if let Some(upload) = &result.upload {
        println!("Report: {}", upload.report_url);
    }

    println!();
    println!(
        "Summary: {}/{} steps passed",
        result.passed_count(),
        result.steps.len()
    );
}

fn exit_code(status: RunStatus) -> ExitCode {
    ExitCode::from(status.exit_code().clamp(0, 255) as u8)
}

fn cmd_should_run(config: &PipelineConfig, event: &EventArgs) -> Result<ExitCode> {
    let event = event.to_event();
    let should_run = config.trigger.should_run(&event);
    info!(event = %event, should_run, "Trigger evaluated");
    println!("{}", should_run);
    Ok(ExitCode::SUCCESS)
}

fn cmd_plan(config: &PipelineConfig, show_config: bool) -> Result<ExitCode> {
    let fingerprint = PipelineFingerprint::compute(config);
    println!("Workspace: {:?}", config.workspace);
    println!(
        "Trigger: push to '{}', any pull request",
        config.trigger.primary_branch
    );
    println!("Fingerprint: {}", fingerprint.digest);
    println!();

    for stage in PipelineStage::ALL {
        println!("[{}]", stage);
        let commands = stage.commands(config);
        if stage == PipelineStage::Upload {
            if config.upload.enabled {
                println!(
                    "  upload {} to {} (token from ${})",
                    config.report_dir().display(),
                    config.upload.url,
                    config.upload.token_env
                );
            } else {
                println!("  (disabled)");
            }
        }
        for command in &commands {
            print_command(command);
        }
        if stage == PipelineStage::Install {
            println!("  {}", config.grcov.version_command().join(" "));
        }
    }

    println!();
    println!(
        "Policy: report_on_test_failure={}, upload_failure={:?}",
        config.policy.report_on_test_failure, config.policy.upload_failure
    );

    if show_config {
        println!();
        print!("{}", config.to_toml_string()?);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_command(command: &StageConfig) {
    for (key, value) in &command.env {
        println!("  {}={}", key, covpipe_ci::stage::shell_quote(value));
    }
    println!("  {}", command.shell_line());
}

fn cmd_workflow(config: &PipelineConfig, output: Option<&Path>) -> Result<ExitCode> {
    let yaml = Workflow::from_config(config).to_yaml()?;
    match output {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, yaml).with_context(|| format!("Failed to write {:?}", path))?;
            info!(path = %path.display(), "Wrote workflow");
        }
        None => print!("{}", yaml),
    }
    Ok(ExitCode::SUCCESS)
}

async fn cmd_verify_pin(config: &PipelineConfig) -> Result<ExitCode> {
    let tool = &config.grcov;
    let step = StageConfig::custom(
        covpipe_ci::stage::steps::VERIFY_GRCOV.to_string(),
        tool.version_command(),
        60,
    );
    let result = CommandRunner::execute_stage(&step)
        .await
        .with_context(|| format!("Failed to run '{}'", step.shell_line()))?;
    if !result.passed() {
        anyhow::bail!(
            "'{}' exited with code {}: {}",
            step.shell_line(),
            result.exit_code,
            result.stderr.trim()
        );
    }

    match tool.verify(&result.stdout) {
        Ok(version) => {
            println!("✓ {} {} matches pin", tool.name, version);
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            println!("✗ {}", e);
            println!("  reinstall with: {}", tool.install_command().join(" "));
            Ok(ExitCode::FAILURE)
        }
    }
}
