//! Coverage pipeline orchestration and run recording.

use crate::artifacts::{CoverageArtifacts, CoverageReport};
use crate::config::{PipelineConfig, ReportFormat};
use crate::context::RunContext;
use crate::error::{CiError, Result};
use crate::events::{EventKind, EventLog, PipelineEvent};
use crate::identity::PipelineFingerprint;
use crate::lcov::LcovReport;
use crate::machine::{PipelineInput, PipelineMachine, RunStatus};
use crate::runner::{StageExecutor, StageResult};
use crate::stage::{steps, PipelineStage, StageConfig};
use codecov_upload::{CoverageUploader, UploadReceipt, UploadRequest, GITHUB_ACTIONS_SERVICE};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One executed step and the stage it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub stage: PipelineStage,
    #[serde(flatten)]
    pub result: StageResult,
}

/// Result of a complete pipeline execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: String,

    pub status: RunStatus,

    /// Steps in execution order.
    pub steps: Vec<StepRecord>,

    pub events: Vec<PipelineEvent>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    pub fingerprint: PipelineFingerprint,

    /// The generated report, once reporting succeeded.
    pub report: Option<CoverageReport>,

    /// Codecov's answer, once the upload succeeded.
    pub upload: Option<UploadReceipt>,

    /// grcov version confirmed after installation.
    pub grcov_version: Option<String>,
}

impl PipelineResult {
    /// Number of steps that passed.
    pub fn passed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.result.passed()).count()
    }

    /// Number of steps that failed.
    pub fn failed_count(&self) -> usize {
        self.steps.iter().filter(|s| !s.result.passed()).count()
    }

    pub fn success(&self) -> bool {
        self.status.is_success()
    }

    /// Steps of one stage.
    pub fn stage_steps(&self, stage: PipelineStage) -> impl Iterator<Item = &StepRecord> {
        self.steps.iter().filter(move |s| s.stage == stage)
    }

    /// Stages that ran at least one step, in order.
    pub fn stages_run(&self) -> Vec<PipelineStage> {
        let mut stages: Vec<PipelineStage> = Vec::new();
        for step in &self.steps {
            if stages.last() != Some(&step.stage) {
                stages.push(step.stage);
            }
        }
        stages
    }
}

/// Mutable bookkeeping for one run.
struct RunState {
    log: EventLog,
    steps: Vec<StepRecord>,
    /// Step started but not yet finished
    pending: Option<(PipelineStage, String, Instant)>,
    report: Option<CoverageReport>,
    upload: Option<UploadReceipt>,
    grcov_version: Option<String>,
    /// `.gcda` files from an earlier run could not be removed
    stale_data: bool,
}

impl RunState {
    fn new() -> Self {
        Self {
            log: EventLog::new(),
            steps: Vec::new(),
            pending: None,
            report: None,
            upload: None,
            grcov_version: None,
            stale_data: false,
        }
    }

    fn begin(&mut self, stage: PipelineStage, step: &str) {
        debug!(stage = %stage, step, "Step started");
        self.log.record(EventKind::StageStarted {
            stage,
            step: step.to_string(),
        });
        self.pending = Some((stage, step.to_string(), Instant::now()));
    }

    /// Record the outcome of the pending step; returns whether it passed.
    fn finish(&mut self, stage: PipelineStage, result: StageResult) -> bool {
        self.pending = None;
        let passed = result.passed();
        let error = if passed {
            None
        } else if result.exit_code == -1 {
            Some(result.stderr.trim().to_string())
        } else {
            Some(format!(
                "Step '{}' exited with code {}",
                result.stage_name, result.exit_code
            ))
        };

        if passed {
            info!(stage = %stage, step = %result.stage_name, duration_ms = result.duration_ms, "Step passed");
        } else {
            warn!(stage = %stage, step = %result.stage_name, exit_code = result.exit_code, error = ?error, "Step failed");
        }

        self.log.record(EventKind::StageFinished {
            stage,
            step: result.stage_name.clone(),
            exit_code: result.exit_code,
            success: passed,
            duration_ms: result.duration_ms,
            error,
        });
        self.steps.push(StepRecord { stage, result });
        passed
    }

    /// Close out a step interrupted by cancellation.
    fn cancel_pending(&mut self) {
        if let Some((stage, step, started)) = self.pending.take() {
            let elapsed = started.elapsed().as_millis() as u64;
            self.finish(
                stage,
                StageResult::errored(&step, "canceled".to_string(), elapsed),
            );
        }
    }

    /// Run an in-process step, turning its error into a failed result.
    fn in_process<F>(&mut self, stage: PipelineStage, step: &str, f: F) -> bool
    where
        F: FnOnce(&mut Self) -> Result<String>,
    {
        self.begin(stage, step);
        let start = Instant::now();
        let outcome = f(self);
        let elapsed = start.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(summary) => StageResult::ok(step, summary, elapsed),
            Err(e) => StageResult::errored(step, e.to_string(), elapsed),
        };
        self.finish(stage, result)
    }
}

/// Coverage pipeline orchestrator.
///
/// Drives a [`PipelineMachine`] through provision, install, test, report and
/// upload, running external commands through a [`StageExecutor`] and
/// handing the report to a [`CoverageUploader`].
pub struct CoveragePipeline {
    config: PipelineConfig,
    executor: Arc<dyn StageExecutor>,
    uploader: Arc<dyn CoverageUploader>,
}

impl CoveragePipeline {
    pub fn new(
        config: PipelineConfig,
        executor: Arc<dyn StageExecutor>,
        uploader: Arc<dyn CoverageUploader>,
    ) -> Self {
        Self {
            config,
            executor,
            uploader,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute the pipeline for `ctx` to completion.
    pub async fn run(&self, ctx: &RunContext) -> Result<PipelineResult> {
        self.run_with_shutdown(ctx, std::future::pending()).await
    }

    /// Execute the pipeline, canceling the active step when `shutdown` resolves.
    ///
    /// Each step produces one `StageStarted` event and one `StageFinished`
    /// event. The run ends as Skipped, Succeeded, Degraded, Failed or
    /// Canceled according to the state machine.
    pub async fn run_with_shutdown<F>(&self, ctx: &RunContext, shutdown: F) -> Result<PipelineResult>
    where
        F: Future<Output = ()>,
    {
        self.config.validate()?;

        let start = Instant::now();
        let run_id = Uuid::new_v4().to_string();
        let fingerprint = PipelineFingerprint::compute(&self.config);
        let mut machine = PipelineMachine::new(self.config.policy);
        let mut state = RunState::new();

        tokio::pin!(shutdown);

        state.log.record(EventKind::RunStarted {
            run_id: run_id.clone(),
            fingerprint: fingerprint.digest.clone(),
        });

        let should_run = self.config.trigger.should_run(&ctx.event);
        state.log.record(EventKind::TriggerEvaluated {
            event: ctx.event.to_string(),
            should_run,
        });
        info!(
            run_id = %run_id,
            event = %ctx.event,
            primary_branch = %self.config.trigger.primary_branch,
            should_run,
            "Trigger evaluated"
        );

        machine.apply(PipelineInput::TriggerEvaluated { should_run })?;
        if should_run {
            info!(run_id = %run_id, fingerprint = %fingerprint.short(), "Starting coverage pipeline");
            machine.apply(PipelineInput::Start)?;
        }

        while let Some(stage) = machine.active_stage() {
            info!(stage = %stage, state = %machine.state(), "Entering stage");

            let outcome = tokio::select! {
                passed = self.run_stage(stage, ctx, &mut state) => Some(passed),
                _ = &mut shutdown => None,
            };

            match outcome {
                Some(true) => {
                    machine.apply(PipelineInput::StageSucceeded)?;
                }
                Some(false) => {
                    machine.apply(PipelineInput::StageFailed)?;
                }
                None => {
                    warn!(stage = %stage, "Shutdown requested, canceling run");
                    state.cancel_pending();
                    machine.apply(PipelineInput::Cancel)?;
                }
            }
        }

        let status = machine.status().ok_or_else(|| CiError::InvalidTransition {
            state: machine.state().to_string(),
            input: "finish".to_string(),
        })?;
        state.log.record(EventKind::RunFinished { status });

        let duration_ms = start.elapsed().as_millis() as u64;
        match status {
            RunStatus::Failed { .. } | RunStatus::Canceled => {
                warn!(run_id = %run_id, status = %status, duration_ms, "Coverage pipeline finished")
            }
            _ => info!(run_id = %run_id, status = %status, duration_ms, "Coverage pipeline finished"),
        }

        Ok(PipelineResult {
            run_id,
            status,
            steps: state.steps,
            events: state.log.into_events(),
            duration_ms,
            fingerprint,
            report: state.report,
            upload: state.upload,
            grcov_version: state.grcov_version,
        })
    }

    /// Run every step of `stage`; returns whether the stage succeeded.
    async fn run_stage(&self, stage: PipelineStage, ctx: &RunContext, state: &mut RunState) -> bool {
        match stage {
            PipelineStage::Provision => self.run_commands(stage, state).await,
            PipelineStage::Install => {
                self.run_commands(stage, state).await && self.verify_pin(state).await
            }
            PipelineStage::Test => {
                if !self.clear_stale_artifacts(state) {
                    state.stale_data = true;
                    return false;
                }
                self.run_commands(stage, state).await
            }
            PipelineStage::GenerateReport => self.generate_report(state).await,
            PipelineStage::Upload => self.upload(ctx, state).await,
        }
    }

    async fn run_commands(&self, stage: PipelineStage, state: &mut RunState) -> bool {
        for config in stage.commands(&self.config) {
            if !self.execute_step(stage, &config, state).await {
                return false;
            }
        }
        true
    }

    /// Execute one external command, recording an error result if it could not run.
    async fn execute_step(
        &self,
        stage: PipelineStage,
        config: &StageConfig,
        state: &mut RunState,
    ) -> bool {
        let result = self.execute(stage, config, state).await;
        state.finish(stage, result)
    }

    async fn execute(
        &self,
        stage: PipelineStage,
        config: &StageConfig,
        state: &mut RunState,
    ) -> StageResult {
        state.begin(stage, &config.name);
        let start = Instant::now();
        match self.executor.execute(config).await {
            Ok(result) => result,
            Err(e) => StageResult::errored(
                &config.name,
                e.to_string(),
                start.elapsed().as_millis() as u64,
            ),
        }
    }

    /// Confirm the installed grcov reports exactly the pinned version.
    async fn verify_pin(&self, state: &mut RunState) -> bool {
        let tool = &self.config.grcov;
        let config = StageConfig::custom(
            steps::VERIFY_GRCOV.to_string(),
            tool.version_command(),
            self.config.stage_timeout_secs,
        )
        .in_dir(self.config.workspace.clone());

        let mut result = self.execute(PipelineStage::Install, &config, state).await;
        if result.passed() {
            match tool.verify(&result.stdout) {
                Ok(version) => {
                    info!(tool = %tool.name, version = %version, "Pinned tool verified");
                    state.grcov_version = Some(version.to_string());
                }
                Err(e) => {
                    result = StageResult::errored(&config.name, e.to_string(), result.duration_ms);
                }
            }
        }
        state.finish(PipelineStage::Install, result)
    }

    /// Leftover `.gcda` files would add earlier runs' counts to this one.
    fn clear_stale_artifacts(&self, state: &mut RunState) -> bool {
        let artifact_dir = self.config.artifact_dir();
        state.in_process(PipelineStage::Test, steps::CLEAR_STALE_DATA, |_| {
            let removed = CoverageArtifacts::remove_stale(&artifact_dir)?;
            if removed > 0 {
                debug!(removed, "Removed stale coverage data");
            }
            Ok(format!("{} stale data file(s) removed", removed))
        })
    }

    /// RAW -> REPORTED: artifacts must exist, grcov must succeed, the
    /// report directory (emptied first) must end up non-empty.
    async fn generate_report(&self, state: &mut RunState) -> bool {
        let stage = PipelineStage::GenerateReport;
        let artifact_dir = self.config.artifact_dir();
        let report_dir = self.config.report_dir();

        let discovered = state.in_process(stage, steps::DISCOVER_ARTIFACTS, |state| {
            if state.stale_data {
                return Err(CiError::StaleArtifacts(artifact_dir.clone()));
            }
            let cleared = CoverageReport::reset_dir(&report_dir)?;
            if cleared > 0 {
                debug!(cleared, dir = %report_dir.display(), "Cleared previous report output");
            }
            let artifacts = CoverageArtifacts::require(&artifact_dir)?;
            Ok(format!(
                "{} data file(s), {} note file(s)",
                artifacts.len(),
                artifacts.note_files
            ))
        });
        if !discovered || !self.run_commands(stage, state).await {
            return false;
        }

        let report_file = self.config.workspace.join(self.config.report.output_target());
        let lcov = self.config.report.format == ReportFormat::Lcov;
        state.in_process(stage, steps::COLLECT_REPORT, |state| {
            let mut report = CoverageReport::collect(&report_dir)?;
            if lcov {
                match std::fs::read_to_string(&report_file)
                    .map_err(CiError::from)
                    .and_then(|text| LcovReport::parse(&text))
                {
                    Ok(parsed) => {
                        let summary = parsed.summary();
                        info!(
                            files = summary.files,
                            line_percent = summary.line_percent(),
                            function_percent = summary.function_percent(),
                            "Coverage summary"
                        );
                        report = report.with_summary(summary);
                    }
                    Err(e) => warn!(error = %e, "Could not summarize lcov report"),
                }
            }
            let bytes = report.total_bytes()?;
            let summary = format!("{} file(s), {} bytes", report.files.len(), bytes);
            state.report = Some(report);
            Ok(summary)
        })
    }

    /// Hand the report to the uploader exactly once.
    async fn upload(&self, ctx: &RunContext, state: &mut RunState) -> bool {
        if !self.config.upload.enabled {
            info!("Upload disabled, leaving report in place");
            return true;
        }

        let stage = PipelineStage::Upload;
        state.begin(stage, steps::CODECOV_UPLOAD);
        let start = Instant::now();

        let outcome = match self.upload_request(ctx, state.report.as_ref()) {
            Ok(request) => self.uploader.upload(&request).await.map_err(CiError::from),
            Err(e) => Err(e),
        };

        let elapsed = start.elapsed().as_millis() as u64;
        let result = match outcome {
            Ok(receipt) => {
                info!(report_url = %receipt.report_url, files = receipt.files, bytes = receipt.bytes, "Coverage uploaded");
                let result = StageResult::ok(steps::CODECOV_UPLOAD, receipt.report_url.clone(), elapsed);
                state.upload = Some(receipt);
                result
            }
            Err(e) => StageResult::errored(steps::CODECOV_UPLOAD, e.to_string(), elapsed),
        };
        state.finish(stage, result)
    }

    fn upload_request(&self, ctx: &RunContext, report: Option<&CoverageReport>) -> Result<UploadRequest> {
        let report = report.ok_or_else(|| CiError::EmptyReport(self.config.report_dir()))?;
        let commit = ctx
            .commit_sha
            .clone()
            .ok_or(CiError::MissingContext("a commit SHA"))?;

        Ok(UploadRequest {
            report_dir: report.dir.clone(),
            files: report.files.clone(),
            commit,
            branch: ctx.upload_branch(),
            pull_request: ctx.pull_request_number(),
            slug: ctx.repository.clone(),
            build: ctx.build.clone(),
            build_url: ctx.build_url.clone(),
            service: GITHUB_ACTIONS_SERVICE.to_string(),
            flags: self.config.upload.flags.clone(),
            name: self.config.upload.name.clone(),
        })
    }
}
