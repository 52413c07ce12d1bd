//! Integration tests for the coverage pipeline with scripted fakes.

use covpipe_ci::events::EventKind;
use covpipe_ci::fakes::{RecordingUploader, ScriptedExecutor, StepScript, SAMPLE_LCOV};
use covpipe_ci::stage::steps;
use covpipe_ci::{
    CiGate, CoveragePipeline, FailureKind, PipelineConfig, PipelineResult, PipelineStage,
    RunContext, RunStatus, TriggerEvent, UploadFailurePolicy,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

struct Harness {
    dir: TempDir,
    config: PipelineConfig,
}

impl Harness {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PipelineConfig {
            workspace: dir.path().to_path_buf(),
            ..Default::default()
        };
        Self { dir, config }
    }

    fn happy(&self) -> ScriptedExecutor {
        ScriptedExecutor::happy_path(&self.config)
    }

    async fn run(
        &self,
        executor: &Arc<ScriptedExecutor>,
        uploader: &Arc<RecordingUploader>,
        ctx: &RunContext,
    ) -> PipelineResult {
        CoveragePipeline::new(self.config.clone(), executor.clone(), uploader.clone())
            .run(ctx)
            .await
            .expect("pipeline run")
    }
}

fn push_to(branch: &str) -> RunContext {
    RunContext::for_event(TriggerEvent::push(branch)).with_commit("abc123")
}

fn step_names(result: &PipelineResult) -> Vec<&str> {
    result
        .steps
        .iter()
        .map(|s| s.result.stage_name.as_str())
        .collect()
}

/// Test: push to the primary branch runs every stage and uploads once
#[tokio::test]
async fn test_push_to_primary_uploads_report() {
    let h = Harness::new();
    let executor = Arc::new(h.happy());
    let uploader = Arc::new(RecordingUploader::new());

    let result = h.run(&executor, &uploader, &push_to("master")).await;

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(result.failed_count(), 0);
    assert_eq!(
        step_names(&result),
        vec![
            steps::INSTALL_TOOLCHAIN,
            steps::SELECT_TOOLCHAIN,
            steps::INSTALL_GRCOV,
            steps::VERIFY_GRCOV,
            steps::CLEAR_STALE_DATA,
            steps::CARGO_TEST,
            steps::DISCOVER_ARTIFACTS,
            steps::GRCOV_REPORT,
            steps::COLLECT_REPORT,
            steps::CODECOV_UPLOAD,
        ]
    );
    assert_eq!(result.stages_run(), PipelineStage::ALL.to_vec());
    assert_eq!(result.stage_steps(PipelineStage::Test).count(), 2);
    assert_eq!(result.grcov_version.as_deref(), Some("0.8.2"));

    // Exactly one upload, of exactly the report directory contents.
    let uploads = uploader.uploads();
    assert_eq!(uploads.len(), 1);
    let report_file = h.dir.path().join("coverage/reports/lcov.info");
    assert_eq!(uploads[0].request.files, vec![report_file.clone()]);
    assert_eq!(uploads[0].contents, vec![(report_file, SAMPLE_LCOV.to_string())]);
    assert_eq!(uploads[0].request.commit, "abc123");
    assert_eq!(uploads[0].request.branch.as_deref(), Some("master"));
    assert!(result.upload.is_some());

    let summary = result.report.as_ref().and_then(|r| r.summary).expect("summary");
    assert_eq!(summary.functions_found, 2);
    assert_eq!(summary.functions_hit, 1);

    let verdict = CiGate::evaluate(&result.events, UploadFailurePolicy::Warn);
    assert!(verdict.passed, "{:?}", verdict.violations);
}

/// Test: only the test step is instrumented, with identical flag sets
#[tokio::test]
async fn test_instrumentation_reaches_test_step_only() {
    let h = Harness::new();
    let executor = Arc::new(h.happy());
    let uploader = Arc::new(RecordingUploader::new());

    h.run(&executor, &uploader, &push_to("master")).await;

    let test = executor.call(steps::CARGO_TEST).expect("cargo_test ran");
    assert_eq!(test.env["CARGO_INCREMENTAL"], "0");
    assert_eq!(
        test.env["RUSTFLAGS"],
        "-Zprofile -Ccodegen-units=1 -Cinline-threshold=0 -Clink-dead-code -Coverflow-checks=off"
    );
    assert_eq!(test.env["RUSTFLAGS"], test.env["RUSTDOCFLAGS"]);
    assert_eq!(
        test.command,
        vec!["cargo", "test", "--features", "integration-test", "--", "--nocapture"]
    );

    let install = executor.call(steps::INSTALL_GRCOV).expect("install ran");
    assert!(install.env.is_empty());
    assert_eq!(
        install.command,
        vec!["cargo", "install", "grcov", "--version", "0.8.2"]
    );
}

/// Test: pushes elsewhere never start a run
#[tokio::test]
async fn test_push_to_other_branch_is_skipped() {
    let h = Harness::new();
    let executor = Arc::new(h.happy());
    let uploader = Arc::new(RecordingUploader::new());

    let result = h.run(&executor, &uploader, &push_to("develop")).await;

    assert_eq!(result.status, RunStatus::Skipped);
    assert!(result.success());
    assert!(executor.calls().is_empty());
    assert_eq!(uploader.upload_count(), 0);

    let kinds: Vec<_> = result.events.iter().map(|e| &e.kind).collect();
    assert!(matches!(kinds[0], EventKind::RunStarted { .. }));
    assert!(matches!(
        kinds[1],
        EventKind::TriggerEvaluated {
            should_run: false,
            ..
        }
    ));
    assert!(matches!(
        kinds[2],
        EventKind::RunFinished {
            status: RunStatus::Skipped
        }
    ));
}

/// Test: pull requests run whatever their base branch
#[tokio::test]
async fn test_pull_request_runs_and_is_attributed() {
    let h = Harness::new();
    let executor = Arc::new(h.happy());
    let uploader = Arc::new(RecordingUploader::new());
    let ctx = RunContext::for_event(TriggerEvent::PullRequest {
        number: Some(42),
        base_branch: Some("release-1.x".to_string()),
        head_branch: Some("fix/overflow".to_string()),
    })
    .with_commit("def456");

    let result = h.run(&executor, &uploader, &ctx).await;

    assert_eq!(result.status, RunStatus::Succeeded);
    let request = &uploader.uploads()[0].request;
    assert_eq!(request.pull_request, Some(42));
    assert_eq!(request.branch.as_deref(), Some("fix/overflow"));
}

/// Test: failing tests still produce and upload coverage by default
#[tokio::test]
async fn test_test_failure_still_reports() {
    let h = Harness::new();
    let executor = Arc::new(h.happy().failing(steps::CARGO_TEST, 101));
    let uploader = Arc::new(RecordingUploader::new());

    let result = h.run(&executor, &uploader, &push_to("master")).await;

    assert_eq!(
        result.status,
        RunStatus::Failed {
            cause: FailureKind::Tests
        }
    );
    assert_eq!(result.status.exit_code(), 1);
    assert_eq!(uploader.upload_count(), 1);
    assert!(result.report.is_some());

    let verdict = CiGate::evaluate(&result.events, UploadFailurePolicy::Warn);
    assert!(!verdict.passed);
    assert_eq!(verdict.violations.len(), 1);
    assert!(verdict.violations[0].contains("cargo_test"));
}

/// Test: reporting can be switched off for failing test runs
#[tokio::test]
async fn test_test_failure_without_reporting() {
    let mut h = Harness::new();
    h.config.policy.report_on_test_failure = false;
    let executor = Arc::new(h.happy().failing(steps::CARGO_TEST, 101));
    let uploader = Arc::new(RecordingUploader::new());

    let result = h.run(&executor, &uploader, &push_to("master")).await;

    assert_eq!(
        result.status,
        RunStatus::Failed {
            cause: FailureKind::Tests
        }
    );
    assert!(executor.call(steps::GRCOV_REPORT).is_none());
    assert_eq!(uploader.upload_count(), 0);
}

/// Test: upload failure degrades the run under the default policy
#[tokio::test]
async fn test_upload_failure_warns_by_default() {
    let h = Harness::new();
    let executor = Arc::new(h.happy());
    let uploader = Arc::new(RecordingUploader::rejecting(503));

    let result = h.run(&executor, &uploader, &push_to("master")).await;

    assert_eq!(
        result.status,
        RunStatus::Degraded {
            cause: FailureKind::Upload
        }
    );
    assert_eq!(result.status.exit_code(), 0);
    assert_eq!(uploader.upload_count(), 1, "no retries");

    let verdict = CiGate::evaluate(&result.events, UploadFailurePolicy::Warn);
    assert!(verdict.passed);
    assert_eq!(verdict.coverage_warnings.len(), 1);
}

/// Test: upload failure fails the run when configured to
#[tokio::test]
async fn test_upload_failure_fails_run_when_strict() {
    let mut h = Harness::new();
    h.config.policy.upload_failure = UploadFailurePolicy::FailRun;
    let executor = Arc::new(h.happy());
    let uploader = Arc::new(RecordingUploader::rejecting(401));

    let result = h.run(&executor, &uploader, &push_to("master")).await;

    assert_eq!(
        result.status,
        RunStatus::Failed {
            cause: FailureKind::Upload
        }
    );
    assert_eq!(uploader.upload_count(), 1);
}

/// Test: a grcov that reports another version stops the run before tests
#[tokio::test]
async fn test_pin_mismatch_fails_installation() {
    let h = Harness::new();
    let executor = Arc::new(
        h.happy()
            .with(steps::VERIFY_GRCOV, StepScript::exit(0).stdout("grcov 0.9.1\n")),
    );
    let uploader = Arc::new(RecordingUploader::new());

    let result = h.run(&executor, &uploader, &push_to("master")).await;

    assert_eq!(
        result.status,
        RunStatus::Failed {
            cause: FailureKind::Installation
        }
    );
    assert!(executor.call(steps::CARGO_TEST).is_none());
    assert!(result.grcov_version.is_none());

    let verify = result
        .stage_steps(PipelineStage::Install)
        .find(|s| s.result.stage_name == steps::VERIFY_GRCOV)
        .expect("verify step recorded");
    assert!(verify.result.stderr.contains("0.9.1"));
}

/// Test: provisioning failure is fatal and nothing else runs
#[tokio::test]
async fn test_provisioning_failure_is_fatal() {
    let h = Harness::new();
    let executor = Arc::new(h.happy().with(
        steps::INSTALL_TOOLCHAIN,
        StepScript::spawn_error("rustup: command not found"),
    ));
    let uploader = Arc::new(RecordingUploader::new());

    let result = h.run(&executor, &uploader, &push_to("master")).await;

    assert_eq!(
        result.status,
        RunStatus::Failed {
            cause: FailureKind::Provisioning
        }
    );
    assert_eq!(executor.call_names(), vec![steps::INSTALL_TOOLCHAIN]);
    assert_eq!(result.steps[0].result.exit_code, -1);
}

/// Test: no raw artifacts means no report and no upload; stale data is not reused
#[tokio::test]
async fn test_missing_artifacts_fail_report_generation() {
    let h = Harness::new();
    let stale = h.dir.path().join("target/debug/deps/old-run.gcda");
    std::fs::create_dir_all(stale.parent().unwrap()).unwrap();
    std::fs::write(&stale, "stale").unwrap();

    let executor = Arc::new(h.happy().with(steps::CARGO_TEST, StepScript::exit(0)));
    let uploader = Arc::new(RecordingUploader::new());

    let result = h.run(&executor, &uploader, &push_to("master")).await;

    assert!(!stale.exists(), "stale counters must be cleared before tests");
    assert_eq!(
        result.status,
        RunStatus::Failed {
            cause: FailureKind::ReportGeneration
        }
    );
    assert!(executor.call(steps::GRCOV_REPORT).is_none());
    assert_eq!(uploader.upload_count(), 0);
}

/// Test: grcov that writes nothing fails report generation
#[tokio::test]
async fn test_empty_report_fails_report_generation() {
    let h = Harness::new();
    let executor = Arc::new(h.happy().with(steps::GRCOV_REPORT, StepScript::exit(0)));
    let uploader = Arc::new(RecordingUploader::new());

    let result = h.run(&executor, &uploader, &push_to("master")).await;

    assert_eq!(
        result.status,
        RunStatus::Failed {
            cause: FailureKind::ReportGeneration
        }
    );
    assert_eq!(uploader.upload_count(), 0);
}

/// Test: a report left by an earlier run is never collected again
#[tokio::test]
async fn test_previous_report_not_reused() {
    let h = Harness::new();
    let uploader = Arc::new(RecordingUploader::new());
    let first = h.run(&Arc::new(h.happy()), &uploader, &push_to("master")).await;
    assert_eq!(first.status, RunStatus::Succeeded);
    assert_eq!(uploader.upload_count(), 1);

    let report_file = h.dir.path().join("coverage/reports/lcov.info");
    assert!(report_file.exists());

    let executor = Arc::new(h.happy().with(steps::GRCOV_REPORT, StepScript::exit(0)));
    let uploader = Arc::new(RecordingUploader::new());
    let ctx = RunContext::for_event(TriggerEvent::push("master")).with_commit("def456");
    let second = h.run(&executor, &uploader, &ctx).await;

    assert_eq!(
        second.status,
        RunStatus::Failed {
            cause: FailureKind::ReportGeneration
        }
    );
    assert_eq!(uploader.upload_count(), 0);
    assert!(second.report.is_none());
    assert!(!report_file.exists());
}

/// Test: counters that cannot be cleared fail the test stage and block reporting
#[cfg(unix)]
#[tokio::test]
async fn test_uncleared_counters_block_report() {
    use std::os::unix::fs::PermissionsExt;

    let h = Harness::new();
    let deps = h.dir.path().join("target/debug/deps");
    std::fs::create_dir_all(&deps).unwrap();
    std::fs::write(deps.join("old-run.gcda"), "stale").unwrap();
    std::fs::set_permissions(&deps, std::fs::Permissions::from_mode(0o555)).unwrap();

    // Privileged users ignore directory permissions; nothing to exercise then.
    let canary = deps.join(".canary");
    if std::fs::write(&canary, "").is_ok() {
        std::fs::remove_file(&canary).unwrap();
        std::fs::set_permissions(&deps, std::fs::Permissions::from_mode(0o755)).unwrap();
        return;
    }

    let executor = Arc::new(h.happy());
    let uploader = Arc::new(RecordingUploader::new());
    let result = h.run(&executor, &uploader, &push_to("master")).await;
    std::fs::set_permissions(&deps, std::fs::Permissions::from_mode(0o755)).unwrap();

    assert_eq!(
        result.status,
        RunStatus::Failed {
            cause: FailureKind::Tests
        }
    );
    let clear = result
        .stage_steps(PipelineStage::Test)
        .next()
        .expect("clear step recorded");
    assert_eq!(clear.result.stage_name, steps::CLEAR_STALE_DATA);
    assert!(!clear.result.passed());
    assert!(executor.call(steps::CARGO_TEST).is_none());
    assert!(executor.call(steps::GRCOV_REPORT).is_none());
    assert_eq!(uploader.upload_count(), 0);
}

/// Test: disabled upload leaves the report and succeeds
#[tokio::test]
async fn test_upload_disabled() {
    let mut h = Harness::new();
    h.config.upload.enabled = false;
    let executor = Arc::new(h.happy());
    let uploader = Arc::new(RecordingUploader::new());

    let result = h.run(&executor, &uploader, &push_to("master")).await;

    assert_eq!(result.status, RunStatus::Succeeded);
    assert_eq!(uploader.upload_count(), 0);
    assert!(h.dir.path().join("coverage/reports/lcov.info").exists());
}

/// Test: without a commit SHA the upload cannot be attributed
#[tokio::test]
async fn test_missing_commit_degrades() {
    let h = Harness::new();
    let executor = Arc::new(h.happy());
    let uploader = Arc::new(RecordingUploader::new());
    let ctx = RunContext::for_event(TriggerEvent::push("master"));

    let result = h.run(&executor, &uploader, &ctx).await;

    assert_eq!(
        result.status,
        RunStatus::Degraded {
            cause: FailureKind::Upload
        }
    );
    assert_eq!(uploader.upload_count(), 0);
}

/// Test: shutdown during the test step cancels the run
#[tokio::test]
async fn test_shutdown_cancels_active_step() {
    let h = Harness::new();
    let executor = Arc::new(h.happy().with(
        steps::CARGO_TEST,
        StepScript::exit(0).delayed(Duration::from_secs(30)),
    ));
    let uploader = Arc::new(RecordingUploader::new());

    let pipeline = CoveragePipeline::new(h.config.clone(), executor.clone(), uploader.clone());
    let result = pipeline
        .run_with_shutdown(
            &push_to("master"),
            tokio::time::sleep(Duration::from_millis(50)),
        )
        .await
        .expect("pipeline run");

    assert_eq!(result.status, RunStatus::Canceled);
    assert_eq!(result.status.exit_code(), 130);
    assert!(executor.call(steps::GRCOV_REPORT).is_none());
    assert_eq!(uploader.upload_count(), 0);

    let last = result.steps.last().expect("canceled step recorded");
    assert_eq!(last.result.stage_name, steps::CARGO_TEST);
    assert_eq!(last.result.stderr, "canceled");

    let verdict = CiGate::evaluate(&result.events, UploadFailurePolicy::Warn);
    assert!(!verdict.passed);
    assert!(verdict.violations.iter().all(|v| !v.contains("never completed")));
}

/// Test: identical configs share a fingerprint across runs
#[tokio::test]
async fn test_fingerprint_stable_across_runs() {
    let h = Harness::new();
    let uploader = Arc::new(RecordingUploader::new());

    let first = h.run(&Arc::new(h.happy()), &uploader, &push_to("master")).await;
    let second = h.run(&Arc::new(h.happy()), &uploader, &push_to("master")).await;

    assert_ne!(first.run_id, second.run_id);
    assert_eq!(first.fingerprint, second.fingerprint);
}
