//! In-memory fakes for the pipeline seams (testing only)
//!
//! Provides `ScriptedExecutor` and `RecordingUploader`, which satisfy the
//! `StageExecutor` and `CoverageUploader` contracts without spawning
//! processes or touching the network.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use codecov_upload::{CoverageUploader, UploadError, UploadReceipt, UploadRequest};

use crate::config::PipelineConfig;
use crate::error::{CiError, Result};
use crate::runner::{StageExecutor, StageResult};
use crate::stage::{steps, StageConfig};

// ---------------------------------------------------------------------------
// ScriptedExecutor
// ---------------------------------------------------------------------------

/// Canned outcome for one step.
#[derive(Debug, Clone, Default)]
pub struct StepScript {
    pub exit_code: i32,
    pub stdout: String,
    /// Files written (relative to the step's working directory) before returning
    pub writes: Vec<(PathBuf, String)>,
    /// Return `Err` instead of a result, as if the command could not be spawned
    pub error: Option<String>,
    /// Sleep before returning
    pub delay: Option<Duration>,
}

impl StepScript {
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Default::default()
        }
    }

    pub fn stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.to_string();
        self
    }

    pub fn writes(mut self, path: impl Into<PathBuf>, contents: &str) -> Self {
        self.writes.push((path.into(), contents.to_string()));
        self
    }

    pub fn spawn_error(message: &str) -> Self {
        Self {
            error: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Executor that replays scripted outcomes keyed by step name.
/// Unscripted steps succeed with empty output.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    scripts: Mutex<HashMap<String, StepScript>>,
    calls: Mutex<Vec<StageConfig>>,
}

/// lcov for a crate with one function its tests reach and one they do not.
pub const SAMPLE_LCOV: &str = "\
TN:
SF:src/lib.rs
FN:1,reachable
FN:5,unreachable
FNDA:1,reachable
FNDA:0,unreachable
DA:1,1
DA:2,1
DA:5,0
DA:6,0
end_of_record
";

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every step succeeds: grcov reports the pinned version, the test run
    /// leaves a `.gcda` file and grcov writes an lcov report.
    pub fn happy_path(config: &PipelineConfig) -> Self {
        let gcda = config.report.artifact_dir.join("debug/deps/sample-0000.gcda");
        Self::new()
            .with(
                steps::VERIFY_GRCOV,
                StepScript::exit(0).stdout(&format!("grcov {}\n", config.grcov.version)),
            )
            .with(steps::CARGO_TEST, StepScript::exit(0).writes(gcda, "gcda"))
            .with(
                steps::GRCOV_REPORT,
                StepScript::exit(0).writes(config.report.output_target(), SAMPLE_LCOV),
            )
    }

    /// Set the outcome of `step`, replacing any earlier script.
    pub fn with(self, step: &str, script: StepScript) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(step.to_string(), script);
        self
    }

    /// Keep the scripted side effects of `step` but change its exit code.
    pub fn failing(self, step: &str, exit_code: i32) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .entry(step.to_string())
            .or_default()
            .exit_code = exit_code;
        self
    }

    /// Every step executed so far, in order.
    pub fn calls(&self) -> Vec<StageConfig> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_names(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|c| c.name.clone()).collect()
    }

    pub fn call(&self, step: &str) -> Option<StageConfig> {
        self.calls.lock().unwrap().iter().find(|c| c.name == step).cloned()
    }
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    async fn execute(&self, config: &StageConfig) -> Result<StageResult> {
        self.calls.lock().unwrap().push(config.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&config.name)
            .cloned()
            .unwrap_or_default();

        if let Some(delay) = script.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = script.error {
            return Err(CiError::Execution {
                stage: config.name.clone(),
                message,
            });
        }

        let base = config.working_dir.clone().unwrap_or_default();
        for (path, contents) in &script.writes {
            let path = base.join(path);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, contents)?;
        }

        Ok(StageResult {
            stage_name: config.name.clone(),
            exit_code: script.exit_code,
            stdout: script.stdout,
            stderr: String::new(),
            duration_ms: 0,
            success: script.exit_code == 0,
        })
    }
}

// ---------------------------------------------------------------------------
// RecordingUploader
// ---------------------------------------------------------------------------

/// An upload as the fake saw it, with file contents read at upload time.
#[derive(Debug, Clone)]
pub struct RecordedUpload {
    pub request: UploadRequest,
    pub contents: Vec<(PathBuf, String)>,
}

/// Uploader that keeps every request in memory.
#[derive(Debug, Default)]
pub struct RecordingUploader {
    uploads: Mutex<Vec<RecordedUpload>>,
    fail_with: Mutex<Option<u16>>,
}

impl RecordingUploader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every upload with `status`.
    pub fn rejecting(status: u16) -> Self {
        let uploader = Self::default();
        *uploader.fail_with.lock().unwrap() = Some(status);
        uploader
    }

    pub fn uploads(&self) -> Vec<RecordedUpload> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }
}

#[async_trait]
impl CoverageUploader for RecordingUploader {
    async fn upload(&self, request: &UploadRequest) -> codecov_upload::Result<UploadReceipt> {
        let mut contents = Vec::new();
        let mut bytes = 0;
        for file in &request.files {
            let text = std::fs::read_to_string(file)?;
            bytes += text.len();
            contents.push((file.clone(), text));
        }

        self.uploads.lock().unwrap().push(RecordedUpload {
            request: request.clone(),
            contents,
        });

        if let Some(status) = *self.fail_with.lock().unwrap() {
            return Err(UploadError::Rejected {
                status,
                body: "rejected by fake".to_string(),
            });
        }

        Ok(UploadReceipt {
            report_url: format!("https://codecov.test/commit/{}", request.commit),
            files: request.files.len(),
            bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unscripted_step_succeeds() {
        let executor = ScriptedExecutor::new();
        let config = StageConfig::custom("anything".to_string(), vec!["true".to_string()], 0);
        let result = executor.execute(&config).await.unwrap();
        assert!(result.passed());
        assert_eq!(executor.call_names(), vec!["anything"]);
    }

    #[tokio::test]
    async fn test_failing_keeps_writes() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ScriptedExecutor::new()
            .with("step", StepScript::exit(0).writes("out/file.txt", "x"))
            .failing("step", 3);
        let config = StageConfig::custom("step".to_string(), vec!["true".to_string()], 0)
            .in_dir(dir.path().to_path_buf());

        let result = executor.execute(&config).await.unwrap();
        assert_eq!(result.exit_code, 3);
        assert!(dir.path().join("out/file.txt").exists());
    }

    #[tokio::test]
    async fn test_spawn_error() {
        let executor = ScriptedExecutor::new().with("step", StepScript::spawn_error("no such file"));
        let config = StageConfig::custom("step".to_string(), vec!["x".to_string()], 0);
        assert!(matches!(
            executor.execute(&config).await,
            Err(CiError::Execution { .. })
        ));
    }

    #[tokio::test]
    async fn test_recording_uploader_reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("lcov.info");
        std::fs::write(&file, SAMPLE_LCOV).unwrap();

        let uploader = RecordingUploader::new();
        let request = UploadRequest {
            report_dir: dir.path().to_path_buf(),
            files: vec![file],
            commit: "abc".to_string(),
            ..Default::default()
        };
        let receipt = uploader.upload(&request).await.unwrap();
        assert_eq!(receipt.files, 1);
        assert_eq!(uploader.uploads()[0].contents[0].1, SAMPLE_LCOV);

        let rejecting = RecordingUploader::rejecting(401);
        assert!(rejecting.upload(&request).await.is_err());
        assert_eq!(rejecting.upload_count(), 1);
    }
}
