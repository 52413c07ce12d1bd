//! Step execution.
//!
//! [`StageExecutor`] is the seam between the pipeline and the host:
//! [`ProcessExecutor`] spawns real processes, `fakes::ScriptedExecutor`
//! replays canned outcomes in tests.

use crate::error::{CiError, Result};
use crate::stage::StageConfig;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Instant;
use tokio::process::Command;
use tracing::debug;

/// Result of a step execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    /// Step name.
    pub stage_name: String,

    /// Exit code (0 = success, -1 = could not run).
    pub exit_code: i32,

    /// Captured stdout (empty when streamed).
    pub stdout: String,

    /// Captured stderr (empty when streamed).
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl StageResult {
    /// Whether this step passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// A step that ran in-process and succeeded.
    pub fn ok(stage_name: &str, stdout: String, duration_ms: u64) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            exit_code: 0,
            stdout,
            stderr: String::new(),
            duration_ms,
            success: true,
        }
    }

    /// A step that could not run or failed in-process.
    pub fn errored(stage_name: &str, message: String, duration_ms: u64) -> Self {
        Self {
            stage_name: stage_name.to_string(),
            exit_code: -1,
            stdout: String::new(),
            stderr: message,
            duration_ms,
            success: false,
        }
    }
}

/// Runs one step and reports how it went.
///
/// `Ok` with a failed [`StageResult`] means the command ran and failed;
/// `Err` means it could not be run at all.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, config: &StageConfig) -> Result<StageResult>;
}

/// Spawns steps as child processes.
pub struct CommandRunner;

impl CommandRunner {
    /// Execute a single step and return the result.
    ///
    /// The child is killed if the returned future is dropped, which is how
    /// cancellation and timeouts abort the active step.
    pub async fn execute_stage(config: &StageConfig) -> Result<StageResult> {
        let start = Instant::now();

        if config.command.is_empty() {
            return Err(CiError::EmptyCommand(config.name.clone()));
        }

        let exe = &config.command[0];
        let args = &config.command[1..];

        let mut command = Command::new(exe);
        command.args(args).envs(&config.env).kill_on_drop(true);
        if let Some(dir) = &config.working_dir {
            command.current_dir(dir);
        }
        if config.stream_output {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        debug!(stage = %config.name, command = ?config.command, "Spawning step");
        let child = command.spawn().map_err(|e| CiError::Execution {
            stage: config.name.clone(),
            message: format!("failed to spawn '{}': {}", exe, e),
        })?;

        let output = if config.timeout_secs > 0 {
            tokio::time::timeout(
                std::time::Duration::from_secs(config.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| CiError::Timeout {
                stage: config.name.clone(),
                secs: config.timeout_secs,
            })??
        } else {
            child.wait_with_output().await?
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        Ok(StageResult {
            stage_name: config.name.clone(),
            exit_code,
            stdout,
            stderr,
            duration_ms,
            success: output.status.success(),
        })
    }
}

/// [`StageExecutor`] backed by real child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

#[async_trait]
impl StageExecutor for ProcessExecutor {
    async fn execute(&self, config: &StageConfig) -> Result<StageResult> {
        CommandRunner::execute_stage(config).await
    }
}
