//! Pipeline stages and the commands each one runs.

use crate::config::PipelineConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Step names, as recorded in stage results and events.
pub mod steps {
    pub const INSTALL_TOOLCHAIN: &str = "install_toolchain";
    pub const SELECT_TOOLCHAIN: &str = "select_toolchain";
    pub const INSTALL_GRCOV: &str = "install_grcov";
    pub const VERIFY_GRCOV: &str = "verify_grcov";
    pub const CLEAR_STALE_DATA: &str = "clear_stale_data";
    pub const CARGO_TEST: &str = "cargo_test";
    pub const DISCOVER_ARTIFACTS: &str = "discover_artifacts";
    pub const GRCOV_REPORT: &str = "grcov_report";
    pub const COLLECT_REPORT: &str = "collect_report";
    pub const CODECOV_UPLOAD: &str = "codecov_upload";
}

/// The five pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// rustup toolchain install + default
    Provision,

    /// cargo install grcov --version <pin>
    Install,

    /// cargo test with instrumentation
    Test,

    /// grcov over the raw artifacts (RAW -> REPORTED)
    GenerateReport,

    /// Codecov upload of the report directory
    Upload,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 5] = [
        PipelineStage::Provision,
        PipelineStage::Install,
        PipelineStage::Test,
        PipelineStage::GenerateReport,
        PipelineStage::Upload,
    ];

    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineStage::Provision => "provision",
            PipelineStage::Install => "install",
            PipelineStage::Test => "test",
            PipelineStage::GenerateReport => "generate_report",
            PipelineStage::Upload => "upload",
        }
    }

    /// External commands this stage runs, in order. Upload talks HTTP and has none.
    pub fn commands(&self, config: &PipelineConfig) -> Vec<StageConfig> {
        let timeout = config.stage_timeout_secs;
        let base = |name: &str, command: Vec<String>| {
            StageConfig::custom(name.to_string(), command, timeout).in_dir(config.workspace.clone())
        };

        match self {
            PipelineStage::Provision => vec![
                base(steps::INSTALL_TOOLCHAIN, config.toolchain.install_command()),
                base(steps::SELECT_TOOLCHAIN, config.toolchain.select_command()),
            ],
            PipelineStage::Install => vec![base(
                steps::INSTALL_GRCOV,
                config.grcov.install_command(),
            )],
            PipelineStage::Test => {
                let stage = base(steps::CARGO_TEST, config.tests.command())
                    .with_env(config.instrumentation.env());
                if config.tests.no_capture {
                    vec![stage.streaming()]
                } else {
                    vec![stage]
                }
            }
            PipelineStage::GenerateReport => vec![base(
                steps::GRCOV_REPORT,
                config.report.grcov_command(&config.grcov),
            )],
            PipelineStage::Upload => Vec::new(),
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Configuration for a single external command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Step name.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Extra environment variables.
    pub env: BTreeMap<String, String>,

    /// Working directory (inherits the current one when unset).
    pub working_dir: Option<PathBuf>,

    /// Timeout in seconds (0 = none).
    pub timeout_secs: u64,

    /// Stream stdout/stderr to the console instead of capturing.
    pub stream_output: bool,
}

impl StageConfig {
    /// Create a custom step configuration.
    pub fn custom(name: String, command: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            name,
            command,
            env: BTreeMap::new(),
            working_dir: None,
            timeout_secs,
            stream_output: false,
        }
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn in_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    pub fn streaming(mut self) -> Self {
        self.stream_output = true;
        self
    }

    /// Command as a single shell line, for plans and workflow files.
    pub fn shell_line(&self) -> String {
        self.command
            .iter()
            .map(|arg| shell_quote(arg))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Single-quote `arg` when a POSIX shell would otherwise reinterpret it.
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_.,/=:+@%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}
