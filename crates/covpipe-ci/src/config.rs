//! Pipeline configuration.
//!
//! Every field has a default, so an empty `covpipe.toml` (or none at all)
//! yields the standard run: nightly/minimal, grcov 0.8.2, instrumented
//! `cargo test --features integration-test -- --nocapture`, lcov report in
//! `coverage/reports/`, Codecov upload.

use crate::error::{CiError, Result};
use crate::instrumentation::InstrumentationFlags;
use crate::pin::PinnedTool;
use crate::toolchain::ToolchainSpec;
use crate::trigger::TriggerPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Config file picked up from the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "covpipe.toml";

/// Environment override for the primary branch.
pub const ENV_PRIMARY_BRANCH: &str = "COVPIPE_PRIMARY_BRANCH";

/// Environment override for the Codecov URL.
pub const ENV_CODECOV_URL: &str = "CODECOV_URL";

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Workspace under test; every command runs here.
    pub workspace: PathBuf,
    pub trigger: TriggerPolicy,
    pub toolchain: ToolchainSpec,
    pub grcov: PinnedTool,
    pub instrumentation: InstrumentationFlags,
    pub tests: TestInvocation,
    pub report: ReportSettings,
    pub upload: UploadSettings,
    pub policy: FailurePolicy,
    /// Per-step timeout; 0 leaves timing to the hosting substrate.
    pub stage_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            trigger: TriggerPolicy::default(),
            toolchain: ToolchainSpec::default(),
            grcov: PinnedTool::default(),
            instrumentation: InstrumentationFlags::default(),
            tests: TestInvocation::default(),
            report: ReportSettings::default(),
            upload: UploadSettings::default(),
            policy: FailurePolicy::default(),
            stage_timeout_secs: 0,
        }
    }
}

/// How the test suite is invoked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestInvocation {
    /// Cargo features to enable
    pub features: Vec<String>,
    /// Pass `--nocapture` so test output streams live
    pub no_capture: bool,
    /// Extra arguments for `cargo test`
    pub cargo_args: Vec<String>,
    /// Extra arguments for the test harness (after `--`)
    pub test_args: Vec<String>,
}

impl Default for TestInvocation {
    fn default() -> Self {
        Self {
            features: vec!["integration-test".to_string()],
            no_capture: true,
            cargo_args: Vec::new(),
            test_args: Vec::new(),
        }
    }
}

impl TestInvocation {
    /// `cargo test [--features a,b] [cargo_args] [-- --nocapture test_args]`
    pub fn command(&self) -> Vec<String> {
        let mut cmd = vec!["cargo".to_string(), "test".to_string()];
        if !self.features.is_empty() {
            cmd.push("--features".to_string());
            cmd.push(self.features.join(","));
        }
        cmd.extend(self.cargo_args.iter().cloned());

        if self.no_capture || !self.test_args.is_empty() {
            cmd.push("--".to_string());
            if self.no_capture {
                cmd.push("--nocapture".to_string());
            }
            cmd.extend(self.test_args.iter().cloned());
        }
        cmd
    }
}

/// grcov output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    Lcov,
    Cobertura,
    Html,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::Lcov => "lcov",
            ReportFormat::Cobertura => "cobertura",
            ReportFormat::Html => "html",
        }
    }

    /// Html writes a directory; the others write a single file.
    pub fn writes_directory(&self) -> bool {
        matches!(self, ReportFormat::Html)
    }
}

/// Where and how grcov writes the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    /// Report directory, relative to the workspace
    pub output_dir: PathBuf,
    /// Report file name inside `output_dir` (single-file formats)
    pub file_name: String,
    pub format: ReportFormat,
    /// Searched for `.gcda` files, relative to the workspace
    pub artifact_dir: PathBuf,
    /// Include branch coverage
    pub branch: bool,
    /// Source globs excluded from the report
    pub ignore: Vec<String>,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("coverage/reports"),
            file_name: "lcov.info".to_string(),
            format: ReportFormat::Lcov,
            artifact_dir: PathBuf::from("target"),
            branch: true,
            ignore: vec!["/*".to_string()],
        }
    }
}

impl ReportSettings {
    /// The `-o` argument for grcov, relative to the workspace.
    pub fn output_target(&self) -> PathBuf {
        if self.format.writes_directory() {
            self.output_dir.clone()
        } else {
            self.output_dir.join(&self.file_name)
        }
    }

    /// grcov invocation, run from the workspace root.
    pub fn grcov_command(&self, tool: &PinnedTool) -> Vec<String> {
        let mut cmd = vec![
            tool.name.clone(),
            ".".to_string(),
            "-s".to_string(),
            ".".to_string(),
            "-t".to_string(),
            self.format.as_str().to_string(),
        ];
        if self.branch {
            cmd.push("--branch".to_string());
        }
        cmd.push("--ignore-not-existing".to_string());
        for pattern in &self.ignore {
            cmd.push("--ignore".to_string());
            cmd.push(pattern.clone());
        }
        cmd.push("-o".to_string());
        cmd.push(self.output_target().to_string_lossy().into_owned());
        cmd
    }
}

/// Codecov upload settings. The token itself is never stored in config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSettings {
    pub enabled: bool,
    pub url: String,
    /// Environment variable holding the upload token
    pub token_env: String,
    pub flags: Option<String>,
    pub name: Option<String>,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            url: codecov_upload::DEFAULT_CODECOV_URL.to_string(),
            token_env: "CODECOV_TOKEN".to_string(),
            flags: None,
            name: None,
        }
    }
}

/// What an upload failure does to the run status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadFailurePolicy {
    /// Upload failure fails the run.
    FailRun,
    /// Upload failure degrades the run but does not fail it.
    #[default]
    Warn,
}

/// Run-status policies for failures after the test step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailurePolicy {
    /// Generate and upload coverage even when tests fail.
    pub report_on_test_failure: bool,
    pub upload_failure: UploadFailurePolicy,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self {
            report_on_test_failure: true,
            upload_failure: UploadFailurePolicy::Warn,
        }
    }
}

impl PipelineConfig {
    /// Parse a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load from `path`, or from `./covpipe.toml` when present, or defaults.
    /// Environment overrides are applied and the result validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::read_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => {
                Self::read_file(Path::new(DEFAULT_CONFIG_FILE))?
            }
            None => {
                debug!("No config file, using defaults");
                Self::default()
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    fn read_file(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Reading pipeline config");
        let text = std::fs::read_to_string(path).map_err(|source| CiError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `COVPIPE_PRIMARY_BRANCH` and `CODECOV_URL` from `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(branch) = lookup(ENV_PRIMARY_BRANCH).filter(|v| !v.trim().is_empty()) {
            self.trigger.primary_branch = branch.trim().to_string();
        }
        if let Some(url) = lookup(ENV_CODECOV_URL).filter(|v| !v.trim().is_empty()) {
            self.upload.url = url.trim().to_string();
        }
    }

    /// Reject configurations that cannot produce valid coverage.
    pub fn validate(&self) -> Result<()> {
        if self.trigger.primary_branch.trim().is_empty() {
            return Err(CiError::InvalidConfig(
                "trigger.primary_branch must not be empty".to_string(),
            ));
        }

        self.toolchain.validate()?;
        self.grcov.validate()?;
        self.instrumentation.validate()?;

        if self.instrumentation.requires_nightly() && !self.toolchain.is_nightly() {
            return Err(CiError::InvalidConfig(format!(
                "instrumentation uses -Z flags but toolchain channel is '{}'; a nightly channel is required",
                self.toolchain.channel
            )));
        }

        let env = self.instrumentation.env();
        if env.get(crate::instrumentation::RUSTFLAGS) != env.get(crate::instrumentation::RUSTDOCFLAGS) {
            return Err(CiError::InvalidConfig(
                "RUSTFLAGS and RUSTDOCFLAGS must carry identical instrumentation".to_string(),
            ));
        }

        if self.report.output_dir.as_os_str().is_empty() {
            return Err(CiError::InvalidConfig(
                "report.output_dir must not be empty".to_string(),
            ));
        }
        // The directory is emptied before every report.
        if !is_workspace_subdir(&self.report.output_dir) {
            return Err(CiError::InvalidConfig(format!(
                "report.output_dir {:?} must be a relative path below the workspace",
                self.report.output_dir
            )));
        }
        if !self.report.format.writes_directory() && self.report.file_name.trim().is_empty() {
            return Err(CiError::InvalidConfig(
                "report.file_name must not be empty".to_string(),
            ));
        }
        if self.upload.enabled && self.upload.token_env.trim().is_empty() {
            return Err(CiError::InvalidConfig(
                "upload.token_env must name an environment variable".to_string(),
            ));
        }
        Ok(())
    }

    /// Absolute-or-relative path of the report directory.
    pub fn report_dir(&self) -> PathBuf {
        self.workspace.join(&self.report.output_dir)
    }

    /// Directory searched for raw coverage artifacts.
    pub fn artifact_dir(&self) -> PathBuf {
        self.workspace.join(&self.report.artifact_dir)
    }

    /// Render as TOML (used by `covpipe plan`).
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self)
            .map_err(|e| CiError::InvalidConfig(format!("cannot render config: {}", e)))
    }
}

fn is_workspace_subdir(path: &Path) -> bool {
    use std::path::Component;

    let mut below = false;
    for component in path.components() {
        match component {
            Component::Normal(_) => below = true,
            Component::CurDir => {}
            _ => return false,
        }
    }
    below
}
