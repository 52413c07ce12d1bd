//! GitHub Actions rendering of a [`PipelineConfig`].
//!
//! The rendered file runs the same commands with the same environment as
//! `covpipe run`, but delegates the upload to the Codecov action.

use crate::config::{PipelineConfig, UploadFailurePolicy};
use crate::error::Result;
use crate::stage::{PipelineStage, StageConfig};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

pub const CHECKOUT_ACTION: &str = "actions/checkout@v4";
pub const CODECOV_ACTION: &str = "codecov/codecov-action@v4";

/// Runs the step even when an earlier one failed, unless the run was cancelled.
const UNLESS_CANCELLED: &str = "${{ !cancelled() }}";

#[derive(Debug, Clone, Serialize)]
pub struct Workflow {
    pub name: String,
    pub on: WorkflowTriggers,
    pub jobs: BTreeMap<String, Job>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowTriggers {
    pub push: BranchFilter,
    pub pull_request: BTreeMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BranchFilter {
    pub branches: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Job {
    #[serde(rename = "runs-on")]
    pub runs_on: String,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Step {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "if", skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(rename = "with", skip_serializing_if = "BTreeMap::is_empty")]
    pub inputs: BTreeMap<String, serde_yaml::Value>,
}

impl Workflow {
    pub fn from_config(config: &PipelineConfig) -> Self {
        let after_tests = config
            .policy
            .report_on_test_failure
            .then(|| UNLESS_CANCELLED.to_string());

        let mut steps = vec![Step {
            uses: Some(CHECKOUT_ACTION.to_string()),
            ..Default::default()
        }];

        steps.push(command_step(
            "Install toolchain",
            &PipelineStage::Provision.commands(config),
        ));
        steps.push(command_step(
            "Install grcov",
            &PipelineStage::Install.commands(config),
        ));
        steps.push(command_step(
            "Run instrumented tests",
            &PipelineStage::Test.commands(config),
        ));

        let mut report = command_step(
            "Generate coverage report",
            &PipelineStage::GenerateReport.commands(config),
        );
        report.run = report.run.map(|run| {
            format!(
                "mkdir -p {}\n{}",
                crate::stage::shell_quote(&config.report.output_dir.to_string_lossy()),
                run
            )
        });
        report.condition = after_tests.clone();
        steps.push(report);

        if config.upload.enabled {
            steps.push(upload_step(config, after_tests));
        }

        let mut jobs = BTreeMap::new();
        jobs.insert(
            "coverage".to_string(),
            Job {
                runs_on: "ubuntu-latest".to_string(),
                steps,
            },
        );

        Workflow {
            name: "Coverage".to_string(),
            on: WorkflowTriggers {
                push: BranchFilter {
                    branches: vec![config.trigger.primary_branch.clone()],
                },
                pull_request: BTreeMap::new(),
            },
            jobs,
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// One workflow step running `commands` in sequence; env comes from the
/// commands themselves.
fn command_step(name: &str, commands: &[StageConfig]) -> Step {
    let run = commands
        .iter()
        .map(StageConfig::shell_line)
        .collect::<Vec<_>>()
        .join("\n");
    let env = commands
        .iter()
        .flat_map(|c| c.env.iter().map(|(k, v)| (k.clone(), v.clone())))
        .collect();

    Step {
        name: Some(name.to_string()),
        run: Some(run),
        env,
        ..Default::default()
    }
}

fn upload_step(config: &PipelineConfig, condition: Option<String>) -> Step {
    let mut inputs = BTreeMap::new();
    inputs.insert(
        "token".to_string(),
        format!("${{{{ secrets.{} }}}}", config.upload.token_env).into(),
    );
    inputs.insert(
        "directory".to_string(),
        format!("./{}/", trim_dir(&config.report.output_dir)).into(),
    );
    inputs.insert(
        "fail_ci_if_error".to_string(),
        (config.policy.upload_failure == UploadFailurePolicy::FailRun).into(),
    );
    if let Some(flags) = &config.upload.flags {
        inputs.insert("flags".to_string(), flags.clone().into());
    }
    if let Some(name) = &config.upload.name {
        inputs.insert("name".to_string(), name.clone().into());
    }
    if config.upload.url != codecov_upload::DEFAULT_CODECOV_URL {
        inputs.insert("url".to_string(), config.upload.url.clone().into());
    }

    Step {
        name: Some("Upload to Codecov".to_string()),
        condition,
        uses: Some(CODECOV_ACTION.to_string()),
        inputs,
        ..Default::default()
    }
}

fn trim_dir(dir: &Path) -> String {
    dir.to_string_lossy()
        .trim_start_matches("./")
        .trim_end_matches('/')
        .to_string()
}
