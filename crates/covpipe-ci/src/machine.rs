//! Pipeline state machine.
//!
//! ```text
//! Idle --trigger(false)--> Done(Skipped)
//! Idle --trigger(true)--> Triggered --start--> Provisioning --> Installing --> Testing
//! Testing --ok--> Reporting(Raw)
//! Testing --fail--> Reporting(Raw)        if report_on_test_failure
//!                   Done(Failed{Tests})   otherwise
//! Reporting(Raw) --ok--> Reporting(Reported) --ok/fail--> Done(..)
//! any non-terminal --cancel--> Done(Canceled)
//! ```
//!
//! Pure: no I/O, so every transition is testable in isolation.

use crate::config::{FailurePolicy, UploadFailurePolicy};
use crate::error::{CiError, Result};
use crate::stage::PipelineStage;
use serde::{Deserialize, Serialize};

/// Which failure decided a run's status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Provisioning,
    Installation,
    Tests,
    ReportGeneration,
    Upload,
}

impl FailureKind {
    pub fn for_stage(stage: PipelineStage) -> Self {
        match stage {
            PipelineStage::Provision => FailureKind::Provisioning,
            PipelineStage::Install => FailureKind::Installation,
            PipelineStage::Test => FailureKind::Tests,
            PipelineStage::GenerateReport => FailureKind::ReportGeneration,
            PipelineStage::Upload => FailureKind::Upload,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Provisioning => "provisioning",
            FailureKind::Installation => "installation",
            FailureKind::Tests => "tests",
            FailureKind::ReportGeneration => "report_generation",
            FailureKind::Upload => "upload",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final, run-level status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    /// Trigger did not match.
    Skipped,
    Succeeded,
    /// Tests passed, coverage was lost (upload failure under the warn policy).
    Degraded { cause: FailureKind },
    Failed { cause: FailureKind },
    Canceled,
}

impl RunStatus {
    /// Whether the run should be reported as passing.
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            RunStatus::Skipped | RunStatus::Succeeded | RunStatus::Degraded { .. }
        )
    }

    /// Process exit code for this status.
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Skipped | RunStatus::Succeeded | RunStatus::Degraded { .. } => 0,
            RunStatus::Failed { .. } => 1,
            RunStatus::Canceled => 130,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Skipped => write!(f, "skipped"),
            RunStatus::Succeeded => write!(f, "succeeded"),
            RunStatus::Degraded { cause } => write!(f, "degraded ({})", cause),
            RunStatus::Failed { cause } => write!(f, "failed ({})", cause),
            RunStatus::Canceled => write!(f, "canceled"),
        }
    }
}

/// RAW -> REPORTED sub-state of the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageState {
    Raw,
    Reported,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Triggered,
    Provisioning,
    Installing,
    Testing,
    Reporting { coverage: CoverageState },
    Done { status: RunStatus },
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelineState::Done { .. })
    }

    /// Stage that runs while in this state.
    pub fn active_stage(&self) -> Option<PipelineStage> {
        match self {
            PipelineState::Provisioning => Some(PipelineStage::Provision),
            PipelineState::Installing => Some(PipelineStage::Install),
            PipelineState::Testing => Some(PipelineStage::Test),
            PipelineState::Reporting {
                coverage: CoverageState::Raw,
            } => Some(PipelineStage::GenerateReport),
            PipelineState::Reporting {
                coverage: CoverageState::Reported,
            } => Some(PipelineStage::Upload),
            PipelineState::Idle | PipelineState::Triggered | PipelineState::Done { .. } => None,
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineState::Idle => write!(f, "idle"),
            PipelineState::Triggered => write!(f, "triggered"),
            PipelineState::Provisioning => write!(f, "provisioning"),
            PipelineState::Installing => write!(f, "installing"),
            PipelineState::Testing => write!(f, "testing"),
            PipelineState::Reporting {
                coverage: CoverageState::Raw,
            } => write!(f, "reporting (raw)"),
            PipelineState::Reporting {
                coverage: CoverageState::Reported,
            } => write!(f, "reporting (reported)"),
            PipelineState::Done { status } => write!(f, "done: {}", status),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineInput {
    TriggerEvaluated { should_run: bool },
    Start,
    StageSucceeded,
    StageFailed,
    Cancel,
}

impl std::fmt::Display for PipelineInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineInput::TriggerEvaluated { should_run } => {
                write!(f, "trigger_evaluated({})", should_run)
            }
            PipelineInput::Start => write!(f, "start"),
            PipelineInput::StageSucceeded => write!(f, "stage_succeeded"),
            PipelineInput::StageFailed => write!(f, "stage_failed"),
            PipelineInput::Cancel => write!(f, "cancel"),
        }
    }
}

/// The run's state plus the failure policy that shapes its transitions.
#[derive(Debug, Clone)]
pub struct PipelineMachine {
    state: PipelineState,
    policy: FailurePolicy,
    tests_failed: bool,
}

impl PipelineMachine {
    pub fn new(policy: FailurePolicy) -> Self {
        Self {
            state: PipelineState::Idle,
            policy,
            tests_failed: false,
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn active_stage(&self) -> Option<PipelineStage> {
        self.state.active_stage()
    }

    pub fn tests_failed(&self) -> bool {
        self.tests_failed
    }

    /// Final status once terminal.
    pub fn status(&self) -> Option<RunStatus> {
        match self.state {
            PipelineState::Done { status } => Some(status),
            _ => None,
        }
    }

    /// Apply `input`, returning the new state.
    pub fn apply(&mut self, input: PipelineInput) -> Result<PipelineState> {
        use PipelineInput as I;
        use PipelineState as S;

        let next = match (self.state, input) {
            (S::Done { .. }, _) => return Err(self.invalid(input)),
            (_, I::Cancel) => Self::done(RunStatus::Canceled),

            (S::Idle, I::TriggerEvaluated { should_run: true }) => S::Triggered,
            (S::Idle, I::TriggerEvaluated { should_run: false }) => Self::done(RunStatus::Skipped),
            (S::Triggered, I::Start) => S::Provisioning,

            (S::Provisioning, I::StageSucceeded) => S::Installing,
            (S::Provisioning, I::StageFailed) => Self::failed(FailureKind::Provisioning),

            (S::Installing, I::StageSucceeded) => S::Testing,
            (S::Installing, I::StageFailed) => Self::failed(FailureKind::Installation),

            (S::Testing, I::StageSucceeded) => S::Reporting {
                coverage: CoverageState::Raw,
            },
            (S::Testing, I::StageFailed) => {
                self.tests_failed = true;
                if self.policy.report_on_test_failure {
                    S::Reporting {
                        coverage: CoverageState::Raw,
                    }
                } else {
                    Self::failed(FailureKind::Tests)
                }
            }

            (
                S::Reporting {
                    coverage: CoverageState::Raw,
                },
                I::StageSucceeded,
            ) => S::Reporting {
                coverage: CoverageState::Reported,
            },
            (
                S::Reporting {
                    coverage: CoverageState::Raw,
                },
                I::StageFailed,
            ) => self.failed_after_tests(FailureKind::ReportGeneration),

            (
                S::Reporting {
                    coverage: CoverageState::Reported,
                },
                I::StageSucceeded,
            ) => {
                if self.tests_failed {
                    Self::failed(FailureKind::Tests)
                } else {
                    Self::done(RunStatus::Succeeded)
                }
            }
            (
                S::Reporting {
                    coverage: CoverageState::Reported,
                },
                I::StageFailed,
            ) => match self.policy.upload_failure {
                UploadFailurePolicy::FailRun => self.failed_after_tests(FailureKind::Upload),
                UploadFailurePolicy::Warn if self.tests_failed => Self::failed(FailureKind::Tests),
                UploadFailurePolicy::Warn => Self::done(RunStatus::Degraded {
                    cause: FailureKind::Upload,
                }),
            },

            _ => return Err(self.invalid(input)),
        };

        self.state = next;
        Ok(next)
    }

    fn done(status: RunStatus) -> PipelineState {
        PipelineState::Done { status }
    }

    fn failed(cause: FailureKind) -> PipelineState {
        Self::done(RunStatus::Failed { cause })
    }

    /// A test failure stays the primary cause over later reporting failures.
    fn failed_after_tests(&self, cause: FailureKind) -> PipelineState {
        if self.tests_failed {
            Self::failed(FailureKind::Tests)
        } else {
            Self::failed(cause)
        }
    }

    fn invalid(&self, input: PipelineInput) -> CiError {
        CiError::InvalidTransition {
            state: self.state.to_string(),
            input: input.to_string(),
        }
    }
}
