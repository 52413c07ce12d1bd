//! covpipe CI - coverage pipeline for Rust workspaces
//!
//! Provides a coverage pipeline orchestrator that:
//! - Runs only for pushes to the primary branch and for pull requests
//! - Provisions a nightly toolchain and a pinned grcov
//! - Runs the test suite with gcov instrumentation
//! - Turns the raw counters into a report and uploads it to Codecov
//! - Records every step as an event log the gate can evaluate

pub mod artifacts;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod fakes;
pub mod gate;
pub mod identity;
pub mod instrumentation;
pub mod lcov;
pub mod machine;
pub mod pin;
pub mod pipeline;
pub mod runner;
pub mod stage;
pub mod telemetry;
pub mod toolchain;
pub mod trigger;
pub mod workflow;

// Re-export key types
pub use artifacts::{CoverageArtifacts, CoverageReport};
pub use config::{
    FailurePolicy, PipelineConfig, ReportFormat, ReportSettings, TestInvocation,
    UploadFailurePolicy, UploadSettings,
};
pub use context::RunContext;
pub use error::{CiError, Result};
pub use events::{EventKind, PipelineEvent};
pub use gate::{CiGate, GateVerdict};
pub use identity::PipelineFingerprint;
pub use instrumentation::InstrumentationFlags;
pub use lcov::{CoverageSummary, LcovReport};
pub use machine::{FailureKind, PipelineInput, PipelineMachine, PipelineState, RunStatus};
pub use pin::{PinnedTool, GRCOV_VERSION};
pub use pipeline::{CoveragePipeline, PipelineResult, StepRecord};
pub use runner::{CommandRunner, ProcessExecutor, StageExecutor, StageResult};
pub use stage::{PipelineStage, StageConfig};
pub use telemetry::init_tracing;
pub use toolchain::{InstallProfile, ToolchainSpec};
pub use trigger::{TriggerEvent, TriggerPolicy};
pub use workflow::Workflow;
