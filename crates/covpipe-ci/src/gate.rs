//! CI gate evaluation for pass/fail criteria.

use crate::config::UploadFailurePolicy;
use crate::events::{EventKind, PipelineEvent};
use crate::stage::PipelineStage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Gate evaluation verdict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateVerdict {
    /// Whether the gate passed.
    pub passed: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Coverage-only problems tolerated by the upload policy.
    pub coverage_warnings: Vec<String>,

    /// Summary message.
    pub message: String,
}

/// CI gate evaluation rules.
pub struct CiGate;

impl CiGate {
    /// Evaluate a run's event log.
    ///
    /// Gate rule:
    /// - Every `StageStarted` step must be followed by a `StageFinished` for the same step
    /// - A finished step with `success == false` is a violation
    /// - Upload failures are warnings instead under [`UploadFailurePolicy::Warn`]
    pub fn evaluate(events: &[PipelineEvent], upload_policy: UploadFailurePolicy) -> GateVerdict {
        let mut violations = Vec::new();
        let mut coverage_warnings = Vec::new();

        let mut started = BTreeSet::new();
        let mut finished = BTreeSet::new();

        for event in events {
            match &event.kind {
                EventKind::StageStarted { step, .. } => {
                    started.insert(step.clone());
                }
                EventKind::StageFinished {
                    stage,
                    step,
                    exit_code,
                    success,
                    error,
                    ..
                } => {
                    finished.insert(step.clone());
                    if *success {
                        continue;
                    }

                    let detail = match error {
                        Some(error) => format!("Step '{}' failed: {}", step, error),
                        None => format!(
                            "Step '{}' returned non-zero exit code: {}",
                            step, exit_code
                        ),
                    };
                    if *stage == PipelineStage::Upload
                        && upload_policy == UploadFailurePolicy::Warn
                    {
                        coverage_warnings.push(detail);
                    } else {
                        violations.push(detail);
                    }
                }
                EventKind::RunStarted { .. }
                | EventKind::TriggerEvaluated { .. }
                | EventKind::RunFinished { .. } => {}
            }
        }

        for step in started.difference(&finished) {
            violations.push(format!("Step '{}' was started but never completed", step));
        }

        let passed = violations.is_empty();
        let message = if !passed {
            format!("Gate failed with {} violation(s)", violations.len())
        } else if coverage_warnings.is_empty() {
            "All stages passed".to_string()
        } else {
            format!(
                "All stages passed, coverage degraded ({} warning(s))",
                coverage_warnings.len()
            )
        };

        GateVerdict {
            passed,
            violations,
            coverage_warnings,
            message,
        }
    }
}
