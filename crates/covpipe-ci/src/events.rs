//! Run event log.
//!
//! Every step emits `StageStarted` then `StageFinished`; the log is what
//! [`crate::gate::CiGate`] evaluates.

use crate::machine::RunStatus;
use crate::stage::PipelineStage;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    RunStarted {
        run_id: String,
        fingerprint: String,
    },
    TriggerEvaluated {
        event: String,
        should_run: bool,
    },
    StageStarted {
        stage: PipelineStage,
        step: String,
    },
    StageFinished {
        stage: PipelineStage,
        step: String,
        exit_code: i32,
        success: bool,
        duration_ms: u64,
        /// Set when the step failed
        error: Option<String>,
    },
    RunFinished {
        status: RunStatus,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineEvent {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

/// Append-only, sequence-numbered event list.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Vec<PipelineEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `kind`; sequence numbers start at 1.
    pub fn record(&mut self, kind: EventKind) -> u64 {
        let seq = self.events.len() as u64 + 1;
        self.events.push(PipelineEvent {
            seq,
            timestamp: Utc::now(),
            kind,
        });
        seq
    }

    pub fn events(&self) -> &[PipelineEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<PipelineEvent> {
        self.events
    }
}
