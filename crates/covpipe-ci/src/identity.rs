//! Run identity.
//!
//! Two runs with the same fingerprint provisioned the same toolchain,
//! installed the same grcov and compiled the tests with the same flags,
//! so their coverage numbers are comparable.

use crate::config::PipelineConfig;
use crate::stage::PipelineStage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// SHA-256 digests of the reproducibility-relevant parts of a config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PipelineFingerprint {
    /// Channel and install profile.
    pub toolchain_digest: String,

    /// Pinned tool name and version.
    pub tool_digest: String,

    /// Instrumentation environment (CARGO_INCREMENTAL, RUSTFLAGS, RUSTDOCFLAGS).
    pub flags_digest: String,

    /// Ordered step commands of every stage.
    pub steps_digest: String,

    /// Digest over the four above.
    pub digest: String,
}

impl PipelineFingerprint {
    pub fn compute(config: &PipelineConfig) -> Self {
        let toolchain_digest = compute_component_digest(&[
            config.toolchain.channel.as_str(),
            config.toolchain.profile.as_str(),
        ]);

        let tool_digest =
            compute_component_digest(&[config.grcov.name.as_str(), config.grcov.version.as_str()]);

        let env = config.instrumentation.env();
        let env_lines: Vec<String> = env.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        let flags_digest = compute_component_digest(&as_strs(&env_lines));

        let step_lines: Vec<String> = PipelineStage::ALL
            .iter()
            .flat_map(|stage| stage.commands(config))
            .map(|step| format!("{}:{}", step.name, step.command.join("\u{1f}")))
            .collect();
        let steps_digest = compute_component_digest(&as_strs(&step_lines));

        let digest = compute_component_digest(&[
            toolchain_digest.as_str(),
            tool_digest.as_str(),
            flags_digest.as_str(),
            steps_digest.as_str(),
        ]);

        Self {
            toolchain_digest,
            tool_digest,
            flags_digest,
            steps_digest,
            digest,
        }
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> &str {
        self.digest.get(..12).unwrap_or(&self.digest)
    }
}

fn as_strs(items: &[String]) -> Vec<&str> {
    items.iter().map(String::as_str).collect()
}

/// Deterministic digest of ordered parts; NUL-separated so `["ab","c"]` != `["a","bc"]`.
fn compute_component_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}
