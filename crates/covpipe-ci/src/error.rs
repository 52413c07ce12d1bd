//! Error types for coverage pipeline operations

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CiError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read config {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Invalid pinned version '{version}' for {tool}: {reason}")]
    InvalidPin {
        tool: String,
        version: String,
        reason: String,
    },

    #[error("Installed {tool} reports '{found}', pinned version is {pinned}")]
    PinMismatch {
        tool: String,
        pinned: String,
        found: String,
    },

    #[error("Invalid pipeline transition: {input} while {state}")]
    InvalidTransition { state: String, input: String },

    #[error("Stage {0} has empty command")]
    EmptyCommand(String),

    #[error("Stage {stage} timed out after {secs} seconds")]
    Timeout { stage: String, secs: u64 },

    #[error("Stage {stage} could not be executed: {message}")]
    Execution { stage: String, message: String },

    #[error("No coverage artifacts (.gcda) found under {0:?}")]
    NoArtifacts(PathBuf),

    #[error("Coverage data from an earlier run could not be cleared under {0:?}")]
    StaleArtifacts(PathBuf),

    #[error("Coverage report directory {0:?} is empty")]
    EmptyReport(PathBuf),

    #[error("Malformed lcov at line {line}: {reason}")]
    Lcov { line: usize, reason: String },

    #[error("Upload needs {0}, which the run context does not provide")]
    MissingContext(&'static str),

    #[error("Coverage upload failed: {0}")]
    Upload(#[from] codecov_upload::UploadError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, CiError>;
