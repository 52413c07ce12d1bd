//! Error types for codecov-upload

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while uploading a coverage report
#[derive(Error, Debug)]
pub enum UploadError {
    /// Report directory missing or holding no files
    #[error("No report files found in {0}")]
    EmptyReport(PathBuf),

    /// A report file lives outside the report directory
    #[error("Report file {file} is not inside {dir}")]
    OutsideReportDir { file: PathBuf, dir: PathBuf },

    /// IO error while reading report files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport-level HTTP error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Codecov refused the upload request
    #[error("Codecov rejected upload (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    /// Codecov answered with something other than the two upload URLs
    #[error("Unexpected upload response: {0}")]
    MalformedResponse(String),

    /// Storage PUT failed
    #[error("Report storage upload failed (HTTP {status})")]
    Storage { status: u16 },
}

impl From<reqwest::Error> for UploadError {
    fn from(err: reqwest::Error) -> Self {
        UploadError::Http(err.to_string())
    }
}
