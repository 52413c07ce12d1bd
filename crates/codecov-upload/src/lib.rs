//! Codecov-Upload: coverage report delivery for covpipe
//!
//! This crate owns the last hop of the coverage pipeline: taking the files
//! grcov wrote into the report directory and handing them to Codecov.
//!
//! - [`CoverageUploader`] is the seam the pipeline depends on.
//! - [`CodecovClient`] implements it over the legacy v4 upload API.
//! - [`UploadPayload`] builds the request body from the report directory.

pub mod client;
pub mod error;
pub mod payload;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use client::{CodecovClient, CodecovConfig};
pub use error::UploadError;
pub use payload::UploadPayload;

/// Result type for upload operations
pub type Result<T> = std::result::Result<T, UploadError>;

/// Default Codecov endpoint
pub const DEFAULT_CODECOV_URL: &str = "https://codecov.io";

/// Service name reported to Codecov for GitHub Actions builds
pub const GITHUB_ACTIONS_SERVICE: &str = "github-actions";

/// Upload token injected by the hosting substrate.
///
/// `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct UploadToken(String);

impl UploadToken {
    pub fn new(token: impl Into<String>) -> Self {
        UploadToken(token.into())
    }

    /// Read the token from an environment variable; empty values count as unset.
    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .map(|v| UploadToken(v.trim().to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for UploadToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("UploadToken(***)")
    }
}

/// Everything needed to upload one coverage report.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadRequest {
    /// Directory the report files were written to
    pub report_dir: PathBuf,
    /// Report files, all inside `report_dir`
    pub files: Vec<PathBuf>,
    /// Commit the coverage belongs to
    pub commit: String,
    pub branch: Option<String>,
    pub pull_request: Option<u64>,
    /// `owner/repo`
    pub slug: Option<String>,
    pub build: Option<String>,
    pub build_url: Option<String>,
    pub service: String,
    /// Codecov flags (comma separated)
    pub flags: Option<String>,
    /// Upload name shown in the Codecov UI
    pub name: Option<String>,
}

impl UploadRequest {
    /// Query parameters for the v4 upload endpoint, token excluded.
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("commit", self.commit.clone()),
            ("service", self.service.clone()),
            ("package", format!("covpipe-{}", env!("CARGO_PKG_VERSION"))),
        ];
        if let Some(branch) = &self.branch {
            pairs.push(("branch", branch.clone()));
        }
        if let Some(pr) = self.pull_request {
            pairs.push(("pr", pr.to_string()));
        }
        if let Some(slug) = &self.slug {
            pairs.push(("slug", slug.clone()));
        }
        if let Some(build) = &self.build {
            pairs.push(("build", build.clone()));
        }
        if let Some(build_url) = &self.build_url {
            pairs.push(("build_url", build_url.clone()));
        }
        if let Some(flags) = &self.flags {
            pairs.push(("flags", flags.clone()));
        }
        if let Some(name) = &self.name {
            pairs.push(("name", name.clone()));
        }
        pairs
    }
}

/// What Codecov handed back after a successful upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Where the processed report will be visible
    pub report_url: String,
    /// Number of files in the payload
    pub files: usize,
    /// Payload size in bytes
    pub bytes: usize,
}

/// Destination for a generated coverage report.
#[async_trait]
pub trait CoverageUploader: Send + Sync {
    /// Upload the report described by `request`.
    async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_debug_is_redacted() {
        let token = UploadToken::new("super-secret");
        let printed = format!("{:?}", token);
        assert!(!printed.contains("super-secret"));
        assert_eq!(token.expose(), "super-secret");
    }

    #[test]
    fn test_query_pairs_skip_missing_fields() {
        let request = UploadRequest {
            commit: "abc123".to_string(),
            service: GITHUB_ACTIONS_SERVICE.to_string(),
            ..Default::default()
        };

        let pairs = request.query_pairs();
        let keys: Vec<_> = pairs.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["commit", "service", "package"]);
    }

    #[test]
    fn test_query_pairs_include_pull_request() {
        let request = UploadRequest {
            commit: "abc123".to_string(),
            service: GITHUB_ACTIONS_SERVICE.to_string(),
            branch: Some("feature".to_string()),
            pull_request: Some(42),
            slug: Some("acme/widgets".to_string()),
            ..Default::default()
        };

        let pairs = request.query_pairs();
        assert!(pairs.contains(&("pr", "42".to_string())));
        assert!(pairs.contains(&("branch", "feature".to_string())));
        assert!(pairs.contains(&("slug", "acme/widgets".to_string())));
    }
}
