//! Codecov HTTP client
//!
//! Implements the legacy two-step v4 upload: a POST announcing the upload,
//! answered by a report URL and a pre-signed storage URL, followed by a PUT
//! of the payload to storage.

use crate::error::UploadError;
use crate::payload::UploadPayload;
use crate::{CoverageUploader, Result, UploadReceipt, UploadRequest, UploadToken};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Codecov connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodecovConfig {
    /// Codecov base URL
    pub url: String,
    /// Upload token (optional for public repositories)
    #[serde(skip)]
    pub token: Option<UploadToken>,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl CodecovConfig {
    /// Create config for a specific server, without a token
    pub fn new(url: &str) -> Self {
        CodecovConfig {
            url: url.to_string(),
            token: None,
            timeout_secs: 120,
        }
    }

    /// Set authentication token
    pub fn with_token(mut self, token: UploadToken) -> Self {
        self.token = Some(token);
        self
    }

    fn upload_endpoint(&self) -> String {
        format!("{}/upload/v4", self.url.trim_end_matches('/'))
    }
}

/// Codecov client for report uploads
pub struct CodecovClient {
    config: CodecovConfig,
    http_client: reqwest::Client,
}

impl CodecovClient {
    /// Create a new Codecov client
    pub fn new(config: CodecovConfig) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("covpipe-codecov-upload/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(CodecovClient {
            config,
            http_client,
        })
    }

    pub fn config(&self) -> &CodecovConfig {
        &self.config
    }

    /// Announce the upload and obtain the report and storage URLs.
    async fn request_upload_urls(&self, request: &UploadRequest) -> Result<(String, String)> {
        let mut query = request.query_pairs();
        match &self.config.token {
            Some(token) => query.push(("token", token.expose().to_string())),
            None => warn!("No Codecov token configured, attempting tokenless upload"),
        }

        let response = self
            .http_client
            .post(self.config.upload_endpoint())
            .query(&query)
            .header(ACCEPT, "text/plain")
            .header("X-Reduced-Redundancy", "false")
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body: body.trim().to_string(),
            });
        }

        parse_upload_urls(&body)
    }
}

/// Split the v4 announce response into `(report_url, storage_url)`.
pub fn parse_upload_urls(body: &str) -> Result<(String, String)> {
    let mut lines = body.lines().map(str::trim).filter(|l| !l.is_empty());
    match (lines.next(), lines.next()) {
        (Some(report), Some(storage)) => Ok((report.to_string(), storage.to_string())),
        _ => Err(UploadError::MalformedResponse(body.trim().to_string())),
    }
}

#[async_trait]
impl CoverageUploader for CodecovClient {
    async fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt> {
        let payload = UploadPayload::build(request)?;
        let files = payload.file_count();
        let bytes = payload.len();

        info!(commit = %request.commit, files, bytes, "Uploading coverage report to Codecov");

        let (report_url, storage_url) = self.request_upload_urls(request).await?;
        debug!(report_url = %report_url, "Codecov accepted upload request");

        let response = self
            .http_client
            .put(&storage_url)
            .header(CONTENT_TYPE, "text/plain")
            .body(payload.into_body())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(UploadError::Storage {
                status: response.status().as_u16(),
            });
        }

        info!(report_url = %report_url, "Coverage report uploaded");
        Ok(UploadReceipt {
            report_url,
            files,
            bytes,
        })
    }
}
