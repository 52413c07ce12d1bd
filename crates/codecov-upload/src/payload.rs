//! Upload body construction
//!
//! Codecov's v4 endpoint takes a single text body in which each report file
//! is introduced by a `# path=` line and closed by an EOF marker.

use crate::error::UploadError;
use crate::{Result, UploadRequest};
use std::path::Path;

const EOF_MARKER: &str = "<<<<<< EOF";

/// Serialized report files ready to PUT to Codecov storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPayload {
    body: String,
    files: usize,
}

impl UploadPayload {
    /// Read every file of `request` and concatenate them in upload format.
    pub fn build(request: &UploadRequest) -> Result<Self> {
        if request.files.is_empty() {
            return Err(UploadError::EmptyReport(request.report_dir.clone()));
        }

        let mut body = String::new();
        for file in &request.files {
            let relative = relative_name(&request.report_dir, file)?;
            let contents = std::fs::read_to_string(file)?;

            body.push_str("# path=");
            body.push_str(&relative);
            body.push('\n');
            body.push_str(&contents);
            if !contents.ends_with('\n') {
                body.push('\n');
            }
            body.push_str(EOF_MARKER);
            body.push('\n');
        }

        Ok(UploadPayload {
            body,
            files: request.files.len(),
        })
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn into_body(self) -> String {
        self.body
    }

    pub fn file_count(&self) -> usize {
        self.files
    }

    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}

fn relative_name(dir: &Path, file: &Path) -> Result<String> {
    let relative = file
        .strip_prefix(dir)
        .map_err(|_| UploadError::OutsideReportDir {
            file: file.to_path_buf(),
            dir: dir.to_path_buf(),
        })?;
    // Codecov expects forward slashes regardless of host.
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}
