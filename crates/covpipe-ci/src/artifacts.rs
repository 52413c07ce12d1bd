//! Raw coverage artifacts and the generated report directory.

use crate::error::{CiError, Result};
use crate::lcov::CoverageSummary;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

const DATA_EXT: &str = "gcda";
const NOTES_EXT: &str = "gcno";

/// Raw gcov data produced by an instrumented run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoverageArtifacts {
    pub root: PathBuf,
    /// `.gcda` execution counts
    pub data_files: Vec<PathBuf>,
    /// Number of `.gcno` note files seen next to them
    pub note_files: usize,
}

impl CoverageArtifacts {
    /// Walk `root` for gcov artifacts. A missing root yields an empty set.
    pub fn discover(root: &Path) -> Result<Self> {
        let mut data_files = Vec::new();
        let mut note_files = 0;

        if root.exists() {
            for entry in WalkDir::new(root).follow_links(false) {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                match entry.path().extension().and_then(|e| e.to_str()) {
                    Some(DATA_EXT) => data_files.push(entry.into_path()),
                    Some(NOTES_EXT) => note_files += 1,
                    _ => {}
                }
            }
        }
        data_files.sort();

        debug!(root = %root.display(), data = data_files.len(), notes = note_files, "Discovered coverage artifacts");
        Ok(Self {
            root: root.to_path_buf(),
            data_files,
            note_files,
        })
    }

    /// Like [`Self::discover`], but an empty set is an error.
    pub fn require(root: &Path) -> Result<Self> {
        let artifacts = Self::discover(root)?;
        if artifacts.is_empty() {
            return Err(CiError::NoArtifacts(root.to_path_buf()));
        }
        Ok(artifacts)
    }

    pub fn is_empty(&self) -> bool {
        self.data_files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.data_files.len()
    }

    /// Delete `.gcda` files left by earlier runs so counters start at zero.
    pub fn remove_stale(root: &Path) -> Result<usize> {
        let stale = Self::discover(root)?;
        for file in &stale.data_files {
            std::fs::remove_file(file)?;
        }
        Ok(stale.data_files.len())
    }
}

/// The processed report, ready for upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageReport {
    pub dir: PathBuf,
    pub files: Vec<PathBuf>,
    /// Present when the report is lcov and parsed cleanly
    pub summary: Option<CoverageSummary>,
}

impl CoverageReport {
    /// Create `dir` or empty it, so only this run's output gets collected.
    /// Returns how many entries were removed.
    pub fn reset_dir(dir: &Path) -> Result<usize> {
        let mut removed = 0;
        if dir.is_dir() {
            for entry in std::fs::read_dir(dir)? {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    std::fs::remove_dir_all(entry.path())?;
                } else {
                    std::fs::remove_file(entry.path())?;
                }
                removed += 1;
            }
        }
        std::fs::create_dir_all(dir)?;
        Ok(removed)
    }

    /// Collect every file under `dir`. An empty or missing directory is an error.
    pub fn collect(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            return Err(CiError::EmptyReport(dir.to_path_buf()));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir) {
            let entry = entry?;
            if entry.file_type().is_file() {
                files.push(entry.into_path());
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(CiError::EmptyReport(dir.to_path_buf()));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            files,
            summary: None,
        })
    }

    pub fn with_summary(mut self, summary: CoverageSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    /// Total size of the report files in bytes.
    pub fn total_bytes(&self) -> Result<u64> {
        let mut total = 0;
        for file in &self.files {
            total += std::fs::metadata(file)?.len();
        }
        Ok(total)
    }
}
