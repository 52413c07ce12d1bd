//! Pinned coverage tool.
//!
//! grcov is installed from crates.io at an exact version. Releases after
//! 0.8.2 fail to build on the nightly this pipeline provisions, so the pin
//! must never float to "latest".

use crate::error::{CiError, Result};
use serde::{Deserialize, Serialize};

/// Crate name of the coverage-processing tool.
pub const GRCOV_CRATE: &str = "grcov";

/// Pinned grcov release. Re-validate the build on current nightly before bumping.
pub const GRCOV_VERSION: &str = "0.8.2";

/// A tool installed with `cargo install` at an exact version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PinnedTool {
    /// crates.io crate name (also the binary name)
    pub name: String,
    /// Exact semver version
    pub version: String,
}

impl Default for PinnedTool {
    fn default() -> Self {
        Self {
            name: GRCOV_CRATE.to_string(),
            version: GRCOV_VERSION.to_string(),
        }
    }
}

impl PinnedTool {
    /// Create a pin, rejecting anything that is not an exact version.
    pub fn new(name: &str, version: &str) -> Result<Self> {
        let tool = Self {
            name: name.to_string(),
            version: version.to_string(),
        };
        tool.validate()?;
        Ok(tool)
    }

    /// Parse the pin as an exact semver version.
    ///
    /// `latest`, `*`, ranges (`^0.8`, `>=0.8`) and partial versions (`0.8`)
    /// are refused.
    pub fn validate(&self) -> Result<semver::Version> {
        let invalid = |reason: &str| CiError::InvalidPin {
            tool: self.name.clone(),
            version: self.version.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("tool name is empty"));
        }
        let raw = self.version.trim();
        if raw.eq_ignore_ascii_case("latest") || raw == "*" {
            return Err(invalid("version must be pinned, not floating"));
        }
        semver::Version::parse(raw).map_err(|e| invalid(&e.to_string()))
    }

    /// `cargo install <name> --version <version>`
    pub fn install_command(&self) -> Vec<String> {
        vec![
            "cargo".to_string(),
            "install".to_string(),
            self.name.clone(),
            "--version".to_string(),
            self.version.clone(),
        ]
    }

    /// `<name> --version`
    pub fn version_command(&self) -> Vec<String> {
        vec![self.name.clone(), "--version".to_string()]
    }

    /// Check the output of [`Self::version_command`] against the pin and
    /// return the resolved version.
    pub fn verify(&self, version_output: &str) -> Result<semver::Version> {
        let pinned = self.validate()?;
        let mismatch = || CiError::PinMismatch {
            tool: self.name.clone(),
            pinned: self.version.clone(),
            found: version_output.trim().to_string(),
        };

        let found = parse_reported_version(version_output).ok_or_else(mismatch)?;
        if found == pinned {
            Ok(found)
        } else {
            Err(mismatch())
        }
    }
}

/// First whitespace-separated token that parses as semver (`grcov 0.8.2` -> 0.8.2).
pub fn parse_reported_version(output: &str) -> Option<semver::Version> {
    output
        .split_whitespace()
        .map(|token| token.trim_start_matches('v'))
        .find_map(|token| semver::Version::parse(token).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grcov_pin_is_guarded() {
        // grcov > 0.8.2 breaks the install step; a bump needs a fresh build check.
        assert_eq!(GRCOV_VERSION, "0.8.2");
        assert_eq!(PinnedTool::default().version, GRCOV_VERSION);
        assert_eq!(
            PinnedTool::default().validate().unwrap(),
            semver::Version::new(0, 8, 2)
        );
    }

    #[test]
    fn test_install_command_carries_exact_version() {
        assert_eq!(
            PinnedTool::default().install_command(),
            vec!["cargo", "install", "grcov", "--version", "0.8.2"]
        );
    }

    #[test]
    fn test_floating_versions_rejected() {
        for version in ["latest", "LATEST", "*", "^0.8", ">=0.8.2", "0.8", ""] {
            let err = PinnedTool::new("grcov", version).unwrap_err();
            assert!(
                matches!(err, CiError::InvalidPin { .. }),
                "'{}' should be rejected",
                version
            );
        }
    }

    #[test]
    fn test_verify_matching_output() {
        let tool = PinnedTool::default();
        let version = tool.verify("grcov 0.8.2\n").unwrap();
        assert_eq!(version.to_string(), "0.8.2");
    }

    #[test]
    fn test_verify_newer_release_fails() {
        let err = PinnedTool::default().verify("grcov 0.8.19").unwrap_err();
        match err {
            CiError::PinMismatch { pinned, found, .. } => {
                assert_eq!(pinned, "0.8.2");
                assert_eq!(found, "grcov 0.8.19");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_verify_garbage_output_fails() {
        assert!(PinnedTool::default().verify("command not found").is_err());
    }

    #[test]
    fn test_parse_reported_version_with_prefix() {
        assert_eq!(
            parse_reported_version("grcov v0.8.2"),
            Some(semver::Version::new(0, 8, 2))
        );
    }
}
