//! Toolchain provisioning: channel and install profile handed to rustup.

use crate::error::{CiError, Result};
use serde::{Deserialize, Serialize};

/// rustup install profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallProfile {
    /// rustc, cargo, rust-std only
    #[default]
    Minimal,
    Default,
    Complete,
}

impl InstallProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallProfile::Minimal => "minimal",
            InstallProfile::Default => "default",
            InstallProfile::Complete => "complete",
        }
    }
}

/// Channel plus profile to provision before any build step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainSpec {
    /// `nightly`, `nightly-2024-05-01`, `beta`, `stable`, or an explicit version.
    pub channel: String,
    pub profile: InstallProfile,
}

impl Default for ToolchainSpec {
    fn default() -> Self {
        Self {
            channel: "nightly".to_string(),
            profile: InstallProfile::Minimal,
        }
    }
}

impl ToolchainSpec {
    pub fn new(channel: &str, profile: InstallProfile) -> Self {
        Self {
            channel: channel.to_string(),
            profile,
        }
    }

    /// Whether `-Z` flags are accepted by this channel.
    pub fn is_nightly(&self) -> bool {
        self.channel == "nightly" || self.channel.starts_with("nightly-")
    }

    /// `rustup toolchain install <channel> --profile <profile>`
    pub fn install_command(&self) -> Vec<String> {
        vec![
            "rustup".to_string(),
            "toolchain".to_string(),
            "install".to_string(),
            self.channel.clone(),
            "--profile".to_string(),
            self.profile.as_str().to_string(),
        ]
    }

    /// `rustup default <channel>`; every later step runs on this toolchain.
    pub fn select_command(&self) -> Vec<String> {
        vec![
            "rustup".to_string(),
            "default".to_string(),
            self.channel.clone(),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        let channel = self.channel.trim();
        if channel.is_empty() {
            return Err(CiError::InvalidConfig(
                "toolchain channel must not be empty".to_string(),
            ));
        }
        if channel.chars().any(char::is_whitespace) {
            return Err(CiError::InvalidConfig(format!(
                "toolchain channel '{}' contains whitespace",
                self.channel
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_minimal_nightly() {
        let spec = ToolchainSpec::default();
        assert_eq!(spec.channel, "nightly");
        assert_eq!(spec.profile, InstallProfile::Minimal);
        assert!(spec.is_nightly());
    }

    #[test]
    fn test_install_command() {
        let spec = ToolchainSpec::default();
        assert_eq!(
            spec.install_command(),
            vec!["rustup", "toolchain", "install", "nightly", "--profile", "minimal"]
        );
        assert_eq!(spec.select_command(), vec!["rustup", "default", "nightly"]);
    }

    #[test]
    fn test_dated_nightly_is_nightly() {
        assert!(ToolchainSpec::new("nightly-2024-05-01", InstallProfile::Minimal).is_nightly());
        assert!(!ToolchainSpec::new("stable", InstallProfile::Minimal).is_nightly());
        assert!(!ToolchainSpec::new("1.79.0", InstallProfile::Default).is_nightly());
    }

    #[test]
    fn test_validate_rejects_blank_channel() {
        assert!(ToolchainSpec::new(" ", InstallProfile::Minimal).validate().is_err());
        assert!(ToolchainSpec::new("night ly", InstallProfile::Minimal).validate().is_err());
        assert!(ToolchainSpec::default().validate().is_ok());
    }

    #[test]
    fn test_profile_serde() {
        let spec: ToolchainSpec = toml::from_str("channel = \"nightly\"\nprofile = \"complete\"").unwrap();
        assert_eq!(spec.profile, InstallProfile::Complete);
    }
}
