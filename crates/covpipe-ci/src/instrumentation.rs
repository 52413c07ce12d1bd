//! Coverage instrumentation flags and the environment they produce.
//!
//! The same flag string is exported as `RUSTFLAGS` and `RUSTDOCFLAGS`;
//! doctests compiled without it leave holes in the counters.

use crate::error::{CiError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const CARGO_INCREMENTAL: &str = "CARGO_INCREMENTAL";
pub const RUSTFLAGS: &str = "RUSTFLAGS";
pub const RUSTDOCFLAGS: &str = "RUSTDOCFLAGS";

/// Compiler settings for gcov-style (`-Zprofile`) coverage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstrumentationFlags {
    /// `-Zprofile` (nightly only)
    pub profile: bool,
    /// `-Ccodegen-units=N`; counters split across units when N > 1
    pub codegen_units: u32,
    /// `-Cinline-threshold=N`; `None` leaves rustc's default
    pub inline_threshold: Option<u32>,
    /// `-Clink-dead-code`
    pub link_dead_code: bool,
    /// `-Coverflow-checks`
    pub overflow_checks: bool,
    /// `CARGO_INCREMENTAL`
    pub incremental: bool,
    /// Appended verbatim after the generated flags
    pub extra_flags: Vec<String>,
}

impl Default for InstrumentationFlags {
    fn default() -> Self {
        Self {
            profile: true,
            codegen_units: 1,
            inline_threshold: Some(0),
            link_dead_code: true,
            overflow_checks: false,
            incremental: false,
            extra_flags: Vec::new(),
        }
    }
}

impl InstrumentationFlags {
    /// Flags in the order rustc receives them.
    pub fn flags(&self) -> Vec<String> {
        let mut flags = Vec::new();
        if self.profile {
            flags.push("-Zprofile".to_string());
        }
        flags.push(format!("-Ccodegen-units={}", self.codegen_units));
        if let Some(threshold) = self.inline_threshold {
            flags.push(format!("-Cinline-threshold={}", threshold));
        }
        if self.link_dead_code {
            flags.push("-Clink-dead-code".to_string());
        }
        flags.push(format!(
            "-Coverflow-checks={}",
            if self.overflow_checks { "on" } else { "off" }
        ));
        flags.extend(self.extra_flags.iter().cloned());
        flags
    }

    /// Space-joined flag string for `RUSTFLAGS`/`RUSTDOCFLAGS`.
    pub fn flag_string(&self) -> String {
        self.flags().join(" ")
    }

    /// Environment for the instrumented test step.
    pub fn env(&self) -> BTreeMap<String, String> {
        let flags = self.flag_string();
        let mut env = BTreeMap::new();
        env.insert(
            CARGO_INCREMENTAL.to_string(),
            if self.incremental { "1" } else { "0" }.to_string(),
        );
        env.insert(RUSTFLAGS.to_string(), flags.clone());
        env.insert(RUSTDOCFLAGS.to_string(), flags);
        env
    }

    /// `-Z` flags need a nightly compiler.
    pub fn requires_nightly(&self) -> bool {
        self.profile || self.extra_flags.iter().any(|f| f.starts_with("-Z"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.codegen_units == 0 {
            return Err(CiError::InvalidConfig(
                "instrumentation.codegen_units must be at least 1".to_string(),
            ));
        }
        if self.incremental && self.profile {
            return Err(CiError::InvalidConfig(
                "incremental compilation cannot be combined with -Zprofile".to_string(),
            ));
        }
        if let Some(bad) = self.extra_flags.iter().find(|f| f.chars().any(char::is_whitespace)) {
            return Err(CiError::InvalidConfig(format!(
                "instrumentation.extra_flags entry '{}' must be a single flag",
                bad
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_flag_string() {
        assert_eq!(
            InstrumentationFlags::default().flag_string(),
            "-Zprofile -Ccodegen-units=1 -Cinline-threshold=0 -Clink-dead-code -Coverflow-checks=off"
        );
    }

    #[test]
    fn test_env_applies_flags_to_tests_and_docs() {
        let env = InstrumentationFlags::default().env();
        assert_eq!(env.len(), 3);
        assert_eq!(env[CARGO_INCREMENTAL], "0");
        assert_eq!(env[RUSTFLAGS], env[RUSTDOCFLAGS]);
        assert!(env[RUSTFLAGS].contains("-Zprofile"));
    }

    #[test]
    fn test_extra_flags_reach_both_variables() {
        let flags = InstrumentationFlags {
            extra_flags: vec!["-Cpanic=abort".to_string()],
            ..Default::default()
        };
        let env = flags.env();
        assert!(env[RUSTFLAGS].ends_with("-Cpanic=abort"));
        assert_eq!(env[RUSTFLAGS], env[RUSTDOCFLAGS]);
    }

    #[test]
    fn test_requires_nightly() {
        assert!(InstrumentationFlags::default().requires_nightly());
        let stable = InstrumentationFlags {
            profile: false,
            ..Default::default()
        };
        assert!(!stable.requires_nightly());
    }

    #[test]
    fn test_validate() {
        assert!(InstrumentationFlags::default().validate().is_ok());

        let zero_units = InstrumentationFlags {
            codegen_units: 0,
            ..Default::default()
        };
        assert!(zero_units.validate().is_err());

        let incremental = InstrumentationFlags {
            incremental: true,
            ..Default::default()
        };
        assert!(incremental.validate().is_err());

        let spaced = InstrumentationFlags {
            extra_flags: vec!["-C opt-level=0".to_string()],
            ..Default::default()
        };
        assert!(spaced.validate().is_err());
    }
}
