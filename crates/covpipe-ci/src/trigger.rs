//! Trigger evaluation: which source-control events start a coverage run.

use serde::{Deserialize, Serialize};

/// Default primary branch.
pub const DEFAULT_PRIMARY_BRANCH: &str = "master";

/// A source-control event delivered by the hosting substrate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TriggerEvent {
    /// Push to a ref (`refs/heads/<branch>`, `refs/tags/<tag>`, or a bare branch name).
    Push { git_ref: String },

    /// Pull-request event, whatever its target branch.
    PullRequest {
        number: Option<u64>,
        base_branch: Option<String>,
        head_branch: Option<String>,
    },

    /// Anything else (schedule, workflow_dispatch, ...).
    Other { name: String },
}

impl TriggerEvent {
    /// Push to a branch.
    pub fn push(branch: &str) -> Self {
        TriggerEvent::Push {
            git_ref: format!("refs/heads/{}", branch),
        }
    }

    /// Pull request targeting `base_branch`.
    pub fn pull_request(base_branch: &str) -> Self {
        TriggerEvent::PullRequest {
            number: None,
            base_branch: Some(base_branch.to_string()),
            head_branch: None,
        }
    }

    /// Build an event from GitHub Actions variables.
    ///
    /// `git_ref` is `GITHUB_REF`, which for pull requests has the form
    /// `refs/pull/<number>/merge`.
    pub fn from_github(
        event_name: &str,
        git_ref: Option<&str>,
        base_ref: Option<&str>,
        head_ref: Option<&str>,
    ) -> Self {
        let non_empty = |s: Option<&str>| s.filter(|v| !v.is_empty()).map(str::to_string);

        match event_name {
            "push" => TriggerEvent::Push {
                git_ref: git_ref.unwrap_or_default().to_string(),
            },
            "pull_request" | "pull_request_target" => TriggerEvent::PullRequest {
                number: git_ref.and_then(pull_request_number),
                base_branch: non_empty(base_ref),
                head_branch: non_empty(head_ref),
            },
            other => TriggerEvent::Other {
                name: other.to_string(),
            },
        }
    }

    /// Branch a push targeted, if the ref names a branch.
    pub fn branch(&self) -> Option<&str> {
        match self {
            TriggerEvent::Push { git_ref } => {
                if let Some(branch) = git_ref.strip_prefix("refs/heads/") {
                    Some(branch)
                } else if git_ref.starts_with("refs/") || git_ref.is_empty() {
                    None
                } else {
                    Some(git_ref.as_str())
                }
            }
            _ => None,
        }
    }

    /// Short event name, as the hosting substrate spells it.
    pub fn name(&self) -> &str {
        match self {
            TriggerEvent::Push { .. } => "push",
            TriggerEvent::PullRequest { .. } => "pull_request",
            TriggerEvent::Other { name } => name,
        }
    }
}

impl std::fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerEvent::Push { git_ref } => write!(f, "push {}", git_ref),
            TriggerEvent::PullRequest {
                number, base_branch, ..
            } => {
                write!(f, "pull_request")?;
                if let Some(n) = number {
                    write!(f, " #{}", n)?;
                }
                if let Some(base) = base_branch {
                    write!(f, " -> {}", base)?;
                }
                Ok(())
            }
            TriggerEvent::Other { name } => write!(f, "{}", name),
        }
    }
}

fn pull_request_number(git_ref: &str) -> Option<u64> {
    git_ref
        .strip_prefix("refs/pull/")
        .and_then(|rest| rest.split('/').next())
        .and_then(|n| n.parse().ok())
}

/// Which events start a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerPolicy {
    /// Pushes only run on this branch.
    pub primary_branch: String,
}

impl Default for TriggerPolicy {
    fn default() -> Self {
        Self {
            primary_branch: DEFAULT_PRIMARY_BRANCH.to_string(),
        }
    }
}

impl TriggerPolicy {
    pub fn new(primary_branch: &str) -> Self {
        Self {
            primary_branch: primary_branch.to_string(),
        }
    }

    /// Pushes to the primary branch and every pull request start a run.
    pub fn should_run(&self, event: &TriggerEvent) -> bool {
        match event {
            TriggerEvent::Push { .. } => event.branch() == Some(self.primary_branch.as_str()),
            TriggerEvent::PullRequest { .. } => true,
            TriggerEvent::Other { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_to_primary_runs() {
        let policy = TriggerPolicy::default();
        assert!(policy.should_run(&TriggerEvent::push("master")));
    }

    #[test]
    fn test_push_to_other_branches_skips() {
        let policy = TriggerPolicy::default();
        for branch in ["main", "develop", "feature/master", "master-old", ""] {
            assert!(
                !policy.should_run(&TriggerEvent::push(branch)),
                "push to '{}' should not run",
                branch
            );
        }
    }

    #[test]
    fn test_tag_push_skips() {
        let policy = TriggerPolicy::default();
        let event = TriggerEvent::Push {
            git_ref: "refs/tags/master".to_string(),
        };
        assert!(!policy.should_run(&event));
    }

    #[test]
    fn test_bare_branch_name_is_accepted() {
        let policy = TriggerPolicy::new("main");
        let event = TriggerEvent::Push {
            git_ref: "main".to_string(),
        };
        assert!(policy.should_run(&event));
    }

    #[test]
    fn test_pull_requests_always_run() {
        let policy = TriggerPolicy::default();
        for base in ["master", "release", "anything"] {
            assert!(policy.should_run(&TriggerEvent::pull_request(base)));
        }
        let unknown_base = TriggerEvent::PullRequest {
            number: None,
            base_branch: None,
            head_branch: None,
        };
        assert!(policy.should_run(&unknown_base));
    }

    #[test]
    fn test_other_events_skip() {
        let policy = TriggerPolicy::default();
        let event = TriggerEvent::from_github("schedule", Some("refs/heads/master"), None, None);
        assert!(!policy.should_run(&event));
    }

    #[test]
    fn test_from_github_push() {
        let event = TriggerEvent::from_github("push", Some("refs/heads/master"), Some(""), None);
        assert_eq!(event.branch(), Some("master"));
        assert_eq!(event.name(), "push");
    }

    #[test]
    fn test_from_github_pull_request() {
        let event = TriggerEvent::from_github(
            "pull_request",
            Some("refs/pull/42/merge"),
            Some("master"),
            Some("feature/x"),
        );
        assert_eq!(
            event,
            TriggerEvent::PullRequest {
                number: Some(42),
                base_branch: Some("master".to_string()),
                head_branch: Some("feature/x".to_string()),
            }
        );
        assert_eq!(event.to_string(), "pull_request #42 -> master");
    }
}
