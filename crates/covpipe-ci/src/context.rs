//! Hosting-substrate context for a run (event, commit, repository, build).

use crate::trigger::TriggerEvent;
use serde::{Deserialize, Serialize};

/// What the hosting substrate tells us about the current job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub event: TriggerEvent,
    pub commit_sha: Option<String>,
    /// `owner/repo`
    pub repository: Option<String>,
    /// Substrate run identifier
    pub build: Option<String>,
    pub build_url: Option<String>,
    /// Base URL of the hosting server, used to derive `build_url`.
    #[serde(default)]
    pub server_url: Option<String>,
}

impl RunContext {
    /// Context with only an event, for local runs and tests.
    pub fn for_event(event: TriggerEvent) -> Self {
        RunContext {
            event,
            commit_sha: None,
            repository: None,
            build: None,
            build_url: None,
            server_url: None,
        }
    }

    pub fn with_commit(mut self, sha: &str) -> Self {
        self.commit_sha = Some(sha.to_string());
        self
    }

    /// Read the GitHub Actions environment of the current process.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let event_name = get("GITHUB_EVENT_NAME").unwrap_or_else(|| "local".to_string());
        let git_ref = get("GITHUB_REF");
        let base_ref = get("GITHUB_BASE_REF");
        let head_ref = get("GITHUB_HEAD_REF");
        let event = TriggerEvent::from_github(
            &event_name,
            git_ref.as_deref(),
            base_ref.as_deref(),
            head_ref.as_deref(),
        );

        let repository = get("GITHUB_REPOSITORY");
        let build = get("GITHUB_RUN_ID");
        let server_url = get("GITHUB_SERVER_URL");
        let build_url = build_url(server_url.as_deref(), repository.as_deref(), build.as_deref());

        RunContext {
            event,
            commit_sha: get("GITHUB_SHA"),
            repository,
            build,
            build_url,
            server_url,
        }
    }

    /// Replace the repository and/or build id, re-deriving `build_url`
    /// when either changes.
    pub fn override_build(&mut self, repository: Option<String>, build: Option<String>) {
        if repository.is_none() && build.is_none() {
            return;
        }
        if repository.is_some() {
            self.repository = repository;
        }
        if build.is_some() {
            self.build = build;
        }
        self.build_url = build_url(
            self.server_url.as_deref(),
            self.repository.as_deref(),
            self.build.as_deref(),
        );
    }

    /// Branch name Codecov should attribute the report to.
    pub fn upload_branch(&self) -> Option<String> {
        match &self.event {
            TriggerEvent::Push { .. } => self.event.branch().map(str::to_string),
            TriggerEvent::PullRequest { head_branch, .. } => head_branch.clone(),
            TriggerEvent::Other { .. } => None,
        }
    }

    pub fn pull_request_number(&self) -> Option<u64> {
        match &self.event {
            TriggerEvent::PullRequest { number, .. } => *number,
            _ => None,
        }
    }
}

fn build_url(server: Option<&str>, repository: Option<&str>, build: Option<&str>) -> Option<String> {
    match (repository, build) {
        (Some(repo), Some(run)) => Some(format!(
            "{}/{}/actions/runs/{}",
            server.unwrap_or("https://github.com").trim_end_matches('/'),
            repo,
            run
        )),
        _ => None,
    }
}
