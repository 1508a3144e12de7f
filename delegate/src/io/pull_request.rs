//! Optional draft pull request for an isolated working branch.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{info, instrument, warn};

use crate::io::git::Git;
use crate::io::process::run_command_with_timeout;

pub const TOKEN_ENV: &str = "GITHUB_TOKEN";
pub const REPO_ENV: &str = "GITHUB_REPO";

const GH_TIMEOUT: Duration = Duration::from_secs(120);
const GH_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

/// What to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest<'a> {
    pub branch: &'a str,
    pub title: String,
    pub body: String,
}

/// Publishes a working branch for review. Returns the pull request URL.
pub trait PullRequestPublisher {
    fn publish(&self, root: &Path, request: &PullRequest<'_>) -> Result<String>;
}

impl<P: PullRequestPublisher + ?Sized> PullRequestPublisher for &P {
    fn publish(&self, root: &Path, request: &PullRequest<'_>) -> Result<String> {
        (**self).publish(root, request)
    }
}

/// Result of the pull request step, as shown in the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrOutcome {
    Skipped { reason: String },
    Created { url: String },
    Failed { message: String },
}

impl PrOutcome {
    pub fn skipped(reason: impl Into<String>) -> Self {
        PrOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn render(&self) -> String {
        match self {
            PrOutcome::Skipped { reason } => format!("Skipped: {reason}."),
            PrOutcome::Created { url } => format!("Draft pull request created: {url}"),
            PrOutcome::Failed { message } => {
                format!("Attempted to create a pull request but failed: {message}")
            }
        }
    }
}

/// Pushes with `git` and opens a draft pull request with the `gh` CLI.
#[derive(Debug, Clone)]
pub struct GhPublisher {
    token: String,
    repo: String,
    base: String,
}

impl GhPublisher {
    pub fn new(token: impl Into<String>, repo: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            repo: repo.into(),
            base: base.into(),
        }
    }

    /// Configured from `GITHUB_TOKEN` and `GITHUB_REPO`; `None` unless both are set.
    pub fn from_env(base: &str) -> Option<Self> {
        let token = std::env::var(TOKEN_ENV).ok().filter(|v| !v.trim().is_empty())?;
        let repo = std::env::var(REPO_ENV).ok().filter(|v| !v.trim().is_empty())?;
        Some(Self::new(token, repo, base))
    }
}

impl PullRequestPublisher for GhPublisher {
    #[instrument(skip_all, fields(repo = %self.repo, branch = request.branch))]
    fn publish(&self, root: &Path, request: &PullRequest<'_>) -> Result<String> {
        Git::new(root)
            .push("origin", request.branch)
            .context("push working branch")?;

        let mut cmd = Command::new("gh");
        cmd.args(["pr", "create", "--draft"])
            .args(["--repo", &self.repo])
            .args(["--base", &self.base])
            .args(["--head", request.branch])
            .args(["--title", &request.title])
            .args(["--body", &request.body])
            .env("GH_TOKEN", &self.token)
            .current_dir(root);
        info!("opening draft pull request");

        let output = run_command_with_timeout(cmd, None, GH_TIMEOUT, GH_OUTPUT_LIMIT_BYTES, None)
            .context("run gh pr create")?;
        if !output.succeeded() {
            warn!(exit_code = ?output.status.code(), "gh pr create failed");
            return Err(anyhow!(
                "gh pr create failed: {}",
                output.stderr_lossy().trim()
            ));
        }
        let url = output
            .stdout_lossy()
            .lines()
            .rev()
            .find(|line| line.starts_with("http"))
            .map(str::to_string)
            .ok_or_else(|| anyhow!("gh pr create printed no pull request URL"))?;
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcomes_render_for_the_report() {
        assert_eq!(
            PrOutcome::skipped("direct mode").render(),
            "Skipped: direct mode."
        );
        assert_eq!(
            PrOutcome::Created {
                url: "https://github.com/o/r/pull/1".to_string()
            }
            .render(),
            "Draft pull request created: https://github.com/o/r/pull/1"
        );
        assert!(
            PrOutcome::Failed {
                message: "no remote".to_string()
            }
            .render()
            .contains("no remote")
        );
    }

    #[test]
    fn push_failure_is_an_error() {
        let repo = crate::test_support::TestRepo::new().expect("repo");
        let publisher = GhPublisher::new("token", "o/r", "main");
        let err = publisher
            .publish(
                repo.path(),
                &PullRequest {
                    branch: "main",
                    title: "t".to_string(),
                    body: "b".to_string(),
                },
            )
            .unwrap_err();
        assert!(format!("{err:#}").contains("push working branch"));
    }
}
