//! Git adapter for repository isolation.
//!
//! Isolation has to be exact about which git commands run and in what order,
//! so this is a small, explicit wrapper around `git` subprocess calls rather
//! than a library binding.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::{debug, instrument, warn};

use crate::error::VcsError;

type Result<T> = std::result::Result<T, VcsError>;

/// Author used for session commits when the repository has no identity.
pub const FALLBACK_NAME: &str = "delegate";
pub const FALLBACK_EMAIL: &str = "delegate@localhost";

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        match self.branch_name()? {
            Some(name) => Ok(name),
            None => {
                warn!("detached HEAD detected");
                Err(VcsError::VersionControlError {
                    command: "branch --show-current".to_string(),
                    message: "detached HEAD (refusing to isolate)".to_string(),
                })
            }
        }
    }

    /// Current branch name, `None` on detached HEAD.
    pub fn branch_name(&self) -> Result<Option<String>> {
        let out = self.run_capture(&["branch", "--show-current"])?;
        let name = out.trim();
        if name.is_empty() {
            return Ok(None);
        }
        debug!(branch = %name, "current branch");
        Ok(Some(name.to_string()))
    }

    /// Check whether a local branch exists.
    pub fn branch_exists(&self, branch: &str) -> Result<bool> {
        let status = self
            .run(&[
                "show-ref",
                "--verify",
                "--quiet",
                &format!("refs/heads/{branch}"),
            ])?
            .status;
        Ok(status.success())
    }

    /// True once the repository has at least one commit.
    pub fn has_head(&self) -> Result<bool> {
        let out = self.run(&["rev-parse", "--verify", "--quiet", "HEAD"])?;
        Ok(out.status.success())
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Checkout an existing branch.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "checking out branch");
        self.run_checked(&["checkout", branch])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// True if there is anything staged for commit.
    pub fn has_staged_changes(&self) -> Result<bool> {
        let out = self.run(&["diff", "--cached", "--name-only"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    /// Commit staged changes with a message.
    ///
    /// If there are no staged changes, this returns Ok(false) and does nothing.
    /// Without a configured identity the commit is authored as
    /// [`FALLBACK_NAME`] <[`FALLBACK_EMAIL`]>.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<bool> {
        if !self.has_staged_changes()? {
            debug!("no staged changes, skipping commit");
            return Ok(false);
        }
        if self.has_identity()? {
            debug!("committing staged changes");
            self.run_checked(&["commit", "-m", message])?;
        } else {
            warn!(name = FALLBACK_NAME, "no git identity configured, using fallback");
            let name = format!("user.name={FALLBACK_NAME}");
            let email = format!("user.email={FALLBACK_EMAIL}");
            self.run_checked(&["-c", &name, "-c", &email, "commit", "-m", message])?;
        }
        Ok(true)
    }

    /// True when git can resolve both author and committer identity.
    pub fn has_identity(&self) -> Result<bool> {
        for var in ["GIT_AUTHOR_IDENT", "GIT_COMMITTER_IDENT"] {
            if !self.run(&["var", var])?.status.success() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Resolve a revision to its object id.
    pub fn rev_parse(&self, rev: &str) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--verify", rev])?;
        Ok(out.trim().to_string())
    }

    /// Stash uncommitted changes, including untracked files.
    ///
    /// Returns `Ok(false)` when there was nothing to stash.
    #[instrument(skip_all)]
    pub fn stash(&self, message: &str) -> Result<bool> {
        let before = self.stash_count()?;
        self.run_checked(&["stash", "push", "--include-untracked", "-m", message])?;
        let stashed = self.stash_count()? > before;
        debug!(stashed, "stash finished");
        Ok(stashed)
    }

    fn stash_count(&self) -> Result<usize> {
        let out = self.run(&["stash", "list"])?;
        Ok(String::from_utf8_lossy(&out.stdout).lines().count())
    }

    /// Hash of the empty tree, for diffing a repository without commits.
    pub fn empty_tree(&self) -> Result<String> {
        let out = self.run_capture(&["hash-object", "-t", "tree", "/dev/null"])?;
        Ok(out.trim().to_string())
    }

    /// Diff of tracked files in the worktree against `base`.
    pub fn diff_against(&self, base: &str) -> Result<String> {
        self.run_capture(&["diff", base])
    }

    /// Untracked files that are not ignored.
    pub fn untracked_files(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["ls-files", "--others", "--exclude-standard", "-z"])?;
        Ok(out
            .split('\0')
            .filter(|path| !path.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Diff that adds an untracked file in full.
    pub fn diff_untracked(&self, path: &str) -> Result<String> {
        let args = ["diff", "--no-index", "--", "/dev/null", path];
        let output = self.run(&args)?;
        // `--no-index` exits 1 when the inputs differ, which they always do here.
        match output.status.code() {
            Some(0 | 1) => Ok(String::from_utf8_lossy(&output.stdout).into_owned()),
            _ => Err(failure(&args, &output)),
        }
    }

    /// Push `branch` to `remote` and set upstream.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn push(&self, remote: &str, branch: &str) -> Result<()> {
        self.run_checked(&["push", "-u", remote, branch])?;
        Ok(())
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            return Err(failure(args, &output));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .map_err(|e| VcsError::VersionControlError {
                command: args.join(" "),
                message: format!("spawn git: {e}"),
            })
    }
}

fn failure(args: &[&str], output: &Output) -> VcsError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    VcsError::VersionControlError {
        command: args.join(" "),
        message: stderr.trim().to_string(),
    }
}
