//! Repository isolation: run each delegation on its own working branch.
//!
//! Entering a session remembers the caller's branch, stashes uncommitted work
//! and checks out (or resumes) a branch derived from the task id. Handing off
//! collects the diff, commits it on the working branch and restores the
//! caller's branch. Direct mode skips all of that and only provides the diff.

use std::path::{Path, PathBuf};

use tracing::{debug, error, info, instrument, warn};

use crate::core::branch::{is_safe_id, working_branch_name};
use crate::core::types::IsolationMode;
use crate::error::VcsError;
use crate::io::git::Git;

/// Entry point into a git repository root.
#[derive(Debug, Clone)]
pub struct RepositoryIsolation {
    git: Git,
}

/// An entered isolation session. Consumed by [`SandboxSession::handoff_diff`].
#[derive(Debug)]
pub struct SandboxSession {
    git: Git,
    original_branch: Option<String>,
    working_branch: Option<String>,
    mode: IsolationMode,
    stashed: bool,
}

impl RepositoryIsolation {
    /// `target` must be the root of a git repository (`target/.git` exists).
    pub fn new(target: &Path) -> Result<Self, VcsError> {
        if !target.join(".git").exists() {
            return Err(VcsError::NotAVersionControlRoot {
                path: target.to_path_buf(),
            });
        }
        Ok(Self {
            git: Git::new(target),
        })
    }

    pub fn root(&self) -> &Path {
        self.git.workdir()
    }

    /// Enter a session for `task_id`.
    ///
    /// With `isolate` the caller's uncommitted work is stashed and the working
    /// branch is created, or checked out when it already exists from an
    /// earlier run of the same task. Isolation needs at least one commit to
    /// branch from. Direct mode works on whatever branch is checked out.
    #[instrument(skip_all, fields(task_id, isolate))]
    pub fn enter(
        &self,
        task_id: &str,
        isolate: bool,
        branch_prefix: &str,
    ) -> Result<SandboxSession, VcsError> {
        if !isolate {
            let branch = self.git.branch_name()?;
            debug!(branch = ?branch, "direct mode, working on the current branch");
            return Ok(SandboxSession {
                git: self.git.clone(),
                original_branch: None,
                working_branch: branch,
                mode: IsolationMode::Direct,
                stashed: false,
            });
        }

        let original = self.git.current_branch()?;
        if !self.git.has_head()? {
            warn!(branch = %original, "no commits to branch from");
            return Err(VcsError::VersionControlError {
                command: "rev-parse --verify HEAD".to_string(),
                message: format!(
                    "{original} has no commits yet; isolated mode needs a base commit (use direct mode)"
                ),
            });
        }
        let working = working_branch_name(branch_prefix, task_id);
        if !is_safe_id(task_id) {
            debug!(task_id, branch = %working, "task id rewritten for branch name");
        }

        let stashed = match self
            .git
            .stash(&format!("delegate: before {working}"))
        {
            Ok(stashed) => stashed,
            Err(err) => {
                warn!(err = %err, "stash failed, continuing with a dirty tree");
                false
            }
        };

        if self.git.branch_exists(&working)? {
            info!(branch = %working, "resuming existing working branch");
            self.git.checkout_branch(&working)?;
        } else {
            info!(branch = %working, "creating working branch");
            self.git.checkout_new_branch(&working)?;
        }

        Ok(SandboxSession {
            git: self.git.clone(),
            original_branch: Some(original),
            working_branch: Some(working),
            mode: IsolationMode::Isolated,
            stashed,
        })
    }
}

impl SandboxSession {
    pub fn mode(&self) -> IsolationMode {
        self.mode
    }

    pub fn root(&self) -> &Path {
        self.git.workdir()
    }

    /// Branch checked out before isolating. `None` in direct mode.
    pub fn original_branch(&self) -> Option<&str> {
        self.original_branch.as_deref()
    }

    /// Branch the session mutates: the working branch when isolated, the
    /// caller's branch in direct mode (`None` on detached HEAD).
    pub fn working_branch(&self) -> Option<&str> {
        self.working_branch.as_deref()
    }

    /// Whether the caller's uncommitted work was stashed on entry.
    pub fn stashed(&self) -> bool {
        self.stashed
    }

    /// Collect every change made in the session and end it.
    ///
    /// The diff covers tracked modifications against `HEAD` (or the empty
    /// tree in a repository without commits) plus new untracked files. In
    /// isolated mode the changes are then committed on the working branch and
    /// the caller's branch is checked out again. If that fails the working
    /// branch stays checked out and the returned note says so. Direct mode
    /// leaves the working tree as it is.
    #[instrument(skip_all, fields(mode = ?self.mode))]
    pub fn handoff_diff(self) -> Result<HandoffDiff, VcsError> {
        let diff = collect_diff(&self.git)?;
        let mut notes = Vec::new();
        if let (Some(original), Some(working)) = (&self.original_branch, &self.working_branch) {
            if let Err(err) = self.restore(original, working, &diff) {
                error!(err = %err, branch = %working, "could not hand back the original branch");
                notes.push(format!(
                    "Could not switch back to {original}: {err}. {working} is still checked out with the session changes."
                ));
            }
            if self.stashed {
                info!("caller changes remain stashed; restore with `git stash pop`");
                notes.push(format!(
                    "Uncommitted changes on {original} were stashed before isolating; restore them with `git stash pop`."
                ));
            }
        }
        Ok(HandoffDiff {
            diff,
            mode: self.mode,
            branch: self.working_branch.clone(),
            root: self.git.workdir().to_path_buf(),
            note: (!notes.is_empty()).then(|| notes.join("\n")),
        })
    }

    fn restore(&self, original: &str, working: &str, diff: &str) -> Result<(), VcsError> {
        if !diff.trim().is_empty() {
            self.git.add_all()?;
            if self.git.commit_staged(&format!("delegate: changes on {working}"))? {
                info!(branch = %working, "committed session changes");
            }
        }
        info!(branch = %original, "restoring original branch");
        self.git.checkout_branch(original)
    }
}

/// Changes produced by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffDiff {
    pub diff: String,
    pub mode: IsolationMode,
    /// Branch that received the changes, if any.
    pub branch: Option<String>,
    pub root: PathBuf,
    /// Anything the caller has to act on after the session.
    pub note: Option<String>,
}

impl HandoffDiff {
    pub fn is_empty(&self) -> bool {
        self.diff.trim().is_empty()
    }

    pub fn isolated(&self) -> bool {
        self.mode == IsolationMode::Isolated
    }
}

fn collect_diff(git: &Git) -> Result<String, VcsError> {
    let base = if git.has_head()? {
        "HEAD".to_string()
    } else {
        git.empty_tree()?
    };
    let mut diff = git.diff_against(&base)?;
    for path in git.untracked_files()? {
        diff.push_str(&git.diff_untracked(&path)?);
    }
    debug!(bytes = diff.len(), "handoff diff collected");
    Ok(diff)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::branch::DEFAULT_BRANCH_PREFIX;
    use crate::test_support::TestRepo;

    #[test]
    fn non_git_directory_is_refused() {
        let temp = tempfile::tempdir().expect("tempdir");
        let err = RepositoryIsolation::new(temp.path()).unwrap_err();
        assert!(matches!(err, VcsError::NotAVersionControlRoot { .. }));
    }

    #[test]
    fn subdirectory_of_repo_is_refused() {
        let repo = TestRepo::new().expect("repo");
        repo.write("pkg/mod.py", "").expect("write");
        let err = RepositoryIsolation::new(&repo.path().join("pkg")).unwrap_err();
        assert!(matches!(err, VcsError::NotAVersionControlRoot { .. }));
    }

    #[test]
    fn isolated_session_creates_branch_and_restores_original() {
        let repo = TestRepo::new().expect("repo");
        let main_head = repo.rev_parse("main").expect("rev-parse");
        let isolation = RepositoryIsolation::new(repo.path()).expect("isolation");

        let session = isolation
            .enter("task-1", true, DEFAULT_BRANCH_PREFIX)
            .expect("enter");
        assert_eq!(session.mode(), IsolationMode::Isolated);
        assert_eq!(session.original_branch(), Some("main"));
        assert_eq!(session.working_branch(), Some("delegate/task-1"));
        assert_eq!(repo.current_branch().expect("branch"), "delegate/task-1");

        repo.write("hello.py", "print('hi')\n").expect("write");
        let handoff = session.handoff_diff().expect("handoff");
        assert!(handoff.diff.contains("hello.py"));
        assert!(handoff.diff.contains("+print('hi')"));
        assert_eq!(repo.current_branch().expect("branch"), "main");
        assert_eq!(repo.rev_parse("main").expect("rev-parse"), main_head);
        assert!(!repo.path().join("hello.py").exists());
        assert_ne!(
            repo.rev_parse("delegate/task-1").expect("rev-parse"),
            main_head,
            "session changes are committed on the working branch"
        );
    }

    #[test]
    fn entering_twice_resumes_same_branch() {
        let repo = TestRepo::new().expect("repo");
        let isolation = RepositoryIsolation::new(repo.path()).expect("isolation");

        let first = isolation.enter("again", true, "delegate/").expect("enter");
        repo.write("a.txt", "a\n").expect("write");
        first.handoff_diff().expect("handoff");
        assert!(!repo.path().join("a.txt").exists());

        let second = isolation.enter("again", true, "delegate/").expect("re-enter");
        assert_eq!(second.working_branch(), Some("delegate/again"));
        assert!(repo.path().join("a.txt").exists(), "resumed branch keeps work");
        second.handoff_diff().expect("handoff");
    }

    #[test]
    fn dirty_tree_is_stashed_before_isolating() {
        let repo = TestRepo::new().expect("repo");
        repo.write("README.md", "local edit\n").expect("write");
        let isolation = RepositoryIsolation::new(repo.path()).expect("isolation");

        let session = isolation.enter("stash", true, "delegate/").expect("enter");
        assert!(session.stashed());
        let handoff = session.handoff_diff().expect("handoff");
        assert!(handoff.is_empty(), "caller edits must not leak into the diff");
        let note = handoff.note.expect("stash note");
        assert!(note.contains("git stash pop"));
    }

    #[test]
    fn direct_mode_creates_no_branch() {
        let repo = TestRepo::new().expect("repo");
        repo.write("README.md", "dirty\n").expect("write");
        let before = repo.branches().expect("branches");
        let isolation = RepositoryIsolation::new(repo.path()).expect("isolation");

        let session = isolation.enter("direct", false, "delegate/").expect("enter");
        assert_eq!(session.mode(), IsolationMode::Direct);
        assert_eq!(session.working_branch(), Some("main"));
        assert_eq!(session.original_branch(), None);
        let handoff = session.handoff_diff().expect("handoff");

        assert!(handoff.diff.contains("+dirty"));
        assert_eq!(handoff.branch.as_deref(), Some("main"));
        assert!(!handoff.isolated());
        assert!(handoff.note.is_none());
        assert_eq!(repo.branches().expect("branches"), before);
        assert_eq!(repo.current_branch().expect("branch"), "main");
    }

    #[test]
    fn diff_works_without_any_commit() {
        let repo = TestRepo::empty().expect("repo");
        repo.write("first.txt", "one\n").expect("write");
        let isolation = RepositoryIsolation::new(repo.path()).expect("isolation");
        let session = isolation.enter("fresh", false, "delegate/").expect("enter");
        let handoff = session.handoff_diff().expect("handoff");
        assert!(handoff.diff.contains("+one"));
    }

    #[test]
    fn isolation_needs_a_commit_to_branch_from() {
        let repo = TestRepo::empty().expect("repo");
        repo.write("first.txt", "one\n").expect("write");
        let isolation = RepositoryIsolation::new(repo.path()).expect("isolation");

        let err = isolation.enter("fresh", true, "delegate/").unwrap_err();

        assert!(err.to_string().contains("no commits"));
        assert!(repo.branches().expect("branches").is_empty());
        assert!(repo.path().join("first.txt").exists());
    }

    #[test]
    fn handoff_without_identity_still_restores_original() {
        let repo = TestRepo::new().expect("repo");
        repo.drop_identity().expect("drop identity");
        let isolation = RepositoryIsolation::new(repo.path()).expect("isolation");

        let session = isolation.enter("anon", true, "delegate/").expect("enter");
        repo.write("hello.py", "print('hi')\n").expect("write");
        let handoff = session.handoff_diff().expect("handoff");

        assert!(handoff.note.is_none(), "unexpected note: {:?}", handoff.note);
        assert_eq!(repo.current_branch().expect("branch"), "main");
        assert!(repo.has_file_at("delegate/anon", "hello.py"));
    }

    #[cfg(unix)]
    #[test]
    fn failed_commit_keeps_working_branch_checked_out() {
        use std::os::unix::fs::PermissionsExt;

        let repo = TestRepo::new().expect("repo");
        let hook = repo.path().join(".git/hooks/pre-commit");
        std::fs::create_dir_all(hook.parent().expect("hooks dir")).expect("mkdir hooks");
        std::fs::write(&hook, "#!/bin/sh\nexit 1\n").expect("write hook");
        std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        let isolation = RepositoryIsolation::new(repo.path()).expect("isolation");

        let session = isolation.enter("hooked", true, "delegate/").expect("enter");
        repo.write("hello.py", "print('hi')\n").expect("write");
        let handoff = session.handoff_diff().expect("handoff");

        assert!(handoff.diff.contains("hello.py"));
        let note = handoff.note.expect("failure note");
        assert!(note.contains("delegate/hooked is still checked out"), "{note}");
        assert_eq!(repo.current_branch().expect("branch"), "delegate/hooked");
        assert!(repo.path().join("hello.py").exists());
        assert!(!repo.has_file_at("main", "hello.py"));
    }
}
