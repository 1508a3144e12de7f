//! Test-only helpers: temporary git repositories and scripted collaborators.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::io::agent::ExecutionAgent;
use crate::io::completer::{Completer, Message};

/// Temporary git repository on branch `main`.
pub struct TestRepo {
    _temp: TempDir,
    root: PathBuf,
}

impl TestRepo {
    /// Repository with one commit containing `README.md`.
    pub fn new() -> Result<Self> {
        let repo = Self::empty()?;
        repo.write("README.md", "# test repo\n")?;
        repo.commit_all("initial commit")?;
        Ok(repo)
    }

    /// Repository without any commit.
    pub fn empty() -> Result<Self> {
        let temp = tempfile::tempdir().context("create temp dir")?;
        let root = temp.path().join("repo");
        fs::create_dir_all(&root).with_context(|| format!("create {}", root.display()))?;
        let root = root
            .canonicalize()
            .with_context(|| format!("canonicalize {}", root.display()))?;
        let repo = Self { _temp: temp, root };
        repo.git(&["init", "--quiet"])?;
        repo.git(&["symbolic-ref", "HEAD", "refs/heads/main"])?;
        repo.git(&["config", "user.name", "Delegate Tests"])?;
        repo.git(&["config", "user.email", "tests@example.com"])?;
        repo.git(&["config", "commit.gpgsign", "false"])?;
        Ok(repo)
    }

    /// Remove the repository-local identity and stop git from guessing one.
    pub fn drop_identity(&self) -> Result<()> {
        self.git(&["config", "--unset", "user.name"])?;
        self.git(&["config", "--unset", "user.email"])?;
        self.git(&["config", "user.useConfigOnly", "true"])?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Run git in the repository and return stdout.
    pub fn git(&self, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.root)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))?;
        if !output.status.success() {
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        let path = self.root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
    }

    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git(&["add", "-A"])?;
        self.git(&["commit", "--quiet", "-m", message])?;
        Ok(())
    }

    pub fn rev_parse(&self, rev: &str) -> Result<String> {
        Ok(self.git(&["rev-parse", "--verify", rev])?.trim().to_string())
    }

    pub fn current_branch(&self) -> Result<String> {
        Ok(self.git(&["branch", "--show-current"])?.trim().to_string())
    }

    /// Local branch names, sorted.
    pub fn branches(&self) -> Result<Vec<String>> {
        let out = self.git(&["for-each-ref", "--format=%(refname:short)", "refs/heads"])?;
        let mut branches: Vec<String> = out.lines().map(str::to_string).collect();
        branches.sort();
        Ok(branches)
    }

    /// True if `path` exists in the tree of `rev`.
    pub fn has_file_at(&self, rev: &str, path: &str) -> bool {
        self.git(&["cat-file", "-e", &format!("{rev}:{path}")]).is_ok()
    }
}

/// One scripted agent invocation.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    pub result: std::result::Result<String, String>,
    /// Files written into the target directory before returning.
    pub files: Vec<(String, String)>,
}

impl ScriptedRun {
    pub fn reply(text: impl Into<String>) -> Self {
        Self {
            result: Ok(text.into()),
            files: Vec::new(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            result: Err(message.into()),
            files: Vec::new(),
        }
    }

    pub fn with_file(mut self, path: impl Into<String>, contents: impl Into<String>) -> Self {
        self.files.push((path.into(), contents.into()));
        self
    }
}

/// Recorded agent invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentCall {
    pub task: String,
    pub target_dir: PathBuf,
}

/// Execution agent replaying scripted runs in order.
pub struct ScriptedAgent {
    runs: RefCell<VecDeque<ScriptedRun>>,
    fallback: Option<ScriptedRun>,
    calls: RefCell<Vec<AgentCall>>,
}

impl ScriptedAgent {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: RefCell::new(runs.into()),
            fallback: None,
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Agent that replays `run` on every invocation.
    pub fn always(run: ScriptedRun) -> Self {
        Self {
            fallback: Some(run),
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> Vec<AgentCall> {
        self.calls.borrow().clone()
    }
}

impl ExecutionAgent for ScriptedAgent {
    fn run(&self, task: &str, target_dir: &Path) -> Result<String> {
        self.calls.borrow_mut().push(AgentCall {
            task: task.to_string(),
            target_dir: target_dir.to_path_buf(),
        });
        let run = self
            .runs
            .borrow_mut()
            .pop_front()
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| anyhow!("scripted agent has no more runs"))?;
        for (rel, contents) in &run.files {
            let path = target_dir.join(rel);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, contents).with_context(|| format!("write {}", path.display()))?;
        }
        run.result.map_err(|message| anyhow!(message))
    }
}

/// Completer replaying scripted replies in order.
pub struct ScriptedCompleter {
    replies: RefCell<VecDeque<std::result::Result<String, String>>>,
    calls: RefCell<Vec<(String, Vec<Message>)>>,
}

impl ScriptedCompleter {
    pub fn new(replies: Vec<std::result::Result<String, String>>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            calls: RefCell::new(Vec::new()),
        }
    }

    /// Conversations received, in order.
    pub fn calls(&self) -> Vec<Vec<Message>> {
        self.calls
            .borrow()
            .iter()
            .map(|(_, messages)| messages.clone())
            .collect()
    }

    /// Models requested, in order.
    pub fn models(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|(model, _)| model.clone())
            .collect()
    }
}

impl Completer for ScriptedCompleter {
    fn complete(&self, model: &str, messages: &[Message]) -> Result<String> {
        self.calls
            .borrow_mut()
            .push((model.to_string(), messages.to_vec()));
        let reply = self
            .replies
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted completer has no more replies"))?;
        reply.map_err(|message| anyhow!(message))
    }
}
