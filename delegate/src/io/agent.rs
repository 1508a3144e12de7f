//! Execution agents: the collaborators that actually change the code.
//!
//! An agent receives the augmented task and the target directory and returns
//! free-form text. The text is the only channel back to the orchestrator;
//! verification looks for the failure marker in it.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::blocks::parse_file_blocks;
use crate::core::cancel::CancelToken;
use crate::core::state::FAILURE_MARKER;
use crate::io::command::CommandRunner;
use crate::io::completer::{Completer, Message};
use crate::io::config::{AgentConfig, CommandConfig};
use crate::io::fs::ConfinedFs;
use crate::io::process::run_command_with_timeout;
use crate::io::prompt::PromptEngine;

/// Abstraction over execution backends.
pub trait ExecutionAgent {
    /// Carry out `task` inside `target_dir` and describe what happened.
    fn run(&self, task: &str, target_dir: &Path) -> Result<String>;
}

impl<A: ExecutionAgent + ?Sized> ExecutionAgent for &A {
    fn run(&self, task: &str, target_dir: &Path) -> Result<String> {
        (**self).run(task, target_dir)
    }
}

/// Agent that spawns an external agent process with the task on stdin.
#[derive(Debug, Clone)]
pub struct CommandAgent {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: Option<CancelToken>,
}

impl CommandAgent {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes: config.output_limit_bytes,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl ExecutionAgent for CommandAgent {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn run(&self, task: &str, target_dir: &Path) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("agent command is empty"))?;
        info!(program = %program, workdir = %target_dir.display(), "starting execution agent");

        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(target_dir);
        let output = run_command_with_timeout(
            cmd,
            Some(task.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
            self.cancel.as_ref(),
        )
        .with_context(|| format!("run agent {program}"))?;

        if output.cancelled {
            return Err(anyhow!("execution agent cancelled"));
        }

        let mut text = output.stdout_lossy().trim_end().to_string();
        let stderr = output.stderr_lossy();
        if !output.succeeded() && !stderr.trim().is_empty() {
            text.push_str("\n--- stderr ---\n");
            text.push_str(stderr.trim_end());
        }

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "execution agent timed out");
            return Ok(format!(
                "{FAILURE_MARKER}: execution agent timed out after {} seconds\n{text}",
                self.timeout.as_secs()
            ));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "execution agent failed");
            return Ok(format!(
                "{FAILURE_MARKER}: execution agent exited with status {:?}\n{text}",
                output.status.code()
            ));
        }
        debug!(bytes = text.len(), "execution agent finished");
        Ok(text)
    }
}

/// Agent that asks a completer for whole files and writes them into the sandbox.
///
/// After the files are written, an optional check command (for example the
/// project's test suite) runs through the bounded command runner.
pub struct FileBlockAgent<C> {
    completer: C,
    model: String,
    check_command: Option<String>,
    command: CommandConfig,
    cancel: Option<CancelToken>,
    prompts: PromptEngine,
}

impl<C: Completer> FileBlockAgent<C> {
    pub fn new(
        completer: C,
        model: impl Into<String>,
        agent: &AgentConfig,
        command: &CommandConfig,
    ) -> Self {
        Self {
            completer,
            model: model.into(),
            check_command: agent.check_command.clone(),
            command: command.clone(),
            cancel: None,
            prompts: PromptEngine::new(),
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn run_check(&self, check: &str, target_dir: &Path) -> Result<(bool, String)> {
        let mut runner =
            CommandRunner::new(target_dir)?.with_output_limit(self.command.output_limit_bytes);
        if let Some(token) = &self.cancel {
            runner = runner.with_cancel(token.clone());
        }
        let result = runner.run(check, Duration::from_secs(self.command.timeout_secs))?;
        Ok((result.status.is_success(), result.render()))
    }
}

impl<C: Completer> ExecutionAgent for FileBlockAgent<C> {
    #[instrument(skip_all, fields(model = %self.model))]
    fn run(&self, task: &str, target_dir: &Path) -> Result<String> {
        let fs = ConfinedFs::new(target_dir)?;
        let tree = fs.list_tree("")?;
        let messages = [
            Message::system(self.prompts.render_file_blocks(fs.root(), &tree)?),
            Message::user(task),
        ];
        let reply = self
            .completer
            .complete(&self.model, &messages)
            .context("request file blocks")?;

        let parsed = parse_file_blocks(&reply);
        let mut lines = Vec::new();
        let mut failed = false;

        for reason in &parsed.malformed {
            failed = true;
            lines.push(format!("{FAILURE_MARKER}: malformed block: {reason}"));
        }
        if parsed.blocks.is_empty() {
            failed = true;
            lines.push(format!("{FAILURE_MARKER}: completion contained no file blocks"));
        }
        for block in &parsed.blocks {
            match fs.write_file(&block.path, &block.content) {
                Ok(()) => lines.push(format!("wrote {}", block.path)),
                Err(err) if err.is_safety_violation() => {
                    warn!(path = %block.path, err = %err, "file block escapes the sandbox");
                    return Err(err.into());
                }
                Err(err) => {
                    warn!(path = %block.path, err = %err, "could not apply file block");
                    failed = true;
                    lines.push(format!(
                        "{FAILURE_MARKER}: could not write {}: {err}",
                        block.path
                    ));
                }
            }
        }

        if let Some(check) = &self.check_command
            && !failed
        {
            let (passed, output) = self.run_check(check, fs.root())?;
            if passed {
                lines.push(format!("check `{check}` passed\n{output}"));
            } else {
                lines.push(format!("{FAILURE_MARKER}: check `{check}` failed\n{output}"));
            }
        }

        debug!(blocks = parsed.blocks.len(), failed, "file blocks applied");
        Ok(lines.join("\n"))
    }
}
