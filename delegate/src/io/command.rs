//! Bounded shell command runner confined to a sandbox root.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info, instrument};

use crate::core::cancel::CancelToken;
use crate::core::truncate::truncate_lines;
use crate::core::types::{CommandResult, CommandStatus};
use crate::io::process::{CommandOutput, run_command_with_timeout};

pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1_000_000;

/// Runs `sh -c <command>` with the working directory fixed to the sandbox root.
#[derive(Debug, Clone)]
pub struct CommandRunner {
    root: PathBuf,
    output_limit_bytes: usize,
    cancel: Option<CancelToken>,
}

impl CommandRunner {
    /// `root` is canonicalised once; every command starts there.
    pub fn new(root: &Path) -> Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("canonicalize {}", root.display()))?;
        Ok(Self {
            root,
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
            cancel: None,
        })
    }

    pub fn with_output_limit(mut self, output_limit_bytes: usize) -> Self {
        self.output_limit_bytes = output_limit_bytes;
        self
    }

    /// Kill running commands when `token` is cancelled.
    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Run `command` and return its combined, line-capped output.
    ///
    /// Timeouts, cancellation and non-zero exits are reported in the result;
    /// only a failure to spawn the shell is an error.
    #[instrument(skip_all, fields(timeout_secs = timeout.as_secs()))]
    pub fn run(&self, command: &str, timeout: Duration) -> Result<CommandResult> {
        info!(command, "running bounded command");
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).current_dir(&self.root);

        let output = run_command_with_timeout(
            cmd,
            None,
            timeout,
            self.output_limit_bytes,
            self.cancel.as_ref(),
        )
        .with_context(|| format!("run `{command}`"))?;

        let result = to_result(&output, timeout);
        debug!(status = ?result.status, truncated_lines = result.truncated_lines, "bounded command finished");
        Ok(result)
    }
}

fn to_result(output: &CommandOutput, timeout: Duration) -> CommandResult {
    let status = if output.cancelled {
        CommandStatus::Cancelled
    } else if output.timed_out {
        CommandStatus::TimedOut
    } else if output.status.success() {
        CommandStatus::Success
    } else {
        CommandStatus::Exit {
            code: output.status.code(),
        }
    };

    let mut lines: Vec<String> = output.stdout_lossy().lines().map(str::to_string).collect();
    lines.extend(output.stderr_lossy().lines().map(str::to_string));
    let (kept, truncated_lines) = truncate_lines(lines);

    CommandResult {
        output: kept.join("\n"),
        status,
        truncated_lines,
        timeout_secs: timeout.as_secs(),
    }
}
