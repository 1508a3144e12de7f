//! Completion engine abstraction.
//!
//! The [`Completer`] trait decouples planning (and the file-block agent) from
//! the model backend. [`CommandCompleter`] pipes the conversation into a
//! configured command such as `codex exec -`; tests use scripted completers.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::cancel::CancelToken;
use crate::io::config::CompleterConfig;
use crate::io::process::run_command_with_timeout;

/// Placeholder replaced by the model id in completer arguments.
pub const MODEL_PLACEHOLDER: &str = "{model}";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One conversation turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Abstraction over completion backends.
pub trait Completer {
    /// Return the model's reply to `messages`.
    fn complete(&self, model: &str, messages: &[Message]) -> Result<String>;
}

impl<C: Completer + ?Sized> Completer for &C {
    fn complete(&self, model: &str, messages: &[Message]) -> Result<String> {
        (**self).complete(model, messages)
    }
}

/// Completer that runs a configured command with the conversation on stdin.
#[derive(Debug, Clone)]
pub struct CommandCompleter {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
    cancel: Option<CancelToken>,
}

impl CommandCompleter {
    pub fn new(config: &CompleterConfig, output_limit_bytes: usize) -> Self {
        Self {
            command: config.command.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            output_limit_bytes,
            cancel: None,
        }
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

impl Completer for CommandCompleter {
    #[instrument(skip_all, fields(model, messages = messages.len()))]
    fn complete(&self, model: &str, messages: &[Message]) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("completer command is empty"))?;
        let mut cmd = Command::new(program);
        cmd.args(args.iter().map(|arg| arg.replace(MODEL_PLACEHOLDER, model)));
        info!(program = %program, "requesting completion");

        let conversation = render_conversation(messages);
        let output = run_command_with_timeout(
            cmd,
            Some(conversation.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
            self.cancel.as_ref(),
        )
        .with_context(|| format!("run completer {program}"))?;

        if output.cancelled {
            return Err(anyhow!("completion cancelled"));
        }
        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "completer timed out");
            return Err(anyhow!("completer timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "completer failed");
            return Err(anyhow!(
                "completer failed with status {:?}: {}",
                output.status.code(),
                output.stderr_lossy().trim()
            ));
        }

        let reply = output.stdout_lossy().trim().to_string();
        if reply.is_empty() {
            return Err(anyhow!("completer returned an empty reply"));
        }
        debug!(bytes = reply.len(), "completion received");
        Ok(reply)
    }
}

/// Plain-text rendering of a conversation for command-line backends.
pub fn render_conversation(messages: &[Message]) -> String {
    let mut out = String::new();
    for message in messages {
        out.push_str(&format!("[{}]\n{}\n\n", message.role.as_str(), message.content));
    }
    out
}
