//! Shared deterministic types for the delegation core.
//!
//! These types define stable contracts between the state machine, the
//! sandboxes and the report. They must not depend on external state or I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a delegated task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Started,
    PlanningComplete,
    ExecutionComplete,
    VerificationPassed,
    VerificationFailed,
    Escalated,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Started => "started",
            TaskStatus::PlanningComplete => "planning_complete",
            TaskStatus::ExecutionComplete => "execution_complete",
            TaskStatus::VerificationPassed => "verification_passed",
            TaskStatus::VerificationFailed => "verification_failed",
            TaskStatus::Escalated => "escalated",
        }
    }

    /// `verification_passed` and `escalated` end the state machine.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::VerificationPassed | TaskStatus::Escalated)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States of the orchestration loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Plan,
    Execute,
    Verify,
    Escalate,
    Done,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Plan => "plan",
            Stage::Execute => "execute",
            Stage::Verify => "verify",
            Stage::Escalate => "escalate",
            Stage::Done => "done",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a bounded command finished.
///
/// A non-zero exit is informative (e.g. a failing test run), so it is a value
/// here rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommandStatus {
    Success,
    /// Non-zero exit. `code` is `None` when the process died from a signal.
    Exit { code: Option<i32> },
    TimedOut,
    Cancelled,
}

impl CommandStatus {
    pub fn is_success(self) -> bool {
        self == CommandStatus::Success
    }
}

/// Captured, line-capped output of one bounded command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// Combined stdout then stderr, truncated to a bounded number of lines.
    pub output: String,
    pub status: CommandStatus,
    /// Number of lines dropped by truncation (0 when untouched).
    pub truncated_lines: usize,
    pub timeout_secs: u64,
}

impl CommandResult {
    /// Text handed to an agent: the output, followed by a status line when the
    /// command did not succeed.
    pub fn render(&self) -> String {
        match self.status {
            CommandStatus::Success => self.output.clone(),
            CommandStatus::Exit { code } => {
                let code = code.map_or_else(|| "signal".to_string(), |c| c.to_string());
                format!("{}\n[exit status: {code}]", self.output)
            }
            CommandStatus::TimedOut => format!(
                "{}\nError: Command timed out after {} seconds.",
                self.output, self.timeout_secs
            ),
            CommandStatus::Cancelled => format!("{}\nError: Command cancelled.", self.output),
        }
    }
}

/// Whether a delegation mutates an isolated branch or the caller's branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    Isolated,
    Direct,
}
