//! Error taxonomy for the sandboxes and the orchestration loop.
//!
//! Sandbox and version-control errors are typed so callers can tell a
//! recoverable precondition failure (`NotFound`, `InvalidRange`) from a safety
//! failure that must abort the request (`SandboxViolation`, missing git root).

use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::Stage;

/// Failures of confined filesystem operations.
#[derive(Debug, Error)]
pub enum FsError {
    #[error("sandbox violation: {path} resolves outside {root}")]
    SandboxViolation { path: PathBuf, root: PathBuf },

    #[error("not found: {path}")]
    NotFound { path: PathBuf },

    #[error("invalid line range {start}..={end} (file has {len} lines)")]
    InvalidRange { start: usize, end: usize, len: usize },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl FsError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        FsError::Io {
            context: context.into(),
            source,
        }
    }

    /// Safety failures abort the whole delegation; everything else is
    /// reported to the caller of the operation.
    pub fn is_safety_violation(&self) -> bool {
        matches!(self, FsError::SandboxViolation { .. })
    }
}

/// Failures of the version-control isolation layer. Both are fatal to a
/// delegation.
#[derive(Debug, Error)]
pub enum VcsError {
    #[error("{path} is not a git repository root (refusing to mutate without version control)")]
    NotAVersionControlRoot { path: PathBuf },

    #[error("git {command} failed: {message}")]
    VersionControlError { command: String, message: String },
}

/// Failures that end an orchestration run early.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error("invalid target directory {path}: {reason}")]
    InvalidTarget { path: PathBuf, reason: String },

    #[error("planning failed: {0:#}")]
    Planning(anyhow::Error),

    #[error("delegation cancelled before {stage}")]
    Cancelled { stage: Stage },

    /// The execution agent tried to leave the sandbox.
    #[error("{0}")]
    SandboxViolation(FsError),
}
