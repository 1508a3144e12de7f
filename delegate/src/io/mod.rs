//! Side-effecting adapters: sandboxes, processes, git and collaborators.

pub mod agent;
pub mod command;
pub mod completer;
pub mod config;
pub mod fs;
pub mod git;
pub mod isolation;
pub mod locks;
pub mod process;
pub mod prompt;
pub mod pull_request;
pub mod trace;
