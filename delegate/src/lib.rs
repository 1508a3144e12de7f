//! Task delegation orchestrator.
//!
//! A natural-language coding task is handed to an external execution agent
//! that mutates a target repository. The agent runs inside three sandboxes:
//! an isolated git branch, a path-confined filesystem and a bounded command
//! runner. A Plan → Execute → Verify loop retries failed attempts until a
//! circuit breaker escalates. The crate keeps a strict split:
//!
//! - **[`core`]**: Pure, deterministic logic (state machine, branch names,
//!   line chunks, truncation, outlines). No I/O.
//! - **[`io`]**: Side-effecting adapters (filesystem, git, processes,
//!   completion engine, execution agents). Traits at the seams so tests can
//!   substitute scripted fakes.
//!
//! [`orchestrator`] drives the state machine; [`delegate`] wraps one request
//! end to end and renders its report.

pub mod core;
pub mod delegate;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
