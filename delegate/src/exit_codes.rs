//! Stable exit codes for delegate CLI commands.

/// Command succeeded; for `delegate run`, verification passed.
pub const OK: i32 = 0;
/// Invalid input, configuration or repository state, or any other error.
pub const INVALID: i32 = 1;
/// `delegate run` hit the retry ceiling and escalated.
pub const ESCALATED: i32 = 2;
