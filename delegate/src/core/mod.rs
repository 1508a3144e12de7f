//! Deterministic, pure logic shared by the delegation core.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod blocks;
pub mod branch;
pub mod cancel;
pub mod chunk;
pub mod outline;
pub mod state;
pub mod truncate;
pub mod types;
