//! Deterministic, pure logic shared by the orchestrator.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod command_parse;
pub mod critic_policy;
pub mod grading;
pub mod history;
pub mod operations;
pub mod plan;
pub mod sentinel;
pub mod types;
