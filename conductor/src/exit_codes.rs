//! Stable exit codes for conductor CLI commands.

/// Command succeeded, or the turn was accepted or completed.
pub const OK: i32 = 0;
/// Invalid config, backend failure or any other error.
pub const ERROR: i32 = 1;
/// `conductor run` exhausted its attempts below the passing grade.
pub const NOT_ACCEPTED: i32 = 4;
