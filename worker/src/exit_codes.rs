//! Stable exit codes for the worker binary.

/// Session finished normally, or the master told the worker to die.
pub const OK: i32 = 0;
/// Invalid configuration, transport failure, or an internal error.
pub const FAILED: i32 = 1;
/// The run loop stopped early because a quit signal arrived.
pub const QUIT: i32 = 2;
