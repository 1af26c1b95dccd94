//! Exit codes for the CLI

/// Success
pub const SUCCESS: i32 = 0;

/// Configuration could not be loaded or failed validation
pub const CONFIG_ERROR: i32 = 2;

/// A task manifest was malformed or rejected
pub const VALIDATION_ERROR: i32 = 5;

/// One or more tasks failed during a run
pub const TASK_FAILED: i32 = 6;

/// Interrupted by the user
pub const CANCELLED: i32 = 130;
