//! Stable exit codes for explorer CLI commands.

/// Command succeeded.
pub const OK: i32 = 0;
/// Command failed due to invalid config, a missing or corrupt session, or other errors.
pub const INVALID: i32 = 1;
/// `explorer route` found no path between the two screens.
pub const UNREACHABLE: i32 = 2;
