//! Stable exit codes for the `terminalai` binary.

/// The run ended normally: goal complete, or stopped by the user.
pub const OK: i32 = 0;
/// Invalid configuration, working directory, shell, or other startup errors.
pub const INVALID: i32 = 1;
/// The step budget ran out before the goal was confirmed complete.
pub const BUDGET_EXHAUSTED: i32 = 2;
