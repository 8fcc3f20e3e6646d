//! Stable exit codes for agentloop CLI commands.

/// Run completed, or `check` approved the command.
pub const OK: i32 = 0;
/// Run failed, or the command itself failed (bad config, missing files).
pub const FAILED: i32 = 1;
/// Run stopped at `max_iterations` without completion.
pub const BUDGET_EXHAUSTED: i32 = 2;
/// `check` rejected the command or requires a rewrite.
pub const REJECTED: i32 = 3;
