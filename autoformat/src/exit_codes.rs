//! Stable exit codes for autoformat CLI commands.

/// Run succeeded (published or no-op), or the event was filtered.
pub const OK: i32 = 0;
/// The pipeline hit a hard failure (provisioning, tool crash, push rejected).
pub const FAILED: i32 = 1;
/// Invalid invocation or configuration; no pipeline step ran.
pub const INVALID: i32 = 2;
/// `autoformat check-trigger` rejected the event.
pub const FILTERED: i32 = 3;
