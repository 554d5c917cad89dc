//! Automated code-normalization pipeline.
//!
//! On an admitted trigger event the pipeline formats the working tree, applies
//! linter auto-fixes, and publishes the result as a single bot-attributed
//! commit, or does nothing when the tree is already canonical.
//!
//! - **[`core`]**: Pure, deterministic logic (trigger evaluation, run stages).
//!   No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting collaborators (config, git, processes,
//!   provisioning, normalization, publishing).
//!
//! [`pipeline`] composes the collaborators; [`report`] renders the result for
//! the CLI.

pub mod core;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod pipeline;
pub mod report;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
