//! Shared deterministic types for the pipeline core.
//!
//! These types define stable contracts between the controller and its
//! collaborators. They hold no I/O handles.

use serde::{Deserialize, Serialize};

/// Fixed identity used as both author and committer of publish commits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotIdentity {
    pub name: String,
    pub email: String,
}

impl BotIdentity {
    /// Render as `Name <email>`, the form git uses for `--author`.
    pub fn signature(&self) -> String {
        format!("{} <{}>", self.name, self.email)
    }
}

impl Default for BotIdentity {
    fn default() -> Self {
        Self {
            name: "github-actions[bot]".to_string(),
            email: "41898282+github-actions[bot]@users.noreply.github.com".to_string(),
        }
    }
}

/// Commit created by the publisher. At most one per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommitRecord {
    pub id: String,
    pub message: String,
    /// Branch HEAD the commit was created on top of.
    pub parent: String,
    pub author: BotIdentity,
    /// Number of paths included in the commit.
    pub changed_paths: usize,
}

/// Successful publisher result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PublishOutcome {
    /// A commit was pushed to `branch`.
    Published { branch: String, commit: CommitRecord },
    /// The tree already matched the last commit; nothing was committed.
    #[serde(rename = "noop")]
    NoOp,
}

/// Result of a single normalization step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepReport {
    pub name: String,
    /// `None` when the step was disabled and not executed.
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub skipped: bool,
}

/// Steps executed by the normalization runner, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NormalizeReport {
    pub steps: Vec<StepReport>,
}
