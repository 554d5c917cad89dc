//! Pipeline run record and its stage transitions.
//!
//! Stages advance strictly in order:
//!
//! ```text
//! Idle -> Admitted -> Provisioned -> Normalized -> Published | NoOp
//!            \____________\______________\______-> Failed
//! ```
//!
//! `Published`, `NoOp` and `Failed` are terminal.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Controller stage of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    Idle,
    Admitted,
    Provisioned,
    Normalized,
    Published,
    #[serde(rename = "noop")]
    NoOp,
    Failed,
}

impl RunStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStage::Published | RunStage::NoOp | RunStage::Failed)
    }

    fn can_advance_to(self, next: RunStage) -> bool {
        use RunStage::{Admitted, Failed, Idle, Normalized, NoOp, Provisioned, Published};
        matches!(
            (self, next),
            (Idle, Admitted)
                | (Admitted, Provisioned)
                | (Provisioned, Normalized)
                | (Normalized, Published)
                | (Normalized, NoOp)
                | (Admitted | Provisioned | Normalized, Failed)
        )
    }
}

/// Coarse status derived from the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("illegal run transition {from:?} -> {to:?}")]
pub struct IllegalTransition {
    pub from: RunStage,
    pub to: RunStage,
}

/// Process-scoped record of one pipeline run, owned by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineRun {
    pub branch: String,
    pub stage: RunStage,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Commit the working tree was provisioned at.
    pub working_tree_ref: Option<String>,
}

impl PipelineRun {
    pub fn new(branch: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            branch: branch.into(),
            stage: RunStage::Idle,
            started_at,
            finished_at: None,
            working_tree_ref: None,
        }
    }

    pub fn status(&self) -> RunStatus {
        match self.stage {
            RunStage::Idle => RunStatus::Pending,
            RunStage::Admitted | RunStage::Provisioned | RunStage::Normalized => {
                RunStatus::Running
            }
            RunStage::Published | RunStage::NoOp => RunStatus::Succeeded,
            RunStage::Failed => RunStatus::Failed,
        }
    }

    /// Move to `next`, stamping `finished_at` when `next` is terminal.
    pub fn advance(&mut self, next: RunStage, now: DateTime<Utc>) -> Result<(), IllegalTransition> {
        if !self.stage.can_advance_to(next) {
            return Err(IllegalTransition {
                from: self.stage,
                to: next,
            });
        }
        self.stage = next;
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        Ok(())
    }
}
