//! Final run report for the CLI: one of published, no-op, filtered or failed.

use serde::Serialize;

use crate::core::run::{PipelineRun, RunStatus};
use crate::core::trigger::{Rejection, TriggerEvent};
use crate::core::types::{CommitRecord, NormalizeReport, PublishOutcome};
use crate::exit_codes;
use crate::pipeline::{FailureKind, PipelineFailure, RunOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Published,
    #[serde(rename = "noop")]
    NoOp,
    Filtered,
    Failed,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Published => "published",
            Outcome::NoOp => "noop",
            Outcome::Filtered => "filtered",
            Outcome::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub message: String,
}

/// Serializable summary of a pipeline invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: Outcome,
    pub event: TriggerEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RunStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<PipelineRun>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection: Option<Rejection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normalize: Option<NormalizeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub commit: Option<CommitRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureReport>,
}

impl RunReport {
    pub fn new(event: &TriggerEvent, result: &Result<RunOutcome, PipelineFailure>) -> Self {
        let mut report = Self {
            outcome: Outcome::Filtered,
            event: event.clone(),
            status: None,
            run: None,
            rejection: None,
            normalize: None,
            commit: None,
            failure: None,
        };
        match result {
            Ok(RunOutcome::Filtered(rejection)) => {
                report.rejection = Some(rejection.clone());
            }
            Ok(RunOutcome::Completed {
                run,
                normalize,
                publish,
            }) => {
                report.status = Some(run.status());
                report.run = Some(run.clone());
                report.normalize = Some(normalize.clone());
                match publish {
                    PublishOutcome::Published { commit, .. } => {
                        report.outcome = Outcome::Published;
                        report.commit = Some(commit.clone());
                    }
                    PublishOutcome::NoOp => report.outcome = Outcome::NoOp,
                }
            }
            Err(failure) => {
                report.outcome = Outcome::Failed;
                report.status = Some(failure.run.status());
                report.run = Some(failure.run.clone());
                report.failure = Some(FailureReport {
                    kind: failure.error.kind(),
                    message: failure.error.to_string(),
                });
            }
        }
        report
    }

    pub fn exit_code(&self) -> i32 {
        match self.outcome {
            Outcome::Failed => exit_codes::FAILED,
            Outcome::Published | Outcome::NoOp | Outcome::Filtered => exit_codes::OK,
        }
    }

    /// One-line human summary.
    pub fn summary(&self) -> String {
        match (&self.outcome, &self.commit, &self.rejection, &self.failure) {
            (Outcome::Published, Some(commit), _, _) => format!(
                "published {} to {} ({} paths)",
                commit.id, self.event.branch, commit.changed_paths
            ),
            (Outcome::Filtered, _, Some(rejection), _) => format!("filtered: {rejection}"),
            (Outcome::Failed, _, _, Some(failure)) => format!("failed: {}", failure.message),
            (Outcome::NoOp, _, _, _) => "tree already canonical, nothing to publish".to_string(),
            _ => self.outcome.as_str().to_string(),
        }
    }

    /// `key=value` lines for `$GITHUB_OUTPUT`.
    pub fn github_output(&self) -> String {
        let mut out = format!("outcome={}\n", self.outcome.as_str());
        if let Some(commit) = &self.commit {
            out.push_str(&format!("commit={}\n", commit.id));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run::RunStage;
    use crate::core::types::BotIdentity;
    use chrono::Utc;

    fn completed(publish: PublishOutcome) -> Result<RunOutcome, PipelineFailure> {
        let mut run = PipelineRun::new("develop", Utc::now());
        for stage in [
            RunStage::Admitted,
            RunStage::Provisioned,
            RunStage::Normalized,
        ] {
            run.advance(stage, Utc::now()).expect("advance");
        }
        let terminal = match publish {
            PublishOutcome::Published { .. } => RunStage::Published,
            PublishOutcome::NoOp => RunStage::NoOp,
        };
        run.advance(terminal, Utc::now()).expect("terminal");
        Ok(RunOutcome::Completed {
            run,
            normalize: NormalizeReport::default(),
            publish,
        })
    }

    #[test]
    fn published_report_carries_commit_and_outputs() {
        let event = TriggerEvent::push("develop", "alice");
        let result = completed(PublishOutcome::Published {
            branch: "develop".to_string(),
            commit: CommitRecord {
                id: "abc123".to_string(),
                message: "format by actions".to_string(),
                parent: "000".to_string(),
                author: BotIdentity::default(),
                changed_paths: 2,
            },
        });
        let report = RunReport::new(&event, &result);
        assert_eq!(report.outcome, Outcome::Published);
        assert_eq!(report.exit_code(), exit_codes::OK);
        assert_eq!(report.status, Some(RunStatus::Succeeded));
        assert_eq!(report.github_output(), "outcome=published\ncommit=abc123\n");
        assert!(report.summary().contains("abc123"));
    }

    #[test]
    fn noop_and_filtered_exit_ok() {
        let event = TriggerEvent::push("develop", "alice");
        let noop = RunReport::new(&event, &completed(PublishOutcome::NoOp));
        assert_eq!(noop.outcome, Outcome::NoOp);
        assert_eq!(noop.exit_code(), exit_codes::OK);
        assert_eq!(noop.github_output(), "outcome=noop\n");

        let filtered = RunReport::new(
            &TriggerEvent::push("main", "alice"),
            &Ok(RunOutcome::Filtered(Rejection::BranchNotAllowed {
                branch: "main".to_string(),
            })),
        );
        assert_eq!(filtered.outcome, Outcome::Filtered);
        assert_eq!(filtered.exit_code(), exit_codes::OK);
        let json = serde_json::to_value(&filtered).expect("json");
        assert_eq!(json["outcome"], "filtered");
        assert_eq!(json["rejection"]["reason"], "branch_not_allowed");
        assert!(json.get("run").is_none());
    }
}
