//! Pipeline controller: trigger, provision, normalize, publish.
//!
//! The controller owns the [`PipelineRun`] for the whole run and drives it
//! through the stages in [`crate::core::run`]. Any hard failure stops the run
//! at the current step boundary. A clean tree is a successful run.

use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::run::{IllegalTransition, PipelineRun, RunStage};
use crate::core::trigger::{Admission, Rejection, TriggerEvent, TriggerPolicy, evaluate};
use crate::core::types::{NormalizeReport, PublishOutcome};
use crate::io::config::PipelineConfig;
use crate::io::normalize::{NormalizeError, Normalizer};
use crate::io::provision::Provisioner;
use crate::io::publish::{PublishError, Publisher};

/// Hard failure of a single step.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("provisioning: {0:#}")]
    Provision(anyhow::Error),

    #[error("normalization: {0}")]
    Normalize(#[from] NormalizeError),

    #[error("publish: {0}")]
    Publish(#[from] PublishError),

    #[error(transparent)]
    State(#[from] IllegalTransition),
}

/// Stable classification of pipeline failures for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Provisioning,
    NormalizationCrash,
    /// The branch advanced concurrently; re-trigger to retry.
    PublishRace,
    PublishFailed,
    Internal,
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            PipelineError::Provision(_) => FailureKind::Provisioning,
            PipelineError::Normalize(_) => FailureKind::NormalizationCrash,
            PipelineError::Publish(PublishError::Rejected { .. }) => FailureKind::PublishRace,
            PipelineError::Publish(PublishError::Git(_)) => FailureKind::PublishFailed,
            PipelineError::State(_) => FailureKind::Internal,
        }
    }
}

/// A run that ended in [`RunStage::Failed`].
#[derive(Debug, Error)]
#[error("run on '{}' failed", .run.branch)]
pub struct PipelineFailure {
    pub run: PipelineRun,
    #[source]
    pub error: PipelineError,
}

/// Successful result of [`Controller::run`].
#[derive(Debug)]
pub enum RunOutcome {
    /// The event did not pass the trigger filter; no run was created.
    Filtered(Rejection),
    /// The run reached `Published` or `NoOp`.
    Completed {
        run: PipelineRun,
        normalize: NormalizeReport,
        publish: PublishOutcome,
    },
}

/// Composes the pipeline collaborators under a fixed configuration.
pub struct Controller<P, N, U> {
    config: PipelineConfig,
    policy: TriggerPolicy,
    provisioner: P,
    normalizer: N,
    publisher: U,
}

impl<P: Provisioner, N: Normalizer, U: Publisher> Controller<P, N, U> {
    pub fn new(config: PipelineConfig, provisioner: P, normalizer: N, publisher: U) -> Self {
        let policy = config.trigger_policy();
        Self {
            config,
            policy,
            provisioner,
            normalizer,
            publisher,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Evaluate `event` and, if admitted, run the pipeline to a terminal stage.
    #[instrument(skip_all, fields(kind = %event.kind, branch = %event.branch, actor = %event.actor))]
    pub fn run(&self, event: &TriggerEvent) -> Result<RunOutcome, PipelineFailure> {
        if let Admission::Rejected(rejection) = evaluate(&self.policy, event) {
            info!(%rejection, "event filtered, no run");
            return Ok(RunOutcome::Filtered(rejection));
        }

        let mut run = PipelineRun::new(&event.branch, Utc::now());
        enter(&mut run, RunStage::Admitted)?;
        info!("run admitted");

        let workspace = match self.provisioner.provision(event) {
            Ok(workspace) => workspace,
            Err(err) => return Err(fail(run, PipelineError::Provision(err))),
        };
        run.working_tree_ref = Some(workspace.base_revision.clone());
        enter(&mut run, RunStage::Provisioned)?;

        let normalize = match self.normalizer.normalize(&workspace) {
            Ok(report) => report,
            Err(err) => return Err(fail(run, err.into())),
        };
        enter(&mut run, RunStage::Normalized)?;

        let publish = match self.publisher.publish(
            &workspace,
            &self.config.bot_identity,
            &self.config.commit_message,
        ) {
            Ok(outcome) => outcome,
            Err(err) => return Err(fail(run, err.into())),
        };
        let terminal = match &publish {
            PublishOutcome::Published { .. } => RunStage::Published,
            PublishOutcome::NoOp => RunStage::NoOp,
        };
        enter(&mut run, terminal)?;
        info!(stage = ?terminal, "run succeeded");

        Ok(RunOutcome::Completed {
            run,
            normalize,
            publish,
        })
    }
}

fn enter(run: &mut PipelineRun, next: RunStage) -> Result<(), PipelineFailure> {
    run.advance(next, Utc::now())
        .map_err(|err| fail(run.clone(), err.into()))
}

fn fail(mut run: PipelineRun, error: PipelineError) -> PipelineFailure {
    warn!(stage = ?run.stage, kind = ?error.kind(), err = %error, "run failed");
    if let Err(err) = run.advance(RunStage::Failed, Utc::now()) {
        warn!(%err, "could not mark run failed");
    }
    PipelineFailure { run, error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::run::RunStatus;
    use crate::core::types::{BotIdentity, CommitRecord};
    use crate::test_support::{CallLog, ScriptedNormalizer, ScriptedProvisioner, ScriptedPublisher};

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    fn published() -> PublishOutcome {
        PublishOutcome::Published {
            branch: "develop".to_string(),
            commit: CommitRecord {
                id: "c1".to_string(),
                message: "format by actions".to_string(),
                parent: "c0".to_string(),
                author: BotIdentity::default(),
                changed_paths: 1,
            },
        }
    }

    #[test]
    fn rejected_event_calls_no_collaborator() {
        let log = CallLog::default();
        let controller = Controller::new(
            config(),
            ScriptedProvisioner::ok(&log),
            ScriptedNormalizer::ok(&log),
            ScriptedPublisher::returning(&log, Ok(PublishOutcome::NoOp)),
        );
        let outcome = controller
            .run(&TriggerEvent::push("main", "alice"))
            .expect("filtered is not an error");
        assert!(matches!(
            outcome,
            RunOutcome::Filtered(Rejection::BranchNotAllowed { .. })
        ));
        assert!(log.calls().is_empty());
    }

    #[test]
    fn steps_run_in_order_and_noop_succeeds() {
        let log = CallLog::default();
        let controller = Controller::new(
            config(),
            ScriptedProvisioner::ok(&log),
            ScriptedNormalizer::ok(&log),
            ScriptedPublisher::returning(&log, Ok(PublishOutcome::NoOp)),
        );
        let outcome = controller
            .run(&TriggerEvent::push("develop", "alice"))
            .expect("run");
        let RunOutcome::Completed { run, publish, .. } = outcome else {
            panic!("expected completed run");
        };
        assert_eq!(publish, PublishOutcome::NoOp);
        assert_eq!(run.stage, RunStage::NoOp);
        assert_eq!(run.status(), RunStatus::Succeeded);
        assert_eq!(run.working_tree_ref.as_deref(), Some("base"));
        assert_eq!(log.calls(), vec!["provision", "normalize", "publish"]);
    }

    #[test]
    fn publisher_receives_configured_identity_and_message() {
        let log = CallLog::default();
        let mut cfg = config();
        cfg.bot_identity = BotIdentity {
            name: "tidy".to_string(),
            email: "tidy@example.com".to_string(),
        };
        cfg.commit_message = "style: normalize".to_string();
        let publisher = ScriptedPublisher::returning(&log, Ok(published()));
        let controller = Controller::new(
            cfg,
            ScriptedProvisioner::ok(&log),
            ScriptedNormalizer::ok(&log),
            publisher,
        );
        let outcome = controller
            .run(&TriggerEvent::manual("feature/x", "bob"))
            .expect("run");
        assert!(matches!(
            outcome,
            RunOutcome::Completed {
                publish: PublishOutcome::Published { .. },
                ..
            }
        ));
        let seen = log.published_with();
        assert_eq!(
            seen,
            vec![("tidy <tidy@example.com>".to_string(), "style: normalize".to_string())]
        );
    }

    #[test]
    fn provisioning_failure_aborts_before_normalize() {
        let log = CallLog::default();
        let controller = Controller::new(
            config(),
            ScriptedProvisioner::failing(&log, "checkout failed"),
            ScriptedNormalizer::ok(&log),
            ScriptedPublisher::returning(&log, Ok(PublishOutcome::NoOp)),
        );
        let failure = controller
            .run(&TriggerEvent::push("develop", "alice"))
            .expect_err("provision fails");
        assert_eq!(failure.error.kind(), FailureKind::Provisioning);
        assert_eq!(failure.run.stage, RunStage::Failed);
        assert!(failure.run.working_tree_ref.is_none());
        assert_eq!(log.calls(), vec!["provision"]);
    }

    #[test]
    fn normalizer_crash_aborts_before_publish() {
        let log = CallLog::default();
        let controller = Controller::new(
            config(),
            ScriptedProvisioner::ok(&log),
            ScriptedNormalizer::crashing(&log, "formatter"),
            ScriptedPublisher::returning(&log, Ok(PublishOutcome::NoOp)),
        );
        let failure = controller
            .run(&TriggerEvent::push("develop", "alice"))
            .expect_err("normalize fails");
        assert_eq!(failure.error.kind(), FailureKind::NormalizationCrash);
        assert_eq!(failure.run.status(), RunStatus::Failed);
        assert_eq!(log.calls(), vec!["provision", "normalize"]);
    }

    #[test]
    fn push_rejection_is_a_typed_race_failure() {
        let log = CallLog::default();
        let controller = Controller::new(
            config(),
            ScriptedProvisioner::ok(&log),
            ScriptedNormalizer::ok(&log),
            ScriptedPublisher::returning(
                &log,
                Err(PublishError::Rejected {
                    branch: "develop".to_string(),
                    base: "base".to_string(),
                    detail: "[rejected] (stale info)".to_string(),
                }),
            ),
        );
        let failure = controller
            .run(&TriggerEvent::push("develop", "alice"))
            .expect_err("push rejected");
        assert_eq!(failure.error.kind(), FailureKind::PublishRace);
        assert!(failure.run.finished_at.is_some());
        let rendered = format!("{:#}", anyhow::Error::new(failure));
        assert!(rendered.contains("run on 'develop' failed"));
        assert!(rendered.contains("rejected"));
    }
}
