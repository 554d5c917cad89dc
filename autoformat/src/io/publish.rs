//! Change publishing: detect, stage, commit and push back to the branch.
//!
//! ```text
//! Detect --clean--> NoOp
//!    |
//!  dirty
//!    v
//! Stage --empty--> NoOp
//!    v
//! Commit --> Push --accepted--> Published
//!               \--moved-----> Rejected
//! ```
//!
//! The push is a compare-and-swap against the workspace base revision. A
//! rejection is surfaced as [`PublishError::Rejected`] and never retried.

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{BotIdentity, CommitRecord, PublishOutcome};
use crate::io::git::{Git, PushResult};
use crate::io::provision::Workspace;

#[derive(Debug, Error)]
pub enum PublishError {
    /// The branch advanced since the run started.
    #[error("push to '{branch}' rejected: remote no longer at {base} ({detail})")]
    Rejected {
        branch: String,
        base: String,
        detail: String,
    },

    #[error("git: {0:#}")]
    Git(anyhow::Error),
}

impl From<anyhow::Error> for PublishError {
    fn from(err: anyhow::Error) -> Self {
        PublishError::Git(err)
    }
}

/// Commits and pushes a normalized tree.
pub trait Publisher {
    fn publish(
        &self,
        workspace: &Workspace,
        identity: &BotIdentity,
        message: &str,
    ) -> Result<PublishOutcome, PublishError>;
}

/// Publisher backed by the `git` CLI.
#[derive(Debug, Clone)]
pub struct GitPublisher {
    remote: String,
}

impl GitPublisher {
    pub fn new(remote: impl Into<String>) -> Self {
        Self {
            remote: remote.into(),
        }
    }

    /// Stage and commit as one unit: on commit failure the index is reset.
    fn stage_and_commit(
        &self,
        git: &Git,
        workspace: &Workspace,
        identity: &BotIdentity,
        message: &str,
    ) -> Result<Option<CommitRecord>, PublishError> {
        git.add_all()?;
        let staged = git.staged_paths()?;
        if staged.is_empty() {
            debug!("nothing staged after add, tolerating empty change set");
            return Ok(None);
        }

        let id = match git.commit_as(identity, message) {
            Ok(id) => id,
            Err(err) => {
                if let Err(reset_err) = git.reset_index() {
                    let detail = format!("{reset_err:#}");
                    warn!(err = %detail, "failed to unstage after commit failure");
                }
                return Err(PublishError::Git(err.context("commit normalized tree")));
            }
        };
        Ok(Some(CommitRecord {
            id,
            message: message.to_string(),
            parent: workspace.base_revision.clone(),
            author: identity.clone(),
            changed_paths: staged.len(),
        }))
    }
}

impl Publisher for GitPublisher {
    #[instrument(skip_all, fields(branch = %workspace.branch, remote = %self.remote))]
    fn publish(
        &self,
        workspace: &Workspace,
        identity: &BotIdentity,
        message: &str,
    ) -> Result<PublishOutcome, PublishError> {
        let git = workspace.git();

        let changes = git.status_porcelain()?;
        if changes.is_empty() {
            info!("working tree matches last commit, nothing to publish");
            return Ok(PublishOutcome::NoOp);
        }
        debug!(changed = changes.len(), "working tree differs from HEAD");

        let Some(commit) = self.stage_and_commit(&git, workspace, identity, message)? else {
            return Ok(PublishOutcome::NoOp);
        };

        match git.push_if_unchanged(&self.remote, &workspace.branch, &workspace.base_revision)? {
            PushResult::Accepted => {
                info!(commit = %commit.id, paths = commit.changed_paths, "published");
                Ok(PublishOutcome::Published {
                    branch: workspace.branch.clone(),
                    commit,
                })
            }
            PushResult::Rejected { detail } => Err(PublishError::Rejected {
                branch: workspace.branch.clone(),
                base: workspace.base_revision.clone(),
                detail,
            }),
        }
    }
}
