//! Trigger evaluation: decides whether an incoming event admits a run.
//!
//! Evaluation is a pure filter. A rejected event is not an error; it simply
//! never becomes a pipeline run.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of event that may start a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Push,
    Manual,
    /// Any event name the pipeline does not handle (kept for reporting).
    Other(String),
}

impl EventKind {
    /// Map a GitHub Actions event name (`GITHUB_EVENT_NAME`) to a kind.
    pub fn from_github(name: &str) -> Self {
        match name.trim() {
            "push" => EventKind::Push,
            "workflow_dispatch" => EventKind::Manual,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventKind::Push => f.write_str("push"),
            EventKind::Manual => f.write_str("manual"),
            EventKind::Other(name) => f.write_str(name),
        }
    }
}

/// Immutable notification received from the event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub kind: EventKind,
    /// Branch the event refers to (short name, e.g. `develop`).
    pub branch: String,
    /// Identity that caused the event. Never used for commit attribution.
    pub actor: String,
    /// Commit the event points at, when the source provides one.
    pub commit: Option<String>,
}

impl TriggerEvent {
    pub fn push(branch: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Push,
            branch: branch.into(),
            actor: actor.into(),
            commit: None,
        }
    }

    pub fn manual(branch: impl Into<String>, actor: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Manual,
            branch: branch.into(),
            actor: actor.into(),
            commit: None,
        }
    }

    pub fn with_commit(mut self, commit: impl Into<String>) -> Self {
        self.commit = Some(commit.into());
        self
    }
}

/// Strip `refs/heads/` from a git ref. Other refs (tags, pulls) are returned
/// verbatim so they can never match a branch allow-list entry.
pub fn branch_from_ref(git_ref: &str) -> &str {
    let git_ref = git_ref.trim();
    git_ref.strip_prefix("refs/heads/").unwrap_or(git_ref)
}

/// Static admission filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerPolicy {
    pub allowed_branches: BTreeSet<String>,
    /// When set, manual dispatch is also restricted to `allowed_branches`.
    pub manual_requires_allowed_branch: bool,
}

/// Why an event did not admit a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum Rejection {
    BranchNotAllowed { branch: String },
    UnsupportedEvent { name: String },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::BranchNotAllowed { branch } => {
                write!(f, "branch '{branch}' is not in the allow-list")
            }
            Rejection::UnsupportedEvent { name } => write!(f, "unsupported event '{name}'"),
        }
    }
}

/// Result of trigger evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Rejected(Rejection),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Decide whether `event` starts a run under `policy`.
pub fn evaluate(policy: &TriggerPolicy, event: &TriggerEvent) -> Admission {
    let branch_allowed = policy.allowed_branches.contains(&event.branch);
    match &event.kind {
        EventKind::Push if branch_allowed => Admission::Admitted,
        EventKind::Manual if branch_allowed || !policy.manual_requires_allowed_branch => {
            Admission::Admitted
        }
        EventKind::Push | EventKind::Manual => Admission::Rejected(Rejection::BranchNotAllowed {
            branch: event.branch.clone(),
        }),
        EventKind::Other(name) => Admission::Rejected(Rejection::UnsupportedEvent {
            name: name.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(branches: &[&str]) -> TriggerPolicy {
        TriggerPolicy {
            allowed_branches: branches.iter().map(|b| b.to_string()).collect(),
            manual_requires_allowed_branch: false,
        }
    }

    #[test]
    fn push_to_allowed_branch_is_admitted() {
        let admission = evaluate(&policy(&["develop"]), &TriggerEvent::push("develop", "alice"));
        assert_eq!(admission, Admission::Admitted);
    }

    #[test]
    fn push_to_other_branch_is_rejected() {
        for branch in ["main", "feature/x", "", "Develop", "refs/tags/v1"] {
            let admission = evaluate(&policy(&["develop"]), &TriggerEvent::push(branch, "alice"));
            assert_eq!(
                admission,
                Admission::Rejected(Rejection::BranchNotAllowed {
                    branch: branch.to_string()
                }),
                "branch {branch:?}"
            );
        }
    }

    #[test]
    fn manual_is_admitted_for_any_branch() {
        for branch in ["develop", "main", "anything", ""] {
            let admission = evaluate(&policy(&["develop"]), &TriggerEvent::manual(branch, "bob"));
            assert!(admission.is_admitted(), "branch {branch:?}");
        }
    }

    #[test]
    fn manual_is_admitted_with_empty_allow_list() {
        let admission = evaluate(&policy(&[]), &TriggerEvent::manual("main", "bob"));
        assert!(admission.is_admitted());
    }

    #[test]
    fn strict_policy_filters_manual_dispatch() {
        let mut strict = policy(&["develop"]);
        strict.manual_requires_allowed_branch = true;
        assert!(evaluate(&strict, &TriggerEvent::manual("develop", "bob")).is_admitted());
        assert_eq!(
            evaluate(&strict, &TriggerEvent::manual("main", "bob")),
            Admission::Rejected(Rejection::BranchNotAllowed {
                branch: "main".to_string()
            })
        );
    }

    #[test]
    fn unsupported_event_is_rejected_even_on_allowed_branch() {
        let event = TriggerEvent {
            kind: EventKind::from_github("pull_request"),
            branch: "develop".to_string(),
            actor: "carol".to_string(),
            commit: None,
        };
        assert_eq!(
            evaluate(&policy(&["develop"]), &event),
            Admission::Rejected(Rejection::UnsupportedEvent {
                name: "pull_request".to_string()
            })
        );
    }

    #[test]
    fn github_event_names_map_to_kinds() {
        assert_eq!(EventKind::from_github("push"), EventKind::Push);
        assert_eq!(EventKind::from_github("workflow_dispatch"), EventKind::Manual);
        assert_eq!(
            EventKind::from_github("schedule"),
            EventKind::Other("schedule".to_string())
        );
    }

    #[test]
    fn branch_from_ref_strips_heads_prefix_only() {
        assert_eq!(branch_from_ref("refs/heads/develop"), "develop");
        assert_eq!(branch_from_ref("refs/heads/feature/a"), "feature/a");
        assert_eq!(branch_from_ref("develop"), "develop");
        assert_eq!(branch_from_ref("refs/tags/v1.0"), "refs/tags/v1.0");
    }
}
