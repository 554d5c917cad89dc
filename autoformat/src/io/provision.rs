//! Environment provisioning: the precondition for normalization.
//!
//! Checkout, toolchain installation and cache restore are owned by the hosting
//! environment. The [`Provisioner`] trait is the seam the controller consumes;
//! [`LocalProvisioner`] verifies that an already checked-out working tree
//! satisfies it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument};

use crate::core::trigger::TriggerEvent;
use crate::io::config::ToolchainConfig;
use crate::io::git::Git;
use crate::io::lock::WorkspaceLock;
use crate::io::process::{command_from_argv, run_command_with_timeout};

/// Working tree handed to normalization and publishing.
#[derive(Debug)]
pub struct Workspace {
    pub root: PathBuf,
    /// Branch the run publishes to.
    pub branch: String,
    /// Branch HEAD at provisioning time; the push CAS expects this.
    pub base_revision: String,
    /// Whether a restored cache was found.
    pub warm_cache: bool,
    /// Held for the lifetime of the workspace. `None` for unmanaged trees.
    pub lock: Option<WorkspaceLock>,
}

impl Workspace {
    pub fn git(&self) -> Git {
        Git::new(&self.root)
    }
}

/// Supplies a checked-out tree and toolchain for an admitted event.
pub trait Provisioner {
    fn provision(&self, event: &TriggerEvent) -> Result<Workspace>;
}

/// Provisioner for a working tree the host has already checked out.
#[derive(Debug, Clone)]
pub struct LocalProvisioner {
    root: PathBuf,
    toolchain: ToolchainConfig,
    probe_timeout: Duration,
}

impl LocalProvisioner {
    pub fn new(root: impl Into<PathBuf>, toolchain: ToolchainConfig, probe_timeout: Duration) -> Self {
        Self {
            root: root.into(),
            toolchain,
            probe_timeout,
        }
    }

    fn cache_is_warm(&self) -> bool {
        let Some(dir) = &self.toolchain.cache_dir else {
            return false;
        };
        let dir = resolve(&self.root, dir);
        if dir.is_dir() {
            debug!(cache_dir = %dir.display(), "restored cache present");
            true
        } else {
            info!(cache_dir = %dir.display(), "no restored cache, cold run");
            false
        }
    }

    fn probe_toolchain(&self) -> Result<()> {
        for probe in &self.toolchain.probes {
            let label = probe.join(" ");
            let cmd = command_from_argv(probe, &self.root)?;
            let output = run_command_with_timeout(cmd, self.probe_timeout, 16 * 1024)
                .with_context(|| format!("toolchain probe `{label}`"))?;
            if output.timed_out {
                return Err(anyhow!("toolchain probe `{label}` timed out"));
            }
            if !output.status.success() {
                return Err(anyhow!(
                    "toolchain probe `{label}` failed with status {:?}: {}",
                    output.status.code(),
                    output.stderr_tail(5)
                ));
            }
            debug!(probe = %label, "toolchain probe ok");
        }
        Ok(())
    }
}

impl Provisioner for LocalProvisioner {
    #[instrument(skip_all, fields(branch = %event.branch, root = %self.root.display()))]
    fn provision(&self, event: &TriggerEvent) -> Result<Workspace> {
        let git = Git::new(&self.root);
        if !git.is_work_tree()? {
            return Err(anyhow!("{} is not a git working tree", self.root.display()));
        }

        let branch = git.current_branch()?;
        if branch != event.branch {
            return Err(anyhow!(
                "checked out branch '{branch}' does not match event branch '{}'",
                event.branch
            ));
        }

        let head = git.head_sha()?;
        if let Some(expected) = &event.commit {
            let expected_full = git
                .rev_parse(expected)
                .with_context(|| format!("resolve event commit {expected}"))?;
            if expected_full != head {
                return Err(anyhow!(
                    "working tree is at {head}, event references {expected_full}"
                ));
            }
        }

        let lock = WorkspaceLock::acquire(&git.git_dir()?)?;
        self.probe_toolchain()?;
        let warm_cache = self.cache_is_warm();

        info!(base = %head, warm_cache, "workspace provisioned");
        Ok(Workspace {
            root: self.root.clone(),
            branch,
            base_revision: head,
            warm_cache,
            lock: Some(lock),
        })
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
