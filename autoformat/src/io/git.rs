//! Git adapter for the pipeline.
//!
//! Change detection, bot-attributed commits and compare-and-swap pushes all go
//! through a small, explicit wrapper around `git` subprocess calls.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, instrument, warn};

use crate::core::types::BotIdentity;

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Result of a push attempt that git completed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushResult {
    Accepted,
    /// The remote ref moved away from the expected base (non-fast-forward
    /// or stale lease).
    Rejected { detail: String },
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True if `workdir` is inside a git work tree.
    pub fn is_work_tree(&self) -> Result<bool> {
        let out = self.run(&["rev-parse", "--is-inside-work-tree"])?;
        Ok(out.status.success() && String::from_utf8_lossy(&out.stdout).trim() == "true")
    }

    /// Absolute path of the repository's git directory.
    pub fn git_dir(&self) -> Result<PathBuf> {
        let out = self.run_capture(&["rev-parse", "--absolute-git-dir"])?;
        Ok(PathBuf::from(out.trim()))
    }

    /// Return the current branch name (errors on detached HEAD).
    #[instrument(skip_all)]
    pub fn current_branch(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "--abbrev-ref", "HEAD"])?;
        let name = out.trim().to_string();
        if name == "HEAD" {
            warn!("detached HEAD detected");
            return Err(anyhow!("detached HEAD (cannot publish to a branch)"));
        }
        debug!(branch = %name, "current branch");
        Ok(name)
    }

    /// Return the full HEAD commit id.
    pub fn head_sha(&self) -> Result<String> {
        let out = self.run_capture(&["rev-parse", "HEAD"])?;
        Ok(out.trim().to_string())
    }

    /// Resolve any revision to a full commit id.
    pub fn rev_parse(&self, rev: &str) -> Result<String> {
        let spec = format!("{rev}^{{commit}}");
        let out = self.run_capture(&["rev-parse", "--verify", "--quiet", &spec])?;
        Ok(out.trim().to_string())
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Stage all changes, including deletions and new files (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Paths staged for commit, relative to the repository root.
    pub fn staged_paths(&self) -> Result<Vec<String>> {
        let out = self.run_capture(&["diff", "--cached", "--name-only"])?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Unstage everything, keeping working tree contents.
    pub fn reset_index(&self) -> Result<()> {
        self.run_checked(&["reset", "--quiet", "--mixed"])?;
        Ok(())
    }

    /// Commit staged changes with `identity` as both author and committer.
    ///
    /// Returns the new commit id.
    #[instrument(skip_all, fields(author = %identity.signature()))]
    pub fn commit_as(&self, identity: &BotIdentity, message: &str) -> Result<String> {
        debug!("committing staged changes");
        let args = [
            "-c",
            "commit.gpgsign=false",
            "commit",
            "--quiet",
            "--no-verify",
            "-m",
            message,
        ];
        let output = self
            .command(&args)
            .env("GIT_AUTHOR_NAME", &identity.name)
            .env("GIT_AUTHOR_EMAIL", &identity.email)
            .env("GIT_COMMITTER_NAME", &identity.name)
            .env("GIT_COMMITTER_EMAIL", &identity.email)
            .output()
            .context("spawn git commit")?;
        ensure_success(&args, &output)?;
        self.head_sha()
    }

    /// Push `HEAD` to `refs/heads/<branch>` only if the remote ref still
    /// points at `expected_base`.
    #[instrument(skip_all, fields(%remote, %branch, %expected_base))]
    pub fn push_if_unchanged(
        &self,
        remote: &str,
        branch: &str,
        expected_base: &str,
    ) -> Result<PushResult> {
        let target = format!("refs/heads/{branch}");
        let lease = format!("--force-with-lease={target}:{expected_base}");
        let refspec = format!("HEAD:{target}");
        let args = ["push", "--porcelain", &lease, remote, &refspec];
        let output = self.run(&args)?;
        if output.status.success() {
            debug!("push accepted");
            return Ok(PushResult::Accepted);
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        if let Some(detail) = rejected_ref_summary(&stdout) {
            warn!(%detail, "push rejected");
            return Ok(PushResult::Rejected { detail });
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()))
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        ensure_success(args, &output)?;
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        self.command(args)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }

    fn command(&self, args: &[&str]) -> Command {
        let mut cmd = Command::new("git");
        cmd.args(args).current_dir(&self.workdir);
        cmd
    }
}

fn ensure_success(args: &[&str], output: &Output) -> Result<()> {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(anyhow!("git {} failed: {}", args.join(" "), stderr.trim()));
    }
    Ok(())
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}

/// Find a ref the remote refused because it moved (`!` flag, `[rejected]`).
///
/// `[remote rejected]` (hooks, protection rules) is not a race and is not
/// reported here.
fn rejected_ref_summary(porcelain: &str) -> Option<String> {
    porcelain.lines().find_map(|line| {
        let mut fields = line.split('\t');
        let flag = fields.next()?;
        if flag != "!" {
            return None;
        }
        let refs = fields.next()?.trim();
        let summary = fields.next()?.trim();
        summary
            .starts_with("[rejected]")
            .then(|| format!("{refs} {summary}"))
    })
}
