//! Test-only helpers: scripted collaborators and throwaway git repositories.

use std::cell::RefCell;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::rc::Rc;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::trigger::TriggerEvent;
use crate::core::types::{BotIdentity, NormalizeReport, PublishOutcome, StepReport};
use crate::io::config::PipelineConfig;
use crate::io::git::Git;
use crate::io::normalize::{NormalizeError, Normalizer, ToolchainNormalizer};
use crate::io::provision::{LocalProvisioner, Provisioner, Workspace};
use crate::io::publish::{GitPublisher, PublishError, Publisher};
use crate::pipeline::Controller;

pub const TEST_BRANCH: &str = "develop";
pub const HUMAN_NAME: &str = "Push Author";
pub const HUMAN_EMAIL: &str = "author@example.com";

#[derive(Debug, Default)]
struct LogInner {
    calls: Vec<&'static str>,
    published_with: Vec<(String, String)>,
}

/// Shared record of collaborator calls, in order.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    inner: Rc<RefCell<LogInner>>,
}

impl CallLog {
    pub fn calls(&self) -> Vec<&'static str> {
        self.inner.borrow().calls.clone()
    }

    /// `(identity signature, message)` pairs seen by the publisher.
    pub fn published_with(&self) -> Vec<(String, String)> {
        self.inner.borrow().published_with.clone()
    }

    fn record(&self, call: &'static str) {
        self.inner.borrow_mut().calls.push(call);
    }
}

/// Provisioner returning an unmanaged workspace, or a scripted error.
pub struct ScriptedProvisioner {
    log: CallLog,
    error: Option<String>,
}

impl ScriptedProvisioner {
    pub fn ok(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            error: None,
        }
    }

    pub fn failing(log: &CallLog, message: &str) -> Self {
        Self {
            log: log.clone(),
            error: Some(message.to_string()),
        }
    }
}

impl Provisioner for ScriptedProvisioner {
    fn provision(&self, event: &TriggerEvent) -> Result<Workspace> {
        self.log.record("provision");
        if let Some(message) = &self.error {
            return Err(anyhow!(message.clone()));
        }
        Ok(Workspace {
            root: PathBuf::from("."),
            branch: event.branch.clone(),
            base_revision: "base".to_string(),
            warm_cache: false,
            lock: None,
        })
    }
}

/// Normalizer that succeeds without touching files, or crashes a named step.
pub struct ScriptedNormalizer {
    log: CallLog,
    crash_step: Option<String>,
}

impl ScriptedNormalizer {
    pub fn ok(log: &CallLog) -> Self {
        Self {
            log: log.clone(),
            crash_step: None,
        }
    }

    pub fn crashing(log: &CallLog, step: &str) -> Self {
        Self {
            log: log.clone(),
            crash_step: Some(step.to_string()),
        }
    }
}

impl Normalizer for ScriptedNormalizer {
    fn normalize(&self, _workspace: &Workspace) -> Result<NormalizeReport, NormalizeError> {
        self.log.record("normalize");
        if let Some(step) = &self.crash_step {
            return Err(NormalizeError::Crash {
                step: step.clone(),
                status: "exit code 101".to_string(),
                stderr_tail: "thread 'main' panicked".to_string(),
            });
        }
        Ok(NormalizeReport {
            steps: vec![StepReport {
                name: "formatter".to_string(),
                exit_code: Some(0),
                duration_ms: 0,
                skipped: false,
            }],
        })
    }
}

/// Publisher returning a single scripted result.
pub struct ScriptedPublisher {
    log: CallLog,
    result: RefCell<Option<Result<PublishOutcome, PublishError>>>,
}

impl ScriptedPublisher {
    pub fn returning(log: &CallLog, result: Result<PublishOutcome, PublishError>) -> Self {
        Self {
            log: log.clone(),
            result: RefCell::new(Some(result)),
        }
    }
}

impl Publisher for ScriptedPublisher {
    fn publish(
        &self,
        _workspace: &Workspace,
        identity: &BotIdentity,
        message: &str,
    ) -> Result<PublishOutcome, PublishError> {
        self.log.record("publish");
        self.log
            .inner
            .borrow_mut()
            .published_with
            .push((identity.signature(), message.to_string()));
        self.result
            .borrow_mut()
            .take()
            .unwrap_or_else(|| Err(PublishError::Git(anyhow!("scripted publisher exhausted"))))
    }
}

/// Bare `origin` plus a working clone on [`TEST_BRANCH`] with one commit.
pub struct TestRepo {
    temp: TempDir,
    work: PathBuf,
    remote: PathBuf,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        let remote = temp.path().join("origin.git");
        let work = temp.path().join("work");

        run_git(temp.path(), &["init", "--quiet", "--bare", "-b", TEST_BRANCH, "origin.git"])?;
        run_git(temp.path(), &["init", "--quiet", "-b", TEST_BRANCH, "work"])?;
        configure_clone(&work)?;
        let remote_str = remote.to_string_lossy().to_string();
        run_git(&work, &["remote", "add", "origin", &remote_str])?;

        let repo = Self { temp, work, remote };
        repo.write("README.md", "# fixture\n")?;
        repo.commit_all("initial commit")?;
        run_git(&repo.work, &["push", "--quiet", "-u", "origin", TEST_BRANCH])?;
        Ok(repo)
    }

    pub fn root(&self) -> &Path {
        &self.work
    }

    pub fn remote(&self) -> &Path {
        &self.remote
    }

    pub fn git(&self) -> Git {
        Git::new(&self.work)
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        write_file(&self.work, rel, contents)
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        let path = self.work.join(rel);
        fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))
    }

    /// Stage everything and commit as the human author; returns the commit id.
    pub fn commit_all(&self, message: &str) -> Result<String> {
        commit_all_in(&self.work, message)
    }

    /// Commit everything and push to origin.
    pub fn commit_and_push(&self, message: &str) -> Result<String> {
        let sha = self.commit_all(message)?;
        run_git(&self.work, &["push", "--quiet", "origin", TEST_BRANCH])?;
        Ok(sha)
    }

    /// Clone origin into a sibling directory (a second, independent runner).
    pub fn clone_as(&self, name: &str) -> Result<PathBuf> {
        let dest = self.temp.path().join(name);
        let remote = self.remote.to_string_lossy().to_string();
        let dest_str = dest.to_string_lossy().to_string();
        run_git(
            self.temp.path(),
            &["clone", "--quiet", "-b", TEST_BRANCH, &remote, &dest_str],
        )?;
        configure_clone(&dest)?;
        Ok(dest)
    }

    /// Current commit of `TEST_BRANCH` on origin.
    pub fn remote_head(&self) -> Result<String> {
        let target = format!("refs/heads/{TEST_BRANCH}");
        Ok(run_git(&self.remote, &["rev-parse", &target])?.trim().to_string())
    }

    /// Number of commits reachable from origin's `TEST_BRANCH`.
    pub fn remote_commit_count(&self) -> Result<usize> {
        let target = format!("refs/heads/{TEST_BRANCH}");
        let out = run_git(&self.remote, &["rev-list", "--count", &target])?;
        out.trim().parse().context("parse commit count")
    }

    /// `(author name, author email, committer name, committer email, subject)` of a commit.
    pub fn commit_meta(&self, rev: &str) -> Result<(String, String, String, String, String)> {
        let out = run_git(
            &self.remote,
            &["log", "-1", "--format=%an%x00%ae%x00%cn%x00%ce%x00%s", rev],
        )?;
        let parts: Vec<&str> = out.trim_end().split('\0').collect();
        if parts.len() != 5 {
            return Err(anyhow!("unexpected log output: {out:?}"));
        }
        Ok((
            parts[0].to_string(),
            parts[1].to_string(),
            parts[2].to_string(),
            parts[3].to_string(),
            parts[4].to_string(),
        ))
    }

    /// Contents of `rel` at origin's `TEST_BRANCH`.
    pub fn remote_file(&self, rel: &str) -> Result<String> {
        let spec = format!("refs/heads/{TEST_BRANCH}:{rel}");
        run_git(&self.remote, &["show", &spec])
    }

    /// Parent commit id of `rev` on origin.
    pub fn remote_parent(&self, rev: &str) -> Result<String> {
        let spec = format!("{rev}^");
        Ok(run_git(&self.remote, &["rev-parse", &spec])?.trim().to_string())
    }
}

/// Write `contents` to `root/rel`, creating parent directories.
pub fn write_file(root: &Path, rel: &str, contents: &str) -> Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    fs::write(&path, contents).with_context(|| format!("write {}", path.display()))
}

/// Stage everything in `root` and commit as the human author.
pub fn commit_all_in(root: &Path, message: &str) -> Result<String> {
    run_git(root, &["add", "-A"])?;
    run_git(root, &["commit", "--quiet", "-m", message])?;
    Ok(run_git(root, &["rev-parse", "HEAD"])?.trim().to_string())
}

/// Run git in `dir`, returning stdout or an error with stderr.
pub fn run_git(dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        return Err(anyhow!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn configure_clone(dir: &Path) -> Result<()> {
    run_git(dir, &["config", "user.name", HUMAN_NAME])?;
    run_git(dir, &["config", "user.email", HUMAN_EMAIL])?;
    run_git(dir, &["config", "commit.gpgsign", "false"])?;
    Ok(())
}

/// Shell command (`sh -c`) as a tool argv.
pub fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

/// Formatter that strips trailing whitespace from every tracked or new `.txt` file.
pub fn trailing_whitespace_formatter() -> Vec<String> {
    sh(r#"for f in *.txt; do [ -f "$f" ] || continue; sed -e 's/[[:space:]]*$//' "$f" > "$f.tmp" && mv "$f.tmp" "$f"; done"#)
}

/// Config with the whitespace formatter, a no-op linter and no toolchain probes.
pub fn local_test_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.formatter.command = trailing_whitespace_formatter();
    cfg.linter.command = sh("true");
    cfg.toolchain.probes = Vec::new();
    cfg.step_timeout_secs = 60;
    cfg
}

/// Controller wired to the real local collaborators for `root`.
pub fn local_controller(
    root: &Path,
    cfg: PipelineConfig,
) -> Controller<LocalProvisioner, ToolchainNormalizer, GitPublisher> {
    let provisioner = LocalProvisioner::new(root, cfg.toolchain.clone(), cfg.step_timeout());
    let normalizer = ToolchainNormalizer::from_config(&cfg);
    let publisher = GitPublisher::new(cfg.remote.clone());
    Controller::new(cfg, provisioner, normalizer, publisher)
}

/// Unmanaged workspace over `root` at its current HEAD.
pub fn workspace_at(root: &Path) -> Result<Workspace> {
    let git = Git::new(root);
    Ok(Workspace {
        root: root.to_path_buf(),
        branch: git.current_branch()?,
        base_revision: git.head_sha()?,
        warm_cache: false,
        lock: None,
    })
}
