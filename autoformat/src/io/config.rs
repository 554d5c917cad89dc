//! Pipeline configuration stored in `.autoformat.toml`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::trigger::TriggerPolicy;
use crate::core::types::BotIdentity;

/// Default config file name, relative to the working tree root.
pub const CONFIG_FILE_NAME: &str = ".autoformat.toml";

/// Pipeline configuration (TOML).
///
/// Declared, never computed: the controller receives one immutable instance
/// at construction. Missing fields default to the values below.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Branches whose pushes admit a run.
    pub allowed_branches: BTreeSet<String>,

    /// Restrict manual dispatch to `allowed_branches` as well.
    pub manual_requires_allowed_branch: bool,

    /// Message of every publish commit.
    pub commit_message: String,

    /// Remote the publisher pushes to.
    pub remote: String,

    /// Wall-clock budget for each tool step and toolchain probe, in seconds.
    pub step_timeout_secs: u64,

    /// Keep at most this many bytes of stdout/stderr per tool step.
    pub output_limit_bytes: usize,

    pub bot_identity: BotIdentity,
    pub formatter: ToolConfig,
    pub linter: ToolConfig,
    pub toolchain: ToolchainConfig,
}

/// A single normalization tool invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolConfig {
    /// Command to execute (first element is the executable).
    pub command: Vec<String>,

    /// Exit codes that mean "ran to completion" (diagnostics allowed).
    #[serde(default = "default_tolerated_exit_codes")]
    pub tolerated_exit_codes: Vec<i32>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_tolerated_exit_codes() -> Vec<i32> {
    vec![0]
}

fn default_enabled() -> bool {
    true
}

impl ToolConfig {
    pub fn new(command: &[&str]) -> Self {
        Self {
            command: command.iter().map(|part| part.to_string()).collect(),
            tolerated_exit_codes: default_tolerated_exit_codes(),
            enabled: true,
        }
    }

    fn validate(&self, label: &str) -> Result<()> {
        if self.command.is_empty() || self.command[0].trim().is_empty() {
            return Err(anyhow!("{label}.command must be a non-empty array"));
        }
        if self.tolerated_exit_codes.is_empty() {
            return Err(anyhow!("{label}.tolerated_exit_codes must not be empty"));
        }
        Ok(())
    }
}

/// Environment expectations checked during provisioning.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Commands that must exit 0 before normalization starts.
    pub probes: Vec<Vec<String>>,

    /// Restored build cache. Absence means a cold run, never a failure.
    pub cache_dir: Option<PathBuf>,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            probes: vec![
                vec!["cargo".into(), "fmt".into(), "--version".into()],
                vec!["cargo".into(), "clippy".into(), "--version".into()],
            ],
            cache_dir: None,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            allowed_branches: BTreeSet::from(["develop".to_string()]),
            manual_requires_allowed_branch: false,
            commit_message: "format by actions".to_string(),
            remote: "origin".to_string(),
            step_timeout_secs: 30 * 60,
            output_limit_bytes: 100_000,
            bot_identity: BotIdentity::default(),
            formatter: ToolConfig::new(&["cargo", "fmt", "--all"]),
            linter: ToolConfig::new(&[
                "cargo",
                "clippy",
                "--fix",
                "--allow-dirty",
                "--allow-staged",
                "--all-targets",
            ]),
            toolchain: ToolchainConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.commit_message.trim().is_empty() {
            return Err(anyhow!("commit_message must not be empty"));
        }
        if self.remote.trim().is_empty() {
            return Err(anyhow!("remote must not be empty"));
        }
        if self.bot_identity.name.trim().is_empty() {
            return Err(anyhow!("bot_identity.name must not be empty"));
        }
        if !self.bot_identity.email.contains('@') {
            return Err(anyhow!(
                "bot_identity.email must be an email address, got '{}'",
                self.bot_identity.email
            ));
        }
        if self.step_timeout_secs == 0 {
            return Err(anyhow!("step_timeout_secs must be > 0"));
        }
        if self.output_limit_bytes == 0 {
            return Err(anyhow!("output_limit_bytes must be > 0"));
        }
        if self.allowed_branches.iter().any(|b| b.trim().is_empty()) {
            return Err(anyhow!("allowed_branches must not contain empty names"));
        }
        self.formatter.validate("formatter")?;
        self.linter.validate("linter")?;
        for (idx, probe) in self.toolchain.probes.iter().enumerate() {
            if probe.is_empty() || probe[0].trim().is_empty() {
                return Err(anyhow!("toolchain.probes[{idx}] must be a non-empty array"));
            }
        }
        Ok(())
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn trigger_policy(&self) -> TriggerPolicy {
        TriggerPolicy {
            allowed_branches: self.allowed_branches.clone(),
            manual_requires_allowed_branch: self.manual_requires_allowed_branch,
        }
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `PipelineConfig::default()`.
pub fn load_config(path: &Path) -> Result<PipelineConfig> {
    if !path.exists() {
        let cfg = PipelineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: PipelineConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("invalid config {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &PipelineConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}

fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("config path missing parent {}", path.display()))?;
    if !parent.as_os_str().is_empty() {
        fs::create_dir_all(parent)
            .with_context(|| format!("create directory {}", parent.display()))?;
    }
    let tmp_path = path.with_extension("toml.tmp");
    fs::write(&tmp_path, contents)
        .with_context(|| format!("write temp config {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace config {}", path.display()))?;
    Ok(())
}
