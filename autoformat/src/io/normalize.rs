//! Normalization: formatter, then linter auto-fix, against the working tree.
//!
//! The [`Normalizer`] trait decouples the controller from real tool
//! processes. Tests use scripted normalizers that edit files directly.

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{NormalizeReport, StepReport};
use crate::io::config::{PipelineConfig, ToolConfig};
use crate::io::process::{command_from_argv, run_command_with_timeout};
use crate::io::provision::Workspace;

/// A tool process failed to run to completion.
///
/// Reported diagnostics are not failures; only crashes are.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("{step} could not be started: {reason}")]
    Spawn { step: String, reason: String },

    #[error("{step} timed out after {timeout_secs}s")]
    Timeout { step: String, timeout_secs: u64 },

    #[error("{step} crashed with {status}: {stderr_tail}")]
    Crash {
        step: String,
        /// Exit code, or `signal` when the process was killed.
        status: String,
        stderr_tail: String,
    },
}

impl NormalizeError {
    pub fn step(&self) -> &str {
        match self {
            NormalizeError::Spawn { step, .. }
            | NormalizeError::Timeout { step, .. }
            | NormalizeError::Crash { step, .. } => step,
        }
    }
}

/// Rewrites the working tree into canonical form.
pub trait Normalizer {
    fn normalize(&self, workspace: &Workspace) -> Result<NormalizeReport, NormalizeError>;
}

/// One named tool invocation.
#[derive(Debug, Clone)]
pub struct ToolStep {
    pub name: String,
    pub tool: ToolConfig,
}

/// Runs the configured formatter followed by the linter in auto-fix mode.
#[derive(Debug, Clone)]
pub struct ToolchainNormalizer {
    steps: Vec<ToolStep>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl ToolchainNormalizer {
    pub fn from_config(cfg: &PipelineConfig) -> Self {
        Self {
            // Formatting first so lint fixes apply to canonical code.
            steps: vec![
                ToolStep {
                    name: "formatter".to_string(),
                    tool: cfg.formatter.clone(),
                },
                ToolStep {
                    name: "linter".to_string(),
                    tool: cfg.linter.clone(),
                },
            ],
            timeout: cfg.step_timeout(),
            output_limit_bytes: cfg.output_limit_bytes,
        }
    }

    pub fn steps(&self) -> &[ToolStep] {
        &self.steps
    }

    #[instrument(skip_all, fields(step = %step.name))]
    fn run_step(&self, step: &ToolStep, workspace: &Workspace) -> Result<StepReport, NormalizeError> {
        if !step.tool.enabled {
            info!("step disabled, skipping");
            return Ok(StepReport {
                name: step.name.clone(),
                exit_code: None,
                duration_ms: 0,
                skipped: true,
            });
        }

        let spawn_err = |err: anyhow::Error| NormalizeError::Spawn {
            step: step.name.clone(),
            reason: format!("{err:#}"),
        };
        let cmd = command_from_argv(&step.tool.command, &workspace.root).map_err(spawn_err)?;
        info!(command = %step.tool.command.join(" "), "running step");
        let output =
            run_command_with_timeout(cmd, self.timeout, self.output_limit_bytes).map_err(spawn_err)?;

        if output.timed_out {
            return Err(NormalizeError::Timeout {
                step: step.name.clone(),
                timeout_secs: self.timeout.as_secs(),
            });
        }
        let Some(code) = output.status.code() else {
            return Err(NormalizeError::Crash {
                step: step.name.clone(),
                status: "signal".to_string(),
                stderr_tail: output.stderr_tail(20),
            });
        };
        if !step.tool.tolerated_exit_codes.contains(&code) {
            warn!(exit_code = code, "step exited with untolerated code");
            return Err(NormalizeError::Crash {
                step: step.name.clone(),
                status: format!("exit code {code}"),
                stderr_tail: output.stderr_tail(20),
            });
        }
        if code != 0 {
            debug!(exit_code = code, "step reported diagnostics");
        }

        Ok(StepReport {
            name: step.name.clone(),
            exit_code: Some(code),
            duration_ms: u64::try_from(output.elapsed.as_millis()).unwrap_or(u64::MAX),
            skipped: false,
        })
    }
}

impl Normalizer for ToolchainNormalizer {
    fn normalize(&self, workspace: &Workspace) -> Result<NormalizeReport, NormalizeError> {
        let mut report = NormalizeReport::default();
        for step in &self.steps {
            report.steps.push(self.run_step(step, workspace)?);
        }
        Ok(report)
    }
}
