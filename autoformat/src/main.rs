//! `autoformat` CLI.
//!
//! Formats the working tree, applies linter auto-fixes and pushes the result
//! back as one bot commit when a push to an allowed branch (or a manual
//! dispatch) admits a run.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::debug;

use autoformat::core::trigger::{Admission, EventKind, TriggerEvent, branch_from_ref, evaluate};
use autoformat::exit_codes;
use autoformat::io::config::{CONFIG_FILE_NAME, PipelineConfig, load_config, write_config};
use autoformat::io::git::Git;
use autoformat::io::normalize::ToolchainNormalizer;
use autoformat::io::provision::LocalProvisioner;
use autoformat::io::publish::GitPublisher;
use autoformat::logging;
use autoformat::pipeline::Controller;
use autoformat::report::RunReport;

#[derive(Parser)]
#[command(
    name = "autoformat",
    version,
    about = "Format, auto-fix and publish a working tree back to its branch"
)]
struct Cli {
    /// Working tree to normalize.
    #[arg(long, global = true, default_value = ".")]
    workdir: PathBuf,

    /// Config file (defaults to `<workdir>/.autoformat.toml`).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the run report as JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the pipeline for an explicit event.
    Run(EventArgs),
    /// Run the pipeline for the GitHub Actions event in the environment.
    Ci(CiArgs),
    /// Evaluate an event against the trigger filters without running anything.
    CheckTrigger(EventArgs),
    /// Write the default config file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EventArg {
    Push,
    Manual,
}

#[derive(Args)]
struct EventArgs {
    #[arg(long, value_enum)]
    event: EventArg,
    /// Branch the event refers to (defaults to the checked-out branch).
    #[arg(long)]
    branch: Option<String>,
    #[arg(long, default_value = "unknown")]
    actor: String,
    /// Commit the working tree must be at.
    #[arg(long)]
    commit: Option<String>,
}

#[derive(Args)]
struct CiArgs {
    #[arg(long, env = "GITHUB_EVENT_NAME")]
    event_name: String,
    #[arg(long = "ref", env = "GITHUB_REF")]
    git_ref: String,
    #[arg(long, env = "GITHUB_ACTOR", default_value = "unknown")]
    actor: String,
    #[arg(long, env = "GITHUB_SHA")]
    sha: Option<String>,
    /// Step output file; receives `outcome=` and `commit=` lines.
    #[arg(long, env = "GITHUB_OUTPUT")]
    github_output: Option<PathBuf>,
}

fn main() {
    logging::init();
    let code = match run() {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{:#}", err);
            exit_codes::INVALID
        }
    };
    std::process::exit(code);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.workdir.join(CONFIG_FILE_NAME));
    match cli.command {
        Command::Run(ref args) => {
            let event = event_from_args(&cli.workdir, args)?;
            let cfg = load_config(&config_path)?;
            let report = run_pipeline(&cli.workdir, cfg, &event);
            emit(&report, cli.json)?;
            Ok(report.exit_code())
        }
        Command::Ci(ref args) => {
            let event = event_from_ci(args);
            let cfg = load_config(&config_path)?;
            let report = run_pipeline(&cli.workdir, cfg, &event);
            emit(&report, cli.json)?;
            if let Some(path) = &args.github_output {
                append_github_output(path, &report)?;
            }
            Ok(report.exit_code())
        }
        Command::CheckTrigger(ref args) => {
            let event = event_from_args(&cli.workdir, args)?;
            let cfg = load_config(&config_path)?;
            cmd_check_trigger(&cfg, &event, cli.json)
        }
        Command::InitConfig { force } => cmd_init_config(&config_path, force),
    }
}

fn run_pipeline(workdir: &Path, cfg: PipelineConfig, event: &TriggerEvent) -> RunReport {
    let provisioner = LocalProvisioner::new(workdir, cfg.toolchain.clone(), cfg.step_timeout());
    let normalizer = ToolchainNormalizer::from_config(&cfg);
    let publisher = GitPublisher::new(cfg.remote.clone());
    let controller = Controller::new(cfg, provisioner, normalizer, publisher);
    let result = controller.run(event);
    RunReport::new(event, &result)
}

fn cmd_check_trigger(cfg: &PipelineConfig, event: &TriggerEvent, json: bool) -> Result<i32> {
    let admission = evaluate(&cfg.trigger_policy(), event);
    let (label, code) = match &admission {
        Admission::Admitted => ("admitted".to_string(), exit_codes::OK),
        Admission::Rejected(rejection) => (format!("rejected: {rejection}"), exit_codes::FILTERED),
    };
    if json {
        let value = serde_json::json!({
            "admitted": admission.is_admitted(),
            "event": event,
        });
        println!("{}", serde_json::to_string_pretty(&value).context("serialize decision")?);
    } else {
        println!("{label}");
    }
    Ok(code)
}

fn cmd_init_config(path: &Path, force: bool) -> Result<i32> {
    if path.exists() && !force {
        println!("{} already exists (use --force to overwrite)", path.display());
        return Ok(exit_codes::OK);
    }
    write_config(path, &PipelineConfig::default())?;
    println!("wrote {}", path.display());
    Ok(exit_codes::OK)
}

fn event_from_args(workdir: &Path, args: &EventArgs) -> Result<TriggerEvent> {
    let branch = match &args.branch {
        Some(branch) => branch.clone(),
        None => Git::new(workdir)
            .current_branch()
            .context("determine event branch (pass --branch)")?,
    };
    let kind = match args.event {
        EventArg::Push => EventKind::Push,
        EventArg::Manual => EventKind::Manual,
    };
    Ok(TriggerEvent {
        kind,
        branch,
        actor: args.actor.clone(),
        commit: args.commit.clone(),
    })
}

fn event_from_ci(args: &CiArgs) -> TriggerEvent {
    let event = TriggerEvent {
        kind: EventKind::from_github(&args.event_name),
        branch: branch_from_ref(&args.git_ref).to_string(),
        actor: args.actor.clone(),
        commit: args.sha.clone().filter(|sha| !sha.trim().is_empty()),
    };
    debug!(?event, "event from environment");
    event
}

fn emit(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(report).context("serialize run report")?
        );
    } else {
        println!("{}", report.summary());
    }
    Ok(())
}

fn append_github_output(path: &Path, report: &RunReport) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("open {}", path.display()))?;
    file.write_all(report.github_output().as_bytes())
        .with_context(|| format!("write {}", path.display()))?;
    Ok(())
}
