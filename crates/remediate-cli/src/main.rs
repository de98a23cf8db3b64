//! Remediate - gated change application CLI
//!
//! The `remediate` command applies approved change units to a repository,
//! one at a time, keeping only those the test suite accepts.
//!
//! ## Commands
//!
//! - `run`: baseline, assess, propose, approve, execute, validate
//! - `baseline`: check the tree is clean and the suite passes
//! - `log`: show the execution log of a run
//! - `report`: show the verified report of a run
//! - `reconstruct`: rebuild the workspace content after part of a run

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn, Level};

use remediate_core::{
    manifest_at, materialize, open_workspace, read_report, Assessor, Baseline, CancelHandle,
    CollaboratorCommand, CommandAssessor, CommandOracle, CommandProposer, ConsoleDecisions,
    DecisionSource, ExecutionLog, FsCasStore, JsonFindingsAssessor, JsonProposer, OracleConfig,
    Orchestrator, OutputFormat, Proposer, RemediateConfig, StaticDecisions, VersionControl,
    WorkspaceGuard, DEFAULT_COLLABORATOR_TIMEOUT_SECS,
};

#[derive(Parser)]
#[command(name = "remediate")]
#[command(version = remediate_core::VERSION)]
#[command(about = "Apply approved remediation changes behind a test oracle", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Repository to operate on
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// Configuration file (default: <repo>/remediate.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug, Default)]
struct OracleArgs {
    /// Test command, split on whitespace (overrides [oracle].command)
    #[arg(long, env = "REMEDIATE_TEST_CMD")]
    test_cmd: Option<String>,

    /// Oracle timeout in seconds (overrides [oracle].timeout_secs)
    #[arg(long, env = "REMEDIATE_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Output format: auto, json, libtest, pytest or exit_code
    #[arg(long)]
    test_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full remediation workflow
    Run {
        #[command(flatten)]
        oracle: OracleArgs,

        /// Findings JSON file
        #[arg(long, conflicts_with = "assessor_cmd")]
        findings: Option<PathBuf>,

        /// External assessor command, split on whitespace
        #[arg(long)]
        assessor_cmd: Option<String>,

        /// Proposal JSON file
        #[arg(long, conflicts_with = "proposer_cmd")]
        proposal: Option<PathBuf>,

        /// External proposer command, split on whitespace
        #[arg(long)]
        proposer_cmd: Option<String>,

        /// Decisions JSON file mapping unit id to approved/rejected/deferred
        #[arg(long, conflicts_with = "interactive")]
        decisions: Option<PathBuf>,

        /// Ask for each decision on the terminal
        #[arg(long)]
        interactive: bool,
    },

    /// Establish and print the baseline without changing anything
    Baseline {
        #[command(flatten)]
        oracle: OracleArgs,
    },

    /// Show the execution log of a run
    Log {
        /// Run ID
        run_id: String,
    },

    /// Show the persisted report of a run
    Report {
        /// Run ID
        run_id: String,

        /// Print the JSON report instead of markdown
        #[arg(long)]
        raw: bool,
    },

    /// Write the workspace content after the first N log entries of a run
    Reconstruct {
        /// Run ID
        run_id: String,

        /// Number of log entries to replay (default: all)
        #[arg(long)]
        upto: Option<u64>,

        /// Output directory
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    remediate_core::init_tracing(cli.json, level);

    let config = match &cli.config {
        Some(path) => RemediateConfig::load(path)?,
        None => RemediateConfig::load_or_default(&cli.repo)?,
    };
    let vcs: Arc<dyn VersionControl> = Arc::from(
        open_workspace(&cli.repo, config.state_dir_in(&cli.repo).as_deref())
            .with_context(|| format!("Failed to open workspace at {:?}", cli.repo))?,
    );

    match cli.command {
        Commands::Run {
            oracle,
            findings,
            assessor_cmd,
            proposal,
            proposer_cmd,
            decisions,
            interactive,
        } => {
            let assessor = build_assessor(&config, findings, assessor_cmd)?;
            let proposer = build_proposer(&config, vcs.root(), proposal, proposer_cmd)?;
            let decisions = build_decisions(decisions, interactive)?;
            cmd_run(vcs, &config, &oracle, assessor, proposer, decisions).await
        }
        Commands::Baseline { oracle } => cmd_baseline(vcs.as_ref(), &config, &oracle).await,
        Commands::Log { run_id } => cmd_log(vcs.state_dir(), &run_id),
        Commands::Report { run_id, raw } => cmd_report(vcs.state_dir(), &run_id, raw),
        Commands::Reconstruct {
            run_id,
            upto,
            output,
        } => cmd_reconstruct(vcs.state_dir(), &run_id, upto, &output),
    }
}

fn oracle_config(config: &RemediateConfig, args: &OracleArgs) -> Result<OracleConfig> {
    let mut oracle = config.oracle.clone();
    if let Some(cmd) = &args.test_cmd {
        oracle.command = split_command(cmd);
    }
    if let Some(secs) = args.timeout_secs {
        oracle.timeout_secs = secs;
    }
    if let Some(format) = &args.test_format {
        oracle.format = parse_format(format)?;
    }
    if oracle.command.is_empty() {
        anyhow::bail!("No test command configured: set [oracle].command or pass --test-cmd");
    }
    Ok(oracle)
}

fn parse_format(s: &str) -> Result<OutputFormat> {
    serde_json::from_value(serde_json::Value::String(s.to_string()))
        .with_context(|| format!("Unknown test output format: {}", s))
}

fn split_command(s: &str) -> Vec<String> {
    s.split_whitespace().map(str::to_string).collect()
}

/// Command-line command replaces the configured one; the configured
/// timeout still applies.
fn collaborator(
    configured: Option<&CollaboratorCommand>,
    cmd: Option<String>,
) -> Option<CollaboratorCommand> {
    match (configured, cmd) {
        (Some(configured), Some(cmd)) => Some(CollaboratorCommand {
            command: split_command(&cmd),
            timeout_secs: configured.timeout_secs,
        }),
        (None, Some(cmd)) => Some(CollaboratorCommand {
            command: split_command(&cmd),
            timeout_secs: DEFAULT_COLLABORATOR_TIMEOUT_SECS,
        }),
        (configured, None) => configured.cloned(),
    }
}

fn build_assessor(
    config: &RemediateConfig,
    findings: Option<PathBuf>,
    cmd: Option<String>,
) -> Result<Arc<dyn Assessor>> {
    if let Some(path) = findings {
        return Ok(Arc::new(JsonFindingsAssessor::new(path)));
    }
    let command = collaborator(config.assessor.as_ref(), cmd)
        .context("No assessor: pass --findings, --assessor-cmd or configure [assessor]")?;
    Ok(Arc::new(CommandAssessor::new(command)))
}

fn build_proposer(
    config: &RemediateConfig,
    root: &Path,
    proposal: Option<PathBuf>,
    cmd: Option<String>,
) -> Result<Arc<dyn Proposer>> {
    if let Some(path) = proposal {
        return Ok(Arc::new(JsonProposer::new(path)));
    }
    let command = collaborator(config.proposer.as_ref(), cmd)
        .context("No proposer: pass --proposal, --proposer-cmd or configure [proposer]")?;
    Ok(Arc::new(CommandProposer::new(command, root)))
}

fn build_decisions(file: Option<PathBuf>, interactive: bool) -> Result<Box<dyn DecisionSource>> {
    if interactive {
        return Ok(Box::new(ConsoleDecisions::new()));
    }
    match file {
        Some(path) => Ok(Box::new(
            StaticDecisions::from_file(&path)
                .with_context(|| format!("Failed to read decisions from {:?}", path))?,
        )),
        None => {
            warn!("No decisions given; every unit will be treated as rejected");
            Ok(Box::new(StaticDecisions::default()))
        }
    }
}

async fn cmd_run(
    vcs: Arc<dyn VersionControl>,
    config: &RemediateConfig,
    oracle_args: &OracleArgs,
    assessor: Arc<dyn Assessor>,
    proposer: Arc<dyn Proposer>,
    decisions: Box<dyn DecisionSource>,
) -> Result<()> {
    let oracle = CommandOracle::new(oracle_config(config, oracle_args)?, vcs.root())?;

    let cancel = CancelHandle::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Cancellation requested; stopping after the current unit");
            on_signal.cancel();
        }
    });

    let state_dir = vcs.state_dir().to_path_buf();
    let orchestrator = Orchestrator::new(vcs, Arc::new(oracle), assessor, proposer, decisions)
        .with_state_dir(&state_dir)
        .with_cancel(cancel)
        .with_commit_prefix(config.commit_prefix.clone());
    info!(run_id = %orchestrator.run_id(), "Starting remediation run");

    let report = orchestrator.run().await.context("Failed to persist run report")?;
    println!("{}", report.render_markdown());

    if let Some(reason) = &report.abort {
        anyhow::bail!("Run {} aborted: {}", report.run_id, reason);
    }
    Ok(())
}

async fn cmd_baseline(
    vcs: &dyn VersionControl,
    config: &RemediateConfig,
    oracle_args: &OracleArgs,
) -> Result<()> {
    let oracle = CommandOracle::new(oracle_config(config, oracle_args)?, vcs.root())?;
    let baseline = WorkspaceGuard::new(vcs)
        .establish_baseline(&oracle)
        .await
        .context("Baseline not established")?;

    println!("Baseline captured at {}", baseline.captured_at);
    println!("Checkpoint: {}", baseline.checkpoint.id);
    println!("Tracked files: {}", baseline.manifest().len());
    println!(
        "Tests: {}/{} passing",
        baseline.test.passed_count(),
        baseline.test.total
    );
    Ok(())
}

fn run_dir(state_dir: &Path, run_id: &str) -> Result<PathBuf> {
    let dir = state_dir.join("runs").join(run_id);
    if !dir.is_dir() {
        anyhow::bail!("Run not found: {:?}", dir);
    }
    Ok(dir)
}

fn cmd_log(state_dir: &Path, run_id: &str) -> Result<()> {
    let path = run_dir(state_dir, run_id)?.join("execution_log.jsonl");
    let entries = ExecutionLog::load(&path)
        .with_context(|| format!("Failed to read execution log {:?}", path))?;

    if entries.is_empty() {
        println!("No units executed in run {}", run_id);
        return Ok(());
    }
    for entry in entries {
        let detail = match (&entry.reason, entry.failing_tests.is_empty()) {
            (Some(reason), true) => format!(" - {}", reason),
            (Some(reason), false) => {
                format!(" - {} [{}]", reason, entry.failing_tests.join(", "))
            }
            (None, _) => String::new(),
        };
        println!(
            "#{} {} {} {}{}",
            entry.seq,
            entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
            entry.unit_id,
            entry.action,
            detail
        );
    }
    Ok(())
}

fn cmd_report(state_dir: &Path, run_id: &str, raw: bool) -> Result<()> {
    let dir = run_dir(state_dir, run_id)?;
    let report = read_report(&dir).with_context(|| format!("Failed to verify report in {:?}", dir))?;
    if raw {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", report.render_markdown());
    }
    Ok(())
}

fn cmd_reconstruct(state_dir: &Path, run_id: &str, upto: Option<u64>, output: &Path) -> Result<()> {
    let dir = run_dir(state_dir, run_id)?;
    let baseline: Baseline = serde_json::from_slice(
        &std::fs::read(dir.join("baseline.json"))
            .with_context(|| format!("No baseline recorded for run {}", run_id))?,
    )?;
    let entries = ExecutionLog::load(&dir.join("execution_log.jsonl"))?;
    let manifest = manifest_at(baseline.manifest(), &entries, upto);

    let blobs = FsCasStore::open(state_dir)?;
    let written = materialize(&blobs, &manifest, output)?;
    println!(
        "Reconstructed {} file(s) from run {} into {:?}",
        written, run_id, output
    );
    Ok(())
}
