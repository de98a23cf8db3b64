//! Assessor and Proposer boundaries.
//!
//! Detection heuristics and change drafting live outside this crate. They
//! reach the orchestrator either as JSON files or as external commands that
//! speak JSON on stdout (and, for proposers, read findings on stdin).

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::domain::{ChangeUnit, Finding, RemediateError, Result};
use crate::oracle::command::own_process_group;

/// Produces findings for a repository. Must not modify it.
#[async_trait]
pub trait Assessor: Send + Sync {
    async fn scan(&self, repository: &Path) -> Result<Vec<Finding>>;
}

/// Drafts one change unit, or one deferral, per finding.
#[async_trait]
pub trait Proposer: Send + Sync {
    async fn draft(&self, findings: &[Finding]) -> Result<Proposal>;
}

/// A finding the proposer chose not to address, with its reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deferral {
    pub finding_id: String,
    pub reason: String,
}

/// Proposer output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Proposal {
    #[serde(default)]
    pub units: Vec<ChangeUnit>,
    #[serde(default)]
    pub deferrals: Vec<Deferral>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProposalWire {
    Full(Proposal),
    UnitsOnly(Vec<ChangeUnit>),
}

impl Proposal {
    /// Accepts either a full proposal object or a bare array of units.
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        Ok(match serde_json::from_slice::<ProposalWire>(bytes)? {
            ProposalWire::Full(p) => p,
            ProposalWire::UnitsOnly(units) => Proposal {
                units,
                deferrals: Vec::new(),
            },
        })
    }
}

/// Check that every finding maps to exactly one unit or one deferral, and
/// that unit ids are unique and reference known findings.
pub fn check_coverage(findings: &[Finding], proposal: &Proposal) -> Result<()> {
    let mut seen_units = HashSet::new();
    for unit in &proposal.units {
        if !seen_units.insert(unit.id.as_str()) {
            return Err(RemediateError::DuplicateUnit(unit.id.clone()));
        }
    }

    let known: HashSet<&str> = findings.iter().map(|f| f.id.as_str()).collect();
    let mut coverage: BTreeMap<&str, usize> = findings.iter().map(|f| (f.id.as_str(), 0)).collect();

    for unit in &proposal.units {
        match unit.finding_id.as_deref() {
            Some(id) if known.contains(id) => *coverage.entry(id).or_default() += 1,
            Some(id) => {
                return Err(RemediateError::Collaborator(format!(
                    "change unit {} references unknown finding {id}",
                    unit.id
                )))
            }
            None => {
                return Err(RemediateError::Collaborator(format!(
                    "change unit {} does not reference a finding",
                    unit.id
                )))
            }
        }
    }
    for deferral in &proposal.deferrals {
        if !known.contains(deferral.finding_id.as_str()) {
            return Err(RemediateError::Collaborator(format!(
                "deferral references unknown finding {}",
                deferral.finding_id
            )));
        }
        *coverage.entry(deferral.finding_id.as_str()).or_default() += 1;
    }

    let uncovered: Vec<String> = coverage
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(id, _)| id.to_string())
        .collect();
    let duplicated: Vec<String> = coverage
        .iter()
        .filter(|(_, n)| **n > 1)
        .map(|(id, _)| id.to_string())
        .collect();

    if uncovered.is_empty() && duplicated.is_empty() {
        Ok(())
    } else {
        Err(RemediateError::IncompleteProposal {
            uncovered,
            duplicated,
        })
    }
}

// ---------------------------------------------------------------------------
// File-backed adapters
// ---------------------------------------------------------------------------

/// Reads a JSON array of findings from a file.
#[derive(Debug, Clone)]
pub struct JsonFindingsAssessor {
    path: PathBuf,
}

impl JsonFindingsAssessor {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Assessor for JsonFindingsAssessor {
    async fn scan(&self, _repository: &Path) -> Result<Vec<Finding>> {
        let bytes = tokio::fs::read(&self.path).await?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Reads a proposal (or bare unit array) from a file.
#[derive(Debug, Clone)]
pub struct JsonProposer {
    path: PathBuf,
}

impl JsonProposer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl Proposer for JsonProposer {
    async fn draft(&self, _findings: &[Finding]) -> Result<Proposal> {
        let bytes = tokio::fs::read(&self.path).await?;
        Proposal::from_json(&bytes)
    }
}

// ---------------------------------------------------------------------------
// Process-backed adapters
// ---------------------------------------------------------------------------

/// External collaborator command (`[assessor]` / `[proposer]` in config).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaboratorCommand {
    pub command: Vec<String>,
    #[serde(default = "default_collaborator_timeout")]
    pub timeout_secs: u64,
}

/// Default budget for an assessor or proposer command.
pub const DEFAULT_COLLABORATOR_TIMEOUT_SECS: u64 = 300;

fn default_collaborator_timeout() -> u64 {
    DEFAULT_COLLABORATOR_TIMEOUT_SECS
}

async fn run_json_command(
    cmd: &CollaboratorCommand,
    cwd: &Path,
    stdin: Option<Vec<u8>>,
) -> Result<Vec<u8>> {
    let Some((exe, args)) = cmd.command.split_first() else {
        return Err(RemediateError::Config(
            "collaborator command must not be empty".to_string(),
        ));
    };

    let mut child = own_process_group(
        Command::new(exe)
            .args(args)
            .current_dir(cwd)
            .env("REMEDIATE_REPOSITORY", cwd)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true),
    )
    .spawn()
    .map_err(|e| RemediateError::Collaborator(format!("failed to spawn {exe}: {e}")))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(&input).await?;
        pipe.shutdown().await?;
    }

    let output = tokio::time::timeout(
        Duration::from_secs(cmd.timeout_secs),
        child.wait_with_output(),
    )
    .await
    .map_err(|_| RemediateError::Timeout {
        secs: cmd.timeout_secs,
    })??;

    if !output.status.success() {
        return Err(RemediateError::Collaborator(format!(
            "{exe} exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(output.stdout)
}

/// Runs an external scanner in the repository; stdout is a JSON finding array.
#[derive(Debug, Clone)]
pub struct CommandAssessor {
    cmd: CollaboratorCommand,
}

impl CommandAssessor {
    pub fn new(cmd: CollaboratorCommand) -> Self {
        Self { cmd }
    }
}

#[async_trait]
impl Assessor for CommandAssessor {
    async fn scan(&self, repository: &Path) -> Result<Vec<Finding>> {
        let stdout = run_json_command(&self.cmd, repository, None).await?;
        Ok(serde_json::from_slice(&stdout)?)
    }
}

/// Pipes findings as JSON to an external drafter; stdout is a proposal.
#[derive(Debug, Clone)]
pub struct CommandProposer {
    cmd: CollaboratorCommand,
    repository: PathBuf,
}

impl CommandProposer {
    pub fn new(cmd: CollaboratorCommand, repository: impl Into<PathBuf>) -> Self {
        Self {
            cmd,
            repository: repository.into(),
        }
    }
}

#[async_trait]
impl Proposer for CommandProposer {
    async fn draft(&self, findings: &[Finding]) -> Result<Proposal> {
        let input = serde_json::to_vec(findings)?;
        let stdout = run_json_command(&self.cmd, &self.repository, Some(input)).await?;
        Proposal::from_json(&stdout)
    }
}
