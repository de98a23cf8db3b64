//! Error taxonomy for change application.

use std::path::PathBuf;

use crate::cas::CasError;

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors produced while guarding, executing, or orchestrating change units.
#[derive(Debug, thiserror::Error)]
pub enum RemediateError {
    #[error("workspace has uncommitted changes: {}", join_paths(.paths))]
    DirtyWorkspace { paths: Vec<PathBuf> },

    #[error(
        "baseline test run failed: {passed}/{total} passed, failing: [{}]",
        .failed.join(", ")
    )]
    BaselineTestFailure {
        passed: u32,
        total: u32,
        failed: Vec<String>,
    },

    #[error(
        "incomplete proposal: uncovered findings [{}], multiply covered findings [{}]",
        .uncovered.join(", "),
        .duplicated.join(", ")
    )]
    IncompleteProposal {
        uncovered: Vec<String>,
        duplicated: Vec<String>,
    },

    #[error("change unit {unit_id} is not approved")]
    NotApproved { unit_id: String },

    #[error("change unit {unit_id} could not be applied: {reason}")]
    ApplierError { unit_id: String, reason: String },

    #[error(
        "cumulative regression after units [{}]: failing [{}]",
        .units.join(", "),
        .failed.join(", ")
    )]
    CumulativeRegression {
        units: Vec<String>,
        failed: Vec<String>,
    },

    #[error("test oracle timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("run cancelled by operator")]
    Cancelled,

    #[error("invalid phase transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("invalid execution status change for unit {unit_id}: {from} -> {to}")]
    InvalidStatus {
        unit_id: String,
        from: String,
        to: String,
    },

    #[error("decision already recorded for unit {0}")]
    DecisionAlreadyRecorded(String),

    #[error("duplicate change unit id: {0}")]
    DuplicateUnit(String),

    #[error("restore failed for unit {unit_id}: {reason}")]
    RestoreFailed { unit_id: String, reason: String },

    #[error("checkpoint store error: {0}")]
    Cas(#[from] CasError),

    #[error("git error: {0}")]
    GitError(String),

    #[error("collaborator error: {0}")]
    Collaborator(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("execution log is corrupt at line {line}: {reason}")]
    CorruptLog { line: usize, reason: String },

    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for remediation operations.
pub type Result<T> = std::result::Result<T, RemediateError>;
