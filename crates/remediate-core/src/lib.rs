//! Remediate Core Library
//!
//! Applies approved change units one at a time behind a test oracle,
//! restoring any unit that breaks the suite and recording every outcome in
//! an append-only execution log.

pub mod applier;
pub mod approval;
pub mod cancel;
pub mod cas;
pub mod collaborators;
pub mod config;
pub mod domain;
pub mod execution_log;
pub mod executor;
pub mod fakes;
pub mod metrics;
pub mod obs;
pub mod oracle;
pub mod orchestrator;
pub mod report;
pub mod telemetry;
pub mod workspace;

pub use domain::{
    ApprovalStatus, ChangeUnit, ExecutionStatus, Finding, RemediateError, Result, Severity,
    TestFailure, TestFailureKind, TestResult, TestSummary,
};

pub use applier::{Applier, ApplyError, FileEdit, FileEditApplier};
pub use approval::{
    ApprovalGate, ChannelDecisions, ConsoleDecisions, Decision, DecisionRecord, DecisionSender,
    DecisionSource, StaticDecisions,
};
pub use cancel::CancelHandle;
pub use telemetry::init_tracing;
pub use cas::fs::FsCasStore;
pub use cas::{CasError, CasStore, Digest};
pub use collaborators::{
    check_coverage, Assessor, CollaboratorCommand, CommandAssessor, CommandProposer, Deferral,
    JsonFindingsAssessor, JsonProposer, Proposal, Proposer, DEFAULT_COLLABORATOR_TIMEOUT_SECS,
};
pub use config::RemediateConfig;
pub use execution_log::{manifest_at, materialize, ExecutionLog, LogEntry};
pub use executor::{ChangeExecutor, ExecutionOutcome, FileChange, WorkspaceState};
pub use oracle::{CommandOracle, OracleConfig, OutputFormat, TestOracle};
pub use orchestrator::{Orchestrator, Phase, PhaseMachine, PhaseTransition};
pub use report::{
    read_report, write_report, AbortReason, RunReport, SkipReason, UnitDisposition, UnitReport,
};
pub use workspace::{
    open_workspace, Baseline, Checkpoint, DirWorkspace, GitWorkspace, Manifest, VersionControl,
    WorkspaceGuard,
};

/// Crate version, reported by the CLI.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
