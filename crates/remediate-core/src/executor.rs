//! Change executor: apply one approved unit, verify it, commit or restore.
//!
//! The executor owns the [`WorkspaceState`]. `apply` takes `&mut self`, so
//! nothing else can observe the workspace between checkpoint capture and
//! commit/restore. A [`PendingCheckpoint`] guard restores the touched files
//! on any exit path that did not resolve it, including a dropped future.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::applier::{Applier, ApplyError};
use crate::cas::Digest;
use crate::domain::{
    ApprovalStatus, ChangeUnit, ExecutionStatus, RemediateError, Result, TestSummary,
};
use crate::oracle::TestOracle;
use crate::workspace::{Baseline, Checkpoint, Manifest, VersionControl};

/// Content of one target file before and after a unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    pub path: PathBuf,
    pub before: Option<Digest>,
    pub after: Option<Digest>,
}

/// What happened to one unit. Reported to the orchestrator by value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub unit_id: String,
    /// `Verified`, `Reverted` or `Failed`.
    pub status: ExecutionStatus,
    /// Whether the payload reached the workspace before the outcome.
    pub applied: bool,
    pub reason: Option<String>,
    pub failing_tests: Vec<String>,
    pub test: Option<TestSummary>,
    /// Final content of each target; equals `before` unless verified.
    pub files: Vec<FileChange>,
}

/// The live checkpoint. Exactly one exists per executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceState {
    /// Id of the checkpoint the workspace currently matches.
    pub checkpoint_id: String,
    /// Units committed in this run, in order.
    pub committed: Vec<String>,
    /// Units committed since the last passing cumulative run.
    pub since_known_good: Vec<String>,
}

/// Scoped ownership of a pre-application checkpoint.
struct PendingCheckpoint<'a> {
    vcs: &'a dyn VersionControl,
    checkpoint: Checkpoint,
    resolved: bool,
}

impl<'a> PendingCheckpoint<'a> {
    fn new(vcs: &'a dyn VersionControl, checkpoint: Checkpoint) -> Self {
        Self {
            vcs,
            checkpoint,
            resolved: false,
        }
    }

    fn commit(&mut self, message: &str) -> Result<()> {
        self.vcs.commit(&self.checkpoint.paths(), message)?;
        self.resolved = true;
        Ok(())
    }

    /// Restore the captured content and confirm it is byte-identical.
    fn restore(&mut self) -> Result<()> {
        self.vcs.restore(&self.checkpoint)?;
        for (path, expected) in &self.checkpoint.entries {
            let actual = Digest::of_file(&self.vcs.root().join(path))?;
            if actual != *expected {
                return Err(RemediateError::DigestMismatch {
                    expected: expected.map(|d| d.to_hex()).unwrap_or_else(|| "<absent>".into()),
                    actual: actual.map(|d| d.to_hex()).unwrap_or_else(|| "<absent>".into()),
                });
            }
        }
        self.resolved = true;
        Ok(())
    }
}

impl Drop for PendingCheckpoint<'_> {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        tracing::warn!(checkpoint = %self.checkpoint.id, "unresolved checkpoint, restoring");
        if let Err(e) = self.vcs.restore(&self.checkpoint) {
            tracing::error!(checkpoint = %self.checkpoint.id, error = %e, "restore on drop failed");
        }
    }
}

pub struct ChangeExecutor {
    vcs: Arc<dyn VersionControl>,
    applier: Arc<dyn Applier>,
    commit_prefix: String,
    state: WorkspaceState,
}

impl ChangeExecutor {
    /// Start from the baseline checkpoint.
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        applier: Arc<dyn Applier>,
        baseline: &Baseline,
    ) -> Self {
        Self {
            vcs,
            applier,
            commit_prefix: "remediate".to_string(),
            state: WorkspaceState {
                checkpoint_id: baseline.checkpoint.id.clone(),
                committed: Vec::new(),
                since_known_good: Vec::new(),
            },
        }
    }

    pub fn with_commit_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.commit_prefix = prefix.into();
        self
    }

    pub fn state(&self) -> &WorkspaceState {
        &self.state
    }

    pub fn units_since_known_good(&self) -> &[String] {
        &self.state.since_known_good
    }

    /// Call after a passing cumulative run.
    pub fn mark_known_good(&mut self) {
        self.state.since_known_good.clear();
    }

    /// Apply `unit`, run the oracle, then commit or restore.
    ///
    /// Per-unit trouble (applier rejection, oracle fault, failing tests) is
    /// an `Ok` outcome with the touched files restored.
    ///
    /// # Errors
    ///
    /// `NotApproved` if the unit is not approved. `RestoreFailed` if the
    /// touched files could not be put back, which leaves the workspace in
    /// an unknown state and must end the run.
    pub async fn apply(
        &mut self,
        unit: &ChangeUnit,
        oracle: &dyn TestOracle,
    ) -> Result<ExecutionOutcome> {
        if unit.approval != ApprovalStatus::Approved {
            return Err(RemediateError::NotApproved {
                unit_id: unit.id.clone(),
            });
        }

        let vcs = Arc::clone(&self.vcs);
        let checkpoint = match vcs.snapshot(&unit.target_files) {
            Ok(cp) => cp,
            Err(e) => {
                return Ok(Self::failed(
                    unit,
                    false,
                    format!("checkpoint capture failed: {e}"),
                    &Manifest::new(),
                ))
            }
        };
        let before = checkpoint.entries.clone();
        let mut pending = PendingCheckpoint::new(vcs.as_ref(), checkpoint);

        if let Err(e) = self.applier.apply(vcs.root(), unit) {
            Self::restore(&mut pending, unit)?;
            let reason = match e {
                ApplyError::Rejected(reason) => RemediateError::ApplierError {
                    unit_id: unit.id.clone(),
                    reason,
                }
                .to_string(),
                ApplyError::Io(e) => format!("i/o fault while applying: {e}"),
            };
            return Ok(Self::failed(unit, false, reason, &before));
        }

        let applied = match vcs.snapshot(&unit.target_files) {
            Ok(cp) => cp,
            Err(e) => {
                Self::restore(&mut pending, unit)?;
                return Ok(Self::failed(
                    unit,
                    true,
                    format!("could not record applied content: {e}"),
                    &before,
                ));
            }
        };

        let test = match oracle.run().await {
            Ok(test) => test,
            Err(e) => {
                Self::restore(&mut pending, unit)?;
                return Ok(Self::failed(
                    unit,
                    true,
                    format!("test oracle fault: {e}"),
                    &before,
                ));
            }
        };

        if !test.passed {
            Self::restore(&mut pending, unit)?;
            let failing = test.failed_ids();
            let reason = if test.is_timeout() {
                "test oracle timed out".to_string()
            } else {
                format!("{} test(s) failing after change", failing.len())
            };
            return Ok(ExecutionOutcome {
                unit_id: unit.id.clone(),
                status: ExecutionStatus::Reverted,
                applied: true,
                reason: Some(reason),
                failing_tests: failing,
                test: Some(test.summary()),
                files: Self::changes(&before, &before),
            });
        }

        let message = format!("{}: {} [{}]", self.commit_prefix, unit.title, unit.id);
        if let Err(e) = pending.commit(&message) {
            Self::restore(&mut pending, unit)?;
            return Ok(Self::failed(
                unit,
                true,
                format!("commit failed: {e}"),
                &before,
            ));
        }
        drop(pending);

        self.state.checkpoint_id = applied.id.clone();
        self.state.committed.push(unit.id.clone());
        self.state.since_known_good.push(unit.id.clone());

        Ok(ExecutionOutcome {
            unit_id: unit.id.clone(),
            status: ExecutionStatus::Verified,
            applied: true,
            reason: None,
            failing_tests: Vec::new(),
            test: Some(test.summary()),
            files: Self::changes(&before, &applied.entries),
        })
    }

    fn restore(pending: &mut PendingCheckpoint<'_>, unit: &ChangeUnit) -> Result<()> {
        pending.restore().map_err(|e| RemediateError::RestoreFailed {
            unit_id: unit.id.clone(),
            reason: e.to_string(),
        })
    }

    fn failed(unit: &ChangeUnit, applied: bool, reason: String, before: &Manifest) -> ExecutionOutcome {
        ExecutionOutcome {
            unit_id: unit.id.clone(),
            status: ExecutionStatus::Failed,
            applied,
            reason: Some(reason),
            failing_tests: Vec::new(),
            test: None,
            files: Self::changes(before, before),
        }
    }

    fn changes(before: &Manifest, after: &Manifest) -> Vec<FileChange> {
        before
            .iter()
            .map(|(path, b)| FileChange {
                path: path.clone(),
                before: *b,
                after: after.get(path).copied().flatten(),
            })
            .collect()
    }
}
