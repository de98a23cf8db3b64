//! Workspace guard: refuse to start on a dirty or failing tree.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{RemediateError, Result, TestResult};
use crate::obs;
use crate::oracle::TestOracle;

use super::{Checkpoint, Manifest, VersionControl};

/// Verified pre-mutation state of the workspace.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// Every tracked file's content, captured before any mutation.
    pub checkpoint: Checkpoint,
    pub test: TestResult,
    pub captured_at: DateTime<Utc>,
}

impl Baseline {
    pub fn manifest(&self) -> &Manifest {
        &self.checkpoint.entries
    }
}

pub struct WorkspaceGuard<'a> {
    vcs: &'a dyn VersionControl,
}

impl<'a> WorkspaceGuard<'a> {
    pub fn new(vcs: &'a dyn VersionControl) -> Self {
        Self { vcs }
    }

    /// Check the tree is clean, snapshot every tracked file and confirm
    /// the oracle passes on the untouched content.
    ///
    /// # Errors
    ///
    /// `DirtyWorkspace` if tracked files differ from the last commit.
    /// `BaselineTestFailure` if the oracle does not pass. A timed-out run
    /// counts as failing, with the timeout entry among the failing ids.
    pub async fn establish_baseline(&self, oracle: &dyn TestOracle) -> Result<Baseline> {
        let dirty = self.vcs.dirty_paths()?;
        if !dirty.is_empty() {
            return Err(RemediateError::DirtyWorkspace { paths: dirty });
        }

        let files = self.vcs.tracked_files()?;
        let checkpoint = self.vcs.snapshot(&files)?;
        let test = oracle.run().await?;
        obs::emit_baseline_captured(files.len(), &test);

        if !test.passed {
            return Err(RemediateError::BaselineTestFailure {
                passed: test.passed_count(),
                total: test.total,
                failed: test.failed_ids(),
            });
        }

        self.vcs.adopt_baseline()?;
        Ok(Baseline {
            checkpoint,
            test,
            captured_at: Utc::now(),
        })
    }
}
