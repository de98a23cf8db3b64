//! Change units: one atomic, independently verifiable proposed mutation.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::error::{RemediateError, Result};
use super::finding::Severity;

/// Operator decision for a change unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Deferred,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Rejected => "rejected",
            ApprovalStatus::Deferred => "deferred",
        };
        f.write_str(s)
    }
}

/// Where a change unit is in its execution lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    NotStarted,
    Applied,
    Verified,
    Reverted,
    Failed,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Verified | Self::Reverted | Self::Failed)
    }

    fn can_advance_to(self, next: ExecutionStatus) -> bool {
        use ExecutionStatus::*;
        matches!(
            (self, next),
            (NotStarted, Applied)
                | (NotStarted, Failed)
                | (Applied, Verified)
                | (Applied, Reverted)
                | (Applied, Failed)
        )
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::NotStarted => "not_started",
            ExecutionStatus::Applied => "applied",
            ExecutionStatus::Verified => "verified",
            ExecutionStatus::Reverted => "reverted",
            ExecutionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A named, atomic description of one proposed mutation.
///
/// The payload is opaque here; it is interpreted by an
/// [`Applier`](crate::applier::Applier).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeUnit {
    /// Unique and stable across retries.
    pub id: String,
    pub title: String,
    pub severity: Severity,
    /// Finding this unit remediates, if any.
    #[serde(default)]
    pub finding_id: Option<String>,
    #[serde(default)]
    pub rationale: String,
    /// Files the payload may touch, relative to the workspace root.
    pub target_files: Vec<PathBuf>,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub approval: ApprovalStatus,
    #[serde(default)]
    pub execution: ExecutionStatus,
}

impl ChangeUnit {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        severity: Severity,
        target_files: Vec<PathBuf>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            severity,
            finding_id: None,
            rationale: String::new(),
            target_files,
            payload,
            approval: ApprovalStatus::Pending,
            execution: ExecutionStatus::NotStarted,
        }
    }

    pub fn for_finding(mut self, finding_id: impl Into<String>) -> Self {
        self.finding_id = Some(finding_id.into());
        self
    }

    pub fn with_rationale(mut self, rationale: impl Into<String>) -> Self {
        self.rationale = rationale.into();
        self
    }

    /// Clear any status a drafter filled in. Drafts never arrive approved.
    pub fn into_draft(mut self) -> Self {
        self.approval = ApprovalStatus::Pending;
        self.execution = ExecutionStatus::NotStarted;
        self
    }

    /// Move to `next`, enforcing the lifecycle ordering.
    ///
    /// `Applied` is only reachable from an approved unit.
    pub fn advance(&mut self, next: ExecutionStatus) -> Result<()> {
        if next == ExecutionStatus::Applied && self.approval != ApprovalStatus::Approved {
            return Err(RemediateError::NotApproved {
                unit_id: self.id.clone(),
            });
        }
        if !self.execution.can_advance_to(next) {
            return Err(RemediateError::InvalidStatus {
                unit_id: self.id.clone(),
                from: self.execution.to_string(),
                to: next.to_string(),
            });
        }
        self.execution = next;
        Ok(())
    }
}
