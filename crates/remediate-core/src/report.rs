//! Final run report: one line per queued unit, plus why a run stopped.
//!
//! Persisted as `report.json` with a SHA-256 `report.digest` beside it and
//! a rendered `report.md`. Reading a report back verifies the digest.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cas::Digest;
use crate::collaborators::Deferral;
use crate::domain::{ApprovalStatus, Finding, RemediateError, Result, Severity, TestSummary};
use crate::orchestrator::{Phase, PhaseTransition};

/// Why a queued unit was never handed to the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Rejected,
    Deferred,
    /// No decision was recorded before the run stopped.
    Pending,
    /// Approved, but the run aborted before reaching it.
    Aborted,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SkipReason::Rejected => "rejected",
            SkipReason::Deferred => "deferred",
            SkipReason::Pending => "no decision",
            SkipReason::Aborted => "aborted before reach",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "disposition", rename_all = "snake_case")]
pub enum UnitDisposition {
    Verified,
    Reverted {
        reason: String,
        failing_tests: Vec<String>,
    },
    Failed {
        reason: String,
    },
    NotAttempted {
        reason: SkipReason,
    },
}

impl fmt::Display for UnitDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitDisposition::Verified => f.write_str("verified"),
            UnitDisposition::Reverted {
                reason,
                failing_tests,
            } if failing_tests.is_empty() => write!(f, "reverted ({reason})"),
            UnitDisposition::Reverted {
                reason,
                failing_tests,
            } => write!(f, "reverted ({reason}; failing: {})", failing_tests.join(", ")),
            UnitDisposition::Failed { reason } => write!(f, "failed ({reason})"),
            UnitDisposition::NotAttempted { reason } => write!(f, "not attempted ({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReport {
    pub unit_id: String,
    pub title: String,
    pub severity: Severity,
    pub finding_id: Option<String>,
    pub approval: ApprovalStatus,
    pub disposition: UnitDisposition,
    pub test: Option<TestSummary>,
}

/// Why a run ended in `ABORTED`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    DirtyWorkspace {
        paths: Vec<PathBuf>,
    },
    BaselineTestFailure {
        passed: u32,
        total: u32,
        failed: Vec<String>,
    },
    IncompleteProposal {
        uncovered: Vec<String>,
        duplicated: Vec<String>,
    },
    CumulativeRegression {
        units: Vec<String>,
        failed: Vec<String>,
    },
    Timeout {
        secs: u64,
    },
    Cancelled,
    RestoreFailed {
        unit_id: String,
        reason: String,
    },
    Error {
        message: String,
    },
}

impl From<&RemediateError> for AbortReason {
    fn from(err: &RemediateError) -> Self {
        match err {
            RemediateError::DirtyWorkspace { paths } => AbortReason::DirtyWorkspace {
                paths: paths.clone(),
            },
            RemediateError::BaselineTestFailure {
                passed,
                total,
                failed,
            } => AbortReason::BaselineTestFailure {
                passed: *passed,
                total: *total,
                failed: failed.clone(),
            },
            RemediateError::IncompleteProposal {
                uncovered,
                duplicated,
            } => AbortReason::IncompleteProposal {
                uncovered: uncovered.clone(),
                duplicated: duplicated.clone(),
            },
            RemediateError::CumulativeRegression { units, failed } => {
                AbortReason::CumulativeRegression {
                    units: units.clone(),
                    failed: failed.clone(),
                }
            }
            RemediateError::Timeout { secs } => AbortReason::Timeout { secs: *secs },
            RemediateError::Cancelled => AbortReason::Cancelled,
            RemediateError::RestoreFailed { unit_id, reason } => AbortReason::RestoreFailed {
                unit_id: unit_id.clone(),
                reason: reason.clone(),
            },
            other => AbortReason::Error {
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::DirtyWorkspace { paths } => {
                let paths: Vec<_> = paths.iter().map(|p| p.display().to_string()).collect();
                write!(f, "DirtyWorkspace: uncommitted changes in {}", paths.join(", "))
            }
            AbortReason::BaselineTestFailure {
                passed,
                total,
                failed,
            } => write!(
                f,
                "BaselineTestFailure: {passed}/{total} passed, failing: {}",
                failed.join(", ")
            ),
            AbortReason::IncompleteProposal {
                uncovered,
                duplicated,
            } => write!(
                f,
                "IncompleteProposal: uncovered [{}], duplicated [{}]",
                uncovered.join(", "),
                duplicated.join(", ")
            ),
            AbortReason::CumulativeRegression { units, failed } => write!(
                f,
                "CumulativeRegression: units [{}] implicated, failing: {}",
                units.join(", "),
                failed.join(", ")
            ),
            AbortReason::Timeout { secs } => write!(f, "Timeout: test oracle exceeded {secs}s"),
            AbortReason::Cancelled => f.write_str("Cancelled by operator"),
            AbortReason::RestoreFailed { unit_id, reason } => {
                write!(f, "RestoreFailed: unit {unit_id}: {reason}")
            }
            AbortReason::Error { message } => write!(f, "Error: {message}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: String,
    pub root: PathBuf,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub final_phase: Phase,
    pub transitions: Vec<PhaseTransition>,
    pub baseline: Option<TestSummary>,
    pub findings: Vec<Finding>,
    pub deferrals: Vec<Deferral>,
    /// Every queued unit exactly once, in queue order.
    pub units: Vec<UnitReport>,
    pub cumulative: Option<TestSummary>,
    pub abort: Option<AbortReason>,
    pub log_path: Option<PathBuf>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.final_phase == Phase::Done
    }

    pub fn unit(&self, unit_id: &str) -> Option<&UnitReport> {
        self.units.iter().find(|u| u.unit_id == unit_id)
    }

    pub fn count_verified(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.disposition == UnitDisposition::Verified)
            .count()
    }

    pub fn render_markdown(&self) -> String {
        let mut md = format!("# Remediation run {}\n\n", self.run_id);
        md.push_str(&format!("- Repository: `{}`\n", self.root.display()));
        md.push_str(&format!("- Outcome: **{}**\n", self.final_phase));
        if let Some(abort) = &self.abort {
            md.push_str(&format!("- Abort reason: {abort}\n"));
        }
        if let Some(b) = &self.baseline {
            md.push_str(&format!(
                "- Baseline: {}/{} passing\n",
                b.total.saturating_sub(b.failed.len() as u32),
                b.total
            ));
        }
        if let Some(c) = &self.cumulative {
            let verdict = if c.passed { "passing" } else { "FAILING" };
            md.push_str(&format!("- Cumulative validation: {verdict}\n"));
        }
        md.push_str(&format!(
            "- Findings: {}, units: {}, deferred findings: {}\n",
            self.findings.len(),
            self.units.len(),
            self.deferrals.len()
        ));

        md.push_str("\n## Units\n\n");
        if self.units.is_empty() {
            md.push_str("none\n");
        } else {
            md.push_str("| Unit | Severity | Title | Outcome |\n|---|---|---|---|\n");
            for u in &self.units {
                md.push_str(&format!(
                    "| `{}` | {} | {} | {} |\n",
                    u.unit_id,
                    u.severity,
                    u.title.replace('|', "\\|"),
                    u.disposition
                ));
            }
        }

        if !self.deferrals.is_empty() {
            md.push_str("\n## Deferred findings\n\n");
            for d in &self.deferrals {
                md.push_str(&format!("- `{}`: {}\n", d.finding_id, d.reason));
            }
        }

        md.push_str("\n## Phases\n\n");
        for t in &self.transitions {
            md.push_str(&format!("- {} -> {}\n", t.from, t.to));
        }
        md
    }
}

/// Write `report.json`, `report.digest` and `report.md` into `dir`.
pub fn write_report(report: &RunReport, dir: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let json_path = dir.join("report.json");
    let json = serde_json::to_vec_pretty(report)?;
    let digest = Digest::compute(&json).to_hex();

    std::fs::write(&json_path, &json)?;
    std::fs::write(dir.join("report.digest"), digest.as_bytes())?;
    std::fs::write(dir.join("report.md"), report.render_markdown())?;
    Ok(json_path)
}

/// Read `report.json` from `dir` and verify it against `report.digest`.
pub fn read_report(dir: &Path) -> Result<RunReport> {
    let json = std::fs::read(dir.join("report.json"))?;
    let expected = std::fs::read_to_string(dir.join("report.digest"))?;
    let actual = Digest::compute(&json).to_hex();
    if expected.trim() != actual {
        return Err(RemediateError::DigestMismatch {
            expected: expected.trim().to_string(),
            actual,
        });
    }
    Ok(serde_json::from_slice(&json)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> RunReport {
        RunReport {
            run_id: "run-1".into(),
            root: PathBuf::from("/repo"),
            started_at: Utc::now(),
            finished_at: Utc::now(),
            final_phase: Phase::Done,
            transitions: Vec::new(),
            baseline: Some(TestSummary {
                passed: true,
                total: 4,
                failed: Vec::new(),
            }),
            findings: Vec::new(),
            deferrals: Vec::new(),
            units: vec![
                UnitReport {
                    unit_id: "CU-1".into(),
                    title: "pin dependency".into(),
                    severity: Severity::High,
                    finding_id: None,
                    approval: ApprovalStatus::Approved,
                    disposition: UnitDisposition::Reverted {
                        reason: "1 test(s) failing after change".into(),
                        failing_tests: vec!["test_pin".into()],
                    },
                    test: None,
                },
                UnitReport {
                    unit_id: "CU-2".into(),
                    title: "remove secret".into(),
                    severity: Severity::Critical,
                    finding_id: None,
                    approval: ApprovalStatus::Rejected,
                    disposition: UnitDisposition::NotAttempted {
                        reason: SkipReason::Rejected,
                    },
                    test: None,
                },
            ],
            cumulative: None,
            abort: None,
            log_path: None,
        }
    }

    #[test]
    fn markdown_lists_every_unit_with_outcome() {
        let md = sample().render_markdown();
        assert!(md.contains("reverted (1 test(s) failing after change; failing: test_pin)"));
        assert!(md.contains("not attempted (rejected)"));
        assert!(md.contains("**DONE**"));
    }

    #[test]
    fn report_persists_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let report = sample();
        write_report(&report, dir.path()).unwrap();
        assert_eq!(read_report(dir.path()).unwrap(), report);
        assert!(dir.path().join("report.md").exists());
    }

    #[test]
    fn tampered_report_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write_report(&sample(), dir.path()).unwrap();
        let path = dir.path().join("report.json");
        let mut json = std::fs::read(&path).unwrap();
        json.extend_from_slice(b" ");
        std::fs::write(&path, json).unwrap();

        let err = read_report(dir.path()).unwrap_err();
        assert!(matches!(err, RemediateError::DigestMismatch { .. }));
    }

    #[test]
    fn abort_reason_keeps_error_context() {
        let err = RemediateError::CumulativeRegression {
            units: vec!["CU-1".into(), "CU-3".into()],
            failed: vec!["test_x".into()],
        };
        let reason = AbortReason::from(&err);
        assert!(reason.to_string().contains("CU-1, CU-3"));
        let json = serde_json::to_value(&reason).unwrap();
        assert_eq!(json["kind"], "cumulative_regression");
    }
}
