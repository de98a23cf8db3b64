//! Orchestrator: sequences assess, propose, approve, execute and validate.
//!
//! The orchestrator owns the unit queue and the execution log. The
//! [`ChangeExecutor`] owns the workspace checkpoint and hands back one
//! outcome per unit. Every run ends in `DONE` or `ABORTED` and produces a
//! [`RunReport`] listing each queued unit exactly once.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::applier::{Applier, FileEditApplier};
use crate::approval::{ApprovalGate, DecisionSource};
use crate::cancel::CancelHandle;
use crate::collaborators::{check_coverage, Assessor, Deferral, Proposer};
use crate::domain::{
    ApprovalStatus, ChangeUnit, ExecutionStatus, Finding, RemediateError, Result, TestResult,
};
use crate::execution_log::ExecutionLog;
use crate::executor::{ChangeExecutor, ExecutionOutcome};
use crate::metrics::METRICS;
use crate::obs;
use crate::oracle::TestOracle;
use crate::report::{self, AbortReason, RunReport, SkipReason, UnitDisposition, UnitReport};
use crate::workspace::{Baseline, VersionControl, WorkspaceGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Phase {
    Assessing,
    AwaitingProposal,
    AwaitingApproval,
    Executing,
    Validating,
    Done,
    Aborted,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Assessing => "ASSESSING",
            Phase::AwaitingProposal => "AWAITING_PROPOSAL",
            Phase::AwaitingApproval => "AWAITING_APPROVAL",
            Phase::Executing => "EXECUTING",
            Phase::Validating => "VALIDATING",
            Phase::Done => "DONE",
            Phase::Aborted => "ABORTED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Aborted)
    }

    fn can_transition_to(&self, next: Phase) -> bool {
        use Phase::*;
        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Aborted)
                | (Assessing, AwaitingProposal)
                | (Assessing, Done)
                | (AwaitingProposal, AwaitingApproval)
                | (AwaitingApproval, Executing)
                | (Executing, Validating)
                | (Validating, Done)
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: Phase,
    pub to: Phase,
    pub at: DateTime<Utc>,
}

/// Current phase plus every transition taken to reach it.
#[derive(Debug, Clone)]
pub struct PhaseMachine {
    current: Phase,
    history: Vec<PhaseTransition>,
}

impl Default for PhaseMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl PhaseMachine {
    pub fn new() -> Self {
        Self {
            current: Phase::Assessing,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> Phase {
        self.current
    }

    pub fn history(&self) -> &[PhaseTransition] {
        &self.history
    }

    /// # Errors
    ///
    /// `InvalidTransition` if `next` is not reachable from the current phase.
    pub fn advance(&mut self, next: Phase) -> Result<()> {
        if !self.current.can_transition_to(next) {
            return Err(RemediateError::InvalidTransition {
                from: self.current.to_string(),
                to: next.to_string(),
            });
        }
        obs::emit_phase_transition(self.current.as_str(), next.as_str());
        self.history.push(PhaseTransition {
            from: self.current,
            to: next,
            at: Utc::now(),
        });
        self.current = next;
        Ok(())
    }
}

/// Everything a run accumulates before it is turned into a report.
struct RunState {
    machine: PhaseMachine,
    baseline: Option<Baseline>,
    findings: Vec<Finding>,
    deferrals: Vec<Deferral>,
    queue: Vec<ChangeUnit>,
    outcomes: HashMap<String, ExecutionOutcome>,
    log: ExecutionLog,
    cumulative: Option<TestResult>,
}

pub struct Orchestrator {
    run_id: String,
    vcs: Arc<dyn VersionControl>,
    oracle: Arc<dyn TestOracle>,
    assessor: Arc<dyn Assessor>,
    proposer: Arc<dyn Proposer>,
    gate: ApprovalGate,
    applier: Arc<dyn Applier>,
    run_dir: Option<PathBuf>,
    cancel: CancelHandle,
    commit_prefix: String,
}

impl Orchestrator {
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        oracle: Arc<dyn TestOracle>,
        assessor: Arc<dyn Assessor>,
        proposer: Arc<dyn Proposer>,
        decisions: Box<dyn DecisionSource>,
    ) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            vcs,
            oracle,
            assessor,
            proposer,
            gate: ApprovalGate::new(decisions),
            applier: Arc::new(FileEditApplier),
            run_dir: None,
            cancel: CancelHandle::new(),
            commit_prefix: "remediate".to_string(),
        }
    }

    pub fn with_applier(mut self, applier: Arc<dyn Applier>) -> Self {
        self.applier = applier;
        self
    }

    /// Persist baseline, execution log and report under
    /// `<state_dir>/runs/<run_id>/`.
    pub fn with_state_dir(mut self, state_dir: impl Into<PathBuf>) -> Self {
        self.run_dir = Some(state_dir.into().join("runs").join(&self.run_id));
        self
    }

    pub fn with_cancel(mut self, cancel: CancelHandle) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_commit_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.commit_prefix = prefix.into();
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Drive the run to `DONE` or `ABORTED`.
    ///
    /// Aborts are reported on the returned [`RunReport`], not as `Err`.
    ///
    /// # Errors
    ///
    /// Only when the finished report cannot be persisted.
    pub async fn run(mut self) -> Result<RunReport> {
        let span = obs::run_span(&self.run_id);
        async move {
            let started_at = Utc::now();
            let start = Instant::now();
            obs::emit_run_started(&self.run_id, self.vcs.root());

            let mut st = RunState {
                machine: PhaseMachine::new(),
                baseline: None,
                findings: Vec::new(),
                deferrals: Vec::new(),
                queue: Vec::new(),
                outcomes: HashMap::new(),
                log: ExecutionLog::in_memory(self.run_id.clone()),
                cumulative: None,
            };

            let abort = match self.drive(&mut st).await {
                Ok(()) => None,
                Err(e) => {
                    let reason = AbortReason::from(&e);
                    if !st.machine.current().is_terminal() {
                        st.machine.advance(Phase::Aborted)?;
                    }
                    obs::emit_run_aborted(&self.run_id, &reason);
                    METRICS.inc_runs_aborted();
                    Some(reason)
                }
            };

            let report = self.build_report(st, started_at, abort);
            if let Some(dir) = &self.run_dir {
                report::write_report(&report, dir)?;
            }
            obs::emit_run_finished(
                &self.run_id,
                start.elapsed().as_millis() as u64,
                report.final_phase.as_str(),
                report.succeeded(),
            );
            METRICS.flush();
            Ok(report)
        }
        .instrument(span)
        .await
    }

    async fn drive(&mut self, st: &mut RunState) -> Result<()> {
        if let Some(dir) = &self.run_dir {
            st.log = ExecutionLog::create(&dir.join("execution_log.jsonl"), self.run_id.clone())?;
        }

        // ASSESSING
        self.check_cancel()?;
        let baseline = WorkspaceGuard::new(self.vcs.as_ref())
            .establish_baseline(self.oracle.as_ref())
            .await?;
        if let Some(dir) = &self.run_dir {
            std::fs::write(
                dir.join("baseline.json"),
                serde_json::to_vec_pretty(&baseline)?,
            )?;
        }
        st.baseline = Some(baseline);

        self.check_cancel()?;
        st.findings = self.assessor.scan(self.vcs.root()).await?;
        tracing::info!(findings = st.findings.len(), "assessment complete");
        if st.findings.is_empty() {
            return st.machine.advance(Phase::Done);
        }
        st.machine.advance(Phase::AwaitingProposal)?;

        // AWAITING_PROPOSAL
        self.check_cancel()?;
        let mut proposal = self.proposer.draft(&st.findings).await?;
        proposal.units = proposal
            .units
            .into_iter()
            .map(ChangeUnit::into_draft)
            .collect();
        check_coverage(&st.findings, &proposal)?;
        st.deferrals = proposal.deferrals;
        st.queue = proposal.units;
        st.machine.advance(Phase::AwaitingApproval)?;

        // AWAITING_APPROVAL
        for idx in 0..st.queue.len() {
            self.check_cancel()?;
            let decision = self.gate.decide(&st.queue[idx]).await?;
            st.queue[idx].approval = decision.into();
        }
        self.check_cancel()?;
        st.machine.advance(Phase::Executing)?;

        // EXECUTING
        let baseline = st
            .baseline
            .as_ref()
            .ok_or_else(|| RemediateError::Config("baseline missing".into()))?;
        let mut executor =
            ChangeExecutor::new(Arc::clone(&self.vcs), Arc::clone(&self.applier), baseline)
                .with_commit_prefix(self.commit_prefix.clone());

        for idx in 0..st.queue.len() {
            if !self.gate.is_approved(&st.queue[idx].id) {
                continue;
            }
            self.check_cancel()?;
            let outcome = executor.apply(&st.queue[idx], self.oracle.as_ref()).await?;

            let unit = &mut st.queue[idx];
            if outcome.applied {
                unit.advance(ExecutionStatus::Applied)?;
            }
            unit.advance(outcome.status)?;
            st.log.append(&outcome)?;
            obs::emit_unit_outcome(&outcome.unit_id, outcome.status, &outcome.failing_tests);
            METRICS.record_unit(outcome.status);
            st.outcomes.insert(outcome.unit_id.clone(), outcome);
        }
        self.check_cancel()?;
        st.machine.advance(Phase::Validating)?;

        // VALIDATING
        let implicated = executor.units_since_known_good().to_vec();
        if !implicated.is_empty() {
            let result = self.oracle.run().await?;
            obs::emit_cumulative_validated(implicated.len(), &result);
            let passed = result.passed;
            let failed = result.failed_ids();
            st.cumulative = Some(result);
            if !passed {
                return Err(RemediateError::CumulativeRegression {
                    units: implicated,
                    failed,
                });
            }
            executor.mark_known_good();
        }
        st.machine.advance(Phase::Done)
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(RemediateError::Cancelled);
        }
        Ok(())
    }

    fn build_report(
        &self,
        st: RunState,
        started_at: DateTime<Utc>,
        abort: Option<AbortReason>,
    ) -> RunReport {
        let units = st
            .queue
            .iter()
            .map(|unit| {
                let outcome = st.outcomes.get(&unit.id);
                let disposition = match outcome {
                    Some(o) => match o.status {
                        ExecutionStatus::Verified => UnitDisposition::Verified,
                        ExecutionStatus::Reverted => UnitDisposition::Reverted {
                            reason: o.reason.clone().unwrap_or_default(),
                            failing_tests: o.failing_tests.clone(),
                        },
                        _ => UnitDisposition::Failed {
                            reason: o.reason.clone().unwrap_or_default(),
                        },
                    },
                    None => UnitDisposition::NotAttempted {
                        reason: match unit.approval {
                            ApprovalStatus::Rejected => SkipReason::Rejected,
                            ApprovalStatus::Deferred => SkipReason::Deferred,
                            ApprovalStatus::Pending => SkipReason::Pending,
                            ApprovalStatus::Approved => SkipReason::Aborted,
                        },
                    },
                };
                UnitReport {
                    unit_id: unit.id.clone(),
                    title: unit.title.clone(),
                    severity: unit.severity,
                    finding_id: unit.finding_id.clone(),
                    approval: unit.approval,
                    disposition,
                    test: outcome.and_then(|o| o.test.clone()),
                }
            })
            .collect();

        RunReport {
            run_id: self.run_id.clone(),
            root: self.vcs.root().to_path_buf(),
            started_at,
            finished_at: Utc::now(),
            final_phase: st.machine.current(),
            transitions: st.machine.history().to_vec(),
            baseline: st.baseline.as_ref().map(|b| b.test.summary()),
            findings: st.findings,
            deferrals: st.deferrals,
            units,
            cumulative: st.cumulative.as_ref().map(TestResult::summary),
            abort,
            log_path: st.log.path().map(|p| p.to_path_buf()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn machine_follows_happy_path() {
        let mut m = PhaseMachine::new();
        for next in [
            Phase::AwaitingProposal,
            Phase::AwaitingApproval,
            Phase::Executing,
            Phase::Validating,
            Phase::Done,
        ] {
            m.advance(next).unwrap();
        }
        assert_eq!(m.current(), Phase::Done);
        assert_eq!(m.history().len(), 5);
    }

    #[test]
    fn machine_rejects_skipping_approval() {
        let mut m = PhaseMachine::new();
        m.advance(Phase::AwaitingProposal).unwrap();
        let err = m.advance(Phase::Executing).unwrap_err();
        assert!(matches!(err, RemediateError::InvalidTransition { .. }));
        assert_eq!(m.current(), Phase::AwaitingProposal);
    }

    #[test]
    fn terminal_phases_have_no_exits() {
        let mut m = PhaseMachine::new();
        m.advance(Phase::Aborted).unwrap();
        assert!(m.advance(Phase::Done).is_err());
        assert!(m.advance(Phase::Aborted).is_err());

        let mut m = PhaseMachine::new();
        m.advance(Phase::Done).unwrap();
        assert!(m.advance(Phase::Aborted).is_err());
    }

    #[test]
    fn phase_serializes_uppercase() {
        assert_eq!(
            serde_json::to_string(&Phase::AwaitingApproval).unwrap(),
            "\"AWAITING_APPROVAL\""
        );
        assert_eq!(Phase::Validating.to_string(), "VALIDATING");
    }
}
