//! Structured lifecycle events for remediation runs.
//!
//! Every event carries an `event` field so log pipelines can filter on it.

use tracing::info;

use crate::domain::{ExecutionStatus, TestResult};

/// Span tagging every event of one run with its id. Attach it to the run
/// future with `tracing::Instrument` so it holds across await points.
pub fn run_span(run_id: &str) -> tracing::Span {
    tracing::info_span!("remediate.run", run_id = %run_id)
}

pub fn emit_run_started(run_id: &str, root: &std::path::Path) {
    info!(event = "run.started", run_id = %run_id, root = %root.display());
}

pub fn emit_phase_transition(from: &str, to: &str) {
    info!(event = "phase.transition", from = %from, to = %to);
}

pub fn emit_baseline_captured(files: usize, result: &TestResult) {
    info!(
        event = "baseline.captured",
        files = files,
        passed = result.passed,
        total = result.total,
        failed = result.failed.len(),
    );
}

pub fn emit_unit_outcome(unit_id: &str, status: ExecutionStatus, failing: &[String]) {
    if status == ExecutionStatus::Verified {
        info!(event = "unit.outcome", unit_id = %unit_id, status = %status);
    } else {
        tracing::warn!(
            event = "unit.outcome",
            unit_id = %unit_id,
            status = %status,
            failing = %failing.join(","),
        );
    }
}

pub fn emit_cumulative_validated(units: usize, result: &TestResult) {
    info!(
        event = "cumulative.validated",
        units = units,
        passed = result.passed,
        total = result.total,
    );
}

pub fn emit_run_finished(run_id: &str, duration_ms: u64, phase: &str, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        duration_ms = duration_ms,
        phase = %phase,
        success = success,
    );
}

pub fn emit_run_aborted(run_id: &str, reason: &dyn std::fmt::Display) {
    tracing::warn!(event = "run.aborted", run_id = %run_id, reason = %reason);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_span_enter_does_not_panic() {
        let _entered = run_span("run-test").entered();
        emit_phase_transition("ASSESSING", "DONE");
    }
}
