//! Process-wide counters for remediation runs.
//!
//! Incremented at the call site; [`Metrics::flush`] emits them as one
//! `tracing::info!` event, typically when a run finishes.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::ExecutionStatus;

pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    oracle_runs: AtomicU64,
    units_verified: AtomicU64,
    units_reverted: AtomicU64,
    units_failed: AtomicU64,
    runs_aborted: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            oracle_runs: AtomicU64::new(0),
            units_verified: AtomicU64::new(0),
            units_reverted: AtomicU64::new(0),
            units_failed: AtomicU64::new(0),
            runs_aborted: AtomicU64::new(0),
        }
    }

    pub fn inc_oracle_runs(&self) {
        self.oracle_runs.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "oracle_runs", "counter incremented");
    }

    /// Count a finalized unit under its terminal status. Non-terminal
    /// statuses are ignored.
    pub fn record_unit(&self, status: ExecutionStatus) {
        let counter = match status {
            ExecutionStatus::Verified => &self.units_verified,
            ExecutionStatus::Reverted => &self.units_reverted,
            ExecutionStatus::Failed => &self.units_failed,
            ExecutionStatus::NotStarted | ExecutionStatus::Applied => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_runs_aborted(&self) {
        self.runs_aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            oracle_runs = self.oracle_runs(),
            units_verified = self.units_verified(),
            units_reverted = self.units_reverted(),
            units_failed = self.units_failed(),
            runs_aborted = self.runs_aborted(),
        );
    }

    pub fn oracle_runs(&self) -> u64 {
        self.oracle_runs.load(Ordering::Relaxed)
    }

    pub fn units_verified(&self) -> u64 {
        self.units_verified.load(Ordering::Relaxed)
    }

    pub fn units_reverted(&self) -> u64 {
        self.units_reverted.load(Ordering::Relaxed)
    }

    pub fn units_failed(&self) -> u64 {
        self.units_failed.load(Ordering::Relaxed)
    }

    pub fn runs_aborted(&self) -> u64 {
        self.runs_aborted.load(Ordering::Relaxed)
    }
}
