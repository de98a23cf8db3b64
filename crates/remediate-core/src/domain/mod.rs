//! Domain models for remediation runs.
//!
//! - `Finding`: a problem reported by an assessor
//! - `ChangeUnit`: one proposed mutation plus its approval/execution state
//! - `TestResult`: what the test oracle observed
//! - `RemediateError`: the error taxonomy shared by every component

pub mod change_unit;
pub mod error;
pub mod finding;
pub mod test_result;

pub use change_unit::{ApprovalStatus, ChangeUnit, ExecutionStatus};
pub use error::{RemediateError, Result};
pub use finding::{Finding, Severity};
pub use test_result::{TestFailure, TestFailureKind, TestResult, TestSummary};
