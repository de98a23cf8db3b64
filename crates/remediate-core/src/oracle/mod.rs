//! Test oracle: the authority on whether the workspace is passing.

pub mod command;
pub mod parse;

use async_trait::async_trait;

use crate::domain::{Result, TestResult};

pub use command::{CommandOracle, OracleConfig};
pub use parse::{parse_output, OutputFormat};

/// Runs the verification suite against the current workspace content.
///
/// Implementations do not retry. A flaky failure is reported as observed.
/// `Err` means the oracle could not be run at all; a suite that ran and
/// failed (or timed out) is an `Ok` result with `passed == false`.
#[async_trait]
pub trait TestOracle: Send + Sync {
    async fn run(&self) -> Result<TestResult>;
}
