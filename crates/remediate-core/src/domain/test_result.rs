//! Test oracle results.

use serde::{Deserialize, Serialize};

/// Why a test identifier appears in a result's failure list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestFailureKind {
    /// The test ran and failed.
    Failed,
    /// The oracle did not finish within its timeout.
    Timeout,
    /// The runner itself errored without naming a test.
    Error,
}

/// A single failing test identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestFailure {
    pub id: String,
    pub kind: TestFailureKind,
}

impl TestFailure {
    pub fn failed(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: TestFailureKind::Failed,
        }
    }
}

/// Test outcome without raw output, as kept in the execution log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestSummary {
    pub passed: bool,
    pub total: u32,
    pub failed: Vec<String>,
}

/// Outcome of one test oracle invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: bool,
    pub total: u32,
    /// Failing tests in the order the runner reported them.
    pub failed: Vec<TestFailure>,
    #[serde(default)]
    pub raw_output: String,
    #[serde(default)]
    pub duration_ms: u64,
}

impl TestResult {
    /// A passing result with `total` tests.
    pub fn passing(total: u32) -> Self {
        Self {
            passed: true,
            total,
            failed: Vec::new(),
            raw_output: String::new(),
            duration_ms: 0,
        }
    }

    /// A failing result naming each failed test.
    pub fn failing<I, S>(total: u32, failed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            passed: false,
            total,
            failed: failed.into_iter().map(TestFailure::failed).collect(),
            raw_output: String::new(),
            duration_ms: 0,
        }
    }

    /// The result reported when the oracle exceeds its time budget.
    pub fn timed_out(timeout_secs: u64, raw_output: String) -> Self {
        Self {
            passed: false,
            total: 0,
            failed: vec![TestFailure {
                id: format!("<timeout after {timeout_secs}s>"),
                kind: TestFailureKind::Timeout,
            }],
            raw_output,
            duration_ms: timeout_secs.saturating_mul(1000),
        }
    }

    pub fn summary(&self) -> TestSummary {
        TestSummary {
            passed: self.passed,
            total: self.total,
            failed: self.failed_ids(),
        }
    }

    pub fn failed_ids(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.id.clone()).collect()
    }

    /// Number of tests observed passing.
    pub fn passed_count(&self) -> u32 {
        let failed = self
            .failed
            .iter()
            .filter(|f| f.kind == TestFailureKind::Failed)
            .count() as u32;
        self.total.saturating_sub(failed)
    }

    pub fn is_timeout(&self) -> bool {
        self.failed.iter().any(|f| f.kind == TestFailureKind::Timeout)
    }

    /// Failing identifiers not already failing in `before`.
    pub fn newly_failing(&self, before: &TestResult) -> Vec<String> {
        self.failed
            .iter()
            .filter(|f| !before.failed.iter().any(|b| b.id == f.id))
            .map(|f| f.id.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passed_count_excludes_failures() {
        let result = TestResult::failing(10, ["a", "b"]);
        assert_eq!(result.passed_count(), 8);
        assert_eq!(result.failed_ids(), vec!["a", "b"]);
    }

    #[test]
    fn test_timeout_is_failing_with_synthetic_entry() {
        let result = TestResult::timed_out(30, String::new());
        assert!(!result.passed);
        assert!(result.is_timeout());
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].kind, TestFailureKind::Timeout);
    }

    #[test]
    fn test_newly_failing_ignores_known_failures() {
        let before = TestResult::failing(5, ["flaky"]);
        let after = TestResult::failing(5, ["flaky", "tests::parse"]);
        assert_eq!(after.newly_failing(&before), vec!["tests::parse"]);
    }
}
