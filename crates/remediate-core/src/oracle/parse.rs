//! Turning test-runner output into a [`TestResult`].

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{TestFailure, TestFailureKind, TestResult};

/// How to read the runner's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// Try JSON, then libtest, then pytest, then the exit code.
    #[default]
    Auto,
    /// A JSON object `{"passed": bool, "total": n, "failed": [ids]}`.
    Json,
    /// Rust libtest console output.
    Libtest,
    /// pytest console output (`-rf` or default summary).
    Pytest,
    /// Only the exit status is meaningful.
    ExitCode,
}

#[derive(Debug, Deserialize)]
struct JsonReport {
    passed: bool,
    #[serde(default)]
    total: u32,
    #[serde(default)]
    failed: Vec<String>,
}

struct Parsed {
    total: u32,
    failed: Vec<String>,
}

fn libtest_failed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^test (\S+) \.\.\. FAILED\s*$").expect("valid regex"))
}

fn libtest_summary_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^test result: \w+\. (\d+) passed; (\d+) failed").expect("valid regex")
    })
}

fn pytest_failed_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(?:FAILED|ERROR) (\S+)").expect("valid regex"))
}

fn pytest_count_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+) (passed|failed|errors?)\b").expect("valid regex"))
}

fn parse_json(stdout: &str) -> Option<(bool, Parsed)> {
    let candidate = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| l.starts_with('{'))?;
    let report: JsonReport = serde_json::from_str(candidate)
        .or_else(|_| serde_json::from_str(stdout.trim()))
        .ok()?;
    Some((
        report.passed,
        Parsed {
            total: report.total,
            failed: report.failed,
        },
    ))
}

fn parse_libtest(output: &str) -> Option<Parsed> {
    let summaries: Vec<_> = libtest_summary_re().captures_iter(output).collect();
    if summaries.is_empty() {
        return None;
    }
    let total = summaries
        .iter()
        .map(|c| c[1].parse::<u32>().unwrap_or(0) + c[2].parse::<u32>().unwrap_or(0))
        .sum();
    let failed = libtest_failed_re()
        .captures_iter(output)
        .map(|c| c[1].to_string())
        .collect();
    Some(Parsed { total, failed })
}

fn parse_pytest(output: &str) -> Option<Parsed> {
    let summary = output
        .lines()
        .rev()
        .find(|l| l.starts_with('=') && pytest_count_re().is_match(l))?;
    let total = pytest_count_re()
        .captures_iter(summary)
        .map(|c| c[1].parse::<u32>().unwrap_or(0))
        .sum();
    let mut failed: Vec<String> = Vec::new();
    for c in pytest_failed_re().captures_iter(output) {
        let id = c[1].to_string();
        if !failed.contains(&id) {
            failed.push(id);
        }
    }
    Some(Parsed { total, failed })
}

/// Build a [`TestResult`] from raw runner output.
///
/// The suite passes only when the process exited successfully and no
/// failing identifiers were found. A failed exit with no identifiers gets
/// a synthetic `Error` entry so the failure is never anonymous.
pub fn parse_output(
    format: OutputFormat,
    exit_success: bool,
    exit_code: Option<i32>,
    stdout: &str,
    stderr: &str,
) -> TestResult {
    let combined = format!("{stdout}\n{stderr}");

    let (json_passed, parsed) = match format {
        OutputFormat::Json => match parse_json(stdout) {
            Some((p, parsed)) => (Some(p), Some(parsed)),
            None => (None, None),
        },
        OutputFormat::Libtest => (None, parse_libtest(&combined)),
        OutputFormat::Pytest => (None, parse_pytest(&combined)),
        OutputFormat::ExitCode => (None, None),
        OutputFormat::Auto => match parse_json(stdout) {
            Some((p, parsed)) => (Some(p), Some(parsed)),
            None => (
                None,
                parse_libtest(&combined).or_else(|| parse_pytest(&combined)),
            ),
        },
    };

    let Parsed { total, failed } = parsed.unwrap_or(Parsed {
        total: 0,
        failed: Vec::new(),
    });
    let mut failed: Vec<TestFailure> = failed.into_iter().map(TestFailure::failed).collect();

    let passed = exit_success && failed.is_empty() && json_passed.unwrap_or(true);
    if !passed && failed.is_empty() {
        let id = match exit_code {
            Some(code) => format!("<exit status {code}>"),
            None => "<terminated by signal>".to_string(),
        };
        failed.push(TestFailure {
            id,
            kind: TestFailureKind::Error,
        });
    }

    TestResult {
        passed,
        total,
        failed,
        raw_output: combined,
        duration_ms: 0,
    }
}
