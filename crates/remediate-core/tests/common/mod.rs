//! Shared fixtures for orchestrator integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use remediate_core::fakes::{FixedAssessor, ScriptedOracle};
use remediate_core::{
    ChangeUnit, Decision, DirWorkspace, Finding, Proposal, Proposer, Result, Severity,
    StaticDecisions, TestResult, VersionControl,
};

pub const TEST_ADD: &str = "tests/test_a.py::test_add";

/// Plain-directory repository with three small modules.
pub fn python_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("module_a.py"),
        "def add(a, b):\n    return a + b\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("module_b.py"), "TOKEN = 'hunter2'\n").unwrap();
    std::fs::write(dir.path().join("module_c.py"), "import os, sys\n").unwrap();
    dir
}

pub fn dir_workspace(root: &Path) -> Arc<dyn VersionControl> {
    Arc::new(DirWorkspace::open(root, &state_dir(root)).unwrap())
}

pub fn state_dir(root: &Path) -> PathBuf {
    root.join(".remediate")
}

/// Ten tests; `test_add` fails whenever module_a.py is marked broken.
pub fn content_oracle(root: &Path) -> Arc<ScriptedOracle> {
    Arc::new(ScriptedOracle::inspecting(root, |root| {
        let a = std::fs::read_to_string(root.join("module_a.py")).unwrap_or_default();
        if a.contains("BROKEN") {
            TestResult::failing(10, [TEST_ADD])
        } else {
            TestResult::passing(10)
        }
    }))
}

pub fn finding(id: &str) -> Finding {
    Finding::new(id, Severity::Medium, format!("finding {id}"), "module_a.py:1")
}

pub fn replace_unit(id: &str, finding_id: &str, file: &str, find: &str, replace: &str) -> ChangeUnit {
    ChangeUnit::new(
        id,
        format!("edit {file}"),
        Severity::Medium,
        vec![PathBuf::from(file)],
        json!([{ "op": "replace", "path": file, "find": find, "replace": replace }]),
    )
    .for_finding(finding_id)
}

pub fn assessor(findings: Vec<Finding>) -> Arc<FixedAssessor> {
    Arc::new(FixedAssessor(findings))
}

pub fn decisions(pairs: &[(&str, Decision)]) -> Box<StaticDecisions> {
    Box::new(StaticDecisions::new(
        pairs.iter().map(|(id, d)| (id.to_string(), *d)),
    ))
}

/// Proposer that records how often it was asked to draft.
pub struct CountingProposer {
    proposal: Proposal,
    calls: AtomicUsize,
}

impl CountingProposer {
    pub fn new(units: Vec<ChangeUnit>) -> Arc<Self> {
        Arc::new(Self {
            proposal: Proposal {
                units,
                deferrals: Vec::new(),
            },
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Proposer for CountingProposer {
    async fn draft(&self, _findings: &[Finding]) -> Result<Proposal> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.proposal.clone())
    }
}
