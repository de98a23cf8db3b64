//! End-to-end runs over a plain-directory workspace.

mod common;

use std::path::PathBuf;
use std::sync::Arc;

use remediate_core::fakes::ScriptedOracle;
use remediate_core::{
    AbortReason, Decision, Digest, ExecutionLog, ExecutionStatus, Orchestrator, Phase,
    SkipReason, TestResult, UnitDisposition, VersionControl,
};

use common::*;

#[tokio::test]
async fn failing_baseline_aborts_before_any_proposal() {
    let repo = python_repo();
    let proposer = CountingProposer::new(vec![replace_unit(
        "CU-1",
        "F-1",
        "module_a.py",
        "a + b",
        "b + a",
    )]);
    let oracle = Arc::new(ScriptedOracle::always(TestResult::failing(
        10,
        ["tests/test_x.py::test_one", "tests/test_y.py::test_two"],
    )));

    let report = Orchestrator::new(
        dir_workspace(repo.path()),
        oracle,
        assessor(vec![finding("F-1")]),
        proposer.clone(),
        decisions(&[("CU-1", Decision::Approved)]),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.final_phase, Phase::Aborted);
    assert_eq!(
        report.abort,
        Some(AbortReason::BaselineTestFailure {
            passed: 8,
            total: 10,
            failed: vec![
                "tests/test_x.py::test_one".to_string(),
                "tests/test_y.py::test_two".to_string()
            ],
        })
    );
    assert_eq!(proposer.calls(), 0);
    assert!(report.units.is_empty());
}

#[tokio::test]
async fn rejected_unit_is_skipped_and_others_apply_in_order() {
    let repo = python_repo();
    let root = repo.path().to_path_buf();
    let units = vec![
        replace_unit("CU-1", "F-1", "module_a.py", "a + b", "b + a"),
        replace_unit("CU-2", "F-2", "module_b.py", "'hunter2'", "None"),
        replace_unit("CU-3", "F-3", "module_c.py", "import os, sys", "import os\nimport sys"),
    ];

    let report = Orchestrator::new(
        dir_workspace(&root),
        content_oracle(&root),
        assessor(vec![finding("F-1"), finding("F-2"), finding("F-3")]),
        CountingProposer::new(units),
        decisions(&[
            ("CU-1", Decision::Approved),
            ("CU-2", Decision::Rejected),
            ("CU-3", Decision::Approved),
        ]),
    )
    .with_state_dir(state_dir(&root))
    .run()
    .await
    .unwrap();

    assert_eq!(report.final_phase, Phase::Done);
    let log = ExecutionLog::load(report.log_path.as_ref().unwrap()).unwrap();
    let ids: Vec<_> = log.iter().map(|e| e.unit_id.as_str()).collect();
    assert_eq!(ids, ["CU-1", "CU-3"]);
    assert!(log.iter().all(|e| e.action == ExecutionStatus::Verified));

    assert_eq!(
        report.unit("CU-2").unwrap().disposition,
        UnitDisposition::NotAttempted {
            reason: SkipReason::Rejected
        }
    );
    assert_eq!(
        std::fs::read_to_string(root.join("module_b.py")).unwrap(),
        "TOKEN = 'hunter2'\n"
    );
    assert!(std::fs::read_to_string(root.join("module_c.py"))
        .unwrap()
        .contains("import os\nimport sys"));
}

#[tokio::test]
async fn regressing_unit_is_reverted_byte_for_byte() {
    let repo = python_repo();
    let root = repo.path().to_path_buf();
    let before = std::fs::read(root.join("module_a.py")).unwrap();

    let report = Orchestrator::new(
        dir_workspace(&root),
        content_oracle(&root),
        assessor(vec![finding("F-1")]),
        CountingProposer::new(vec![replace_unit(
            "CU-1",
            "F-1",
            "module_a.py",
            "return a + b",
            "return a - b  # BROKEN",
        )]),
        decisions(&[("CU-1", Decision::Approved)]),
    )
    .with_state_dir(state_dir(&root))
    .run()
    .await
    .unwrap();

    assert_eq!(report.final_phase, Phase::Done);
    assert_eq!(std::fs::read(root.join("module_a.py")).unwrap(), before);

    let log = ExecutionLog::load(report.log_path.as_ref().unwrap()).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].action, ExecutionStatus::Reverted);
    assert_eq!(log[0].failing_tests, vec![TEST_ADD]);
    assert_eq!(
        log[0].files[0].after,
        Some(Digest::compute(&before)),
        "logged content after revert should equal the pre-apply content"
    );
    match &report.unit("CU-1").unwrap().disposition {
        UnitDisposition::Reverted { failing_tests, .. } => {
            assert_eq!(failing_tests, &vec![TEST_ADD.to_string()]);
        }
        other => panic!("expected reverted, got {other:?}"),
    }
}

#[tokio::test]
async fn stale_payload_fails_without_touching_the_file() {
    let repo = python_repo();
    let root = repo.path().to_path_buf();
    let before = std::fs::read(root.join("module_a.py")).unwrap();

    let report = Orchestrator::new(
        dir_workspace(&root),
        content_oracle(&root),
        assessor(vec![finding("F-1")]),
        CountingProposer::new(vec![replace_unit(
            "CU-1",
            "F-1",
            "module_a.py",
            "return a * b",
            "return b * a",
        )]),
        decisions(&[("CU-1", Decision::Approved)]),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.final_phase, Phase::Done);
    assert!(matches!(
        report.unit("CU-1").unwrap().disposition,
        UnitDisposition::Failed { .. }
    ));
    assert_eq!(std::fs::read(root.join("module_a.py")).unwrap(), before);
}

#[tokio::test]
async fn interacting_units_surface_cumulative_regression() {
    let repo = python_repo();
    let root = repo.path().to_path_buf();
    // Baseline, CU-1, CU-2 pass on their own; the final combined run fails.
    let oracle = Arc::new(ScriptedOracle::sequence(vec![
        TestResult::passing(10),
        TestResult::passing(10),
        TestResult::passing(10),
        TestResult::failing(10, ["tests/test_integration.py::test_flow"]),
    ]));
    let vcs = dir_workspace(&root);

    let report = Orchestrator::new(
        vcs.clone(),
        oracle,
        assessor(vec![finding("F-1"), finding("F-2")]),
        CountingProposer::new(vec![
            replace_unit("CU-1", "F-1", "module_a.py", "a + b", "b + a"),
            replace_unit("CU-2", "F-2", "module_b.py", "'hunter2'", "None"),
        ]),
        decisions(&[("CU-1", Decision::Approved), ("CU-2", Decision::Approved)]),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.final_phase, Phase::Aborted);
    assert_eq!(
        report.abort,
        Some(AbortReason::CumulativeRegression {
            units: vec!["CU-1".to_string(), "CU-2".to_string()],
            failed: vec!["tests/test_integration.py::test_flow".to_string()],
        })
    );
    assert_eq!(report.count_verified(), 2);
    assert!(
        vcs.dirty_paths().unwrap().is_empty(),
        "workspace should sit at the last committed checkpoint"
    );
}

#[tokio::test]
async fn incomplete_proposal_aborts_before_approval() {
    let repo = python_repo();
    let root = repo.path().to_path_buf();
    let before = std::fs::read(root.join("module_a.py")).unwrap();

    let report = Orchestrator::new(
        dir_workspace(&root),
        content_oracle(&root),
        assessor(vec![finding("F-1"), finding("F-2")]),
        CountingProposer::new(vec![replace_unit(
            "CU-1",
            "F-1",
            "module_a.py",
            "a + b",
            "b + a",
        )]),
        decisions(&[("CU-1", Decision::Approved)]),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.final_phase, Phase::Aborted);
    assert_eq!(
        report.abort,
        Some(AbortReason::IncompleteProposal {
            uncovered: vec!["F-2".to_string()],
            duplicated: Vec::new(),
        })
    );
    assert!(report
        .transitions
        .iter()
        .all(|t| t.to != Phase::AwaitingApproval));
    assert_eq!(std::fs::read(root.join("module_a.py")).unwrap(), before);
}

#[tokio::test]
async fn dirty_workspace_is_refused() {
    let repo = python_repo();
    let root = repo.path().to_path_buf();
    let vcs = dir_workspace(&root);
    vcs.adopt_baseline().unwrap();
    std::fs::write(root.join("module_c.py"), "import os\n").unwrap();

    let report = Orchestrator::new(
        vcs,
        content_oracle(&root),
        assessor(vec![finding("F-1")]),
        CountingProposer::new(Vec::new()),
        decisions(&[]),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(
        report.abort,
        Some(AbortReason::DirtyWorkspace {
            paths: vec![PathBuf::from("module_c.py")],
        })
    );
}

#[tokio::test]
async fn timed_out_final_run_names_the_implicated_units() {
    let repo = python_repo();
    let root = repo.path().to_path_buf();
    let oracle = Arc::new(ScriptedOracle::sequence(vec![
        TestResult::passing(10),
        TestResult::passing(10),
        TestResult::timed_out(5, String::new()),
    ]));

    let report = Orchestrator::new(
        dir_workspace(&root),
        oracle,
        assessor(vec![finding("F-1")]),
        CountingProposer::new(vec![replace_unit(
            "CU-1",
            "F-1",
            "module_b.py",
            "'hunter2'",
            "None",
        )]),
        decisions(&[("CU-1", Decision::Approved)]),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.final_phase, Phase::Aborted);
    assert_eq!(
        report.abort,
        Some(AbortReason::CumulativeRegression {
            units: vec!["CU-1".to_string()],
            failed: vec!["<timeout after 5s>".to_string()],
        })
    );
}

#[tokio::test]
async fn timed_out_baseline_lists_the_timeout() {
    let repo = python_repo();
    let root = repo.path().to_path_buf();
    let proposer = CountingProposer::new(Vec::new());

    let report = Orchestrator::new(
        dir_workspace(&root),
        Arc::new(ScriptedOracle::always(TestResult::timed_out(5, String::new()))),
        assessor(vec![finding("F-1")]),
        proposer.clone(),
        decisions(&[]),
    )
    .run()
    .await
    .unwrap();

    match report.abort {
        Some(AbortReason::BaselineTestFailure { failed, .. }) => {
            assert_eq!(failed, vec!["<timeout after 5s>"]);
        }
        other => panic!("expected BaselineTestFailure, got {other:?}"),
    }
    assert_eq!(proposer.calls(), 0);
}

#[tokio::test]
async fn edits_outside_the_unit_targets_stay_uncommitted() {
    let repo = python_repo();
    let root = repo.path().to_path_buf();
    // The suite rewrites module_c.py once CU-1's change is in place.
    let oracle = Arc::new(ScriptedOracle::inspecting(&root, |root| {
        let b = std::fs::read_to_string(root.join("module_b.py")).unwrap_or_default();
        if b.contains("None") {
            std::fs::write(root.join("module_c.py"), "import os\n").unwrap();
        }
        TestResult::passing(10)
    }));
    let vcs = dir_workspace(&root);

    let report = Orchestrator::new(
        vcs.clone(),
        oracle,
        assessor(vec![finding("F-1")]),
        CountingProposer::new(vec![replace_unit(
            "CU-1",
            "F-1",
            "module_b.py",
            "'hunter2'",
            "None",
        )]),
        decisions(&[("CU-1", Decision::Approved)]),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(report.unit("CU-1").unwrap().disposition, UnitDisposition::Verified);
    assert_eq!(vcs.dirty_paths().unwrap(), vec![PathBuf::from("module_c.py")]);
}
