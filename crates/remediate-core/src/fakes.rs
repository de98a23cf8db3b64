//! In-memory collaborators for tests and dry runs.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::collaborators::{Assessor, Proposal, Proposer};
use crate::domain::{Finding, RemediateError, Result, TestResult};
use crate::oracle::TestOracle;

type Inspector = Box<dyn Fn(&Path) -> TestResult + Send + Sync>;

enum Script {
    Sequence(Mutex<VecDeque<TestResult>>),
    Inspect(PathBuf, Inspector),
    Error(String),
}

/// Oracle with scripted answers. Counts how often it was run.
pub struct ScriptedOracle {
    script: Script,
    calls: AtomicUsize,
}

impl ScriptedOracle {
    pub fn always(result: TestResult) -> Self {
        Self::sequence(vec![result])
    }

    /// Answers in order, repeating the last one once exhausted.
    pub fn sequence(results: Vec<TestResult>) -> Self {
        Self {
            script: Script::Sequence(Mutex::new(results.into())),
            calls: AtomicUsize::new(0),
        }
    }

    /// Derive each answer from the workspace content at `root`.
    pub fn inspecting<F>(root: impl Into<PathBuf>, inspect: F) -> Self
    where
        F: Fn(&Path) -> TestResult + Send + Sync + 'static,
    {
        Self {
            script: Script::Inspect(root.into(), Box::new(inspect)),
            calls: AtomicUsize::new(0),
        }
    }

    /// Every run fails to start.
    pub fn erroring(message: impl Into<String>) -> Self {
        Self {
            script: Script::Error(message.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TestOracle for ScriptedOracle {
    async fn run(&self) -> Result<TestResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Sequence(queue) => {
                let mut queue = queue
                    .lock()
                    .map_err(|_| RemediateError::Collaborator("oracle script poisoned".into()))?;
                let next = if queue.len() > 1 {
                    queue.pop_front()
                } else {
                    queue.front().cloned()
                };
                next.ok_or_else(|| RemediateError::Collaborator("oracle script is empty".into()))
            }
            Script::Inspect(root, inspect) => Ok(inspect(root)),
            Script::Error(message) => Err(RemediateError::Collaborator(message.clone())),
        }
    }
}

/// Assessor returning a fixed list of findings.
#[derive(Debug, Clone, Default)]
pub struct FixedAssessor(pub Vec<Finding>);

#[async_trait]
impl Assessor for FixedAssessor {
    async fn scan(&self, _repository: &Path) -> Result<Vec<Finding>> {
        Ok(self.0.clone())
    }
}

/// Proposer returning a fixed proposal regardless of input.
#[derive(Debug, Clone, Default)]
pub struct FixedProposer(pub Proposal);

#[async_trait]
impl Proposer for FixedProposer {
    async fn draft(&self, _findings: &[Finding]) -> Result<Proposal> {
        Ok(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequence_repeats_last_answer() {
        let oracle = ScriptedOracle::sequence(vec![
            TestResult::passing(2),
            TestResult::failing(2, ["t1"]),
        ]);
        assert!(oracle.run().await.unwrap().passed);
        assert!(!oracle.run().await.unwrap().passed);
        assert!(!oracle.run().await.unwrap().passed);
        assert_eq!(oracle.calls(), 3);
    }

    #[tokio::test]
    async fn inspecting_sees_current_content() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("flag"), "ok").unwrap();
        let oracle = ScriptedOracle::inspecting(dir.path(), |root| {
            match std::fs::read_to_string(root.join("flag")).as_deref() {
                Ok("ok") => TestResult::passing(1),
                _ => TestResult::failing(1, ["flag"]),
            }
        });
        assert!(oracle.run().await.unwrap().passed);
        std::fs::write(dir.path().join("flag"), "bad").unwrap();
        assert!(!oracle.run().await.unwrap().passed);
    }
}
