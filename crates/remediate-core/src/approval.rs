//! Approval gate: one recorded, immutable decision per change unit.
//!
//! Decisions arrive through a [`DecisionSource`], which keeps the
//! orchestrator independent of how operators answer (a file, the console,
//! or a channel fed by an API). A unit without an answer is recorded as
//! rejected.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::domain::{ApprovalStatus, ChangeUnit, RemediateError, Result};

/// Operator decision for one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approved,
    Rejected,
    Deferred,
}

impl From<Decision> for ApprovalStatus {
    fn from(d: Decision) -> Self {
        match d {
            Decision::Approved => ApprovalStatus::Approved,
            Decision::Rejected => ApprovalStatus::Rejected,
            Decision::Deferred => ApprovalStatus::Deferred,
        }
    }
}

/// A decision as recorded by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionRecord {
    pub unit_id: String,
    pub decision: Decision,
    /// Set when the gate chose the decision itself (no answer received).
    pub note: Option<String>,
    pub decided_at: DateTime<Utc>,
}

/// Where decisions come from. `Ok(None)` means no answer.
#[async_trait]
pub trait DecisionSource: Send {
    async fn decision_for(&mut self, unit: &ChangeUnit) -> Result<Option<Decision>>;
}

pub struct ApprovalGate {
    source: Box<dyn DecisionSource>,
    records: BTreeMap<String, DecisionRecord>,
    order: Vec<String>,
}

impl ApprovalGate {
    pub fn new(source: Box<dyn DecisionSource>) -> Self {
        Self {
            source,
            records: BTreeMap::new(),
            order: Vec::new(),
        }
    }

    /// Ask the source about `unit` and record the answer.
    ///
    /// # Errors
    ///
    /// `DecisionAlreadyRecorded` if `unit` was already decided in this run.
    pub async fn decide(&mut self, unit: &ChangeUnit) -> Result<Decision> {
        if self.records.contains_key(&unit.id) {
            return Err(RemediateError::DecisionAlreadyRecorded(unit.id.clone()));
        }
        let (decision, note) = match self.source.decision_for(unit).await? {
            Some(d) => (d, None),
            None => (Decision::Rejected, Some("no decision received".to_string())),
        };
        self.record(&unit.id, decision, note)?;
        tracing::info!(event = "unit.decided", unit_id = %unit.id, decision = ?decision);
        Ok(decision)
    }

    /// Record a decision directly.
    pub fn record(&mut self, unit_id: &str, decision: Decision, note: Option<String>) -> Result<()> {
        if self.records.contains_key(unit_id) {
            return Err(RemediateError::DecisionAlreadyRecorded(unit_id.to_string()));
        }
        self.records.insert(
            unit_id.to_string(),
            DecisionRecord {
                unit_id: unit_id.to_string(),
                decision,
                note,
                decided_at: Utc::now(),
            },
        );
        self.order.push(unit_id.to_string());
        Ok(())
    }

    pub fn decision(&self, unit_id: &str) -> Option<&DecisionRecord> {
        self.records.get(unit_id)
    }

    /// Only an explicit approval counts.
    pub fn is_approved(&self, unit_id: &str) -> bool {
        self.records
            .get(unit_id)
            .is_some_and(|r| r.decision == Decision::Approved)
    }

    /// Records in the order they were made.
    pub fn records(&self) -> Vec<&DecisionRecord> {
        self.order.iter().filter_map(|id| self.records.get(id)).collect()
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Fixed map of unit id to decision, e.g. loaded from a decisions file.
#[derive(Debug, Clone, Default)]
pub struct StaticDecisions {
    decisions: HashMap<String, Decision>,
}

impl StaticDecisions {
    pub fn new<I, S>(decisions: I) -> Self
    where
        I: IntoIterator<Item = (S, Decision)>,
        S: Into<String>,
    {
        Self {
            decisions: decisions.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Load a JSON object `{"unit-id": "approved" | "rejected" | "deferred"}`.
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Ok(Self {
            decisions: serde_json::from_slice(&bytes)?,
        })
    }
}

#[async_trait]
impl DecisionSource for StaticDecisions {
    async fn decision_for(&mut self, unit: &ChangeUnit) -> Result<Option<Decision>> {
        Ok(self.decisions.get(&unit.id).copied())
    }
}

/// Sending half of a [`ChannelDecisions`].
#[derive(Debug, Clone)]
pub struct DecisionSender {
    tx: mpsc::Sender<(String, Decision)>,
}

impl DecisionSender {
    pub async fn send(&self, unit_id: impl Into<String>, decision: Decision) -> Result<()> {
        self.tx
            .send((unit_id.into(), decision))
            .await
            .map_err(|_| RemediateError::Collaborator("decision channel closed".to_string()))
    }
}

/// Typed decision channel. Waits for the decision addressed to the unit
/// being gated; decisions for other units are held until asked for.
pub struct ChannelDecisions {
    rx: mpsc::Receiver<(String, Decision)>,
    early: HashMap<String, Decision>,
    wait: Option<Duration>,
}

impl ChannelDecisions {
    pub fn channel(buffer: usize) -> (DecisionSender, Self) {
        let (tx, rx) = mpsc::channel(buffer);
        (
            DecisionSender { tx },
            Self {
                rx,
                early: HashMap::new(),
                wait: None,
            },
        )
    }

    /// Give up on a unit after `wait`; the gate then records a rejection.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    async fn next_for(&mut self, unit_id: &str) -> Option<Decision> {
        loop {
            let (id, decision) = self.rx.recv().await?;
            if id == unit_id {
                return Some(decision);
            }
            self.early.entry(id).or_insert(decision);
        }
    }
}

#[async_trait]
impl DecisionSource for ChannelDecisions {
    async fn decision_for(&mut self, unit: &ChangeUnit) -> Result<Option<Decision>> {
        if let Some(d) = self.early.remove(&unit.id) {
            return Ok(Some(d));
        }
        match self.wait {
            Some(wait) => Ok(tokio::time::timeout(wait, self.next_for(&unit.id))
                .await
                .ok()
                .flatten()),
            None => Ok(self.next_for(&unit.id).await),
        }
    }
}

/// Prompts on stderr and reads `a`/`r`/`d` from stdin.
pub struct ConsoleDecisions {
    stdin: BufReader<tokio::io::Stdin>,
}

impl ConsoleDecisions {
    pub fn new() -> Self {
        Self {
            stdin: BufReader::new(tokio::io::stdin()),
        }
    }
}

impl Default for ConsoleDecisions {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DecisionSource for ConsoleDecisions {
    async fn decision_for(&mut self, unit: &ChangeUnit) -> Result<Option<Decision>> {
        let files = unit
            .target_files
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let prompt = format!(
            "\n[{}] {} ({})\n  files: {}\n  {}\napprove / reject / defer? [a/r/d] ",
            unit.id, unit.title, unit.severity, files, unit.rationale
        );
        let mut stderr = tokio::io::stderr();
        stderr.write_all(prompt.as_bytes()).await?;
        stderr.flush().await?;

        let mut line = String::new();
        let read = self.stdin.read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        Ok(match line.trim().to_lowercase().as_str() {
            "a" | "approve" | "y" | "yes" => Some(Decision::Approved),
            "r" | "reject" | "n" | "no" => Some(Decision::Rejected),
            "d" | "defer" => Some(Decision::Deferred),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Severity;
    use serde_json::json;
    use std::path::PathBuf;

    fn unit(id: &str) -> ChangeUnit {
        ChangeUnit::new(id, "t", Severity::Medium, vec![PathBuf::from("a.py")], json!([]))
    }

    #[tokio::test]
    async fn missing_answer_is_recorded_as_rejection() {
        let mut gate = ApprovalGate::new(Box::new(StaticDecisions::default()));
        let d = gate.decide(&unit("CU-1")).await.unwrap();
        assert_eq!(d, Decision::Rejected);
        assert!(!gate.is_approved("CU-1"));
        assert!(gate.decision("CU-1").unwrap().note.is_some());
    }

    #[tokio::test]
    async fn decisions_are_immutable() {
        let source = StaticDecisions::new([("CU-1", Decision::Approved)]);
        let mut gate = ApprovalGate::new(Box::new(source));
        gate.decide(&unit("CU-1")).await.unwrap();

        let err = gate.decide(&unit("CU-1")).await.unwrap_err();
        assert!(matches!(err, RemediateError::DecisionAlreadyRecorded(_)));
        let err = gate.record("CU-1", Decision::Rejected, None).unwrap_err();
        assert!(matches!(err, RemediateError::DecisionAlreadyRecorded(_)));
        assert!(gate.is_approved("CU-1"));
    }

    #[tokio::test]
    async fn channel_holds_out_of_order_decisions() {
        let (tx, source) = ChannelDecisions::channel(8);
        tx.send("CU-2", Decision::Deferred).await.unwrap();
        tx.send("CU-1", Decision::Approved).await.unwrap();

        let mut gate = ApprovalGate::new(Box::new(source));
        assert_eq!(gate.decide(&unit("CU-1")).await.unwrap(), Decision::Approved);
        assert_eq!(gate.decide(&unit("CU-2")).await.unwrap(), Decision::Deferred);
        let order: Vec<_> = gate.records().iter().map(|r| r.unit_id.clone()).collect();
        assert_eq!(order, vec!["CU-1", "CU-2"]);
    }

    #[tokio::test]
    async fn closed_channel_means_no_answer() {
        let (tx, source) = ChannelDecisions::channel(1);
        drop(tx);
        let mut gate = ApprovalGate::new(Box::new(source));
        assert_eq!(gate.decide(&unit("CU-1")).await.unwrap(), Decision::Rejected);
    }

    #[tokio::test(start_paused = true)]
    async fn channel_wait_expires_to_rejection() {
        let (_tx, source) = ChannelDecisions::channel(1);
        let mut gate = ApprovalGate::new(Box::new(source.with_wait(Duration::from_secs(30))));
        assert_eq!(gate.decide(&unit("CU-1")).await.unwrap(), Decision::Rejected);
    }

    #[test]
    fn decisions_file_parses() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("decisions.json");
        std::fs::write(&path, r#"{"CU-1": "approved", "CU-2": "deferred"}"#).unwrap();
        let source = StaticDecisions::from_file(&path).unwrap();
        assert_eq!(source.decisions.get("CU-2"), Some(&Decision::Deferred));
    }
}
