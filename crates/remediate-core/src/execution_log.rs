//! Append-only record of what happened to each unit.
//!
//! One JSON object per line. Every append is flushed and synced before the
//! orchestrator moves to the next unit, so a crash never loses a finished
//! outcome. Together with the baseline checkpoint the log is enough to
//! rebuild the workspace as it stood after any entry.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cas::CasStore;
use crate::domain::{ExecutionStatus, RemediateError, Result, TestSummary};
use crate::executor::{ExecutionOutcome, FileChange};
use crate::workspace::{resolve_in_root, Manifest};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position in the log, starting at 0.
    pub seq: u64,
    pub run_id: String,
    pub unit_id: String,
    pub action: ExecutionStatus,
    #[serde(default)]
    pub applied: bool,
    #[serde(default)]
    pub test: Option<TestSummary>,
    #[serde(default)]
    pub failing_tests: Vec<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub files: Vec<FileChange>,
    pub recorded_at: DateTime<Utc>,
}

/// Exclusively owned by the orchestrator; nothing else appends.
#[derive(Debug)]
pub struct ExecutionLog {
    run_id: String,
    path: Option<PathBuf>,
    file: Option<File>,
    entries: Vec<LogEntry>,
}

impl ExecutionLog {
    pub fn in_memory(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            path: None,
            file: None,
            entries: Vec::new(),
        }
    }

    /// Create a new log file at `path`. Fails if one already exists.
    pub fn create(path: &Path, run_id: impl Into<String>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create_new(true)
            .append(true)
            .open(path)?;
        Ok(Self {
            run_id: run_id.into(),
            path: Some(path.to_path_buf()),
            file: Some(file),
            entries: Vec::new(),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record `outcome` durably and return the stored entry.
    pub fn append(&mut self, outcome: &ExecutionOutcome) -> Result<&LogEntry> {
        let entry = LogEntry {
            seq: self.entries.len() as u64,
            run_id: self.run_id.clone(),
            unit_id: outcome.unit_id.clone(),
            action: outcome.status,
            applied: outcome.applied,
            test: outcome.test.clone(),
            failing_tests: outcome.failing_tests.clone(),
            reason: outcome.reason.clone(),
            files: outcome.files.clone(),
            recorded_at: Utc::now(),
        };

        if let Some(file) = self.file.as_mut() {
            let mut line = serde_json::to_vec(&entry)?;
            line.push(b'\n');
            file.write_all(&line)?;
            file.sync_data()?;
        }

        tracing::debug!(seq = entry.seq, unit_id = %entry.unit_id, action = %entry.action, "log entry appended");
        self.entries.push(entry);
        Ok(&self.entries[self.entries.len() - 1])
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Read a log written by [`append`](Self::append).
    ///
    /// # Errors
    ///
    /// `CorruptLog` if a line does not parse, sequence numbers are not
    /// contiguous from 0, or entries name different runs.
    pub fn load(path: &Path) -> Result<Vec<LogEntry>> {
        let reader = BufReader::new(File::open(path)?);
        let mut entries: Vec<LogEntry> = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: LogEntry =
                serde_json::from_str(&line).map_err(|e| RemediateError::CorruptLog {
                    line: idx + 1,
                    reason: e.to_string(),
                })?;
            if entry.seq != entries.len() as u64 {
                return Err(RemediateError::CorruptLog {
                    line: idx + 1,
                    reason: format!("expected seq {}, found {}", entries.len(), entry.seq),
                });
            }
            if let Some(first) = entries.first() {
                if first.run_id != entry.run_id {
                    return Err(RemediateError::CorruptLog {
                        line: idx + 1,
                        reason: format!("entry from run {} in log of run {}", entry.run_id, first.run_id),
                    });
                }
            }
            entries.push(entry);
        }
        Ok(entries)
    }
}

/// Workspace content after the first `upto` entries (all when `None`),
/// starting from the baseline manifest. Only verified entries change it.
pub fn manifest_at(baseline: &Manifest, entries: &[LogEntry], upto: Option<u64>) -> Manifest {
    let mut manifest = baseline.clone();
    for entry in entries
        .iter()
        .take_while(|e| upto.map_or(true, |n| e.seq < n))
        .filter(|e| e.action == ExecutionStatus::Verified)
    {
        for change in &entry.files {
            manifest.insert(change.path.clone(), change.after);
        }
    }
    manifest
}

/// Write every present file of `manifest` under `dest` from `blobs`.
pub fn materialize(blobs: &dyn CasStore, manifest: &Manifest, dest: &Path) -> Result<usize> {
    let mut written = 0;
    for (rel, digest) in manifest {
        let Some(digest) = digest else { continue };
        let abs = resolve_in_root(dest, rel)?;
        if let Some(parent) = abs.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&abs, blobs.get(digest)?)?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::fs::FsCasStore;
    use crate::cas::Digest;

    fn outcome(id: &str, status: ExecutionStatus, files: Vec<FileChange>) -> ExecutionOutcome {
        ExecutionOutcome {
            unit_id: id.to_string(),
            status,
            applied: status != ExecutionStatus::Failed,
            reason: None,
            failing_tests: Vec::new(),
            test: None,
            files,
        }
    }

    #[test]
    fn append_then_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run/log.jsonl");
        let mut log = ExecutionLog::create(&path, "run-1").unwrap();
        log.append(&outcome("CU-1", ExecutionStatus::Verified, vec![])).unwrap();
        log.append(&outcome("CU-2", ExecutionStatus::Reverted, vec![])).unwrap();

        let loaded = ExecutionLog::load(&path).unwrap();
        assert_eq!(loaded, log.entries());
        assert_eq!(loaded[1].seq, 1);
        assert_eq!(loaded[1].unit_id, "CU-2");
    }

    #[test]
    fn create_refuses_existing_log() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        ExecutionLog::create(&path, "a").unwrap();
        assert!(ExecutionLog::create(&path, "b").is_err());
    }

    #[test]
    fn load_rejects_gap_in_sequence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.jsonl");
        let mut log = ExecutionLog::in_memory("r");
        log.append(&outcome("CU-1", ExecutionStatus::Verified, vec![])).unwrap();
        let mut entry = log.entries()[0].clone();
        entry.seq = 3;
        std::fs::write(&path, format!("{}\n", serde_json::to_string(&entry).unwrap())).unwrap();

        let err = ExecutionLog::load(&path).unwrap_err();
        assert!(matches!(err, RemediateError::CorruptLog { line: 1, .. }));
    }

    #[test]
    fn manifest_at_only_follows_verified_entries() {
        let a0 = Digest::compute(b"a0");
        let a1 = Digest::compute(b"a1");
        let a2 = Digest::compute(b"a2");
        let baseline: Manifest = [(PathBuf::from("a.py"), Some(a0))].into_iter().collect();

        let mut log = ExecutionLog::in_memory("r");
        let change = |after| FileChange {
            path: PathBuf::from("a.py"),
            before: Some(a0),
            after: Some(after),
        };
        log.append(&outcome("CU-1", ExecutionStatus::Verified, vec![change(a1)])).unwrap();
        log.append(&outcome("CU-2", ExecutionStatus::Reverted, vec![change(a2)])).unwrap();

        assert_eq!(manifest_at(&baseline, log.entries(), Some(0))[&PathBuf::from("a.py")], Some(a0));
        assert_eq!(manifest_at(&baseline, log.entries(), None)[&PathBuf::from("a.py")], Some(a1));
    }

    #[test]
    fn materialize_writes_blobs() {
        let store_dir = tempfile::tempdir().unwrap();
        let cas = FsCasStore::open(store_dir.path()).unwrap();
        let digest = cas.put(b"print('hi')\n").unwrap();
        let manifest: Manifest = [
            (PathBuf::from("pkg/m.py"), Some(digest)),
            (PathBuf::from("gone.py"), None),
        ]
        .into_iter()
        .collect();

        let dest = tempfile::tempdir().unwrap();
        assert_eq!(materialize(&cas, &manifest, dest.path()).unwrap(), 1);
        assert_eq!(std::fs::read(dest.path().join("pkg/m.py")).unwrap(), b"print('hi')\n");
        assert!(!dest.path().join("gone.py").exists());
    }
}
