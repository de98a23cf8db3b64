//! Mutation payload appliers.
//!
//! The orchestrator treats a unit's payload as opaque and hands it to an
//! [`Applier`]. [`FileEditApplier`] understands a JSON list of file edits.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cas::Digest;
use crate::domain::ChangeUnit;
use crate::workspace::resolve_in_root;

/// Errors raised while applying a payload.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// The payload does not apply cleanly to the current content.
    #[error("{0}")]
    Rejected(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Applies a unit's payload to its target files under `root`.
///
/// Implementations must not touch files outside `unit.target_files`.
pub trait Applier: Send + Sync {
    fn apply(&self, root: &Path, unit: &ChangeUnit) -> Result<(), ApplyError>;
}

/// One edit in a [`FileEditApplier`] payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FileEdit {
    /// Overwrite (or create) the file.
    Write {
        path: PathBuf,
        contents: String,
        #[serde(default)]
        expected_digest: Option<Digest>,
    },
    /// Create a file that must not exist yet.
    Create { path: PathBuf, contents: String },
    /// Replace exactly one occurrence of `find`.
    Replace {
        path: PathBuf,
        find: String,
        replace: String,
        #[serde(default)]
        expected_digest: Option<Digest>,
    },
    Delete {
        path: PathBuf,
        #[serde(default)]
        expected_digest: Option<Digest>,
    },
}

impl FileEdit {
    fn path(&self) -> &Path {
        match self {
            FileEdit::Write { path, .. }
            | FileEdit::Create { path, .. }
            | FileEdit::Replace { path, .. }
            | FileEdit::Delete { path, .. } => path,
        }
    }

    fn expected_digest(&self) -> Option<Digest> {
        match self {
            FileEdit::Write {
                expected_digest, ..
            }
            | FileEdit::Replace {
                expected_digest, ..
            }
            | FileEdit::Delete {
                expected_digest, ..
            } => *expected_digest,
            FileEdit::Create { .. } => None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EditsWire {
    List(Vec<FileEdit>),
    Wrapped { edits: Vec<FileEdit> },
}

/// Parse a payload as a list of edits (bare array or `{"edits": [...]}`).
pub fn parse_edits(payload: &serde_json::Value) -> Result<Vec<FileEdit>, ApplyError> {
    let wire: EditsWire = serde_json::from_value(payload.clone())
        .map_err(|e| ApplyError::Rejected(format!("payload is not a file edit list: {e}")))?;
    Ok(match wire {
        EditsWire::List(edits) | EditsWire::Wrapped { edits } => edits,
    })
}

/// Applies JSON file edits. Every edit is validated against in-memory
/// content first; nothing is written unless all of them apply.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileEditApplier;

impl FileEditApplier {
    fn stage(
        root: &Path,
        unit: &ChangeUnit,
        edits: &[FileEdit],
    ) -> Result<BTreeMap<PathBuf, Option<Vec<u8>>>, ApplyError> {
        let mut staged: BTreeMap<PathBuf, Option<Vec<u8>>> = BTreeMap::new();

        for edit in edits {
            let rel = edit.path();
            if !unit.target_files.iter().any(|t| t == rel) {
                return Err(ApplyError::Rejected(format!(
                    "{} is not a target file of {}",
                    rel.display(),
                    unit.id
                )));
            }
            let abs = resolve_in_root(root, rel).map_err(|e| ApplyError::Rejected(e.to_string()))?;

            let current = match staged.get(rel) {
                Some(content) => content.clone(),
                None => match std::fs::read(&abs) {
                    Ok(bytes) => Some(bytes),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                    Err(e) => return Err(e.into()),
                },
            };

            if let Some(expected) = edit.expected_digest() {
                let actual = current.as_deref().map(Digest::compute);
                if actual != Some(expected) {
                    return Err(ApplyError::Rejected(format!(
                        "{} no longer matches the content the change was drafted against",
                        rel.display()
                    )));
                }
            }

            let next = match edit {
                FileEdit::Write { contents, .. } => Some(contents.as_bytes().to_vec()),
                FileEdit::Create { contents, .. } => {
                    if current.is_some() {
                        return Err(ApplyError::Rejected(format!(
                            "{} already exists",
                            rel.display()
                        )));
                    }
                    Some(contents.as_bytes().to_vec())
                }
                FileEdit::Replace { find, replace, .. } => {
                    let Some(bytes) = current else {
                        return Err(ApplyError::Rejected(format!(
                            "{} does not exist",
                            rel.display()
                        )));
                    };
                    let text = String::from_utf8(bytes).map_err(|_| {
                        ApplyError::Rejected(format!("{} is not valid UTF-8", rel.display()))
                    })?;
                    let count = text.matches(find.as_str()).count();
                    if count != 1 {
                        return Err(ApplyError::Rejected(format!(
                            "expected exactly one match in {}, found {count}",
                            rel.display()
                        )));
                    }
                    Some(text.replacen(find.as_str(), replace, 1).into_bytes())
                }
                FileEdit::Delete { .. } => {
                    if current.is_none() {
                        return Err(ApplyError::Rejected(format!(
                            "{} does not exist",
                            rel.display()
                        )));
                    }
                    None
                }
            };
            staged.insert(rel.to_path_buf(), next);
        }
        Ok(staged)
    }
}

impl Applier for FileEditApplier {
    fn apply(&self, root: &Path, unit: &ChangeUnit) -> Result<(), ApplyError> {
        let edits = parse_edits(&unit.payload)?;
        if edits.is_empty() {
            return Err(ApplyError::Rejected(format!("{} has no edits", unit.id)));
        }
        let staged = Self::stage(root, unit, &edits)?;

        for (rel, content) in staged {
            let abs = root.join(&rel);
            match content {
                Some(bytes) => {
                    if let Some(parent) = abs.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&abs, bytes)?;
                }
                None => std::fs::remove_file(&abs)?,
            }
        }
        Ok(())
    }
}
