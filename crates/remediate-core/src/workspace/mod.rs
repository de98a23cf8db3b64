//! Version-control primitives the guard and executor rely on.
//!
//! Any backend that can snapshot a named set of files, restore them, detect
//! a dirty working copy and advance its committed state is substitutable.
//! Two backends ship: [`GitWorkspace`] and [`DirWorkspace`].

pub mod dir;
pub mod git;
pub mod guard;

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::cas::fs::FsCasStore;
use crate::cas::{CasStore, Digest};
use crate::domain::{RemediateError, Result};

pub use dir::DirWorkspace;
pub use git::{capture_head_sha, is_git_repo, GitWorkspace};
pub use guard::{Baseline, WorkspaceGuard};

/// Path (relative to the workspace root) to content digest.
/// `None` means the file did not exist.
pub type Manifest = BTreeMap<PathBuf, Option<Digest>>;

/// Recoverable snapshot of a named set of files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub entries: Manifest,
}

impl Checkpoint {
    pub fn paths(&self) -> Vec<PathBuf> {
        self.entries.keys().cloned().collect()
    }

    pub fn digest_of(&self, path: &Path) -> Option<Digest> {
        self.entries.get(path).copied().flatten()
    }
}

/// Backend-neutral version-control operations.
pub trait VersionControl: Send + Sync {
    fn root(&self) -> &Path;

    /// Where checkpoint blobs, logs and reports are kept.
    fn state_dir(&self) -> &Path;

    /// Every file under version control, relative to [`root`](Self::root).
    fn tracked_files(&self) -> Result<Vec<PathBuf>>;

    /// Tracked files that differ from the last committed state.
    fn dirty_paths(&self) -> Result<Vec<PathBuf>>;

    /// Capture the current content of `paths` (absent files included).
    fn snapshot(&self, paths: &[PathBuf]) -> Result<Checkpoint>;

    /// Put every file in `checkpoint` back to its captured content.
    fn restore(&self, checkpoint: &Checkpoint) -> Result<()>;

    /// Record the current content of `paths` as committed.
    fn commit(&self, paths: &[PathBuf], message: &str) -> Result<()>;

    /// Called once a baseline has been accepted. Backends without their own
    /// history use it to pin the state later dirty checks compare against.
    fn adopt_baseline(&self) -> Result<()> {
        Ok(())
    }

    /// Blob storage holding checkpoint content.
    fn blobs(&self) -> &dyn CasStore;
}

/// Pick [`GitWorkspace`] when `root` is inside a git work tree, otherwise
/// fall back to [`DirWorkspace`].
pub fn open_workspace(
    root: &Path,
    state_dir: Option<&Path>,
) -> Result<Box<dyn VersionControl>> {
    if is_git_repo(root) {
        Ok(Box::new(GitWorkspace::open(root, state_dir)?))
    } else {
        let state_dir = state_dir
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.join(".remediate"));
        Ok(Box::new(DirWorkspace::open(root, &state_dir)?))
    }
}

/// Reject absolute paths and `..` so targets cannot escape the root.
pub fn resolve_in_root(root: &Path, relative: &Path) -> Result<PathBuf> {
    let escapes = relative.is_absolute()
        || relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_) | Component::RootDir));
    if escapes || relative.as_os_str().is_empty() {
        return Err(RemediateError::Config(format!(
            "path {} must be relative to the workspace root",
            relative.display()
        )));
    }
    Ok(root.join(relative))
}

/// Snapshot/restore over a blob store, shared by both backends.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    root: PathBuf,
    cas: FsCasStore,
}

impl CheckpointStore {
    pub fn new(root: impl Into<PathBuf>, cas: FsCasStore) -> Self {
        Self {
            root: root.into(),
            cas,
        }
    }

    pub fn cas(&self) -> &FsCasStore {
        &self.cas
    }

    /// Digests of `paths` without storing content.
    pub fn digests(&self, paths: &[PathBuf]) -> Result<Manifest> {
        let mut manifest = Manifest::new();
        for rel in paths {
            let abs = resolve_in_root(&self.root, rel)?;
            manifest.insert(rel.clone(), Digest::of_file(&abs)?);
        }
        Ok(manifest)
    }

    pub fn snapshot(&self, paths: &[PathBuf]) -> Result<Checkpoint> {
        let mut entries = Manifest::new();
        for rel in paths {
            let abs = resolve_in_root(&self.root, rel)?;
            let digest = match std::fs::read(&abs) {
                Ok(bytes) => Some(self.cas.put(&bytes)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
                Err(e) => return Err(e.into()),
            };
            entries.insert(rel.clone(), digest);
        }
        Ok(Checkpoint {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            entries,
        })
    }

    pub fn restore(&self, checkpoint: &Checkpoint) -> Result<()> {
        for (rel, digest) in &checkpoint.entries {
            let abs = resolve_in_root(&self.root, rel)?;
            match digest {
                Some(d) => {
                    if Digest::of_file(&abs)? == Some(*d) {
                        continue;
                    }
                    let bytes = self.cas.get(d)?;
                    if let Some(parent) = abs.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&abs, bytes)?;
                }
                None => match std::fs::remove_file(&abs) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                },
            }
        }
        tracing::debug!(checkpoint = %checkpoint.id, files = checkpoint.entries.len(), "checkpoint restored");
        Ok(())
    }
}
