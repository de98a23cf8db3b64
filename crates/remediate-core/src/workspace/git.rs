//! Git-backed workspace.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::cas::fs::FsCasStore;
use crate::cas::CasStore;
use crate::domain::{RemediateError, Result};

use super::{Checkpoint, CheckpointStore, VersionControl};

fn git(dir: &Path, args: &[&str]) -> Result<Vec<u8>> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| RemediateError::GitError(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(RemediateError::GitError(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }
    Ok(output.stdout)
}

/// Capture the HEAD commit SHA from a git repository.
pub fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    let out = git(repo_dir, &["rev-parse", "HEAD"])?;
    let sha = String::from_utf8_lossy(&out).trim().to_string();
    if sha.is_empty() {
        return Err(RemediateError::GitError(
            "git rev-parse HEAD returned empty output".to_string(),
        ));
    }
    Ok(sha)
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--is-inside-work-tree"])
        .current_dir(dir)
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Parse `git status --porcelain=v1 -z` output into changed paths.
fn parse_porcelain_z(raw: &[u8]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    let mut records = raw.split(|b| *b == 0).filter(|r| !r.is_empty());
    while let Some(record) = records.next() {
        if record.len() < 4 {
            continue;
        }
        let status = &record[..2];
        let path = String::from_utf8_lossy(&record[3..]).to_string();
        paths.push(PathBuf::from(path));
        // Renames and copies carry the original path as a second record.
        if matches!(status[0], b'R' | b'C') {
            records.next();
        }
    }
    paths
}

/// Workspace backed by a git work tree. Checkpoint blobs live under the
/// state directory, by default `<git-dir>/remediate`, so they never show up
/// as working-tree changes.
pub struct GitWorkspace {
    root: PathBuf,
    state_dir: PathBuf,
    checkpoints: CheckpointStore,
}

impl GitWorkspace {
    pub fn open(root: &Path, state_dir: Option<&Path>) -> Result<Self> {
        let toplevel = git(root, &["rev-parse", "--show-toplevel"])?;
        let root = PathBuf::from(String::from_utf8_lossy(&toplevel).trim());
        let state_dir = match state_dir {
            Some(dir) => dir.to_path_buf(),
            None => {
                let git_dir = git(&root, &["rev-parse", "--absolute-git-dir"])?;
                PathBuf::from(String::from_utf8_lossy(&git_dir).trim()).join("remediate")
            }
        };
        let cas = FsCasStore::open(&state_dir)?;
        Ok(Self {
            checkpoints: CheckpointStore::new(&root, cas),
            root,
            state_dir,
        })
    }
}

impl VersionControl for GitWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn tracked_files(&self) -> Result<Vec<PathBuf>> {
        let out = git(&self.root, &["ls-files", "-z"])?;
        Ok(out
            .split(|b| *b == 0)
            .filter(|r| !r.is_empty())
            .map(|r| PathBuf::from(String::from_utf8_lossy(r).to_string()))
            .collect())
    }

    fn dirty_paths(&self) -> Result<Vec<PathBuf>> {
        let out = git(
            &self.root,
            &["status", "--porcelain=v1", "-z", "--untracked-files=no"],
        )?;
        Ok(parse_porcelain_z(&out))
    }

    fn snapshot(&self, paths: &[PathBuf]) -> Result<Checkpoint> {
        self.checkpoints.snapshot(paths)
    }

    fn restore(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints.restore(checkpoint)
    }

    /// Stage and commit `paths`. If the commit does not land, the paths are
    /// unstaged again so the index still matches HEAD.
    fn commit(&self, paths: &[PathBuf], message: &str) -> Result<()> {
        let paths: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        let with_paths = |head: &[&'static str]| -> Vec<String> {
            head.iter()
                .map(|s| s.to_string())
                .chain(paths.iter().cloned())
                .collect()
        };

        let add = with_paths(&["add", "-A", "--"]);
        let add: Vec<&str> = add.iter().map(String::as_str).collect();
        git(&self.root, &add)?;

        let committed = git(
            &self.root,
            &["commit", "--no-verify", "--allow-empty", "-q", "-m", message],
        );
        if let Err(e) = committed {
            let reset = with_paths(&["reset", "-q", "--"]);
            let reset: Vec<&str> = reset.iter().map(String::as_str).collect();
            if let Err(unstage) = git(&self.root, &reset) {
                tracing::error!(error = %unstage, "failed to unstage after commit failure");
                return Err(RemediateError::GitError(format!(
                    "{e}; unstage also failed: {unstage}"
                )));
            }
            return Err(e);
        }
        Ok(())
    }

    fn blobs(&self) -> &dyn CasStore {
        self.checkpoints.cas()
    }
}
