//! Plain-directory workspace for trees without version control.
//!
//! Committed state is a digest manifest stored in the state directory.
//! Until a baseline is adopted there is nothing to compare against, so a
//! fresh directory is never dirty.

use std::path::{Path, PathBuf};

use crate::cas::fs::FsCasStore;
use crate::cas::CasStore;
use crate::domain::Result;

use super::{Checkpoint, CheckpointStore, Manifest, VersionControl};

const MANIFEST_FILE: &str = "manifest.json";

pub struct DirWorkspace {
    root: PathBuf,
    state_dir: PathBuf,
    checkpoints: CheckpointStore,
}

impl DirWorkspace {
    pub fn open(root: &Path, state_dir: &Path) -> Result<Self> {
        let root = root.canonicalize()?;
        std::fs::create_dir_all(state_dir)?;
        let state_dir = state_dir.canonicalize()?;
        let cas = FsCasStore::open(&state_dir)?;
        Ok(Self {
            checkpoints: CheckpointStore::new(&root, cas),
            root,
            state_dir,
        })
    }

    fn manifest_path(&self) -> PathBuf {
        self.state_dir.join(MANIFEST_FILE)
    }

    fn load_manifest(&self) -> Result<Option<Manifest>> {
        match std::fs::read(self.manifest_path()) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn current_manifest(&self) -> Result<Manifest> {
        self.checkpoints.digests(&self.tracked_files()?)
    }

    fn write_manifest(&self, manifest: &Manifest) -> Result<()> {
        let json = serde_json::to_vec_pretty(manifest)?;
        std::fs::write(self.manifest_path(), json)?;
        Ok(())
    }

    fn walk(&self, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
        for entry in std::fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path == self.state_dir || entry.file_name() == ".git" {
                continue;
            }
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                self.walk(&path, out)?;
            } else if file_type.is_file() {
                if let Ok(rel) = path.strip_prefix(&self.root) {
                    out.push(rel.to_path_buf());
                }
            }
        }
        Ok(())
    }
}

impl VersionControl for DirWorkspace {
    fn root(&self) -> &Path {
        &self.root
    }

    fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    fn tracked_files(&self) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        self.walk(&self.root, &mut files)?;
        files.sort();
        Ok(files)
    }

    fn dirty_paths(&self) -> Result<Vec<PathBuf>> {
        let Some(committed) = self.load_manifest()? else {
            return Ok(Vec::new());
        };
        let current = self.checkpoints.digests(&self.tracked_files()?)?;

        let mut dirty: Vec<PathBuf> = current
            .iter()
            .filter(|(path, digest)| committed.get(*path) != Some(*digest))
            .map(|(path, _)| path.clone())
            .collect();
        dirty.extend(
            committed
                .iter()
                .filter(|(path, digest)| digest.is_some() && !current.contains_key(*path))
                .map(|(path, _)| path.clone()),
        );
        dirty.sort();
        Ok(dirty)
    }

    fn snapshot(&self, paths: &[PathBuf]) -> Result<Checkpoint> {
        self.checkpoints.snapshot(paths)
    }

    fn restore(&self, checkpoint: &Checkpoint) -> Result<()> {
        self.checkpoints.restore(checkpoint)
    }

    /// Only `paths` move into the committed manifest; edits elsewhere stay dirty.
    fn commit(&self, paths: &[PathBuf], message: &str) -> Result<()> {
        tracing::debug!(files = paths.len(), message, "recording directory manifest");
        let mut manifest = match self.load_manifest()? {
            Some(manifest) => manifest,
            None => self.current_manifest()?,
        };
        for (path, digest) in self.checkpoints.digests(paths)? {
            match digest {
                Some(_) => {
                    manifest.insert(path, digest);
                }
                None => {
                    manifest.remove(&path);
                }
            }
        }
        self.write_manifest(&manifest)
    }

    fn adopt_baseline(&self) -> Result<()> {
        if self.load_manifest()?.is_none() {
            self.write_manifest(&self.current_manifest()?)?;
        }
        Ok(())
    }

    fn blobs(&self) -> &dyn CasStore {
        self.checkpoints.cas()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workspace() -> (tempfile::TempDir, DirWorkspace) {
        let root = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(root.path().join("src")).unwrap();
        std::fs::write(root.path().join("src/lib.rs"), "pub fn f() {}\n").unwrap();
        std::fs::write(root.path().join("README.md"), "# demo\n").unwrap();
        let ws = DirWorkspace::open(root.path(), &root.path().join(".remediate")).unwrap();
        (root, ws)
    }

    #[test]
    fn tracked_files_skip_state_dir() {
        let (_root, ws) = workspace();
        ws.adopt_baseline().unwrap();
        assert_eq!(
            ws.tracked_files().unwrap(),
            vec![PathBuf::from("README.md"), PathBuf::from("src/lib.rs")]
        );
    }

    #[test]
    fn fresh_directory_is_clean() {
        let (_root, ws) = workspace();
        assert!(ws.dirty_paths().unwrap().is_empty());
    }

    #[test]
    fn edits_after_baseline_are_dirty() {
        let (root, ws) = workspace();
        ws.adopt_baseline().unwrap();
        std::fs::write(root.path().join("src/lib.rs"), "pub fn g() {}\n").unwrap();
        std::fs::remove_file(root.path().join("README.md")).unwrap();
        std::fs::write(root.path().join("extra.txt"), "x").unwrap();

        assert_eq!(
            ws.dirty_paths().unwrap(),
            vec![
                PathBuf::from("README.md"),
                PathBuf::from("extra.txt"),
                PathBuf::from("src/lib.rs"),
            ]
        );
    }

    #[test]
    fn commit_clears_dirty_state() {
        let (root, ws) = workspace();
        ws.adopt_baseline().unwrap();
        std::fs::write(root.path().join("src/lib.rs"), "pub fn g() {}\n").unwrap();
        ws.commit(&[PathBuf::from("src/lib.rs")], "remediate: CU-1").unwrap();
        assert!(ws.dirty_paths().unwrap().is_empty());
    }

    #[test]
    fn commit_records_only_the_named_paths() {
        let (root, ws) = workspace();
        ws.adopt_baseline().unwrap();
        std::fs::write(root.path().join("src/lib.rs"), "pub fn g() {}\n").unwrap();
        std::fs::write(root.path().join("README.md"), "# edited elsewhere\n").unwrap();

        ws.commit(&[PathBuf::from("src/lib.rs")], "remediate: CU-1").unwrap();

        assert_eq!(ws.dirty_paths().unwrap(), vec![PathBuf::from("README.md")]);
    }

    #[test]
    fn committing_a_deleted_path_drops_it_from_the_manifest() {
        let (root, ws) = workspace();
        ws.adopt_baseline().unwrap();
        std::fs::remove_file(root.path().join("README.md")).unwrap();

        ws.commit(&[PathBuf::from("README.md")], "remediate: CU-2").unwrap();

        assert!(ws.dirty_paths().unwrap().is_empty());
    }
}
