//! `remediate.toml` configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::collaborators::CollaboratorCommand;
use crate::domain::{RemediateError, Result};
use crate::oracle::OracleConfig;

pub const CONFIG_FILE: &str = "remediate.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemediateConfig {
    pub oracle: OracleConfig,
    /// Blob store, logs and reports. Backend default when unset.
    pub state_dir: Option<PathBuf>,
    pub commit_prefix: String,
    pub assessor: Option<CollaboratorCommand>,
    pub proposer: Option<CollaboratorCommand>,
}

impl Default for RemediateConfig {
    fn default() -> Self {
        Self {
            oracle: OracleConfig::default(),
            state_dir: None,
            commit_prefix: "remediate".to_string(),
            assessor: None,
            proposer: None,
        }
    }
}

impl RemediateConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| RemediateError::Config(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            RemediateError::Config(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_toml(&text)
    }

    /// Load `<root>/remediate.toml` if present, defaults otherwise.
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let path = root.join(CONFIG_FILE);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Relative `state_dir` values resolve against `root`.
    pub fn state_dir_in(&self, root: &Path) -> Option<PathBuf> {
        self.state_dir.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                root.join(dir)
            }
        })
    }
}
