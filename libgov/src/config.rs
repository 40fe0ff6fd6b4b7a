// Copyright © 2023 The GitGov Team <dev@gitgov.dev>
//
// This file is part of gitgov, distributed under the GPLv3 with GitGov
// Linking Exception. For full terms see the included LICENSE file.

//! Project configuration, read from `.gitgov/config.json`.
//!
//! The config file is itself a syncable root file, so unknown keys written
//! by other tools must survive a load/store round trip.

use std::{fs, io, path::Path};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::paths::GITGOV_DIR;

pub const DEFAULT_STATE_BRANCH: &str = "gitgov-state";

/// The git remote all sync operations talk to.
pub const REMOTE: &str = "origin";

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("malformed config file: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectConfig {
    #[serde(default = "default_state_branch")]
    pub state_branch: String,

    /// Keys owned by other tools; carried verbatim.
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            state_branch: default_state_branch(),
            rest: Map::new(),
        }
    }
}

fn default_state_branch() -> String {
    DEFAULT_STATE_BRANCH.to_string()
}

impl ProjectConfig {
    /// Load the config from `<repo_root>/.gitgov/config.json`, falling back
    /// to defaults when the file does not exist yet.
    pub fn load(repo_root: &Path) -> Result<Self, Error> {
        let path = repo_root.join(GITGOV_DIR).join("config.json");
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_branch_defaults() {
        let cfg: ProjectConfig = serde_json::from_value(json!({})).unwrap();
        assert_eq!(cfg.state_branch, DEFAULT_STATE_BRANCH);
    }

    #[test]
    fn unknown_keys_round_trip() {
        let cfg: ProjectConfig = serde_json::from_value(json!({
            "stateBranch": "governance",
            "projectName": "demo",
        }))
        .unwrap();
        assert_eq!(cfg.state_branch, "governance");

        let back = serde_json::to_value(&cfg).unwrap();
        assert_eq!(back["projectName"], "demo");
        assert_eq!(back["stateBranch"], "governance");
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ProjectConfig::load(dir.path()).unwrap();
        assert_eq!(cfg, ProjectConfig::default());
    }
}
