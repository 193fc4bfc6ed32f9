// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files.
//!
//! Handles loading configuration from JSON and YAML files in conventional
//! locations, followed by the startup validation pass.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::{OrchestratorConfig, RepositoryFilterConfig};

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[
    ".autodev.json",
    ".autodev/config.json",
    "autodev.config.json",
    ".autodev/config.yaml",
];

/// Load, parse, and validate configuration for a workspace root.
///
/// Falls back to built-in defaults when no config file exists; the defaults
/// still pass through `validate()`.
pub fn load_config(workspace_root: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let config = load_workspace_config(workspace_root)?.unwrap_or_default();
    config.validate()?;
    Ok(config)
}

/// Load configuration from the workspace root, if a config file exists.
pub fn load_workspace_config(
    workspace_root: &Path,
) -> Result<Option<OrchestratorConfig>, ConfigError> {
    for filename in CONFIG_FILES {
        let path = workspace_root.join(filename);
        if path.exists() {
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load a configuration file (JSON or YAML, decided by extension).
pub fn load_config_file(path: &Path) -> Result<OrchestratorConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Save configuration to a file under the workspace root.
pub fn save_config(
    workspace_root: &Path,
    config: &OrchestratorConfig,
    filename: Option<&str>,
) -> Result<PathBuf, ConfigError> {
    let filename = filename.unwrap_or(".autodev.json");
    let path = workspace_root.join(filename);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, content)?;

    Ok(path)
}

/// Find the workspace root by searching for config files.
///
/// Walks up the directory tree from `start` until it finds a directory
/// containing a config file or reaches the filesystem root.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        for filename in CONFIG_FILES {
            if current.join(filename).exists() {
                return Some(current);
            }
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

/// Get an example configuration suitable for `autodev config init`.
pub fn get_example_config() -> OrchestratorConfig {
    let mut config = OrchestratorConfig::default();
    config.planner.board_id = "PVT_kwDOExample".to_string();
    config.planner.repository_filter = RepositoryFilterConfig {
        repositories: vec!["your-org/your-repo".to_string()],
        ..Default::default()
    };
    config
}
