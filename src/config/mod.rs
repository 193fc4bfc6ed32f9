// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module for the orchestrator.
//!
//! Configuration is a closed set of explicit structs: `planner`, `manager`,
//! `developer`, and `logger` sections with camelCase keys. Unknown keys are
//! rejected at parse time, and a validation pass runs at startup; both
//! failure modes are fatal (`CONFIG_ERROR`).

mod loader;
mod types;

// Re-export public types
pub use loader::{
    find_workspace_root, get_example_config, load_config, load_config_file,
    load_workspace_config, save_config, CONFIG_FILES,
};

pub use types::{
    DeveloperConfig, DeveloperPaths, DeveloperTimeouts, DeveloperType, FilterMode, GitConfig,
    LoggerConfig, ManagerConfig, OrchestratorConfig, PlannerConfig, PullRequestFilterConfig,
    RepositoryFilterConfig, WorkerPoolConfig,
};
