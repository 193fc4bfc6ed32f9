// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! The configuration is a closed set: every section is an explicit struct
//! with `deny_unknown_fields`, so a typo in a config file fails startup
//! instead of silently applying defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level orchestrator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OrchestratorConfig {
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub developer: DeveloperConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
}

impl OrchestratorConfig {
    /// Validate the whole configuration tree.
    ///
    /// Called once at startup; any failure is fatal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.planner.validate()?;
        self.manager.validate()?;
        self.developer.validate()?;
        self.logger.validate()?;
        Ok(())
    }
}

// ============================================================================
// Planner
// ============================================================================

/// Planner (reconciler) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PlannerConfig {
    /// Identifier of the project board the planner reconciles.
    #[serde(default)]
    pub board_id: String,
    /// Reconciliation interval in milliseconds.
    #[serde(default = "default_monitoring_interval_ms")]
    pub monitoring_interval_ms: u64,
    /// ERROR responses tolerated per task before it is marked stuck.
    #[serde(default = "default_max_retry_attempts")]
    pub max_retry_attempts: u32,
    /// Timeout for individual backend calls, in milliseconds.
    #[serde(default = "default_planner_timeout_ms")]
    pub timeout_ms: u64,
    /// Which repositories the planner is allowed to touch.
    #[serde(default)]
    pub repository_filter: RepositoryFilterConfig,
    /// Which pull-request comments count as feedback.
    #[serde(default)]
    pub pull_request_filter: PullRequestFilterConfig,
}

fn default_monitoring_interval_ms() -> u64 {
    15_000
}

fn default_max_retry_attempts() -> u32 {
    3
}

fn default_planner_timeout_ms() -> u64 {
    30_000
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            board_id: String::new(),
            monitoring_interval_ms: default_monitoring_interval_ms(),
            max_retry_attempts: default_max_retry_attempts(),
            timeout_ms: default_planner_timeout_ms(),
            repository_filter: RepositoryFilterConfig::default(),
            pull_request_filter: PullRequestFilterConfig::default(),
        }
    }
}

impl PlannerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.monitoring_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "planner.monitoringIntervalMs".into(),
                message: "must be positive".into(),
            });
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "planner.timeoutMs".into(),
                message: "must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Whitelist or blacklist interpretation of a repository list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Whitelist,
    Blacklist,
}

/// Repository allow/deny list.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RepositoryFilterConfig {
    #[serde(default)]
    pub mode: FilterMode,
    /// Repository ids as `owner/name`.
    #[serde(default)]
    pub repositories: Vec<String>,
}

impl Default for RepositoryFilterConfig {
    fn default() -> Self {
        // Empty whitelist admits everything; an explicit list narrows it.
        Self {
            mode: FilterMode::Whitelist,
            repositories: Vec::new(),
        }
    }
}

impl RepositoryFilterConfig {
    /// Whether the filter admits the given `owner/name` repository.
    pub fn allows(&self, repository_id: &str) -> bool {
        match self.mode {
            FilterMode::Whitelist => {
                self.repositories.is_empty()
                    || self.repositories.iter().any(|r| r == repository_id)
            }
            FilterMode::Blacklist => !self.repositories.iter().any(|r| r == repository_id),
        }
    }
}

/// Comment-author filtering for reviewer feedback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PullRequestFilterConfig {
    /// Drop comments written by the pull request author.
    #[serde(default = "default_true")]
    pub exclude_author: bool,
    /// Bot logins whose comments still count as feedback.
    #[serde(default = "default_allowed_bots")]
    pub allowed_bots: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_allowed_bots() -> Vec<String> {
    vec![
        "coderabbitai".to_string(),
        "copilot-pull-request-reviewer".to_string(),
        "sonarcloud".to_string(),
    ]
}

impl Default for PullRequestFilterConfig {
    fn default() -> Self {
        Self {
            exclude_author: default_true(),
            allowed_bots: default_allowed_bots(),
        }
    }
}

// ============================================================================
// Manager
// ============================================================================

/// Manager / worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ManagerConfig {
    /// Root directory holding per-task worktrees and the repository cache.
    #[serde(default = "default_workspace_root")]
    pub workspace_root: PathBuf,
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
    /// Timeout for individual git subprocesses and lock acquisition, ms.
    #[serde(default = "default_git_operation_timeout_ms")]
    pub git_operation_timeout_ms: u64,
    /// How long a cached clone stays fresh before the next fetch, ms.
    #[serde(default = "default_repository_cache_timeout_ms")]
    pub repository_cache_timeout_ms: u64,
    #[serde(default)]
    pub git_config: GitConfig,
}

fn default_workspace_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".autodev")
        .join("workspaces")
}

fn default_git_operation_timeout_ms() -> u64 {
    60_000
}

fn default_repository_cache_timeout_ms() -> u64 {
    300_000
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            workspace_root: default_workspace_root(),
            worker_pool: WorkerPoolConfig::default(),
            git_operation_timeout_ms: default_git_operation_timeout_ms(),
            repository_cache_timeout_ms: default_repository_cache_timeout_ms(),
            git_config: GitConfig::default(),
        }
    }
}

impl ManagerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool.max_workers == 0 {
            return Err(ConfigError::InvalidValue {
                field: "manager.workerPool.maxWorkers".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.worker_pool.min_workers > self.worker_pool.max_workers {
            return Err(ConfigError::InvalidValue {
                field: "manager.workerPool.minWorkers".into(),
                message: "must not exceed maxWorkers".into(),
            });
        }
        if self.git_operation_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "manager.gitOperationTimeoutMs".into(),
                message: "must be positive".into(),
            });
        }
        Ok(())
    }
}

/// Worker pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct WorkerPoolConfig {
    /// Workers kept alive regardless of idleness.
    #[serde(default)]
    pub min_workers: usize,
    /// Upper bound on concurrently existing workers.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Idle time after which a worker is retired, ms.
    #[serde(default = "default_worker_timeout_ms")]
    pub worker_timeout_ms: u64,
}

fn default_max_workers() -> usize {
    4
}

fn default_worker_timeout_ms() -> u64 {
    300_000
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            min_workers: 0,
            max_workers: default_max_workers(),
            worker_timeout_ms: default_worker_timeout_ms(),
        }
    }
}

/// Git behaviour knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GitConfig {
    /// Depth for shallow clones.
    #[serde(default = "default_clone_depth")]
    pub clone_depth: u32,
    /// Serialise tasks at repository granularity (one active worker per
    /// repository).
    #[serde(default = "default_true")]
    pub enable_concurrency_lock: bool,
}

fn default_clone_depth() -> u32 {
    1
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            clone_depth: default_clone_depth(),
            enable_concurrency_lock: default_true(),
        }
    }
}

// ============================================================================
// Developer
// ============================================================================

/// Which external assistant drives the code changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeveloperType {
    #[default]
    ClaudeCode,
    GeminiCli,
}

impl std::fmt::Display for DeveloperType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ClaudeCode => write!(f, "claude-code"),
            Self::GeminiCli => write!(f, "gemini-cli"),
        }
    }
}

/// Assistant process settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeveloperConfig {
    /// Which assistant to drive.
    #[serde(default)]
    pub r#type: DeveloperType,
    #[serde(default)]
    pub paths: DeveloperPaths,
    #[serde(default)]
    pub timeouts: DeveloperTimeouts,
}

impl DeveloperConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let path = self.paths.for_type(self.r#type);
        if path.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "developer.paths".into(),
                message: format!("no binary path configured for {}", self.r#type),
            });
        }
        Ok(())
    }

    /// Execution timeout for the configured developer type.
    pub fn timeout_ms(&self) -> u64 {
        self.timeouts.for_type(self.r#type)
    }
}

/// Paths to the assistant binaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeveloperPaths {
    #[serde(default = "default_claude_path")]
    pub claude_code: PathBuf,
    #[serde(default = "default_gemini_path")]
    pub gemini_cli: PathBuf,
}

fn default_claude_path() -> PathBuf {
    PathBuf::from("claude")
}

fn default_gemini_path() -> PathBuf {
    PathBuf::from("gemini")
}

impl Default for DeveloperPaths {
    fn default() -> Self {
        Self {
            claude_code: default_claude_path(),
            gemini_cli: default_gemini_path(),
        }
    }
}

impl DeveloperPaths {
    pub fn for_type(&self, developer: DeveloperType) -> &PathBuf {
        match developer {
            DeveloperType::ClaudeCode => &self.claude_code,
            DeveloperType::GeminiCli => &self.gemini_cli,
        }
    }
}

/// Per-assistant execution timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct DeveloperTimeouts {
    #[serde(default = "default_developer_timeout_ms")]
    pub claude_code_ms: u64,
    #[serde(default = "default_developer_timeout_ms")]
    pub gemini_cli_ms: u64,
}

fn default_developer_timeout_ms() -> u64 {
    600_000
}

impl Default for DeveloperTimeouts {
    fn default() -> Self {
        Self {
            claude_code_ms: default_developer_timeout_ms(),
            gemini_cli_ms: default_developer_timeout_ms(),
        }
    }
}

impl DeveloperTimeouts {
    pub fn for_type(&self, developer: DeveloperType) -> u64 {
        match developer {
            DeveloperType::ClaudeCode => self.claude_code_ms,
            DeveloperType::GeminiCli => self.gemini_cli_ms,
        }
    }
}

// ============================================================================
// Logger
// ============================================================================

/// Log sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoggerConfig {
    /// trace | debug | info | warn | error
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Optional log file; console-only when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub enable_console: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_path: None,
            enable_console: true,
        }
    }
}

impl LoggerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(ConfigError::InvalidValue {
                field: "logger.level".into(),
                message: format!("unknown level: {other}"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = OrchestratorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.planner.monitoring_interval_ms, 15_000);
        assert_eq!(config.manager.worker_pool.max_workers, 4);
        assert_eq!(config.manager.git_config.clone_depth, 1);
        assert!(config.manager.git_config.enable_concurrency_lock);
    }

    #[test]
    fn test_validation_rejects_zero_interval() {
        let mut config = OrchestratorConfig::default();
        config.planner.monitoring_interval_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_min_above_max() {
        let mut config = OrchestratorConfig::default();
        config.manager.worker_pool.min_workers = 9;
        config.manager.worker_pool.max_workers = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validation_rejects_bad_log_level() {
        let mut config = OrchestratorConfig::default();
        config.logger.level = "verbose".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_repository_filter_whitelist() {
        let filter = RepositoryFilterConfig {
            mode: FilterMode::Whitelist,
            repositories: vec!["octo/webapp".into()],
        };
        assert!(filter.allows("octo/webapp"));
        assert!(!filter.allows("octo/other"));

        // Empty whitelist admits everything.
        assert!(RepositoryFilterConfig::default().allows("any/repo"));
    }

    #[test]
    fn test_repository_filter_blacklist() {
        let filter = RepositoryFilterConfig {
            mode: FilterMode::Blacklist,
            repositories: vec!["octo/legacy".into()],
        };
        assert!(!filter.allows("octo/legacy"));
        assert!(filter.allows("octo/webapp"));
    }

    #[test]
    fn test_developer_timeout_selection() {
        let mut config = DeveloperConfig::default();
        config.timeouts.claude_code_ms = 111;
        config.timeouts.gemini_cli_ms = 222;
        config.r#type = DeveloperType::ClaudeCode;
        assert_eq!(config.timeout_ms(), 111);
        config.r#type = DeveloperType::GeminiCli;
        assert_eq!(config.timeout_ms(), 222);
    }

    #[test]
    fn test_camel_case_wire_format() {
        let json = r#"{
            "planner": {"boardId": "b1", "maxRetryAttempts": 5},
            "manager": {"gitConfig": {"cloneDepth": 3, "enableConcurrencyLock": false}}
        }"#;
        let config: OrchestratorConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.planner.board_id, "b1");
        assert_eq!(config.planner.max_retry_attempts, 5);
        assert_eq!(config.manager.git_config.clone_depth, 3);
        assert!(!config.manager.git_config.enable_concurrency_lock);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let json = r#"{"planner": {"boardId": "b", "monitoringInterval": 5}}"#;
        assert!(serde_json::from_str::<OrchestratorConfig>(json).is_err());
    }
}
