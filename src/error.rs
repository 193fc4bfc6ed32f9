// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the orchestrator.
//!
//! Strongly-typed errors per domain, using `thiserror` for ergonomic error
//! definitions and `anyhow` for propagation at the application boundary.
//!
//! Every error maps to a stable taxonomy code via [`ErrorCode`]; the codes
//! are the contract logged and surfaced to operators, and they never change
//! meaning:
//!
//! - `VALIDATION_ERROR` - bad inputs, never retried
//! - `CONFIG_ERROR` - startup misconfiguration, fatal
//! - `GIT_ERROR` - git subprocess failure, retried by re-emission
//! - `LOCK_TIMEOUT` - repository lock not acquired in time, treated like GIT_ERROR
//! - `DEVELOPER_INIT_FAILED` - assistant unavailable after in-worker retries
//! - `EXECUTION_ERROR` / `TYPESCRIPT_ERROR` / `TEST_FAILURE` - parsed from
//!   the assistant transcript, reported on the result, never thrown
//! - `POOL_FULL` / `REPO_BUSY` - admission back-pressure, not errors
//! - `BACKEND_ERROR` - board/PR service failure, retried next tick
//! - `CONCURRENCY_ERROR` - a worker was asked to take a second task
//! - `CANCELLED` - cooperative shutdown

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Stable taxonomy identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ValidationError,
    ConfigError,
    GitError,
    LockTimeout,
    DeveloperInitFailed,
    ExecutionError,
    TypescriptError,
    TestFailure,
    PoolFull,
    RepoBusy,
    BackendError,
    ConcurrencyError,
    Cancelled,
}

impl ErrorCode {
    /// The stable string identifier for logs and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::GitError => "GIT_ERROR",
            Self::LockTimeout => "LOCK_TIMEOUT",
            Self::DeveloperInitFailed => "DEVELOPER_INIT_FAILED",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::TypescriptError => "TYPESCRIPT_ERROR",
            Self::TestFailure => "TEST_FAILURE",
            Self::PoolFull => "POOL_FULL",
            Self::RepoBusy => "REPO_BUSY",
            Self::BackendError => "BACKEND_ERROR",
            Self::ConcurrencyError => "CONCURRENCY_ERROR",
            Self::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from the git layer (subprocesses and repository locks).
#[derive(Error, Debug)]
pub enum GitError {
    #[error("git {command} failed with exit code {exit_code:?}: {stderr}")]
    Command {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("git {command} timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("lock for {repository_id} not acquired within {timeout:?} (action: {action})")]
    LockTimeout {
        repository_id: String,
        action: String,
        timeout: Duration,
    },

    #[error("invalid repository id: {0}")]
    InvalidRepositoryId(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,
}

impl GitError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::LockTimeout { .. } => ErrorCode::LockTimeout,
            Self::InvalidRepositoryId(_) => ErrorCode::ValidationError,
            Self::Cancelled => ErrorCode::Cancelled,
            _ => ErrorCode::GitError,
        }
    }

    /// Whether the Planner should re-emit the task on the next tick.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::InvalidRepositoryId(_) | Self::Cancelled)
    }
}

/// Errors from workspace preparation and cleanup.
#[derive(Error, Debug)]
pub enum WorkspaceError {
    #[error("git error: {0}")]
    Git(#[from] GitError),

    #[error("invalid workspace: {0}")]
    Invalid(String),

    #[error("metadata corrupted at {path}: {message}")]
    CorruptMetadata { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkspaceError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Git(e) => e.code(),
            Self::Invalid(_) => ErrorCode::ValidationError,
            _ => ErrorCode::GitError,
        }
    }
}

/// Errors from the external assistant process driver.
#[derive(Error, Debug)]
pub enum DeveloperError {
    #[error("developer binary not available: {0}")]
    NotAvailable(String),

    #[error("developer initialization failed: {0}")]
    InitFailed(String),

    #[error("developer execution failed: {0}")]
    ExecutionFailed(String),

    #[error("developer timed out after {0:?}")]
    Timeout(Duration),

    #[error("operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeveloperError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::NotAvailable(_) | Self::InitFailed(_) => ErrorCode::DeveloperInitFailed,
            Self::Cancelled => ErrorCode::Cancelled,
            _ => ErrorCode::ExecutionError,
        }
    }
}

/// Errors from prompt generation and transcript processing.
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("validation error: {0}")]
    Validation(String),
}

impl ProcessingError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::ValidationError
    }
}

/// Errors from the worker pool.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("worker {worker_id} already holds task {task_id}")]
    Concurrency { worker_id: String, task_id: String },

    #[error("worker not found: {0}")]
    WorkerNotFound(String),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("pool is shutting down")]
    ShuttingDown,
}

impl PoolError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Concurrency { .. } => ErrorCode::ConcurrencyError,
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::ShuttingDown => ErrorCode::Cancelled,
            Self::WorkerNotFound(_) => ErrorCode::ValidationError,
        }
    }
}

/// Errors from the board and pull-request backends.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("API error: {message}")]
    Api {
        message: String,
        status_code: Option<u16>,
    },

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("response parsing error: {0}")]
    Parse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not configured: {0}")]
    NotConfigured(String),
}

impl BackendError {
    /// Create an API error with a status code.
    pub fn api(message: impl Into<String>, status_code: u16) -> Self {
        Self::Api {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    pub fn code(&self) -> ErrorCode {
        ErrorCode::BackendError
    }

    /// Backend failures are retried on the next tick; configuration gaps are
    /// not.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::NotConfigured(_))
    }
}

/// Errors from configuration loading and validation.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("invalid config format: {0}")]
    InvalidFormat(String),

    #[error("invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    Io(String),
}

impl ConfigError {
    pub fn code(&self) -> ErrorCode {
        ErrorCode::ConfigError
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::Io(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidFormat(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::InvalidFormat(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_strings() {
        assert_eq!(ErrorCode::ValidationError.as_str(), "VALIDATION_ERROR");
        assert_eq!(ErrorCode::LockTimeout.as_str(), "LOCK_TIMEOUT");
        assert_eq!(ErrorCode::RepoBusy.as_str(), "REPO_BUSY");
        assert_eq!(ErrorCode::Cancelled.to_string(), "CANCELLED");
    }

    #[test]
    fn test_git_error_codes() {
        let lock = GitError::LockTimeout {
            repository_id: "o/r".into(),
            action: "clone".into(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(lock.code(), ErrorCode::LockTimeout);
        assert!(lock.is_retryable());

        let cmd = GitError::Command {
            command: "git clone".into(),
            exit_code: Some(128),
            stderr: "fatal: repository not found".into(),
        };
        assert_eq!(cmd.code(), ErrorCode::GitError);
        assert!(cmd.to_string().contains("128"));
    }

    #[test]
    fn test_developer_error_codes() {
        assert_eq!(
            DeveloperError::InitFailed("no binary".into()).code(),
            ErrorCode::DeveloperInitFailed
        );
        assert_eq!(
            DeveloperError::Timeout(Duration::from_secs(5)).code(),
            ErrorCode::ExecutionError
        );
    }

    #[test]
    fn test_backend_error_retryable() {
        assert!(BackendError::RateLimited("slow down".into()).is_retryable());
        assert!(BackendError::api("oops", 502).is_retryable());
        assert!(!BackendError::NotConfigured("no token".into()).is_retryable());
    }

    #[test]
    fn test_config_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: ConfigError = io.into();
        assert!(matches!(err, ConfigError::NotFound(_)));
        assert_eq!(err.code(), ErrorCode::ConfigError);
    }

    #[test]
    fn test_pool_error_codes() {
        let err = PoolError::Concurrency {
            worker_id: "worker-1".into(),
            task_id: "t".into(),
        };
        assert_eq!(err.code(), ErrorCode::ConcurrencyError);
        assert!(err.to_string().contains("worker-1"));
    }
}
