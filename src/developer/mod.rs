// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Developer implementations - drivers for the external coding assistant.
//!
//! A developer is an opaque child process: it consumes a prompt string, runs
//! inside a task's worktree, and emits a free-form transcript. This module
//! provides the [`Developer`] trait, the CLI-backed driver for real
//! assistants, and a scripted mock for tests.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use autodev::config::DeveloperConfig;
//! use autodev::developer::create_developer;
//!
//! let developer = create_developer(&DeveloperConfig::default());
//! developer.initialize().await?;
//! let transcript = developer.execute_prompt(&prompt, &worktree, &cancel).await?;
//! ```

pub mod cli;
pub mod mock;

pub use cli::CliDeveloper;
pub use mock::MockDeveloper;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::{DeveloperConfig, DeveloperType};
use crate::error::DeveloperError;

/// Transcript returned by one assistant run.
#[derive(Debug, Clone)]
pub struct Transcript {
    /// Combined stdout and stderr of the assistant.
    pub raw_output: String,
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    /// Wall-clock duration of the run.
    pub duration_ms: u64,
    /// Which assistant produced the transcript.
    pub developer_type: DeveloperType,
}

/// Driver for an external coding assistant.
#[async_trait]
pub trait Developer: Send + Sync {
    /// Probe that the assistant binary is runnable.
    async fn initialize(&self) -> Result<(), DeveloperError>;

    /// Run the assistant with `prompt`, working inside `cwd`.
    ///
    /// The wait is bounded by the configured timeout and aborts early when
    /// `cancel` fires; the child process is killed on both paths.
    async fn execute_prompt(
        &self,
        prompt: &str,
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> Result<Transcript, DeveloperError>;

    /// Release any resources held by the driver.
    async fn cleanup(&self) -> Result<(), DeveloperError>;

    /// Whether the assistant can currently be driven.
    async fn is_available(&self) -> bool;

    fn developer_type(&self) -> DeveloperType;
}

/// Shared, boxed developer handle.
pub type SharedDeveloper = Arc<dyn Developer>;

/// Create the configured developer driver.
pub fn create_developer(config: &DeveloperConfig) -> SharedDeveloper {
    let binary = config.paths.for_type(config.r#type).clone();
    Arc::new(CliDeveloper::new(
        config.r#type,
        binary,
        Duration::from_millis(config.timeout_ms()),
    ))
}
