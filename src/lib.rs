// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Autodev - an autonomous AI development team.
//!
//! Autodev watches an external project board, hands each work item to an AI
//! coding assistant running in an isolated git worktree, publishes the
//! resulting pull request back to the board, feeds reviewer comments back to
//! the assistant, and merges approved pull requests.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`types`] - Core data model (board items, task requests/responses, results)
//! - [`error`] - Error types, the stable error-code taxonomy, result alias
//! - [`config`] - Configuration loading and validation
//! - [`telemetry`] - Tracing initialization
//! - [`git`] - Repository cache, worktrees, and the per-repository lock
//! - [`workspace`] - Per-task workspace preparation and cleanup
//! - [`developer`] - Drivers for the external coding assistant
//! - [`worker`] - Prompt generation, transcript parsing, the worker state machine
//! - [`pool`] - Worker pool: admission, capacity, completion tracking
//! - [`planner`] - The periodic board reconciler
//! - [`services`] - Board and pull-request backends (forge + mock)
//! - [`orchestrator`] - Wiring and the control surface
//!
//! # Example
//!
//! ```rust,ignore
//! use autodev::config::load_config;
//! use autodev::orchestrator::Orchestrator;
//!
//! let config = load_config(std::path::Path::new("."))?;
//! let orchestrator = Orchestrator::with_forge_backend(&config)?;
//! orchestrator.start();
//! ```

pub mod config;
pub mod developer;
pub mod error;
pub mod git;
pub mod orchestrator;
pub mod planner;
pub mod pool;
pub mod services;
pub mod telemetry;
pub mod types;
pub mod worker;
pub mod workspace;

// Re-export commonly used types at crate root
pub use error::{
    BackendError, ConfigError, DeveloperError, ErrorCode, GitError, PoolError, ProcessingError,
    Result, WorkspaceError,
};
pub use orchestrator::{Orchestrator, OrchestratorStatus};
pub use types::{
    BoardItem, Comment, ContentType, ItemStatus, PullRequest, PullRequestState, RejectReason,
    Review, TaskAction, TaskRequest, TaskResponse, TaskResponseStatus, WorkerResult,
};

/// Autodev version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
