// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Orchestrator - wires the components together and exposes the control
//! surface.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    Orchestrator                       │
//! │   ┌──────────┐   requests    ┌─────────────────────┐ │
//! │   │ Planner  │──────────────▶│ WorkerPool          │ │
//! │   │ (timer)  │◀──────────────│  ├── Worker 1       │ │
//! │   └────┬─────┘   results     │  └── Worker N       │ │
//! │        │ board / PR state    └────────┬────────────┘ │
//! └────────┼──────────────────────────────┼──────────────┘
//!          ▼                              ▼
//!    ProjectBoardService /        WorkspaceManager → git
//!    PullRequestService           Developer (assistant)
//! ```
//!
//! Control operations: [`Orchestrator::start`], [`Orchestrator::stop`],
//! [`Orchestrator::status`], [`Orchestrator::force_sync`]. Logs go through
//! the tracing sinks configured at startup.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::OrchestratorConfig;
use crate::developer::{create_developer, SharedDeveloper};
use crate::error::BackendError;
use crate::git::{GitClient, GitLockRegistry};
use crate::planner::{Planner, PlannerStatus, TickSummary};
use crate::pool::{PoolSummary, WorkerPool};
use crate::services::{ForgeClient, SharedBoardService, SharedPullRequestService};
use crate::worker::WorkerProgress;
use crate::workspace::WorkspaceManager;

/// Drain window handed to the pool on stop.
const SHUTDOWN_WINDOW: Duration = Duration::from_secs(10);

/// Full status snapshot for the control surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorStatus {
    pub running: bool,
    pub pool: PoolSummary,
    pub workers: Vec<WorkerProgress>,
    pub planner: PlannerStatus,
}

/// The assembled system.
pub struct Orchestrator {
    planner: Arc<Planner>,
    pool: Arc<WorkerPool>,
    cancel: CancellationToken,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
    running: AtomicBool,
}

impl Orchestrator {
    /// Assemble the system from a validated configuration and explicit
    /// backends. Tests inject mocks here.
    pub fn new(
        config: &OrchestratorConfig,
        board: SharedBoardService,
        pulls: SharedPullRequestService,
        developer: SharedDeveloper,
    ) -> Self {
        let manager = &config.manager;

        let locks = Arc::new(GitLockRegistry::new(Duration::from_millis(
            manager.git_operation_timeout_ms,
        )));
        let git = Arc::new(GitClient::new(
            manager.workspace_root.join("repos"),
            locks,
            Duration::from_millis(manager.git_operation_timeout_ms),
            Duration::from_millis(manager.repository_cache_timeout_ms),
            manager.git_config.clone_depth,
        ));
        let workspace = Arc::new(WorkspaceManager::new(manager.workspace_root.clone(), git));

        let pool = Arc::new(WorkerPool::new(
            manager.worker_pool.clone(),
            manager.git_config.enable_concurrency_lock,
            workspace.clone(),
            developer,
        ));

        let planner = Arc::new(Planner::new(
            config.planner.clone(),
            board,
            pulls,
            pool.clone(),
            workspace,
        ));

        Self {
            planner,
            pool,
            cancel: CancellationToken::new(),
            tasks: StdMutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// Assemble with the forge backend and the configured assistant.
    ///
    /// Fails fast when the forge token is missing - an unrecoverable
    /// initialization error.
    pub fn with_forge_backend(config: &OrchestratorConfig) -> Result<Self, BackendError> {
        let timeout = Duration::from_millis(config.planner.timeout_ms);
        let forge = Arc::new(ForgeClient::from_env(Some(timeout))?);
        let developer = create_developer(&config.developer);
        Ok(Self::new(config, forge.clone(), forge, developer))
    }

    /// Start the planner loop and pool maintenance.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("orchestrator already running");
            return;
        }
        info!("orchestrator starting");

        let planner = Arc::clone(&self.planner);
        let planner_cancel = self.cancel.child_token();
        let pool = Arc::clone(&self.pool);

        let mut tasks = self.tasks.lock().unwrap();
        tasks.push(tokio::spawn(async move {
            planner.run(planner_cancel).await;
        }));
        tasks.push(tokio::spawn(async move {
            pool.run_maintenance().await;
        }));
    }

    /// Stop the planner, cancel all workers, and drain in-flight work.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("orchestrator stopping");
        self.cancel.cancel();
        self.pool.shutdown(SHUTDOWN_WINDOW).await;

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(SHUTDOWN_WINDOW, task).await.is_err() {
                warn!("background task did not stop in time");
            }
        }
        info!("orchestrator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Pool and planner snapshot.
    pub async fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            running: self.is_running(),
            pool: self.pool.summary(),
            workers: self.pool.workers(),
            planner: self.planner.status().await,
        }
    }

    /// Run one reconciliation tick synchronously.
    pub async fn force_sync(&self) -> Result<TickSummary, BackendError> {
        self.planner.tick().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeveloperType;
    use crate::developer::MockDeveloper;
    use crate::services::{MockBoardService, MockPullRequestService};
    use crate::types::ItemStatus;

    fn test_config(root: &std::path::Path) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::default();
        config.planner.board_id = "board-1".into();
        config.planner.monitoring_interval_ms = 25;
        config.manager.workspace_root = root.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = test_config(temp.path());
        let orchestrator = Orchestrator::new(
            &config,
            Arc::new(MockBoardService::new()),
            Arc::new(MockPullRequestService::new()),
            Arc::new(MockDeveloper::new()),
        );

        orchestrator.start();
        assert!(orchestrator.is_running());
        orchestrator.start(); // no-op

        orchestrator.stop().await;
        assert!(!orchestrator.is_running());
        orchestrator.stop().await; // no-op
    }

    #[tokio::test]
    async fn test_force_sync_reconciles() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = test_config(temp.path());
        let board = Arc::new(MockBoardService::new());
        board.add_item("t1", "Task", "octo/webapp", ItemStatus::Todo);

        let orchestrator = Orchestrator::new(
            &config,
            board.clone(),
            Arc::new(MockPullRequestService::new()),
            Arc::new(
                MockDeveloper::new().with_transcript("PR: https://github.com/octo/webapp/pull/1"),
            ),
        );

        let summary = orchestrator.force_sync().await.unwrap();
        assert_eq!(summary.submitted, 1);
        assert_eq!(board.item("t1").unwrap().status, ItemStatus::InProgress);

        let status = orchestrator.status().await;
        assert_eq!(status.planner.ticks, 1);
        assert_eq!(status.pool.total, 1);

        orchestrator.stop().await;
    }

    #[tokio::test]
    async fn test_status_reports_developer_workers() {
        let temp = tempfile::TempDir::new().unwrap();
        let config = test_config(temp.path());
        let orchestrator = Orchestrator::new(
            &config,
            Arc::new(MockBoardService::new()),
            Arc::new(MockPullRequestService::new()),
            Arc::new(MockDeveloper::new()),
        );
        let status = orchestrator.status().await;
        assert!(!status.running);
        assert_eq!(status.pool.total, 0);
        assert!(status.workers.is_empty());
        // MockDeveloper reports the claude-code type.
        assert_eq!(DeveloperType::default(), DeveloperType::ClaudeCode);
    }
}
