// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The worker state machine.
//!
//! One worker executes one task at a time through the five stages, reporting
//! progress and never letting a stage failure escape as a panic or error:
//! failures become a failed [`WorkerResult`] plus a state transition.
//!
//! Failure policy: a failed PROCESS_FEEDBACK keeps the task and parks the
//! worker in ERROR so the manager can resume it with fresh feedback; any
//! other failed action returns the worker to IDLE and the planner re-emits
//! the request on its next tick.

use std::sync::Mutex as StdMutex;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::DeveloperType;
use crate::developer::SharedDeveloper;
use crate::error::PoolError;
use crate::types::{TaskAction, TaskRequest, WorkerResult};
use crate::workspace::WorkspaceProvider;

use super::prompt::PromptGenerator;
use super::result::ResultProcessor;

/// Attempts at developer initialization before giving up.
const DEVELOPER_INIT_ATTEMPTS: u32 = 3;

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Idle,
    Waiting,
    Working,
    Stopped,
    Error,
}

impl WorkerStatus {
    /// WAITING and WORKING both count as holding capacity.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Waiting | Self::Working)
    }
}

/// Stages inside WORKING, observable via [`Worker::progress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStage {
    PreparingWorkspace,
    GeneratingPrompt,
    InitialisingDeveloper,
    ExecutingTask,
    ProcessingResult,
}

impl std::fmt::Display for WorkerStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PreparingWorkspace => "PREPARING_WORKSPACE",
            Self::GeneratingPrompt => "GENERATING_PROMPT",
            Self::InitialisingDeveloper => "INITIALISING_DEVELOPER",
            Self::ExecutingTask => "EXECUTING_TASK",
            Self::ProcessingResult => "PROCESSING_RESULT",
        };
        f.write_str(name)
    }
}

/// Progress snapshot of a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerProgress {
    pub worker_id: String,
    pub status: WorkerStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<WorkerStage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

struct WorkerInner {
    status: WorkerStatus,
    stage: Option<WorkerStage>,
    current_task: Option<TaskRequest>,
    cancel: CancellationToken,
    last_active_at: Instant,
}

/// A scheduler-owned execution unit.
pub struct Worker {
    id: String,
    developer_type: DeveloperType,
    created_at: DateTime<Utc>,
    workspace: std::sync::Arc<dyn WorkspaceProvider>,
    developer: SharedDeveloper,
    prompts: PromptGenerator,
    results: ResultProcessor,
    inner: StdMutex<WorkerInner>,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        workspace: std::sync::Arc<dyn WorkspaceProvider>,
        developer: SharedDeveloper,
        parent_cancel: &CancellationToken,
    ) -> Self {
        Self {
            id: id.into(),
            developer_type: developer.developer_type(),
            created_at: Utc::now(),
            workspace,
            developer,
            prompts: PromptGenerator::new(),
            results: ResultProcessor::new(),
            inner: StdMutex::new(WorkerInner {
                status: WorkerStatus::Idle,
                stage: None,
                current_task: None,
                cancel: parent_cancel.child_token(),
                last_active_at: Instant::now(),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn developer_type(&self) -> DeveloperType {
        self.developer_type
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn status(&self) -> WorkerStatus {
        self.inner.lock().unwrap().status
    }

    pub fn current_task_id(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .current_task
            .as_ref()
            .map(|t| t.task_id.clone())
    }

    /// Repository of the held task, if any.
    pub fn current_repository_id(&self) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .current_task
            .as_ref()
            .map(|t| t.repository_id.clone())
    }

    /// How long the worker has been idle.
    pub fn idle_for(&self) -> std::time::Duration {
        self.inner.lock().unwrap().last_active_at.elapsed()
    }

    /// Live progress snapshot.
    pub fn progress(&self) -> WorkerProgress {
        let inner = self.inner.lock().unwrap();
        WorkerProgress {
            worker_id: self.id.clone(),
            status: inner.status,
            stage: inner.stage,
            task_id: inner.current_task.as_ref().map(|t| t.task_id.clone()),
        }
    }

    /// Accept a task. IDLE → WAITING.
    ///
    /// Fails with CONCURRENCY_ERROR when a task is already held.
    pub fn assign(&self, request: TaskRequest, parent_cancel: &CancellationToken) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(current) = &inner.current_task {
            return Err(PoolError::Concurrency {
                worker_id: self.id.clone(),
                task_id: current.task_id.clone(),
            });
        }
        debug!(worker = %self.id, task = %request.task_id, action = %request.action, "task assigned");
        inner.current_task = Some(request);
        inner.status = WorkerStatus::Waiting;
        inner.stage = None;
        inner.cancel = parent_cancel.child_token();
        inner.last_active_at = Instant::now();
        Ok(())
    }

    /// Replace the retained request of an ERROR worker with fresh feedback.
    ///
    /// Fresh reviewer comments supersede the ones that failed.
    pub fn overwrite_request(&self, request: TaskRequest) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().unwrap();
        match &inner.current_task {
            Some(current) if current.task_id == request.task_id => {
                inner.current_task = Some(request);
                Ok(())
            }
            Some(current) => Err(PoolError::Concurrency {
                worker_id: self.id.clone(),
                task_id: current.task_id.clone(),
            }),
            None => Err(PoolError::Validation(format!(
                "worker {} holds no task to overwrite",
                self.id
            ))),
        }
    }

    /// WAITING | WORKING → STOPPED. Cancels in-flight work.
    pub fn pause(&self) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.status {
            WorkerStatus::Waiting | WorkerStatus::Working => {
                inner.cancel.cancel();
                inner.status = WorkerStatus::Stopped;
                info!(worker = %self.id, "paused");
                Ok(())
            }
            other => Err(PoolError::Validation(format!(
                "cannot pause worker {} in state {other:?}",
                self.id
            ))),
        }
    }

    /// STOPPED | ERROR → WAITING, keeping the retained task.
    pub fn resume(&self, parent_cancel: &CancellationToken) -> Result<(), PoolError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.status {
            WorkerStatus::Stopped | WorkerStatus::Error => {
                if inner.current_task.is_none() {
                    return Err(PoolError::Validation(format!(
                        "worker {} has no task to resume",
                        self.id
                    )));
                }
                inner.status = WorkerStatus::Waiting;
                inner.stage = None;
                inner.cancel = parent_cancel.child_token();
                info!(worker = %self.id, "resumed");
                Ok(())
            }
            other => Err(PoolError::Validation(format!(
                "cannot resume worker {} in state {other:?}",
                self.id
            ))),
        }
    }

    /// Any state → IDLE. Cancels in-flight work; cleanup errors swallowed.
    pub async fn cancel(&self) {
        let task_id = {
            let mut inner = self.inner.lock().unwrap();
            inner.cancel.cancel();
            inner.status = WorkerStatus::Idle;
            inner.stage = None;
            inner.last_active_at = Instant::now();
            inner.current_task.take().map(|t| t.task_id)
        };
        if let Err(e) = self.developer.cleanup().await {
            warn!(worker = %self.id, error = %e, "developer cleanup failed");
        }
        if let Some(task_id) = task_id {
            info!(worker = %self.id, task = %task_id, "execution cancelled");
        }
    }

    /// Execute the held task. WAITING → WORKING → (IDLE | ERROR).
    ///
    /// Always returns a result; stage failures are reported through
    /// `success = false`, never as an `Err` (the only `Err` is calling this
    /// on a worker that is not WAITING).
    pub async fn execute(&self) -> Result<WorkerResult, PoolError> {
        let (request, cancel) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.status != WorkerStatus::Waiting {
                return Err(PoolError::Validation(format!(
                    "worker {} is not WAITING (state {:?})",
                    self.id, inner.status
                )));
            }
            let request = inner.current_task.clone().ok_or_else(|| {
                PoolError::Validation(format!("worker {} has no task", self.id))
            })?;
            inner.status = WorkerStatus::Working;
            inner.stage = Some(WorkerStage::PreparingWorkspace);
            (request, inner.cancel.clone())
        };

        info!(worker = %self.id, task = %request.task_id, action = %request.action, "executing");

        // Stage 1: workspace.
        let workspace = match self
            .workspace
            .prepare(
                &request.task_id,
                &request.repository_id,
                request.board_item.as_ref(),
            )
            .await
        {
            Ok(ws) => ws,
            Err(e) => {
                return Ok(self.fail_stage(&request, WorkerStage::PreparingWorkspace, e.to_string()))
            }
        };

        // Stage 2: prompt.
        self.set_stage(WorkerStage::GeneratingPrompt);
        let prompt = match self.prompts.generate(&request, &workspace) {
            Ok(p) => p,
            Err(e) => {
                return Ok(self.fail_stage(&request, WorkerStage::GeneratingPrompt, e.to_string()))
            }
        };

        // Stage 3: developer init, with in-worker retries.
        self.set_stage(WorkerStage::InitialisingDeveloper);
        let mut initialized = false;
        for attempt in 1..=DEVELOPER_INIT_ATTEMPTS {
            match self.developer.initialize().await {
                Ok(()) => {
                    initialized = true;
                    break;
                }
                Err(e) if attempt < DEVELOPER_INIT_ATTEMPTS => {
                    warn!(
                        worker = %self.id,
                        attempt,
                        error = %e,
                        "developer initialization failed, retrying"
                    );
                }
                Err(e) => {
                    warn!(worker = %self.id, attempt, error = %e, "developer initialization failed");
                }
            }
        }
        if !initialized {
            return Ok(self.fail_stage(
                &request,
                WorkerStage::InitialisingDeveloper,
                format!(
                    "DEVELOPER_INIT_FAILED after {DEVELOPER_INIT_ATTEMPTS} attempts"
                ),
            ));
        }

        // Stage 4: run the assistant.
        self.set_stage(WorkerStage::ExecutingTask);
        let transcript = match self
            .developer
            .execute_prompt(&prompt, &workspace.workspace_dir, &cancel)
            .await
        {
            Ok(t) => t,
            Err(e) => {
                return Ok(self.fail_stage(&request, WorkerStage::ExecutingTask, e.to_string()))
            }
        };

        // Stage 5: parse the transcript.
        self.set_stage(WorkerStage::ProcessingResult);
        let result = match self.results.process(&transcript, &request) {
            Ok(r) => r,
            Err(e) => {
                return Ok(self.fail_stage(&request, WorkerStage::ProcessingResult, e.to_string()))
            }
        };

        // A parsed result is a completed execution even when success=false;
        // the worker frees up either way.
        {
            let mut inner = self.inner.lock().unwrap();
            inner.status = WorkerStatus::Idle;
            inner.stage = None;
            inner.current_task = None;
            inner.last_active_at = Instant::now();
        }
        info!(
            worker = %self.id,
            task = %request.task_id,
            success = result.success,
            pr = result.pull_request_url.as_deref().unwrap_or("-"),
            "execution finished"
        );
        Ok(result)
    }

    fn set_stage(&self, stage: WorkerStage) {
        self.inner.lock().unwrap().stage = Some(stage);
    }

    /// Apply the failure policy and build the failed result.
    fn fail_stage(
        &self,
        request: &TaskRequest,
        stage: WorkerStage,
        message: String,
    ) -> WorkerResult {
        error!(
            worker = %self.id,
            task = %request.task_id,
            %stage,
            error = %message,
            "stage failed"
        );

        let mut inner = self.inner.lock().unwrap();
        inner.stage = None;
        inner.last_active_at = Instant::now();
        match inner.status {
            // A pause landed mid-flight; STOPPED and the retained task win.
            WorkerStatus::Stopped => {}
            // cancel() already reset the worker and took the task.
            _ if inner.current_task.is_none() => {
                inner.status = WorkerStatus::Idle;
            }
            _ if request.action == TaskAction::ProcessFeedback => {
                // Keep the task so the manager can resume with fresh feedback.
                inner.status = WorkerStatus::Error;
            }
            _ => {
                inner.status = WorkerStatus::Idle;
                inner.current_task = None;
            }
        }

        WorkerResult::failure(&request.task_id, format!("{stage}: {message}"))
    }
}
