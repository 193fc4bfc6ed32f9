// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Worker pool - the manager side of the scheduler.
//!
//! The pool owns all shared scheduling state: the worker registry, the
//! active-task bookkeeping, and the bounded completed-result map. All
//! mutation goes through the pool's own locks, and no lock is held across an
//! await into git, process, or backend calls.
//!
//! Admission (`request_work`) is synchronous and short; execution is
//! dispatched onto its own task and tracked until completion. Capacity is
//! managed lazily: workers are spawned on demand up to `max_workers` and
//! idle workers are retired down to `min_workers`.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::WorkerPoolConfig;
use crate::developer::SharedDeveloper;
use crate::types::{RejectReason, TaskAction, TaskRequest, TaskResponse, WorkerResult};
use crate::types::split_repository_id;
use crate::worker::{Worker, WorkerProgress, WorkerStatus};
use crate::workspace::WorkspaceProvider;

/// Completed results kept at most this long for the planner to collect.
const RESULT_TTL: Duration = Duration::from_secs(3600);

/// Upper bound on retained completed results.
const MAX_RESULTS: usize = 256;

/// Bounds on the shutdown drain window.
const MIN_SHUTDOWN_WINDOW: Duration = Duration::from_millis(100);
const MAX_SHUTDOWN_WINDOW: Duration = Duration::from_secs(15);

/// Counts by worker state; components sum to `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSummary {
    pub total: usize,
    pub idle: usize,
    pub active: usize,
    pub stopped: usize,
    pub error: usize,
}

struct StoredResult {
    result: WorkerResult,
    stored_at: Instant,
}

/// The worker pool.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    enable_concurrency_lock: bool,
    workspace: Arc<dyn WorkspaceProvider>,
    developer: SharedDeveloper,
    workers: StdMutex<HashMap<String, Arc<Worker>>>,
    results: Arc<StdMutex<HashMap<String, StoredResult>>>,
    handles: Arc<StdMutex<HashMap<String, JoinHandle<()>>>>,
    /// Executions dispatched but not yet recorded. Closes the gap between a
    /// worker going IDLE and its result landing in the map.
    in_flight: Arc<StdMutex<HashSet<String>>>,
    shutdown: CancellationToken,
}

impl WorkerPool {
    pub fn new(
        config: WorkerPoolConfig,
        enable_concurrency_lock: bool,
        workspace: Arc<dyn WorkspaceProvider>,
        developer: SharedDeveloper,
    ) -> Self {
        Self {
            config,
            enable_concurrency_lock,
            workspace,
            developer,
            workers: StdMutex::new(HashMap::new()),
            results: Arc::new(StdMutex::new(HashMap::new())),
            handles: Arc::new(StdMutex::new(HashMap::new())),
            in_flight: Arc::new(StdMutex::new(HashSet::new())),
            shutdown: CancellationToken::new(),
        }
    }

    // ------------------------------------------------------------------
    // Admission
    // ------------------------------------------------------------------

    /// Decide whether to take on a task request.
    ///
    /// Idempotent per task id: a request for a task some worker already
    /// holds returns ACCEPTED with that worker. Back-pressure is expressed
    /// as REJECTED with POOL_FULL or REPO_BUSY.
    pub fn request_work(&self, request: TaskRequest) -> TaskResponse {
        if self.shutdown.is_cancelled() {
            return TaskResponse::error(&request.task_id, "CANCELLED: pool is shutting down");
        }

        // 1. Validation.
        if request.task_id.is_empty() {
            return TaskResponse::error(&request.task_id, "VALIDATION_ERROR: empty task id");
        }
        if split_repository_id(&request.repository_id).is_none() {
            return TaskResponse::error(
                &request.task_id,
                format!(
                    "VALIDATION_ERROR: invalid repository id: {}",
                    request.repository_id
                ),
            );
        }

        let task_id = request.task_id.clone();

        // 2. Idempotency: a worker already holds this task.
        let holder = {
            let workers = self.workers.lock().unwrap();
            workers
                .values()
                .find(|w| w.current_task_id().as_deref() == Some(task_id.as_str()))
                .cloned()
        };
        if let Some(worker) = holder {
            if worker.status() == WorkerStatus::Error {
                // Fresh feedback overwrites the retained request; any other
                // retry resumes the retained request as-is.
                let resumed = if request.action == TaskAction::ProcessFeedback {
                    worker
                        .overwrite_request(request)
                        .and_then(|()| worker.resume(&self.shutdown))
                } else {
                    worker.resume(&self.shutdown)
                };
                if let Err(e) = resumed {
                    return TaskResponse::error(&task_id, e.to_string());
                }
                self.dispatch(&worker, &task_id);
                info!(task = %task_id, worker = worker.id(), "error worker resumed");
                return TaskResponse::accepted(&task_id, worker.id());
            }
            debug!(task = %task_id, worker = worker.id(), "task already held");
            return TaskResponse::accepted(&task_id, worker.id());
        }

        // 3. Repository concurrency: at most one active worker per repo.
        if self.enable_concurrency_lock {
            let busy = {
                let workers = self.workers.lock().unwrap();
                workers.values().any(|w| {
                    w.status().is_active()
                        && w.current_repository_id().as_deref()
                            == Some(request.repository_id.as_str())
                })
            };
            if busy {
                debug!(task = %task_id, repository = %request.repository_id, "repository busy");
                return TaskResponse::rejected(&task_id, RejectReason::RepoBusy);
            }
        }

        // 4. Find an idle worker, spawning lazily up to the cap.
        let worker = match self.acquire_idle_worker() {
            Some(worker) => worker,
            None => {
                debug!(task = %task_id, "pool full");
                return TaskResponse::rejected(&task_id, RejectReason::PoolFull);
            }
        };

        // 5. Assign and dispatch.
        if let Err(e) = worker.assign(request, &self.shutdown) {
            // Lost a race for this worker; the planner retries next tick.
            return TaskResponse::error(&task_id, e.to_string());
        }
        self.dispatch(&worker, &task_id);
        info!(task = %task_id, worker = worker.id(), "task accepted");
        TaskResponse::accepted(&task_id, worker.id())
    }

    /// Pick the longest-idle IDLE worker, creating one if there is room.
    fn acquire_idle_worker(&self) -> Option<Arc<Worker>> {
        let mut workers = self.workers.lock().unwrap();

        let idle = workers
            .values()
            .filter(|w| w.status() == WorkerStatus::Idle)
            .max_by_key(|w| w.idle_for())
            .cloned();
        if idle.is_some() {
            return idle;
        }

        if workers.len() < self.config.max_workers {
            let id = format!("worker-{}", &Uuid::new_v4().simple().to_string()[..8]);
            let worker = Arc::new(Worker::new(
                &id,
                Arc::clone(&self.workspace),
                Arc::clone(&self.developer),
                &self.shutdown,
            ));
            info!(worker = %id, size = workers.len() + 1, "spawned worker");
            workers.insert(id, Arc::clone(&worker));
            return Some(worker);
        }

        None
    }

    /// Schedule `execute` on its own task and track the handle.
    fn dispatch(&self, worker: &Arc<Worker>, task_id: &str) {
        let worker = Arc::clone(worker);
        let results = Arc::clone(&self.results);
        let handles = Arc::clone(&self.handles);
        let in_flight = Arc::clone(&self.in_flight);
        let task_id = task_id.to_string();
        let task_key = task_id.clone();

        // Marked in flight before the spawn so admission and the planner
        // never observe a gap between IDLE and the recorded result.
        self.in_flight.lock().unwrap().insert(task_id.clone());

        let handle = tokio::spawn(async move {
            match worker.execute().await {
                Ok(result) => {
                    debug!(task = %task_id, success = result.success, "recording result");
                    record_result(&results, result);
                }
                Err(e) => {
                    error!(task = %task_id, error = %e, "execution could not start");
                }
            }
            in_flight.lock().unwrap().remove(&task_id);
            handles.lock().unwrap().remove(&task_id);
        });

        self.handles.lock().unwrap().insert(task_key, handle);
    }

    // ------------------------------------------------------------------
    // Results and status
    // ------------------------------------------------------------------

    /// Take the completed result for a task, if one is waiting.
    ///
    /// Hands each result out exactly once.
    pub fn take_result(&self, task_id: &str) -> Option<WorkerResult> {
        self.results
            .lock()
            .unwrap()
            .remove(task_id)
            .map(|stored| stored.result)
    }

    /// Whether the task is in flight: held by a WAITING/WORKING worker, or
    /// finished with the result still being recorded.
    pub fn has_active_task(&self, task_id: &str) -> bool {
        {
            let workers = self.workers.lock().unwrap();
            if workers.values().any(|w| {
                w.status().is_active() && w.current_task_id().as_deref() == Some(task_id)
            }) {
                return true;
            }
        }
        let has_result = self.results.lock().unwrap().contains_key(task_id);
        !has_result && self.in_flight.lock().unwrap().contains(task_id)
    }

    /// Number of executions dispatched but not yet recorded.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().unwrap().len()
    }

    /// Whether any worker holds the task, in any state (including ERROR).
    pub fn holds_task(&self, task_id: &str) -> bool {
        let workers = self.workers.lock().unwrap();
        workers
            .values()
            .any(|w| w.current_task_id().as_deref() == Some(task_id))
    }

    /// Progress snapshot of one worker.
    pub fn worker_status(&self, worker_id: &str) -> Option<WorkerProgress> {
        let workers = self.workers.lock().unwrap();
        workers.get(worker_id).map(|w| w.progress())
    }

    /// Progress snapshots of all workers.
    pub fn workers(&self) -> Vec<WorkerProgress> {
        let workers = self.workers.lock().unwrap();
        workers.values().map(|w| w.progress()).collect()
    }

    /// State counts; `idle + active + stopped + error == total`.
    pub fn summary(&self) -> PoolSummary {
        let workers = self.workers.lock().unwrap();
        let mut summary = PoolSummary {
            total: workers.len(),
            idle: 0,
            active: 0,
            stopped: 0,
            error: 0,
        };
        for worker in workers.values() {
            match worker.status() {
                WorkerStatus::Idle => summary.idle += 1,
                WorkerStatus::Waiting | WorkerStatus::Working => summary.active += 1,
                WorkerStatus::Stopped => summary.stopped += 1,
                WorkerStatus::Error => summary.error += 1,
            }
        }
        summary
    }

    // ------------------------------------------------------------------
    // Capacity management and shutdown
    // ------------------------------------------------------------------

    /// Periodic maintenance: retire idle workers and expire old results.
    ///
    /// Runs until the pool shuts down.
    pub async fn run_maintenance(&self) {
        let period = Duration::from_millis(self.config.worker_timeout_ms.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => return,
                _ = ticker.tick() => {
                    self.retire_idle_workers();
                    self.expire_results();
                }
            }
        }
    }

    /// Retire workers idle past the timeout, respecting `min_workers`.
    ///
    /// Retirement is deferred while a worker holds a task.
    fn retire_idle_workers(&self) {
        let timeout = Duration::from_millis(self.config.worker_timeout_ms);
        let mut workers = self.workers.lock().unwrap();

        let mut retirable: Vec<String> = workers
            .values()
            .filter(|w| {
                w.status() == WorkerStatus::Idle
                    && w.current_task_id().is_none()
                    && w.idle_for() >= timeout
            })
            .map(|w| w.id().to_string())
            .collect();

        // Longest idle first.
        retirable.sort_by_key(|id| {
            workers
                .get(id)
                .map(|w| w.idle_for())
                .unwrap_or(Duration::ZERO)
        });
        retirable.reverse();

        for id in retirable {
            if workers.len() <= self.config.min_workers {
                break;
            }
            workers.remove(&id);
            info!(worker = %id, "retired idle worker");
        }
    }

    fn expire_results(&self) {
        let mut results = self.results.lock().unwrap();
        results.retain(|_, stored| stored.stored_at.elapsed() < RESULT_TTL);
    }

    /// Cancel all workers and wait for in-flight executions to drain.
    ///
    /// The wait window is clamped to 100ms..15s; stragglers are aborted.
    pub async fn shutdown(&self, window: Duration) {
        let window = window.clamp(MIN_SHUTDOWN_WINDOW, MAX_SHUTDOWN_WINDOW);
        info!(window = ?window, "pool shutting down");
        self.shutdown.cancel();

        let workers: Vec<Arc<Worker>> = {
            let workers = self.workers.lock().unwrap();
            workers.values().cloned().collect()
        };
        for worker in workers {
            worker.cancel().await;
        }

        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut handles = self.handles.lock().unwrap();
            handles.drain().collect()
        };

        let deadline = Instant::now() + window;
        for (task_id, handle) in handles {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, handle).await.is_err() {
                warn!(task = %task_id, "execution did not drain in time, aborting");
            }
        }

        info!("pool shut down");
    }

    /// Whether shutdown has been requested.
    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

fn record_result(results: &StdMutex<HashMap<String, StoredResult>>, result: WorkerResult) {
    let mut results = results.lock().unwrap();

    results.retain(|_, stored| stored.stored_at.elapsed() < RESULT_TTL);
    if results.len() >= MAX_RESULTS {
        // Drop the oldest to stay bounded.
        if let Some(oldest) = results
            .iter()
            .max_by_key(|(_, stored)| stored.stored_at.elapsed())
            .map(|(k, _)| k.clone())
        {
            results.remove(&oldest);
        }
    }

    results.insert(
        result.task_id.clone(),
        StoredResult {
            result,
            stored_at: Instant::now(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::developer::MockDeveloper;
    use crate::types::{BoardItem, ContentType, ItemStatus, TaskResponseStatus};
    use crate::workspace::testing::StubWorkspace;
    use chrono::Utc;
    use tempfile::TempDir;

    fn board_item(id: &str) -> BoardItem {
        BoardItem {
            id: id.into(),
            title: format!("Task {id}"),
            description: None,
            status: ItemStatus::Todo,
            priority: None,
            assignee: None,
            labels: vec![],
            pull_request_urls: vec![],
            content_type: ContentType::Issue,
            repository: Some("octo/webapp".into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn start_request(id: &str, repo: &str) -> TaskRequest {
        TaskRequest::new(id, TaskAction::StartNewTask, repo).with_board_item(board_item(id))
    }

    fn pool_with(
        temp: &TempDir,
        config: WorkerPoolConfig,
        concurrency_lock: bool,
        developer: MockDeveloper,
    ) -> WorkerPool {
        WorkerPool::new(
            config,
            concurrency_lock,
            Arc::new(StubWorkspace::new(temp.path())),
            Arc::new(developer),
        )
    }

    async fn wait_for_result(pool: &WorkerPool, task_id: &str) -> WorkerResult {
        for _ in 0..200 {
            if let Some(result) = pool.take_result(task_id) {
                return result;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no result for {task_id}");
    }

    #[tokio::test]
    async fn test_accept_and_complete() {
        let temp = TempDir::new().unwrap();
        let pool = pool_with(
            &temp,
            WorkerPoolConfig::default(),
            false,
            MockDeveloper::new().with_transcript("PR: https://github.com/octo/webapp/pull/1"),
        );

        let response = pool.request_work(start_request("t1", "octo/webapp"));
        assert!(response.is_accepted());
        assert!(response.worker_id.is_some());

        let result = wait_for_result(&pool, "t1").await;
        assert!(result.success);
        assert_eq!(
            result.pull_request_url.as_deref(),
            Some("https://github.com/octo/webapp/pull/1")
        );

        // Result handed out exactly once.
        assert!(pool.take_result("t1").is_none());

        let summary = pool.summary();
        assert_eq!(summary.active, 0);
        assert_eq!(summary.idle + summary.active + summary.stopped + summary.error, summary.total);
    }

    #[tokio::test]
    async fn test_idempotent_admission_for_held_task() {
        let temp = TempDir::new().unwrap();
        let pool = pool_with(
            &temp,
            WorkerPoolConfig::default(),
            false,
            MockDeveloper::new().with_execution_delay(Duration::from_millis(300)),
        );

        let first = pool.request_work(start_request("t1", "octo/webapp"));
        let second = pool.request_work(start_request("t1", "octo/webapp"));
        assert!(second.is_accepted());
        assert_eq!(first.worker_id, second.worker_id);

        // Only one worker was consumed.
        assert_eq!(pool.summary().active, 1);
    }

    #[tokio::test]
    async fn test_pool_full_rejection() {
        let temp = TempDir::new().unwrap();
        let config = WorkerPoolConfig {
            min_workers: 0,
            max_workers: 1,
            worker_timeout_ms: 60_000,
        };
        let pool = pool_with(
            &temp,
            config,
            false,
            MockDeveloper::new().with_execution_delay(Duration::from_millis(300)),
        );

        assert!(pool.request_work(start_request("t1", "octo/webapp")).is_accepted());
        let rejected = pool.request_work(start_request("t2", "octo/other"));
        assert_eq!(rejected.status, TaskResponseStatus::Rejected);
        assert_eq!(rejected.reason, Some(RejectReason::PoolFull));
    }

    #[tokio::test]
    async fn test_repo_busy_rejection_and_recovery() {
        let temp = TempDir::new().unwrap();
        let pool = pool_with(
            &temp,
            WorkerPoolConfig::default(),
            true,
            MockDeveloper::new().with_execution_delay(Duration::from_millis(100)),
        );

        assert!(pool.request_work(start_request("t1", "octo/webapp")).is_accepted());

        let rejected = pool.request_work(start_request("t2", "octo/webapp"));
        assert_eq!(rejected.status, TaskResponseStatus::Rejected);
        assert_eq!(rejected.reason, Some(RejectReason::RepoBusy));

        // A different repository is not blocked.
        assert!(pool.request_work(start_request("t3", "octo/other")).is_accepted());

        // After the first worker finishes, the same repo admits again.
        let _ = wait_for_result(&pool, "t1").await;
        assert!(pool.request_work(start_request("t2", "octo/webapp")).is_accepted());
    }

    #[tokio::test]
    async fn test_validation_errors() {
        let temp = TempDir::new().unwrap();
        let pool = pool_with(&temp, WorkerPoolConfig::default(), false, MockDeveloper::new());

        let bad_task = pool.request_work(TaskRequest::new("", TaskAction::StartNewTask, "o/r"));
        assert_eq!(bad_task.status, TaskResponseStatus::Error);
        assert!(bad_task.message.unwrap().contains("VALIDATION_ERROR"));

        let bad_repo = pool.request_work(TaskRequest::new("t", TaskAction::StartNewTask, "nonsense"));
        assert_eq!(bad_repo.status, TaskResponseStatus::Error);
    }

    #[tokio::test]
    async fn test_summary_components_sum_to_total() {
        let temp = TempDir::new().unwrap();
        let pool = pool_with(
            &temp,
            WorkerPoolConfig::default(),
            false,
            MockDeveloper::new().with_execution_delay(Duration::from_millis(200)),
        );

        pool.request_work(start_request("t1", "octo/a"));
        pool.request_work(start_request("t2", "octo/b"));

        let summary = pool.summary();
        assert_eq!(summary.total, 2);
        assert_eq!(
            summary.idle + summary.active + summary.stopped + summary.error,
            summary.total
        );
        assert_eq!(summary.active, 2);
    }

    #[tokio::test]
    async fn test_worker_bounds_respected() {
        let temp = TempDir::new().unwrap();
        let config = WorkerPoolConfig {
            min_workers: 1,
            max_workers: 2,
            worker_timeout_ms: 1, // retire almost immediately
        };
        let pool = pool_with(&temp, config, false, MockDeveloper::new());

        pool.request_work(start_request("t1", "octo/a"));
        pool.request_work(start_request("t2", "octo/b"));
        let _ = wait_for_result(&pool, "t1").await;
        let _ = wait_for_result(&pool, "t2").await;
        assert_eq!(pool.summary().total, 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.retire_idle_workers();

        // Retirement respects min_workers.
        let summary = pool.summary();
        assert_eq!(summary.total, 1);
        assert_eq!(summary.idle, 1);
    }

    #[tokio::test]
    async fn test_feedback_on_error_worker_resumes() {
        use crate::types::Comment;

        let temp = TempDir::new().unwrap();
        // Failing workspace: the feedback execution fails in stage 1 and the
        // worker parks in ERROR retaining the task.
        let pool = WorkerPool::new(
            WorkerPoolConfig::default(),
            false,
            Arc::new(StubWorkspace::failing(temp.path())),
            Arc::new(MockDeveloper::new()),
        );

        let feedback = TaskRequest::new("t1", TaskAction::ProcessFeedback, "octo/webapp")
            .with_comments(vec![Comment {
                id: "c1".into(),
                author: "reviewer".into(),
                body: "fix this".into(),
                created_at: Utc::now(),
                path: None,
                line: None,
                url: None,
                author_is_bot: false,
            }]);

        assert!(pool.request_work(feedback.clone()).is_accepted());
        let result = wait_for_result(&pool, "t1").await;
        assert!(!result.success);
        assert_eq!(pool.summary().error, 1);
        assert!(pool.holds_task("t1"));
        assert!(!pool.has_active_task("t1"));

        // A fresh feedback request overwrites and resumes the same worker.
        let response = pool.request_work(feedback);
        assert!(response.is_accepted());
        let result = wait_for_result(&pool, "t1").await;
        assert!(!result.success); // workspace still failing, but it ran again
    }

    #[tokio::test]
    async fn test_resume_request_restarts_error_worker() {
        use crate::types::Comment;

        let temp = TempDir::new().unwrap();
        let pool = WorkerPool::new(
            WorkerPoolConfig::default(),
            false,
            Arc::new(StubWorkspace::failing(temp.path())),
            Arc::new(MockDeveloper::new()),
        );

        let feedback = TaskRequest::new("t1", TaskAction::ProcessFeedback, "octo/webapp")
            .with_comments(vec![Comment {
                id: "c1".into(),
                author: "reviewer".into(),
                body: "fix".into(),
                created_at: Utc::now(),
                path: None,
                line: None,
                url: None,
                author_is_bot: false,
            }]);
        pool.request_work(feedback);
        let _ = wait_for_result(&pool, "t1").await;
        assert_eq!(pool.summary().error, 1);

        // A plain retry (RESUME_TASK) re-runs the retained request.
        let response = pool.request_work(TaskRequest::new(
            "t1",
            TaskAction::ResumeTask,
            "octo/webapp",
        ));
        assert!(response.is_accepted());
        let result = wait_for_result(&pool, "t1").await;
        assert!(!result.success);
        assert_eq!(pool.summary().error, 1);
    }

    #[tokio::test]
    async fn test_shutdown_drains_within_window() {
        let temp = TempDir::new().unwrap();
        let pool = pool_with(
            &temp,
            WorkerPoolConfig::default(),
            false,
            MockDeveloper::new().with_execution_delay(Duration::from_secs(30)),
        );

        pool.request_work(start_request("t1", "octo/webapp"));
        // Give the execution a moment to reach the assistant wait.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let started = Instant::now();
        pool.shutdown(Duration::from_secs(5)).await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_millis(0));
        assert!(elapsed < Duration::from_secs(15));
        assert!(pool.is_shutting_down());
        assert_eq!(pool.summary().active, 0);

        // New work is refused after shutdown.
        let response = pool.request_work(start_request("t9", "octo/webapp"));
        assert_eq!(response.status, TaskResponseStatus::Error);
    }
}
