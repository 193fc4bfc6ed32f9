// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The planner - a periodic reconciler.
//!
//! Every tick, the planner snapshots the board, decides at most one action
//! per item from the decision table below, submits the resulting task
//! requests to the pool, and advances item statuses from the outcomes.
//!
//! | Item status | Precondition                              | Action           |
//! |-------------|-------------------------------------------|------------------|
//! | TODO        | -                                         | START_NEW_TASK   |
//! | IN_PROGRESS | completed result with PR                  | → IN_REVIEW      |
//! | IN_PROGRESS | worker in flight                          | -                |
//! | IN_PROGRESS | nobody working                            | RESUME_TASK      |
//! | IN_REVIEW   | PR open, new filtered comments            | PROCESS_FEEDBACK |
//! | IN_REVIEW   | PR open, approved, quiet                  | MERGE_REQUEST    |
//! | IN_REVIEW   | PR merged                                 | → DONE           |
//! | DONE        | -                                         | cleanup          |
//!
//! Ticks never overlap, a failing item never aborts a tick, and REJECTED
//! admissions (POOL_FULL / REPO_BUSY) simply defer to the next tick.

mod state;

pub use state::{PlannerState, TaskState};

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PlannerConfig;
use crate::error::BackendError;
use crate::pool::WorkerPool;
use crate::services::{CommentFilter, SharedBoardService, SharedPullRequestService};
use crate::types::{
    BoardItem, ItemStatus, PullRequestState, TaskAction, TaskRequest, TaskResponse,
    TaskResponseStatus,
};
use crate::workspace::WorkspaceProvider;

/// Outcome of one reconciliation tick.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TickSummary {
    /// Items examined after repository filtering.
    pub examined: usize,
    /// Task requests submitted to the pool.
    pub submitted: usize,
    /// Items whose reconciliation failed this tick.
    pub item_errors: usize,
}

/// Planner status snapshot for the control surface.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannerStatus {
    pub ticks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick_at: Option<chrono::DateTime<Utc>>,
    pub stuck_tasks: Vec<String>,
}

/// The periodic reconciler.
pub struct Planner {
    config: PlannerConfig,
    board: SharedBoardService,
    pulls: SharedPullRequestService,
    pool: Arc<WorkerPool>,
    workspace: Arc<dyn WorkspaceProvider>,
    comment_filter: CommentFilter,
    /// Tick serialisation: run loop and force_sync share this lock.
    state: Mutex<PlannerState>,
}

impl Planner {
    pub fn new(
        config: PlannerConfig,
        board: SharedBoardService,
        pulls: SharedPullRequestService,
        pool: Arc<WorkerPool>,
        workspace: Arc<dyn WorkspaceProvider>,
    ) -> Self {
        let comment_filter = CommentFilter::new(config.pull_request_filter.clone());
        Self {
            config,
            board,
            pulls,
            pool,
            workspace,
            comment_filter,
            state: Mutex::new(PlannerState::default()),
        }
    }

    /// Run the reconciliation loop until cancelled.
    ///
    /// A tick that is still running when the timer fires defers the next
    /// tick; consecutive identical failures are coalesced in the logs.
    pub async fn run(&self, cancel: CancellationToken) {
        let period = std::time::Duration::from_millis(self.config.monitoring_interval_ms);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval = ?period, "planner started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("planner stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(summary) => {
                            debug!(
                                examined = summary.examined,
                                submitted = summary.submitted,
                                errors = summary.item_errors,
                                "tick complete"
                            );
                        }
                        Err(e) => self.log_tick_failure(e).await,
                    }
                }
            }
        }
    }

    async fn log_tick_failure(&self, error: BackendError) {
        let signature = error.to_string();
        let mut state = self.state.lock().await;
        if state.last_failure_signature.as_deref() == Some(signature.as_str()) {
            state.repeated_failures += 1;
            debug!(
                repeats = state.repeated_failures,
                error = %signature,
                "tick failed again with the same error"
            );
        } else {
            state.last_failure_signature = Some(signature.clone());
            state.repeated_failures = 1;
            error!(error = %signature, "tick failed");
        }
    }

    /// Run one reconciliation cycle.
    ///
    /// Also the implementation of the `force_sync` control operation.
    pub async fn tick(&self) -> Result<TickSummary, BackendError> {
        let mut state = self.state.lock().await;
        let mut summary = TickSummary::default();

        let items = self.board.get_items(&self.config.board_id, None).await?;
        state.last_failure_signature = None;
        state.repeated_failures = 0;

        // At most one request per task per tick.
        let mut emitted: HashSet<String> = HashSet::new();

        for item in items {
            let Some(repository) = item.repository.clone() else {
                debug!(item = %item.id, "item has no repository, skipping");
                continue;
            };
            if !self.config.repository_filter.allows(&repository) {
                continue;
            }
            summary.examined += 1;

            if !emitted.insert(item.id.clone()) {
                // A second decision for the same task in one tick would
                // break at-most-once emission.
                warn!(item = %item.id, "duplicate board item in one tick, skipping");
                continue;
            }

            match self
                .reconcile_item(&item, &repository, &mut state, &mut summary)
                .await
            {
                Ok(()) => {}
                Err(e) => {
                    summary.item_errors += 1;
                    warn!(item = %item.id, error = %e, "item reconciliation failed");
                }
            }
        }

        state.ticks += 1;
        state.last_tick_at = Some(Utc::now());
        Ok(summary)
    }

    /// Decide and apply at most one action for one item.
    async fn reconcile_item(
        &self,
        item: &BoardItem,
        repository: &str,
        state: &mut PlannerState,
        summary: &mut TickSummary,
    ) -> Result<(), BackendError> {
        if state.is_stuck(&item.id, item.status) {
            debug!(item = %item.id, "stuck, waiting for a board status change");
            return Ok(());
        }

        match item.status {
            ItemStatus::Todo => self.reconcile_todo(item, repository, state, summary).await,
            ItemStatus::InProgress => {
                self.reconcile_in_progress(item, repository, state, summary).await
            }
            ItemStatus::InReview => {
                self.reconcile_in_review(item, repository, state, summary).await
            }
            ItemStatus::Done => {
                self.reconcile_done(item, state).await;
                Ok(())
            }
        }
    }

    async fn reconcile_todo(
        &self,
        item: &BoardItem,
        repository: &str,
        state: &mut PlannerState,
        summary: &mut TickSummary,
    ) -> Result<(), BackendError> {
        let request = TaskRequest::new(&item.id, TaskAction::StartNewTask, repository)
            .with_board_item(item.clone());
        let response = self.submit(request, summary);

        match response.status {
            TaskResponseStatus::Accepted => {
                state.pending_action.insert(item.id.clone(), TaskAction::StartNewTask);
                if let Some(url) = &response.pull_request_url {
                    self.board.add_pull_request_to_item(&item.id, url).await?;
                }
                self.board
                    .update_item_status(&item.id, ItemStatus::InProgress)
                    .await?;
                info!(item = %item.id, "started, moved to IN_PROGRESS");
            }
            TaskResponseStatus::Rejected => {
                debug!(item = %item.id, reason = ?response.reason, "deferred");
            }
            _ => self.note_error(item, state, &response),
        }
        Ok(())
    }

    async fn reconcile_in_progress(
        &self,
        item: &BoardItem,
        repository: &str,
        state: &mut PlannerState,
        summary: &mut TickSummary,
    ) -> Result<(), BackendError> {
        // A completed execution has first claim on this item.
        if let Some(result) = self.pool.take_result(&item.id) {
            state.pending_action.remove(&item.id);

            if result.success {
                let url = result
                    .pull_request_url
                    .clone()
                    .or_else(|| item.latest_pull_request_url().map(String::from));
                if let Some(url) = url {
                    if result.pull_request_url.is_some() {
                        self.board.add_pull_request_to_item(&item.id, &url).await?;
                    }
                    self.board
                        .update_item_status(&item.id, ItemStatus::InReview)
                        .await?;
                    state.clear_task_errors(&item.id);
                    info!(item = %item.id, pr = %url, "completed, moved to IN_REVIEW");
                    return Ok(());
                }
                // Success without any pull request to review: treat as a
                // failed attempt and resume next tick.
                warn!(item = %item.id, "execution succeeded without a pull request");
                if state.record_task_error(
                    &item.id,
                    item.status,
                    "no pull request produced",
                    self.config.max_retry_attempts,
                ) {
                    warn!(item = %item.id, "marked stuck");
                }
                return Ok(());
            }

            let message = result
                .error_message
                .clone()
                .unwrap_or_else(|| "unknown failure".into());
            if state.record_task_error(
                &item.id,
                item.status,
                &message,
                self.config.max_retry_attempts,
            ) {
                warn!(item = %item.id, error = %message, "marked stuck");
            }
            return Ok(());
        }

        if self.pool.has_active_task(&item.id) {
            return Ok(());
        }

        // Nobody working and no result waiting: pick the task back up.
        let request = TaskRequest::new(&item.id, TaskAction::ResumeTask, repository)
            .with_board_item(item.clone());
        let response = self.submit(request, summary);
        match response.status {
            TaskResponseStatus::Accepted => {
                state.pending_action.insert(item.id.clone(), TaskAction::ResumeTask);
                debug!(item = %item.id, "resumed");
            }
            TaskResponseStatus::Rejected => {
                debug!(item = %item.id, reason = ?response.reason, "resume deferred");
            }
            _ => self.note_error(item, state, &response),
        }
        Ok(())
    }

    async fn reconcile_in_review(
        &self,
        item: &BoardItem,
        repository: &str,
        state: &mut PlannerState,
        summary: &mut TickSummary,
    ) -> Result<(), BackendError> {
        let Some(pr_url) = item.latest_pull_request_url().map(String::from) else {
            debug!(item = %item.id, "IN_REVIEW without a pull request URL");
            return Ok(());
        };

        // Merge outcomes land while the item is still IN_REVIEW.
        if let Some(result) = self.pool.take_result(&item.id) {
            let pending = state.pending_action.remove(&item.id);
            if result.success && pending == Some(TaskAction::MergeRequest) {
                self.board.update_item_status(&item.id, ItemStatus::Done).await?;
                state.clear_task_errors(&item.id);
                info!(item = %item.id, "merged, moved to DONE");
                return Ok(());
            }
            if !result.success {
                let message = result
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unknown failure".into());
                if state.record_task_error(
                    &item.id,
                    item.status,
                    &message,
                    self.config.max_retry_attempts,
                ) {
                    warn!(item = %item.id, error = %message, "marked stuck");
                }
                return Ok(());
            }
        }

        let pr = self.pulls.get_pull_request(repository, &pr_url).await?;

        match pr.state {
            PullRequestState::Merged => {
                self.board.update_item_status(&item.id, ItemStatus::Done).await?;
                state.clear_task_errors(&item.id);
                info!(item = %item.id, "pull request merged, moved to DONE");
                return Ok(());
            }
            PullRequestState::Closed => {
                debug!(item = %item.id, "pull request closed without merge");
                return Ok(());
            }
            PullRequestState::Open => {}
        }

        // New reviewer feedback wins over merging.
        let since = state.last_seen(&item.id);
        let fresh = self
            .pulls
            .get_new_comments(repository, &pr_url, since)
            .await?;
        let feedback = self.comment_filter.filter(fresh.iter(), &pr.author);

        if !feedback.is_empty() {
            let newest = feedback
                .iter()
                .map(|c| c.created_at)
                .max()
                .unwrap_or_else(Utc::now);
            let count = feedback.len();

            let request = TaskRequest::new(&item.id, TaskAction::ProcessFeedback, repository)
                .with_board_item(item.clone())
                .with_comments(feedback)
                .with_pull_request_url(&pr_url);
            let response = self.submit(request, summary);

            // Advance the watermark even on rejection so one noisy comment
            // cannot amplify into a request storm.
            state.advance_last_seen(&item.id, newest);

            match response.status {
                TaskResponseStatus::Accepted => {
                    state
                        .pending_action
                        .insert(item.id.clone(), TaskAction::ProcessFeedback);
                    self.board
                        .update_item_status(&item.id, ItemStatus::InProgress)
                        .await?;
                    info!(item = %item.id, comments = count, "feedback dispatched, moved to IN_PROGRESS");
                }
                TaskResponseStatus::Rejected => {
                    debug!(item = %item.id, reason = ?response.reason, "feedback deferred");
                }
                _ => self.note_error(item, state, &response),
            }
            return Ok(());
        }

        if pr.is_approved {
            let request = TaskRequest::new(&item.id, TaskAction::MergeRequest, repository)
                .with_board_item(item.clone())
                .with_pull_request_url(&pr_url);
            let response = self.submit(request, summary);
            match response.status {
                TaskResponseStatus::Accepted => {
                    state
                        .pending_action
                        .insert(item.id.clone(), TaskAction::MergeRequest);
                    info!(item = %item.id, "approved, merge dispatched");
                }
                TaskResponseStatus::Rejected => {
                    debug!(item = %item.id, reason = ?response.reason, "merge deferred");
                }
                _ => self.note_error(item, state, &response),
            }
        }
        Ok(())
    }

    async fn reconcile_done(&self, item: &BoardItem, state: &mut PlannerState) {
        if state.cleaned.contains(&item.id) {
            return;
        }
        if item.pull_request_urls.is_empty() {
            // Manually closed without a PR; nothing unusual to do beyond
            // the cleanup itself.
            debug!(item = %item.id, "done without a pull request");
        }
        self.workspace.cleanup(&item.id).await;
        state.cleaned.insert(item.id.clone());
        state.pending_action.remove(&item.id);
        state.clear_task_errors(&item.id);
    }

    fn submit(&self, request: TaskRequest, summary: &mut TickSummary) -> TaskResponse {
        summary.submitted += 1;
        debug!(task = %request.task_id, action = %request.action, "submitting");
        self.pool.request_work(request)
    }

    fn note_error(&self, item: &BoardItem, state: &mut PlannerState, response: &TaskResponse) {
        let message = response
            .message
            .clone()
            .unwrap_or_else(|| "unknown manager error".into());
        if state.record_task_error(
            &item.id,
            item.status,
            &message,
            self.config.max_retry_attempts,
        ) {
            warn!(item = %item.id, error = %message, "marked stuck");
        } else {
            debug!(item = %item.id, error = %message, "manager error, will retry");
        }
    }

    /// Status snapshot for the control surface.
    pub async fn status(&self) -> PlannerStatus {
        let state = self.state.lock().await;
        PlannerStatus {
            ticks: state.ticks,
            last_tick_at: state.last_tick_at,
            stuck_tasks: state.stuck_tasks(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PullRequestFilterConfig, RepositoryFilterConfig, WorkerPoolConfig};
    use crate::developer::MockDeveloper;
    use crate::services::{MockBoardService, MockPullRequestService, ProjectBoardService};
    use crate::workspace::testing::StubWorkspace;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        planner: Planner,
        board: Arc<MockBoardService>,
        pulls: Arc<MockPullRequestService>,
        pool: Arc<WorkerPool>,
        _temp: TempDir,
    }

    fn harness_with(developer: MockDeveloper, pool_config: WorkerPoolConfig) -> Harness {
        let temp = TempDir::new().unwrap();
        let board = Arc::new(MockBoardService::new());
        let pulls = Arc::new(MockPullRequestService::new());
        let workspace: Arc<StubWorkspace> = Arc::new(StubWorkspace::new(temp.path()));
        let pool = Arc::new(WorkerPool::new(
            pool_config,
            false,
            workspace.clone(),
            Arc::new(developer),
        ));
        let config = PlannerConfig {
            board_id: "board-1".into(),
            monitoring_interval_ms: 50,
            max_retry_attempts: 2,
            timeout_ms: 1000,
            repository_filter: RepositoryFilterConfig::default(),
            pull_request_filter: PullRequestFilterConfig {
                exclude_author: true,
                allowed_bots: vec![],
            },
        };
        let planner = Planner::new(
            config,
            board.clone(),
            pulls.clone(),
            pool.clone(),
            workspace,
        );
        Harness {
            planner,
            board,
            pulls,
            pool,
            _temp: temp,
        }
    }

    fn harness(developer: MockDeveloper) -> Harness {
        harness_with(developer, WorkerPoolConfig::default())
    }

    async fn drain_pool(pool: &WorkerPool) {
        for _ in 0..200 {
            if pool.summary().active == 0 && pool.in_flight_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("pool did not drain");
    }

    #[tokio::test]
    async fn test_todo_starts_and_moves_to_in_progress() {
        let h = harness(
            MockDeveloper::new().with_transcript("PR: https://github.com/octo/webapp/pull/10"),
        );
        h.board.add_item("t1", "Task", "octo/webapp", ItemStatus::Todo);

        let summary = h.planner.tick().await.unwrap();
        assert_eq!(summary.examined, 1);
        assert_eq!(summary.submitted, 1);
        assert_eq!(h.board.item("t1").unwrap().status, ItemStatus::InProgress);
    }

    #[tokio::test]
    async fn test_completed_result_moves_to_in_review_with_pr() {
        let h = harness(
            MockDeveloper::new().with_transcript("PR: https://github.com/octo/webapp/pull/10"),
        );
        h.board.add_item("t1", "Task", "octo/webapp", ItemStatus::Todo);

        h.planner.tick().await.unwrap();
        drain_pool(&h.pool).await;
        h.planner.tick().await.unwrap();

        let item = h.board.item("t1").unwrap();
        assert_eq!(item.status, ItemStatus::InReview);
        assert_eq!(
            item.pull_request_urls,
            vec!["https://github.com/octo/webapp/pull/10"]
        );
    }

    #[tokio::test]
    async fn test_in_progress_without_worker_resumes() {
        let h = harness(MockDeveloper::new().with_transcript("working on it"));
        h.board.add_item("t1", "Task", "octo/webapp", ItemStatus::InProgress);

        let summary = h.planner.tick().await.unwrap();
        assert_eq!(summary.submitted, 1);
        // Still IN_PROGRESS while the resumed worker runs.
        assert_eq!(h.board.item("t1").unwrap().status, ItemStatus::InProgress);
    }

    #[tokio::test]
    async fn test_feedback_loop_and_watermark() {
        let h = harness(MockDeveloper::new().with_transcript("addressed"));
        h.board.add_item("t1", "Task", "octo/webapp", ItemStatus::InReview);
        let url = h.pulls.add_pull_request("octo/webapp", 7, "autodev-bot");
        h.board.add_pull_request_to_item("t1", &url).await.unwrap();

        let commented_at = Utc::now();
        h.pulls.add_comment(&url, "reviewer", "please fix", commented_at);

        // First tick: feedback dispatched, item back to IN_PROGRESS.
        let summary = h.planner.tick().await.unwrap();
        assert_eq!(summary.submitted, 1);
        assert_eq!(h.board.item("t1").unwrap().status, ItemStatus::InProgress);
        {
            let state = h.planner.state.lock().await;
            assert!(state.last_seen("t1") >= commented_at);
        }

        drain_pool(&h.pool).await;
        // Feedback execution finished: item returns to IN_REVIEW.
        h.planner.tick().await.unwrap();
        assert_eq!(h.board.item("t1").unwrap().status, ItemStatus::InReview);

        // Same comment again: nothing new, nothing submitted.
        let summary = h.planner.tick().await.unwrap();
        assert_eq!(summary.submitted, 0);
    }

    #[tokio::test]
    async fn test_approved_quiet_pr_merges_to_done() {
        let h = harness(MockDeveloper::new().with_transcript("merged cleanly"));
        h.board.add_item("t1", "Task", "octo/webapp", ItemStatus::InReview);
        let url = h.pulls.add_pull_request("octo/webapp", 7, "autodev-bot");
        h.board.add_pull_request_to_item("t1", &url).await.unwrap();
        h.pulls.set_approved(&url, true);

        // Tick dispatches MERGE_REQUEST.
        let summary = h.planner.tick().await.unwrap();
        assert_eq!(summary.submitted, 1);

        drain_pool(&h.pool).await;
        h.planner.tick().await.unwrap();
        assert_eq!(h.board.item("t1").unwrap().status, ItemStatus::Done);
    }

    #[tokio::test]
    async fn test_merged_pr_moves_to_done() {
        let h = harness(MockDeveloper::new());
        h.board.add_item("t1", "Task", "octo/webapp", ItemStatus::InReview);
        let url = h.pulls.add_pull_request("octo/webapp", 7, "autodev-bot");
        h.board.add_pull_request_to_item("t1", &url).await.unwrap();
        h.pulls.set_state(&url, PullRequestState::Merged);

        h.planner.tick().await.unwrap();
        assert_eq!(h.board.item("t1").unwrap().status, ItemStatus::Done);
    }

    #[tokio::test]
    async fn test_author_comments_do_not_trigger_feedback() {
        let h = harness(MockDeveloper::new());
        h.board.add_item("t1", "Task", "octo/webapp", ItemStatus::InReview);
        let url = h.pulls.add_pull_request("octo/webapp", 7, "autodev-bot");
        h.board.add_pull_request_to_item("t1", &url).await.unwrap();
        h.pulls.add_comment(&url, "autodev-bot", "self note", Utc::now());

        let summary = h.planner.tick().await.unwrap();
        assert_eq!(summary.submitted, 0);
        assert_eq!(h.board.item("t1").unwrap().status, ItemStatus::InReview);
    }

    #[tokio::test]
    async fn test_repository_filter_excludes_items() {
        let mut h = harness(MockDeveloper::new());
        h.planner.config.repository_filter = RepositoryFilterConfig {
            mode: crate::config::FilterMode::Whitelist,
            repositories: vec!["octo/allowed".into()],
        };
        h.board.add_item("t1", "Task", "octo/forbidden", ItemStatus::Todo);

        let summary = h.planner.tick().await.unwrap();
        assert_eq!(summary.examined, 0);
        assert_eq!(summary.submitted, 0);
    }

    #[tokio::test]
    async fn test_repeated_failures_mark_item_stuck() {
        // Transcript always reports a failure.
        let h = harness(
            MockDeveloper::new().with_default_transcript("Error: build exploded\nno details"),
        );
        h.board.add_item("t1", "Task", "octo/webapp", ItemStatus::Todo);

        // Start; each completed failed result counts one retry, with a
        // resume tick in between. max_retry_attempts=2 sticks on the third.
        h.planner.tick().await.unwrap();
        for _ in 0..6 {
            drain_pool(&h.pool).await;
            h.planner.tick().await.unwrap();
        }

        let status = h.planner.status().await;
        assert_eq!(status.stuck_tasks, vec!["t1".to_string()]);

        // Stuck items stop submitting.
        let before = h.board.status_updates().len();
        let summary = h.planner.tick().await.unwrap();
        assert_eq!(summary.submitted, 0);
        assert_eq!(h.board.status_updates().len(), before);
    }

    #[tokio::test]
    async fn test_done_item_cleans_up_once() {
        let h = harness(MockDeveloper::new());
        h.board.add_item("t1", "Task", "octo/webapp", ItemStatus::Done);

        h.planner.tick().await.unwrap();
        h.planner.tick().await.unwrap();
        let state = h.planner.state.lock().await;
        assert!(state.cleaned.contains("t1"));
    }

    #[tokio::test]
    async fn test_pool_full_defers_without_error_state() {
        let h = harness_with(
            MockDeveloper::new().with_execution_delay(Duration::from_millis(300)),
            WorkerPoolConfig {
                min_workers: 0,
                max_workers: 1,
                worker_timeout_ms: 60_000,
            },
        );
        h.board.add_item("t1", "Task", "octo/a", ItemStatus::Todo);
        h.board.add_item("t2", "Task", "octo/b", ItemStatus::Todo);

        let summary = h.planner.tick().await.unwrap();
        assert_eq!(summary.submitted, 2);

        // Exactly one item started; the other stayed TODO with no stuck flag.
        let statuses: Vec<ItemStatus> = ["t1", "t2"]
            .iter()
            .map(|id| h.board.item(id).unwrap().status)
            .collect();
        assert!(statuses.contains(&ItemStatus::InProgress));
        assert!(statuses.contains(&ItemStatus::Todo));
        assert!(h.planner.status().await.stuck_tasks.is_empty());
    }

    #[tokio::test]
    async fn test_backend_failure_does_not_panic_and_is_coalesced() {
        struct FailingBoard;
        #[async_trait::async_trait]
        impl crate::services::ProjectBoardService for FailingBoard {
            async fn get_board(
                &self,
                _: &str,
            ) -> Result<crate::services::Board, BackendError> {
                Err(BackendError::Network("down".into()))
            }
            async fn get_items(
                &self,
                _: &str,
                _: Option<ItemStatus>,
            ) -> Result<Vec<BoardItem>, BackendError> {
                Err(BackendError::Network("down".into()))
            }
            async fn update_item_status(
                &self,
                _: &str,
                _: ItemStatus,
            ) -> Result<BoardItem, BackendError> {
                Err(BackendError::Network("down".into()))
            }
            async fn add_pull_request_to_item(
                &self,
                _: &str,
                _: &str,
            ) -> Result<(), BackendError> {
                Err(BackendError::Network("down".into()))
            }
        }

        let temp = TempDir::new().unwrap();
        let workspace: Arc<StubWorkspace> = Arc::new(StubWorkspace::new(temp.path()));
        let pool = Arc::new(WorkerPool::new(
            WorkerPoolConfig::default(),
            false,
            workspace.clone(),
            Arc::new(MockDeveloper::new()),
        ));
        let planner = Planner::new(
            PlannerConfig::default(),
            Arc::new(FailingBoard),
            Arc::new(MockPullRequestService::new()),
            pool,
            workspace,
        );

        let err = planner.tick().await.unwrap_err();
        planner.log_tick_failure(err).await;
        let err = planner.tick().await.unwrap_err();
        planner.log_tick_failure(err).await;

        let state = planner.state.lock().await;
        assert_eq!(state.repeated_failures, 2);
    }

    #[tokio::test]
    async fn test_reject_rejected_feedback_still_advances_watermark() {
        let h = harness_with(
            MockDeveloper::new().with_execution_delay(Duration::from_millis(500)),
            WorkerPoolConfig {
                min_workers: 0,
                max_workers: 1,
                worker_timeout_ms: 60_000,
            },
        );
        // Occupy the single worker.
        h.board.add_item("t0", "Busy", "octo/other", ItemStatus::Todo);
        h.planner.tick().await.unwrap();

        // Feedback for another item is rejected with POOL_FULL.
        h.board.add_item("t1", "Task", "octo/webapp", ItemStatus::InReview);
        let url = h.pulls.add_pull_request("octo/webapp", 7, "autodev-bot");
        h.board.add_pull_request_to_item("t1", &url).await.unwrap();
        let commented_at = Utc::now();
        h.pulls.add_comment(&url, "reviewer", "fix", commented_at);

        h.planner.tick().await.unwrap();
        // Watermark advanced regardless of the rejection.
        let state = h.planner.state.lock().await;
        assert!(state.last_seen("t1") >= commented_at);
        // Item did not move to IN_PROGRESS because nothing was accepted.
        drop(state);
        assert_eq!(h.board.item("t1").unwrap().status, ItemStatus::InReview);
    }
}
