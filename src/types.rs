// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core type definitions for the orchestrator.
//!
//! This module defines the messages exchanged between the Planner, the
//! Manager (worker pool) and the Workers, together with the read-only
//! projections of external state (board items, pull requests, reviews,
//! comments).
//!
//! Board items and pull requests are immutable snapshots: they are never
//! mutated in memory, only re-fetched through the service interfaces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Board Items
// ============================================================================

/// Status of a board item, advancing TODO → IN_PROGRESS → IN_REVIEW → DONE.
///
/// The only backward transition is IN_REVIEW → IN_PROGRESS when new reviewer
/// feedback arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Todo,
    InProgress,
    InReview,
    Done,
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Todo => write!(f, "TODO"),
            Self::InProgress => write!(f, "IN_PROGRESS"),
            Self::InReview => write!(f, "IN_REVIEW"),
            Self::Done => write!(f, "DONE"),
        }
    }
}

/// What kind of content a board item tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Issue,
    PullRequest,
    Draft,
}

/// A unit of work tracked on the external project board.
///
/// Snapshot semantics: instances are produced by a board service and never
/// mutated locally. Status changes go through
/// [`crate::services::ProjectBoardService::update_item_status`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardItem {
    /// Opaque identifier, unique within the board.
    pub id: String,
    /// Item title.
    pub title: String,
    /// Optional longer description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Current board column.
    pub status: ItemStatus,
    /// Optional priority label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<String>,
    /// Optional assignee login.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,
    /// Labels attached to the item.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Pull request URLs attached to the item.
    #[serde(default)]
    pub pull_request_urls: Vec<String>,
    /// Kind of content this item tracks.
    pub content_type: ContentType,
    /// Repository the item belongs to, as `owner/name`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    /// When the item was created.
    pub created_at: DateTime<Utc>,
    /// When the item was last updated.
    pub updated_at: DateTime<Utc>,
}

impl BoardItem {
    /// Most recently attached pull request URL, if any.
    pub fn latest_pull_request_url(&self) -> Option<&str> {
        self.pull_request_urls.last().map(|s| s.as_str())
    }
}

// ============================================================================
// Task Requests (Planner → Manager)
// ============================================================================

/// Action the Planner asks a Worker to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskAction {
    StartNewTask,
    ResumeTask,
    ProcessFeedback,
    MergeRequest,
    CheckStatus,
}

impl std::fmt::Display for TaskAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StartNewTask => write!(f, "START_NEW_TASK"),
            Self::ResumeTask => write!(f, "RESUME_TASK"),
            Self::ProcessFeedback => write!(f, "PROCESS_FEEDBACK"),
            Self::MergeRequest => write!(f, "MERGE_REQUEST"),
            Self::CheckStatus => write!(f, "CHECK_STATUS"),
        }
    }
}

/// Planner → Manager message. Produced fresh each reconciliation cycle and
/// never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    /// Task identifier, equal to the board item id.
    pub task_id: String,
    /// What the worker should do.
    pub action: TaskAction,
    /// Target repository as `owner/name`.
    pub repository_id: String,
    /// Snapshot of the board item, when the action needs it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub board_item: Option<BoardItem>,
    /// Reviewer comments, for PROCESS_FEEDBACK.
    #[serde(default)]
    pub comments: Vec<Comment>,
    /// Pull request URL, for MERGE_REQUEST / PROCESS_FEEDBACK.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request_url: Option<String>,
}

impl TaskRequest {
    /// Create a request with the minimal required fields.
    pub fn new(
        task_id: impl Into<String>,
        action: TaskAction,
        repository_id: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            action,
            repository_id: repository_id.into(),
            board_item: None,
            comments: Vec::new(),
            pull_request_url: None,
        }
    }

    /// Attach the board item snapshot.
    pub fn with_board_item(mut self, item: BoardItem) -> Self {
        self.board_item = Some(item);
        self
    }

    /// Attach reviewer comments.
    pub fn with_comments(mut self, comments: Vec<Comment>) -> Self {
        self.comments = comments;
        self
    }

    /// Attach the pull request URL.
    pub fn with_pull_request_url(mut self, url: impl Into<String>) -> Self {
        self.pull_request_url = Some(url.into());
        self
    }
}

// ============================================================================
// Task Responses (Manager → Planner)
// ============================================================================

/// Outcome of an admission decision or a status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskResponseStatus {
    Accepted,
    Rejected,
    InProgress,
    Completed,
    Error,
}

/// Why an admission was rejected. Back-pressure, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectReason {
    PoolFull,
    RepoBusy,
}

/// Manager → Planner reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub task_id: String,
    pub status: TaskResponseStatus,
    /// Worker that holds the task, when one does.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<String>,
    /// Human-readable detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Rejection reason, when status is REJECTED.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<RejectReason>,
    /// Pull request URL, when already known for the task.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request_url: Option<String>,
}

impl TaskResponse {
    /// An ACCEPTED response naming the assigned worker.
    pub fn accepted(task_id: impl Into<String>, worker_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskResponseStatus::Accepted,
            worker_id: Some(worker_id.into()),
            message: None,
            reason: None,
            pull_request_url: None,
        }
    }

    /// A REJECTED response carrying a back-pressure reason.
    pub fn rejected(task_id: impl Into<String>, reason: RejectReason) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskResponseStatus::Rejected,
            worker_id: None,
            message: None,
            reason: Some(reason),
            pull_request_url: None,
        }
    }

    /// An ERROR response with a message.
    pub fn error(task_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskResponseStatus::Error,
            worker_id: None,
            message: Some(message.into()),
            reason: None,
            pull_request_url: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == TaskResponseStatus::Accepted
    }
}

// ============================================================================
// Worker Results (Worker → Manager)
// ============================================================================

/// Outcome of one worker execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResult {
    pub task_id: String,
    /// Whether the task completed without an extracted error.
    pub success: bool,
    /// Pull request URL extracted from the assistant transcript, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pull_request_url: Option<String>,
    /// Error message, when `success` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// When the execution finished.
    pub completed_at: DateTime<Utc>,
    /// Free-form summary details parsed from the transcript.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl WorkerResult {
    /// Create a successful result.
    pub fn success(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            success: true,
            pull_request_url: None,
            error_message: None,
            completed_at: Utc::now(),
            details: None,
        }
    }

    /// Create a failed result with an error message.
    pub fn failure(task_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
            success: false,
            pull_request_url: None,
            error_message: Some(error.into()),
            completed_at: Utc::now(),
            details: None,
        }
    }

    pub fn with_pull_request_url(mut self, url: impl Into<String>) -> Self {
        self.pull_request_url = Some(url.into());
        self
    }
}

// ============================================================================
// Pull Request Snapshots
// ============================================================================

/// State of a pull request on the forge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PullRequestState {
    Open,
    Closed,
    Merged,
}

/// A review on a pull request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: String,
    pub author: String,
    /// APPROVED, CHANGES_REQUESTED, COMMENTED, ...
    pub state: String,
    pub submitted_at: DateTime<Utc>,
}

/// A comment on a pull request, either a conversation comment or a review
/// comment anchored to a file and line.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
    /// File path, for review comments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Line number, for review comments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    /// Source URL of the comment, when the backend provides one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Whether the author is a bot account.
    #[serde(default)]
    pub author_is_bot: bool,
}

/// Read-only projection of a pull request, used by the Planner to decide
/// IN_REVIEW transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullRequest {
    pub id: String,
    pub number: u64,
    pub url: String,
    pub state: PullRequestState,
    pub author: String,
    pub is_approved: bool,
    /// Aggregate review state reported by the forge.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_state: Option<String>,
    #[serde(default)]
    pub reviews: Vec<Review>,
    #[serde(default)]
    pub comments: Vec<Comment>,
}

// ============================================================================
// Repository Identifiers
// ============================================================================

/// Split an `owner/name` repository id into its components.
///
/// Returns `None` when the id is not exactly `owner/name` with non-empty
/// parts.
pub fn split_repository_id(repository_id: &str) -> Option<(&str, &str)> {
    let (owner, name) = repository_id.split_once('/')?;
    if owner.is_empty() || name.is_empty() || name.contains('/') {
        return None;
    }
    Some((owner, name))
}

/// Sanitise an identifier for use in branch names and directory names.
///
/// Anything outside `[A-Za-z0-9._-]` becomes `-`.
pub fn sanitize_ref_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
