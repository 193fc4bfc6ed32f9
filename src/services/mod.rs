// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! External service interfaces.
//!
//! The project board and the pull-request backend are capability contracts
//! with exactly two reference variants: the forge backend
//! ([`forge::ForgeClient`], GitHub GraphQL + REST) and the in-memory mock
//! ([`mock::MockBoardService`], [`mock::MockPullRequestService`]) that
//! drives tests. Both are resolved at startup and passed around as trait
//! objects.

pub mod forge;
pub mod mock;

pub use forge::ForgeClient;
pub use mock::{MockBoardService, MockPullRequestService};

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PullRequestFilterConfig;
use crate::error::BackendError;
use crate::types::{BoardItem, Comment, ItemStatus, PullRequest, Review};

/// A project board.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Read/write access to the project board.
#[async_trait]
pub trait ProjectBoardService: Send + Sync {
    async fn get_board(&self, board_id: &str) -> Result<Board, BackendError>;

    /// List items, optionally restricted to one status column.
    async fn get_items(
        &self,
        board_id: &str,
        status: Option<ItemStatus>,
    ) -> Result<Vec<BoardItem>, BackendError>;

    /// Move an item to a status column; returns the updated snapshot.
    async fn update_item_status(
        &self,
        item_id: &str,
        status: ItemStatus,
    ) -> Result<BoardItem, BackendError>;

    /// Attach a pull request URL to an item.
    async fn add_pull_request_to_item(
        &self,
        item_id: &str,
        url: &str,
    ) -> Result<(), BackendError>;
}

/// Read-only access to pull requests. Pull requests are addressed by URL,
/// which is what board items carry.
#[async_trait]
pub trait PullRequestService: Send + Sync {
    async fn list_pull_requests(
        &self,
        repository_id: &str,
    ) -> Result<Vec<PullRequest>, BackendError>;

    async fn get_pull_request(
        &self,
        repository_id: &str,
        pr_url: &str,
    ) -> Result<PullRequest, BackendError>;

    async fn is_approved(&self, repository_id: &str, pr_url: &str)
        -> Result<bool, BackendError>;

    async fn get_reviews(
        &self,
        repository_id: &str,
        pr_url: &str,
    ) -> Result<Vec<Review>, BackendError>;

    async fn get_comments(
        &self,
        repository_id: &str,
        pr_url: &str,
    ) -> Result<Vec<Comment>, BackendError>;

    /// Comments created strictly after `since`.
    async fn get_new_comments(
        &self,
        repository_id: &str,
        pr_url: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Comment>, BackendError>;
}

/// Shared board service handle.
pub type SharedBoardService = Arc<dyn ProjectBoardService>;

/// Shared pull-request service handle.
pub type SharedPullRequestService = Arc<dyn PullRequestService>;

/// Decides which pull-request comments count as actionable feedback.
#[derive(Debug, Clone)]
pub struct CommentFilter {
    config: PullRequestFilterConfig,
}

impl CommentFilter {
    pub fn new(config: PullRequestFilterConfig) -> Self {
        Self { config }
    }

    /// An author passes iff it is not the PR author (when excluded) and is
    /// either human or an allow-listed bot.
    pub fn passes(&self, comment: &Comment, pr_author: &str) -> bool {
        if self.config.exclude_author && normalize_login(&comment.author) == normalize_login(pr_author)
        {
            return false;
        }
        if comment.author_is_bot {
            let author = normalize_login(&comment.author);
            return self
                .config
                .allowed_bots
                .iter()
                .any(|bot| normalize_login(bot) == author);
        }
        true
    }

    /// Filter and sort comments chronologically.
    pub fn filter<'a>(
        &self,
        comments: impl IntoIterator<Item = &'a Comment>,
        pr_author: &str,
    ) -> Vec<Comment> {
        let mut kept: Vec<Comment> = comments
            .into_iter()
            .filter(|c| self.passes(c, pr_author))
            .cloned()
            .collect();
        kept.sort_by_key(|c| c.created_at);
        kept
    }
}

/// Bot logins come in `name[bot]` and plain forms; compare without the
/// suffix, case-insensitively.
fn normalize_login(login: &str) -> String {
    login.trim_end_matches("[bot]").to_ascii_lowercase()
}
