// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory board and pull-request services.
//!
//! The second reference backend: state lives behind mutexes, every mutation
//! is recorded, and tests can reshape the world between planner ticks
//! (approve a PR, add reviewer comments, merge).

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::BackendError;
use crate::types::{
    BoardItem, Comment, ContentType, ItemStatus, PullRequest, PullRequestState, Review,
};

use super::{Board, ProjectBoardService, PullRequestService};

/// In-memory project board.
pub struct MockBoardService {
    board: Mutex<Board>,
    items: Mutex<HashMap<String, BoardItem>>,
    /// Recorded `update_item_status` calls, in order.
    status_updates: Mutex<Vec<(String, ItemStatus)>>,
}

impl Default for MockBoardService {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBoardService {
    pub fn new() -> Self {
        Self {
            board: Mutex::new(Board {
                id: "board-1".to_string(),
                title: "Mock Board".to_string(),
                url: None,
            }),
            items: Mutex::new(HashMap::new()),
            status_updates: Mutex::new(Vec::new()),
        }
    }

    /// Seed a minimal item in a status column.
    pub fn add_item(&self, id: &str, title: &str, repository: &str, status: ItemStatus) {
        let item = BoardItem {
            id: id.to_string(),
            title: title.to_string(),
            description: None,
            status,
            priority: None,
            assignee: None,
            labels: vec![],
            pull_request_urls: vec![],
            content_type: ContentType::Issue,
            repository: Some(repository.to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        self.items.lock().unwrap().insert(id.to_string(), item);
    }

    /// Seed a full item snapshot.
    pub fn insert_item(&self, item: BoardItem) {
        self.items.lock().unwrap().insert(item.id.clone(), item);
    }

    /// Current snapshot of one item.
    pub fn item(&self, id: &str) -> Option<BoardItem> {
        self.items.lock().unwrap().get(id).cloned()
    }

    /// All recorded status updates.
    pub fn status_updates(&self) -> Vec<(String, ItemStatus)> {
        self.status_updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProjectBoardService for MockBoardService {
    async fn get_board(&self, _board_id: &str) -> Result<Board, BackendError> {
        Ok(self.board.lock().unwrap().clone())
    }

    async fn get_items(
        &self,
        _board_id: &str,
        status: Option<ItemStatus>,
    ) -> Result<Vec<BoardItem>, BackendError> {
        let items = self.items.lock().unwrap();
        let mut listed: Vec<BoardItem> = items
            .values()
            .filter(|item| status.map_or(true, |s| item.status == s))
            .cloned()
            .collect();
        listed.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(listed)
    }

    async fn update_item_status(
        &self,
        item_id: &str,
        status: ItemStatus,
    ) -> Result<BoardItem, BackendError> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .get_mut(item_id)
            .ok_or_else(|| BackendError::NotFound(format!("item {item_id}")))?;
        item.status = status;
        item.updated_at = Utc::now();
        self.status_updates
            .lock()
            .unwrap()
            .push((item_id.to_string(), status));
        Ok(item.clone())
    }

    async fn add_pull_request_to_item(
        &self,
        item_id: &str,
        url: &str,
    ) -> Result<(), BackendError> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .get_mut(item_id)
            .ok_or_else(|| BackendError::NotFound(format!("item {item_id}")))?;
        if !item.pull_request_urls.iter().any(|u| u == url) {
            item.pull_request_urls.push(url.to_string());
        }
        Ok(())
    }
}

/// In-memory pull requests, keyed by URL.
#[derive(Default)]
pub struct MockPullRequestService {
    pulls: Mutex<HashMap<String, PullRequest>>,
}

impl MockPullRequestService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an open, unapproved pull request and return its URL.
    pub fn add_pull_request(&self, repository_id: &str, number: u64, author: &str) -> String {
        let url = format!("https://github.com/{repository_id}/pull/{number}");
        let pr = PullRequest {
            id: format!("PR_{number}"),
            number,
            url: url.clone(),
            state: PullRequestState::Open,
            author: author.to_string(),
            is_approved: false,
            review_state: None,
            reviews: vec![],
            comments: vec![],
        };
        self.pulls.lock().unwrap().insert(url.clone(), pr);
        url
    }

    pub fn set_state(&self, pr_url: &str, state: PullRequestState) {
        if let Some(pr) = self.pulls.lock().unwrap().get_mut(pr_url) {
            pr.state = state;
        }
    }

    pub fn set_approved(&self, pr_url: &str, approved: bool) {
        if let Some(pr) = self.pulls.lock().unwrap().get_mut(pr_url) {
            pr.is_approved = approved;
            pr.review_state = Some(if approved { "APPROVED" } else { "REVIEW_REQUIRED" }.into());
        }
    }

    pub fn add_review(&self, pr_url: &str, review: Review) {
        if let Some(pr) = self.pulls.lock().unwrap().get_mut(pr_url) {
            pr.reviews.push(review);
        }
    }

    /// Add a reviewer comment at a given time.
    pub fn add_comment(
        &self,
        pr_url: &str,
        author: &str,
        body: &str,
        created_at: DateTime<Utc>,
    ) {
        if let Some(pr) = self.pulls.lock().unwrap().get_mut(pr_url) {
            let id = format!("c{}", pr.comments.len() + 1);
            pr.comments.push(Comment {
                id,
                author: author.to_string(),
                body: body.to_string(),
                created_at,
                path: None,
                line: None,
                url: Some(format!("{pr_url}#comment")),
                author_is_bot: author.ends_with("[bot]"),
            });
        }
    }

    fn get(&self, pr_url: &str) -> Result<PullRequest, BackendError> {
        self.pulls
            .lock()
            .unwrap()
            .get(pr_url)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("pull request {pr_url}")))
    }
}

#[async_trait]
impl PullRequestService for MockPullRequestService {
    async fn list_pull_requests(
        &self,
        repository_id: &str,
    ) -> Result<Vec<PullRequest>, BackendError> {
        let prefix = format!("https://github.com/{repository_id}/pull/");
        let pulls = self.pulls.lock().unwrap();
        Ok(pulls
            .values()
            .filter(|pr| pr.url.starts_with(&prefix))
            .cloned()
            .collect())
    }

    async fn get_pull_request(
        &self,
        _repository_id: &str,
        pr_url: &str,
    ) -> Result<PullRequest, BackendError> {
        self.get(pr_url)
    }

    async fn is_approved(
        &self,
        _repository_id: &str,
        pr_url: &str,
    ) -> Result<bool, BackendError> {
        Ok(self.get(pr_url)?.is_approved)
    }

    async fn get_reviews(
        &self,
        _repository_id: &str,
        pr_url: &str,
    ) -> Result<Vec<Review>, BackendError> {
        Ok(self.get(pr_url)?.reviews)
    }

    async fn get_comments(
        &self,
        _repository_id: &str,
        pr_url: &str,
    ) -> Result<Vec<Comment>, BackendError> {
        Ok(self.get(pr_url)?.comments)
    }

    async fn get_new_comments(
        &self,
        _repository_id: &str,
        pr_url: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Comment>, BackendError> {
        Ok(self
            .get(pr_url)?
            .comments
            .into_iter()
            .filter(|c| c.created_at > since)
            .collect())
    }
}
