// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! GitHub forge backend.
//!
//! The reference backend: project boards are GitHub Projects v2 (GraphQL),
//! pull requests are the REST API. The token comes from `GITHUB_TOKEN`.
//!
//! Board items map onto [`crate::types::BoardItem`] by reading the
//! single-select "Status" field; status updates write the same field back
//! through `updateProjectV2ItemFieldValue`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use crate::error::BackendError;
use crate::types::{
    split_repository_id, BoardItem, Comment, ContentType, ItemStatus, PullRequest,
    PullRequestState, Review,
};

use super::{Board, ProjectBoardService, PullRequestService};

/// GraphQL endpoint.
const GRAPHQL_URL: &str = "https://api.github.com/graphql";

/// REST base URL.
const REST_BASE: &str = "https://api.github.com";

/// API version header value for REST calls.
const API_VERSION: &str = "2022-11-28";

/// Default request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Name of the single-select status field on Projects v2 boards.
const STATUS_FIELD: &str = "Status";

/// GitHub-backed board and pull-request services.
#[derive(Debug)]
pub struct ForgeClient {
    client: Client,
    token: String,
}

impl ForgeClient {
    /// Create a client with an explicit token.
    pub fn new(token: impl Into<String>, timeout: Option<Duration>) -> Result<Self, BackendError> {
        let token = token.into();
        if token.is_empty() {
            return Err(BackendError::NotConfigured("empty forge token".into()));
        }
        let client = Client::builder()
            .timeout(timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)))
            .user_agent(concat!("autodev/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::Network(e.to_string()))?;
        Ok(Self { client, token })
    }

    /// Create a client from the `GITHUB_TOKEN` environment variable.
    pub fn from_env(timeout: Option<Duration>) -> Result<Self, BackendError> {
        let token = std::env::var("GITHUB_TOKEN")
            .map_err(|_| BackendError::NotConfigured("GITHUB_TOKEN is not set".into()))?;
        Self::new(token, timeout)
    }

    async fn graphql(&self, query: &str, variables: Value) -> Result<Value, BackendError> {
        let response = self
            .client
            .post(GRAPHQL_URL)
            .bearer_auth(&self.token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BackendError::RateLimited(status.to_string()));
        }
        if !status.is_success() {
            return Err(BackendError::api(body.to_string(), status.as_u16()));
        }
        if let Some(errors) = body.get("errors").and_then(Value::as_array) {
            if !errors.is_empty() {
                return Err(BackendError::Api {
                    message: errors
                        .iter()
                        .filter_map(|e| e.get("message").and_then(Value::as_str))
                        .collect::<Vec<_>>()
                        .join("; "),
                    status_code: None,
                });
            }
        }
        Ok(body["data"].clone())
    }

    async fn rest_get(&self, path: &str) -> Result<Value, BackendError> {
        debug!(path, "forge REST GET");
        let response = self
            .client
            .get(format!("{REST_BASE}{path}"))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| BackendError::Network(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound(path.to_string()));
        }
        if (status == reqwest::StatusCode::TOO_MANY_REQUESTS
            || status == reqwest::StatusCode::FORBIDDEN)
            && is_rate_limited(&response)
        {
            return Err(BackendError::RateLimited(status.to_string()));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| BackendError::Parse(e.to_string()))?;
        if !status.is_success() {
            return Err(BackendError::api(body.to_string(), status.as_u16()));
        }
        Ok(body)
    }

    /// Look up the status field id and its option ids for a board.
    async fn status_field(&self, board_id: &str) -> Result<(String, Vec<(String, String)>), BackendError> {
        let data = self
            .graphql(
                r#"query($projectId: ID!, $field: String!) {
                    node(id: $projectId) {
                        ... on ProjectV2 {
                            field(name: $field) {
                                ... on ProjectV2SingleSelectField {
                                    id
                                    options { id name }
                                }
                            }
                        }
                    }
                }"#,
                json!({ "projectId": board_id, "field": STATUS_FIELD }),
            )
            .await?;

        let field = &data["node"]["field"];
        let field_id = field["id"]
            .as_str()
            .ok_or_else(|| BackendError::Parse("missing status field id".into()))?
            .to_string();
        let options = field["options"]
            .as_array()
            .map(|options| {
                options
                    .iter()
                    .filter_map(|o| {
                        Some((o["id"].as_str()?.to_string(), o["name"].as_str()?.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok((field_id, options))
    }
}

/// Map a Projects v2 status column name onto the item state machine.
fn map_status_name(name: &str) -> Option<ItemStatus> {
    let normalized = name.trim().to_ascii_lowercase().replace([' ', '_', '-'], "");
    match normalized.as_str() {
        "todo" | "backlog" => Some(ItemStatus::Todo),
        "inprogress" | "doing" => Some(ItemStatus::InProgress),
        "inreview" | "review" => Some(ItemStatus::InReview),
        "done" | "closed" => Some(ItemStatus::Done),
        _ => None,
    }
}

/// Column name written back for a status.
fn status_column_name(status: ItemStatus) -> &'static str {
    match status {
        ItemStatus::Todo => "Todo",
        ItemStatus::InProgress => "In Progress",
        ItemStatus::InReview => "In Review",
        ItemStatus::Done => "Done",
    }
}

/// Pull request number from its URL.
fn pr_number_from_url(pr_url: &str) -> Result<u64, BackendError> {
    pr_url
        .rsplit('/')
        .next()
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| BackendError::Parse(format!("no pull number in {pr_url}")))
}

fn is_rate_limited(response: &reqwest::Response) -> bool {
    response
        .headers()
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == "0")
        .unwrap_or(false)
}

fn parse_board_item(node: &Value) -> Option<BoardItem> {
    let id = node["id"].as_str()?.to_string();
    let content = &node["content"];
    let title = content["title"].as_str().unwrap_or("(untitled)").to_string();

    let status = node["fieldValueByName"]["name"]
        .as_str()
        .and_then(map_status_name)
        .unwrap_or(ItemStatus::Todo);

    let content_type = match content["__typename"].as_str() {
        Some("PullRequest") => ContentType::PullRequest,
        Some("DraftIssue") => ContentType::Draft,
        _ => ContentType::Issue,
    };

    let repository = content["repository"]["nameWithOwner"]
        .as_str()
        .map(String::from);

    let labels = content["labels"]["nodes"]
        .as_array()
        .map(|nodes| {
            nodes
                .iter()
                .filter_map(|l| l["name"].as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let assignee = content["assignees"]["nodes"]
        .as_array()
        .and_then(|nodes| nodes.first())
        .and_then(|a| a["login"].as_str())
        .map(String::from);

    let timestamp = |key: &str| -> DateTime<Utc> {
        content[key]
            .as_str()
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(Utc::now)
    };

    Some(BoardItem {
        id,
        title,
        description: content["body"].as_str().map(String::from),
        status,
        priority: None,
        assignee,
        labels,
        pull_request_urls: Vec::new(),
        content_type,
        repository,
        created_at: timestamp("createdAt"),
        updated_at: timestamp("updatedAt"),
    })
}

// ---------------------------------------------------------------------------
// REST payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RestUser {
    login: String,
    #[serde(default, rename = "type")]
    user_type: String,
}

#[derive(Debug, Deserialize)]
struct RestPull {
    node_id: String,
    number: u64,
    html_url: String,
    state: String,
    merged_at: Option<DateTime<Utc>>,
    user: RestUser,
}

#[derive(Debug, Deserialize)]
struct RestReview {
    id: u64,
    user: RestUser,
    state: String,
    submitted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
struct RestComment {
    id: u64,
    user: RestUser,
    body: String,
    created_at: DateTime<Utc>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    line: Option<u32>,
    #[serde(default)]
    html_url: Option<String>,
}

impl RestComment {
    fn into_comment(self) -> Comment {
        Comment {
            id: self.id.to_string(),
            author: self.user.login,
            body: self.body,
            created_at: self.created_at,
            path: self.path,
            line: self.line,
            url: self.html_url,
            author_is_bot: self.user.user_type == "Bot",
        }
    }
}

fn pull_state(pull: &RestPull) -> PullRequestState {
    if pull.merged_at.is_some() {
        PullRequestState::Merged
    } else if pull.state == "open" {
        PullRequestState::Open
    } else {
        PullRequestState::Closed
    }
}

/// Approval from review history: the latest review per reviewer counts, and
/// one outstanding CHANGES_REQUESTED vetoes.
fn approval_from_reviews(reviews: &[Review]) -> bool {
    use std::collections::HashMap;
    let mut latest: HashMap<&str, &Review> = HashMap::new();
    for review in reviews {
        // COMMENTED reviews do not change a reviewer's standing verdict.
        if review.state == "COMMENTED" {
            continue;
        }
        let entry = latest.entry(review.author.as_str()).or_insert(review);
        if review.submitted_at >= entry.submitted_at {
            *entry = review;
        }
    }
    let mut approved = false;
    for review in latest.values() {
        match review.state.as_str() {
            "CHANGES_REQUESTED" => return false,
            "APPROVED" => approved = true,
            _ => {}
        }
    }
    approved
}

#[async_trait]
impl ProjectBoardService for ForgeClient {
    async fn get_board(&self, board_id: &str) -> Result<Board, BackendError> {
        let data = self
            .graphql(
                r#"query($projectId: ID!) {
                    node(id: $projectId) {
                        ... on ProjectV2 { id title url }
                    }
                }"#,
                json!({ "projectId": board_id }),
            )
            .await?;

        let node = &data["node"];
        Ok(Board {
            id: node["id"]
                .as_str()
                .ok_or_else(|| BackendError::NotFound(format!("board {board_id}")))?
                .to_string(),
            title: node["title"].as_str().unwrap_or("").to_string(),
            url: node["url"].as_str().map(String::from),
        })
    }

    async fn get_items(
        &self,
        board_id: &str,
        status: Option<ItemStatus>,
    ) -> Result<Vec<BoardItem>, BackendError> {
        let data = self
            .graphql(
                r#"query($projectId: ID!, $field: String!) {
                    node(id: $projectId) {
                        ... on ProjectV2 {
                            items(first: 100) {
                                nodes {
                                    id
                                    fieldValueByName(name: $field) {
                                        ... on ProjectV2ItemFieldSingleSelectValue { name }
                                    }
                                    content {
                                        __typename
                                        ... on Issue {
                                            title body createdAt updatedAt
                                            repository { nameWithOwner }
                                            labels(first: 10) { nodes { name } }
                                            assignees(first: 5) { nodes { login } }
                                        }
                                        ... on PullRequest {
                                            title body createdAt updatedAt
                                            repository { nameWithOwner }
                                        }
                                        ... on DraftIssue { title body createdAt updatedAt }
                                    }
                                }
                            }
                        }
                    }
                }"#,
                json!({ "projectId": board_id, "field": STATUS_FIELD }),
            )
            .await?;

        let nodes = data["node"]["items"]["nodes"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        let items = nodes
            .iter()
            .filter_map(parse_board_item)
            .filter(|item| status.map_or(true, |s| item.status == s))
            .collect();
        Ok(items)
    }

    async fn update_item_status(
        &self,
        item_id: &str,
        status: ItemStatus,
    ) -> Result<BoardItem, BackendError> {
        // The item's board is needed for the field lookup.
        let data = self
            .graphql(
                r#"query($itemId: ID!) {
                    node(id: $itemId) {
                        ... on ProjectV2Item { id project { id } }
                    }
                }"#,
                json!({ "itemId": item_id }),
            )
            .await?;
        let board_id = data["node"]["project"]["id"]
            .as_str()
            .ok_or_else(|| BackendError::NotFound(format!("item {item_id}")))?
            .to_string();

        let (field_id, options) = self.status_field(&board_id).await?;
        let wanted = status_column_name(status);
        let option_id = options
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(wanted))
            .map(|(id, _)| id.clone())
            .ok_or_else(|| {
                BackendError::Parse(format!("board has no status column named {wanted}"))
            })?;

        self.graphql(
            r#"mutation($projectId: ID!, $itemId: ID!, $fieldId: ID!, $optionId: String!) {
                updateProjectV2ItemFieldValue(input: {
                    projectId: $projectId,
                    itemId: $itemId,
                    fieldId: $fieldId,
                    value: { singleSelectOptionId: $optionId }
                }) { projectV2Item { id } }
            }"#,
            json!({
                "projectId": board_id,
                "itemId": item_id,
                "fieldId": field_id,
                "optionId": option_id,
            }),
        )
        .await?;

        // Return the fresh snapshot.
        let items = self.get_items(&board_id, None).await?;
        items
            .into_iter()
            .find(|item| item.id == item_id)
            .ok_or_else(|| BackendError::NotFound(format!("item {item_id}")))
    }

    async fn add_pull_request_to_item(
        &self,
        item_id: &str,
        url: &str,
    ) -> Result<(), BackendError> {
        // Record the PR on the underlying issue as a comment; Projects v2
        // has no first-class PR attachment.
        let data = self
            .graphql(
                r#"query($itemId: ID!) {
                    node(id: $itemId) {
                        ... on ProjectV2Item {
                            content { ... on Issue { id } ... on PullRequest { id } }
                        }
                    }
                }"#,
                json!({ "itemId": item_id }),
            )
            .await?;
        let subject_id = data["node"]["content"]["id"]
            .as_str()
            .ok_or_else(|| BackendError::NotFound(format!("item {item_id} has no content")))?
            .to_string();

        self.graphql(
            r#"mutation($subjectId: ID!, $body: String!) {
                addComment(input: { subjectId: $subjectId, body: $body }) {
                    commentEdge { node { id } }
                }
            }"#,
            json!({ "subjectId": subject_id, "body": format!("PR: {url}") }),
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PullRequestService for ForgeClient {
    async fn list_pull_requests(
        &self,
        repository_id: &str,
    ) -> Result<Vec<PullRequest>, BackendError> {
        let (owner, name) = split_repository_id(repository_id)
            .ok_or_else(|| BackendError::Parse(format!("bad repository id {repository_id}")))?;
        let body = self
            .rest_get(&format!("/repos/{owner}/{name}/pulls?state=all&per_page=50"))
            .await?;
        let pulls: Vec<RestPull> =
            serde_json::from_value(body).map_err(|e| BackendError::Parse(e.to_string()))?;

        Ok(pulls
            .into_iter()
            .map(|pull| PullRequest {
                id: pull.node_id.clone(),
                number: pull.number,
                url: pull.html_url.clone(),
                state: pull_state(&pull),
                author: pull.user.login.clone(),
                is_approved: false,
                review_state: None,
                reviews: vec![],
                comments: vec![],
            })
            .collect())
    }

    async fn get_pull_request(
        &self,
        repository_id: &str,
        pr_url: &str,
    ) -> Result<PullRequest, BackendError> {
        let (owner, name) = split_repository_id(repository_id)
            .ok_or_else(|| BackendError::Parse(format!("bad repository id {repository_id}")))?;
        let number = pr_number_from_url(pr_url)?;

        let body = self
            .rest_get(&format!("/repos/{owner}/{name}/pulls/{number}"))
            .await?;
        let pull: RestPull =
            serde_json::from_value(body).map_err(|e| BackendError::Parse(e.to_string()))?;

        let reviews = self.get_reviews(repository_id, pr_url).await?;
        let comments = self.get_comments(repository_id, pr_url).await?;
        let is_approved = approval_from_reviews(&reviews);

        Ok(PullRequest {
            id: pull.node_id.clone(),
            number: pull.number,
            url: pull.html_url.clone(),
            state: pull_state(&pull),
            author: pull.user.login.clone(),
            is_approved,
            review_state: Some(
                if is_approved { "APPROVED" } else { "REVIEW_REQUIRED" }.to_string(),
            ),
            reviews,
            comments,
        })
    }

    async fn is_approved(
        &self,
        repository_id: &str,
        pr_url: &str,
    ) -> Result<bool, BackendError> {
        let reviews = self.get_reviews(repository_id, pr_url).await?;
        Ok(approval_from_reviews(&reviews))
    }

    async fn get_reviews(
        &self,
        repository_id: &str,
        pr_url: &str,
    ) -> Result<Vec<Review>, BackendError> {
        let (owner, name) = split_repository_id(repository_id)
            .ok_or_else(|| BackendError::Parse(format!("bad repository id {repository_id}")))?;
        let number = pr_number_from_url(pr_url)?;

        let body = self
            .rest_get(&format!("/repos/{owner}/{name}/pulls/{number}/reviews?per_page=100"))
            .await?;
        let reviews: Vec<RestReview> =
            serde_json::from_value(body).map_err(|e| BackendError::Parse(e.to_string()))?;

        Ok(reviews
            .into_iter()
            .map(|review| Review {
                id: review.id.to_string(),
                author: review.user.login,
                state: review.state,
                submitted_at: review.submitted_at.unwrap_or_else(Utc::now),
            })
            .collect())
    }

    async fn get_comments(
        &self,
        repository_id: &str,
        pr_url: &str,
    ) -> Result<Vec<Comment>, BackendError> {
        let (owner, name) = split_repository_id(repository_id)
            .ok_or_else(|| BackendError::Parse(format!("bad repository id {repository_id}")))?;
        let number = pr_number_from_url(pr_url)?;

        // Conversation comments live on the issue endpoint, file comments on
        // the pulls endpoint; feedback needs both.
        let issue_body = self
            .rest_get(&format!("/repos/{owner}/{name}/issues/{number}/comments?per_page=100"))
            .await?;
        let review_body = self
            .rest_get(&format!("/repos/{owner}/{name}/pulls/{number}/comments?per_page=100"))
            .await?;

        let mut comments: Vec<Comment> = Vec::new();
        for body in [issue_body, review_body] {
            let parsed: Vec<RestComment> =
                serde_json::from_value(body).map_err(|e| BackendError::Parse(e.to_string()))?;
            comments.extend(parsed.into_iter().map(RestComment::into_comment));
        }
        comments.sort_by_key(|c| c.created_at);
        Ok(comments)
    }

    async fn get_new_comments(
        &self,
        repository_id: &str,
        pr_url: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Comment>, BackendError> {
        let comments = self.get_comments(repository_id, pr_url).await?;
        Ok(comments
            .into_iter()
            .filter(|c| c.created_at > since)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn review(author: &str, state: &str, minutes_ago: i64) -> Review {
        Review {
            id: "r".into(),
            author: author.into(),
            state: state.into(),
            submitted_at: Utc::now() - chrono::Duration::minutes(minutes_ago),
        }
    }

    #[test]
    fn test_map_status_name() {
        assert_eq!(map_status_name("Todo"), Some(ItemStatus::Todo));
        assert_eq!(map_status_name("In Progress"), Some(ItemStatus::InProgress));
        assert_eq!(map_status_name("in_review"), Some(ItemStatus::InReview));
        assert_eq!(map_status_name("DONE"), Some(ItemStatus::Done));
        assert_eq!(map_status_name("Blocked"), None);
    }

    #[test]
    fn test_pr_number_from_url() {
        assert_eq!(
            pr_number_from_url("https://github.com/octo/webapp/pull/42").unwrap(),
            42
        );
        assert!(pr_number_from_url("https://github.com/octo/webapp/pulls").is_err());
    }

    #[test]
    fn test_approval_latest_review_wins() {
        // Reviewer asked for changes, then approved.
        let reviews = vec![
            review("alice", "CHANGES_REQUESTED", 60),
            review("alice", "APPROVED", 5),
        ];
        assert!(approval_from_reviews(&reviews));

        // Approval later withdrawn.
        let reviews = vec![
            review("alice", "APPROVED", 60),
            review("alice", "CHANGES_REQUESTED", 5),
        ];
        assert!(!approval_from_reviews(&reviews));
    }

    #[test]
    fn test_approval_ignores_commented_reviews() {
        let reviews = vec![
            review("alice", "APPROVED", 10),
            review("alice", "COMMENTED", 1),
            review("bob", "COMMENTED", 1),
        ];
        assert!(approval_from_reviews(&reviews));
    }

    #[test]
    fn test_no_reviews_is_not_approved() {
        assert!(!approval_from_reviews(&[]));
    }

    #[test]
    fn test_changes_requested_vetoes_other_approvals() {
        let reviews = vec![
            review("alice", "APPROVED", 10),
            review("bob", "CHANGES_REQUESTED", 5),
        ];
        assert!(!approval_from_reviews(&reviews));
    }

    #[test]
    fn test_pull_state_mapping() {
        let mut pull = RestPull {
            node_id: "n".into(),
            number: 1,
            html_url: "u".into(),
            state: "open".into(),
            merged_at: None,
            user: RestUser {
                login: "a".into(),
                user_type: "User".into(),
            },
        };
        assert_eq!(pull_state(&pull), PullRequestState::Open);
        pull.state = "closed".into();
        assert_eq!(pull_state(&pull), PullRequestState::Closed);
        pull.merged_at = Some(Utc::now());
        assert_eq!(pull_state(&pull), PullRequestState::Merged);
    }

    #[test]
    fn test_parse_board_item() {
        let node = json!({
            "id": "PVTI_1",
            "fieldValueByName": { "name": "In Review" },
            "content": {
                "__typename": "Issue",
                "title": "Fix login",
                "body": "details",
                "createdAt": "2026-07-01T10:00:00Z",
                "updatedAt": "2026-07-02T10:00:00Z",
                "repository": { "nameWithOwner": "octo/webapp" },
                "labels": { "nodes": [ { "name": "bug" } ] },
                "assignees": { "nodes": [ { "login": "alice" } ] }
            }
        });
        let item = parse_board_item(&node).unwrap();
        assert_eq!(item.id, "PVTI_1");
        assert_eq!(item.status, ItemStatus::InReview);
        assert_eq!(item.repository.as_deref(), Some("octo/webapp"));
        assert_eq!(item.labels, vec!["bug"]);
        assert_eq!(item.assignee.as_deref(), Some("alice"));
        assert_eq!(item.content_type, ContentType::Issue);
    }

    #[test]
    fn test_missing_token_is_not_configured() {
        let err = ForgeClient::new("", None).unwrap_err();
        assert!(matches!(err, BackendError::NotConfigured(_)));
    }
}
