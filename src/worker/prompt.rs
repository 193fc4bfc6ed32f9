// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Prompt generation.
//!
//! Renders the action-specific prompt handed to the assistant. The prompt is
//! one half of the assistant contract; the other half is the transcript
//! grammar in [`super::result`]. The load-bearing sentence is the `PR: <url>`
//! sentinel - the result processor parses exactly what these prompts demand.

use std::fmt::Write as _;

use crate::error::ProcessingError;
use crate::types::{TaskAction, TaskRequest};
use crate::workspace::WorkspaceInfo;

/// Renders prompts per task action.
#[derive(Debug, Default, Clone, Copy)]
pub struct PromptGenerator;

impl PromptGenerator {
    pub fn new() -> Self {
        Self
    }

    /// Render the prompt for a request inside its prepared workspace.
    ///
    /// Fails with VALIDATION_ERROR when the task id is empty or the fields
    /// the action requires are missing.
    pub fn generate(
        &self,
        request: &TaskRequest,
        workspace: &WorkspaceInfo,
    ) -> Result<String, ProcessingError> {
        if request.task_id.is_empty() {
            return Err(ProcessingError::Validation("empty task id".into()));
        }

        match request.action {
            TaskAction::StartNewTask => self.render_start(request, workspace, false),
            TaskAction::ResumeTask => self.render_start(request, workspace, true),
            TaskAction::ProcessFeedback => self.render_feedback(request, workspace),
            TaskAction::MergeRequest => self.render_merge(request),
            TaskAction::CheckStatus => Ok(self.render_check_status(request, workspace)),
        }
    }

    fn render_start(
        &self,
        request: &TaskRequest,
        workspace: &WorkspaceInfo,
        resuming: bool,
    ) -> Result<String, ProcessingError> {
        let item = request.board_item.as_ref().ok_or_else(|| {
            ProcessingError::Validation(format!(
                "{} requires a board item",
                request.action
            ))
        })?;

        let mut prompt = String::new();
        if resuming {
            writeln!(prompt, "Resume work on the task below.").unwrap();
            writeln!(
                prompt,
                "First inspect the current branch and working tree (git status, git log) \
                 and continue from where the previous run stopped."
            )
            .unwrap();
        } else {
            writeln!(prompt, "Implement the task below.").unwrap();
        }
        writeln!(prompt).unwrap();
        writeln!(prompt, "Task: {}", item.title).unwrap();
        if let Some(description) = &item.description {
            writeln!(prompt, "Description:\n{description}").unwrap();
        }
        writeln!(prompt).unwrap();
        writeln!(
            prompt,
            "You are working in {} on branch {}.",
            workspace.workspace_dir.display(),
            workspace.branch_name
        )
        .unwrap();
        writeln!(
            prompt,
            "Additional project instructions are in {} - read them first.",
            workspace
                .instructions_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| workspace.instructions_path.display().to_string())
        )
        .unwrap();
        writeln!(prompt).unwrap();
        writeln!(prompt, "When the change is ready:").unwrap();
        writeln!(prompt, "1. Commit your work on this branch.").unwrap();
        writeln!(prompt, "2. Push the branch: git push -u origin {}", workspace.branch_name).unwrap();
        writeln!(
            prompt,
            "3. Open a pull request with the gh CLI: gh pr create --fill"
        )
        .unwrap();
        writeln!(
            prompt,
            "4. On success, print the pull request URL on its own line, exactly as:\n   PR: <url>"
        )
        .unwrap();

        Ok(prompt)
    }

    fn render_feedback(
        &self,
        request: &TaskRequest,
        workspace: &WorkspaceInfo,
    ) -> Result<String, ProcessingError> {
        if request.comments.is_empty() {
            return Err(ProcessingError::Validation(
                "PROCESS_FEEDBACK requires at least one comment".into(),
            ));
        }

        let mut prompt = String::new();
        writeln!(
            prompt,
            "Address the {} review comment(s) below on the open pull request.",
            request.comments.len()
        )
        .unwrap();
        if let Some(url) = &request.pull_request_url {
            writeln!(prompt, "Pull request: {url}").unwrap();
        }
        writeln!(
            prompt,
            "You are working in {} on branch {}.",
            workspace.workspace_dir.display(),
            workspace.branch_name
        )
        .unwrap();
        writeln!(prompt).unwrap();

        for (index, comment) in request.comments.iter().enumerate() {
            writeln!(prompt, "Comment {} by {}:", index + 1, comment.author).unwrap();
            if let (Some(path), Some(line)) = (&comment.path, comment.line) {
                writeln!(prompt, "  Location: {path}:{line}").unwrap();
            } else if let Some(path) = &comment.path {
                writeln!(prompt, "  Location: {path}").unwrap();
            }
            writeln!(prompt, "  {}", comment.body.replace('\n', "\n  ")).unwrap();
            if let Some(url) = &comment.url {
                writeln!(prompt, "  Source: {url}").unwrap();
            }
            writeln!(prompt).unwrap();
        }

        writeln!(prompt, "For each comment:").unwrap();
        writeln!(prompt, "1. Make the requested change, or explain why not.").unwrap();
        writeln!(prompt, "2. Commit and push to the existing branch.").unwrap();
        writeln!(
            prompt,
            "3. Reply on the pull request with the gh CLI, e.g.: gh pr comment <number> --body \"...\""
        )
        .unwrap();

        Ok(prompt)
    }

    fn render_merge(&self, request: &TaskRequest) -> Result<String, ProcessingError> {
        let url = request.pull_request_url.as_ref().ok_or_else(|| {
            ProcessingError::Validation("MERGE_REQUEST requires a pull request URL".into())
        })?;

        let mut prompt = String::new();
        writeln!(prompt, "Merge the approved pull request {url}.").unwrap();
        writeln!(prompt).unwrap();
        writeln!(prompt, "Steps:").unwrap();
        writeln!(
            prompt,
            "1. Confirm the approval state: gh pr view {url} --json reviewDecision"
        )
        .unwrap();
        writeln!(
            prompt,
            "2. Merge and delete the branch: gh pr merge {url} --squash --delete-branch"
        )
        .unwrap();
        writeln!(
            prompt,
            "3. If the merge conflicts, rebase the branch on the base branch, resolve, \
             push, and retry the merge."
        )
        .unwrap();
        writeln!(prompt, "4. Report the outcome, including any conflict you resolved.").unwrap();

        Ok(prompt)
    }

    fn render_check_status(&self, request: &TaskRequest, workspace: &WorkspaceInfo) -> String {
        format!(
            "Report the current state of task {} in {}: current branch, uncommitted \
             changes (git status), and the last three commits (git log --oneline -3). \
             Do not change anything.\n",
            request.task_id,
            workspace.workspace_dir.display()
        )
    }
}
