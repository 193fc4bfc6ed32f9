// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-task workspaces.
//!
//! A workspace maps `(repository, task)` to a git worktree directory plus two
//! files inside it: `.workspace.json` (metadata, making preparation
//! idempotent across restarts) and `CLAUDE.local.md` (the task brief the
//! assistant reads).
//!
//! Preparation is idempotent and safe under concurrency: a per-task lock
//! serialises check-then-create, so two concurrent `prepare` calls for one
//! task yield the same [`WorkspaceInfo`] and exactly one worktree.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::WorkspaceError;
use crate::git::GitClient;
use crate::types::{sanitize_ref_component, split_repository_id, BoardItem};

/// Metadata file inside each workspace.
pub const METADATA_FILE: &str = ".workspace.json";

/// Task brief file the assistant reads.
pub const INSTRUCTIONS_FILE: &str = "CLAUDE.local.md";

/// Per-task filesystem handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceInfo {
    pub task_id: String,
    pub repository_id: String,
    /// Absolute path of the worktree directory.
    pub workspace_dir: PathBuf,
    /// Branch the worktree is on (sanitised task id).
    pub branch_name: String,
    pub worktree_created: bool,
    /// Path of the instruction file inside the worktree.
    pub instructions_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl WorkspaceInfo {
    /// Load metadata from a workspace directory.
    pub fn load(workspace_dir: &Path) -> Result<Self, WorkspaceError> {
        let path = workspace_dir.join(METADATA_FILE);
        let content = std::fs::read_to_string(&path)?;
        serde_json::from_str(&content).map_err(|e| WorkspaceError::CorruptMetadata {
            path,
            message: e.to_string(),
        })
    }

    /// Persist metadata into the workspace directory.
    pub fn save(&self) -> Result<(), WorkspaceError> {
        let path = self.workspace_dir.join(METADATA_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|e| {
            WorkspaceError::CorruptMetadata {
                path: path.clone(),
                message: e.to_string(),
            }
        })?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Abstraction over workspace preparation, so workers can run against the
/// git-backed manager or a test double.
#[async_trait]
pub trait WorkspaceProvider: Send + Sync {
    /// Prepare (or reuse) the workspace for a task. Idempotent.
    async fn prepare(
        &self,
        task_id: &str,
        repository_id: &str,
        board_item: Option<&BoardItem>,
    ) -> Result<WorkspaceInfo, WorkspaceError>;

    /// Whether the workspace on disk still matches the handle.
    async fn validate(&self, info: &WorkspaceInfo) -> bool;

    /// Best-effort removal of the task's workspace. Failures are logged and
    /// swallowed.
    async fn cleanup(&self, task_id: &str);
}

/// Git-worktree-backed workspace manager.
pub struct WorkspaceManager {
    workspace_root: PathBuf,
    git: Arc<GitClient>,
    /// Prepared workspaces by task id.
    tracked: RwLock<HashMap<String, WorkspaceInfo>>,
    /// Per-task preparation locks.
    task_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WorkspaceManager {
    pub fn new(workspace_root: impl Into<PathBuf>, git: Arc<GitClient>) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            git,
            tracked: RwLock::new(HashMap::new()),
            task_locks: StdMutex::new(HashMap::new()),
        }
    }

    /// Directory for a task's worktree: `<root>/<owner>_<repo>_<task>`.
    pub fn workspace_dir(
        &self,
        task_id: &str,
        repository_id: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        let (owner, name) = split_repository_id(repository_id).ok_or_else(|| {
            WorkspaceError::Invalid(format!("invalid repository id: {repository_id}"))
        })?;
        let dir_name = format!(
            "{}_{}_{}",
            sanitize_ref_component(owner),
            sanitize_ref_component(name),
            sanitize_ref_component(task_id)
        );
        Ok(self.workspace_root.join(dir_name))
    }

    fn task_lock(&self, task_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.task_locks.lock().expect("task lock registry poisoned");
        locks
            .entry(task_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn find_tracked(&self, task_id: &str) -> Option<WorkspaceInfo> {
        self.tracked.read().await.get(task_id).cloned()
    }

    /// Locate the workspace directory for a task that is not tracked in
    /// memory (e.g. after a restart) by scanning the workspace root.
    fn scan_for_task(&self, task_id: &str) -> Option<PathBuf> {
        let suffix = format!("_{}", sanitize_ref_component(task_id));
        let entries = std::fs::read_dir(&self.workspace_root).ok()?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(&suffix)
                && path.join(METADATA_FILE).exists()
            {
                return Some(path);
            }
        }
        None
    }
}

#[async_trait]
impl WorkspaceProvider for WorkspaceManager {
    async fn prepare(
        &self,
        task_id: &str,
        repository_id: &str,
        board_item: Option<&BoardItem>,
    ) -> Result<WorkspaceInfo, WorkspaceError> {
        if task_id.is_empty() {
            return Err(WorkspaceError::Invalid("empty task id".into()));
        }

        let lock = self.task_lock(task_id);
        let _guard = lock.lock().await;

        let workspace_dir = self.workspace_dir(task_id, repository_id)?;

        // Reuse an existing workspace when its worktree survived.
        if workspace_dir.join(METADATA_FILE).exists() {
            match WorkspaceInfo::load(&workspace_dir) {
                Ok(info) if workspace_dir.join(".git").exists() => {
                    debug!(task = task_id, "reusing existing workspace");
                    self.tracked
                        .write()
                        .await
                        .insert(task_id.to_string(), info.clone());
                    return Ok(info);
                }
                Ok(_) => {
                    // Metadata survived but the worktree did not; rebuild.
                    warn!(task = task_id, "workspace metadata without worktree, recreating");
                }
                Err(e) => {
                    warn!(task = task_id, error = %e, "corrupt workspace metadata, recreating");
                }
            }
            let _ = tokio::fs::remove_dir_all(&workspace_dir).await;
        }

        let repo_dir = self.git.ensure_repository(repository_id).await?;
        let branch_name = sanitize_ref_component(task_id);
        tokio::fs::create_dir_all(&self.workspace_root).await?;
        self.git
            .create_worktree(repository_id, &repo_dir, &branch_name, &workspace_dir)
            .await?;

        let instructions_path = workspace_dir.join(INSTRUCTIONS_FILE);
        let brief = render_task_brief(task_id, repository_id, board_item);
        tokio::fs::write(&instructions_path, brief).await?;

        let info = WorkspaceInfo {
            task_id: task_id.to_string(),
            repository_id: repository_id.to_string(),
            workspace_dir: workspace_dir.clone(),
            branch_name,
            worktree_created: true,
            instructions_path,
            created_at: Utc::now(),
        };
        info.save()?;

        info!(task = task_id, path = %workspace_dir.display(), "workspace prepared");
        self.tracked
            .write()
            .await
            .insert(task_id.to_string(), info.clone());
        Ok(info)
    }

    async fn validate(&self, info: &WorkspaceInfo) -> bool {
        info.workspace_dir.is_dir()
            && info.workspace_dir.join(".git").exists()
            && info.instructions_path.is_file()
    }

    async fn cleanup(&self, task_id: &str) {
        let info = match self.find_tracked(task_id).await {
            Some(info) => Some(info),
            None => self
                .scan_for_task(task_id)
                .and_then(|dir| WorkspaceInfo::load(&dir).ok()),
        };

        let Some(info) = info else {
            debug!(task = task_id, "no workspace to clean up");
            return;
        };

        let repo_dir = match self.git.repo_cache_dir(&info.repository_id) {
            Ok(dir) => dir,
            Err(e) => {
                warn!(task = task_id, error = %e, "cleanup skipped");
                return;
            }
        };

        if let Err(e) = self
            .git
            .remove_worktree(&info.repository_id, &repo_dir, &info.workspace_dir)
            .await
        {
            warn!(task = task_id, error = %e, "workspace cleanup failed");
        } else {
            info!(task = task_id, "workspace cleaned up");
        }

        self.tracked.write().await.remove(task_id);
    }
}

/// Render the task brief written to the instruction file.
fn render_task_brief(
    task_id: &str,
    repository_id: &str,
    board_item: Option<&BoardItem>,
) -> String {
    let mut brief = String::new();
    brief.push_str("# Task Brief\n\n");
    brief.push_str(&format!("- Task: {task_id}\n"));
    brief.push_str(&format!("- Repository: {repository_id}\n"));

    if let Some(item) = board_item {
        brief.push_str(&format!("- Title: {}\n", item.title));
        if !item.labels.is_empty() {
            brief.push_str(&format!("- Labels: {}\n", item.labels.join(", ")));
        }
        if let Some(priority) = &item.priority {
            brief.push_str(&format!("- Priority: {priority}\n"));
        }
        if let Some(description) = &item.description {
            brief.push_str("\n## Description\n\n");
            brief.push_str(description);
            brief.push('\n');
        }
    }

    brief.push_str("\nWork only inside this directory. Commit in small, reviewable steps.\n");
    brief
}

#[cfg(test)]
pub(crate) mod testing {
    //! In-memory workspace provider for unit tests in sibling modules.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Stub provider handing out paths under a base directory without
    /// touching git.
    pub struct StubWorkspace {
        base: PathBuf,
        pub prepare_calls: AtomicUsize,
        pub fail_prepare: bool,
    }

    impl StubWorkspace {
        pub fn new(base: impl Into<PathBuf>) -> Self {
            Self {
                base: base.into(),
                prepare_calls: AtomicUsize::new(0),
                fail_prepare: false,
            }
        }

        pub fn failing(base: impl Into<PathBuf>) -> Self {
            Self {
                fail_prepare: true,
                ..Self::new(base)
            }
        }
    }

    #[async_trait]
    impl WorkspaceProvider for StubWorkspace {
        async fn prepare(
            &self,
            task_id: &str,
            repository_id: &str,
            _board_item: Option<&BoardItem>,
        ) -> Result<WorkspaceInfo, WorkspaceError> {
            self.prepare_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_prepare {
                return Err(WorkspaceError::Invalid("stub prepare failure".into()));
            }
            let dir = self.base.join(format!("ws-{task_id}"));
            std::fs::create_dir_all(&dir).ok();
            Ok(WorkspaceInfo {
                task_id: task_id.to_string(),
                repository_id: repository_id.to_string(),
                workspace_dir: dir.clone(),
                branch_name: sanitize_ref_component(task_id),
                worktree_created: true,
                instructions_path: dir.join(INSTRUCTIONS_FILE),
                created_at: Utc::now(),
            })
        }

        async fn validate(&self, info: &WorkspaceInfo) -> bool {
            info.workspace_dir.is_dir()
        }

        async fn cleanup(&self, _task_id: &str) {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::git::GitLockRegistry;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::process::Command;

    async fn seed_repo(dir: &Path) {
        tokio::fs::create_dir_all(dir).await.unwrap();
        for args in [
            vec!["init", "--initial-branch=main"],
            vec!["config", "user.email", "test@example.com"],
            vec!["config", "user.name", "Test"],
        ] {
            let out = Command::new("git").args(&args).current_dir(dir).output().await.unwrap();
            assert!(out.status.success());
        }
        tokio::fs::write(dir.join("lib.rs"), "// seed\n").await.unwrap();
        for args in [vec!["add", "."], vec!["commit", "-m", "seed"]] {
            let out = Command::new("git").args(&args).current_dir(dir).output().await.unwrap();
            assert!(out.status.success());
        }
    }

    fn manager(root: &Path) -> WorkspaceManager {
        let git = Arc::new(GitClient::new(
            root.join("repos"),
            Arc::new(GitLockRegistry::new(Duration::from_secs(10))),
            Duration::from_secs(30),
            Duration::from_secs(3600),
            1,
        ));
        WorkspaceManager::new(root, git)
    }

    #[tokio::test]
    async fn test_prepare_creates_worktree_and_files() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(temp.path());
        seed_repo(&temp.path().join("repos").join("octo_webapp")).await;

        let info = mgr.prepare("task-1", "octo/webapp", None).await.unwrap();
        assert!(info.workspace_dir.ends_with("octo_webapp_task-1"));
        assert_eq!(info.branch_name, "task-1");
        assert!(info.worktree_created);
        assert!(info.instructions_path.exists());
        assert!(info.workspace_dir.join(METADATA_FILE).exists());
        assert!(mgr.validate(&info).await);
    }

    #[tokio::test]
    async fn test_prepare_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(temp.path());
        seed_repo(&temp.path().join("repos").join("octo_webapp")).await;

        let first = mgr.prepare("task-1", "octo/webapp", None).await.unwrap();
        let second = mgr.prepare("task-1", "octo/webapp", None).await.unwrap();
        assert_eq!(first.workspace_dir, second.workspace_dir);
        assert_eq!(first.created_at, second.created_at);
    }

    #[tokio::test]
    async fn test_concurrent_prepare_creates_one_worktree() {
        let temp = TempDir::new().unwrap();
        let mgr = Arc::new(manager(temp.path()));
        seed_repo(&temp.path().join("repos").join("octo_webapp")).await;

        let a = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.prepare("task-1", "octo/webapp", None).await })
        };
        let b = {
            let mgr = Arc::clone(&mgr);
            tokio::spawn(async move { mgr.prepare("task-1", "octo/webapp", None).await })
        };

        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();
        assert_eq!(a.workspace_dir, b.workspace_dir);

        // Exactly one workspace directory exists for the task.
        let count = std::fs::read_dir(temp.path())
            .unwrap()
            .flatten()
            .filter(|e| e.file_name().to_string_lossy().ends_with("_task-1"))
            .count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_validate_detects_missing_instructions() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(temp.path());
        seed_repo(&temp.path().join("repos").join("octo_webapp")).await;

        let info = mgr.prepare("task-1", "octo/webapp", None).await.unwrap();
        std::fs::remove_file(&info.instructions_path).unwrap();
        assert!(!mgr.validate(&info).await);
    }

    #[tokio::test]
    async fn test_cleanup_removes_workspace() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(temp.path());
        seed_repo(&temp.path().join("repos").join("octo_webapp")).await;

        let info = mgr.prepare("task-1", "octo/webapp", None).await.unwrap();
        assert!(info.workspace_dir.exists());

        mgr.cleanup("task-1").await;
        assert!(!info.workspace_dir.exists());

        // Cleaning a second time is a quiet no-op.
        mgr.cleanup("task-1").await;
    }

    #[tokio::test]
    async fn test_cleanup_unknown_task_is_noop() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(temp.path());
        mgr.cleanup("never-seen").await;
    }

    #[test]
    fn test_render_task_brief_includes_description() {
        let item = BoardItem {
            id: "t".into(),
            title: "Fix login".into(),
            description: Some("Users cannot log in with SSO.".into()),
            status: crate::types::ItemStatus::Todo,
            priority: Some("high".into()),
            assignee: None,
            labels: vec!["bug".into()],
            pull_request_urls: vec![],
            content_type: crate::types::ContentType::Issue,
            repository: Some("octo/webapp".into()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let brief = render_task_brief("t", "octo/webapp", Some(&item));
        assert!(brief.contains("Fix login"));
        assert!(brief.contains("SSO"));
        assert!(brief.contains("Labels: bug"));
    }
}
