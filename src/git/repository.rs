// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Repository cache and worktree operations.
//!
//! One cached clone per repository under `<cache_root>/<owner>_<name>`, kept
//! fresh by periodic fetches; per-task worktrees are created from and
//! removed against that cache. Every subprocess is run through a bounded
//! `git` invocation and failures carry the command, exit code, and stderr.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::GitError;
use crate::types::split_repository_id;

use super::lock::{GitLockAction, GitLockRegistry};

/// Base URL for clone endpoints on the forge.
const FORGE_CLONE_BASE: &str = "https://github.com";

/// Git operations over a shared repository cache.
pub struct GitClient {
    cache_root: PathBuf,
    locks: Arc<GitLockRegistry>,
    operation_timeout: Duration,
    cache_timeout: Duration,
    clone_depth: u32,
}

impl GitClient {
    pub fn new(
        cache_root: impl Into<PathBuf>,
        locks: Arc<GitLockRegistry>,
        operation_timeout: Duration,
        cache_timeout: Duration,
        clone_depth: u32,
    ) -> Self {
        Self {
            cache_root: cache_root.into(),
            locks,
            operation_timeout,
            cache_timeout,
            clone_depth,
        }
    }

    /// Canonical cache directory for a repository.
    pub fn repo_cache_dir(&self, repository_id: &str) -> Result<PathBuf, GitError> {
        let (owner, name) = split_repository_id(repository_id)
            .ok_or_else(|| GitError::InvalidRepositoryId(repository_id.to_string()))?;
        Ok(self.cache_root.join(format!("{owner}_{name}")))
    }

    /// Ensure a cached clone of the repository exists and is fresh.
    ///
    /// Absent: shallow-clone under the Clone lock. Present but older than the
    /// cache timeout: fetch under the Pull lock. Returns the cache directory.
    pub async fn ensure_repository(&self, repository_id: &str) -> Result<PathBuf, GitError> {
        let repo_dir = self.repo_cache_dir(repository_id)?;

        if !repo_dir.join(".git").exists() {
            let url = format!("{FORGE_CLONE_BASE}/{repository_id}.git");
            let depth = self.clone_depth.to_string();
            let repo_dir_str = repo_dir.to_string_lossy().to_string();
            self.locks
                .with_lock(repository_id, GitLockAction::Clone, async {
                    // A concurrent task may have cloned while we waited.
                    if repo_dir.join(".git").exists() {
                        return Ok(());
                    }
                    tokio::fs::create_dir_all(&self.cache_root).await?;
                    info!(repository = repository_id, "cloning into cache");
                    self.run_git(
                        &["clone", "--depth", &depth, &url, &repo_dir_str],
                        &self.cache_root,
                    )
                    .await
                    .map(|_| ())
                })
                .await??;
        } else if self.cache_is_stale(&repo_dir) {
            self.locks
                .with_lock(repository_id, GitLockAction::Pull, async {
                    debug!(repository = repository_id, "refreshing cache");
                    self.run_git(&["fetch", "--all", "--prune"], &repo_dir)
                        .await
                        .map(|_| ())
                })
                .await??;
        }

        Ok(repo_dir)
    }

    /// Create a worktree on `branch` rooted at the cached repository's HEAD.
    ///
    /// Reuses the branch when it already exists (a resumed task).
    pub async fn create_worktree(
        &self,
        repository_id: &str,
        repo_dir: &Path,
        branch: &str,
        worktree_dir: &Path,
    ) -> Result<(), GitError> {
        let worktree_str = worktree_dir.to_string_lossy().to_string();
        let branch_exists = self.branch_exists(repo_dir, branch).await;

        self.locks
            .with_lock(repository_id, GitLockAction::Worktree, async {
                info!(
                    repository = repository_id,
                    branch, path = %worktree_dir.display(), "creating worktree"
                );
                if branch_exists {
                    // A stale registration from a deleted worktree would make
                    // the branch count as checked out.
                    let _ = self.run_git(&["worktree", "prune"], repo_dir).await;
                    self.run_git(&["worktree", "add", &worktree_str, branch], repo_dir)
                        .await
                        .map(|_| ())
                } else {
                    self.run_git(
                        &["worktree", "add", "-b", branch, &worktree_str, "HEAD"],
                        repo_dir,
                    )
                    .await
                    .map(|_| ())
                }
            })
            .await?
    }

    /// Remove a worktree; the directory is gone on all exit paths.
    pub async fn remove_worktree(
        &self,
        repository_id: &str,
        repo_dir: &Path,
        worktree_dir: &Path,
    ) -> Result<(), GitError> {
        let worktree_str = worktree_dir.to_string_lossy().to_string();

        self.locks
            .with_lock(repository_id, GitLockAction::Worktree, async {
                let removed = self
                    .run_git(&["worktree", "remove", "--force", &worktree_str], repo_dir)
                    .await;

                if let Err(e) = removed {
                    warn!(path = %worktree_dir.display(), error = %e, "git worktree remove failed, removing manually");
                    if worktree_dir.exists() {
                        tokio::fs::remove_dir_all(worktree_dir).await?;
                    }
                    let _ = self.run_git(&["worktree", "prune"], repo_dir).await;
                }
                // Belt and braces: git can report success yet leave the dir
                // when the worktree was already pruned.
                if worktree_dir.exists() {
                    tokio::fs::remove_dir_all(worktree_dir).await?;
                }
                Ok(())
            })
            .await?
    }

    /// Fast-forward the cached default branch.
    pub async fn pull_main_branch(
        &self,
        repository_id: &str,
        repo_dir: &Path,
    ) -> Result<(), GitError> {
        self.locks
            .with_lock(repository_id, GitLockAction::Pull, async {
                self.run_git(&["pull", "--ff-only"], repo_dir).await.map(|_| ())
            })
            .await?
    }

    /// Whether a local branch exists. Read-only, no lock.
    pub async fn branch_exists(&self, repo_dir: &Path, branch: &str) -> bool {
        self.run_git(
            &["rev-parse", "--verify", &format!("refs/heads/{branch}")],
            repo_dir,
        )
        .await
        .is_ok()
    }

    fn cache_is_stale(&self, repo_dir: &Path) -> bool {
        // FETCH_HEAD tracks the last fetch; fall back to HEAD for a clone
        // that has never fetched.
        let marker = {
            let fetch_head = repo_dir.join(".git").join("FETCH_HEAD");
            if fetch_head.exists() {
                fetch_head
            } else {
                repo_dir.join(".git").join("HEAD")
            }
        };

        let modified = match std::fs::metadata(&marker).and_then(|m| m.modified()) {
            Ok(t) => t,
            Err(_) => return true,
        };
        match SystemTime::now().duration_since(modified) {
            Ok(age) => age > self.cache_timeout,
            Err(_) => false,
        }
    }

    /// Run a git command with the operation timeout and return stdout.
    async fn run_git(&self, args: &[&str], cwd: &Path) -> Result<String, GitError> {
        let command_line = format!("git {}", args.join(" "));
        debug!(command = %command_line, cwd = %cwd.display(), "running git");

        let output = tokio::time::timeout(
            self.operation_timeout,
            Command::new("git")
                .args(args)
                .current_dir(cwd)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| GitError::Timeout {
            command: command_line.clone(),
            timeout: self.operation_timeout,
        })??;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(GitError::Command {
                command: command_line,
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
