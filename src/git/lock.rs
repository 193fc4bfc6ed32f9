// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-repository locking for mutating git operations.
//!
//! One lock per `owner/name` repository id. Tokio mutexes hand the lock to
//! waiters in FIFO order, which gives mutating operations on one repository
//! a total order. Acquisition is bounded; a holder that errors or panics
//! releases through guard drop.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::error::GitError;

/// What the holder intends to do with the repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GitLockAction {
    Clone,
    Worktree,
    Pull,
    Push,
}

impl std::fmt::Display for GitLockAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clone => write!(f, "clone"),
            Self::Worktree => write!(f, "worktree"),
            Self::Pull => write!(f, "pull"),
            Self::Push => write!(f, "push"),
        }
    }
}

/// Registry of per-repository locks.
pub struct GitLockRegistry {
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    acquire_timeout: Duration,
}

impl GitLockRegistry {
    pub fn new(acquire_timeout: Duration) -> Self {
        Self {
            locks: StdMutex::new(HashMap::new()),
            acquire_timeout,
        }
    }

    fn lock_for(&self, repository_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().expect("git lock registry poisoned");
        locks
            .entry(repository_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Run `fut` while holding the repository's lock.
    ///
    /// Fails with LOCK_TIMEOUT when the lock cannot be acquired within the
    /// configured window. The lock is released on every exit path of `fut`.
    pub async fn with_lock<T>(
        &self,
        repository_id: &str,
        action: GitLockAction,
        fut: impl Future<Output = T>,
    ) -> Result<T, GitError> {
        let lock = self.lock_for(repository_id);

        trace!(repository = repository_id, %action, "acquiring repository lock");
        let guard = tokio::time::timeout(self.acquire_timeout, lock.lock())
            .await
            .map_err(|_| GitError::LockTimeout {
                repository_id: repository_id.to_string(),
                action: action.to_string(),
                timeout: self.acquire_timeout,
            })?;

        debug!(repository = repository_id, %action, "repository lock held");
        let result = fut.await;
        drop(guard);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_lock_serialises_same_repository() {
        let registry = Arc::new(GitLockRegistry::new(Duration::from_secs(5)));
        let in_section = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let in_section = Arc::clone(&in_section);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                registry
                    .with_lock("octo/webapp", GitLockAction::Worktree, async {
                        let now = in_section.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        in_section.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_different_repositories_do_not_block() {
        let registry = Arc::new(GitLockRegistry::new(Duration::from_millis(200)));

        let r2 = Arc::clone(&registry);
        let holder = tokio::spawn(async move {
            r2.with_lock("octo/a", GitLockAction::Pull, async {
                tokio::time::sleep(Duration::from_millis(100)).await;
            })
            .await
            .unwrap();
        });

        // A different repository acquires immediately.
        registry
            .with_lock("octo/b", GitLockAction::Pull, async {})
            .await
            .unwrap();

        holder.await.unwrap();
    }

    #[tokio::test]
    async fn test_acquisition_times_out() {
        let registry = Arc::new(GitLockRegistry::new(Duration::from_millis(20)));

        let r2 = Arc::clone(&registry);
        let holder = tokio::spawn(async move {
            r2.with_lock("octo/webapp", GitLockAction::Clone, async {
                tokio::time::sleep(Duration::from_millis(200)).await;
            })
            .await
            .unwrap();
        });

        // Give the holder time to take the lock first.
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = registry
            .with_lock("octo/webapp", GitLockAction::Worktree, async {})
            .await
            .unwrap_err();
        assert!(matches!(err, GitError::LockTimeout { .. }));

        holder.await.unwrap();
    }

    #[tokio::test]
    async fn test_lock_released_after_error_in_section() {
        let registry = GitLockRegistry::new(Duration::from_millis(100));

        let result: Result<Result<(), &str>, _> = registry
            .with_lock("octo/webapp", GitLockAction::Push, async { Err("boom") })
            .await;
        assert!(result.unwrap().is_err());

        // The lock is free again.
        registry
            .with_lock("octo/webapp", GitLockAction::Push, async {})
            .await
            .unwrap();
    }
}
