// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Git layer: repository cache, worktrees, and the repository lock.
//!
//! All mutating operations (clone, fetch, worktree add/remove, pull) are
//! serialised per repository through [`GitLockRegistry`]; read-only queries
//! bypass it. Every subprocess is bounded by the configured operation
//! timeout.
//!
//! # Directory Structure
//!
//! ```text
//! <workspace_root>/
//! ├── repos/
//! │   └── octo_webapp/            # Cached clone (shared across tasks)
//! └── octo_webapp_task-1/         # Per-task worktree
//!     ├── .git                    # Worktree link file
//!     ├── .workspace.json
//!     └── CLAUDE.local.md
//! ```

mod lock;
mod repository;

pub use lock::{GitLockAction, GitLockRegistry};
pub use repository::GitClient;
