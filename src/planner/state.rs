// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Planner bookkeeping between ticks.
//!
//! Everything here is in-memory and rebuilt from board state after a
//! restart; the board is the durable source of truth.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use crate::types::{ItemStatus, TaskAction};

/// Per-task retry bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct TaskState {
    /// Consecutive ERROR responses / failed results.
    pub retry_count: u32,
    /// Set when `retry_count` exceeded the configured budget.
    pub stuck: bool,
    /// Board status the task had when it got stuck; a status change clears
    /// the stuck flag.
    pub stuck_at: Option<ItemStatus>,
    /// Last error message observed.
    pub last_error: Option<String>,
}

/// Mutable planner state, owned by the planner and touched only inside a
/// tick (ticks are serialised).
#[derive(Debug, Default)]
pub struct PlannerState {
    /// Newest comment timestamp already turned into feedback, per task.
    pub last_seen_comment_at: HashMap<String, DateTime<Utc>>,
    /// Retry/stuck state per task.
    pub tasks: HashMap<String, TaskState>,
    /// Action submitted for a task whose result is still outstanding.
    pub pending_action: HashMap<String, TaskAction>,
    /// Tasks whose DONE cleanup already ran.
    pub cleaned: HashSet<String>,
    /// Completed tick count.
    pub ticks: u64,
    /// When the last tick finished.
    pub last_tick_at: Option<DateTime<Utc>>,
    /// Signature of the last tick-level failure, for log coalescing.
    pub last_failure_signature: Option<String>,
    /// How many consecutive ticks failed with that signature.
    pub repeated_failures: u32,
}

impl PlannerState {
    pub fn task_mut(&mut self, task_id: &str) -> &mut TaskState {
        self.tasks.entry(task_id.to_string()).or_default()
    }

    /// Record an error for a task; returns true when it just became stuck.
    pub fn record_task_error(
        &mut self,
        task_id: &str,
        status: ItemStatus,
        error: impl Into<String>,
        max_retry_attempts: u32,
    ) -> bool {
        let task = self.task_mut(task_id);
        task.retry_count += 1;
        task.last_error = Some(error.into());
        if !task.stuck && task.retry_count > max_retry_attempts {
            task.stuck = true;
            task.stuck_at = Some(status);
            return true;
        }
        false
    }

    /// Clear retry state after a successful step.
    pub fn clear_task_errors(&mut self, task_id: &str) {
        self.tasks.remove(task_id);
    }

    /// Whether emission for this task is suppressed.
    ///
    /// A stuck task stays suppressed until its board status changes.
    pub fn is_stuck(&mut self, task_id: &str, current_status: ItemStatus) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if !task.stuck {
            return false;
        }
        if task.stuck_at != Some(current_status) {
            // Status moved on the board; give the task a fresh budget.
            *task = TaskState::default();
            return false;
        }
        true
    }

    /// Currently stuck task ids.
    pub fn stuck_tasks(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .tasks
            .iter()
            .filter(|(_, t)| t.stuck)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// The newest comment timestamp already handled for a task.
    pub fn last_seen(&self, task_id: &str) -> DateTime<Utc> {
        self.last_seen_comment_at
            .get(task_id)
            .copied()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Advance the last-seen watermark, never backwards.
    pub fn advance_last_seen(&mut self, task_id: &str, observed: DateTime<Utc>) {
        let entry = self
            .last_seen_comment_at
            .entry(task_id.to_string())
            .or_insert(DateTime::<Utc>::MIN_UTC);
        if observed > *entry {
            *entry = observed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_errors_until_stuck() {
        let mut state = PlannerState::default();
        assert!(!state.record_task_error("t", ItemStatus::Todo, "e1", 2));
        assert!(!state.record_task_error("t", ItemStatus::Todo, "e2", 2));
        // Third error exceeds max_retry_attempts=2.
        assert!(state.record_task_error("t", ItemStatus::Todo, "e3", 2));
        assert!(state.is_stuck("t", ItemStatus::Todo));
        assert_eq!(state.stuck_tasks(), vec!["t".to_string()]);
    }

    #[test]
    fn test_stuck_clears_on_status_change() {
        let mut state = PlannerState::default();
        for _ in 0..4 {
            state.record_task_error("t", ItemStatus::Todo, "e", 2);
        }
        assert!(state.is_stuck("t", ItemStatus::Todo));

        // The item moved on the board; the stuck flag resets.
        assert!(!state.is_stuck("t", ItemStatus::InProgress));
        assert!(!state.is_stuck("t", ItemStatus::InProgress));
        assert_eq!(state.task_mut("t").retry_count, 0);
    }

    #[test]
    fn test_clear_task_errors() {
        let mut state = PlannerState::default();
        state.record_task_error("t", ItemStatus::Todo, "e", 5);
        state.clear_task_errors("t");
        assert_eq!(state.task_mut("t").retry_count, 0);
    }

    #[test]
    fn test_last_seen_watermark_is_monotonic() {
        let mut state = PlannerState::default();
        let now = Utc::now();
        assert_eq!(state.last_seen("t"), DateTime::<Utc>::MIN_UTC);

        state.advance_last_seen("t", now);
        assert_eq!(state.last_seen("t"), now);

        // Older observation does not move the watermark back.
        state.advance_last_seen("t", now - chrono::Duration::minutes(5));
        assert_eq!(state.last_seen("t"), now);
    }
}
