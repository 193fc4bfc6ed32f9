// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Scripted assistant driver for tests.
//!
//! Responds with queued transcripts, can fail a configurable number of
//! `initialize` calls, and can hold an execution open until cancelled - the
//! knobs the worker, pool, and end-to-end tests need.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::DeveloperType;
use crate::error::DeveloperError;

use super::{Developer, Transcript};

/// Scripted developer double.
pub struct MockDeveloper {
    developer_type: DeveloperType,
    /// Transcripts handed out in order; the last one repeats.
    transcripts: Mutex<VecDeque<String>>,
    default_transcript: String,
    /// `initialize` calls that fail before the first success.
    init_failures_remaining: AtomicU32,
    init_calls: AtomicU32,
    /// Artificial execution latency.
    execution_delay: Duration,
    /// Prompts observed by `execute_prompt`, with their working directories.
    executed: Mutex<Vec<(String, PathBuf)>>,
}

impl Default for MockDeveloper {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDeveloper {
    pub fn new() -> Self {
        Self {
            developer_type: DeveloperType::ClaudeCode,
            transcripts: Mutex::new(VecDeque::new()),
            default_transcript: "done\n".to_string(),
            init_failures_remaining: AtomicU32::new(0),
            init_calls: AtomicU32::new(0),
            execution_delay: Duration::ZERO,
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Queue a transcript for the next execution.
    pub fn with_transcript(self, transcript: impl Into<String>) -> Self {
        self.transcripts.lock().unwrap().push_back(transcript.into());
        self
    }

    /// Transcript used when the queue is empty.
    pub fn with_default_transcript(mut self, transcript: impl Into<String>) -> Self {
        self.default_transcript = transcript.into();
        self
    }

    /// Fail the first `n` initialize calls.
    pub fn with_init_failures(self, n: u32) -> Self {
        self.init_failures_remaining.store(n, Ordering::SeqCst);
        self
    }

    /// Delay each execution, to keep a worker observably WORKING.
    pub fn with_execution_delay(mut self, delay: Duration) -> Self {
        self.execution_delay = delay;
        self
    }

    /// Number of initialize calls observed.
    pub fn init_calls(&self) -> u32 {
        self.init_calls.load(Ordering::SeqCst)
    }

    /// Prompts observed so far.
    pub fn executed_prompts(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(|(p, _)| p.clone())
            .collect()
    }
}

#[async_trait]
impl Developer for MockDeveloper {
    async fn initialize(&self) -> Result<(), DeveloperError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.init_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.init_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(DeveloperError::InitFailed("scripted init failure".into()));
        }
        Ok(())
    }

    async fn execute_prompt(
        &self,
        prompt: &str,
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> Result<Transcript, DeveloperError> {
        if !self.execution_delay.is_zero() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(DeveloperError::Cancelled),
                _ = tokio::time::sleep(self.execution_delay) => {}
            }
        } else if cancel.is_cancelled() {
            return Err(DeveloperError::Cancelled);
        }

        self.executed
            .lock()
            .unwrap()
            .push((prompt.to_string(), cwd.to_path_buf()));

        let raw_output = {
            let mut queue = self.transcripts.lock().unwrap();
            if queue.len() > 1 {
                queue.pop_front().unwrap()
            } else {
                queue
                    .front()
                    .cloned()
                    .unwrap_or_else(|| self.default_transcript.clone())
            }
        };

        Ok(Transcript {
            raw_output,
            exit_code: Some(0),
            duration_ms: self.execution_delay.as_millis() as u64,
            developer_type: self.developer_type,
        })
    }

    async fn cleanup(&self) -> Result<(), DeveloperError> {
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.init_failures_remaining.load(Ordering::SeqCst) == 0
    }

    fn developer_type(&self) -> DeveloperType {
        self.developer_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_failures_then_success() {
        let dev = MockDeveloper::new().with_init_failures(2);
        assert!(dev.initialize().await.is_err());
        assert!(dev.initialize().await.is_err());
        assert!(dev.initialize().await.is_ok());
        assert_eq!(dev.init_calls(), 3);
    }

    #[tokio::test]
    async fn test_transcript_queue_and_default() {
        let dev = MockDeveloper::new()
            .with_transcript("first")
            .with_transcript("second");
        let cancel = CancellationToken::new();
        let cwd = std::env::temp_dir();

        let a = dev.execute_prompt("p1", &cwd, &cancel).await.unwrap();
        assert_eq!(a.raw_output, "first");
        let b = dev.execute_prompt("p2", &cwd, &cancel).await.unwrap();
        assert_eq!(b.raw_output, "second");
        // Last transcript repeats.
        let c = dev.execute_prompt("p3", &cwd, &cancel).await.unwrap();
        assert_eq!(c.raw_output, "second");

        assert_eq!(dev.executed_prompts(), vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn test_delayed_execution_is_cancellable() {
        let dev = MockDeveloper::new().with_execution_delay(Duration::from_secs(10));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = dev
            .execute_prompt("p", &std::env::temp_dir(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, DeveloperError::Cancelled));
    }
}
