// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! CLI-backed assistant driver.
//!
//! Spawns the assistant binary (`claude` or `gemini`) in non-interactive
//! mode with the prompt as an argument, captures stdout and stderr into one
//! transcript, and bounds the wait with the configured timeout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DeveloperType;
use crate::error::DeveloperError;

use super::{Developer, Transcript};

/// Bound on the version probe; generous, the real work timeout is separate.
const INIT_TIMEOUT: Duration = Duration::from_secs(30);

/// Driver spawning an assistant CLI as a child process.
pub struct CliDeveloper {
    developer_type: DeveloperType,
    binary: PathBuf,
    execution_timeout: Duration,
}

impl CliDeveloper {
    pub fn new(
        developer_type: DeveloperType,
        binary: impl Into<PathBuf>,
        execution_timeout: Duration,
    ) -> Self {
        Self {
            developer_type,
            binary: binary.into(),
            execution_timeout,
        }
    }

    /// Arguments for a non-interactive run of this assistant.
    fn prompt_args<'a>(&self, prompt: &'a str) -> Vec<&'a str> {
        // Both CLIs take `-p` for a one-shot prompt.
        vec!["-p", prompt]
    }
}

#[async_trait]
impl Developer for CliDeveloper {
    async fn initialize(&self) -> Result<(), DeveloperError> {
        let output = tokio::time::timeout(
            INIT_TIMEOUT,
            Command::new(&self.binary)
                .arg("--version")
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| DeveloperError::InitFailed(format!("{} version probe timed out", self.developer_type)))?
        .map_err(|e| {
            DeveloperError::NotAvailable(format!(
                "cannot run {}: {e}",
                self.binary.display()
            ))
        })?;

        if !output.status.success() {
            return Err(DeveloperError::InitFailed(format!(
                "{} --version exited with {:?}",
                self.binary.display(),
                output.status.code()
            )));
        }

        debug!(
            developer = %self.developer_type,
            version = %String::from_utf8_lossy(&output.stdout).trim(),
            "developer initialized"
        );
        Ok(())
    }

    async fn execute_prompt(
        &self,
        prompt: &str,
        cwd: &Path,
        cancel: &CancellationToken,
    ) -> Result<Transcript, DeveloperError> {
        let started = Instant::now();
        info!(
            developer = %self.developer_type,
            cwd = %cwd.display(),
            prompt_len = prompt.len(),
            "executing prompt"
        );

        let child = Command::new(&self.binary)
            .args(self.prompt_args(prompt))
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                DeveloperError::ExecutionFailed(format!(
                    "cannot spawn {}: {e}",
                    self.binary.display()
                ))
            })?;

        // kill_on_drop reaps the child on both early exits below.
        let output = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(developer = %self.developer_type, "execution cancelled");
                return Err(DeveloperError::Cancelled);
            }
            result = tokio::time::timeout(self.execution_timeout, child.wait_with_output()) => {
                match result {
                    Err(_) => {
                        warn!(developer = %self.developer_type, timeout = ?self.execution_timeout, "execution timed out");
                        return Err(DeveloperError::Timeout(self.execution_timeout));
                    }
                    Ok(output) => output?,
                }
            }
        };

        let mut raw_output = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr);
        if !stderr.trim().is_empty() {
            if !raw_output.is_empty() && !raw_output.ends_with('\n') {
                raw_output.push('\n');
            }
            raw_output.push_str(&stderr);
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        debug!(
            developer = %self.developer_type,
            exit_code = ?output.status.code(),
            duration_ms,
            transcript_len = raw_output.len(),
            "execution finished"
        );

        Ok(Transcript {
            raw_output,
            exit_code: output.status.code(),
            duration_ms,
            developer_type: self.developer_type,
        })
    }

    async fn cleanup(&self) -> Result<(), DeveloperError> {
        Ok(())
    }

    async fn is_available(&self) -> bool {
        self.initialize().await.is_ok()
    }

    fn developer_type(&self) -> DeveloperType {
        self.developer_type
    }
}
