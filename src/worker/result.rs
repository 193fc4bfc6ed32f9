// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transcript processing.
//!
//! The assistant's transcript is free-form text; this module is the explicit
//! grammar that turns it into a structured [`WorkerResult`]. The grammar is
//! a versioned protocol shared with [`super::prompt`]:
//!
//! - `PR: <url>` marks the pull request URL (Korean markers from earlier
//!   assistant versions are still honoured).
//! - Compiler, test, and generic error patterns are matched in a fixed
//!   order; the first match wins.
//! - `## 작업 진행 상황 요약` and `## 테스트 결과` sections become the result
//!   summary.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::json;
use tracing::warn;

use crate::developer::Transcript;
use crate::error::{ErrorCode, ProcessingError};
use crate::types::{TaskRequest, WorkerResult};

/// Line prefixes that flag the authoritative PR URL line.
const PR_LINE_MARKERS: &[&str] = &["PR:", "생성된 PR", "Pull Request 링크"];

/// Section headings collected into the result summary.
const SUMMARY_HEADINGS: &[&str] = &["## 작업 진행 상황 요약", "## 테스트 결과"];

static PR_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://github\.com/[A-Za-z0-9_.-]+/[A-Za-z0-9_.-]+/pull/\d+")
        .expect("valid PR URL regex")
});

static TS_ERROR_LINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(\S+):(\d+):(\d+)\s+-\s+error\s+.*$").expect("valid TS error regex")
});

static TESTS_FAILED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s+tests?\s+failed").expect("valid failed-tests regex"));

static TESTS_PASSED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s+tests?\s+passed").expect("valid passed-tests regex"));

/// Error extracted from a transcript. Reported on the result, never thrown.
#[derive(Debug, Clone)]
pub struct ExtractedError {
    pub code: ErrorCode,
    pub message: String,
    /// Pattern-specific context (error lines, test counts, ...).
    pub context: serde_json::Value,
}

/// Extract the pull request URL from a transcript.
///
/// The first URL on a marker line (`PR:` and equivalents) wins; otherwise
/// the first URL anywhere. Only `https://` URLs on the forge host match.
pub fn extract_pull_request_url(transcript: &str) -> Option<String> {
    for line in transcript.lines() {
        let trimmed = line.trim_start();
        if PR_LINE_MARKERS.iter().any(|m| trimmed.starts_with(m)) {
            if let Some(found) = PR_URL_RE.find(trimmed) {
                return Some(found.as_str().to_string());
            }
        }
    }
    PR_URL_RE
        .find(transcript)
        .map(|found| found.as_str().to_string())
}

/// Extract the first matching error from a transcript.
///
/// Order: TypeScript compilation, test failures, generic `Error:` lines.
pub fn extract_error(transcript: &str) -> Option<ExtractedError> {
    if transcript.contains("TypeScript compilation failed") {
        let errors: Vec<String> = TS_ERROR_LINE_RE
            .find_iter(transcript)
            .map(|m| m.as_str().trim().to_string())
            .collect();
        return Some(ExtractedError {
            code: ErrorCode::TypescriptError,
            message: "TypeScript compilation failed".to_string(),
            context: json!({ "errors": errors }),
        });
    }

    if let Some(captures) = TESTS_FAILED_RE.captures(transcript) {
        let failed: u64 = captures[1].parse().unwrap_or(0);
        let passed = TESTS_PASSED_RE
            .captures(transcript)
            .and_then(|c| c[1].parse::<u64>().ok());
        let mut context = json!({ "failedTests": failed });
        if let Some(passed) = passed {
            context["passedTests"] = json!(passed);
        }
        return Some(ExtractedError {
            code: ErrorCode::TestFailure,
            message: format!("{failed} tests failed"),
            context,
        });
    }

    let mut lines = transcript.lines();
    while let Some(line) = lines.next() {
        let trimmed = line.trim_start();
        if let Some(message) = trimmed.strip_prefix("Error:") {
            let details = lines.next().map(|l| l.trim().to_string());
            return Some(ExtractedError {
                code: ErrorCode::ExecutionError,
                message: format!("Error:{message}").trim().to_string(),
                context: json!({ "details": details }),
            });
        }
    }

    None
}

/// Collect the summary sections of a transcript, when present.
pub fn extract_summary(transcript: &str) -> Option<String> {
    let mut sections = Vec::new();

    for heading in SUMMARY_HEADINGS {
        let Some(start) = transcript.find(heading) else {
            continue;
        };
        let body = &transcript[start..];
        // The section runs until the next `## ` heading or end of transcript.
        let end = body[heading.len()..]
            .find("\n## ")
            .map(|i| heading.len() + i)
            .unwrap_or(body.len());
        let section = body[..end].trim();
        if !section.is_empty() {
            sections.push(section.to_string());
        }
    }

    if sections.is_empty() {
        None
    } else {
        Some(sections.join("\n\n"))
    }
}

/// Parses assistant transcripts into worker results.
#[derive(Debug, Default, Clone, Copy)]
pub struct ResultProcessor;

impl ResultProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Turn a transcript into a [`WorkerResult`].
    ///
    /// `success` is true exactly when no error pattern matched. Fails with
    /// VALIDATION_ERROR on an empty transcript or task id.
    pub fn process(
        &self,
        transcript: &Transcript,
        request: &TaskRequest,
    ) -> Result<WorkerResult, ProcessingError> {
        if request.task_id.is_empty() {
            return Err(ProcessingError::Validation("empty task id".into()));
        }
        if transcript.raw_output.trim().is_empty() {
            return Err(ProcessingError::Validation("empty transcript".into()));
        }

        let pull_request_url = extract_pull_request_url(&transcript.raw_output);
        let error = extract_error(&transcript.raw_output);
        let details = extract_summary(&transcript.raw_output);

        let mut result = if let Some(error) = &error {
            warn!(
                task = %request.task_id,
                code = %error.code,
                message = %error.message,
                "transcript reported an error"
            );
            WorkerResult::failure(&request.task_id, &error.message)
        } else {
            WorkerResult::success(&request.task_id)
        };

        result.pull_request_url = pull_request_url;
        result.details = details;
        Ok(result)
    }
}
