// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Telemetry and tracing infrastructure.
//!
//! Structured logging for the orchestrator, initialized once at startup from
//! the `logger` config section. Sinks are console and/or a log file; the
//! level comes from config with `RUST_LOG` taking precedence.
//!
//! ```rust,ignore
//! use autodev::config::LoggerConfig;
//! use autodev::telemetry::init_telemetry;
//!
//! let _guard = init_telemetry(&LoggerConfig::default())?;
//! ```

mod init;

pub use init::{init_telemetry, TelemetryGuard};
