// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Façade over the low-level crash capture library.
//!
//! The capture library intercepts fatal signals in a running process and
//! writes a raw report that the next launch picks up. This module only
//! consumes it through [`CaptureLibrary`]; nothing here runs inside a signal
//! handler.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use loom_crashreport_core::{report, CrashArtifact, PendingCapture};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

/// File name of the pending report inside a [`DirectoryCaptureLibrary`].
pub const PENDING_REPORT_FILE: &str = "pending.crash";

#[derive(Debug, Error)]
pub enum CaptureError {
	#[error("capture library unavailable: {0}")]
	Unavailable(String),

	#[error("mach exception handler cannot be installed while a debugger is attached")]
	MachHandlerUnderDebugger,

	#[error("no pending crash report")]
	NoPendingReport,

	#[error("capture I/O error: {0}")]
	Io(#[from] std::io::Error),
}

/// How fatal signals are intercepted. The two are mutually exclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalHandler {
	#[default]
	Bsd,
	Mach,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CaptureOptions {
	pub signal_handler: SignalHandler,
	/// Also intercept uncaught language-level exceptions.
	pub exception_interception: bool,
}

/// The external signal/exception capture mechanism.
pub trait CaptureLibrary: Send {
	/// Install handlers for the current process.
	fn enable(&mut self, options: &CaptureOptions) -> Result<(), CaptureError>;

	/// Whether a report from a previous run is waiting.
	fn has_pending_report(&self) -> bool;

	fn load_pending_report(&self) -> Result<Vec<u8>, CaptureError>;

	fn purge_pending_report(&mut self) -> Result<(), CaptureError>;
}

/// Capture handle owned by the manager.
pub struct CaptureAdapter {
	library: Box<dyn CaptureLibrary>,
	enabled: bool,
	debugger_attached: bool,
}

impl std::fmt::Debug for CaptureAdapter {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CaptureAdapter")
			.field("enabled", &self.enabled)
			.field("debugger_attached", &self.debugger_attached)
			.finish_non_exhaustive()
	}
}

impl CaptureAdapter {
	/// Enable capture, probing for an attached debugger.
	pub fn initialize(library: Box<dyn CaptureLibrary>, options: &CaptureOptions) -> Self {
		Self::initialize_with(library, options, is_debugger_attached())
	}

	/// Enable capture with a known debugger state.
	///
	/// With a debugger attached capture stays disabled for the whole session.
	/// A library that refuses to enable is logged and leaves capture disabled.
	pub fn initialize_with(
		mut library: Box<dyn CaptureLibrary>,
		options: &CaptureOptions,
		debugger_attached: bool,
	) -> Self {
		let enabled = if debugger_attached {
			info!("Debugger attached, crash capture disabled for this session");
			false
		} else {
			match library.enable(options) {
				Ok(()) => {
					debug!(
						signal_handler = ?options.signal_handler,
						exception_interception = options.exception_interception,
						"Crash capture enabled"
					);
					true
				}
				Err(e) => {
					warn!(error = %e, "Failed to enable crash capture");
					false
				}
			}
		};

		Self {
			library,
			enabled,
			debugger_attached,
		}
	}

	pub fn is_enabled(&self) -> bool {
		self.enabled
	}

	/// Debugger state observed at initialization.
	pub fn is_debugger_attached(&self) -> bool {
		self.debugger_attached
	}

	pub fn has_pending_artifact(&self) -> bool {
		self.enabled && self.library.has_pending_report()
	}

	/// Read the pending report. The caller owns the analyzer guard.
	pub fn load_pending_artifact(
		&self,
		fallback_time: DateTime<Utc>,
	) -> Result<PendingCapture, CaptureError> {
		if !self.enabled {
			return Err(CaptureError::NoPendingReport);
		}
		let bytes = self.library.load_pending_report()?;
		Ok(PendingCapture::from_raw(bytes, fallback_time))
	}

	pub fn purge_pending_artifact(&mut self) {
		if let Err(e) = self.library.purge_pending_report() {
			warn!(error = %e, "Failed to purge pending crash report");
		}
	}

	/// Per-image build identifiers of a stored artifact. Never fails.
	pub fn extract_build_identifiers(artifact: &CrashArtifact) -> Vec<String> {
		report::extract_build_identifiers(&artifact.raw_bytes)
	}
}

/// Whether a debugger is tracing this process.
#[cfg(target_os = "linux")]
pub fn is_debugger_attached() -> bool {
	fs::read_to_string("/proc/self/status")
		.map(|status| tracer_pid(&status).is_some_and(|pid| pid != 0))
		.unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
pub fn is_debugger_attached() -> bool {
	false
}

#[cfg_attr(not(target_os = "linux"), allow(dead_code))]
fn tracer_pid(status: &str) -> Option<u32> {
	status
		.lines()
		.find_map(|line| line.strip_prefix("TracerPid:"))
		.and_then(|value| value.trim().parse().ok())
}

/// Capture library backed by a directory written by an out-of-process
/// handler. `<dir>/pending.crash` is the pending report.
#[derive(Debug, Clone)]
pub struct DirectoryCaptureLibrary {
	dir: PathBuf,
}

impl DirectoryCaptureLibrary {
	pub fn new(dir: impl Into<PathBuf>) -> Self {
		Self { dir: dir.into() }
	}

	pub fn dir(&self) -> &Path {
		&self.dir
	}

	pub fn pending_report_path(&self) -> PathBuf {
		self.dir.join(PENDING_REPORT_FILE)
	}
}

impl CaptureLibrary for DirectoryCaptureLibrary {
	fn enable(&mut self, options: &CaptureOptions) -> Result<(), CaptureError> {
		if options.signal_handler == SignalHandler::Mach && is_debugger_attached() {
			return Err(CaptureError::MachHandlerUnderDebugger);
		}
		fs::create_dir_all(&self.dir)
			.map_err(|e| CaptureError::Unavailable(format!("{}: {e}", self.dir.display())))
	}

	fn has_pending_report(&self) -> bool {
		self.pending_report_path().is_file()
	}

	fn load_pending_report(&self) -> Result<Vec<u8>, CaptureError> {
		match fs::read(self.pending_report_path()) {
			Ok(bytes) => Ok(bytes),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CaptureError::NoPendingReport),
			Err(e) => Err(e.into()),
		}
	}

	fn purge_pending_report(&mut self) -> Result<(), CaptureError> {
		match fs::remove_file(self.pending_report_path()) {
			Ok(()) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(e.into()),
		}
	}
}
