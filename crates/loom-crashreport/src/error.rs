// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error types for the crash report SDK.

use loom_crashreport_core::{ConfigurationError, StorageError};
use thiserror::Error;

use crate::capture::CaptureError;

/// Result type alias for crash report operations.
pub type Result<T> = std::result::Result<T, CrashReportError>;

/// Errors that can occur in the crash report SDK.
///
/// Only [`CrashReportError::Configuration`] ever escapes
/// [`CrashManager::start_manager`](crate::CrashManager::start_manager). The
/// other variants describe why a pending report was dropped or left with the
/// capture library, and are logged there.
#[derive(Debug, Error)]
pub enum CrashReportError {
	/// The host configuration is missing or invalid.
	#[error("configuration error: {0}")]
	Configuration(#[from] ConfigurationError),

	/// The configuration file could not be parsed.
	#[error("invalid configuration file: {0}")]
	ConfigFile(#[from] toml::de::Error),

	/// The report store failed.
	#[error("storage error: {0}")]
	Storage(#[from] StorageError),

	/// The capture library failed.
	#[error("capture error: {0}")]
	Capture(#[from] CaptureError),

	/// A previous attempt to read this crash report did not finish.
	#[error("analysis of the pending crash report previously crashed")]
	AnalysisReentry,
}

impl CrashReportError {
	/// Returns true for errors that must be surfaced to the host.
	pub fn is_fatal(&self) -> bool {
		matches!(
			self,
			CrashReportError::Configuration(_) | CrashReportError::ConfigFile(_)
		)
	}
}
