// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Error taxonomy for the crash report lifecycle.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Invalid or missing host configuration.
///
/// This is the only error class that is surfaced to the caller of
/// `start_manager`; everything else degrades to a discard/defer decision.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
	#[error("app identifier is required")]
	MissingAppIdentifier,

	#[error("invalid app identifier: {0}")]
	InvalidAppIdentifier(String),

	#[error("invalid server URL: {0}")]
	InvalidServerUrl(String),

	#[error("invalid sync interval: {0}")]
	InvalidSyncInterval(String),

	#[error("host delegate is required")]
	MissingDelegate,

	#[error("configuration file unreadable: {0}")]
	Unreadable(String),
}

/// Failures of the on-disk report store.
#[derive(Debug, Error)]
pub enum StorageError {
	#[error("IO error at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("persistence is disabled for this session")]
	PersistenceDisabled,
}

impl StorageError {
	pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
		StorageError::Io {
			path: path.into(),
			source,
		}
	}
}

/// Failures of a single submission attempt.
///
/// All variants are non-fatal: the artifact stays on disk and is retried on
/// the next launch.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
	#[error("app version rejected by server (status {status})")]
	AppVersionRejected { status: u16 },

	#[error("server returned an empty response (status {status})")]
	ReceivedEmptyResponse { status: u16 },

	#[error("server error (status {status}): {body}")]
	ErrorWithStatusCode { status: u16, body: String },

	#[error("connection failed: {0}")]
	Connectivity(String),

	#[error("request timed out after {0:?}")]
	Timeout(Duration),

	#[error("failed to build payload: {0}")]
	Payload(String),
}

impl TransportError {
	/// Returns true if this failure must suppress further auto-submission of
	/// artifacts sharing the same app version for the rest of the session.
	pub fn suppresses_app_version(&self) -> bool {
		matches!(self, TransportError::AppVersionRejected { .. })
	}
}
