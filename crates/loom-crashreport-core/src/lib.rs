// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core types for the Loom desktop crash report lifecycle.
//!
//! This crate holds the I/O-free pieces shared by the reporting SDK
//! (`loom-crashreport`) and anything that needs to read its on-disk state:
//!
//! - Crash artifacts, their tokens, attachments and consent metadata
//! - Header and binary image parsing of textual crash reports
//! - The crash identity used to remember consent decisions
//! - The versioned, migration-aware settings blob and approval ledger
//! - Interpretation of the collection endpoint's responses
//! - The error taxonomy (configuration, storage, transport)

pub mod artifact;
pub mod error;
pub mod identity;
pub mod report;
pub mod settings;
pub mod submission;
pub mod user;

pub use artifact::{
	ArtifactMeta, ArtifactSummary, ArtifactToken, CrashArtifact, CrashAttachment, PendingCapture,
};
pub use error::{ConfigurationError, StorageError, TransportError};
pub use identity::CrashIdentity;
pub use report::{extract_build_identifiers, parse_header, ReportHeader};
pub use settings::{ApprovedLedger, Settings, DEFAULT_MAX_SYNC_INTERVAL, SETTINGS_SCHEMA_VERSION};
pub use submission::{
	interpret_response, ServerDisposition, SubmissionResult, APP_VERSION_REJECTED_STATUS,
};
pub use user::UserIdentity;
