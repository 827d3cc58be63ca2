// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Crash report lifecycle engine for Loom desktop applications.
//!
//! On startup the [`CrashManager`] picks up the report a capture library wrote
//! when the previous run died, decides whether to send it (persisted policy,
//! remembered consent, or a fresh prompt through a [`ConsentProvider`]) and
//! submits it to the collection server. Reports of crashes that happened
//! moments ago are sent before `start_manager` returns; older ones are sent
//! in the background. Failed submissions are retried on the next launch
//! only.
//!
//! # Example
//!
//! ```ignore
//! use loom_crashreport::{CrashManager, HostDelegate};
//!
//! let mut manager = CrashManager::builder()
//!     .app_identifier("3f1c0a6e9b2d4e7f")
//!     .app_version("1.4.0")
//!     .delegate(HostDelegate::new(|| println!("show main window")))
//!     .build()?;
//!
//! manager.start_manager().await?;
//! ```

pub mod capture;
pub mod config;
pub mod consent;
pub mod delegate;
pub mod disposition;
pub mod error;
pub mod manager;
pub mod payload;
pub mod scheduler;
pub mod secure_store;
pub mod store;
pub mod transport;

pub use capture::{
	CaptureAdapter, CaptureError, CaptureLibrary, CaptureOptions, DirectoryCaptureLibrary,
	SignalHandler,
};
pub use config::ManagerConfig;
pub use consent::{ConsentDecision, ConsentProvider, ConsentResponse};
pub use delegate::HostDelegate;
pub use disposition::{
	Classification, DiscardReason, Disposition, DispositionEngine, DispositionState, IngestOutcome,
};
pub use error::{CrashReportError, Result};
pub use manager::{CrashManager, CrashManagerBuilder, StartSummary};
pub use payload::{AppInfo, CrashPayload, SubmissionMetadata};
pub use scheduler::{choose_mode, SubmissionMode, SubmissionOutcome, SubmissionScheduler};
#[cfg(feature = "keyring")]
pub use secure_store::KeyringSecureStore;
pub use secure_store::{MemorySecureStore, SecureStore, SecureStoreError};
pub use store::ReportStore;
pub use transport::{CrashTransport, HttpTransport};

pub use loom_crashreport_core::{
	ArtifactMeta, ArtifactSummary, ArtifactToken, ConfigurationError, CrashArtifact,
	CrashAttachment, CrashIdentity, PendingCapture, ServerDisposition, Settings, StorageError,
	SubmissionResult, TransportError, UserIdentity,
};
