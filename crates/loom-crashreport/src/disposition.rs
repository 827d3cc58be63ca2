// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-artifact decision making.
//!
//! ```text
//! Discovered -> Classifying -> AutoSubmit ------> Submitting
//!                   |      \-> AwaitingConsent -/   |
//!                   |              |                |
//!                   \-> Discarded <-/-> Deferred    |
//! ```
//!
//! The engine also owns the analyzer guard around reading a new report from
//! the capture library: the persisted `analyzer_started` flag is set before
//! the read and cleared after it, so a read that crashes the process is not
//! retried on the next launch.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use loom_crashreport_core::{
	ArtifactMeta, CrashArtifact, CrashAttachment, CrashIdentity, PendingCapture, Settings,
};
use tracing::{debug, info, warn};

use crate::capture::CaptureAdapter;
use crate::consent::{ConsentDecision, ConsentProvider};
use crate::error::CrashReportError;
use crate::store::{attachment_filename, ReportStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispositionState {
	Discovered,
	Classifying,
	AwaitingConsent,
	AutoSubmit,
	Submitting,
	Discarded,
	Deferred,
}

impl fmt::Display for DispositionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			DispositionState::Discovered => "discovered",
			DispositionState::Classifying => "classifying",
			DispositionState::AwaitingConsent => "awaiting_consent",
			DispositionState::AutoSubmit => "auto_submit",
			DispositionState::Submitting => "submitting",
			DispositionState::Discarded => "discarded",
			DispositionState::Deferred => "deferred",
		};
		f.write_str(s)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
	Deactivated,
	/// The user declined this identity earlier.
	PreviouslyDeclined,
	Declined,
}

/// Result of classifying an artifact against the settings and ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
	Discard(DiscardReason),
	AutoSubmit,
	AskUser,
}

/// Final decision for one artifact in this session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
	Submit {
		identity: CrashIdentity,
		meta: ArtifactMeta,
	},
	Discard(DiscardReason),
	/// Leave the artifact pending. `suppressed` is set when its app version
	/// was rejected by the server earlier in this session.
	Defer { suppressed: bool },
}

/// What happened to the capture library's pending report.
///
/// Failures are reported as `Err` from
/// [`DispositionEngine::ingest_pending`]: [`CrashReportError::AnalysisReentry`]
/// when the report was dropped unread, [`CrashReportError::Capture`] or
/// [`CrashReportError::Storage`] when it stays with the capture library.
#[derive(Debug)]
pub enum IngestOutcome {
	NothingPending,
	Ingested(CrashArtifact),
	Discarded(DiscardReason),
}

#[derive(Debug)]
pub struct DispositionEngine {
	current_app_version: String,
	company_name: Option<String>,
	rejected_versions: HashSet<String>,
}

impl DispositionEngine {
	pub fn new(current_app_version: impl Into<String>) -> Self {
		Self {
			current_app_version: current_app_version.into(),
			company_name: None,
			rejected_versions: HashSet::new(),
		}
	}

	/// Company named in consent prompts.
	pub fn with_company_name(mut self, company_name: Option<String>) -> Self {
		self.company_name = company_name;
		self
	}

	pub fn current_app_version(&self) -> &str {
		&self.current_app_version
	}

	pub fn identity_for(&self, artifact: &CrashArtifact) -> CrashIdentity {
		CrashIdentity::compute(&artifact.build_identifiers, &self.current_app_version)
	}

	/// Stop submitting artifacts of `version` for the rest of the session.
	pub fn mark_version_rejected(&mut self, version: impl Into<String>) {
		let version = version.into();
		if self.rejected_versions.insert(version.clone()) {
			warn!(version = %version, "Server rejected app version, suppressing its reports");
		}
	}

	pub fn is_version_rejected(&self, version: &str) -> bool {
		self.rejected_versions.contains(version)
	}

	/// Move the capture library's pending report into the store.
	pub fn ingest_pending(
		&self,
		adapter: &mut CaptureAdapter,
		store: &mut ReportStore,
		now: DateTime<Utc>,
		attachment_for_crash: impl FnOnce(&CrashArtifact) -> Option<CrashAttachment>,
	) -> Result<IngestOutcome, CrashReportError> {
		if !adapter.has_pending_artifact() {
			if store.settings().analyzer_started {
				info!("Clearing analyzer guard left without a pending report");
				store.update_settings(|s| s.analyzer_started = false);
			}
			return Ok(IngestOutcome::NothingPending);
		}

		if !store.settings().activated {
			info!("Crash reporting deactivated, dropping pending report");
			adapter.purge_pending_artifact();
			return Ok(IngestOutcome::Discarded(DiscardReason::Deactivated));
		}

		if store.settings().analyzer_started {
			transition_untracked(DispositionState::Discovered, DispositionState::Discarded);
			adapter.purge_pending_artifact();
			store.update_settings(|s| s.analyzer_started = false);
			return Err(CrashReportError::AnalysisReentry);
		}

		if let Err(e) = store.try_update_settings(|s| s.analyzer_started = true) {
			store.update_settings(|s| s.analyzer_started = false);
			return Err(e.into());
		}

		// A failed read leaves the guard set: the next launch drops this report.
		let capture: PendingCapture = adapter.load_pending_artifact(now)?;

		let artifact = match store.write_artifact(&capture) {
			Ok(artifact) => artifact,
			Err(e) => {
				store.update_settings(|s| s.analyzer_started = false);
				return Err(e.into());
			}
		};

		if let Some(attachment) = attachment_for_crash(&artifact) {
			persist_attachment(store, &artifact, &attachment);
		}

		adapter.purge_pending_artifact();
		let filename = artifact.filename();
		store.update_settings(|s| {
			s.analyzer_started = false;
			s.last_crash_filename = Some(filename);
		});
		info!(token = %artifact.token, build_ids = artifact.build_identifiers.len(), "Crash report ingested");
		Ok(IngestOutcome::Ingested(artifact))
	}

	/// Classify without side effects. The ledger takes precedence over the
	/// auto-submit flag.
	pub fn classify(&self, artifact: &CrashArtifact, settings: &Settings) -> Classification {
		if !settings.activated {
			return Classification::Discard(DiscardReason::Deactivated);
		}
		match settings.approved.get(&self.identity_for(artifact)) {
			Some(true) => Classification::AutoSubmit,
			Some(false) => Classification::Discard(DiscardReason::PreviouslyDeclined),
			None if settings.auto_submit => Classification::AutoSubmit,
			None => Classification::AskUser,
		}
	}

	/// Run the state machine for one artifact, asking for consent if needed.
	/// Consent decisions are recorded in the ledger before returning.
	pub async fn decide(
		&self,
		artifact: &CrashArtifact,
		store: &mut ReportStore,
		consent: Option<&dyn ConsentProvider>,
	) -> Disposition {
		let token = artifact.token;
		transition(artifact, DispositionState::Discovered, DispositionState::Classifying);

		let identity = self.identity_for(artifact);
		let classification = self.classify(artifact, store.settings());
		let version = artifact.app_version_or(&self.current_app_version);

		if let Classification::Discard(reason) = classification {
			transition(artifact, DispositionState::Classifying, DispositionState::Discarded);
			info!(token = %token, reason = ?reason, "Discarding crash report");
			return Disposition::Discard(reason);
		}

		if self.is_version_rejected(version) {
			transition(artifact, DispositionState::Classifying, DispositionState::Deferred);
			debug!(token = %token, version, "App version rejected this session, deferring");
			return Disposition::Defer { suppressed: true };
		}

		let meta = match classification {
			Classification::AutoSubmit => {
				transition(artifact, DispositionState::Classifying, DispositionState::AutoSubmit);
				store.load_meta(&token)
			}
			_ => {
				transition(artifact, DispositionState::Classifying, DispositionState::AwaitingConsent);
				let Some(provider) = consent else {
					transition(artifact, DispositionState::AwaitingConsent, DispositionState::Deferred);
					debug!(token = %token, "No consent provider configured, deferring");
					return Disposition::Defer { suppressed: false };
				};

				let mut summary = artifact.summary();
				summary.company_name = self.company_name.clone();
				let response = provider.request_consent(&summary).await;
				debug!(
					token = %token,
					decision = ?response.decision,
					approved = response.decision.is_approval(),
					"Consent received"
				);
				match response.decision {
					ConsentDecision::Decline => {
						store.record_approval(identity, false);
						transition(artifact, DispositionState::AwaitingConsent, DispositionState::Discarded);
						info!(token = %token, "User declined crash report");
						return Disposition::Discard(DiscardReason::Declined);
					}
					ConsentDecision::DeferToNextLaunch => {
						transition(artifact, DispositionState::AwaitingConsent, DispositionState::Deferred);
						return Disposition::Defer { suppressed: false };
					}
					ConsentDecision::Approve | ConsentDecision::ApproveAlways => {
						store.record_approval(identity.clone(), true);
						if response.decision == ConsentDecision::ApproveAlways {
							store.update_settings(|s| s.auto_submit = true);
						}

						let user = if store.settings().ask_user_details {
							provider.request_user_identity().await.filter(|u| !u.is_empty())
						} else {
							None
						};
						let meta = ArtifactMeta {
							description: response.description.filter(|d| !d.trim().is_empty()),
							user,
						};
						if meta != ArtifactMeta::default() {
							store.persist_meta(&token, &meta);
						}
						transition(artifact, DispositionState::AwaitingConsent, DispositionState::AutoSubmit);
						meta
					}
				}
			}
		};

		transition(artifact, DispositionState::AutoSubmit, DispositionState::Submitting);
		Disposition::Submit { identity, meta }
	}
}

fn persist_attachment(store: &ReportStore, artifact: &CrashArtifact, attachment: &CrashAttachment) {
	match serde_json::to_vec(attachment) {
		Ok(bytes) => {
			if store.persist_attachment(&bytes, &attachment_filename(&artifact.token)) {
				debug!(token = %artifact.token, filename = %attachment.filename, "Attachment persisted");
			}
		}
		Err(e) => warn!(token = %artifact.token, error = %e, "Failed to encode attachment"),
	}
}

fn transition(artifact: &CrashArtifact, from: DispositionState, to: DispositionState) {
	debug!(token = %artifact.token, from = %from, to = %to, "Disposition transition");
}

fn transition_untracked(from: DispositionState, to: DispositionState) {
	debug!(from = %from, to = %to, "Disposition transition");
}
