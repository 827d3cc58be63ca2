// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Interface to the host's consent UI.

use async_trait::async_trait;
use loom_crashreport_core::{ArtifactSummary, UserIdentity};

/// The user's answer to "send this crash report?".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentDecision {
	Approve,
	/// Approve and send future reports without asking.
	ApproveAlways,
	Decline,
	/// Keep the report and ask again on the next launch.
	DeferToNextLaunch,
}

impl ConsentDecision {
	pub fn is_approval(self) -> bool {
		matches!(self, ConsentDecision::Approve | ConsentDecision::ApproveAlways)
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsentResponse {
	pub decision: ConsentDecision,
	/// Free text the user typed about what they were doing.
	pub description: Option<String>,
}

impl ConsentResponse {
	pub fn new(decision: ConsentDecision) -> Self {
		Self {
			decision,
			description: None,
		}
	}

	pub fn with_description(mut self, description: impl Into<String>) -> Self {
		self.description = Some(description.into());
		self
	}
}

impl From<ConsentDecision> for ConsentResponse {
	fn from(decision: ConsentDecision) -> Self {
		Self::new(decision)
	}
}

/// Presents consent prompts. Implemented by the host's UI layer.
///
/// Calls may suspend for as long as the user takes to answer.
#[async_trait]
pub trait ConsentProvider: Send + Sync {
	async fn request_consent(&self, summary: &ArtifactSummary) -> ConsentResponse;

	/// Ask for the reporter's name and contact address. Only called after an
	/// approval when user details are requested.
	async fn request_user_identity(&self) -> Option<UserIdentity> {
		None
	}
}
