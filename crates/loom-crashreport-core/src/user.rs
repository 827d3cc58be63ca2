// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! User identity attached to crash submissions.

use serde::{Deserialize, Serialize};

/// Name and contact address of the person reporting a crash.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub email: Option<String>,
}

impl UserIdentity {
	pub fn new(name: Option<String>, email: Option<String>) -> Self {
		Self {
			name: name.filter(|s| !s.trim().is_empty()),
			email: email.filter(|s| !s.trim().is_empty()),
		}
	}

	pub fn is_empty(&self) -> bool {
		self.name.is_none() && self.email.is_none()
	}

	/// Fills unset fields from `other`.
	pub fn or(self, other: &UserIdentity) -> UserIdentity {
		UserIdentity {
			name: self.name.or_else(|| other.name.clone()),
			email: self.email.or_else(|| other.email.clone()),
		}
	}
}
