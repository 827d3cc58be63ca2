// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Crash identity used by the approval ledger.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable identity of a crash for consent purposes.
///
/// Two artifacts with the same identity share one consent decision.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CrashIdentity(String);

impl CrashIdentity {
	/// Compute the identity of a crash.
	///
	/// The identity is a SHA256 hash over:
	/// 1. The build identifiers of the binary images, in report order
	/// 2. The current application version
	pub fn compute(build_identifiers: &[String], app_version: &str) -> Self {
		let mut hasher = Sha256::new();

		for id in build_identifiers {
			hasher.update(id.as_bytes());
			hasher.update(b"|");
		}
		hasher.update(b"@");
		hasher.update(app_version.as_bytes());

		Self(hex::encode(hasher.finalize()))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for CrashIdentity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<String> for CrashIdentity {
	fn from(value: String) -> Self {
		Self(value)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn ids(values: &[&str]) -> Vec<String> {
		values.iter().map(|s| s.to_string()).collect()
	}

	#[test]
	fn identity_is_hex_sha256() {
		let identity = CrashIdentity::compute(&ids(&["abcd"]), "1.0");
		assert_eq!(identity.as_str().len(), 64);
		assert!(identity.as_str().chars().all(|c| c.is_ascii_hexdigit()));
	}

	#[test]
	fn version_changes_identity() {
		let build = ids(&["abcd", "ef01"]);
		assert_ne!(
			CrashIdentity::compute(&build, "1.0"),
			CrashIdentity::compute(&build, "1.1")
		);
	}

	#[test]
	fn identifier_boundaries_are_not_ambiguous() {
		assert_ne!(
			CrashIdentity::compute(&ids(&["ab", "cd"]), "1.0"),
			CrashIdentity::compute(&ids(&["abcd"]), "1.0")
		);
	}

	#[test]
	fn no_identifiers_still_keys_on_version() {
		assert_eq!(
			CrashIdentity::compute(&[], "1.0"),
			CrashIdentity::compute(&[], "1.0")
		);
		assert_ne!(
			CrashIdentity::compute(&[], "1.0"),
			CrashIdentity::compute(&[], "2.0")
		);
	}

	proptest! {
		#[test]
		fn identity_is_deterministic(
			build in proptest::collection::vec("[0-9a-f]{8,32}", 0..6),
			version in "[0-9]{1,3}\\.[0-9]{1,3}",
		) {
			prop_assert_eq!(
				CrashIdentity::compute(&build, &version),
				CrashIdentity::compute(&build, &version)
			);
		}
	}
}
