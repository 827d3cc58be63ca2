// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pending crash artifacts and their associated side data.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::{NoContext, Timestamp, Uuid};

use crate::report::{self, ReportHeader};
use crate::user::UserIdentity;

/// Number of characters of the report shown in a consent summary.
pub const SUMMARY_PREVIEW_CHARS: usize = 4096;

/// Process-unique artifact name.
///
/// Tokens are UUIDv7 values seeded with the crash timestamp, so the creation
/// time of an artifact survives process restarts and lexical order of tokens
/// matches chronological order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactToken(pub Uuid);

impl ArtifactToken {
	/// Creates a token for a crash that happened at `crashed_at`.
	pub fn for_crash_time(crashed_at: DateTime<Utc>) -> Self {
		let secs = crashed_at.timestamp().max(0) as u64;
		let nanos = crashed_at.timestamp_subsec_nanos();
		Self(Uuid::new_v7(Timestamp::from_unix(NoContext, secs, nanos)))
	}

	/// Returns the crash time embedded in the token, if it is a v7 token.
	pub fn created_at(&self) -> Option<DateTime<Utc>> {
		let (secs, nanos) = self.0.get_timestamp()?.to_unix();
		Utc.timestamp_opt(secs as i64, nanos).single()
	}
}

impl fmt::Display for ArtifactToken {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

impl FromStr for ArtifactToken {
	type Err = uuid::Error;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		Ok(Self(Uuid::parse_str(s)?))
	}
}

/// A crash report read from the capture library that has not yet been
/// written to the report store.
#[derive(Debug, Clone)]
pub struct PendingCapture {
	pub raw_bytes: Vec<u8>,
	pub build_identifiers: Vec<String>,
	pub app_version: Option<String>,
	pub process_name: Option<String>,
	pub crashed_at: DateTime<Utc>,
}

impl PendingCapture {
	/// Builds a capture from raw report bytes, using `fallback_time` when the
	/// report carries no parseable crash timestamp.
	pub fn from_raw(raw_bytes: Vec<u8>, fallback_time: DateTime<Utc>) -> Self {
		let header = report::parse_header(&raw_bytes);
		let build_identifiers = report::extract_build_identifiers(&raw_bytes);
		Self {
			crashed_at: header.crashed_at.unwrap_or(fallback_time),
			app_version: header.app_version,
			process_name: header.process_name,
			build_identifiers,
			raw_bytes,
		}
	}
}

/// One pending crash owned by the report store.
#[derive(Debug, Clone)]
pub struct CrashArtifact {
	pub token: ArtifactToken,
	pub file_path: PathBuf,
	pub raw_bytes: Vec<u8>,
	pub build_identifiers: Vec<String>,
	pub app_version: Option<String>,
	pub process_name: Option<String>,
	pub created_at: DateTime<Utc>,
}

impl CrashArtifact {
	/// Re-hydrates an artifact from its stored bytes.
	pub fn from_stored(
		token: ArtifactToken,
		file_path: PathBuf,
		raw_bytes: Vec<u8>,
		created_at: DateTime<Utc>,
	) -> Self {
		let ReportHeader {
			process_name,
			app_version,
			..
		} = report::parse_header(&raw_bytes);
		let build_identifiers = report::extract_build_identifiers(&raw_bytes);
		Self {
			token,
			file_path,
			raw_bytes,
			build_identifiers,
			app_version,
			process_name,
			created_at,
		}
	}

	/// File name of the artifact inside the crash directory.
	pub fn filename(&self) -> String {
		self.token.to_string()
	}

	/// App version reported by the crashed run, or `current` if unknown.
	pub fn app_version_or<'a>(&'a self, current: &'a str) -> &'a str {
		self.app_version.as_deref().unwrap_or(current)
	}

	/// Summary handed to the consent provider.
	pub fn summary(&self) -> ArtifactSummary {
		let text = String::from_utf8_lossy(&self.raw_bytes);
		ArtifactSummary {
			token: self.token,
			process_name: self.process_name.clone(),
			app_version: self.app_version.clone(),
			crashed_at: self.created_at,
			report_preview: text.chars().take(SUMMARY_PREVIEW_CHARS).collect(),
			company_name: None,
		}
	}
}

/// What the consent UI is shown about an artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactSummary {
	pub token: ArtifactToken,
	pub process_name: Option<String>,
	pub app_version: Option<String>,
	pub crashed_at: DateTime<Utc>,
	pub report_preview: String,
	/// Who receives the report, for the consent prompt's wording.
	pub company_name: Option<String>,
}

/// A host-supplied file sent along with a crash report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrashAttachment {
	pub filename: String,
	pub content_type: String,
	#[serde(with = "hex_bytes")]
	pub data: Vec<u8>,
}

impl CrashAttachment {
	pub fn new(
		filename: impl Into<String>,
		content_type: impl Into<String>,
		data: impl Into<Vec<u8>>,
	) -> Self {
		Self {
			filename: filename.into(),
			content_type: content_type.into(),
			data: data.into(),
		}
	}
}

/// Consent-time details persisted next to an artifact so that a retry on a
/// later launch carries them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactMeta {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user: Option<UserIdentity>,
}

mod hex_bytes {
	use serde::{Deserialize, Deserializer, Serializer};

	const HEX_PREFIX: &str = "hex:";

	pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&format!("{HEX_PREFIX}{}", hex::encode(data)))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
		let s = String::deserialize(deserializer)?;
		let encoded = s.strip_prefix(HEX_PREFIX).unwrap_or(&s);
		hex::decode(encoded).map_err(serde::de::Error::custom)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn token_preserves_crash_time_to_the_millisecond() {
		let crashed_at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
			+ chrono::Duration::milliseconds(250);
		let token = ArtifactToken::for_crash_time(crashed_at);
		assert_eq!(token.created_at(), Some(crashed_at));
	}

	#[test]
	fn token_order_follows_crash_time() {
		let earlier = ArtifactToken::for_crash_time(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap());
		let later = ArtifactToken::for_crash_time(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 1).unwrap());
		assert!(earlier < later);
		assert!(earlier.to_string() < later.to_string());
	}

	#[test]
	fn token_roundtrips_through_string() {
		let token = ArtifactToken::for_crash_time(Utc::now());
		let parsed: ArtifactToken = token.to_string().parse().unwrap();
		assert_eq!(parsed, token);
	}

	#[test]
	fn pending_capture_falls_back_to_supplied_time() {
		let now = Utc::now();
		let capture = PendingCapture::from_raw(b"garbage".to_vec(), now);
		assert_eq!(capture.crashed_at, now);
		assert!(capture.build_identifiers.is_empty());
		assert!(capture.app_version.is_none());
	}

	#[test]
	fn attachment_serializes_data_as_text() {
		let attachment = CrashAttachment::new("log.txt", "text/plain", b"hello".to_vec());
		let json = serde_json::to_string(&attachment).unwrap();
		assert!(json.contains("hex:68656c6c6f"));
		let back: CrashAttachment = serde_json::from_str(&json).unwrap();
		assert_eq!(back, attachment);
	}
}
