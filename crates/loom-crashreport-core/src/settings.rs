// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted crash reporter settings.
//!
//! The settings blob is a small JSON document. Loading never fails: a blob
//! that cannot be parsed yields [`Settings::default`], unknown fields are
//! ignored, missing or ill-typed fields fall back to their defaults, and keys
//! written by the older `BITCrashReportManager` schema are migrated.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::identity::CrashIdentity;

/// Current settings schema version.
pub const SETTINGS_SCHEMA_VERSION: u32 = 1;

/// Default threshold below which submission blocks the caller.
pub const DEFAULT_MAX_SYNC_INTERVAL: Duration = Duration::from_secs(5);

const LEGACY_ACTIVATED: &str = "HockeySDKCrashReportActivated";
const LEGACY_AUTO_SUBMIT: &str = "HockeySDKAutomaticallySendCrashReports";
const LEGACY_ANALYZER_STARTED: &str = "HockeySDKCrashReportAnalyzerStarted";
const LEGACY_APPROVED: &str = "HockeySDKApprovedCrashReports";

/// Process-wide crash reporter settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
	#[serde(deserialize_with = "lenient")]
	pub schema_version: u32,
	#[serde(deserialize_with = "lenient_true")]
	pub activated: bool,
	#[serde(deserialize_with = "lenient")]
	pub auto_submit: bool,
	#[serde(deserialize_with = "lenient_true")]
	pub ask_user_details: bool,
	/// Set right before the pending report is read and cleared right after a
	/// successful read. Found set at startup means the previous read crashed.
	#[serde(deserialize_with = "lenient")]
	pub analyzer_started: bool,
	#[serde(deserialize_with = "lenient_sync_interval")]
	pub max_sync_interval_secs: f64,
	#[serde(deserialize_with = "lenient", skip_serializing_if = "Option::is_none")]
	pub last_crash_filename: Option<String>,
	#[serde(deserialize_with = "lenient")]
	pub approved: ApprovedLedger,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			schema_version: SETTINGS_SCHEMA_VERSION,
			activated: true,
			auto_submit: false,
			ask_user_details: true,
			analyzer_started: false,
			max_sync_interval_secs: DEFAULT_MAX_SYNC_INTERVAL.as_secs_f64(),
			last_crash_filename: None,
			approved: ApprovedLedger::default(),
		}
	}
}

impl Settings {
	/// Parse a persisted blob. Never fails.
	pub fn from_slice(bytes: &[u8]) -> Settings {
		let value: Value = match serde_json::from_slice(bytes) {
			Ok(value) => value,
			Err(e) => {
				warn!(error = %e, "Settings blob is not valid JSON, using defaults");
				return Settings::default();
			}
		};

		let Value::Object(mut map) = value else {
			warn!("Settings blob is not an object, using defaults");
			return Settings::default();
		};

		migrate_legacy_keys(&mut map);

		match Settings::deserialize(Value::Object(map)) {
			Ok(settings) => settings.validated(),
			Err(e) => {
				warn!(error = %e, "Settings blob could not be decoded, using defaults");
				Settings::default()
			}
		}
	}

	/// Serialize for persistence.
	pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
		serde_json::to_vec_pretty(self)
	}

	/// The sync interval, or [`DEFAULT_MAX_SYNC_INTERVAL`] if the stored
	/// value is not a representable duration.
	pub fn max_sync_interval(&self) -> Duration {
		Duration::try_from_secs_f64(self.max_sync_interval_secs).unwrap_or(DEFAULT_MAX_SYNC_INTERVAL)
	}

	pub fn set_max_sync_interval(&mut self, interval: Duration) {
		self.max_sync_interval_secs = interval.as_secs_f64();
	}

	fn validated(mut self) -> Self {
		if self.schema_version > SETTINGS_SCHEMA_VERSION {
			debug!(
				found = self.schema_version,
				supported = SETTINGS_SCHEMA_VERSION,
				"Settings written by a newer schema, keeping known fields"
			);
		}
		self.schema_version = SETTINGS_SCHEMA_VERSION;
		if !valid_interval(self.max_sync_interval_secs) {
			self.max_sync_interval_secs = DEFAULT_MAX_SYNC_INTERVAL.as_secs_f64();
		}
		self
	}
}

/// Persisted consent decisions keyed by crash identity.
///
/// Entries are never expired: a user is asked at most once per identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovedLedger(BTreeMap<CrashIdentity, bool>);

impl ApprovedLedger {
	pub fn get(&self, identity: &CrashIdentity) -> Option<bool> {
		self.0.get(identity).copied()
	}

	pub fn record(&mut self, identity: CrashIdentity, approved: bool) {
		self.0.insert(identity, approved);
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}

/// Move keys of the pre-typed schema into their typed counterparts.
///
/// A typed key that is already present wins over its legacy counterpart.
fn migrate_legacy_keys(map: &mut Map<String, Value>) {
	let pairs = [
		(LEGACY_ACTIVATED, "activated"),
		(LEGACY_AUTO_SUBMIT, "auto_submit"),
		(LEGACY_ANALYZER_STARTED, "analyzer_started"),
	];

	for (legacy, typed) in pairs {
		let Some(raw) = map.remove(legacy) else {
			continue;
		};
		if map.contains_key(typed) {
			debug!(legacy, typed, "Both schemas present, keeping typed value");
			continue;
		}
		match legacy_bool(&raw) {
			Some(value) => {
				debug!(legacy, typed, value, "Migrated legacy settings key");
				map.insert(typed.to_string(), Value::Bool(value));
			}
			None => warn!(legacy, "Unrecognized legacy settings value, ignoring"),
		}
	}

	if let Some(approved) = map.remove(LEGACY_APPROVED) {
		let count = approved.as_object().map(|m| m.len()).unwrap_or(0);
		debug!(count, "Dropping legacy per-file approvals, they carry no crash identity");
	}
}

fn legacy_bool(value: &Value) -> Option<bool> {
	match value {
		Value::Bool(b) => Some(*b),
		Value::Number(n) => n.as_i64().map(|n| n != 0),
		Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
			"1" | "yes" | "true" => Some(true),
			"0" | "no" | "false" => Some(false),
			_ => None,
		},
		_ => None,
	}
}

fn valid_interval(secs: f64) -> bool {
	Duration::try_from_secs_f64(secs).is_ok()
}

fn lenient<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
	D: Deserializer<'de>,
	T: DeserializeOwned + Default,
{
	let value = Value::deserialize(deserializer)?;
	Ok(T::deserialize(value).unwrap_or_default())
}

fn lenient_true<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Value::deserialize(deserializer)?;
	Ok(value.as_bool().unwrap_or(true))
}

fn lenient_sync_interval<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
	D: Deserializer<'de>,
{
	let value = Value::deserialize(deserializer)?;
	Ok(value
		.as_f64()
		.filter(|secs| valid_interval(*secs))
		.unwrap_or(DEFAULT_MAX_SYNC_INTERVAL.as_secs_f64()))
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn identity(s: &str) -> CrashIdentity {
		CrashIdentity::from(s.to_string())
	}

	#[test]
	fn defaults() {
		let settings = Settings::default();
		assert!(settings.activated);
		assert!(!settings.auto_submit);
		assert!(settings.ask_user_details);
		assert!(!settings.analyzer_started);
		assert_eq!(settings.max_sync_interval(), Duration::from_secs(5));
		assert!(settings.approved.is_empty());
	}

	#[test]
	fn roundtrip_preserves_ledger() {
		let mut settings = Settings::default();
		settings.auto_submit = true;
		settings.last_crash_filename = Some("abc".to_string());
		settings.approved.record(identity("id-1"), true);
		settings.approved.record(identity("id-2"), false);

		let restored = Settings::from_slice(&settings.to_vec().unwrap());
		assert_eq!(restored, settings);
	}

	#[test]
	fn missing_and_unknown_fields_are_tolerated() {
		let blob = br#"{"auto_submit": true, "future_field": {"x": 1}}"#;
		let settings = Settings::from_slice(blob);
		assert!(settings.auto_submit);
		assert!(settings.activated);
		assert_eq!(settings.max_sync_interval(), DEFAULT_MAX_SYNC_INTERVAL);
	}

	#[test]
	fn ill_typed_field_falls_back_without_losing_the_rest() {
		let blob = br#"{"auto_submit": "sometimes", "approved": {"id-1": true}}"#;
		let settings = Settings::from_slice(blob);
		assert!(!settings.auto_submit);
		assert_eq!(settings.approved.get(&identity("id-1")), Some(true));
	}

	#[test]
	fn negative_interval_is_reset() {
		let settings = Settings::from_slice(br#"{"max_sync_interval_secs": -3.0}"#);
		assert_eq!(settings.max_sync_interval(), DEFAULT_MAX_SYNC_INTERVAL);
	}

	#[test]
	fn unrepresentable_interval_is_reset() {
		let settings = Settings::from_slice(br#"{"auto_submit": true, "max_sync_interval_secs": 1e20}"#);
		assert!(settings.auto_submit);
		assert_eq!(settings.max_sync_interval(), DEFAULT_MAX_SYNC_INTERVAL);

		let mut settings = Settings::default();
		settings.max_sync_interval_secs = f64::MAX;
		assert_eq!(settings.max_sync_interval(), DEFAULT_MAX_SYNC_INTERVAL);
	}

	#[test]
	fn legacy_keys_are_migrated() {
		let blob = br#"{
			"HockeySDKCrashReportActivated": false,
			"HockeySDKAutomaticallySendCrashReports": 1,
			"HockeySDKCrashReportAnalyzerStarted": "YES",
			"HockeySDKApprovedCrashReports": {"crash-1": true}
		}"#;
		let settings = Settings::from_slice(blob);
		assert!(!settings.activated);
		assert!(settings.auto_submit);
		assert!(settings.analyzer_started);
		assert!(settings.approved.is_empty());
		assert_eq!(settings.schema_version, SETTINGS_SCHEMA_VERSION);
	}

	#[test]
	fn typed_keys_win_over_legacy_keys() {
		let blob = br#"{
			"HockeySDKAutomaticallySendCrashReports": true,
			"auto_submit": false
		}"#;
		assert!(!Settings::from_slice(blob).auto_submit);
	}

	#[test]
	fn non_object_blob_yields_defaults() {
		assert_eq!(Settings::from_slice(b"[1, 2, 3]"), Settings::default());
		assert_eq!(Settings::from_slice(b"null"), Settings::default());
	}

	proptest! {
		#[test]
		fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..512)) {
			let settings = Settings::from_slice(&bytes);
			prop_assert_eq!(settings.schema_version, SETTINGS_SCHEMA_VERSION);
			prop_assert!(valid_interval(settings.max_sync_interval_secs));
		}

		#[test]
		fn huge_intervals_fall_back_to_default(secs in 2.0e19f64..f64::MAX) {
			let blob = format!(r#"{{"auto_submit": true, "max_sync_interval_secs": {secs:e}}}"#);
			let settings = Settings::from_slice(blob.as_bytes());
			prop_assert!(settings.auto_submit);
			prop_assert_eq!(settings.max_sync_interval(), DEFAULT_MAX_SYNC_INTERVAL);
		}

		#[test]
		fn interval_lookup_never_panics(secs in any::<f64>()) {
			let mut settings = Settings::default();
			settings.max_sync_interval_secs = secs;
			let interval = settings.max_sync_interval();
			if !valid_interval(secs) {
				prop_assert_eq!(interval, DEFAULT_MAX_SYNC_INTERVAL);
			}
		}

		#[test]
		fn unparseable_text_yields_defaults(text in "[^{\\[\"0-9tfn -]{1,64}") {
			prop_assert_eq!(Settings::from_slice(text.as_bytes()), Settings::default());
		}
	}
}
