// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Host configuration for the crash manager.
//!
//! ```toml
//! app_identifier = "3f1c0a6e9b2d4e7f"
//! app_name = "Loom"
//! app_version = "1.4.0"
//! auto_submit = false
//! max_sync_interval_secs = 5.0
//!
//! [capture]
//! signal_handler = "bsd"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use loom_crashreport_core::ConfigurationError;
use serde::Deserialize;
use url::Url;

use crate::capture::CaptureOptions;
use crate::error::Result;
use crate::payload::AppInfo;
use crate::scheduler::DEFAULT_NETWORK_TIMEOUT;
use crate::transport::{crash_endpoint, SDK_VERSION};

pub const DEFAULT_SERVER_URL: &str = "https://sdk.hockeyapp.net/";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
	pub app_identifier: String,
	pub company_name: Option<String>,
	pub app_name: Option<String>,
	pub bundle_identifier: Option<String>,
	pub app_version: Option<String>,
	pub server_url: String,
	/// Overrides the persisted setting when set.
	pub auto_submit: Option<bool>,
	pub ask_user_details: Option<bool>,
	pub max_sync_interval_secs: Option<f64>,
	pub network_timeout_secs: f64,
	pub data_dir: Option<PathBuf>,
	pub capture: CaptureOptions,
	pub user_id: Option<String>,
	pub user_name: Option<String>,
	pub user_email: Option<String>,
}

impl Default for ManagerConfig {
	fn default() -> Self {
		Self {
			app_identifier: String::new(),
			company_name: None,
			app_name: None,
			bundle_identifier: None,
			app_version: None,
			server_url: DEFAULT_SERVER_URL.to_string(),
			auto_submit: None,
			ask_user_details: None,
			max_sync_interval_secs: None,
			network_timeout_secs: DEFAULT_NETWORK_TIMEOUT.as_secs_f64(),
			data_dir: None,
			capture: CaptureOptions::default(),
			user_id: None,
			user_name: None,
			user_email: None,
		}
	}
}

impl ManagerConfig {
	pub fn new(app_identifier: impl Into<String>) -> Self {
		Self {
			app_identifier: app_identifier.into(),
			..Self::default()
		}
	}

	pub fn from_toml_str(s: &str) -> Result<Self> {
		Ok(toml::from_str(s)?)
	}

	/// Read a TOML configuration file.
	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let text = std::fs::read_to_string(path).map_err(|e| {
			ConfigurationError::Unreadable(format!("{}: {e}", path.display()))
		})?;
		Self::from_toml_str(&text)
	}

	pub fn validate(&self) -> std::result::Result<(), ConfigurationError> {
		let id = self.app_identifier.trim();
		if id.is_empty() {
			return Err(ConfigurationError::MissingAppIdentifier);
		}
		if !id
			.chars()
			.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
		{
			return Err(ConfigurationError::InvalidAppIdentifier(id.to_string()));
		}

		let url = self.server_url.trim();
		let parsed =
			Url::parse(url).map_err(|e| ConfigurationError::InvalidServerUrl(format!("{url}: {e}")))?;
		if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().map_or(true, str::is_empty) {
			return Err(ConfigurationError::InvalidServerUrl(url.to_string()));
		}
		crash_endpoint(url, id).map_err(|e| ConfigurationError::InvalidServerUrl(format!("{url}: {e}")))?;

		if let Some(secs) = self.max_sync_interval_secs {
			if Duration::try_from_secs_f64(secs).is_err() {
				return Err(ConfigurationError::InvalidSyncInterval(secs.to_string()));
			}
		}
		if !Duration::try_from_secs_f64(self.network_timeout_secs).is_ok_and(|t| !t.is_zero()) {
			return Err(ConfigurationError::InvalidSyncInterval(format!(
				"network timeout {}",
				self.network_timeout_secs
			)));
		}
		Ok(())
	}

	/// The host's sync interval, `None` if unset or not a valid duration.
	pub fn max_sync_interval(&self) -> Option<Duration> {
		self
			.max_sync_interval_secs
			.and_then(|secs| Duration::try_from_secs_f64(secs).ok())
	}

	pub fn network_timeout(&self) -> Duration {
		Duration::try_from_secs_f64(self.network_timeout_secs)
			.ok()
			.filter(|timeout| !timeout.is_zero())
			.unwrap_or(DEFAULT_NETWORK_TIMEOUT)
	}

	/// Current app version, `"unknown"` if unset.
	pub fn current_app_version(&self) -> &str {
		self.app_version.as_deref().unwrap_or("unknown")
	}

	/// Directory holding settings and pending artifacts.
	///
	/// Defaults to `<data dir>/loom/crashreport/<app identifier>`, falling
	/// back to the system temp directory when no data dir is known.
	pub fn resolved_data_dir(&self) -> PathBuf {
		if let Some(dir) = &self.data_dir {
			return dir.clone();
		}
		dirs::data_dir()
			.unwrap_or_else(std::env::temp_dir)
			.join("loom")
			.join("crashreport")
			.join(self.app_identifier.trim())
	}

	pub fn app_info(&self) -> AppInfo {
		AppInfo {
			app_name: self
				.app_name
				.clone()
				.unwrap_or_else(|| self.app_identifier.clone()),
			bundle_identifier: self
				.bundle_identifier
				.clone()
				.unwrap_or_else(|| self.app_identifier.clone()),
			app_version: self.current_app_version().to_string(),
			platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
			sdk_version: SDK_VERSION.to_string(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::capture::SignalHandler;
	use crate::error::CrashReportError;
	use proptest::prelude::*;

	#[test]
	fn defaults() {
		let config = ManagerConfig::default();
		assert_eq!(config.server_url, DEFAULT_SERVER_URL);
		assert_eq!(config.network_timeout(), Duration::from_secs(15));
		assert_eq!(config.max_sync_interval(), None);
		assert_eq!(config.current_app_version(), "unknown");
	}

	#[test]
	fn parses_toml() {
		let config = ManagerConfig::from_toml_str(
			r#"
			app_identifier = "abc_123"
			app_version = "1.4.0"
			auto_submit = true
			max_sync_interval_secs = 2.5
			data_dir = "/var/lib/loom"

			[capture]
			signal_handler = "mach"
			"#,
		)
		.unwrap();

		assert_eq!(config.app_identifier, "abc_123");
		assert_eq!(config.auto_submit, Some(true));
		assert_eq!(config.max_sync_interval(), Some(Duration::from_millis(2500)));
		assert_eq!(config.resolved_data_dir(), PathBuf::from("/var/lib/loom"));
		assert_eq!(config.capture.signal_handler, SignalHandler::Mach);
		assert!(config.validate().is_ok());
	}

	#[test]
	fn malformed_toml_is_a_config_file_error() {
		let err = ManagerConfig::from_toml_str("app_identifier = [").unwrap_err();
		assert!(matches!(err, CrashReportError::ConfigFile(_)));
		assert!(err.is_fatal());
	}

	#[test]
	fn load_reads_file() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("crashreport.toml");
		std::fs::write(&path, "app_identifier = \"abc\"\n").unwrap();
		assert_eq!(ManagerConfig::load(&path).unwrap().app_identifier, "abc");
		assert!(ManagerConfig::load(dir.path().join("missing.toml")).is_err());
	}

	#[test]
	fn validation() {
		assert_eq!(
			ManagerConfig::default().validate(),
			Err(ConfigurationError::MissingAppIdentifier)
		);
		assert!(matches!(
			ManagerConfig::new("bad id!").validate(),
			Err(ConfigurationError::InvalidAppIdentifier(_))
		));

		let mut config = ManagerConfig::new("abc");
		config.server_url = "ftp://example.com".to_string();
		assert!(matches!(config.validate(), Err(ConfigurationError::InvalidServerUrl(_))));
		config.server_url = "https://".to_string();
		assert!(matches!(config.validate(), Err(ConfigurationError::InvalidServerUrl(_))));
		config.server_url = "https://host:notaport/".to_string();
		assert!(matches!(config.validate(), Err(ConfigurationError::InvalidServerUrl(_))));
		config.server_url = "https://crashes.example.com:8443/hockey".to_string();
		assert!(config.validate().is_ok());

		let mut config = ManagerConfig::new("abc");
		config.max_sync_interval_secs = Some(f64::NAN);
		assert!(matches!(config.validate(), Err(ConfigurationError::InvalidSyncInterval(_))));
		config.max_sync_interval_secs = Some(-1.0);
		assert!(matches!(config.validate(), Err(ConfigurationError::InvalidSyncInterval(_))));
		config.max_sync_interval_secs = Some(0.0);
		assert!(config.validate().is_ok());
		config.max_sync_interval_secs = Some(1e20);
		assert!(matches!(config.validate(), Err(ConfigurationError::InvalidSyncInterval(_))));
		assert_eq!(config.max_sync_interval(), None);

		let mut config = ManagerConfig::new("abc");
		config.network_timeout_secs = 1e300;
		assert!(matches!(config.validate(), Err(ConfigurationError::InvalidSyncInterval(_))));
		assert_eq!(config.network_timeout(), DEFAULT_NETWORK_TIMEOUT);
	}

	proptest! {
		#[test]
		fn interval_accessors_never_panic(sync in any::<f64>(), timeout in any::<f64>()) {
			let mut config = ManagerConfig::new("abc");
			config.max_sync_interval_secs = Some(sync);
			config.network_timeout_secs = timeout;
			let _ = config.validate();
			if let Some(interval) = config.max_sync_interval() {
				prop_assert_eq!(interval.as_secs_f64().is_finite(), true);
			}
			prop_assert!(!config.network_timeout().is_zero());
		}
	}

	#[test]
	fn default_data_dir_is_per_app() {
		let dir = ManagerConfig::new("abc").resolved_data_dir();
		assert!(dir.ends_with("loom/crashreport/abc"));
	}
}
