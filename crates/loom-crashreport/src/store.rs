// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! File-system backed inventory of pending crash artifacts and settings.
//!
//! Layout under the store root:
//!
//! ```text
//! settings.json
//! crashes/<token>.crash   raw report bytes
//! crashes/<token>.data    host attachment (JSON)
//! crashes/<token>.meta    consent-time details (JSON)
//! ```
//!
//! Every operation is best-effort. Failures are logged and reported as
//! `false`/`None`/`Err` to the caller, never as a panic, and an unwritable root
//! turns the store into a non-persistent one for the rest of the session.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use loom_crashreport_core::{
	ArtifactMeta, ArtifactToken, CrashArtifact, CrashIdentity, PendingCapture, Settings,
	StorageError,
};
use tracing::{debug, warn};

pub const SETTINGS_FILE: &str = "settings.json";
pub const CRASHES_DIR: &str = "crashes";

const ARTIFACT_EXT: &str = "crash";
const ATTACHMENT_EXT: &str = "data";
const META_EXT: &str = "meta";

/// Name of the attachment file belonging to an artifact.
pub fn attachment_filename(token: &ArtifactToken) -> String {
	format!("{token}.{ATTACHMENT_EXT}")
}

/// Owner of the crash directory and of the single in-memory [`Settings`].
#[derive(Debug)]
pub struct ReportStore {
	crashes_dir: PathBuf,
	settings_path: PathBuf,
	persistent: bool,
	settings: Settings,
}

impl ReportStore {
	/// Open (and create if needed) a store rooted at `root`.
	///
	/// Never fails. If the directory cannot be created the store keeps
	/// working in memory and [`ReportStore::is_persistent`] returns false.
	pub fn open(root: impl Into<PathBuf>) -> Self {
		let root = root.into();
		let crashes_dir = root.join(CRASHES_DIR);
		let settings_path = root.join(SETTINGS_FILE);

		let persistent = match fs::create_dir_all(&crashes_dir) {
			Ok(()) => true,
			Err(e) => {
				warn!(
					path = %crashes_dir.display(),
					error = %e,
					"Crash directory is not writable, persistence disabled"
				);
				false
			}
		};

		let mut store = Self {
			crashes_dir,
			settings_path,
			persistent,
			settings: Settings::default(),
		};
		store.load_settings();
		store
	}

	pub fn is_persistent(&self) -> bool {
		self.persistent
	}

	pub fn crashes_dir(&self) -> &Path {
		&self.crashes_dir
	}

	/// The current in-memory settings.
	pub fn settings(&self) -> &Settings {
		&self.settings
	}

	/// Re-read the settings blob from disk. Corrupt or missing blobs yield
	/// defaults.
	pub fn load_settings(&mut self) -> Settings {
		self.settings = if !self.persistent {
			Settings::default()
		} else {
			match fs::read(&self.settings_path) {
				Ok(bytes) => Settings::from_slice(&bytes),
				Err(e) if e.kind() == std::io::ErrorKind::NotFound => Settings::default(),
				Err(e) => {
					warn!(path = %self.settings_path.display(), error = %e, "Failed to read settings");
					Settings::default()
				}
			}
		};
		self.settings.clone()
	}

	/// Replace the settings and persist them atomically.
	pub fn save_settings(&mut self, settings: Settings) -> Result<(), StorageError> {
		self.settings = settings;
		self.persist_settings()
	}

	/// Mutate the settings in place and persist them. Returns false if the
	/// write failed; the in-memory change is kept either way.
	pub fn update_settings(&mut self, f: impl FnOnce(&mut Settings)) -> bool {
		match self.try_update_settings(f) {
			Ok(()) => true,
			Err(e) => {
				warn!(error = %e, "Failed to persist settings");
				false
			}
		}
	}

	/// Like [`ReportStore::update_settings`], returning the write error.
	pub fn try_update_settings(&mut self, f: impl FnOnce(&mut Settings)) -> Result<(), StorageError> {
		f(&mut self.settings);
		self.persist_settings()
	}

	fn persist_settings(&self) -> Result<(), StorageError> {
		if !self.persistent {
			return Err(StorageError::PersistenceDisabled);
		}
		let bytes = self.settings.to_vec()?;
		write_atomic(&self.settings_path, &bytes)?;
		debug!(path = %self.settings_path.display(), "Settings written");
		Ok(())
	}

	/// Record a consent decision for `identity`.
	pub fn record_approval(&mut self, identity: CrashIdentity, approved: bool) -> bool {
		self.update_settings(|settings| settings.approved.record(identity, approved))
	}

	pub fn is_approved(&self, identity: &CrashIdentity) -> Option<bool> {
		self.settings.approved.get(identity)
	}

	/// Write a freshly captured report as a new pending artifact.
	pub fn write_artifact(&self, capture: &PendingCapture) -> Result<CrashArtifact, StorageError> {
		if !self.persistent {
			return Err(StorageError::PersistenceDisabled);
		}
		let token = ArtifactToken::for_crash_time(capture.crashed_at);
		let path = self.artifact_path(&token);
		write_atomic(&path, &capture.raw_bytes)?;
		debug!(token = %token, path = %path.display(), "Crash artifact written");

		Ok(CrashArtifact {
			token,
			file_path: path,
			raw_bytes: capture.raw_bytes.clone(),
			build_identifiers: capture.build_identifiers.clone(),
			app_version: capture.app_version.clone(),
			process_name: capture.process_name.clone(),
			created_at: capture.crashed_at,
		})
	}

	/// Pending artifacts, oldest first. Report bytes are read lazily as the
	/// iterator advances; unreadable files are skipped.
	pub fn list_pending_artifacts(&self) -> PendingArtifacts {
		let mut entries = Vec::new();
		if !self.persistent {
			return PendingArtifacts {
				entries: entries.into_iter(),
			};
		}

		let dir = match fs::read_dir(&self.crashes_dir) {
			Ok(dir) => dir,
			Err(e) => {
				warn!(path = %self.crashes_dir.display(), error = %e, "Failed to scan crash directory");
				return PendingArtifacts {
					entries: entries.into_iter(),
				};
			}
		};

		for entry in dir.flatten() {
			let path = entry.path();
			if path.extension().and_then(|e| e.to_str()) != Some(ARTIFACT_EXT) {
				continue;
			}
			let Some(token) = path
				.file_stem()
				.and_then(|s| s.to_str())
				.and_then(|s| s.parse::<ArtifactToken>().ok())
			else {
				debug!(path = %path.display(), "Ignoring crash file with foreign name");
				continue;
			};
			let created_at = token
				.created_at()
				.or_else(|| modified_time(&path))
				.unwrap_or_else(Utc::now);
			entries.push((created_at, token, path));
		}

		entries.sort_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
		PendingArtifacts {
			entries: entries.into_iter(),
		}
	}

	/// Delete an artifact and its side files. Missing files are not an error.
	pub fn delete_artifact(&mut self, artifact: &CrashArtifact) -> bool {
		let ok = remove_artifact_files(&self.crashes_dir, &artifact.token);

		let filename = artifact.filename();
		if self.settings.last_crash_filename.as_deref() == Some(filename.as_str()) {
			self.update_settings(|settings| settings.last_crash_filename = None);
		}
		ok
	}

	/// Persist a side file in the crash directory.
	pub fn persist_attachment(&self, bytes: &[u8], filename: &str) -> bool {
		let Some(path) = self.side_file(filename) else {
			return false;
		};
		match write_atomic(&path, bytes) {
			Ok(()) => true,
			Err(e) => {
				warn!(error = %e, "Failed to persist attachment");
				false
			}
		}
	}

	pub fn load_attachment(&self, filename: &str) -> Option<Vec<u8>> {
		let path = self.side_file(filename)?;
		match fs::read(&path) {
			Ok(bytes) => Some(bytes),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
			Err(e) => {
				warn!(path = %path.display(), error = %e, "Failed to read attachment");
				None
			}
		}
	}

	/// Persist consent-time details for an artifact.
	pub fn persist_meta(&self, token: &ArtifactToken, meta: &ArtifactMeta) -> bool {
		let bytes = match serde_json::to_vec(meta) {
			Ok(bytes) => bytes,
			Err(e) => {
				warn!(token = %token, error = %e, "Failed to encode artifact meta");
				return false;
			}
		};
		self.persist_attachment(&bytes, &format!("{token}.{META_EXT}"))
	}

	pub fn load_meta(&self, token: &ArtifactToken) -> ArtifactMeta {
		self.load_attachment(&format!("{token}.{META_EXT}"))
			.and_then(|bytes| serde_json::from_slice(&bytes).ok())
			.unwrap_or_default()
	}

	fn artifact_path(&self, token: &ArtifactToken) -> PathBuf {
		self.side_path(token, ARTIFACT_EXT)
	}

	fn side_path(&self, token: &ArtifactToken, ext: &str) -> PathBuf {
		self.crashes_dir.join(format!("{token}.{ext}"))
	}

	fn side_file(&self, filename: &str) -> Option<PathBuf> {
		if !self.persistent {
			return None;
		}
		if filename.is_empty()
			|| filename.contains(['/', '\\'])
			|| filename == "."
			|| filename == ".."
		{
			warn!(filename, "Rejected side file name");
			return None;
		}
		Some(self.crashes_dir.join(filename))
	}
}

/// Lazy iterator over pending artifacts.
#[derive(Debug)]
pub struct PendingArtifacts {
	entries: std::vec::IntoIter<(DateTime<Utc>, ArtifactToken, PathBuf)>,
}

impl Iterator for PendingArtifacts {
	type Item = CrashArtifact;

	fn next(&mut self) -> Option<Self::Item> {
		loop {
			let (created_at, token, path) = self.entries.next()?;
			match fs::read(&path) {
				Ok(bytes) => return Some(CrashArtifact::from_stored(token, path, bytes, created_at)),
				Err(e) => {
					warn!(path = %path.display(), error = %e, "Skipping unreadable crash artifact");
				}
			}
		}
	}

	fn size_hint(&self) -> (usize, Option<usize>) {
		(0, Some(self.entries.len()))
	}
}

/// Remove the report, attachment and meta files of `token` from
/// `crashes_dir`. Missing files are not an error. Returns false if any file
/// could not be removed.
pub fn remove_artifact_files(crashes_dir: &Path, token: &ArtifactToken) -> bool {
	let mut ok = true;
	for ext in [ARTIFACT_EXT, ATTACHMENT_EXT, META_EXT] {
		let path = crashes_dir.join(format!("{token}.{ext}"));
		match fs::remove_file(&path) {
			Ok(()) => debug!(path = %path.display(), "Removed crash file"),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
			Err(e) => {
				warn!(path = %path.display(), error = %e, "Failed to remove crash file");
				ok = false;
			}
		}
	}
	ok
}

fn modified_time(path: &Path) -> Option<DateTime<Utc>> {
	fs::metadata(path)
		.and_then(|m| m.modified())
		.ok()
		.map(DateTime::<Utc>::from)
}

fn temp_path_for(path: &Path) -> PathBuf {
	let mut name = path.file_name().unwrap_or_default().to_os_string();
	name.push(".tmp");
	path.with_file_name(name)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
	let temp_path = temp_path_for(path);
	let mut file = fs::File::create(&temp_path).map_err(|e| StorageError::io(&temp_path, e))?;
	file
		.write_all(bytes)
		.and_then(|()| file.sync_all())
		.map_err(|e| StorageError::io(&temp_path, e))?;
	drop(file);

	#[cfg(unix)]
	{
		use std::os::unix::fs::PermissionsExt;
		let perms = fs::Permissions::from_mode(0o600);
		if let Err(e) = fs::set_permissions(&temp_path, perms) {
			warn!(path = %temp_path.display(), error = %e, "Failed to set file permissions to 0600");
		}
	}

	fs::rename(&temp_path, path).map_err(|e| StorageError::io(path, e))
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::TimeZone;
	use loom_crashreport_core::CrashAttachment;

	fn capture_at(secs: i64, body: &str) -> PendingCapture {
		let crashed_at = Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap();
		PendingCapture::from_raw(body.as_bytes().to_vec(), crashed_at)
	}

	#[test]
	fn corrupt_settings_load_as_defaults() {
		let dir = tempfile::tempdir().unwrap();
		let mut store = ReportStore::open(dir.path());
		fs::write(dir.path().join(SETTINGS_FILE), b"{not json").unwrap();

		assert_eq!(store.load_settings(), Settings::default());
	}

	#[test]
	fn settings_survive_reopen() {
		let dir = tempfile::tempdir().unwrap();
		let mut store = ReportStore::open(dir.path());
		assert!(store.update_settings(|s| s.auto_submit = true));
		assert!(store.record_approval(CrashIdentity::from("id".to_string()), true));

		let reopened = ReportStore::open(dir.path());
		assert!(reopened.settings().auto_submit);
		assert_eq!(reopened.is_approved(&CrashIdentity::from("id".to_string())), Some(true));
	}

	#[test]
	fn artifacts_are_listed_oldest_first() {
		let dir = tempfile::tempdir().unwrap();
		let store = ReportStore::open(dir.path());
		let newer = store.write_artifact(&capture_at(60, "second")).unwrap();
		let older = store.write_artifact(&capture_at(0, "first")).unwrap();

		let listed: Vec<_> = store.list_pending_artifacts().collect();
		assert_eq!(listed.len(), 2);
		assert_eq!(listed[0].token, older.token);
		assert_eq!(listed[1].token, newer.token);
		assert_eq!(listed[0].raw_bytes, b"first");
		assert_eq!(listed[0].created_at, older.created_at);
	}

	#[test]
	fn foreign_files_are_ignored() {
		let dir = tempfile::tempdir().unwrap();
		let store = ReportStore::open(dir.path());
		fs::write(store.crashes_dir().join("notes.txt"), b"x").unwrap();
		fs::write(store.crashes_dir().join("garbage.crash"), b"x").unwrap();
		assert_eq!(store.list_pending_artifacts().count(), 0);
	}

	#[test]
	fn delete_is_idempotent_and_removes_side_files() {
		let dir = tempfile::tempdir().unwrap();
		let mut store = ReportStore::open(dir.path());
		let artifact = store.write_artifact(&capture_at(0, "report")).unwrap();
		let attachment = CrashAttachment::new("log.txt", "text/plain", b"log".to_vec());
		let encoded = serde_json::to_vec(&attachment).unwrap();
		assert!(store.persist_attachment(&encoded, &attachment_filename(&artifact.token)));
		assert!(store.persist_meta(
			&artifact.token,
			&ArtifactMeta {
				description: Some("it broke".to_string()),
				user: None,
			}
		));
		store.update_settings(|s| s.last_crash_filename = Some(artifact.filename()));

		assert!(store.delete_artifact(&artifact));
		assert!(store.delete_artifact(&artifact));
		assert_eq!(store.list_pending_artifacts().count(), 0);
		assert!(store.load_attachment(&attachment_filename(&artifact.token)).is_none());
		assert_eq!(store.load_meta(&artifact.token), ArtifactMeta::default());
		assert!(store.settings().last_crash_filename.is_none());
	}

	#[test]
	fn meta_roundtrip() {
		let dir = tempfile::tempdir().unwrap();
		let store = ReportStore::open(dir.path());
		let token = ArtifactToken::for_crash_time(Utc::now());
		let meta = ArtifactMeta {
			description: Some("clicked save".to_string()),
			user: None,
		};
		assert!(store.persist_meta(&token, &meta));
		assert_eq!(store.load_meta(&token), meta);
	}

	#[test]
	fn side_files_of_one_token_use_distinct_temp_files() {
		let dir = Path::new("/tmp/crashes");
		let token = ArtifactToken::for_crash_time(Utc::now());
		let temps: Vec<_> = [ARTIFACT_EXT, ATTACHMENT_EXT, META_EXT]
			.iter()
			.map(|ext| temp_path_for(&dir.join(format!("{token}.{ext}"))))
			.collect();
		assert_ne!(temps[0], temps[1]);
		assert_ne!(temps[1], temps[2]);
		assert_ne!(temps[0], temps[2]);
		assert_eq!(temps[0], dir.join(format!("{token}.crash.tmp")));
	}

	#[test]
	fn remove_artifact_files_without_store() {
		let dir = tempfile::tempdir().unwrap();
		let store = ReportStore::open(dir.path());
		let artifact = store.write_artifact(&capture_at(0, "report")).unwrap();
		assert!(store.persist_attachment(b"{}", &attachment_filename(&artifact.token)));

		assert!(remove_artifact_files(store.crashes_dir(), &artifact.token));
		assert_eq!(store.list_pending_artifacts().count(), 0);
		assert!(store.load_attachment(&attachment_filename(&artifact.token)).is_none());
		assert!(remove_artifact_files(store.crashes_dir(), &artifact.token));
	}

	#[test]
	fn side_file_names_cannot_escape_the_directory() {
		let dir = tempfile::tempdir().unwrap();
		let store = ReportStore::open(dir.path());
		assert!(!store.persist_attachment(b"x", "../escape"));
		assert!(!store.persist_attachment(b"x", ""));
	}

	#[cfg(unix)]
	#[test]
	fn unwritable_root_disables_persistence() {
		let dir = tempfile::tempdir().unwrap();
		let blocker = dir.path().join("file");
		fs::write(&blocker, b"not a directory").unwrap();

		let mut store = ReportStore::open(blocker.join("nested"));
		assert!(!store.is_persistent());
		assert_eq!(store.list_pending_artifacts().count(), 0);
		assert!(!store.update_settings(|s| s.auto_submit = true));
		assert!(store.settings().auto_submit);
		assert!(matches!(
			store.write_artifact(&capture_at(0, "x")),
			Err(StorageError::PersistenceDisabled)
		));
	}
}
