// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The crash manager facade.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use loom_crashreport_core::{
	ArtifactMeta, ConfigurationError, CrashArtifact, CrashAttachment, Settings, UserIdentity,
};
use tracing::{debug, error, info, warn};

use crate::capture::{is_debugger_attached, CaptureAdapter, CaptureLibrary, DirectoryCaptureLibrary};
use crate::config::ManagerConfig;
use crate::consent::ConsentProvider;
use crate::delegate::HostDelegate;
use crate::disposition::{Disposition, DispositionEngine, IngestOutcome};
use crate::error::{CrashReportError, Result};
use crate::payload::{AppInfo, CrashPayload, SubmissionMetadata};
use crate::scheduler::{choose_mode, Dispatch, SubmissionOutcome, SubmissionScheduler};
use crate::secure_store::{cache_identity, load_cached_identity, MemorySecureStore, SecureStore};
use crate::store::{attachment_filename, ReportStore};
use crate::transport::{CrashTransport, HttpTransport};

/// Sub-directory of the data dir used by the default capture library.
pub const DEFAULT_CAPTURE_DIR: &str = "capture";

/// Builder for constructing a [`CrashManager`].
pub struct CrashManagerBuilder {
	config: ManagerConfig,
	delegate: Option<HostDelegate>,
	capture_library: Option<Box<dyn CaptureLibrary>>,
	consent: Option<Arc<dyn ConsentProvider>>,
	transport: Option<Arc<dyn CrashTransport>>,
	secure_store: Option<Arc<dyn SecureStore>>,
	debugger_attached: Option<bool>,
}

impl CrashManagerBuilder {
	pub fn new() -> Self {
		Self {
			config: ManagerConfig::default(),
			delegate: None,
			capture_library: None,
			consent: None,
			transport: None,
			secure_store: None,
			debugger_attached: None,
		}
	}

	/// Replaces the whole configuration.
	pub fn config(mut self, config: ManagerConfig) -> Self {
		self.config = config;
		self
	}

	pub fn app_identifier(mut self, id: impl Into<String>) -> Self {
		self.config.app_identifier = id.into();
		self
	}

	pub fn company_name(mut self, name: impl Into<String>) -> Self {
		self.config.company_name = Some(name.into());
		self
	}

	pub fn app_name(mut self, name: impl Into<String>) -> Self {
		self.config.app_name = Some(name.into());
		self
	}

	/// Sets the running app version.
	///
	/// Example: `1.4.0`
	pub fn app_version(mut self, version: impl Into<String>) -> Self {
		self.config.app_version = Some(version.into());
		self
	}

	/// Sets the collection server.
	///
	/// Example: `https://sdk.hockeyapp.net/`
	pub fn server_url(mut self, url: impl Into<String>) -> Self {
		self.config.server_url = url.into();
		self
	}

	pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.config.data_dir = Some(dir.into());
		self
	}

	pub fn auto_submit(mut self, enabled: bool) -> Self {
		self.config.auto_submit = Some(enabled);
		self
	}

	pub fn ask_user_details(mut self, enabled: bool) -> Self {
		self.config.ask_user_details = Some(enabled);
		self
	}

	pub fn max_sync_interval(mut self, interval: Duration) -> Self {
		self.config.max_sync_interval_secs = Some(interval.as_secs_f64());
		self
	}

	pub fn network_timeout(mut self, timeout: Duration) -> Self {
		self.config.network_timeout_secs = timeout.as_secs_f64();
		self
	}

	/// Required.
	pub fn delegate(mut self, delegate: HostDelegate) -> Self {
		self.delegate = Some(delegate);
		self
	}

	/// Defaults to a [`DirectoryCaptureLibrary`] under the data dir.
	pub fn capture_library(mut self, library: impl CaptureLibrary + 'static) -> Self {
		self.capture_library = Some(Box::new(library));
		self
	}

	/// Without a consent provider, reports that need consent stay pending.
	pub fn consent_provider(mut self, provider: Arc<dyn ConsentProvider>) -> Self {
		self.consent = Some(provider);
		self
	}

	/// Defaults to [`HttpTransport`] against the configured server.
	pub fn transport(mut self, transport: Arc<dyn CrashTransport>) -> Self {
		self.transport = Some(transport);
		self
	}

	/// Defaults to [`MemorySecureStore`].
	pub fn secure_store(mut self, store: Arc<dyn SecureStore>) -> Self {
		self.secure_store = Some(store);
		self
	}

	/// Overrides debugger detection.
	pub fn debugger_attached(mut self, attached: bool) -> Self {
		self.debugger_attached = Some(attached);
		self
	}

	/// Builds the manager. Configuration is validated by
	/// [`CrashManager::start_manager`].
	pub fn build(self) -> Result<CrashManager> {
		let delegate = self.delegate.ok_or(ConfigurationError::MissingDelegate)?;

		Ok(CrashManager {
			config: self.config,
			delegate,
			capture_library: self.capture_library,
			consent: self.consent,
			transport: self.transport,
			secure_store: self
				.secure_store
				.unwrap_or_else(|| Arc::new(MemorySecureStore::new())),
			debugger_attached: self.debugger_attached,
			running: None,
		})
	}
}

impl Default for CrashManagerBuilder {
	fn default() -> Self {
		Self::new()
	}
}

/// Counts of what one `start_manager` call did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartSummary {
	/// New reports moved from the capture library into the store.
	pub ingested: usize,
	/// Submissions that completed and were accepted during the call.
	pub submitted: usize,
	/// Submissions spawned to finish in the background.
	pub dispatched: usize,
	pub discarded: usize,
	pub deferred: usize,
	pub failed: usize,
}

struct Running {
	store: ReportStore,
	adapter: CaptureAdapter,
	engine: DispositionEngine,
	scheduler: SubmissionScheduler,
	app_info: AppInfo,
	cached_identity: UserIdentity,
}

/// Drives the crash report lifecycle for one process.
///
/// # Example
///
/// ```ignore
/// use loom_crashreport::{CrashManager, HostDelegate};
///
/// let mut manager = CrashManager::builder()
///     .app_identifier("3f1c0a6e9b2d4e7f")
///     .app_version(env!("CARGO_PKG_VERSION"))
///     .delegate(HostDelegate::new(|| show_window()))
///     .build()?;
///
/// manager.start_manager().await?;
///
/// // Before exit
/// manager.finish_submissions().await;
/// ```
pub struct CrashManager {
	config: ManagerConfig,
	delegate: HostDelegate,
	capture_library: Option<Box<dyn CaptureLibrary>>,
	consent: Option<Arc<dyn ConsentProvider>>,
	transport: Option<Arc<dyn CrashTransport>>,
	secure_store: Arc<dyn SecureStore>,
	debugger_attached: Option<bool>,
	running: Option<Running>,
}

impl CrashManager {
	pub fn builder() -> CrashManagerBuilder {
		CrashManagerBuilder::new()
	}

	pub fn config(&self) -> &ManagerConfig {
		&self.config
	}

	pub fn is_started(&self) -> bool {
		self.running.is_some()
	}

	/// Persisted settings, once started.
	pub fn settings(&self) -> Option<&Settings> {
		self.running.as_ref().map(|r| r.store.settings())
	}

	pub fn report_store(&self) -> Option<&ReportStore> {
		self.running.as_ref().map(|r| &r.store)
	}

	/// False before start, when a debugger was attached or when the capture
	/// library could not be enabled.
	pub fn is_capture_enabled(&self) -> bool {
		self.running.as_ref().is_some_and(|r| r.adapter.is_enabled())
	}

	pub fn in_flight_submissions(&self) -> usize {
		self.running.as_ref().map_or(0, |r| r.scheduler.in_flight())
	}

	/// Handle pending crash reports and then signal the host that its main
	/// window may appear.
	///
	/// The main window callback fires exactly once per call, including on a
	/// repeated call (which does nothing else) and on a configuration error.
	/// Only configuration errors are returned.
	pub async fn start_manager(&mut self) -> Result<StartSummary> {
		if self.running.is_some() {
			debug!("Crash manager already started");
			self.delegate.show_main_application_window();
			return Ok(StartSummary::default());
		}

		let result = self.start().await;
		if let Err(e) = &result {
			error!(error = %e, "Crash manager failed to start");
		}
		self.delegate.show_main_application_window();
		result
	}

	async fn start(&mut self) -> Result<StartSummary> {
		self.config.validate()?;

		let data_dir = self.config.resolved_data_dir();
		let transport = match self.transport.clone() {
			Some(transport) => transport,
			None => Arc::new(
				HttpTransport::new(
					&self.config.server_url,
					self.config.app_identifier.trim(),
					self.config.network_timeout(),
				)
				.map_err(|e| ConfigurationError::InvalidServerUrl(e.to_string()))?,
			),
		};

		let mut store = ReportStore::open(&data_dir);
		let config = &self.config;
		store.update_settings(|s| apply_host_overrides(config, s));

		let library = self
			.capture_library
			.take()
			.unwrap_or_else(|| Box::new(DirectoryCaptureLibrary::new(data_dir.join(DEFAULT_CAPTURE_DIR))));
		let debugger_attached = self.debugger_attached.unwrap_or_else(is_debugger_attached);
		let adapter = CaptureAdapter::initialize_with(library, &self.config.capture, debugger_attached);

		let mut scheduler = SubmissionScheduler::new(transport, self.config.network_timeout());
		if store.is_persistent() {
			scheduler = scheduler.with_artifact_cleanup(store.crashes_dir());
		}

		let mut running = Running {
			store,
			adapter,
			engine: DispositionEngine::new(self.config.current_app_version())
				.with_company_name(self.config.company_name.clone()),
			scheduler,
			app_info: self.config.app_info(),
			cached_identity: load_cached_identity(self.secure_store.as_ref()).await,
		};

		info!(
			data_dir = %data_dir.display(),
			persistent = running.store.is_persistent(),
			capture = running.adapter.is_enabled(),
			"Crash manager started"
		);

		let summary = running
			.process_pending(
				&self.config,
				&self.delegate,
				self.consent.as_deref(),
				self.secure_store.as_ref(),
			)
			.await;
		self.running = Some(running);
		Ok(summary)
	}

	/// Apply the outcomes of background submissions that have completed.
	/// Does not wait. Returns the number of outcomes applied.
	pub fn poll_submissions(&mut self) -> usize {
		let Some(running) = self.running.as_mut() else {
			return 0;
		};
		let outcomes = running.scheduler.take_finished();
		let count = outcomes.len();
		for outcome in outcomes {
			running.apply_outcome(&self.delegate, outcome);
		}
		count
	}

	/// Wait for every background submission and apply its outcome.
	pub async fn finish_submissions(&mut self) -> Vec<SubmissionOutcome> {
		let Some(running) = self.running.as_mut() else {
			return Vec::new();
		};
		let outcomes = running.scheduler.finish_all().await;
		for outcome in &outcomes {
			running.apply_outcome(&self.delegate, outcome.clone());
		}
		outcomes
	}

	pub fn set_auto_submit(&mut self, enabled: bool) {
		self.warn_if_started("auto_submit");
		self.config.auto_submit = Some(enabled);
		self.sync_settings();
	}

	pub fn set_ask_user_details(&mut self, enabled: bool) {
		self.warn_if_started("ask_user_details");
		self.config.ask_user_details = Some(enabled);
		self.sync_settings();
	}

	pub fn set_max_sync_interval(&mut self, interval: Duration) {
		self.warn_if_started("max_sync_interval");
		self.config.max_sync_interval_secs = Some(interval.as_secs_f64());
		self.sync_settings();
	}

	pub fn set_company_name(&mut self, name: impl Into<String>) {
		self.warn_if_started("company_name");
		self.config.company_name = Some(name.into());
	}

	pub fn set_app_identifier(&mut self, id: impl Into<String>) {
		self.warn_if_started("app_identifier");
		self.config.app_identifier = id.into();
	}

	pub fn set_user_id(&mut self, id: Option<String>) {
		self.warn_if_started("user_id");
		self.config.user_id = id;
	}

	pub fn set_user_name(&mut self, name: Option<String>) {
		self.warn_if_started("user_name");
		self.config.user_name = name;
	}

	pub fn set_user_email(&mut self, email: Option<String>) {
		self.warn_if_started("user_email");
		self.config.user_email = email;
	}

	fn warn_if_started(&self, setting: &str) {
		if self.running.is_some() {
			warn!(setting, "Crash manager configuration changed after start_manager");
		}
	}

	fn sync_settings(&mut self) {
		if let Some(running) = self.running.as_mut() {
			let config = &self.config;
			running
				.store
				.update_settings(|s| apply_host_overrides(config, s));
		}
	}
}

impl std::fmt::Debug for CrashManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("CrashManager")
			.field("config", &self.config)
			.field("started", &self.running.is_some())
			.finish_non_exhaustive()
	}
}

impl Running {
	async fn process_pending(
		&mut self,
		config: &ManagerConfig,
		delegate: &HostDelegate,
		consent: Option<&dyn ConsentProvider>,
		secure_store: &dyn SecureStore,
	) -> StartSummary {
		let mut summary = StartSummary::default();

		match self.engine.ingest_pending(&mut self.adapter, &mut self.store, Utc::now(), |artifact| {
			delegate.attachment_for_crash(artifact)
		}) {
			Ok(IngestOutcome::Ingested(_)) => summary.ingested += 1,
			Ok(IngestOutcome::Discarded(_)) => summary.discarded += 1,
			Ok(IngestOutcome::NothingPending) => {}
			Err(e @ CrashReportError::AnalysisReentry) => {
				warn!(error = %e, "Discarded pending crash report without reading it");
				summary.discarded += 1;
			}
			Err(e) => {
				warn!(error = %e, "Pending crash report left with the capture library");
				summary.failed += 1;
			}
		}

		for artifact in self.store.list_pending_artifacts() {
			for outcome in self.scheduler.take_finished() {
				self.apply_outcome(delegate, outcome);
			}

			match self.engine.decide(&artifact, &mut self.store, consent).await {
				Disposition::Discard(_) => {
					self.store.delete_artifact(&artifact);
					summary.discarded += 1;
				}
				Disposition::Defer { .. } => summary.deferred += 1,
				Disposition::Submit { meta, .. } => {
					if let Some(user) = meta.user.as_ref().filter(|u| !u.is_empty()) {
						if cache_identity(secure_store, user).await {
							self.cached_identity = user.clone();
						}
					}

					let metadata = self.metadata_for(config, delegate, &artifact, &meta);
					let payload = CrashPayload::build(&self.app_info, &artifact, &metadata);
					let mode = choose_mode(
						artifact.created_at,
						Utc::now(),
						self.store.settings().max_sync_interval(),
					);

					match self.scheduler.submit(artifact, payload, mode).await {
						Dispatch::Completed(outcome) => {
							if outcome.is_success() {
								summary.submitted += 1;
							} else {
								summary.failed += 1;
							}
							self.apply_outcome(delegate, outcome);
						}
						Dispatch::Dispatched => summary.dispatched += 1,
					}
				}
			}
		}

		for outcome in self.scheduler.take_finished() {
			self.apply_outcome(delegate, outcome);
		}

		info!(
			ingested = summary.ingested,
			submitted = summary.submitted,
			dispatched = summary.dispatched,
			discarded = summary.discarded,
			deferred = summary.deferred,
			failed = summary.failed,
			"Pending crash reports processed"
		);
		summary
	}

	fn metadata_for(
		&self,
		config: &ManagerConfig,
		delegate: &HostDelegate,
		artifact: &CrashArtifact,
		meta: &ArtifactMeta,
	) -> SubmissionMetadata {
		let host = UserIdentity::new(config.user_name.clone(), config.user_email.clone());
		let user = meta
			.user
			.clone()
			.unwrap_or_default()
			.or(&host)
			.or(&self.cached_identity);

		let attachments = self
			.store
			.load_attachment(&attachment_filename(&artifact.token))
			.and_then(|bytes| match serde_json::from_slice::<CrashAttachment>(&bytes) {
				Ok(attachment) => Some(attachment),
				Err(e) => {
					warn!(token = %artifact.token, error = %e, "Ignoring unreadable attachment");
					None
				}
			})
			.into_iter()
			.collect();

		SubmissionMetadata {
			user_id: delegate
				.user_identifier()
				.or_else(|| config.user_id.clone())
				.or_else(|| user.name.clone()),
			user_name: user.name.clone(),
			contact: delegate.user_contact().or_else(|| user.email.clone()),
			description: meta
				.description
				.clone()
				.or_else(|| delegate.crash_description()),
			application_log: delegate.application_log(),
			attachments,
		}
	}

	fn apply_outcome(&mut self, delegate: &HostDelegate, outcome: SubmissionOutcome) {
		let token = outcome.artifact.token;
		match &outcome.result {
			Ok(result) => {
				self.store.delete_artifact(&outcome.artifact);
				info!(
					token = %token,
					mode = %outcome.mode,
					status = result.status_code,
					disposition = %result.server_disposition,
					"Crash report submitted"
				);
			}
			Err(e) => {
				if e.suppresses_app_version() {
					let version = outcome
						.artifact
						.app_version_or(self.engine.current_app_version())
						.to_string();
					self.engine.mark_version_rejected(version);
				}
				warn!(token = %token, mode = %outcome.mode, error = %e, "Crash report left pending for next launch");
			}
		}
		delegate.submission_finished(&outcome);
	}
}

fn apply_host_overrides(config: &ManagerConfig, settings: &mut Settings) {
	if let Some(auto_submit) = config.auto_submit {
		settings.auto_submit = auto_submit;
	}
	if let Some(ask) = config.ask_user_details {
		settings.ask_user_details = ask;
	}
	if let Some(interval) = config.max_sync_interval() {
		settings.set_max_sync_interval(interval);
	}
}
