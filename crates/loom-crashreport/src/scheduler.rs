// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Synchronous/asynchronous submission of approved artifacts.
//!
//! A crash that happened within `max_sync_interval` of now is submitted
//! inline: the caller waits for at most one network timeout. Older crashes
//! are submitted on a spawned task. A spawned submission that the server
//! accepted removes the artifact's files itself, so the report is not sent
//! again even if its outcome is never collected. Everything else about the
//! [`SubmissionOutcome`] (settings, rejected versions, host callbacks) is
//! applied by the owner of the scheduler on its own task.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use loom_crashreport_core::{CrashArtifact, SubmissionResult, TransportError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::payload::CrashPayload;
use crate::store::remove_artifact_files;
use crate::transport::CrashTransport;

/// Default bound on a single network exchange.
pub const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionMode {
	Sync,
	Async,
}

impl fmt::Display for SubmissionMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SubmissionMode::Sync => f.write_str("sync"),
			SubmissionMode::Async => f.write_str("async"),
		}
	}
}

/// Pick the submission mode for a crash created at `created_at`.
///
/// The boundary is inclusive: `elapsed == max_sync_interval` is synchronous.
/// A creation time in the future counts as elapsed zero.
pub fn choose_mode(
	created_at: DateTime<Utc>,
	now: DateTime<Utc>,
	max_sync_interval: Duration,
) -> SubmissionMode {
	let elapsed = now.signed_duration_since(created_at);
	match chrono::Duration::from_std(max_sync_interval) {
		Ok(max) if elapsed > max => SubmissionMode::Async,
		_ => SubmissionMode::Sync,
	}
}

/// Result of one submission, delivered to the scheduler's owner.
#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
	pub artifact: CrashArtifact,
	pub mode: SubmissionMode,
	pub result: Result<SubmissionResult, TransportError>,
}

impl SubmissionOutcome {
	pub fn is_success(&self) -> bool {
		self.result.is_ok()
	}
}

/// Whether [`SubmissionScheduler::submit`] finished the exchange.
#[derive(Debug)]
pub enum Dispatch {
	Completed(SubmissionOutcome),
	/// Running on a spawned task. Collect it with
	/// [`SubmissionScheduler::take_finished`] or
	/// [`SubmissionScheduler::finish_all`].
	Dispatched,
}

struct InFlight {
	artifact: CrashArtifact,
	handle: JoinHandle<Result<SubmissionResult, TransportError>>,
}

pub struct SubmissionScheduler {
	transport: Arc<dyn CrashTransport>,
	network_timeout: Duration,
	crashes_dir: Option<PathBuf>,
	in_flight: Vec<InFlight>,
}

impl fmt::Debug for SubmissionScheduler {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SubmissionScheduler")
			.field("network_timeout", &self.network_timeout)
			.field("crashes_dir", &self.crashes_dir)
			.field("in_flight", &self.in_flight.len())
			.finish_non_exhaustive()
	}
}

impl SubmissionScheduler {
	pub fn new(transport: Arc<dyn CrashTransport>, network_timeout: Duration) -> Self {
		Self {
			transport,
			network_timeout,
			crashes_dir: None,
			in_flight: Vec::new(),
		}
	}

	/// Let background submissions delete accepted artifacts from
	/// `crashes_dir` as soon as the server accepts them.
	pub fn with_artifact_cleanup(mut self, crashes_dir: impl Into<PathBuf>) -> Self {
		self.crashes_dir = Some(crashes_dir.into());
		self
	}

	pub fn network_timeout(&self) -> Duration {
		self.network_timeout
	}

	/// Number of spawned submissions whose outcome has not been collected.
	pub fn in_flight(&self) -> usize {
		self.in_flight.len()
	}

	/// Submit one artifact. Never retries.
	pub async fn submit(
		&mut self,
		artifact: CrashArtifact,
		payload: CrashPayload,
		mode: SubmissionMode,
	) -> Dispatch {
		debug!(token = %artifact.token, mode = %mode, "Submitting crash report");

		match mode {
			SubmissionMode::Sync => {
				let result = bounded_submit(self.transport.as_ref(), &payload, self.network_timeout).await;
				Dispatch::Completed(SubmissionOutcome {
					artifact,
					mode,
					result,
				})
			}
			SubmissionMode::Async => {
				let transport = Arc::clone(&self.transport);
				let timeout = self.network_timeout;
				let crashes_dir = self.crashes_dir.clone();
				let token = artifact.token;
				let handle = tokio::spawn(async move {
					let result = bounded_submit(transport.as_ref(), &payload, timeout).await;
					if let (Ok(_), Some(dir)) = (&result, crashes_dir) {
						remove_artifact_files(&dir, &token);
					}
					result
				});
				self.in_flight.push(InFlight { artifact, handle });
				Dispatch::Dispatched
			}
		}
	}

	/// Outcomes of spawned submissions that have already completed. Does not
	/// wait.
	pub fn take_finished(&mut self) -> Vec<SubmissionOutcome> {
		let (finished, running): (Vec<_>, Vec<_>) = std::mem::take(&mut self.in_flight)
			.into_iter()
			.partition(|f| f.handle.is_finished());
		self.in_flight = running;

		let mut outcomes = Vec::with_capacity(finished.len());
		for InFlight {
			artifact,
			mut handle,
		} in finished
		{
			match (&mut handle).now_or_never() {
				Some(joined) => outcomes.push(SubmissionOutcome {
					artifact,
					mode: SubmissionMode::Async,
					result: flatten_join(joined),
				}),
				None => self.in_flight.push(InFlight { artifact, handle }),
			}
		}
		outcomes
	}

	/// Wait for every spawned submission and return their outcomes.
	pub async fn finish_all(&mut self) -> Vec<SubmissionOutcome> {
		let in_flight = std::mem::take(&mut self.in_flight);
		let mut outcomes = Vec::with_capacity(in_flight.len());
		for InFlight { artifact, handle } in in_flight {
			outcomes.push(SubmissionOutcome {
				artifact,
				mode: SubmissionMode::Async,
				result: flatten_join(handle.await),
			});
		}
		outcomes
	}
}

async fn bounded_submit(
	transport: &dyn CrashTransport,
	payload: &CrashPayload,
	timeout: Duration,
) -> Result<SubmissionResult, TransportError> {
	match tokio::time::timeout(timeout, transport.submit(payload)).await {
		Ok(result) => result,
		Err(_) => Err(TransportError::Timeout(timeout)),
	}
}

fn flatten_join(
	joined: Result<Result<SubmissionResult, TransportError>, tokio::task::JoinError>,
) -> Result<SubmissionResult, TransportError> {
	joined.unwrap_or_else(|e| {
		warn!(error = %e, "Submission task did not complete");
		Err(TransportError::Connectivity(format!("submission task failed: {e}")))
	})
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use chrono::TimeZone;
	use loom_crashreport_core::ServerDisposition;
	use proptest::prelude::*;
	use std::path::PathBuf;
	use std::sync::atomic::{AtomicUsize, Ordering};

	struct DelayedTransport {
		delay: Duration,
		calls: AtomicUsize,
	}

	#[async_trait]
	impl CrashTransport for DelayedTransport {
		async fn submit(&self, _payload: &CrashPayload) -> Result<SubmissionResult, TransportError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			tokio::time::sleep(self.delay).await;
			Ok(SubmissionResult {
				status_code: 201,
				server_disposition: ServerDisposition::Submitted,
				response_body: "2".to_string(),
			})
		}
	}

	fn transport(delay: Duration) -> Arc<DelayedTransport> {
		Arc::new(DelayedTransport {
			delay,
			calls: AtomicUsize::new(0),
		})
	}

	fn artifact() -> CrashArtifact {
		CrashArtifact::from_stored(
			"0190a000-0000-7000-8000-000000000000".parse().unwrap(),
			PathBuf::from("x.crash"),
			b"report".to_vec(),
			Utc::now(),
		)
	}

	fn payload() -> CrashPayload {
		CrashPayload {
			xml: "<crashes/>".to_string(),
			attachments: Vec::new(),
		}
	}

	fn at(secs: i64, millis: i64) -> DateTime<Utc> {
		Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap() + chrono::Duration::milliseconds(millis)
	}

	#[test]
	fn boundary_is_inclusive() {
		let interval = Duration::from_secs(5);
		assert_eq!(choose_mode(at(0, 0), at(5, 0), interval), SubmissionMode::Sync);
		assert_eq!(choose_mode(at(0, 0), at(5, 1), interval), SubmissionMode::Async);
	}

	#[test]
	fn future_creation_time_is_sync() {
		assert_eq!(
			choose_mode(at(10, 0), at(0, 0), Duration::from_secs(5)),
			SubmissionMode::Sync
		);
	}

	#[test]
	fn zero_interval_only_syncs_simultaneous_crashes() {
		assert_eq!(choose_mode(at(0, 0), at(0, 0), Duration::ZERO), SubmissionMode::Sync);
		assert_eq!(choose_mode(at(0, 0), at(0, 1), Duration::ZERO), SubmissionMode::Async);
	}

	proptest! {
		#[test]
		fn mode_matches_elapsed_against_interval(elapsed_ms in 0i64..100_000, interval_ms in 0u64..100_000) {
			let created = at(0, 0);
			let now = created + chrono::Duration::milliseconds(elapsed_ms);
			let mode = choose_mode(created, now, Duration::from_millis(interval_ms));
			let expected = if elapsed_ms as u64 <= interval_ms {
				SubmissionMode::Sync
			} else {
				SubmissionMode::Async
			};
			prop_assert_eq!(mode, expected);
		}
	}

	#[tokio::test]
	async fn sync_submission_completes_inline() {
		let transport = transport(Duration::ZERO);
		let mut scheduler = SubmissionScheduler::new(transport.clone(), Duration::from_secs(1));

		let dispatch = scheduler.submit(artifact(), payload(), SubmissionMode::Sync).await;
		let Dispatch::Completed(outcome) = dispatch else {
			panic!("expected inline completion");
		};
		assert!(outcome.is_success());
		assert_eq!(outcome.mode, SubmissionMode::Sync);
		assert_eq!(scheduler.in_flight(), 0);
		assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn sync_submission_is_bounded_by_network_timeout() {
		let mut scheduler =
			SubmissionScheduler::new(transport(Duration::from_secs(60)), Duration::from_millis(20));

		let Dispatch::Completed(outcome) =
			scheduler.submit(artifact(), payload(), SubmissionMode::Sync).await
		else {
			panic!("expected inline completion");
		};
		assert_eq!(outcome.result, Err(TransportError::Timeout(Duration::from_millis(20))));
	}

	#[tokio::test]
	async fn async_submission_is_collected_by_finish_all() {
		let transport = transport(Duration::from_millis(20));
		let mut scheduler = SubmissionScheduler::new(transport.clone(), Duration::from_secs(1));

		let dispatch = scheduler.submit(artifact(), payload(), SubmissionMode::Async).await;
		assert!(matches!(dispatch, Dispatch::Dispatched));
		assert_eq!(scheduler.in_flight(), 1);

		let outcomes = scheduler.finish_all().await;
		assert_eq!(outcomes.len(), 1);
		assert!(outcomes[0].is_success());
		assert_eq!(outcomes[0].mode, SubmissionMode::Async);
		assert_eq!(scheduler.in_flight(), 0);
		assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn accepted_background_submission_removes_artifact_without_collection() {
		let dir = tempfile::tempdir().unwrap();
		let artifact = artifact();
		let crash_path = dir.path().join(format!("{}.crash", artifact.token));
		std::fs::write(&crash_path, b"report").unwrap();

		let mut scheduler = SubmissionScheduler::new(transport(Duration::ZERO), Duration::from_secs(1))
			.with_artifact_cleanup(dir.path());
		scheduler.submit(artifact, payload(), SubmissionMode::Async).await;

		for _ in 0..100 {
			if !crash_path.exists() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		assert!(!crash_path.exists());
		assert_eq!(scheduler.in_flight(), 1);
	}

	#[tokio::test]
	async fn rejected_background_submission_keeps_artifact() {
		struct Rejecting;

		#[async_trait]
		impl CrashTransport for Rejecting {
			async fn submit(&self, _payload: &CrashPayload) -> Result<SubmissionResult, TransportError> {
				Err(TransportError::AppVersionRejected { status: 400 })
			}
		}

		let dir = tempfile::tempdir().unwrap();
		let artifact = artifact();
		let crash_path = dir.path().join(format!("{}.crash", artifact.token));
		std::fs::write(&crash_path, b"report").unwrap();

		let mut scheduler = SubmissionScheduler::new(Arc::new(Rejecting), Duration::from_secs(1))
			.with_artifact_cleanup(dir.path());
		scheduler.submit(artifact, payload(), SubmissionMode::Async).await;
		let outcomes = scheduler.finish_all().await;

		assert!(!outcomes[0].is_success());
		assert!(crash_path.exists());
	}

	#[tokio::test]
	async fn take_finished_does_not_wait() {
		let mut scheduler =
			SubmissionScheduler::new(transport(Duration::from_secs(60)), Duration::from_secs(120));
		scheduler.submit(artifact(), payload(), SubmissionMode::Async).await;

		assert!(scheduler.take_finished().is_empty());
		assert_eq!(scheduler.in_flight(), 1);
	}

	#[tokio::test]
	async fn take_finished_collects_completed_tasks() {
		let mut scheduler = SubmissionScheduler::new(transport(Duration::ZERO), Duration::from_secs(1));
		scheduler.submit(artifact(), payload(), SubmissionMode::Async).await;

		let mut outcomes = Vec::new();
		for _ in 0..100 {
			outcomes.extend(scheduler.take_finished());
			if !outcomes.is_empty() {
				break;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		assert_eq!(outcomes.len(), 1);
		assert_eq!(scheduler.in_flight(), 0);
	}
}
