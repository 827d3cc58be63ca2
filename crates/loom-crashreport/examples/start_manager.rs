// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Example: handle the previous run's crash at startup.
//!
//! Run with:
//!   RUST_LOG=loom_crashreport=debug cargo run --example start_manager -p loom-crashreport
//!
//! Drop a crash report at `<data dir>/capture/pending.crash` before running to
//! see it ingested and submitted.

use std::sync::Arc;

use async_trait::async_trait;
use loom_crashreport::{
	ArtifactSummary, ConsentDecision, ConsentProvider, ConsentResponse, CrashManager,
	HostDelegate, ManagerConfig,
};
use tracing_subscriber::EnvFilter;

/// Answers every prompt with the decision in `LOOM_CRASH_CONSENT`.
struct EnvConsent;

#[async_trait]
impl ConsentProvider for EnvConsent {
	async fn request_consent(&self, summary: &ArtifactSummary) -> ConsentResponse {
		println!(
			"Crash in {} {} at {}",
			summary.process_name.as_deref().unwrap_or("<unknown>"),
			summary.app_version.as_deref().unwrap_or("<unknown>"),
			summary.crashed_at
		);
		let decision = match std::env::var("LOOM_CRASH_CONSENT").as_deref() {
			Ok("always") => ConsentDecision::ApproveAlways,
			Ok("yes") => ConsentDecision::Approve,
			Ok("no") => ConsentDecision::Decline,
			_ => ConsentDecision::DeferToNextLaunch,
		};
		println!("  Decision: {decision:?}");
		ConsentResponse::new(decision)
	}
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("loom_crashreport=info")),
		)
		.init();

	let config = match std::env::var("LOOM_CRASH_CONFIG") {
		Ok(path) => ManagerConfig::load(path)?,
		Err(_) => {
			let mut config = ManagerConfig::new("loom-example");
			config.app_name = Some("Loom Example".to_string());
			config.app_version = Some(env!("CARGO_PKG_VERSION").to_string());
			config
		}
	};

	println!("Data dir: {}", config.resolved_data_dir().display());

	let delegate = HostDelegate::new(|| println!("Main window may appear now"))
		.with_application_log(|| Some("example started\n".to_string()))
		.with_on_submission_finished(|outcome| {
			println!("Submission of {} finished: {:?}", outcome.artifact.token, outcome.result);
		});

	let mut manager = CrashManager::builder()
		.config(config)
		.delegate(delegate)
		.consent_provider(Arc::new(EnvConsent))
		.build()?;

	let summary = manager.start_manager().await?;
	println!("{summary:?}");

	let outcomes = manager.finish_submissions().await;
	println!("{} background submission(s) finished", outcomes.len());

	Ok(())
}
