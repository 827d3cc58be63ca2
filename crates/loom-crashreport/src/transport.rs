// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Network exchange with the crash collection endpoint.

use std::time::Duration;

use async_trait::async_trait;
use loom_crashreport_core::{interpret_response, SubmissionResult, TransportError};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use tracing::{debug, info, warn};
use url::Url;

use crate::payload::CrashPayload;

/// SDK version for identification.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");
/// SDK name for identification.
pub const SDK_NAME: &str = "loom-crashreport";

/// Submits one crash payload and classifies the response.
#[async_trait]
pub trait CrashTransport: Send + Sync {
	async fn submit(&self, payload: &CrashPayload) -> Result<SubmissionResult, TransportError>;
}

/// Collection endpoint for `app_identifier` under `server_url`.
///
/// A base URL with a path prefix keeps it: `https://host/hockey` becomes
/// `https://host/hockey/api/2/apps/<id>/crashes`.
pub fn crash_endpoint(server_url: &str, app_identifier: &str) -> Result<Url, url::ParseError> {
	let mut base = Url::parse(server_url.trim())?;
	if !base.path().ends_with('/') {
		let path = format!("{}/", base.path());
		base.set_path(&path);
	}
	base.join(&format!("api/2/apps/{app_identifier}/crashes"))
}

/// Returns the User-Agent sent with every submission.
pub fn user_agent() -> String {
	format!("{SDK_NAME}/{SDK_VERSION}")
}

/// Multipart HTTP transport.
///
/// Posts to `{server_url}/api/2/apps/{app_identifier}/crashes`. The crash
/// document is the `xml` part; attachments follow as `attachment0`,
/// `attachment1`, ...
#[derive(Debug, Clone)]
pub struct HttpTransport {
	client: Client,
	endpoint: Url,
	timeout: Duration,
}

impl HttpTransport {
	pub fn new(
		server_url: &str,
		app_identifier: &str,
		timeout: Duration,
	) -> Result<Self, TransportError> {
		let client = Client::builder()
			.user_agent(user_agent())
			.timeout(timeout)
			.build()
			.map_err(|e| TransportError::Connectivity(e.to_string()))?;

		let endpoint = crash_endpoint(server_url, app_identifier)
			.map_err(|e| TransportError::Connectivity(format!("invalid server URL {server_url}: {e}")))?;
		debug!(endpoint = %endpoint, "Crash transport initialized");

		Ok(Self {
			client,
			endpoint,
			timeout,
		})
	}

	pub fn endpoint(&self) -> &Url {
		&self.endpoint
	}

	fn form(payload: &CrashPayload) -> Result<Form, TransportError> {
		let xml = Part::text(payload.xml.clone())
			.file_name("crash.xml")
			.mime_str("text/xml")
			.map_err(|e| TransportError::Payload(e.to_string()))?;
		let mut form = Form::new().part("xml", xml);

		for (index, attachment) in payload.attachments.iter().enumerate() {
			let part = Part::bytes(attachment.data.clone())
				.file_name(attachment.filename.clone())
				.mime_str(&attachment.content_type)
				.map_err(|e| TransportError::Payload(e.to_string()))?;
			form = form.part(format!("attachment{index}"), part);
		}
		Ok(form)
	}

	fn classify_error(&self, e: reqwest::Error) -> TransportError {
		if e.is_timeout() {
			TransportError::Timeout(self.timeout)
		} else {
			TransportError::Connectivity(e.to_string())
		}
	}
}

#[async_trait]
impl CrashTransport for HttpTransport {
	async fn submit(&self, payload: &CrashPayload) -> Result<SubmissionResult, TransportError> {
		let form = Self::form(payload)?;

		debug!(
			endpoint = %self.endpoint,
			attachments = payload.attachments.len(),
			"Sending crash report"
		);

		let response = self
			.client
			.post(self.endpoint.clone())
			.query(&[("sdk", SDK_NAME), ("sdk_version", SDK_VERSION)])
			.multipart(form)
			.send()
			.await
			.map_err(|e| self.classify_error(e))?;

		let status = response.status().as_u16();
		let body = response.bytes().await.map_err(|e| self.classify_error(e))?;

		match interpret_response(status, &body) {
			Ok(result) => {
				info!(
					status,
					disposition = %result.server_disposition,
					"Crash report accepted"
				);
				Ok(result)
			}
			Err(e) => {
				warn!(status, error = %e, "Crash report not accepted");
				Err(e)
			}
		}
	}
}
