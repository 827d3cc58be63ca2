// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Interpretation of the collection endpoint's response.

use std::fmt;

use crate::error::TransportError;

/// Status the server answers with when it no longer accepts reports for the
/// submitting app version.
pub const APP_VERSION_REJECTED_STATUS: u16 = 400;

/// Processing state the server assigned to a submitted report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ServerDisposition {
	#[default]
	Unknown,
	Assigned,
	Submitted,
	Available,
}

impl ServerDisposition {
	fn from_code(code: i64) -> Self {
		match code {
			1 => ServerDisposition::Assigned,
			2 => ServerDisposition::Submitted,
			3 => ServerDisposition::Available,
			_ => ServerDisposition::Unknown,
		}
	}

	fn from_token(token: &str) -> Self {
		let token = token.trim();
		if let Ok(code) = token.parse::<i64>() {
			return Self::from_code(code);
		}
		match token.to_ascii_lowercase().as_str() {
			"assigned" => ServerDisposition::Assigned,
			"submitted" => ServerDisposition::Submitted,
			"available" => ServerDisposition::Available,
			_ => ServerDisposition::Unknown,
		}
	}

	/// Parse the status carried by a response body.
	///
	/// Accepts a bare token (`2`, `submitted`) or an XML document carrying a
	/// `<status>` element. Anything else is [`ServerDisposition::Unknown`].
	pub fn parse_body(body: &str) -> Self {
		if let Some(inner) = element_text(body, "status") {
			return Self::from_token(inner);
		}
		Self::from_token(body)
	}
}

impl fmt::Display for ServerDisposition {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			ServerDisposition::Unknown => "unknown",
			ServerDisposition::Assigned => "assigned",
			ServerDisposition::Submitted => "submitted",
			ServerDisposition::Available => "available",
		};
		f.write_str(s)
	}
}

fn element_text<'a>(body: &'a str, name: &str) -> Option<&'a str> {
	let open = format!("<{name}>");
	let close = format!("</{name}>");
	let start = body.find(&open)? + open.len();
	let len = body[start..].find(&close)?;
	Some(&body[start..start + len])
}

/// Outcome of an accepted submission. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionResult {
	pub status_code: u16,
	pub server_disposition: ServerDisposition,
	pub response_body: String,
}

/// Classify a raw HTTP exchange.
pub fn interpret_response(status: u16, body: &[u8]) -> Result<SubmissionResult, TransportError> {
	let body = String::from_utf8_lossy(body).into_owned();

	if status == APP_VERSION_REJECTED_STATUS {
		return Err(TransportError::AppVersionRejected { status });
	}

	if !(200..300).contains(&status) {
		return Err(TransportError::ErrorWithStatusCode { status, body });
	}

	if body.trim().is_empty() {
		return Err(TransportError::ReceivedEmptyResponse { status });
	}

	Ok(SubmissionResult {
		status_code: status,
		server_disposition: ServerDisposition::parse_body(&body),
		response_body: body,
	})
}
