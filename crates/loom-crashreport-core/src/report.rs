// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Parsing of the textual crash report written by the capture library.
//!
//! Only the header fields and the binary image list are read. Everything in
//! here is best-effort metadata: unrecognized input produces empty values and
//! never an error.

use chrono::{DateTime, NaiveDateTime, Utc};

const BINARY_IMAGES_MARKER: &str = "Binary Images:";

/// Header fields extracted from a crash report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportHeader {
	/// Name of the crashed process.
	pub process_name: Option<String>,
	/// Bundle identifier of the crashed application.
	pub bundle_identifier: Option<String>,
	/// Short version string of the crashed application.
	pub app_version: Option<String>,
	/// Time of the fatal signal.
	pub crashed_at: Option<DateTime<Utc>>,
}

/// Parse the report header. Returns all-`None` for binary or foreign formats.
pub fn parse_header(raw: &[u8]) -> ReportHeader {
	let Ok(text) = std::str::from_utf8(raw) else {
		return ReportHeader::default();
	};

	let mut header = ReportHeader::default();
	for line in text.lines() {
		if line.starts_with(BINARY_IMAGES_MARKER) {
			break;
		}
		let Some((key, value)) = line.split_once(':') else {
			continue;
		};
		let value = value.trim();
		if value.is_empty() {
			continue;
		}
		match key.trim() {
			"Process" if header.process_name.is_none() => {
				// "MyApp [1234]"
				let name = value.split(" [").next().unwrap_or(value).trim();
				header.process_name = Some(name.to_string());
			}
			"Identifier" if header.bundle_identifier.is_none() => {
				header.bundle_identifier = Some(value.to_string());
			}
			"Version" if header.app_version.is_none() => {
				// "1.2.3 (456)"
				let version = value.split(" (").next().unwrap_or(value).trim();
				header.app_version = Some(version.to_string());
			}
			"Date/Time" if header.crashed_at.is_none() => {
				header.crashed_at = parse_timestamp(value);
			}
			_ => {}
		}
	}
	header
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
	const WITH_OFFSET: &[&str] = &["%Y-%m-%d %H:%M:%S%.f %z", "%Y-%m-%d %H:%M:%S %z"];
	for format in WITH_OFFSET {
		if let Ok(parsed) = DateTime::parse_from_str(value, format) {
			return Some(parsed.with_timezone(&Utc));
		}
	}
	if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
		return Some(parsed.with_timezone(&Utc));
	}
	NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
		.ok()
		.map(|naive| naive.and_utc())
}

/// Extract the build identifiers of every binary image listed in the report.
///
/// Identifiers are the `<...>` tokens of the `Binary Images:` section,
/// normalized to lowercase hex without dashes and de-duplicated in order of
/// first appearance.
pub fn extract_build_identifiers(raw: &[u8]) -> Vec<String> {
	let Ok(text) = std::str::from_utf8(raw) else {
		return Vec::new();
	};
	let Some(start) = text.find(BINARY_IMAGES_MARKER) else {
		return Vec::new();
	};

	let mut identifiers: Vec<String> = Vec::new();
	for line in text[start + BINARY_IMAGES_MARKER.len()..].lines().skip(1) {
		let line = line.trim();
		if line.is_empty() {
			break;
		}
		let Some(open) = line.find('<') else {
			continue;
		};
		let Some(len) = line[open + 1..].find('>') else {
			continue;
		};
		let Some(id) = normalize_identifier(&line[open + 1..open + 1 + len]) else {
			continue;
		};
		if !identifiers.contains(&id) {
			identifiers.push(id);
		}
	}
	identifiers
}

fn normalize_identifier(raw: &str) -> Option<String> {
	let id: String = raw
		.chars()
		.filter(|c| *c != '-')
		.map(|c| c.to_ascii_lowercase())
		.collect();
	if id.is_empty() || !id.chars().all(|c| c.is_ascii_hexdigit()) {
		return None;
	}
	Some(id)
}
