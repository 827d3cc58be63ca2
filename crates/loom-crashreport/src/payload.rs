// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! XML document sent with each crash report.
//!
//! ```xml
//! <crashes>
//!   <crash>
//!     <applicationname>Loom</applicationname>
//!     ...
//!     <description><![CDATA[...]]></description>
//!     <log><![CDATA[...]]></log>
//!     <report encoding="raw"><![CDATA[...]]></report>
//!   </crash>
//! </crashes>
//! ```

use base64::Engine;
use loom_crashreport_core::{CrashArtifact, CrashAttachment};

/// Largest application log sent with a report, in bytes.
pub const MAX_LOG_BYTES: usize = 50 * 1024;

/// Static facts about the submitting application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppInfo {
	pub app_name: String,
	pub bundle_identifier: String,
	pub app_version: String,
	pub platform: String,
	pub sdk_version: String,
}

/// Per-submission details gathered from the host and the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionMetadata {
	pub user_id: Option<String>,
	pub user_name: Option<String>,
	pub contact: Option<String>,
	pub description: Option<String>,
	pub application_log: Option<String>,
	pub attachments: Vec<CrashAttachment>,
}

/// Everything the transport needs for one submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashPayload {
	pub xml: String,
	pub attachments: Vec<CrashAttachment>,
}

impl CrashPayload {
	pub fn build(app: &AppInfo, artifact: &CrashArtifact, meta: &SubmissionMetadata) -> Self {
		Self {
			xml: crash_xml(app, artifact, meta),
			attachments: meta.attachments.clone(),
		}
	}
}

/// Render the crash document.
pub fn crash_xml(app: &AppInfo, artifact: &CrashArtifact, meta: &SubmissionMetadata) -> String {
	let mut xml = String::with_capacity(artifact.raw_bytes.len() + 1024);
	xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
	xml.push_str("<crashes><crash>");

	element(&mut xml, "applicationname", &app.app_name);
	element(&mut xml, "bundleidentifier", &app.bundle_identifier);
	element(&mut xml, "systemversion", std::env::consts::OS);
	element(&mut xml, "platform", &app.platform);
	element(&mut xml, "senderversion", &app.sdk_version);
	element(&mut xml, "version", artifact.app_version_or(&app.app_version));

	xml.push_str("<uuids>");
	for id in &artifact.build_identifiers {
		element(&mut xml, "uuid", id);
	}
	xml.push_str("</uuids>");

	element(&mut xml, "userid", meta.user_id.as_deref().unwrap_or_default());
	element(&mut xml, "username", meta.user_name.as_deref().unwrap_or_default());
	element(&mut xml, "contact", meta.contact.as_deref().unwrap_or_default());
	cdata_element(&mut xml, "description", meta.description.as_deref().unwrap_or_default());
	let log = meta
		.application_log
		.as_deref()
		.map(|log| truncate_log(log, MAX_LOG_BYTES))
		.unwrap_or_default();
	cdata_element(&mut xml, "log", log);

	match std::str::from_utf8(&artifact.raw_bytes) {
		Ok(text) => {
			xml.push_str("<report encoding=\"raw\">");
			push_cdata(&mut xml, text);
			xml.push_str("</report>");
		}
		Err(_) => {
			xml.push_str("<report encoding=\"base64\">");
			xml.push_str(&base64::engine::general_purpose::STANDARD.encode(&artifact.raw_bytes));
			xml.push_str("</report>");
		}
	}

	xml.push_str("</crash></crashes>");
	xml
}

/// The last `max_bytes` of `log`, cut on a character boundary.
pub fn truncate_log(log: &str, max_bytes: usize) -> &str {
	if log.len() <= max_bytes {
		return log;
	}
	let mut start = log.len() - max_bytes;
	while !log.is_char_boundary(start) {
		start += 1;
	}
	&log[start..]
}

fn element(xml: &mut String, name: &str, value: &str) {
	xml.push('<');
	xml.push_str(name);
	xml.push('>');
	escape_into(xml, value);
	xml.push_str("</");
	xml.push_str(name);
	xml.push('>');
}

fn cdata_element(xml: &mut String, name: &str, value: &str) {
	xml.push('<');
	xml.push_str(name);
	xml.push('>');
	push_cdata(xml, value);
	xml.push_str("</");
	xml.push_str(name);
	xml.push('>');
}

fn push_cdata(xml: &mut String, value: &str) {
	xml.push_str("<![CDATA[");
	xml.push_str(&value.replace("]]>", "]]]]><![CDATA[>"));
	xml.push_str("]]>");
}

fn escape_into(xml: &mut String, value: &str) {
	for c in value.chars() {
		match c {
			'&' => xml.push_str("&amp;"),
			'<' => xml.push_str("&lt;"),
			'>' => xml.push_str("&gt;"),
			'"' => xml.push_str("&quot;"),
			'\'' => xml.push_str("&apos;"),
			c => xml.push(c),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;
	use std::path::PathBuf;

	const REPORT: &str = "Process: Loom [1]\nVersion: 2.1 (7)\n\nBinary Images:\n\
		0x1 - 0x2 Loom <aabbccdd-0011-2233-4455-66778899aabb> /Loom\n";

	fn app() -> AppInfo {
		AppInfo {
			app_name: "Loom & Co".to_string(),
			bundle_identifier: "dev.loom.app".to_string(),
			app_version: "3.0".to_string(),
			platform: "linux".to_string(),
			sdk_version: "0.1.0".to_string(),
		}
	}

	fn artifact(bytes: &[u8]) -> CrashArtifact {
		CrashArtifact::from_stored(
			"0190a000-0000-7000-8000-000000000000".parse().unwrap(),
			PathBuf::from("x.crash"),
			bytes.to_vec(),
			Utc::now(),
		)
	}

	#[test]
	fn document_carries_fields() {
		let meta = SubmissionMetadata {
			user_id: Some("u-1".to_string()),
			contact: Some("ada@example.com".to_string()),
			description: Some("it <froze>".to_string()),
			application_log: Some("line 1\nline 2".to_string()),
			..Default::default()
		};
		let xml = crash_xml(&app(), &artifact(REPORT.as_bytes()), &meta);

		assert!(xml.starts_with("<?xml"));
		assert!(xml.contains("<applicationname>Loom &amp; Co</applicationname>"));
		assert!(xml.contains("<version>2.1</version>"));
		assert!(xml.contains("<uuids><uuid>aabbccdd00112233445566778899aabb</uuid></uuids>"));
		assert!(xml.contains("<userid>u-1</userid>"));
		assert!(xml.contains("<username></username>"));
		assert!(xml.contains("<contact>ada@example.com</contact>"));
		assert!(xml.contains("<description><![CDATA[it <froze>]]></description>"));
		assert!(xml.contains("<log><![CDATA[line 1\nline 2]]></log>"));
		assert!(xml.contains("<report encoding=\"raw\"><![CDATA[Process: Loom [1]"));
		assert!(xml.ends_with("</crash></crashes>"));
	}

	#[test]
	fn version_falls_back_to_current() {
		let xml = crash_xml(&app(), &artifact(b"no header"), &SubmissionMetadata::default());
		assert!(xml.contains("<version>3.0</version>"));
	}

	#[test]
	fn binary_report_is_base64() {
		let xml = crash_xml(&app(), &artifact(&[0xff, 0xfe, 0x00]), &SubmissionMetadata::default());
		assert!(xml.contains("<report encoding=\"base64\">//4A</report>"));
	}

	#[test]
	fn cdata_terminator_is_split() {
		let meta = SubmissionMetadata {
			description: Some("a]]>b".to_string()),
			..Default::default()
		};
		let xml = crash_xml(&app(), &artifact(b"r"), &meta);
		assert!(xml.contains("<description><![CDATA[a]]]]><![CDATA[>b]]></description>"));
	}

	#[test]
	fn log_keeps_the_tail_on_a_char_boundary() {
		assert_eq!(truncate_log("short", 10), "short");
		assert_eq!(truncate_log("0123456789", 4), "6789");
		// "é" is two bytes; a cut inside it moves forward.
		assert_eq!(truncate_log("aéb", 2), "b");
	}

	#[test]
	fn oversized_log_is_truncated_in_document() {
		let log = "x".repeat(MAX_LOG_BYTES + 100);
		let meta = SubmissionMetadata {
			application_log: Some(log),
			..Default::default()
		};
		let xml = crash_xml(&app(), &artifact(b"r"), &meta);
		let start = xml.find("<log><![CDATA[").unwrap() + "<log><![CDATA[".len();
		let end = xml.find("]]></log>").unwrap();
		assert_eq!(end - start, MAX_LOG_BYTES);
	}
}
