// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Host application callbacks.
//!
//! Every callback except the main window one is optional. Unset text
//! callbacks behave as if they returned nothing.

use std::fmt;

use loom_crashreport_core::{CrashArtifact, CrashAttachment};

use crate::scheduler::SubmissionOutcome;

type TextFn = Box<dyn Fn() -> Option<String> + Send + Sync>;
type AttachmentFn = Box<dyn Fn(&CrashArtifact) -> Option<CrashAttachment> + Send + Sync>;
type OutcomeFn = Box<dyn Fn(&SubmissionOutcome) + Send + Sync>;

pub struct HostDelegate {
	show_main_application_window: Box<dyn Fn() + Send + Sync>,
	application_log: Option<TextFn>,
	user_identifier: Option<TextFn>,
	user_contact: Option<TextFn>,
	crash_description: Option<TextFn>,
	attachment_for_crash: Option<AttachmentFn>,
	on_submission_finished: Option<OutcomeFn>,
}

impl fmt::Debug for HostDelegate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("HostDelegate")
			.field("application_log", &self.application_log.is_some())
			.field("user_identifier", &self.user_identifier.is_some())
			.field("user_contact", &self.user_contact.is_some())
			.field("crash_description", &self.crash_description.is_some())
			.field("attachment_for_crash", &self.attachment_for_crash.is_some())
			.field("on_submission_finished", &self.on_submission_finished.is_some())
			.finish_non_exhaustive()
	}
}

impl HostDelegate {
	/// `show_main_application_window` runs once per `start_manager` call,
	/// after pending crashes have been handled.
	pub fn new(show_main_application_window: impl Fn() + Send + Sync + 'static) -> Self {
		Self {
			show_main_application_window: Box::new(show_main_application_window),
			application_log: None,
			user_identifier: None,
			user_contact: None,
			crash_description: None,
			attachment_for_crash: None,
			on_submission_finished: None,
		}
	}

	/// Log text sent with each report. Truncated to the payload limit.
	pub fn with_application_log(
		mut self,
		f: impl Fn() -> Option<String> + Send + Sync + 'static,
	) -> Self {
		self.application_log = Some(Box::new(f));
		self
	}

	pub fn with_user_identifier(
		mut self,
		f: impl Fn() -> Option<String> + Send + Sync + 'static,
	) -> Self {
		self.user_identifier = Some(Box::new(f));
		self
	}

	pub fn with_user_contact(mut self, f: impl Fn() -> Option<String> + Send + Sync + 'static) -> Self {
		self.user_contact = Some(Box::new(f));
		self
	}

	pub fn with_crash_description(
		mut self,
		f: impl Fn() -> Option<String> + Send + Sync + 'static,
	) -> Self {
		self.crash_description = Some(Box::new(f));
		self
	}

	/// Called once when a new crash is moved into the report store.
	pub fn with_attachment_for_crash(
		mut self,
		f: impl Fn(&CrashArtifact) -> Option<CrashAttachment> + Send + Sync + 'static,
	) -> Self {
		self.attachment_for_crash = Some(Box::new(f));
		self
	}

	/// Called after each submission's outcome has been applied.
	pub fn with_on_submission_finished(
		mut self,
		f: impl Fn(&SubmissionOutcome) + Send + Sync + 'static,
	) -> Self {
		self.on_submission_finished = Some(Box::new(f));
		self
	}

	pub fn show_main_application_window(&self) {
		(self.show_main_application_window)();
	}

	pub fn application_log(&self) -> Option<String> {
		call_text(&self.application_log)
	}

	pub fn user_identifier(&self) -> Option<String> {
		call_text(&self.user_identifier)
	}

	pub fn user_contact(&self) -> Option<String> {
		call_text(&self.user_contact)
	}

	pub fn crash_description(&self) -> Option<String> {
		call_text(&self.crash_description)
	}

	pub fn attachment_for_crash(&self, artifact: &CrashArtifact) -> Option<CrashAttachment> {
		self.attachment_for_crash.as_ref().and_then(|f| f(artifact))
	}

	pub fn submission_finished(&self, outcome: &SubmissionOutcome) {
		if let Some(f) = &self.on_submission_finished {
			f(outcome);
		}
	}
}

fn call_text(f: &Option<TextFn>) -> Option<String> {
	f.as_ref()
		.and_then(|f| f())
		.filter(|text| !text.trim().is_empty())
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::sync::Arc;

	#[test]
	fn unset_callbacks_are_empty() {
		let delegate = HostDelegate::new(|| {});
		assert_eq!(delegate.application_log(), None);
		assert_eq!(delegate.user_identifier(), None);
		assert_eq!(delegate.user_contact(), None);
		assert_eq!(delegate.crash_description(), None);
	}

	#[test]
	fn blank_text_counts_as_unset() {
		let delegate = HostDelegate::new(|| {})
			.with_user_contact(|| Some("   ".to_string()))
			.with_crash_description(|| Some("saving a file".to_string()));
		assert_eq!(delegate.user_contact(), None);
		assert_eq!(delegate.crash_description().as_deref(), Some("saving a file"));
	}

	#[test]
	fn show_window_invokes_callback() {
		let count = Arc::new(AtomicUsize::new(0));
		let counter = count.clone();
		let delegate = HostDelegate::new(move || {
			counter.fetch_add(1, Ordering::SeqCst);
		});
		delegate.show_main_application_window();
		assert_eq!(count.load(Ordering::SeqCst), 1);
	}
}
