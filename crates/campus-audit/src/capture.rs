// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Raw invocation records and their assembly into audit events.
//!
//! The interceptor only gates and snapshots. It hands a
//! [`CapturedInvocation`] to the dispatcher, whose assembly task runs
//! [`EventAssembler::assemble`] to redact the payload and build the event.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::context::AuditContext;
use crate::event::{AuditEvent, AuditOutcome, AuditSeverity};
use crate::gating::GatingReason;
use crate::policy::ResolvedPolicy;
use crate::redaction::Redactor;

/// An accepted invocation as seen on the caller's path.
///
/// `args` and `result` are unredacted snapshots. They are only ever turned
/// into an [`AuditEvent`] through [`EventAssembler::assemble`].
pub struct CapturedInvocation {
	pub operation: String,
	pub policy: Arc<ResolvedPolicy>,
	pub context: AuditContext,
	pub timestamp: DateTime<Utc>,
	pub elapsed_ms: u64,
	pub outcome: AuditOutcome,
	/// Policy severity after failure escalation.
	pub severity: AuditSeverity,
	pub reason: GatingReason,
	pub args: Value,
	pub result: Option<Value>,
	pub error: Option<String>,
}

// Payload snapshots are left out so raw values never end up in logs.
impl fmt::Debug for CapturedInvocation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("CapturedInvocation")
			.field("operation", &self.operation)
			.field("timestamp", &self.timestamp)
			.field("elapsed_ms", &self.elapsed_ms)
			.field("outcome", &self.outcome)
			.field("severity", &self.severity)
			.field("reason", &self.reason)
			.finish_non_exhaustive()
	}
}

/// Turns captured invocations into redacted events.
#[derive(Debug, Clone, Default)]
pub struct EventAssembler {
	redactor: Redactor,
}

impl EventAssembler {
	pub fn new(redactor: Redactor) -> Self {
		Self { redactor }
	}

	pub fn redactor(&self) -> &Redactor {
		&self.redactor
	}

	pub fn assemble(&self, captured: CapturedInvocation) -> AuditEvent {
		let CapturedInvocation {
			operation,
			policy,
			context,
			timestamp,
			elapsed_ms,
			outcome,
			severity,
			reason,
			args,
			result,
			error,
		} = captured;

		let mut details = Map::new();
		details.insert(
			"event_type".to_string(),
			Value::String(format!(
				"{}.{}",
				policy.resource,
				policy.action.as_str().to_ascii_lowercase()
			)),
		);
		details.insert("args".to_string(), args);
		details.insert("metadata".to_string(), Value::Object(policy.metadata.clone()));
		details.insert(
			"gating_reason".to_string(),
			Value::String(reason.as_str().to_string()),
		);
		if let Some(result) = result {
			details.insert("result".to_string(), result);
		}
		if let Some(error) = error {
			details.insert("error".to_string(), Value::String(error));
		}

		let details = self
			.redactor
			.redact(&Value::Object(details), &policy.redact_fields);

		// Resolved against the redacted snapshot so a redacted field never
		// leaks through the resource id column.
		let resource_id = policy.resource_id.as_ref().and_then(|r| {
			let snapshot = details.as_value();
			r.resolve(&snapshot["args"], snapshot.get("result"))
		});

		let mut builder = AuditEvent::builder(policy.action, policy.resource.clone())
			.timestamp(timestamp)
			.operation(operation)
			.severity(severity)
			.actor(context.actor())
			.elapsed_ms(elapsed_ms)
			.outcome(outcome)
			.details(details);
		if let Some(id) = resource_id {
			builder = builder.resource_id(id);
		}
		if let Some(school) = context.school_id {
			builder = builder.school(school);
		}
		if let Some(correlation_id) = context.correlation_id {
			builder = builder.correlation_id(correlation_id);
		}
		if let Some(ip) = context.ip_address {
			builder = builder.ip_address(ip);
		}
		if let Some(ua) = context.user_agent {
			builder = builder.user_agent(ua);
		}
		builder.build()
	}
}
