// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::error::AuditSinkError;
use crate::event::{AuditEvent, AuditOutcome};
use crate::sink::AuditSink;

/// Emits every event as a structured log line under the `audit` target.
pub struct TracingAuditSink {
	name: String,
}

impl TracingAuditSink {
	pub fn new() -> Self {
		Self {
			name: "tracing".to_string(),
		}
	}
}

impl Default for TracingAuditSink {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl AuditSink for TracingAuditSink {
	fn name(&self) -> &str {
		&self.name
	}

	async fn publish(&self, event: Arc<AuditEvent>) -> Result<(), AuditSinkError> {
		let details = event.details.to_string();
		if event.severity.is_forced() || event.outcome == AuditOutcome::Failure {
			warn!(
				target: "audit",
				event_id = %event.id,
				operation = %event.operation,
				action = %event.action,
				resource = %event.resource,
				resource_id = event.resource_id.as_deref(),
				severity = %event.severity,
				actor_id = %event.actor_id,
				school_id = event.school_id.as_deref(),
				elapsed_ms = event.elapsed_ms,
				outcome = %event.outcome,
				details = %details,
				"audit event"
			);
		} else {
			info!(
				target: "audit",
				event_id = %event.id,
				operation = %event.operation,
				action = %event.action,
				resource = %event.resource,
				resource_id = event.resource_id.as_deref(),
				severity = %event.severity,
				actor_id = %event.actor_id,
				school_id = event.school_id.as_deref(),
				elapsed_ms = event.elapsed_ms,
				outcome = %event.outcome,
				details = %details,
				"audit event"
			);
		}
		Ok(())
	}
}
