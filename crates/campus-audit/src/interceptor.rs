// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Wraps audited operations.
//!
//! The wrapped operation always runs with its original arguments and its
//! `Result` is handed back untouched. On the caller's path the interceptor
//! only resolves the policy, snapshots arguments and result, and gates.
//! Accepted invocations are handed to an [`EventDispatch`] as a
//! [`CapturedInvocation`]; redaction and event construction happen there.
//! All of it runs under `catch_unwind`; failures are logged and dropped.

use std::fmt::Display;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::capture::CapturedInvocation;
use crate::context::AuditContext;
use crate::dispatcher::EventDispatch;
use crate::error::{panic_message, AuditResult};
use crate::event::{AuditOutcome, AuditSeverity};
use crate::gating::{decide, RandomSource, ThreadRngSource};
use crate::policy::ResolvedPolicy;
use crate::registry::PolicyRegistry;

/// Audit state captured before the wrapped operation runs.
struct Pending {
	policy: Arc<ResolvedPolicy>,
	args: Value,
	started: Instant,
}

pub struct AuditInterceptor {
	registry: Arc<PolicyRegistry>,
	dispatcher: Arc<dyn EventDispatch>,
	rng: Arc<dyn RandomSource>,
	enabled: bool,
	escalate_failures: bool,
}

impl AuditInterceptor {
	pub fn new(registry: Arc<PolicyRegistry>, dispatcher: Arc<dyn EventDispatch>) -> Self {
		Self {
			registry,
			dispatcher,
			rng: Arc::new(ThreadRngSource),
			enabled: true,
			escalate_failures: true,
		}
	}

	pub fn with_random_source(mut self, rng: Arc<dyn RandomSource>) -> Self {
		self.rng = rng;
		self
	}

	pub fn with_enabled(mut self, enabled: bool) -> Self {
		self.enabled = enabled;
		self
	}

	/// Raise failed invocations to at least `High` so they bypass sampling.
	pub fn with_escalate_failures(mut self, escalate: bool) -> Self {
		self.escalate_failures = escalate;
		self
	}

	pub fn registry(&self) -> &PolicyRegistry {
		&self.registry
	}

	pub fn is_enabled(&self) -> bool {
		self.enabled
	}

	/// Run `op(args)` and audit it according to the policy for `operation`.
	pub async fn intercept<A, T, E, F, Fut>(
		&self,
		operation: &str,
		ctx: &AuditContext,
		args: A,
		op: F,
	) -> Result<T, E>
	where
		A: Serialize,
		T: Serialize,
		E: Display,
		F: FnOnce(A) -> Fut,
		Fut: Future<Output = Result<T, E>>,
	{
		let pending = self.begin(operation, &args);
		let result = op(args).await;
		if let Some(pending) = pending {
			self.complete(operation, ctx, pending, &result);
		}
		result
	}

	/// Blocking counterpart of [`Self::intercept`].
	pub fn intercept_sync<A, T, E, F>(
		&self,
		operation: &str,
		ctx: &AuditContext,
		args: A,
		op: F,
	) -> Result<T, E>
	where
		A: Serialize,
		T: Serialize,
		E: Display,
		F: FnOnce(A) -> Result<T, E>,
	{
		let pending = self.begin(operation, &args);
		let result = op(args);
		if let Some(pending) = pending {
			self.complete(operation, ctx, pending, &result);
		}
		result
	}

	/// `None` means the invocation is not audited and nothing was captured.
	fn begin<A: Serialize>(&self, operation: &str, args: &A) -> Option<Pending> {
		if !self.enabled {
			return None;
		}

		let captured = panic::catch_unwind(AssertUnwindSafe(|| {
			let policy = Arc::clone(self.registry.resolve(operation)?);
			let args = serde_json::to_value(args).unwrap_or_else(|e| {
				warn!(operation, error = %e, "failed to snapshot audit arguments");
				Value::Null
			});
			Some((policy, args))
		}));

		match captured {
			Ok(Some((policy, args))) => Some(Pending {
				policy,
				args,
				started: Instant::now(),
			}),
			Ok(None) => None,
			Err(panic) => {
				error!(operation, panic = %panic_message(&*panic), "audit pipeline panicked before invocation");
				None
			}
		}
	}

	fn complete<T: Serialize, E: Display>(
		&self,
		operation: &str,
		ctx: &AuditContext,
		pending: Pending,
		result: &Result<T, E>,
	) {
		let elapsed_ms = u64::try_from(pending.started.elapsed().as_millis()).unwrap_or(u64::MAX);

		let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
			self.record(operation, ctx, pending, elapsed_ms, result)
		}));

		match outcome {
			Ok(Ok(())) => {}
			Ok(Err(e)) => debug!(operation, error = %e, "audit event not dispatched"),
			Err(panic) => {
				error!(operation, panic = %panic_message(&*panic), "audit pipeline panicked after invocation")
			}
		}
	}

	fn record<T: Serialize, E: Display>(
		&self,
		operation: &str,
		ctx: &AuditContext,
		pending: Pending,
		elapsed_ms: u64,
		result: &Result<T, E>,
	) -> AuditResult<()> {
		let outcome = match result {
			Ok(_) => AuditOutcome::Success,
			Err(_) => AuditOutcome::Failure,
		};

		let severity = if outcome == AuditOutcome::Failure && self.escalate_failures {
			pending.policy.severity.max(AuditSeverity::High)
		} else {
			pending.policy.severity
		};

		let decision = decide(&pending.policy, elapsed_ms, severity, self.rng.as_ref());
		if !decision.record {
			debug!(operation, reason = %decision.reason, elapsed_ms, "audit event skipped");
			return Ok(());
		}

		let (result, error) = match result {
			Ok(value) => (Some(serde_json::to_value(value)?), None),
			Err(e) => (None, Some(e.to_string())),
		};

		debug!(operation, reason = %decision.reason, severity = %severity, "audit event accepted");
		self.dispatcher.dispatch(CapturedInvocation {
			operation: operation.to_string(),
			policy: pending.policy,
			context: ctx.clone(),
			timestamp: Utc::now(),
			elapsed_ms,
			outcome,
			severity,
			reason: decision.reason,
			args: pending.args,
			result,
			error,
		})
	}
}
