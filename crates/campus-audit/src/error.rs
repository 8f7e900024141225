// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use std::any::Any;

use thiserror::Error;

pub type AuditResult<T> = Result<T, AuditError>;

/// Runtime failures inside the pipeline. These never reach business callers.
#[derive(Error, Debug)]
pub enum AuditError {
	#[error("event queue is at capacity")]
	QueueFull,

	#[error("sink '{sink}' error: {source}")]
	SinkError {
		sink: String,
		#[source]
		source: AuditSinkError,
	},

	#[error("failed to snapshot payload: {0}")]
	Snapshot(#[from] serde_json::Error),

	#[error("audit pipeline panicked: {0}")]
	Panicked(String),

	#[error("dispatcher is shutting down")]
	Shutdown,
}

#[derive(Error, Debug)]
pub enum AuditSinkError {
	#[error("transient error: {0}")]
	Transient(String),

	#[error("permanent error: {0}")]
	Permanent(String),
}

impl AuditSinkError {
	pub fn is_transient(&self) -> bool {
		matches!(self, AuditSinkError::Transient(_))
	}
}

/// Rejections raised while registering policies. Fatal to startup.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyError {
	#[error("policy for '{target}' has sampling rate {rate}, expected a value in [0, 1]")]
	InvalidSamplingRate { target: String, rate: f64 },

	#[error("policy for '{target}' has malformed resource path '{path}': {reason}")]
	InvalidResourcePath {
		target: String,
		path: String,
		reason: String,
	},

	#[error("policy for '{target}' does not declare {field} and inherits none")]
	MissingField { target: String, field: &'static str },

	#[error("policy for '{target}' has non-object metadata")]
	InvalidMetadata { target: String },

	#[error("invalid operation identifier '{0}', expected '<group>::<operation>'")]
	InvalidOperationId(String),

	#[error("policy for '{0}' is registered more than once")]
	Duplicate(String),
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
	if let Some(s) = panic.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = panic.downcast_ref::<String>() {
		s.clone()
	} else {
		"unknown panic".to_string()
	}
}
