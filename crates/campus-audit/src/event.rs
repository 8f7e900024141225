// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core event types for audit logging.
//!
//! This module provides the foundational types for the audit system:
//!
//! - [`AuditAction`]: Enumeration of auditable effects
//! - [`AuditSeverity`]: Ordered severity levels used by gating
//! - [`AuditEvent`]: Complete, immutable audit record
//! - [`AuditEventBuilder`]: Fluent API for constructing events

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::redaction::Redacted;

/// Actor recorded when no authenticated user is attached to the invocation.
pub const SYSTEM_ACTOR: &str = "system";

/// Fixed-width RFC 3339 form used wherever timestamps are stored as text, so
/// lexical order matches chronological order.
pub fn storage_timestamp(ts: &DateTime<Utc>) -> String {
	ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Kind of effect an audited operation has.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
	// Data events
	DataCreated,
	DataUpdated,
	DataDeleted,
	DataAccessed,
	DataExported,

	// Authentication events
	AuthenticationSuccess,
	AuthenticationFailure,

	// Authorization events
	AuthorizationSuccess,
	AuthorizationFailure,

	// Security and system events
	SecurityAlert,
	SystemConfigChanged,
}

impl AuditAction {
	pub fn as_str(&self) -> &'static str {
		match self {
			AuditAction::DataCreated => "DATA_CREATED",
			AuditAction::DataUpdated => "DATA_UPDATED",
			AuditAction::DataDeleted => "DATA_DELETED",
			AuditAction::DataAccessed => "DATA_ACCESSED",
			AuditAction::DataExported => "DATA_EXPORTED",
			AuditAction::AuthenticationSuccess => "AUTHENTICATION_SUCCESS",
			AuditAction::AuthenticationFailure => "AUTHENTICATION_FAILURE",
			AuditAction::AuthorizationSuccess => "AUTHORIZATION_SUCCESS",
			AuditAction::AuthorizationFailure => "AUTHORIZATION_FAILURE",
			AuditAction::SecurityAlert => "SECURITY_ALERT",
			AuditAction::SystemConfigChanged => "SYSTEM_CONFIG_CHANGED",
		}
	}

	pub fn all() -> &'static [AuditAction] {
		&[
			AuditAction::DataCreated,
			AuditAction::DataUpdated,
			AuditAction::DataDeleted,
			AuditAction::DataAccessed,
			AuditAction::DataExported,
			AuditAction::AuthenticationSuccess,
			AuditAction::AuthenticationFailure,
			AuditAction::AuthorizationSuccess,
			AuditAction::AuthorizationFailure,
			AuditAction::SecurityAlert,
			AuditAction::SystemConfigChanged,
		]
	}
}

impl fmt::Display for AuditAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for AuditAction {
	type Err = UnknownVariant;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		AuditAction::all()
			.iter()
			.copied()
			.find(|a| a.as_str().eq_ignore_ascii_case(s))
			.ok_or_else(|| UnknownVariant(s.to_string()))
	}
}

/// Severity of an audited operation.
///
/// Ordering is meaningful: `Low < Medium < High < Critical`. Gating always
/// records `High` and above.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditSeverity {
	Low = 1,
	#[default]
	Medium = 2,
	High = 3,
	Critical = 4,
}

impl AuditSeverity {
	/// Numeric rank, stored alongside the label so storage can filter by floor.
	pub fn level(&self) -> u8 {
		*self as u8
	}

	pub fn from_level(level: u8) -> Option<Self> {
		match level {
			1 => Some(AuditSeverity::Low),
			2 => Some(AuditSeverity::Medium),
			3 => Some(AuditSeverity::High),
			4 => Some(AuditSeverity::Critical),
			_ => None,
		}
	}

	pub fn is_forced(&self) -> bool {
		*self >= AuditSeverity::High
	}
}

impl fmt::Display for AuditSeverity {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			AuditSeverity::Low => "LOW",
			AuditSeverity::Medium => "MEDIUM",
			AuditSeverity::High => "HIGH",
			AuditSeverity::Critical => "CRITICAL",
		};
		write!(f, "{s}")
	}
}

impl FromStr for AuditSeverity {
	type Err = UnknownVariant;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_uppercase().as_str() {
			"LOW" => Ok(AuditSeverity::Low),
			"MEDIUM" => Ok(AuditSeverity::Medium),
			"HIGH" => Ok(AuditSeverity::High),
			"CRITICAL" => Ok(AuditSeverity::Critical),
			_ => Err(UnknownVariant(s.to_string())),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
	Success,
	Failure,
}

impl fmt::Display for AuditOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AuditOutcome::Success => f.write_str("success"),
			AuditOutcome::Failure => f.write_str("failure"),
		}
	}
}

impl FromStr for AuditOutcome {
	type Err = UnknownVariant;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"success" => Ok(AuditOutcome::Success),
			"failure" => Ok(AuditOutcome::Failure),
			_ => Err(UnknownVariant(s.to_string())),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown variant '{0}'")]
pub struct UnknownVariant(pub String);

/// A recorded invocation of an audited operation.
///
/// Events are shared as `Arc<AuditEvent>` once dispatched and never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
	/// Unique identifier for this event.
	pub id: Uuid,
	/// When the invocation was accepted, before hand-off to the dispatcher.
	pub timestamp: DateTime<Utc>,
	/// Operation identifier the policy was resolved for (e.g. `staff::update`).
	pub operation: String,
	pub action: AuditAction,
	/// Resource name (e.g. "staff", "student").
	pub resource: String,
	pub resource_id: Option<String>,
	pub severity: AuditSeverity,
	/// Authenticated user, or [`SYSTEM_ACTOR`].
	pub actor_id: String,
	/// Tenant scope.
	pub school_id: Option<String>,
	pub elapsed_ms: u64,
	pub outcome: AuditOutcome,
	/// Redacted payload, policy metadata and the event-type tag.
	pub details: serde_json::Value,
	pub correlation_id: Option<String>,
	pub ip_address: Option<String>,
	pub user_agent: Option<String>,
}

impl AuditEvent {
	/// Create a new event builder for the given action and resource.
	pub fn builder(action: AuditAction, resource: impl Into<String>) -> AuditEventBuilder {
		AuditEventBuilder::new(action, resource)
	}
}

/// Builder for constructing audit events with a fluent API.
#[derive(Debug, Clone)]
pub struct AuditEventBuilder {
	timestamp: Option<DateTime<Utc>>,
	operation: Option<String>,
	action: AuditAction,
	resource: String,
	resource_id: Option<String>,
	severity: AuditSeverity,
	actor_id: Option<String>,
	school_id: Option<String>,
	elapsed_ms: u64,
	outcome: AuditOutcome,
	details: Redacted,
	correlation_id: Option<String>,
	ip_address: Option<String>,
	user_agent: Option<String>,
}

impl AuditEventBuilder {
	pub fn new(action: AuditAction, resource: impl Into<String>) -> Self {
		Self {
			timestamp: None,
			operation: None,
			action,
			resource: resource.into(),
			resource_id: None,
			severity: AuditSeverity::default(),
			actor_id: None,
			school_id: None,
			elapsed_ms: 0,
			outcome: AuditOutcome::Success,
			details: Redacted::empty(),
			correlation_id: None,
			ip_address: None,
			user_agent: None,
		}
	}

	/// Defaults to the time of [`Self::build`].
	pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
		self.timestamp = Some(timestamp);
		self
	}

	pub fn operation(mut self, operation: impl Into<String>) -> Self {
		self.operation = Some(operation.into());
		self
	}

	pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
		self.resource_id = Some(resource_id.into());
		self
	}

	pub fn severity(mut self, severity: AuditSeverity) -> Self {
		self.severity = severity;
		self
	}

	/// Set the user who performed the action. Defaults to [`SYSTEM_ACTOR`].
	pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
		self.actor_id = Some(actor_id.into());
		self
	}

	pub fn school(mut self, school_id: impl Into<String>) -> Self {
		self.school_id = Some(school_id.into());
		self
	}

	pub fn elapsed_ms(mut self, elapsed_ms: u64) -> Self {
		self.elapsed_ms = elapsed_ms;
		self
	}

	pub fn outcome(mut self, outcome: AuditOutcome) -> Self {
		self.outcome = outcome;
		self
	}

	/// Set the event details. Only redacted payloads are accepted.
	pub fn details(mut self, details: Redacted) -> Self {
		self.details = details;
		self
	}

	pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
		self.correlation_id = Some(correlation_id.into());
		self
	}

	pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
		self.ip_address = Some(ip.into());
		self
	}

	pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
		self.user_agent = Some(ua.into());
		self
	}

	pub fn build(self) -> AuditEvent {
		AuditEvent {
			id: Uuid::new_v4(),
			timestamp: self.timestamp.unwrap_or_else(Utc::now),
			operation: self
				.operation
				.unwrap_or_else(|| format!("{}::{}", self.resource, self.action)),
			action: self.action,
			resource: self.resource,
			resource_id: self.resource_id,
			severity: self.severity,
			actor_id: self.actor_id.unwrap_or_else(|| SYSTEM_ACTOR.to_string()),
			school_id: self.school_id,
			elapsed_ms: self.elapsed_ms,
			outcome: self.outcome,
			details: self.details.into_inner(),
			correlation_id: self.correlation_id,
			ip_address: self.ip_address,
			user_agent: self.user_agent,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	mod audit_action {
		use super::*;

		#[test]
		fn display_is_screaming_snake_case() {
			assert_eq!(AuditAction::DataUpdated.to_string(), "DATA_UPDATED");
			assert_eq!(
				AuditAction::AuthenticationFailure.to_string(),
				"AUTHENTICATION_FAILURE"
			);
			assert_eq!(
				AuditAction::SystemConfigChanged.to_string(),
				"SYSTEM_CONFIG_CHANGED"
			);
		}

		#[test]
		fn serde_matches_display() {
			for action in AuditAction::all() {
				let json = serde_json::to_string(action).unwrap();
				assert_eq!(json, format!("\"{action}\""));
			}
		}

		#[test]
		fn from_str_round_trips_every_variant() {
			for action in AuditAction::all() {
				assert_eq!(action.as_str().parse::<AuditAction>().unwrap(), *action);
			}
			assert!("DATA_TELEPORTED".parse::<AuditAction>().is_err());
		}
	}

	mod audit_severity {
		use super::*;

		#[test]
		fn ordering_is_low_to_critical() {
			assert!(AuditSeverity::Low < AuditSeverity::Medium);
			assert!(AuditSeverity::Medium < AuditSeverity::High);
			assert!(AuditSeverity::High < AuditSeverity::Critical);
		}

		#[test]
		fn forced_from_high() {
			assert!(!AuditSeverity::Low.is_forced());
			assert!(!AuditSeverity::Medium.is_forced());
			assert!(AuditSeverity::High.is_forced());
			assert!(AuditSeverity::Critical.is_forced());
		}

		#[test]
		fn parses_case_insensitively() {
			assert_eq!("high".parse::<AuditSeverity>().unwrap(), AuditSeverity::High);
			assert_eq!("LOW".parse::<AuditSeverity>().unwrap(), AuditSeverity::Low);
			assert!("urgent".parse::<AuditSeverity>().is_err());
		}

		proptest! {
			#[test]
			fn level_round_trips(level in 1u8..=4) {
				let severity = AuditSeverity::from_level(level).unwrap();
				prop_assert_eq!(severity.level(), level);
			}

			#[test]
			fn ordering_matches_level(a in 1u8..=4, b in 1u8..=4) {
				let sa = AuditSeverity::from_level(a).unwrap();
				let sb = AuditSeverity::from_level(b).unwrap();
				prop_assert_eq!(sa.cmp(&sb), a.cmp(&b));
			}
		}
	}

	mod builder {
		use super::*;
		use serde_json::json;

		#[test]
		fn defaults_to_system_actor_and_success() {
			let event = AuditEvent::builder(AuditAction::DataAccessed, "student").build();
			assert_eq!(event.actor_id, SYSTEM_ACTOR);
			assert_eq!(event.outcome, AuditOutcome::Success);
			assert_eq!(event.severity, AuditSeverity::Medium);
			assert_eq!(event.operation, "student::DATA_ACCESSED");
			assert_eq!(event.details, json!({}));
		}

		#[test]
		fn carries_context_fields() {
			let event = AuditEvent::builder(AuditAction::DataUpdated, "staff")
				.operation("staff::update")
				.resource_id("st-9")
				.severity(AuditSeverity::High)
				.actor("user-1")
				.school("school-3")
				.elapsed_ms(120)
				.outcome(AuditOutcome::Failure)
				.correlation_id("req-77")
				.build();

			assert_eq!(event.operation, "staff::update");
			assert_eq!(event.resource_id.as_deref(), Some("st-9"));
			assert_eq!(event.actor_id, "user-1");
			assert_eq!(event.school_id.as_deref(), Some("school-3"));
			assert_eq!(event.elapsed_ms, 120);
			assert_eq!(event.outcome, AuditOutcome::Failure);
			assert_eq!(event.correlation_id.as_deref(), Some("req-77"));
		}

		#[test]
		fn ids_are_unique() {
			let a = AuditEvent::builder(AuditAction::DataCreated, "school").build();
			let b = AuditEvent::builder(AuditAction::DataCreated, "school").build();
			assert_ne!(a.id, b.id);
		}

		#[test]
		fn serializes_with_screaming_enums() {
			let event = AuditEvent::builder(AuditAction::DataDeleted, "department")
				.severity(AuditSeverity::Critical)
				.build();
			let value = serde_json::to_value(&event).unwrap();
			assert_eq!(value["action"], "DATA_DELETED");
			assert_eq!(value["severity"], "CRITICAL");
			assert_eq!(value["outcome"], "success");
		}
	}
}
