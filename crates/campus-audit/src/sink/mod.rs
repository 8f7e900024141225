// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuditSinkError;
use crate::event::{AuditAction, AuditEvent, AuditSeverity};

pub mod memory;

#[cfg(feature = "sink-sqlite")]
pub mod sqlite;

#[cfg(feature = "sink-tracing")]
pub mod tracing;

pub const DEFAULT_QUERY_LIMIT: u32 = 50;
pub const MAX_QUERY_LIMIT: u32 = 1000;

/// Append-only destination for dispatched events.
#[async_trait]
pub trait AuditSink: Send + Sync {
	fn name(&self) -> &str;

	async fn publish(&self, event: Arc<AuditEvent>) -> Result<(), AuditSinkError>;

	async fn health_check(&self) -> Result<(), AuditSinkError> {
		Ok(())
	}
}

/// Read side of durable storage.
#[async_trait]
pub trait AuditStore: Send + Sync {
	async fn query(&self, query: &AuditQuery) -> Result<AuditPage, AuditSinkError>;
}

/// Filters for [`AuditStore::query`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditQuery {
	pub resource: Option<String>,
	pub resource_id: Option<String>,
	pub actor_id: Option<String>,
	pub school_id: Option<String>,
	/// Severity floor, inclusive.
	pub min_severity: Option<AuditSeverity>,
	pub action: Option<AuditAction>,
	/// Inclusive lower bound.
	pub since: Option<DateTime<Utc>>,
	/// Exclusive upper bound.
	pub until: Option<DateTime<Utc>>,
	pub limit: Option<u32>,
	pub offset: u32,
}

impl AuditQuery {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn resource(mut self, resource: impl Into<String>) -> Self {
		self.resource = Some(resource.into());
		self
	}

	pub fn resource_id(mut self, resource_id: impl Into<String>) -> Self {
		self.resource_id = Some(resource_id.into());
		self
	}

	pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
		self.actor_id = Some(actor_id.into());
		self
	}

	pub fn school(mut self, school_id: impl Into<String>) -> Self {
		self.school_id = Some(school_id.into());
		self
	}

	pub fn min_severity(mut self, severity: AuditSeverity) -> Self {
		self.min_severity = Some(severity);
		self
	}

	pub fn action(mut self, action: AuditAction) -> Self {
		self.action = Some(action);
		self
	}

	pub fn since(mut self, since: DateTime<Utc>) -> Self {
		self.since = Some(since);
		self
	}

	pub fn until(mut self, until: DateTime<Utc>) -> Self {
		self.until = Some(until);
		self
	}

	pub fn limit(mut self, limit: u32) -> Self {
		self.limit = Some(limit);
		self
	}

	pub fn offset(mut self, offset: u32) -> Self {
		self.offset = offset;
		self
	}

	/// Page size after defaulting and clamping to `1..=MAX_QUERY_LIMIT`.
	pub fn effective_limit(&self) -> u32 {
		self
			.limit
			.unwrap_or(DEFAULT_QUERY_LIMIT)
			.clamp(1, MAX_QUERY_LIMIT)
	}

	pub fn matches(&self, event: &AuditEvent) -> bool {
		fn eq(filter: &Option<String>, value: &str) -> bool {
			filter.as_deref().map_or(true, |f| f == value)
		}
		fn eq_opt(filter: &Option<String>, value: Option<&str>) -> bool {
			filter.as_deref().map_or(true, |f| value == Some(f))
		}

		eq(&self.resource, &event.resource)
			&& eq_opt(&self.resource_id, event.resource_id.as_deref())
			&& eq(&self.actor_id, &event.actor_id)
			&& eq_opt(&self.school_id, event.school_id.as_deref())
			&& self.min_severity.map_or(true, |s| event.severity >= s)
			&& self.action.map_or(true, |a| event.action == a)
			&& self.since.map_or(true, |t| event.timestamp >= t)
			&& self.until.map_or(true, |t| event.timestamp < t)
	}
}

/// One page of matching events, newest first, plus the total match count.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditPage {
	pub events: Vec<AuditEvent>,
	pub total: u64,
}
