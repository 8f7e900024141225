// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process event store.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::AuditSinkError;
use crate::event::AuditEvent;
use crate::sink::{AuditPage, AuditQuery, AuditSink, AuditStore};

/// Keeps the most recent events in memory. Implements both the write and the
/// query side, so it backs tests and single-process deployments.
///
/// When `capacity` is reached the oldest event is evicted.
pub struct MemoryAuditSink {
	events: RwLock<VecDeque<Arc<AuditEvent>>>,
	capacity: Option<usize>,
	name: String,
}

impl MemoryAuditSink {
	pub fn new() -> Self {
		Self {
			events: RwLock::new(VecDeque::new()),
			capacity: None,
			name: "memory".to_string(),
		}
	}

	pub fn with_capacity(capacity: usize) -> Self {
		Self {
			events: RwLock::new(VecDeque::with_capacity(capacity)),
			capacity: Some(capacity),
			name: "memory".to_string(),
		}
	}

	/// Stored events in arrival order.
	pub fn events(&self) -> Vec<Arc<AuditEvent>> {
		self.events.read().iter().cloned().collect()
	}

	pub fn len(&self) -> usize {
		self.events.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.events.read().is_empty()
	}

	pub fn clear(&self) {
		self.events.write().clear();
	}
}

impl Default for MemoryAuditSink {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
	fn name(&self) -> &str {
		&self.name
	}

	async fn publish(&self, event: Arc<AuditEvent>) -> Result<(), AuditSinkError> {
		let mut events = self.events.write();
		if let Some(capacity) = self.capacity {
			while events.len() >= capacity.max(1) {
				events.pop_front();
			}
		}
		events.push_back(event);
		Ok(())
	}
}

#[async_trait]
impl AuditStore for MemoryAuditSink {
	async fn query(&self, query: &AuditQuery) -> Result<AuditPage, AuditSinkError> {
		let events = self.events.read();

		let mut matching: Vec<&Arc<AuditEvent>> =
			events.iter().filter(|e| query.matches(e)).collect();
		matching.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

		let total = matching.len() as u64;
		let page = matching
			.into_iter()
			.skip(query.offset as usize)
			.take(query.effective_limit() as usize)
			.map(|e| AuditEvent::clone(e))
			.collect();

		Ok(AuditPage {
			events: page,
			total,
		})
	}
}
