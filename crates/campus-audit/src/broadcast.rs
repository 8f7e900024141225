// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Live fan-out of audit events to connected subscribers.
//!
//! Delivery is at-most-once with no replay. A subscriber whose queue is full,
//! whose receiver is gone, or whose callback fails or panics is evicted
//! without affecting the others.

use std::collections::HashMap;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::debug;

use crate::event::{AuditEvent, AuditSeverity};

pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "sub-{}", self.0)
	}
}

/// Restricts which events a subscriber sees. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionFilter {
	pub min_severity: Option<AuditSeverity>,
	pub resource: Option<String>,
	pub school_id: Option<String>,
}

impl SubscriptionFilter {
	pub fn all() -> Self {
		Self::default()
	}

	pub fn min_severity(mut self, severity: AuditSeverity) -> Self {
		self.min_severity = Some(severity);
		self
	}

	pub fn resource(mut self, resource: impl Into<String>) -> Self {
		self.resource = Some(resource.into());
		self
	}

	pub fn school(mut self, school_id: impl Into<String>) -> Self {
		self.school_id = Some(school_id.into());
		self
	}

	pub fn matches(&self, event: &AuditEvent) -> bool {
		if let Some(min) = self.min_severity {
			if event.severity < min {
				return false;
			}
		}
		if let Some(resource) = &self.resource {
			if &event.resource != resource {
				return false;
			}
		}
		if let Some(school) = &self.school_id {
			if event.school_id.as_ref() != Some(school) {
				return false;
			}
		}
		true
	}
}

#[derive(Debug, thiserror::Error)]
#[error("subscriber rejected event: {0}")]
pub struct DeliveryError(pub String);

type Callback = Box<dyn Fn(Arc<AuditEvent>) -> Result<(), DeliveryError> + Send + Sync>;

enum Delivery {
	Queue(mpsc::Sender<Arc<AuditEvent>>),
	Callback(Callback),
}

struct Subscriber {
	filter: SubscriptionFilter,
	delivery: Delivery,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EvictReason {
	QueueFull,
	Closed,
	CallbackFailed,
	CallbackPanicked,
}

impl Subscriber {
	fn deliver(&self, event: &Arc<AuditEvent>) -> Result<(), EvictReason> {
		match &self.delivery {
			Delivery::Queue(tx) => match tx.try_send(Arc::clone(event)) {
				Ok(()) => Ok(()),
				Err(TrySendError::Full(_)) => Err(EvictReason::QueueFull),
				Err(TrySendError::Closed(_)) => Err(EvictReason::Closed),
			},
			Delivery::Callback(callback) => {
				let event = Arc::clone(event);
				match panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
					Ok(Ok(())) => Ok(()),
					Ok(Err(_)) => Err(EvictReason::CallbackFailed),
					Err(_) => Err(EvictReason::CallbackPanicked),
				}
			}
		}
	}
}

struct HubInner {
	subscribers: RwLock<HashMap<SubscriberId, Arc<Subscriber>>>,
	next_id: AtomicU64,
	buffer: usize,
}

impl HubInner {
	fn remove(&self, id: SubscriberId) -> bool {
		self.subscribers.write().remove(&id).is_some()
	}
}

/// Registry of live subscribers. Cheap to clone.
#[derive(Clone)]
pub struct BroadcastHub {
	inner: Arc<HubInner>,
}

impl BroadcastHub {
	/// `buffer` is the per-subscriber queue depth.
	pub fn new(buffer: usize) -> Self {
		Self {
			inner: Arc::new(HubInner {
				subscribers: RwLock::new(HashMap::new()),
				next_id: AtomicU64::new(1),
				buffer: buffer.max(1),
			}),
		}
	}

	fn register(&self, filter: SubscriptionFilter, delivery: Delivery) -> SubscriberId {
		let id = SubscriberId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
		self
			.inner
			.subscribers
			.write()
			.insert(id, Arc::new(Subscriber { filter, delivery }));
		debug!(subscriber = %id, "audit subscriber connected");
		id
	}

	/// Connect a queue-backed subscriber. Dropping the returned
	/// [`Subscription`] disconnects it.
	pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscription {
		let (tx, rx) = mpsc::channel(self.inner.buffer);
		let id = self.register(filter, Delivery::Queue(tx));
		Subscription {
			id,
			rx,
			hub: Arc::downgrade(&self.inner),
		}
	}

	/// Connect a callback subscriber. The callback runs on the dispatcher's
	/// assembly task and must not block. Returning `Err` or panicking evicts it.
	pub fn subscribe_callback<F>(&self, filter: SubscriptionFilter, callback: F) -> SubscriberId
	where
		F: Fn(Arc<AuditEvent>) -> Result<(), DeliveryError> + Send + Sync + 'static,
	{
		self.register(filter, Delivery::Callback(Box::new(callback)))
	}

	pub fn unsubscribe(&self, id: SubscriberId) -> bool {
		let removed = self.inner.remove(id);
		if removed {
			debug!(subscriber = %id, "audit subscriber disconnected");
		}
		removed
	}

	pub fn subscriber_count(&self) -> usize {
		self.inner.subscribers.read().len()
	}

	/// Deliver `event` to every matching subscriber. Returns how many
	/// accepted it.
	pub fn publish(&self, event: &Arc<AuditEvent>) -> usize {
		let targets: Vec<(SubscriberId, Arc<Subscriber>)> = self
			.inner
			.subscribers
			.read()
			.iter()
			.filter(|(_, sub)| sub.filter.matches(event))
			.map(|(id, sub)| (*id, Arc::clone(sub)))
			.collect();

		let mut delivered = 0;
		let mut evicted = Vec::new();
		for (id, subscriber) in targets {
			match subscriber.deliver(event) {
				Ok(()) => delivered += 1,
				Err(reason) => evicted.push((id, reason)),
			}
		}

		if !evicted.is_empty() {
			let mut subscribers = self.inner.subscribers.write();
			for (id, reason) in evicted {
				if subscribers.remove(&id).is_some() {
					debug!(subscriber = %id, reason = ?reason, "audit subscriber evicted");
				}
			}
		}

		delivered
	}
}

impl Default for BroadcastHub {
	fn default() -> Self {
		Self::new(DEFAULT_SUBSCRIBER_BUFFER)
	}
}

impl fmt::Debug for BroadcastHub {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("BroadcastHub")
			.field("subscribers", &self.subscriber_count())
			.field("buffer", &self.inner.buffer)
			.finish()
	}
}

/// Receiving half of a queue-backed subscriber.
pub struct Subscription {
	id: SubscriberId,
	rx: mpsc::Receiver<Arc<AuditEvent>>,
	hub: Weak<HubInner>,
}

impl Subscription {
	pub fn id(&self) -> SubscriberId {
		self.id
	}

	/// Next event, or `None` once the subscriber has been evicted and its
	/// queue is drained.
	pub async fn recv(&mut self) -> Option<Arc<AuditEvent>> {
		self.rx.recv().await
	}

	pub fn try_recv(&mut self) -> Option<Arc<AuditEvent>> {
		self.rx.try_recv().ok()
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(hub) = self.hub.upgrade() {
			if hub.remove(self.id) {
				debug!(subscriber = %self.id, "audit subscriber disconnected");
			}
		}
	}
}

impl fmt::Debug for Subscription {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Subscription").field("id", &self.id).finish()
	}
}
