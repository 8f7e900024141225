// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Bounded multi-consumer queue with a configurable overflow policy.
//!
//! `tokio::sync::mpsc` cannot evict its oldest entry, so the dispatcher uses
//! this `VecDeque` guarded by a `parking_lot::Mutex` and woken through a
//! [`Notify`].

use std::collections::VecDeque;

use parking_lot::Mutex;
use tokio::sync::Notify;

use campus_audit_config::QueueOverflowPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
	Accepted,
	/// The pushed item was discarded.
	DroppedNewest,
	/// The pushed item was accepted and the oldest queued one discarded.
	DroppedOldest,
	Closed,
}

struct State<T> {
	items: VecDeque<T>,
	closed: bool,
}

pub struct BoundedQueue<T> {
	state: Mutex<State<T>>,
	notify: Notify,
	capacity: usize,
	policy: QueueOverflowPolicy,
}

impl<T> BoundedQueue<T> {
	pub fn new(capacity: usize, policy: QueueOverflowPolicy) -> Self {
		let capacity = capacity.max(1);
		Self {
			state: Mutex::new(State {
				items: VecDeque::with_capacity(capacity.min(1024)),
				closed: false,
			}),
			notify: Notify::new(),
			capacity,
			policy,
		}
	}

	/// Never blocks.
	pub fn push(&self, item: T) -> PushOutcome {
		let outcome = {
			let mut state = self.state.lock();
			if state.closed {
				return PushOutcome::Closed;
			}
			if state.items.len() < self.capacity {
				state.items.push_back(item);
				PushOutcome::Accepted
			} else {
				match self.policy {
					QueueOverflowPolicy::DropNewest => return PushOutcome::DroppedNewest,
					QueueOverflowPolicy::DropOldest => {
						state.items.pop_front();
						state.items.push_back(item);
						PushOutcome::DroppedOldest
					}
				}
			}
		};
		self.notify.notify_one();
		outcome
	}

	/// Waits for the next item. Returns `None` once the queue is closed and
	/// drained.
	pub async fn pop(&self) -> Option<T> {
		loop {
			let notified = self.notify.notified();
			{
				let mut state = self.state.lock();
				if let Some(item) = state.items.pop_front() {
					if !state.items.is_empty() {
						self.notify.notify_one();
					}
					return Some(item);
				}
				if state.closed {
					return None;
				}
			}
			notified.await;
		}
	}

	/// Stop accepting items and wake every waiting consumer.
	pub fn close(&self) {
		self.state.lock().closed = true;
		self.notify.notify_waiters();
	}

	pub fn is_closed(&self) -> bool {
		self.state.lock().closed
	}

	pub fn len(&self) -> usize {
		self.state.lock().items.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn capacity(&self) -> usize {
		self.capacity
	}
}
