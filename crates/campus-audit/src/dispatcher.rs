// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Asynchronous assembly and hand-off of accepted invocations.
//!
//! [`AuditDispatcher::dispatch`] only pushes a [`CapturedInvocation`] into a
//! bounded intake queue and returns. A single assembly task drains it in
//! order: it redacts and builds each [`AuditEvent`], queues it for
//! persistence and publishes it to the [`BroadcastHub`], so subscribers
//! observe dispatch order. A pool of persistence workers drains the second
//! queue into every configured [`AuditSink`], retrying transient failures
//! with exponential backoff.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument, warn};

use campus_audit_config::{AuditConfig, QueueOverflowPolicy};

use crate::broadcast::BroadcastHub;
use crate::capture::{CapturedInvocation, EventAssembler};
use crate::error::{panic_message, AuditError, AuditResult, AuditSinkError};
use crate::event::AuditEvent;
use crate::queue::{BoundedQueue, PushOutcome};
use crate::sink::AuditSink;

const RETRY_FACTOR: f64 = 2.0;

/// Where the interceptor hands accepted invocations.
///
/// Implementations run on the caller's path and must not block.
pub trait EventDispatch: Send + Sync {
	fn dispatch(&self, captured: CapturedInvocation) -> AuditResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
	/// Retries after the first attempt.
	pub max_attempts: u32,
	pub base_delay: Duration,
	pub max_delay: Duration,
}

impl RetryPolicy {
	/// Delay before retry number `retry` (1-based): `base * 2^(retry-1)`,
	/// capped at `max_delay`.
	pub fn delay_for(&self, retry: u32) -> Duration {
		let exp = retry.saturating_sub(1).min(63) as i32;
		let delay_ms = self.base_delay.as_millis() as f64 * RETRY_FACTOR.powi(exp);
		let max_ms = self.max_delay.as_millis() as f64;
		Duration::from_millis(delay_ms.min(max_ms) as u64)
	}
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self {
			max_attempts: 3,
			base_delay: Duration::from_millis(100),
			max_delay: Duration::from_millis(5000),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
	pub queue_capacity: usize,
	pub overflow_policy: QueueOverflowPolicy,
	pub worker_count: usize,
	pub retry: RetryPolicy,
}

impl DispatcherConfig {
	pub fn from_config(config: &AuditConfig) -> Self {
		Self {
			queue_capacity: config.queue_capacity,
			overflow_policy: config.queue_overflow_policy,
			worker_count: config.worker_count,
			retry: RetryPolicy {
				max_attempts: config.retry_max_attempts,
				base_delay: Duration::from_millis(config.retry_base_delay_ms),
				max_delay: Duration::from_millis(config.retry_max_delay_ms),
			},
		}
	}
}

impl Default for DispatcherConfig {
	fn default() -> Self {
		Self::from_config(&AuditConfig::default())
	}
}

/// Point-in-time counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
	/// Invocations accepted into the intake queue.
	pub dispatched: u64,
	/// Invocations discarded because the intake queue was full.
	pub dropped: u64,
	/// Events built from accepted invocations.
	pub assembled: u64,
	/// Invocations whose assembly panicked.
	pub assembly_failed: u64,
	/// Events discarded because the persistence queue was full.
	pub dropped_persistence: u64,
	/// Successful sink writes, counted per sink.
	pub persisted: u64,
	pub retried: u64,
	/// Sink writes abandoned after a permanent error or exhausted retries.
	pub failed: u64,
	pub broadcast: u64,
}

#[derive(Default)]
struct Counters {
	dispatched: AtomicU64,
	dropped: AtomicU64,
	assembled: AtomicU64,
	assembly_failed: AtomicU64,
	dropped_persistence: AtomicU64,
	persisted: AtomicU64,
	retried: AtomicU64,
	failed: AtomicU64,
	broadcast: AtomicU64,
}

impl Counters {
	fn incr(counter: &AtomicU64) {
		counter.fetch_add(1, Ordering::Relaxed);
	}

	fn snapshot(&self) -> DispatcherStats {
		DispatcherStats {
			dispatched: self.dispatched.load(Ordering::Relaxed),
			dropped: self.dropped.load(Ordering::Relaxed),
			assembled: self.assembled.load(Ordering::Relaxed),
			assembly_failed: self.assembly_failed.load(Ordering::Relaxed),
			dropped_persistence: self.dropped_persistence.load(Ordering::Relaxed),
			persisted: self.persisted.load(Ordering::Relaxed),
			retried: self.retried.load(Ordering::Relaxed),
			failed: self.failed.load(Ordering::Relaxed),
			broadcast: self.broadcast.load(Ordering::Relaxed),
		}
	}
}

pub struct AuditDispatcher {
	intake: Arc<BoundedQueue<CapturedInvocation>>,
	persistence: Arc<BoundedQueue<Arc<AuditEvent>>>,
	counters: Arc<Counters>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AuditDispatcher {
	/// Start the assembly task and the persistence workers. Must be called
	/// within a Tokio runtime.
	pub fn spawn(
		config: DispatcherConfig,
		assembler: EventAssembler,
		sinks: Vec<Arc<dyn AuditSink>>,
		hub: BroadcastHub,
	) -> Self {
		let intake = Arc::new(BoundedQueue::new(
			config.queue_capacity,
			config.overflow_policy,
		));
		let persistence = Arc::new(BoundedQueue::new(
			config.queue_capacity,
			config.overflow_policy,
		));
		let counters = Arc::new(Counters::default());
		let sinks: Arc<[Arc<dyn AuditSink>]> = sinks.into();

		let worker_count = config.worker_count.max(1);
		let mut tasks = Vec::with_capacity(worker_count + 1);
		tasks.push(tokio::spawn(assembly_worker(
			Arc::clone(&intake),
			Arc::clone(&persistence),
			assembler,
			hub,
			Arc::clone(&counters),
		)));
		for worker in 0..worker_count {
			tasks.push(tokio::spawn(persistence_worker(
				worker,
				Arc::clone(&persistence),
				Arc::clone(&sinks),
				config.retry,
				Arc::clone(&counters),
			)));
		}

		debug!(
			workers = worker_count,
			sinks = sinks.len(),
			queue_capacity = config.queue_capacity,
			"audit dispatcher started"
		);

		Self {
			intake,
			persistence,
			counters,
			tasks: Mutex::new(tasks),
		}
	}

	/// Queue `captured` for assembly, persistence and broadcast. Never
	/// blocks.
	///
	/// Returns [`AuditError::QueueFull`] when the intake queue dropped this
	/// invocation and [`AuditError::Shutdown`] after [`Self::shutdown`].
	#[instrument(skip_all, fields(operation = %captured.operation))]
	pub fn dispatch_invocation(&self, captured: CapturedInvocation) -> AuditResult<()> {
		match self.intake.push(captured) {
			PushOutcome::Accepted => {
				Counters::incr(&self.counters.dispatched);
				Ok(())
			}
			PushOutcome::DroppedOldest => {
				Counters::incr(&self.counters.dispatched);
				Counters::incr(&self.counters.dropped);
				warn!("audit queue full, dropped oldest invocation");
				Ok(())
			}
			PushOutcome::DroppedNewest => {
				Counters::incr(&self.counters.dropped);
				warn!("audit queue full, dropped invocation");
				Err(AuditError::QueueFull)
			}
			PushOutcome::Closed => Err(AuditError::Shutdown),
		}
	}

	pub fn stats(&self) -> DispatcherStats {
		self.counters.snapshot()
	}

	/// Invocations and events not yet handled by a worker.
	pub fn pending(&self) -> usize {
		self.intake.len() + self.persistence.len()
	}

	/// Stop accepting invocations and wait until both queues are drained.
	///
	/// The assembly task closes the persistence queue once the intake queue
	/// is empty, so every accepted invocation still reaches the sinks.
	pub async fn shutdown(&self) {
		self.intake.close();

		let tasks = std::mem::take(&mut *self.tasks.lock());
		for task in tasks {
			if let Err(e) = task.await {
				error!(error = %e, "audit dispatcher task failed");
			}
		}
		debug!(stats = ?self.stats(), "audit dispatcher stopped");
	}
}

impl EventDispatch for AuditDispatcher {
	fn dispatch(&self, captured: CapturedInvocation) -> AuditResult<()> {
		self.dispatch_invocation(captured)
	}
}

impl Drop for AuditDispatcher {
	fn drop(&mut self) {
		self.intake.close();
		self.persistence.close();
	}
}

async fn assembly_worker(
	intake: Arc<BoundedQueue<CapturedInvocation>>,
	persistence: Arc<BoundedQueue<Arc<AuditEvent>>>,
	assembler: EventAssembler,
	hub: BroadcastHub,
	counters: Arc<Counters>,
) {
	while let Some(captured) = intake.pop().await {
		let operation = captured.operation.clone();
		let event = match panic::catch_unwind(AssertUnwindSafe(|| assembler.assemble(captured))) {
			Ok(event) => Arc::new(event),
			Err(panic) => {
				Counters::incr(&counters.assembly_failed);
				error!(
					operation = %operation,
					panic = %panic_message(&*panic),
					"audit event assembly panicked"
				);
				continue;
			}
		};
		Counters::incr(&counters.assembled);

		match persistence.push(Arc::clone(&event)) {
			PushOutcome::Accepted => {}
			PushOutcome::DroppedNewest | PushOutcome::DroppedOldest => {
				Counters::incr(&counters.dropped_persistence);
				warn!(operation = %operation, "audit persistence queue full, dropped event");
			}
			PushOutcome::Closed => {
				Counters::incr(&counters.dropped_persistence);
				debug!(operation = %operation, "audit persistence queue closed");
			}
		}

		hub.publish(&event);
		Counters::incr(&counters.broadcast);
	}
	persistence.close();
	debug!("audit assembly task stopped");
}

async fn persistence_worker(
	worker: usize,
	queue: Arc<BoundedQueue<Arc<AuditEvent>>>,
	sinks: Arc<[Arc<dyn AuditSink>]>,
	retry: RetryPolicy,
	counters: Arc<Counters>,
) {
	while let Some(event) = queue.pop().await {
		for sink in sinks.iter() {
			match publish_with_retry(sink.as_ref(), &event, &retry, &counters).await {
				Ok(()) => Counters::incr(&counters.persisted),
				Err(e) => {
					Counters::incr(&counters.failed);
					warn!(
						sink = sink.name(),
						event_id = %event.id,
						operation = %event.operation,
						error = %e,
						"audit event dropped by sink"
					);
				}
			}
		}
	}
	debug!(worker, "audit persistence worker stopped");
}

async fn publish_with_retry(
	sink: &dyn AuditSink,
	event: &Arc<AuditEvent>,
	retry: &RetryPolicy,
	counters: &Counters,
) -> Result<(), AuditError> {
	let mut retry_count = 0u32;

	loop {
		let attempt = AssertUnwindSafe(sink.publish(Arc::clone(event)))
			.catch_unwind()
			.await;

		let err = match attempt {
			Ok(Ok(())) => return Ok(()),
			Ok(Err(e)) => e,
			Err(_) => AuditSinkError::Permanent("sink panicked".to_string()),
		};

		if err.is_transient() && retry_count < retry.max_attempts {
			retry_count += 1;
			Counters::incr(&counters.retried);
			let delay = retry.delay_for(retry_count);
			debug!(
				sink = sink.name(),
				retry_count,
				delay_ms = delay.as_millis() as u64,
				error = %err,
				"audit sink failed, retrying"
			);
			tokio::time::sleep(delay).await;
			continue;
		}

		return Err(AuditError::SinkError {
			sink: sink.name().to_string(),
			source: err,
		});
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::broadcast::SubscriptionFilter;
	use crate::capture::testing::captured;
	use crate::sink::memory::MemoryAuditSink;
	use async_trait::async_trait;
	use serde_json::json;
	use std::sync::atomic::AtomicUsize;

	fn spawn(config: DispatcherConfig, sinks: Vec<Arc<dyn AuditSink>>) -> AuditDispatcher {
		AuditDispatcher::spawn(config, EventAssembler::default(), sinks, BroadcastHub::default())
	}

	fn config(capacity: usize, workers: usize) -> DispatcherConfig {
		DispatcherConfig {
			queue_capacity: capacity,
			overflow_policy: QueueOverflowPolicy::DropNewest,
			worker_count: workers,
			retry: RetryPolicy {
				max_attempts: 3,
				base_delay: Duration::from_millis(1),
				max_delay: Duration::from_millis(5),
			},
		}
	}

	/// Fails transiently `failures` times, then succeeds.
	struct FlakySink {
		failures: usize,
		calls: AtomicUsize,
		transient: bool,
	}

	impl FlakySink {
		fn new(failures: usize, transient: bool) -> Self {
			Self {
				failures,
				calls: AtomicUsize::new(0),
				transient,
			}
		}

		fn calls(&self) -> usize {
			self.calls.load(Ordering::SeqCst)
		}
	}

	#[async_trait]
	impl AuditSink for FlakySink {
		fn name(&self) -> &str {
			"flaky"
		}

		async fn publish(&self, _event: Arc<AuditEvent>) -> Result<(), AuditSinkError> {
			let call = self.calls.fetch_add(1, Ordering::SeqCst);
			if call < self.failures {
				if self.transient {
					return Err(AuditSinkError::Transient("database is locked".to_string()));
				}
				return Err(AuditSinkError::Permanent("no such table".to_string()));
			}
			Ok(())
		}
	}

	struct PanickingSink;

	#[async_trait]
	impl AuditSink for PanickingSink {
		fn name(&self) -> &str {
			"panicking"
		}

		async fn publish(&self, _event: Arc<AuditEvent>) -> Result<(), AuditSinkError> {
			panic!("sink bug");
		}
	}

	#[test]
	fn backoff_doubles_and_caps() {
		let retry = RetryPolicy {
			max_attempts: 10,
			base_delay: Duration::from_millis(100),
			max_delay: Duration::from_millis(1000),
		};
		assert_eq!(retry.delay_for(1), Duration::from_millis(100));
		assert_eq!(retry.delay_for(2), Duration::from_millis(200));
		assert_eq!(retry.delay_for(3), Duration::from_millis(400));
		assert_eq!(retry.delay_for(5), Duration::from_millis(1000));
		assert_eq!(retry.delay_for(100), Duration::from_millis(1000));
	}

	#[test]
	fn config_maps_audit_settings() {
		let config = DispatcherConfig::from_config(&AuditConfig::default());
		assert_eq!(config.queue_capacity, 10_000);
		assert_eq!(config.worker_count, 2);
		assert_eq!(config.retry.max_attempts, 3);
		assert_eq!(config.retry.base_delay, Duration::from_millis(100));
	}

	#[tokio::test]
	async fn dispatch_reaches_every_sink_and_subscriber() {
		let first = Arc::new(MemoryAuditSink::new());
		let second = Arc::new(MemoryAuditSink::new());
		let hub = BroadcastHub::new(16);
		let mut sub = hub.subscribe(SubscriptionFilter::all());

		let dispatcher = AuditDispatcher::spawn(
			config(16, 2),
			EventAssembler::default(),
			vec![first.clone(), second.clone()],
			hub,
		);
		dispatcher.dispatch_invocation(captured("staff")).unwrap();
		dispatcher.shutdown().await;

		assert_eq!(first.len(), 1);
		assert_eq!(second.len(), 1);
		assert_eq!(sub.recv().await.unwrap().resource, "staff");
		let stats = dispatcher.stats();
		assert_eq!(stats.dispatched, 1);
		assert_eq!(stats.assembled, 1);
		assert_eq!(stats.persisted, 2);
		assert_eq!(stats.broadcast, 1);
	}

	#[tokio::test]
	async fn broadcast_preserves_dispatch_order() {
		let hub = BroadcastHub::new(64);
		let mut sub = hub.subscribe(SubscriptionFilter::all());
		let dispatcher =
			AuditDispatcher::spawn(config(64, 4), EventAssembler::default(), Vec::new(), hub);

		let mut expected = Vec::new();
		for i in 0..20 {
			let resource = format!("r{i}");
			dispatcher.dispatch_invocation(captured(&resource)).unwrap();
			expected.push(resource);
		}
		dispatcher.shutdown().await;

		let mut received = Vec::new();
		while let Some(e) = sub.try_recv() {
			received.push(e.resource.clone());
		}
		assert_eq!(received, expected);
	}

	#[tokio::test]
	async fn transient_failures_are_retried() {
		let sink = Arc::new(FlakySink::new(2, true));
		let dispatcher =
			spawn(config(4, 1), vec![sink.clone()]);

		dispatcher.dispatch_invocation(captured("staff")).unwrap();
		dispatcher.shutdown().await;

		assert_eq!(sink.calls(), 3);
		let stats = dispatcher.stats();
		assert_eq!(stats.retried, 2);
		assert_eq!(stats.persisted, 1);
		assert_eq!(stats.failed, 0);
	}

	#[tokio::test]
	async fn retries_are_bounded() {
		let sink = Arc::new(FlakySink::new(usize::MAX, true));
		let dispatcher =
			spawn(config(4, 1), vec![sink.clone()]);

		dispatcher.dispatch_invocation(captured("staff")).unwrap();
		dispatcher.shutdown().await;

		assert_eq!(sink.calls(), 4);
		assert_eq!(dispatcher.stats().failed, 1);
	}

	#[tokio::test]
	async fn permanent_failures_are_not_retried() {
		let sink = Arc::new(FlakySink::new(1, false));
		let dispatcher =
			spawn(config(4, 1), vec![sink.clone()]);

		dispatcher.dispatch_invocation(captured("staff")).unwrap();
		dispatcher.shutdown().await;

		assert_eq!(sink.calls(), 1);
		assert_eq!(dispatcher.stats().failed, 1);
	}

	#[tokio::test]
	async fn panicking_sink_does_not_stop_other_sinks() {
		let memory = Arc::new(MemoryAuditSink::new());
		let dispatcher = spawn(config(4, 1), vec![Arc::new(PanickingSink), memory.clone()]);

		dispatcher.dispatch_invocation(captured("staff")).unwrap();
		dispatcher.dispatch_invocation(captured("student")).unwrap();
		dispatcher.shutdown().await;

		assert_eq!(memory.len(), 2);
		assert_eq!(dispatcher.stats().failed, 2);
	}

	#[tokio::test(flavor = "current_thread")]
	async fn overflow_drops_newest_and_counts() {
		// The assembly task cannot run until this task yields, so intake fills.
		let memory = Arc::new(MemoryAuditSink::new());
		let dispatcher =
			spawn(config(2, 1), vec![memory.clone()]);

		assert!(dispatcher.dispatch_invocation(captured("a")).is_ok());
		assert!(dispatcher.dispatch_invocation(captured("b")).is_ok());
		assert!(matches!(
			dispatcher.dispatch_invocation(captured("c")),
			Err(AuditError::QueueFull)
		));

		dispatcher.shutdown().await;
		let stats = dispatcher.stats();
		assert_eq!(stats.dispatched, 2);
		assert_eq!(stats.dropped, 1);
		assert_eq!(stats.assembled, 2);
		assert_eq!(stats.dropped_persistence, 0);
		assert_eq!(memory.len(), 2);
	}

	#[tokio::test(flavor = "current_thread")]
	async fn overflow_drops_oldest_when_configured() {
		let memory = Arc::new(MemoryAuditSink::new());
		let mut cfg = config(2, 1);
		cfg.overflow_policy = QueueOverflowPolicy::DropOldest;
		let dispatcher = spawn(cfg, vec![memory.clone()]);

		for resource in ["a", "b", "c"] {
			dispatcher.dispatch_invocation(captured(resource)).unwrap();
		}
		dispatcher.shutdown().await;

		let resources: Vec<String> = memory.events().iter().map(|e| e.resource.clone()).collect();
		assert_eq!(resources, vec!["b", "c"]);
		assert_eq!(dispatcher.stats().dropped, 1);
	}

	#[tokio::test]
	async fn dispatch_after_shutdown_is_rejected() {
		let dispatcher = spawn(config(4, 1), Vec::new());
		dispatcher.shutdown().await;
		assert!(matches!(
			dispatcher.dispatch_invocation(captured("staff")),
			Err(AuditError::Shutdown)
		));
	}

	#[tokio::test(flavor = "current_thread")]
	async fn assembly_runs_off_the_dispatch_path() {
		let memory = Arc::new(MemoryAuditSink::new());
		let dispatcher = spawn(config(4, 1), vec![memory.clone()]);

		let mut raw = captured("staff");
		raw.args = json!({"id": "staff-9", "salary": 72_000});
		dispatcher.dispatch_invocation(raw).unwrap();

		// Nothing has been built yet: the caller only queued the raw record.
		assert_eq!(dispatcher.stats().assembled, 0);
		assert_eq!(dispatcher.pending(), 1);

		dispatcher.shutdown().await;
		let events = memory.events();
		assert_eq!(events.len(), 1);
		assert_eq!(events[0].details["args"]["salary"], "[REDACTED]");
		assert_eq!(dispatcher.stats().assembled, 1);
	}
}
