// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use tracing::info;

use campus_audit_config::AuditConfig;

use crate::broadcast::BroadcastHub;
use crate::capture::EventAssembler;
use crate::dispatcher::{AuditDispatcher, DispatcherConfig, DispatcherStats};
use crate::gating::{RandomSource, ThreadRngSource};
use crate::interceptor::AuditInterceptor;
use crate::redaction::Redactor;
use crate::registry::PolicyRegistry;
use crate::sink::AuditSink;

/// The assembled pipeline: policy registry, interceptor, dispatcher and
/// broadcast hub.
pub struct AuditService {
	interceptor: Arc<AuditInterceptor>,
	dispatcher: Arc<AuditDispatcher>,
	hub: BroadcastHub,
}

impl AuditService {
	pub fn builder(config: AuditConfig) -> AuditServiceBuilder {
		AuditServiceBuilder::new(config)
	}

	/// Must be called within a Tokio runtime.
	pub fn from_config(
		config: &AuditConfig,
		registry: PolicyRegistry,
		sinks: Vec<Arc<dyn AuditSink>>,
	) -> Self {
		Self::builder(config.clone())
			.registry(registry)
			.sinks(sinks)
			.build()
	}

	pub fn interceptor(&self) -> Arc<AuditInterceptor> {
		Arc::clone(&self.interceptor)
	}

	pub fn hub(&self) -> &BroadcastHub {
		&self.hub
	}

	pub fn stats(&self) -> DispatcherStats {
		self.dispatcher.stats()
	}

	/// Stop accepting events and wait for queued ones to reach the sinks.
	pub async fn shutdown(&self) {
		self.dispatcher.shutdown().await;
	}
}

pub struct AuditServiceBuilder {
	config: AuditConfig,
	registry: PolicyRegistry,
	sinks: Vec<Arc<dyn AuditSink>>,
	rng: Arc<dyn RandomSource>,
}

impl AuditServiceBuilder {
	pub fn new(config: AuditConfig) -> Self {
		Self {
			config,
			registry: PolicyRegistry::default(),
			sinks: Vec::new(),
			rng: Arc::new(ThreadRngSource),
		}
	}

	pub fn registry(mut self, registry: PolicyRegistry) -> Self {
		self.registry = registry;
		self
	}

	pub fn sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
		self.sinks.push(sink);
		self
	}

	pub fn sinks(mut self, sinks: Vec<Arc<dyn AuditSink>>) -> Self {
		self.sinks.extend(sinks);
		self
	}

	pub fn random_source(mut self, rng: Arc<dyn RandomSource>) -> Self {
		self.rng = rng;
		self
	}

	/// Spawns the dispatcher tasks. Must be called within a Tokio runtime.
	pub fn build(self) -> AuditService {
		let hub = BroadcastHub::new(self.config.subscriber_buffer);
		let sink_names: Vec<String> = self.sinks.iter().map(|s| s.name().to_string()).collect();
		let dispatcher = Arc::new(AuditDispatcher::spawn(
			DispatcherConfig::from_config(&self.config),
			EventAssembler::new(Redactor::from_config(&self.config)),
			self.sinks,
			hub.clone(),
		));

		let interceptor = AuditInterceptor::new(Arc::new(self.registry), dispatcher.clone())
			.with_random_source(self.rng)
			.with_enabled(self.config.enabled)
			.with_escalate_failures(self.config.escalate_failures);

		info!(
			enabled = self.config.enabled,
			policies = interceptor.registry().len(),
			sinks = ?sink_names,
			"audit service started"
		);

		AuditService {
			interceptor: Arc::new(interceptor),
			dispatcher,
			hub,
		}
	}
}
