// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy-driven audit pipeline for the campus administration backend.
//!
//! Operations declare an [`AuditPolicy`] in a [`PolicyRegistry`] at startup
//! and run through an [`AuditInterceptor`]. Accepted invocations are handed
//! to the [`AuditDispatcher`], which redacts them into [`AuditEvent`]s off
//! the caller's path, writes them to [`AuditSink`]s and fans them out live
//! through a [`BroadcastHub`].

pub mod broadcast;
pub mod capture;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod gating;
pub mod interceptor;
pub mod policy;
pub mod queue;
pub mod redaction;
pub mod registry;
pub mod service;
pub mod sink;

pub use broadcast::{
	BroadcastHub, DeliveryError, SubscriberId, Subscription, SubscriptionFilter,
	DEFAULT_SUBSCRIBER_BUFFER,
};
pub use capture::{CapturedInvocation, EventAssembler};
pub use context::AuditContext;
pub use dispatcher::{
	AuditDispatcher, DispatcherConfig, DispatcherStats, EventDispatch, RetryPolicy,
};
pub use error::{AuditError, AuditResult, AuditSinkError, PolicyError};
pub use event::{
	storage_timestamp, AuditAction, AuditEvent, AuditEventBuilder, AuditOutcome, AuditSeverity,
	UnknownVariant, SYSTEM_ACTOR,
};
pub use gating::{decide, FixedRandom, GatingDecision, GatingReason, RandomSource, ThreadRngSource};
pub use interceptor::AuditInterceptor;
pub use policy::{AuditPolicy, AuditPolicyBuilder, ResolvedPolicy, ResourceRef};
pub use redaction::{redact, Redacted, Redactor, SensitiveFields, REDACTED, TRUNCATED};
pub use registry::{PolicyRegistry, PolicyRegistryBuilder};
pub use service::{AuditService, AuditServiceBuilder};
pub use sink::memory::MemoryAuditSink;
pub use sink::{AuditPage, AuditQuery, AuditSink, AuditStore, DEFAULT_QUERY_LIMIT, MAX_QUERY_LIMIT};

pub use campus_audit_config::{AuditConfig, QueueOverflowPolicy, SensitiveFieldMode};

#[cfg(feature = "sink-sqlite")]
pub use sink::sqlite::SqliteAuditSink;

#[cfg(feature = "sink-tracing")]
pub use sink::tracing::TracingAuditSink;
