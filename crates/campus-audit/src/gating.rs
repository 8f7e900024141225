// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Decides whether a completed invocation produces an audit event.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::event::AuditSeverity;
use crate::policy::ResolvedPolicy;

/// Source of uniform draws in `[0, 1)`.
pub trait RandomSource: Send + Sync {
	fn next_f64(&self) -> f64;
}

/// Thread-local `rand` generator.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRngSource;

impl RandomSource for ThreadRngSource {
	fn next_f64(&self) -> f64 {
		rand::thread_rng().gen::<f64>()
	}
}

/// Always returns the same draw.
#[derive(Debug, Clone, Copy)]
pub struct FixedRandom(pub f64);

impl RandomSource for FixedRandom {
	fn next_f64(&self) -> f64 {
		self.0
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatingReason {
	SampledIn,
	SampledOut,
	ThresholdExceeded,
	SeverityForced,
}

impl GatingReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			GatingReason::SampledIn => "sampled_in",
			GatingReason::SampledOut => "sampled_out",
			GatingReason::ThresholdExceeded => "threshold_exceeded",
			GatingReason::SeverityForced => "severity_forced",
		}
	}
}

impl fmt::Display for GatingReason {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatingDecision {
	pub record: bool,
	pub reason: GatingReason,
}

impl GatingDecision {
	fn record(reason: GatingReason) -> Self {
		Self {
			record: true,
			reason,
		}
	}

	fn skip(reason: GatingReason) -> Self {
		Self {
			record: false,
			reason,
		}
	}
}

/// Severity forcing beats the latency threshold, which beats sampling. The
/// random source is only consulted when neither applies.
pub fn decide(
	policy: &ResolvedPolicy,
	elapsed_ms: u64,
	severity: AuditSeverity,
	rng: &dyn RandomSource,
) -> GatingDecision {
	if severity.is_forced() {
		return GatingDecision::record(GatingReason::SeverityForced);
	}

	if matches!(policy.performance_threshold_ms, Some(threshold) if elapsed_ms > threshold) {
		return GatingDecision::record(GatingReason::ThresholdExceeded);
	}

	if rng.next_f64() < policy.sampling_rate {
		GatingDecision::record(GatingReason::SampledIn)
	} else {
		GatingDecision::skip(GatingReason::SampledOut)
	}
}
