// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Audit pipeline configuration section.

use serde::{Deserialize, Serialize};

const DEFAULT_QUEUE_CAPACITY: usize = 10000;
const DEFAULT_WORKER_COUNT: usize = 2;
const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 100;
const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5000;
const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// What happens to a dispatched event when the bounded queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QueueOverflowPolicy {
	#[default]
	DropNewest,
	DropOldest,
}

/// How a policy's `redact_fields` combine with the process-wide defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveFieldMode {
	/// Policy fields are added to the defaults.
	#[default]
	Union,
	/// A policy that lists fields replaces the defaults entirely.
	Override,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditConfigLayer {
	pub enabled: Option<bool>,
	pub queue_capacity: Option<usize>,
	pub queue_overflow_policy: Option<QueueOverflowPolicy>,
	pub worker_count: Option<usize>,
	pub retry_max_attempts: Option<u32>,
	pub retry_base_delay_ms: Option<u64>,
	pub retry_max_delay_ms: Option<u64>,
	pub subscriber_buffer: Option<usize>,
	pub sensitive_fields: Option<Vec<String>>,
	pub sensitive_field_mode: Option<SensitiveFieldMode>,
	pub escalate_failures: Option<bool>,
}

impl AuditConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.enabled.is_some() {
			self.enabled = other.enabled;
		}
		if other.queue_capacity.is_some() {
			self.queue_capacity = other.queue_capacity;
		}
		if other.queue_overflow_policy.is_some() {
			self.queue_overflow_policy = other.queue_overflow_policy;
		}
		if other.worker_count.is_some() {
			self.worker_count = other.worker_count;
		}
		if other.retry_max_attempts.is_some() {
			self.retry_max_attempts = other.retry_max_attempts;
		}
		if other.retry_base_delay_ms.is_some() {
			self.retry_base_delay_ms = other.retry_base_delay_ms;
		}
		if other.retry_max_delay_ms.is_some() {
			self.retry_max_delay_ms = other.retry_max_delay_ms;
		}
		if other.subscriber_buffer.is_some() {
			self.subscriber_buffer = other.subscriber_buffer;
		}
		if other.sensitive_fields.is_some() {
			self.sensitive_fields = other.sensitive_fields;
		}
		if other.sensitive_field_mode.is_some() {
			self.sensitive_field_mode = other.sensitive_field_mode;
		}
		if other.escalate_failures.is_some() {
			self.escalate_failures = other.escalate_failures;
		}
	}

	pub fn finalize(self) -> AuditConfig {
		AuditConfig {
			enabled: self.enabled.unwrap_or(true),
			queue_capacity: self.queue_capacity.unwrap_or(DEFAULT_QUEUE_CAPACITY),
			queue_overflow_policy: self.queue_overflow_policy.unwrap_or_default(),
			worker_count: self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT),
			retry_max_attempts: self
				.retry_max_attempts
				.unwrap_or(DEFAULT_RETRY_MAX_ATTEMPTS),
			retry_base_delay_ms: self
				.retry_base_delay_ms
				.unwrap_or(DEFAULT_RETRY_BASE_DELAY_MS),
			retry_max_delay_ms: self.retry_max_delay_ms.unwrap_or(DEFAULT_RETRY_MAX_DELAY_MS),
			subscriber_buffer: self.subscriber_buffer.unwrap_or(DEFAULT_SUBSCRIBER_BUFFER),
			sensitive_fields: self.sensitive_fields.unwrap_or_default(),
			sensitive_field_mode: self.sensitive_field_mode.unwrap_or_default(),
			escalate_failures: self.escalate_failures.unwrap_or(true),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditConfig {
	pub enabled: bool,
	pub queue_capacity: usize,
	pub queue_overflow_policy: QueueOverflowPolicy,
	/// Number of persistence workers draining the dispatch queue.
	pub worker_count: usize,
	pub retry_max_attempts: u32,
	pub retry_base_delay_ms: u64,
	pub retry_max_delay_ms: u64,
	/// Per-subscriber delivery queue depth for the live broadcast.
	pub subscriber_buffer: usize,
	/// Extra field names added to the built-in sensitive set.
	pub sensitive_fields: Vec<String>,
	pub sensitive_field_mode: SensitiveFieldMode,
	/// Raise failed invocations to at least high severity before gating.
	pub escalate_failures: bool,
}

impl AuditConfig {
	pub(crate) fn validate(&self) -> Result<(), String> {
		if self.queue_capacity == 0 {
			return Err("audit.queue_capacity must be greater than zero".to_string());
		}
		if self.worker_count == 0 {
			return Err("audit.worker_count must be greater than zero".to_string());
		}
		if self.subscriber_buffer == 0 {
			return Err("audit.subscriber_buffer must be greater than zero".to_string());
		}
		if self.retry_base_delay_ms > self.retry_max_delay_ms {
			return Err(format!(
				"audit.retry_base_delay_ms ({}) exceeds audit.retry_max_delay_ms ({})",
				self.retry_base_delay_ms, self.retry_max_delay_ms
			));
		}
		Ok(())
	}
}

impl Default for AuditConfig {
	fn default() -> Self {
		AuditConfigLayer::default().finalize()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_values() {
		let config = AuditConfig::default();
		assert!(config.enabled);
		assert_eq!(config.queue_capacity, 10000);
		assert_eq!(config.worker_count, 2);
		assert_eq!(config.retry_max_attempts, 3);
		assert_eq!(config.queue_overflow_policy, QueueOverflowPolicy::DropNewest);
		assert_eq!(config.sensitive_field_mode, SensitiveFieldMode::Union);
		assert!(config.sensitive_fields.is_empty());
		assert!(config.escalate_failures);
	}

	#[test]
	fn test_layer_finalize_with_values() {
		let layer = AuditConfigLayer {
			enabled: Some(false),
			queue_capacity: Some(500),
			queue_overflow_policy: Some(QueueOverflowPolicy::DropOldest),
			worker_count: Some(4),
			sensitive_fields: Some(vec!["guardianPhone".to_string()]),
			..Default::default()
		};

		let config = layer.finalize();
		assert!(!config.enabled);
		assert_eq!(config.queue_capacity, 500);
		assert_eq!(config.queue_overflow_policy, QueueOverflowPolicy::DropOldest);
		assert_eq!(config.worker_count, 4);
		assert_eq!(config.sensitive_fields, vec!["guardianPhone".to_string()]);
	}

	#[test]
	fn test_merge_overrides_only_set_fields() {
		let mut base = AuditConfigLayer {
			queue_capacity: Some(100),
			worker_count: Some(1),
			..Default::default()
		};
		let overlay = AuditConfigLayer {
			worker_count: Some(8),
			sensitive_field_mode: Some(SensitiveFieldMode::Override),
			..Default::default()
		};

		base.merge(overlay);
		assert_eq!(base.queue_capacity, Some(100));
		assert_eq!(base.worker_count, Some(8));
		assert_eq!(base.sensitive_field_mode, Some(SensitiveFieldMode::Override));
	}

	#[test]
	fn test_validate_rejects_zero_capacity() {
		let config = AuditConfig {
			queue_capacity: 0,
			..Default::default()
		};
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_validate_rejects_inverted_retry_delays() {
		let config = AuditConfig {
			retry_base_delay_ms: 10_000,
			retry_max_delay_ms: 100,
			..Default::default()
		};
		assert!(config.validate().is_err());
	}

	#[test]
	fn test_overflow_policy_serde() {
		let drop_newest: QueueOverflowPolicy = serde_json::from_str(r#""drop_newest""#).unwrap();
		assert_eq!(drop_newest, QueueOverflowPolicy::DropNewest);

		let drop_oldest: QueueOverflowPolicy = serde_json::from_str(r#""drop_oldest""#).unwrap();
		assert_eq!(drop_oldest, QueueOverflowPolicy::DropOldest);
	}

	#[test]
	fn test_sensitive_field_mode_serde() {
		let mode: SensitiveFieldMode = serde_json::from_str(r#""override""#).unwrap();
		assert_eq!(mode, SensitiveFieldMode::Override);
	}

	#[test]
	fn test_toml_round_trip() {
		let config = AuditConfig {
			queue_capacity: 42,
			queue_overflow_policy: QueueOverflowPolicy::DropOldest,
			sensitive_fields: vec!["allergies".to_string()],
			..Default::default()
		};

		let toml_str = toml::to_string(&config).unwrap();
		let parsed: AuditConfig = toml::from_str(&toml_str).unwrap();
		assert_eq!(parsed, config);
	}
}
