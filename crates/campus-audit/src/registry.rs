// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Startup-time policy table.
//!
//! Operations are identified as `<group>::<operation>` (for example
//! `staff::update`). A policy can be attached to a group, to an operation, or
//! to both; the operation-level declaration overrides the group field by
//! field. All merging and validation happens in
//! [`PolicyRegistryBuilder::build`], so a call-time lookup is a single hash
//! lookup returning a shared, immutable [`ResolvedPolicy`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::PolicyError;
use crate::policy::{validate_sampling_rate, AuditPolicy, ResolvedPolicy, ResourceRef};

pub const OPERATION_SEPARATOR: &str = "::";

/// Split `group::operation`, rejecting empty halves.
pub fn split_operation_id(id: &str) -> Result<(&str, &str), PolicyError> {
	match id.split_once(OPERATION_SEPARATOR) {
		Some((group, op))
			if !group.is_empty() && !op.is_empty() && !op.contains(OPERATION_SEPARATOR) =>
		{
			Ok((group, op))
		}
		_ => Err(PolicyError::InvalidOperationId(id.to_string())),
	}
}

#[derive(Debug, Default)]
pub struct PolicyRegistryBuilder {
	groups: Vec<(String, AuditPolicy)>,
	operations: Vec<(String, AuditPolicy)>,
}

impl PolicyRegistryBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Attach a policy to every operation of `group`.
	pub fn group(mut self, group: impl Into<String>, policy: AuditPolicy) -> Self {
		self.groups.push((group.into(), policy));
		self
	}

	/// Attach a policy to a single `group::operation`.
	pub fn operation(mut self, operation: impl Into<String>, policy: AuditPolicy) -> Self {
		self.operations.push((operation.into(), policy));
		self
	}

	/// Validate and merge every declaration.
	pub fn build(self) -> Result<PolicyRegistry, PolicyError> {
		let mut declared_groups: HashMap<String, AuditPolicy> = HashMap::new();
		for (group, policy) in self.groups {
			if group.is_empty() || group.contains(OPERATION_SEPARATOR) {
				return Err(PolicyError::InvalidOperationId(group));
			}
			validate_declared(&group, &policy)?;
			if declared_groups.insert(group.clone(), policy).is_some() {
				return Err(PolicyError::Duplicate(group));
			}
		}

		let mut operations = HashMap::new();
		for (operation, policy) in self.operations {
			let (group, _) = split_operation_id(&operation)?;
			validate_declared(&operation, &policy)?;

			let merged = match declared_groups.get(group) {
				Some(group_policy) => policy.inherit_from(group_policy),
				None => policy,
			};
			let resolved = ResolvedPolicy::from_declared(&operation, &merged)?;

			if operations
				.insert(operation.clone(), Arc::new(resolved))
				.is_some()
			{
				return Err(PolicyError::Duplicate(operation));
			}
		}

		let mut groups = HashMap::new();
		for (group, policy) in declared_groups {
			match ResolvedPolicy::from_declared(&group, &policy) {
				Ok(resolved) => {
					groups.insert(group, Arc::new(resolved));
				}
				Err(PolicyError::MissingField { field, .. }) => {
					// Incomplete group policies only serve as defaults for
					// their explicitly registered operations.
					debug!(group = %group, field, "group policy is partial, not applied on its own");
				}
				Err(e) => return Err(e),
			}
		}

		if operations.is_empty() && groups.is_empty() {
			warn!("audit policy registry is empty, no operation will be audited");
		}

		Ok(PolicyRegistry { operations, groups })
	}
}

/// Checks that hold for a declaration on its own, before any inheritance.
fn validate_declared(target: &str, policy: &AuditPolicy) -> Result<(), PolicyError> {
	if let Some(rate) = policy.sampling_rate {
		validate_sampling_rate(target, rate)?;
	}
	if let Some(expr) = &policy.resource_id {
		ResourceRef::parse(expr).map_err(|reason| PolicyError::InvalidResourcePath {
			target: target.to_string(),
			path: expr.clone(),
			reason,
		})?;
	}
	if matches!(&policy.metadata, Some(m) if !m.is_object()) {
		return Err(PolicyError::InvalidMetadata {
			target: target.to_string(),
		});
	}
	Ok(())
}

/// Immutable operation → policy table, shared read-only across tasks.
#[derive(Debug, Default)]
pub struct PolicyRegistry {
	operations: HashMap<String, Arc<ResolvedPolicy>>,
	groups: HashMap<String, Arc<ResolvedPolicy>>,
}

impl PolicyRegistry {
	pub fn builder() -> PolicyRegistryBuilder {
		PolicyRegistryBuilder::new()
	}

	/// Effective policy for `operation`, or `None` when it is not audited.
	pub fn resolve(&self, operation: &str) -> Option<&Arc<ResolvedPolicy>> {
		if let Some(policy) = self.operations.get(operation) {
			return Some(policy);
		}
		let (group, _) = operation.split_once(OPERATION_SEPARATOR)?;
		self.groups.get(group)
	}

	pub fn is_audited(&self, operation: &str) -> bool {
		self.resolve(operation).is_some()
	}

	pub fn len(&self) -> usize {
		self.operations.len() + self.groups.len()
	}

	pub fn is_empty(&self) -> bool {
		self.operations.is_empty() && self.groups.is_empty()
	}

	/// Explicitly registered operation ids, sorted.
	pub fn operations(&self) -> Vec<&str> {
		let mut ids: Vec<&str> = self.operations.keys().map(String::as_str).collect();
		ids.sort_unstable();
		ids
	}
}
