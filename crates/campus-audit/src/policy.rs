// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Audit policy declarations.
//!
//! An [`AuditPolicy`] is what an operation or operation group declares. Every
//! field is optional so that a narrower declaration can inherit from a
//! broader one. [`ResolvedPolicy`] is the validated, fully merged form the
//! interceptor works with.

use std::fmt;

use serde_json::{Map, Value};

use crate::error::PolicyError;
use crate::event::{AuditAction, AuditSeverity};
use crate::redaction::SensitiveFields;

/// Policy as declared at startup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditPolicy {
	pub action: Option<AuditAction>,
	pub resource: Option<String>,
	/// Literal id or a path such as `result.id` or `args[0].id`.
	pub resource_id: Option<String>,
	pub severity: Option<AuditSeverity>,
	pub sampling_rate: Option<f64>,
	pub performance_threshold_ms: Option<u64>,
	pub redact_fields: Vec<String>,
	pub metadata: Option<Value>,
}

impl AuditPolicy {
	pub fn builder() -> AuditPolicyBuilder {
		AuditPolicyBuilder::default()
	}

	/// Overlay `self` (narrower) on `broader`. Set fields win, unset fields
	/// inherit, redact lists are unioned and metadata objects merged by key.
	pub fn inherit_from(&self, broader: &AuditPolicy) -> AuditPolicy {
		let mut redact_fields = broader.redact_fields.clone();
		for field in &self.redact_fields {
			if !redact_fields.iter().any(|f| f.eq_ignore_ascii_case(field)) {
				redact_fields.push(field.clone());
			}
		}

		let metadata = match (&broader.metadata, &self.metadata) {
			(Some(Value::Object(base)), Some(Value::Object(overlay))) => {
				let mut merged = base.clone();
				for (k, v) in overlay {
					merged.insert(k.clone(), v.clone());
				}
				Some(Value::Object(merged))
			}
			(base, None) => base.clone(),
			(_, overlay) => overlay.clone(),
		};

		AuditPolicy {
			action: self.action.or(broader.action),
			resource: self.resource.clone().or_else(|| broader.resource.clone()),
			resource_id: self
				.resource_id
				.clone()
				.or_else(|| broader.resource_id.clone()),
			severity: self.severity.or(broader.severity),
			sampling_rate: self.sampling_rate.or(broader.sampling_rate),
			performance_threshold_ms: self
				.performance_threshold_ms
				.or(broader.performance_threshold_ms),
			redact_fields,
			metadata,
		}
	}
}

/// Fluent construction of an [`AuditPolicy`].
#[derive(Debug, Clone, Default)]
pub struct AuditPolicyBuilder {
	policy: AuditPolicy,
}

impl AuditPolicyBuilder {
	pub fn action(mut self, action: AuditAction) -> Self {
		self.policy.action = Some(action);
		self
	}

	pub fn resource(mut self, resource: impl Into<String>) -> Self {
		self.policy.resource = Some(resource.into());
		self
	}

	pub fn resource_id(mut self, expr: impl Into<String>) -> Self {
		self.policy.resource_id = Some(expr.into());
		self
	}

	pub fn severity(mut self, severity: AuditSeverity) -> Self {
		self.policy.severity = Some(severity);
		self
	}

	pub fn sampling_rate(mut self, rate: f64) -> Self {
		self.policy.sampling_rate = Some(rate);
		self
	}

	pub fn performance_threshold_ms(mut self, threshold_ms: u64) -> Self {
		self.policy.performance_threshold_ms = Some(threshold_ms);
		self
	}

	pub fn redact<I, S>(mut self, fields: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.policy.redact_fields.extend(fields.into_iter().map(Into::into));
		self
	}

	/// Add one metadata entry.
	pub fn metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
		let mut map = match self.policy.metadata.take() {
			Some(Value::Object(map)) => map,
			_ => Map::new(),
		};
		map.insert(key.into(), value.into());
		self.policy.metadata = Some(Value::Object(map));
		self
	}

	/// Replace the metadata wholesale. Must be a JSON object.
	pub fn metadata_value(mut self, metadata: Value) -> Self {
		self.policy.metadata = Some(metadata);
		self
	}

	pub fn build(self) -> AuditPolicy {
		self.policy
	}
}

/// Where the resource id of an event comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceRef {
	Literal(String),
	Path { root: PathRoot, segments: Vec<PathSegment> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRoot {
	Args,
	Result,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
	Key(String),
	Index(usize),
}

impl ResourceRef {
	/// Parse a resource id expression.
	///
	/// Expressions whose first token is `args` or `result` are paths; anything
	/// else is a literal id.
	pub fn parse(expr: &str) -> Result<ResourceRef, String> {
		let head_end = expr.find(['.', '[']).unwrap_or(expr.len());
		let root = match &expr[..head_end] {
			"args" => PathRoot::Args,
			"result" => PathRoot::Result,
			_ => {
				if expr.trim().is_empty() {
					return Err("expression is empty".to_string());
				}
				return Ok(ResourceRef::Literal(expr.to_string()));
			}
		};

		let mut segments = Vec::new();
		let mut rest = &expr[head_end..];
		while !rest.is_empty() {
			if let Some(after_dot) = rest.strip_prefix('.') {
				let end = after_dot.find(['.', '[']).unwrap_or(after_dot.len());
				let key = &after_dot[..end];
				if key.is_empty() {
					return Err("empty key after '.'".to_string());
				}
				if !key
					.chars()
					.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
				{
					return Err(format!("invalid key '{key}'"));
				}
				segments.push(PathSegment::Key(key.to_string()));
				rest = &after_dot[end..];
			} else if let Some(after_bracket) = rest.strip_prefix('[') {
				let close = after_bracket
					.find(']')
					.ok_or_else(|| "unclosed '['".to_string())?;
				let index = after_bracket[..close]
					.parse::<usize>()
					.map_err(|_| format!("invalid index '{}'", &after_bracket[..close]))?;
				segments.push(PathSegment::Index(index));
				rest = &after_bracket[close + 1..];
			} else {
				return Err(format!("unexpected '{rest}'"));
			}
		}

		Ok(ResourceRef::Path { root, segments })
	}

	/// Evaluate against the argument snapshot and, on success, the result.
	///
	/// For `args`, a leading index selects from an argument list; an operation
	/// taking a single non-list argument treats `args[0]` as that argument.
	pub fn resolve(&self, args: &Value, result: Option<&Value>) -> Option<String> {
		let (root, segments) = match self {
			ResourceRef::Literal(id) => return Some(id.clone()),
			ResourceRef::Path { root, segments } => (root, segments.as_slice()),
		};

		let (mut cursor, segments) = match root {
			PathRoot::Result => (result?, segments),
			PathRoot::Args => match (args, segments.first()) {
				(Value::Array(_), _) => (args, segments),
				(_, Some(PathSegment::Index(0))) => (args, &segments[1..]),
				(_, Some(PathSegment::Index(_))) => return None,
				_ => (args, segments),
			},
		};

		for segment in segments {
			cursor = match segment {
				PathSegment::Key(key) => cursor.get(key.as_str())?,
				PathSegment::Index(i) => cursor.get(*i)?,
			};
		}

		match cursor {
			Value::String(s) => Some(s.clone()),
			Value::Number(n) => Some(n.to_string()),
			Value::Bool(b) => Some(b.to_string()),
			_ => None,
		}
	}
}

impl fmt::Display for ResourceRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ResourceRef::Literal(id) => f.write_str(id),
			ResourceRef::Path { root, segments } => {
				match root {
					PathRoot::Args => f.write_str("args")?,
					PathRoot::Result => f.write_str("result")?,
				}
				for segment in segments {
					match segment {
						PathSegment::Key(key) => write!(f, ".{key}")?,
						PathSegment::Index(i) => write!(f, "[{i}]")?,
					}
				}
				Ok(())
			}
		}
	}
}

/// Severity applied when no level of the hierarchy declares one.
pub const DEFAULT_SEVERITY: AuditSeverity = AuditSeverity::Medium;

/// Sampling rate applied when no level declares one.
pub const DEFAULT_SAMPLING_RATE: f64 = 1.0;

/// A validated, fully merged policy for one operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPolicy {
	pub operation: String,
	pub action: AuditAction,
	pub resource: String,
	pub resource_id: Option<ResourceRef>,
	pub severity: AuditSeverity,
	pub sampling_rate: f64,
	pub performance_threshold_ms: Option<u64>,
	pub redact_fields: SensitiveFields,
	pub metadata: Map<String, Value>,
}

impl ResolvedPolicy {
	/// Validate a merged declaration for `target`.
	pub fn from_declared(target: &str, policy: &AuditPolicy) -> Result<Self, PolicyError> {
		let action = policy.action.ok_or_else(|| PolicyError::MissingField {
			target: target.to_string(),
			field: "action",
		})?;

		let resource = policy
			.resource
			.clone()
			.filter(|r| !r.trim().is_empty())
			.ok_or_else(|| PolicyError::MissingField {
				target: target.to_string(),
				field: "resource",
			})?;

		let sampling_rate = policy.sampling_rate.unwrap_or(DEFAULT_SAMPLING_RATE);
		validate_sampling_rate(target, sampling_rate)?;

		let resource_id = policy
			.resource_id
			.as_deref()
			.map(|expr| {
				ResourceRef::parse(expr).map_err(|reason| PolicyError::InvalidResourcePath {
					target: target.to_string(),
					path: expr.to_string(),
					reason,
				})
			})
			.transpose()?;

		let metadata = match &policy.metadata {
			None => Map::new(),
			Some(Value::Object(map)) => map.clone(),
			Some(_) => {
				return Err(PolicyError::InvalidMetadata {
					target: target.to_string(),
				})
			}
		};

		Ok(ResolvedPolicy {
			operation: target.to_string(),
			action,
			resource,
			resource_id,
			severity: policy.severity.unwrap_or(DEFAULT_SEVERITY),
			sampling_rate,
			performance_threshold_ms: policy.performance_threshold_ms,
			redact_fields: SensitiveFields::new(&policy.redact_fields),
			metadata,
		})
	}
}

pub(crate) fn validate_sampling_rate(target: &str, rate: f64) -> Result<(), PolicyError> {
	if rate.is_nan() || !(0.0..=1.0).contains(&rate) {
		return Err(PolicyError::InvalidSamplingRate {
			target: target.to_string(),
			rate,
		});
	}
	Ok(())
}
