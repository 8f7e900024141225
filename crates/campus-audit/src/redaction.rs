// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Field-name based redaction of captured payloads.
//!
//! Payloads are walked recursively; the value of every object key that
//! matches (ASCII case-insensitive) a sensitive field name is replaced by
//! [`REDACTED`]. Shape and all other values are preserved and the input is
//! never mutated.

use std::borrow::Cow;
use std::collections::HashSet;

use campus_audit_config::{AuditConfig, SensitiveFieldMode};
use serde::Serialize;
use serde_json::{Map, Value};

/// Marker written in place of a sensitive value.
pub const REDACTED: &str = "[REDACTED]";

/// Marker written in place of a subtree nested deeper than [`MAX_DEPTH`].
pub const TRUNCATED: &str = "[TRUNCATED]";

/// Nesting depth beyond which subtrees are cut.
pub const MAX_DEPTH: usize = 64;

/// Identity, financial and medical fields redacted in every deployment.
pub const DEFAULT_SENSITIVE_FIELDS: &[&str] = &[
	"password",
	"passwordHash",
	"password_hash",
	"currentPassword",
	"newPassword",
	"ssn",
	"socialSecurityNumber",
	"social_security_number",
	"bankAccount",
	"bank_account",
	"bankAccountNumber",
	"bank_account_number",
	"iban",
	"creditCard",
	"credit_card",
	"creditCardNumber",
	"cardNumber",
	"card_number",
	"cvv",
	"salary",
	"medicalInfo",
	"medical_info",
	"medicalRecord",
	"medical_record",
	"diagnosis",
	"token",
	"accessToken",
	"access_token",
	"refreshToken",
	"refresh_token",
	"secret",
	"apiKey",
	"api_key",
	"authorization",
];

/// A payload that has been through the redaction engine.
///
/// Event details only accept this type, so an unredacted payload cannot be
/// attached to an [`AuditEvent`](crate::AuditEvent) by construction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Redacted(Value);

impl Redacted {
	pub(crate) fn empty() -> Self {
		Redacted(Value::Object(Map::new()))
	}

	pub fn as_value(&self) -> &Value {
		&self.0
	}

	pub fn into_inner(self) -> Value {
		self.0
	}
}

/// Case-insensitive set of field names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SensitiveFields {
	names: HashSet<String>,
}

impl SensitiveFields {
	pub fn new<I, S>(names: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		Self {
			names: names
				.into_iter()
				.map(|s| s.as_ref().to_ascii_lowercase())
				.collect(),
		}
	}

	pub fn defaults() -> Self {
		Self::new(DEFAULT_SENSITIVE_FIELDS)
	}

	pub fn contains(&self, key: &str) -> bool {
		if key.bytes().any(|b| b.is_ascii_uppercase()) {
			self.names.contains(&key.to_ascii_lowercase())
		} else {
			self.names.contains(key)
		}
	}

	pub fn extend<I, S>(&mut self, names: I)
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		self
			.names
			.extend(names.into_iter().map(|s| s.as_ref().to_ascii_lowercase()));
	}

	pub fn union(&self, other: &SensitiveFields) -> SensitiveFields {
		SensitiveFields {
			names: self.names.union(&other.names).cloned().collect(),
		}
	}

	pub fn len(&self) -> usize {
		self.names.len()
	}

	pub fn is_empty(&self) -> bool {
		self.names.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.names.iter().map(String::as_str)
	}
}

/// Return a redacted deep copy of `payload`.
pub fn redact(payload: &Value, fields: &SensitiveFields) -> Redacted {
	Redacted(redact_value(payload, fields, 0))
}

fn redact_value(value: &Value, fields: &SensitiveFields, depth: usize) -> Value {
	match value {
		Value::Object(map) => {
			if depth >= MAX_DEPTH {
				return Value::String(TRUNCATED.to_string());
			}
			let mut out = Map::with_capacity(map.len());
			for (key, v) in map {
				let redacted = if fields.contains(key) {
					Value::String(REDACTED.to_string())
				} else {
					redact_value(v, fields, depth + 1)
				};
				out.insert(key.clone(), redacted);
			}
			Value::Object(out)
		}
		Value::Array(items) => {
			if depth >= MAX_DEPTH {
				return Value::String(TRUNCATED.to_string());
			}
			Value::Array(
				items
					.iter()
					.map(|v| redact_value(v, fields, depth + 1))
					.collect(),
			)
		}
		other => other.clone(),
	}
}

/// Process-wide redaction settings combined with per-policy fields.
#[derive(Debug, Clone)]
pub struct Redactor {
	defaults: SensitiveFields,
	mode: SensitiveFieldMode,
}

impl Default for Redactor {
	fn default() -> Self {
		Self::new(SensitiveFields::defaults(), SensitiveFieldMode::Union)
	}
}

impl Redactor {
	pub fn new(defaults: SensitiveFields, mode: SensitiveFieldMode) -> Self {
		Self { defaults, mode }
	}

	/// Built-in defaults plus the configured extra fields.
	pub fn from_config(config: &AuditConfig) -> Self {
		let mut defaults = SensitiveFields::defaults();
		defaults.extend(&config.sensitive_fields);
		Self::new(defaults, config.sensitive_field_mode)
	}

	pub fn defaults(&self) -> &SensitiveFields {
		&self.defaults
	}

	/// The field set applied for a policy declaring `policy_fields`.
	///
	/// In override mode an empty policy list still falls back to the defaults.
	pub fn effective_fields<'a>(
		&'a self,
		policy_fields: &'a SensitiveFields,
	) -> Cow<'a, SensitiveFields> {
		if policy_fields.is_empty() {
			return Cow::Borrowed(&self.defaults);
		}
		match self.mode {
			SensitiveFieldMode::Union => Cow::Owned(self.defaults.union(policy_fields)),
			SensitiveFieldMode::Override => Cow::Borrowed(policy_fields),
		}
	}

	pub fn redact(&self, payload: &Value, policy_fields: &SensitiveFields) -> Redacted {
		redact(payload, &self.effective_fields(policy_fields))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;
	use serde_json::json;

	fn fields(names: &[&str]) -> SensitiveFields {
		SensitiveFields::new(names)
	}

	#[test]
	fn redacts_top_level_field() {
		let payload = json!({"name": "Jane", "salary": 50000});
		let out = redact(&payload, &fields(&["salary"]));
		assert_eq!(out.as_value(), &json!({"name": "Jane", "salary": "[REDACTED]"}));
	}

	#[test]
	fn matching_is_case_insensitive() {
		let payload = json!({"Password": "hunter2", "PASSWORD": "x", "password": "y"});
		let out = redact(&payload, &fields(&["password"]));
		assert_eq!(
			out.as_value(),
			&json!({"Password": REDACTED, "PASSWORD": REDACTED, "password": REDACTED})
		);

		let out = redact(&json!({"password": "y"}), &fields(&["PassWord"]));
		assert_eq!(out.as_value(), &json!({"password": REDACTED}));
	}

	#[test]
	fn walks_nested_objects_and_arrays() {
		let payload = json!({
			"staff": [
				{"name": "A", "bankAccount": "123"},
				{"name": "B", "details": {"medicalInfo": {"allergy": "nuts"}}}
			]
		});
		let out = redact(&payload, &SensitiveFields::defaults());
		assert_eq!(
			out.as_value(),
			&json!({
				"staff": [
					{"name": "A", "bankAccount": REDACTED},
					{"name": "B", "details": {"medicalInfo": REDACTED}}
				]
			})
		);
	}

	#[test]
	fn primitives_pass_through() {
		for payload in [json!(null), json!(42), json!("salary"), json!(true)] {
			let out = redact(&payload, &SensitiveFields::defaults());
			assert_eq!(out.as_value(), &payload);
		}
	}

	#[test]
	fn input_is_not_mutated() {
		let payload = json!({"ssn": "000-00-0000"});
		let before = payload.clone();
		let _ = redact(&payload, &SensitiveFields::defaults());
		assert_eq!(payload, before);
	}

	#[test]
	fn deep_nesting_is_truncated() {
		let mut payload = json!({"leaf": 1});
		for _ in 0..(MAX_DEPTH + 10) {
			payload = json!({ "next": payload });
		}

		let out = redact(&payload, &SensitiveFields::defaults()).into_inner();

		let mut cursor = &out;
		let mut depth = 0;
		while let Some(next) = cursor.get("next") {
			cursor = next;
			depth += 1;
		}
		assert_eq!(cursor, &json!(TRUNCATED));
		assert_eq!(depth, MAX_DEPTH);
	}

	#[test]
	fn defaults_cover_identity_financial_medical() {
		let defaults = SensitiveFields::defaults();
		for name in [
			"password",
			"socialSecurityNumber",
			"bankAccount",
			"creditCard",
			"salary",
			"medicalInfo",
		] {
			assert!(defaults.contains(name), "{name} missing from defaults");
		}
	}

	#[test]
	fn redactor_union_mode_combines_lists() {
		let redactor = Redactor::new(fields(&["password"]), SensitiveFieldMode::Union);
		let policy = fields(&["guardianPhone"]);
		let out = redactor.redact(&json!({"password": "p", "guardianPhone": "555"}), &policy);
		assert_eq!(
			out.as_value(),
			&json!({"password": REDACTED, "guardianPhone": REDACTED})
		);
	}

	#[test]
	fn redactor_override_mode_replaces_defaults() {
		let redactor = Redactor::new(fields(&["password"]), SensitiveFieldMode::Override);
		let policy = fields(&["guardianPhone"]);
		let out = redactor.redact(&json!({"password": "p", "guardianPhone": "555"}), &policy);
		assert_eq!(
			out.as_value(),
			&json!({"password": "p", "guardianPhone": REDACTED})
		);
	}

	#[test]
	fn redactor_override_mode_without_policy_fields_uses_defaults() {
		let redactor = Redactor::new(fields(&["password"]), SensitiveFieldMode::Override);
		let out = redactor.redact(&json!({"password": "p"}), &SensitiveFields::default());
		assert_eq!(out.as_value(), &json!({"password": REDACTED}));
	}

	#[test]
	fn redactor_from_config_adds_extra_fields() {
		let config = AuditConfig {
			sensitive_fields: vec!["Allergies".to_string()],
			..Default::default()
		};
		let redactor = Redactor::from_config(&config);
		assert!(redactor.defaults().contains("allergies"));
		assert!(redactor.defaults().contains("salary"));
	}

	const KEYS: &[&str] = &[
		"name", "id", "salary", "Salary", "password", "notes", "ssn", "grade", "items",
	];

	fn arb_payload() -> impl Strategy<Value = Value> {
		let leaf = prop_oneof![
			Just(Value::Null),
			any::<bool>().prop_map(Value::Bool),
			any::<i64>().prop_map(|n| json!(n)),
			"[a-z]{0,8}".prop_map(Value::String),
		];
		leaf.prop_recursive(5, 64, 6, |inner| {
			prop_oneof![
				prop::collection::vec(inner.clone(), 0..5).prop_map(Value::Array),
				prop::collection::vec((prop::sample::select(KEYS), inner), 0..6).prop_map(
					|entries| {
						Value::Object(
							entries
								.into_iter()
								.map(|(k, v)| (k.to_string(), v))
								.collect(),
						)
					}
				),
			]
		})
	}

	fn arb_fields() -> impl Strategy<Value = SensitiveFields> {
		prop::sample::subsequence(KEYS.to_vec(), 0..4).prop_map(|names| SensitiveFields::new(names))
	}

	/// Walks `original` and `redacted` together, checking every redaction property.
	fn check(original: &Value, redacted: &Value, fields: &SensitiveFields) -> Result<(), String> {
		match (original, redacted) {
			(Value::Object(a), Value::Object(b)) => {
				if a.len() != b.len() || a.keys().ne(b.keys()) {
					return Err("object keys differ".to_string());
				}
				for (key, va) in a {
					let vb = &b[key];
					if fields.contains(key) {
						if vb != &json!(REDACTED) {
							return Err(format!("{key} not redacted"));
						}
					} else {
						check(va, vb, fields)?;
					}
				}
				Ok(())
			}
			(Value::Array(a), Value::Array(b)) => {
				if a.len() != b.len() {
					return Err("array length differs".to_string());
				}
				a.iter().zip(b).try_for_each(|(x, y)| check(x, y, fields))
			}
			(a, b) if a == b => Ok(()),
			(a, b) => Err(format!("{a} changed to {b}")),
		}
	}

	proptest! {
		#[test]
		fn redaction_properties_hold(payload in arb_payload(), fields in arb_fields()) {
			let out = redact(&payload, &fields);
			prop_assert!(check(&payload, out.as_value(), &fields).is_ok(),
				"{:?}", check(&payload, out.as_value(), &fields));
		}

		#[test]
		fn redaction_is_idempotent(payload in arb_payload(), fields in arb_fields()) {
			let once = redact(&payload, &fields).into_inner();
			let twice = redact(&once, &fields).into_inner();
			prop_assert_eq!(once, twice);
		}
	}
}
