// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::CampusConfigLayer;
use crate::sections::{
	AuditConfigLayer, DatabaseConfigLayer, LoggingConfigLayer, QueueOverflowPolicy,
	SensitiveFieldMode,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<CampusConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<CampusConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(CampusConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/campus/audit.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<CampusConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(CampusConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: CampusConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: CAMPUS_AUDIT_<FIELD>, CAMPUS_DATABASE_URL, CAMPUS_LOG_LEVEL.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<CampusConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(CampusConfigLayer {
			audit: Some(load_audit_from_env()?),
			database: Some(load_database_from_env()),
			logging: Some(load_logging_from_env()),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_u32(name: &str) -> Result<Option<u32>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u32 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u64 value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid usize value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn env_list(name: &str) -> Option<Vec<String>> {
	env_var(name).map(|v| {
		v.split(',')
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(str::to_string)
			.collect()
	})
}

fn load_audit_from_env() -> Result<AuditConfigLayer, ConfigError> {
	let queue_overflow_policy =
		env_var("CAMPUS_AUDIT_QUEUE_OVERFLOW_POLICY").map(|v| match v.to_lowercase().as_str() {
			"drop_oldest" => QueueOverflowPolicy::DropOldest,
			_ => QueueOverflowPolicy::DropNewest,
		});

	let sensitive_field_mode =
		env_var("CAMPUS_AUDIT_SENSITIVE_FIELD_MODE").map(|v| match v.to_lowercase().as_str() {
			"override" => SensitiveFieldMode::Override,
			_ => SensitiveFieldMode::Union,
		});

	Ok(AuditConfigLayer {
		enabled: env_bool("CAMPUS_AUDIT_ENABLED"),
		queue_capacity: env_usize("CAMPUS_AUDIT_QUEUE_CAPACITY")?,
		queue_overflow_policy,
		worker_count: env_usize("CAMPUS_AUDIT_WORKER_COUNT")?,
		retry_max_attempts: env_u32("CAMPUS_AUDIT_RETRY_MAX_ATTEMPTS")?,
		retry_base_delay_ms: env_u64("CAMPUS_AUDIT_RETRY_BASE_DELAY_MS")?,
		retry_max_delay_ms: env_u64("CAMPUS_AUDIT_RETRY_MAX_DELAY_MS")?,
		subscriber_buffer: env_usize("CAMPUS_AUDIT_SUBSCRIBER_BUFFER")?,
		sensitive_fields: env_list("CAMPUS_AUDIT_SENSITIVE_FIELDS"),
		sensitive_field_mode,
		escalate_failures: env_bool("CAMPUS_AUDIT_ESCALATE_FAILURES"),
	})
}

fn load_database_from_env() -> DatabaseConfigLayer {
	DatabaseConfigLayer {
		url: env_var("CAMPUS_DATABASE_URL"),
	}
}

fn load_logging_from_env() -> LoggingConfigLayer {
	LoggingConfigLayer {
		level: env_var("CAMPUS_LOG_LEVEL"),
		json: env_bool("CAMPUS_LOG_JSON"),
	}
}
