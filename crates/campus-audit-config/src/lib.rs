// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for the campus audit pipeline.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`CAMPUS_AUDIT_*`)
//!
//! # Usage
//!
//! ```ignore
//! use campus_audit_config::load_config;
//!
//! let config = load_config()?;
//! println!("audit queue holds {} events", config.audit.queue_capacity);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::CampusConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use serde::Serialize;
use tracing::{debug, info};

/// Fully resolved configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CampusConfig {
	pub audit: AuditConfig,
	pub database: DatabaseConfig,
	pub logging: LoggingConfig,
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`CAMPUS_*`)
/// 2. Config file (`/etc/campus/audit.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<CampusConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(
	config_path: impl Into<std::path::PathBuf>,
) -> Result<CampusConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

/// Merge the given sources in precedence order and finalize the result.
pub fn load_from_sources(
	mut sources: Vec<Box<dyn ConfigSource>>,
) -> Result<CampusConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = CampusConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

/// Finalize configuration layer into resolved config.
pub fn finalize(layer: CampusConfigLayer) -> Result<CampusConfig, ConfigError> {
	let audit = layer.audit.unwrap_or_default().finalize();
	let database = layer.database.unwrap_or_default().finalize();
	let logging = layer.logging.unwrap_or_default().finalize();

	audit.validate().map_err(ConfigError::Validation)?;

	info!(
		audit_enabled = audit.enabled,
		queue_capacity = audit.queue_capacity,
		worker_count = audit.worker_count,
		overflow_policy = ?audit.queue_overflow_policy,
		database = %database.url,
		"configuration loaded"
	);

	Ok(CampusConfig {
		audit,
		database,
		logging,
	})
}
