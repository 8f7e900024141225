// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Operator CLI for the campus audit store.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use campus_audit_config::CampusConfig;
use campus_audit_db::{create_pool, run_migrations, AuditRepository};

mod commands;
mod version;

use commands::QueryArgs;

/// Inspect and maintain the campus audit event store.
#[derive(Parser, Debug)]
#[command(name = "campus-audit", about = "Campus audit event store", version)]
struct Args {
	/// Config file, replacing /etc/campus/audit.toml
	#[arg(long, global = true, env = "CAMPUS_AUDIT_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Print matching events as JSON lines, newest first
	Query(QueryArgs),
	/// Create or update the audit schema
	Migrate,
	/// Delete events older than the given age
	Purge {
		#[arg(long)]
		older_than_days: u32,
	},
	/// Print the resolved configuration as JSON
	Config,
	/// Show version and build information
	Version,
}

fn init_tracing(config: &CampusConfig) {
	let filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
	let json = config.logging.json;

	// Logs go to stderr so query output on stdout stays machine readable.
	tracing_subscriber::registry()
		.with(filter)
		.with(json.then(|| {
			tracing_subscriber::fmt::layer()
				.json()
				.with_writer(std::io::stderr)
		}))
		.with((!json).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr)))
		.init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	if let Command::Version = args.command {
		println!("{}", version::format_version_info());
		return Ok(());
	}

	let config = match &args.config {
		Some(path) => campus_audit_config::load_config_with_file(path)?,
		None => campus_audit_config::load_config()?,
	};
	init_tracing(&config);

	if let Command::Config = args.command {
		println!("{}", serde_json::to_string_pretty(&config)?);
		return Ok(());
	}

	tracing::debug!(database = %config.database.url, "opening audit store");
	let pool = create_pool(&config.database.url).await?;

	match args.command {
		Command::Query(query) => {
			let repo = AuditRepository::new(pool);
			let mut stdout = std::io::stdout().lock();
			let total = commands::run_query(&repo, &query, &mut stdout).await?;
			tracing::info!(total, "query complete");
		}
		Command::Migrate => {
			run_migrations(&pool).await?;
			tracing::info!("migrations applied");
		}
		Command::Purge { older_than_days } => {
			let repo = AuditRepository::new(pool);
			let removed = commands::run_purge(&repo, older_than_days).await?;
			println!("removed {removed} events");
		}
		Command::Config | Command::Version => {}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_purge() {
		let args = Args::try_parse_from(["campus-audit", "purge", "--older-than-days", "30"]).unwrap();
		assert!(matches!(
			args.command,
			Command::Purge {
				older_than_days: 30
			}
		));
	}

	#[test]
	fn config_flag_is_global() {
		let args =
			Args::try_parse_from(["campus-audit", "migrate", "--config", "/tmp/audit.toml"]).unwrap();
		assert_eq!(args.config, Some(PathBuf::from("/tmp/audit.toml")));
		assert!(matches!(args.command, Command::Migrate));
	}

	#[test]
	fn subcommand_is_required() {
		assert!(Args::try_parse_from(["campus-audit"]).is_err());
	}
}
