// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::io::Write;

use campus_audit::{AuditAction, AuditQuery, AuditSeverity, AuditStore};
use campus_audit_db::AuditRepository;
use chrono::{DateTime, Duration, Utc};
use clap::Args;

/// Filters for the `query` subcommand.
#[derive(Args, Debug, Clone, Default)]
pub struct QueryArgs {
	#[arg(long)]
	pub resource: Option<String>,

	#[arg(long)]
	pub resource_id: Option<String>,

	#[arg(long)]
	pub actor: Option<String>,

	#[arg(long)]
	pub school: Option<String>,

	/// Severity floor (low, medium, high, critical)
	#[arg(long)]
	pub min_severity: Option<AuditSeverity>,

	/// Action name, e.g. DATA_UPDATED
	#[arg(long)]
	pub action: Option<AuditAction>,

	/// Inclusive lower bound (RFC 3339)
	#[arg(long)]
	pub since: Option<DateTime<Utc>>,

	/// Exclusive upper bound (RFC 3339)
	#[arg(long)]
	pub until: Option<DateTime<Utc>>,

	#[arg(long)]
	pub limit: Option<u32>,

	#[arg(long, default_value_t = 0)]
	pub offset: u32,
}

impl QueryArgs {
	pub fn to_query(&self) -> AuditQuery {
		AuditQuery {
			resource: self.resource.clone(),
			resource_id: self.resource_id.clone(),
			actor_id: self.actor.clone(),
			school_id: self.school.clone(),
			min_severity: self.min_severity,
			action: self.action,
			since: self.since,
			until: self.until,
			limit: self.limit,
			offset: self.offset,
		}
	}
}

/// Writes one JSON object per matching event and returns the total match
/// count.
pub async fn run_query(
	store: &dyn AuditStore,
	args: &QueryArgs,
	out: &mut impl Write,
) -> Result<u64, Box<dyn std::error::Error>> {
	let page = store.query(&args.to_query()).await?;
	for event in &page.events {
		serde_json::to_writer(&mut *out, event)?;
		writeln!(out)?;
	}
	Ok(page.total)
}

/// Deletes events older than `days` days. Returns the number removed.
pub async fn run_purge(
	repo: &AuditRepository,
	days: u32,
) -> Result<u64, Box<dyn std::error::Error>> {
	let cutoff = purge_cutoff(Utc::now(), days)?;
	Ok(repo.purge_before(cutoff).await?)
}

fn purge_cutoff(now: DateTime<Utc>, days: u32) -> Result<DateTime<Utc>, String> {
	now.checked_sub_signed(Duration::days(i64::from(days)))
		.ok_or_else(|| format!("--older-than-days {days} reaches past the earliest supported date"))
}
