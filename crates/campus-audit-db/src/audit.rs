// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Read side of the `audit_events` table.
//!
//! Rows are written by [`campus_audit::SqliteAuditSink`]; this repository
//! answers filtered, paginated queries over them and prunes old rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use campus_audit::{
	storage_timestamp, AuditAction, AuditEvent, AuditOutcome, AuditPage, AuditQuery,
	AuditSeverity, AuditSinkError, AuditStore,
};

use crate::error::{DbError, Result};

const EVENT_COLUMNS: &str = "id, timestamp, operation, action, resource, resource_id, severity, \
	 severity_level, actor_id, school_id, elapsed_ms, outcome, details, correlation_id, \
	 ip_address, user_agent";

enum Param {
	Text(String),
	Int(i64),
}

fn bind_params<'q>(
	mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
	params: &[Param],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
	for param in params {
		query = match param {
			Param::Text(v) => query.bind(v.clone()),
			Param::Int(v) => query.bind(*v),
		};
	}
	query
}

/// Builds the shared WHERE clause for the count and data queries.
fn where_clause(query: &AuditQuery) -> (String, Vec<Param>) {
	let mut conditions = vec!["1=1".to_string()];
	let mut params = Vec::new();

	let text_filters = [
		("resource", &query.resource),
		("resource_id", &query.resource_id),
		("actor_id", &query.actor_id),
		("school_id", &query.school_id),
	];
	for (column, value) in text_filters {
		if let Some(v) = value {
			conditions.push(format!("{column} = ?"));
			params.push(Param::Text(v.clone()));
		}
	}
	if let Some(severity) = query.min_severity {
		conditions.push("severity_level >= ?".to_string());
		params.push(Param::Int(i64::from(severity.level())));
	}
	if let Some(action) = query.action {
		conditions.push("action = ?".to_string());
		params.push(Param::Text(action.as_str().to_string()));
	}
	if let Some(since) = query.since {
		conditions.push("timestamp >= ?".to_string());
		params.push(Param::Text(storage_timestamp(&since)));
	}
	if let Some(until) = query.until {
		conditions.push("timestamp < ?".to_string());
		params.push(Param::Text(storage_timestamp(&until)));
	}

	(conditions.join(" AND "), params)
}

fn parse_row(row: &SqliteRow) -> Result<AuditEvent> {
	let id_str: String = row.try_get("id")?;
	let invalid = |reason: String| DbError::InvalidRow {
		id: id_str.clone(),
		reason,
	};

	let id = Uuid::parse_str(&id_str).map_err(|e| invalid(format!("id: {e}")))?;
	let ts_str: String = row.try_get("timestamp")?;
	let timestamp = DateTime::parse_from_rfc3339(&ts_str)
		.map(|dt| dt.with_timezone(&Utc))
		.map_err(|e| invalid(format!("timestamp: {e}")))?;
	let action = row
		.try_get::<String, _>("action")?
		.parse::<AuditAction>()
		.map_err(|e| invalid(format!("action: {e}")))?;
	let level: i64 = row.try_get("severity_level")?;
	let severity = u8::try_from(level)
		.ok()
		.and_then(AuditSeverity::from_level)
		.ok_or_else(|| invalid(format!("severity level {level}")))?;
	let outcome = row
		.try_get::<String, _>("outcome")?
		.parse::<AuditOutcome>()
		.map_err(|e| invalid(format!("outcome: {e}")))?;
	let elapsed: i64 = row.try_get("elapsed_ms")?;
	let details_str: String = row.try_get("details")?;

	Ok(AuditEvent {
		id,
		timestamp,
		operation: row.try_get("operation")?,
		action,
		resource: row.try_get("resource")?,
		resource_id: row.try_get("resource_id")?,
		severity,
		actor_id: row.try_get("actor_id")?,
		school_id: row.try_get("school_id")?,
		elapsed_ms: u64::try_from(elapsed).unwrap_or(0),
		outcome,
		details: serde_json::from_str(&details_str)?,
		correlation_id: row.try_get("correlation_id")?,
		ip_address: row.try_get("ip_address")?,
		user_agent: row.try_get("user_agent")?,
	})
}

pub struct AuditRepository {
	pool: SqlitePool,
}

impl AuditRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	/// Newest first. `total` counts every matching row, ignoring pagination.
	/// Rows that no longer parse are skipped with a warning.
	#[tracing::instrument(skip(self))]
	pub async fn query_events(&self, query: &AuditQuery) -> Result<AuditPage> {
		let (where_clause, params) = where_clause(query);

		let count_sql = format!("SELECT COUNT(*) as cnt FROM audit_events WHERE {where_clause}");
		let count_row = bind_params(sqlx::query(&count_sql), &params)
			.fetch_one(&self.pool)
			.await?;
		let total: i64 = count_row.try_get("cnt")?;

		let data_sql = format!(
			"SELECT {EVENT_COLUMNS} FROM audit_events WHERE {where_clause} \
			 ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?"
		);
		let rows = bind_params(sqlx::query(&data_sql), &params)
			.bind(i64::from(query.effective_limit()))
			.bind(i64::from(query.offset))
			.fetch_all(&self.pool)
			.await?;

		let events = rows
			.iter()
			.filter_map(|row| match parse_row(row) {
				Ok(event) => Some(event),
				Err(e) => {
					tracing::warn!(error = %e, "skipping unreadable audit row");
					None
				}
			})
			.collect();

		Ok(AuditPage {
			events,
			total: u64::try_from(total).unwrap_or(0),
		})
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_event(&self, id: Uuid) -> Result<Option<AuditEvent>> {
		let sql = format!("SELECT {EVENT_COLUMNS} FROM audit_events WHERE id = ?");
		let row = sqlx::query(&sql)
			.bind(id.to_string())
			.fetch_optional(&self.pool)
			.await?;
		row.as_ref().map(parse_row).transpose()
	}

	/// Delete events older than `cutoff`. Returns the number of rows removed.
	#[tracing::instrument(skip(self))]
	pub async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<u64> {
		let result = sqlx::query("DELETE FROM audit_events WHERE timestamp < ?")
			.bind(storage_timestamp(&cutoff))
			.execute(&self.pool)
			.await?;
		let removed = result.rows_affected();
		tracing::info!(removed, cutoff = %cutoff, "purged audit events");
		Ok(removed)
	}
}

#[async_trait]
impl AuditStore for AuditRepository {
	async fn query(&self, query: &AuditQuery) -> std::result::Result<AuditPage, AuditSinkError> {
		Ok(self.query_events(query).await?)
	}
}
