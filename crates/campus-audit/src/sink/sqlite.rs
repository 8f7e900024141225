// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::error::AuditSinkError;
use crate::event::{storage_timestamp, AuditEvent};
use crate::sink::AuditSink;

/// Appends events to the `audit_events` table.
pub struct SqliteAuditSink {
	pool: SqlitePool,
	name: String,
}

impl SqliteAuditSink {
	pub fn new(pool: SqlitePool) -> Self {
		Self {
			pool,
			name: "sqlite".to_string(),
		}
	}
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
	fn name(&self) -> &str {
		&self.name
	}

	async fn publish(&self, event: Arc<AuditEvent>) -> Result<(), AuditSinkError> {
		let details_json = serde_json::to_string(&event.details)
			.map_err(|e| AuditSinkError::Permanent(format!("failed to serialize details: {e}")))?;

		let now = chrono::Utc::now();

		sqlx::query(
			r#"
			INSERT INTO audit_events (
				id, timestamp, operation, action, resource, resource_id,
				severity, severity_level, actor_id, school_id, elapsed_ms,
				outcome, details, correlation_id, ip_address, user_agent, created_at
			) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
			"#,
		)
		.bind(event.id.to_string())
		.bind(storage_timestamp(&event.timestamp))
		.bind(&event.operation)
		.bind(event.action.as_str())
		.bind(&event.resource)
		.bind(&event.resource_id)
		.bind(event.severity.to_string())
		.bind(i64::from(event.severity.level()))
		.bind(&event.actor_id)
		.bind(&event.school_id)
		.bind(i64::try_from(event.elapsed_ms).unwrap_or(i64::MAX))
		.bind(event.outcome.to_string())
		.bind(&details_json)
		.bind(&event.correlation_id)
		.bind(&event.ip_address)
		.bind(&event.user_agent)
		.bind(storage_timestamp(&now))
		.execute(&self.pool)
		.await
		.map_err(|e| {
			if is_transient_error(&e) {
				AuditSinkError::Transient(format!("database error: {e}"))
			} else {
				AuditSinkError::Permanent(format!("database error: {e}"))
			}
		})?;

		Ok(())
	}

	async fn health_check(&self) -> Result<(), AuditSinkError> {
		sqlx::query("SELECT 1")
			.execute(&self.pool)
			.await
			.map_err(|e| AuditSinkError::Transient(format!("health check failed: {e}")))?;
		Ok(())
	}
}

/// Busy, locked and pool exhaustion errors are worth retrying. Constraint
/// violations and schema errors are not.
pub fn is_transient_error(e: &sqlx::Error) -> bool {
	match e {
		sqlx::Error::Io(_) => true,
		sqlx::Error::PoolTimedOut => true,
		sqlx::Error::PoolClosed => true,
		sqlx::Error::Database(db_err) => {
			let msg = db_err.message().to_lowercase();
			msg.contains("busy") || msg.contains("locked") || msg.contains("timeout")
		}
		_ => false,
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::event::{AuditAction, AuditSeverity};
	use sqlx::sqlite::SqlitePoolOptions;
	use sqlx::Row;

	// One connection, so every query sees the same in-memory database.
	async fn pool_without_table() -> SqlitePool {
		SqlitePoolOptions::new()
			.max_connections(1)
			.connect("sqlite::memory:")
			.await
			.unwrap()
	}

	async fn pool_with_table() -> SqlitePool {
		let pool = pool_without_table().await;
		sqlx::query(
			r#"
			CREATE TABLE audit_events (
				id TEXT PRIMARY KEY,
				timestamp TEXT NOT NULL,
				operation TEXT NOT NULL,
				action TEXT NOT NULL,
				resource TEXT NOT NULL,
				resource_id TEXT,
				severity TEXT NOT NULL,
				severity_level INTEGER NOT NULL,
				actor_id TEXT NOT NULL,
				school_id TEXT,
				elapsed_ms INTEGER NOT NULL,
				outcome TEXT NOT NULL,
				details TEXT NOT NULL,
				correlation_id TEXT,
				ip_address TEXT,
				user_agent TEXT,
				created_at TEXT NOT NULL
			)
			"#,
		)
		.execute(&pool)
		.await
		.unwrap();
		pool
	}

	#[tokio::test]
	async fn publish_inserts_row() {
		let pool = pool_with_table().await;
		let sink = SqliteAuditSink::new(pool.clone());

		let event = AuditEvent::builder(AuditAction::DataDeleted, "student")
			.resource_id("s-9")
			.severity(AuditSeverity::High)
			.build();
		sink.publish(Arc::new(event.clone())).await.unwrap();

		let row = sqlx::query(
			"SELECT action, severity, severity_level, actor_id FROM audit_events WHERE id = ?",
		)
		.bind(event.id.to_string())
		.fetch_one(&pool)
		.await
		.unwrap();
		assert_eq!(row.get::<String, _>("action"), "DATA_DELETED");
		assert_eq!(row.get::<String, _>("severity"), "HIGH");
		assert_eq!(row.get::<i64, _>("severity_level"), 3);
		assert_eq!(row.get::<String, _>("actor_id"), "system");
	}

	#[tokio::test]
	async fn missing_table_is_permanent() {
		let sink = SqliteAuditSink::new(pool_without_table().await);
		let event = AuditEvent::builder(AuditAction::DataCreated, "staff").build();

		let err = sink.publish(Arc::new(event)).await.unwrap_err();
		assert!(!err.is_transient());
	}

	#[tokio::test]
	async fn health_check_succeeds_on_open_pool() {
		let sink = SqliteAuditSink::new(pool_without_table().await);
		sink.health_check().await.unwrap();
	}

	#[test]
	fn pool_timeout_is_transient() {
		assert!(is_transient_error(&sqlx::Error::PoolTimedOut));
		assert!(!is_transient_error(&sqlx::Error::RowNotFound));
	}
}
