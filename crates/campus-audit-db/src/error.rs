// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use campus_audit::sink::sqlite::is_transient_error;
use campus_audit::AuditSinkError;

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Internal: {0}")]
	Internal(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Invalid row {id}: {reason}")]
	InvalidRow { id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, DbError>;

impl From<DbError> for AuditSinkError {
	fn from(e: DbError) -> Self {
		match &e {
			DbError::Sqlx(inner) if is_transient_error(inner) => {
				AuditSinkError::Transient(e.to_string())
			}
			_ => AuditSinkError::Permanent(e.to_string()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pool_timeouts_are_transient() {
		let err: AuditSinkError = DbError::Sqlx(sqlx::Error::PoolTimedOut).into();
		assert!(err.is_transient());
	}

	#[test]
	fn bad_rows_are_permanent() {
		let err: AuditSinkError = DbError::InvalidRow {
			id: "x".to_string(),
			reason: "bad uuid".to_string(),
		}
		.into();
		assert!(!err.is_transient());
		assert!(err.to_string().contains("bad uuid"));
	}
}
