// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! # campus-audit-db
//!
//! SQLite persistence for audit events via sqlx.
//!
//! Writes go through [`campus_audit::SqliteAuditSink`], which the dispatcher
//! drives. Reads go through [`AuditRepository`], which implements
//! [`campus_audit::AuditStore`] so callers can swap it for the in-memory
//! store in tests.
//!
//! ## Timestamps
//!
//! Stored as fixed-width RFC 3339 text (`storage_timestamp`), so the
//! `timestamp` index serves range filters and newest-first ordering.

pub mod audit;
pub mod error;
pub mod pool;

#[cfg(test)]
pub mod testing;

pub use audit::AuditRepository;
pub use error::{DbError, Result};
pub use pool::{create_pool, run_migrations};
