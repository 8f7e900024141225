// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Audit pipeline backed by an on-disk SQLite database.
//!
//! Tests cover:
//! - Intercepted operations persisted through the dispatcher and read back
//! - Redaction applied before rows are written
//! - Failure outcomes stored with escalated severity

use std::sync::Arc;

use campus_audit::{
	AuditAction, AuditConfig, AuditContext, AuditOutcome, AuditPolicy, AuditQuery, AuditService,
	AuditSeverity, AuditStore, FixedRandom, PolicyRegistry, SqliteAuditSink,
};
use campus_audit_db::{create_pool, run_migrations, AuditRepository};
use serde_json::json;

fn registry() -> PolicyRegistry {
	PolicyRegistry::builder()
		.operation(
			"grade::submit",
			AuditPolicy::builder()
				.action(AuditAction::DataCreated)
				.resource("grade")
				.resource_id("args[0].student_id")
				.redact(["comment"])
				.build(),
		)
		.build()
		.unwrap()
}

#[tokio::test]
async fn intercepted_operations_land_in_sqlite() {
	let dir = tempfile::tempdir().unwrap();
	let url = format!("sqlite:{}", dir.path().join("audit.db").display());
	let pool = create_pool(&url).await.unwrap();
	run_migrations(&pool).await.unwrap();

	let service = AuditService::builder(AuditConfig::default())
		.registry(registry())
		.sink(Arc::new(SqliteAuditSink::new(pool.clone())))
		.random_source(Arc::new(FixedRandom(0.0)))
		.build();
	let interceptor = service.interceptor();
	let ctx = AuditContext::for_actor("instructor-4").with_school("school-1");

	let ok: Result<u8, String> = interceptor
		.intercept(
			"grade::submit",
			&ctx,
			json!({ "student_id": "stu-1", "grade": 91, "comment": "private note" }),
			|_| async { Ok(91) },
		)
		.await;
	assert_eq!(ok.unwrap(), 91);

	let failed: Result<u8, String> = interceptor
		.intercept(
			"grade::submit",
			&ctx,
			json!({ "student_id": "stu-2", "grade": 140 }),
			|_| async { Err("grade out of range".to_string()) },
		)
		.await;
	assert!(failed.is_err());

	service.shutdown().await;
	assert_eq!(service.stats().persisted, 2);

	let repo = AuditRepository::new(pool);
	let page = repo.query(&AuditQuery::new().resource("grade")).await.unwrap();
	assert_eq!(page.total, 2);

	let stored = repo
		.query_events(&AuditQuery::new().resource_id("stu-1"))
		.await
		.unwrap();
	let event = &stored.events[0];
	assert_eq!(event.actor_id, "instructor-4");
	assert_eq!(event.details["args"]["comment"], "[REDACTED]");
	assert!(!event.details.to_string().contains("private note"));

	let failures = repo
		.query_events(&AuditQuery::new().min_severity(AuditSeverity::High))
		.await
		.unwrap();
	assert_eq!(failures.total, 1);
	assert_eq!(failures.events[0].outcome, AuditOutcome::Failure);
	assert_eq!(failures.events[0].details["error"], "grade out of range");
}
