// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

mod audit;
mod database;
mod logging;

pub use audit::{AuditConfig, AuditConfigLayer, QueueOverflowPolicy, SensitiveFieldMode};
pub use database::{DatabaseConfig, DatabaseConfigLayer};
pub use logging::{LoggingConfig, LoggingConfigLayer};
