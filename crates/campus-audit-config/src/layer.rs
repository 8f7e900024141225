// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

use crate::sections::{AuditConfigLayer, DatabaseConfigLayer, LoggingConfigLayer};

/// One partially specified configuration, as produced by a single source.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CampusConfigLayer {
	pub audit: Option<AuditConfigLayer>,
	pub database: Option<DatabaseConfigLayer>,
	pub logging: Option<LoggingConfigLayer>,
}

impl CampusConfigLayer {
	/// Overlay `other` on top of `self`; fields set in `other` win.
	pub fn merge(&mut self, other: Self) {
		merge_section(&mut self.audit, other.audit, AuditConfigLayer::merge);
		merge_section(&mut self.database, other.database, DatabaseConfigLayer::merge);
		merge_section(&mut self.logging, other.logging, LoggingConfigLayer::merge);
	}
}

fn merge_section<T>(base: &mut Option<T>, other: Option<T>, merge: fn(&mut T, T)) {
	match (base.as_mut(), other) {
		(Some(existing), Some(incoming)) => merge(existing, incoming),
		(None, Some(incoming)) => *base = Some(incoming),
		(_, None) => {}
	}
}
