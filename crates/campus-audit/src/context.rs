// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use serde::{Deserialize, Serialize};

use crate::event::SYSTEM_ACTOR;

/// Caller identity and request metadata, passed explicitly alongside the
/// operation's arguments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
	pub actor_id: Option<String>,
	pub school_id: Option<String>,
	pub correlation_id: Option<String>,
	pub ip_address: Option<String>,
	pub user_agent: Option<String>,
}

impl AuditContext {
	/// Context for background work with no authenticated actor.
	pub fn system() -> Self {
		Self::default()
	}

	pub fn for_actor(actor_id: impl Into<String>) -> Self {
		Self {
			actor_id: Some(actor_id.into()),
			..Self::default()
		}
	}

	pub fn with_school(mut self, school_id: impl Into<String>) -> Self {
		self.school_id = Some(school_id.into());
		self
	}

	pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
		self.correlation_id = Some(correlation_id.into());
		self
	}

	pub fn with_ip_address(mut self, ip: impl Into<String>) -> Self {
		self.ip_address = Some(ip.into());
		self
	}

	pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
		self.user_agent = Some(ua.into());
		self
	}

	pub fn actor(&self) -> &str {
		self.actor_id.as_deref().unwrap_or(SYSTEM_ACTOR)
	}
}
