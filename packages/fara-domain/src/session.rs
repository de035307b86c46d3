use std::ops::Range;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	User,
	Assistant,
}
impl Role {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::User => "user",
			Self::Assistant => "assistant",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw {
			"user" => Some(Self::User),
			"assistant" => Some(Self::Assistant),
			_ => None,
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
	pub session_id: String,
	/// Strictly increasing per session, starting at zero, without gaps.
	pub turn_index: u64,
	pub role: Role,
	pub text: String,
	#[serde(with = "crate::time_serde")]
	pub timestamp: OffsetDateTime,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditOutcome {
	Answered { answer_text: String, partial: bool },
	Failed { error_kind: String, message: String },
}
impl AuditOutcome {
	pub fn is_answered(&self) -> bool {
		matches!(self, Self::Answered { .. })
	}
}

/// Compliance record of one query attempt. Never evicted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
	pub session_id: String,
	pub sequence: u64,
	pub query_text: String,
	pub retrieved_chunk_ids: Vec<Uuid>,
	pub outcome: AuditOutcome,
	#[serde(with = "crate::time_serde")]
	pub timestamp: OffsetDateTime,
}

/// Half-open sequence range. Missing bounds are unbounded.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditRange {
	pub start: Option<u64>,
	pub end: Option<u64>,
}
impl AuditRange {
	pub fn contains(&self, sequence: u64) -> bool {
		self.start.is_none_or(|start| sequence >= start)
			&& self.end.is_none_or(|end| sequence < end)
	}
}
impl From<Range<u64>> for AuditRange {
	fn from(range: Range<u64>) -> Self {
		Self { start: Some(range.start), end: Some(range.end) }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn audit_outcome_is_tagged_by_status() {
		let json = serde_json::to_value(AuditOutcome::Failed {
			error_kind: "retrieval_error".to_string(),
			message: "Both indexes failed.".to_string(),
		})
		.expect("serialize failed");

		assert_eq!(json["status"], "failed");
		assert_eq!(json["error_kind"], "retrieval_error");
	}

	#[test]
	fn audit_range_is_half_open() {
		let range = AuditRange::from(2..4);

		assert!(!range.contains(1));
		assert!(range.contains(2));
		assert!(range.contains(3));
		assert!(!range.contains(4));
		assert!(AuditRange::default().contains(u64::MAX));
	}
}
