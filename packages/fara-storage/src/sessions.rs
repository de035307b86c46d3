//! Persistence for conversation windows and audit logs.

use std::{
	collections::{BTreeMap, HashMap},
	sync::{Mutex, MutexGuard},
};

use time::OffsetDateTime;

use crate::{BoxFuture, Error, Result};
use fara_domain::{AuditEntry, AuditRange, ConversationTurn};

/// Next free indices of a session. Both counters only move forward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionHead {
	pub next_turn_index: u64,
	pub next_audit_sequence: u64,
}

#[derive(Clone, Debug, Default)]
pub struct SessionSnapshot {
	pub head: SessionHead,
	/// Most recent retained turns, oldest first.
	pub turns: Vec<ConversationTurn>,
}

/// One atomic session write: new turns, an optional audit entry, the head move and trimming.
#[derive(Clone, Debug)]
pub struct SessionCommit<'a> {
	pub session_id: &'a str,
	/// Head the writer observed. A mismatch means another writer got there first.
	pub expected_head: SessionHead,
	pub new_head: SessionHead,
	pub turns: &'a [ConversationTurn],
	pub audit: Option<&'a AuditEntry>,
	/// Turns with a lower index are dropped. Audit entries are never dropped.
	pub evict_turns_before: Option<u64>,
}

pub trait SessionStore
where
	Self: Send + Sync,
{
	fn load<'a>(
		&'a self,
		session_id: &'a str,
		max_turns: usize,
	) -> BoxFuture<'a, Result<SessionSnapshot>>;

	/// Applies the whole commit or nothing. Index collisions fail with [`Error::Conflict`].
	fn commit<'a>(&'a self, commit: SessionCommit<'a>) -> BoxFuture<'a, Result<()>>;

	fn audit<'a>(
		&'a self,
		session_id: &'a str,
		range: AuditRange,
	) -> BoxFuture<'a, Result<Vec<AuditEntry>>>;

	/// Drops turns older than `cutoff` across all sessions and returns how many were removed.
	fn evict_turns_older_than(&self, cutoff: OffsetDateTime) -> BoxFuture<'_, Result<u64>>;
}

#[derive(Default)]
struct StoredSession {
	head: SessionHead,
	turns: BTreeMap<u64, ConversationTurn>,
	audit: Vec<AuditEntry>,
}

/// Process-local session store. State lives as long as the store.
#[derive(Default)]
pub struct MemorySessionStore {
	sessions: Mutex<HashMap<String, StoredSession>>,
}
impl MemorySessionStore {
	pub fn new() -> Self {
		Self::default()
	}

	fn lock(&self) -> MutexGuard<'_, HashMap<String, StoredSession>> {
		self.sessions.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn commit_sync(&self, commit: &SessionCommit<'_>) -> Result<()> {
		let mut sessions = self.lock();
		let current =
			sessions.get(commit.session_id).map(|session| session.head).unwrap_or_default();

		if current != commit.expected_head {
			return Err(Error::Conflict(format!(
				"Session {} head moved from {:?} to {:?}.",
				commit.session_id, commit.expected_head, current
			)));
		}

		let session = sessions.entry(commit.session_id.to_string()).or_default();

		for turn in commit.turns {
			if session.turns.contains_key(&turn.turn_index) {
				return Err(Error::Conflict(format!(
					"Turn {} already exists in session {}.",
					turn.turn_index, commit.session_id
				)));
			}
		}
		if let Some(entry) = commit.audit
			&& session.audit.iter().any(|existing| existing.sequence == entry.sequence)
		{
			return Err(Error::Conflict(format!(
				"Audit entry {} already exists in session {}.",
				entry.sequence, commit.session_id
			)));
		}

		for turn in commit.turns {
			session.turns.insert(turn.turn_index, turn.clone());
		}

		if let Some(entry) = commit.audit {
			session.audit.push(entry.clone());
		}
		if let Some(before) = commit.evict_turns_before {
			session.turns = session.turns.split_off(&before);
		}

		session.head = commit.new_head;

		Ok(())
	}
}
impl SessionStore for MemorySessionStore {
	fn load<'a>(
		&'a self,
		session_id: &'a str,
		max_turns: usize,
	) -> BoxFuture<'a, Result<SessionSnapshot>> {
		Box::pin(async move {
			let sessions = self.lock();
			let Some(session) = sessions.get(session_id) else {
				return Ok(SessionSnapshot::default());
			};
			let skip = session.turns.len().saturating_sub(max_turns);

			Ok(SessionSnapshot {
				head: session.head,
				turns: session.turns.values().skip(skip).cloned().collect(),
			})
		})
	}

	fn commit<'a>(&'a self, commit: SessionCommit<'a>) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move { self.commit_sync(&commit) })
	}

	fn audit<'a>(
		&'a self,
		session_id: &'a str,
		range: AuditRange,
	) -> BoxFuture<'a, Result<Vec<AuditEntry>>> {
		Box::pin(async move {
			let sessions = self.lock();

			Ok(sessions
				.get(session_id)
				.map(|session| {
					session
						.audit
						.iter()
						.filter(|entry| range.contains(entry.sequence))
						.cloned()
						.collect()
				})
				.unwrap_or_default())
		})
	}

	fn evict_turns_older_than(&self, cutoff: OffsetDateTime) -> BoxFuture<'_, Result<u64>> {
		Box::pin(async move {
			let mut removed = 0_u64;

			for session in self.lock().values_mut() {
				let before = session.turns.len();

				session.turns.retain(|_, turn| turn.timestamp >= cutoff);

				removed += (before - session.turns.len()) as u64;
			}

			Ok(removed)
		})
	}
}
