//! Per-session conversation windows and audit logs.
//!
//! Every write for one session runs under that session's lock and commits to the
//! [`SessionStore`] before the in-process window changes. Sessions never contend with each other.

use std::{
	collections::{HashMap, VecDeque},
	sync::{Arc, Mutex, MutexGuard},
	time::Duration as StdDuration,
};

use time::{Duration, OffsetDateTime};
use tokio::{
	sync::Mutex as SessionLock,
	task::JoinHandle,
	time::{self as tokio_time, MissedTickBehavior},
};
use uuid::Uuid;

use crate::{CancelSignal, Error, Result};
use fara_domain::{AuditEntry, AuditOutcome, AuditRange, ConversationTurn, Role};
use fara_storage::sessions::{SessionCommit, SessionHead, SessionStore};

/// Turns and audit entry written together for one answered query.
#[derive(Clone, Debug)]
pub struct Exchange {
	pub user_turn: ConversationTurn,
	pub assistant_turn: ConversationTurn,
	pub audit: AuditEntry,
}

#[derive(Default)]
struct SessionState {
	hydrated: bool,
	head: SessionHead,
	/// Retained window, oldest first, contiguous in turn index.
	turns: VecDeque<ConversationTurn>,
}

struct PendingWrite {
	turns: Vec<ConversationTurn>,
	audit: Option<AuditEntry>,
	new_head: SessionHead,
}

type SessionSlot = Arc<SessionLock<SessionState>>;

pub struct MemoryTool {
	cfg: fara_config::Memory,
	store: Arc<dyn SessionStore>,
	sessions: Mutex<HashMap<String, SessionSlot>>,
}
impl MemoryTool {
	pub fn new(cfg: fara_config::Memory, store: Arc<dyn SessionStore>) -> Self {
		Self { cfg, store, sessions: Mutex::new(HashMap::new()) }
	}

	pub async fn append_turn(
		&self,
		session_id: &str,
		role: Role,
		text: &str,
		cancel: &CancelSignal,
	) -> Result<ConversationTurn> {
		let session_id = validate_session_id(session_id)?;

		self.write(session_id, cancel, |head, now| {
			let turn = new_turn(session_id, head.next_turn_index, role, text, now);
			let pending = PendingWrite {
				turns: vec![turn.clone()],
				audit: None,
				new_head: SessionHead { next_turn_index: head.next_turn_index + 1, ..head },
			};

			(pending, turn)
		})
		.await
	}

	/// Retained turns, oldest first, limited to the most recent `max_turns` and to turns no older
	/// than `max_age`.
	pub async fn get_recent(
		&self,
		session_id: &str,
		max_turns: Option<usize>,
		max_age: Option<Duration>,
	) -> Result<Vec<ConversationTurn>> {
		let session_id = validate_session_id(session_id)?;
		let slot = self.slot(session_id);
		let mut state = slot.lock().await;

		self.hydrate(session_id, &mut state).await?;

		let now = OffsetDateTime::now_utc();
		let cutoff = [max_age, self.window_age()]
			.into_iter()
			.flatten()
			.min()
			.and_then(|age| now.checked_sub(age));
		let limit = max_turns.unwrap_or(usize::MAX).min(self.cfg.window_turns as usize);
		let recent: Vec<ConversationTurn> = state
			.turns
			.iter()
			.filter(|turn| cutoff.is_none_or(|cutoff| turn.timestamp >= cutoff))
			.cloned()
			.collect();
		let skip = recent.len().saturating_sub(limit);

		Ok(recent.into_iter().skip(skip).collect())
	}

	pub async fn append_audit(
		&self,
		session_id: &str,
		query_text: &str,
		chunk_ids: &[Uuid],
		outcome: AuditOutcome,
		cancel: &CancelSignal,
	) -> Result<AuditEntry> {
		let session_id = validate_session_id(session_id)?;

		self.write(session_id, cancel, |head, now| {
			let entry = AuditEntry {
				session_id: session_id.to_string(),
				sequence: head.next_audit_sequence,
				query_text: query_text.to_string(),
				retrieved_chunk_ids: chunk_ids.to_vec(),
				outcome,
				timestamp: now,
			};
			let pending = PendingWrite {
				turns: Vec::new(),
				audit: Some(entry.clone()),
				new_head: SessionHead {
					next_audit_sequence: head.next_audit_sequence + 1,
					..head
				},
			};

			(pending, entry)
		})
		.await
	}

	pub async fn get_audit(&self, session_id: &str, range: AuditRange) -> Result<Vec<AuditEntry>> {
		let session_id = validate_session_id(session_id)?;

		Ok(self.store.audit(session_id, range).await?)
	}

	/// Appends the user turn, the assistant turn and the answered audit entry in one commit.
	pub async fn record_exchange(
		&self,
		session_id: &str,
		query_text: &str,
		answer_text: &str,
		chunk_ids: &[Uuid],
		partial: bool,
		cancel: &CancelSignal,
	) -> Result<Exchange> {
		let session_id = validate_session_id(session_id)?;

		self.write(session_id, cancel, |head, now| {
			let user_turn = new_turn(session_id, head.next_turn_index, Role::User, query_text, now);
			let assistant_turn = new_turn(
				session_id,
				head.next_turn_index + 1,
				Role::Assistant,
				answer_text,
				now,
			);
			let audit = AuditEntry {
				session_id: session_id.to_string(),
				sequence: head.next_audit_sequence,
				query_text: query_text.to_string(),
				retrieved_chunk_ids: chunk_ids.to_vec(),
				outcome: AuditOutcome::Answered { answer_text: answer_text.to_string(), partial },
				timestamp: now,
			};
			let pending = PendingWrite {
				turns: vec![user_turn.clone(), assistant_turn.clone()],
				audit: Some(audit.clone()),
				new_head: SessionHead {
					next_turn_index: head.next_turn_index + 2,
					next_audit_sequence: head.next_audit_sequence + 1,
				},
			};

			(pending, Exchange { user_turn, assistant_turn, audit })
		})
		.await
	}

	/// Drops turns older than the configured age window from the store and from every cached
	/// window, then releases idle sessions whose window is empty. Audit entries are untouched.
	pub async fn evict_expired(&self) -> Result<u64> {
		let cutoff = self.window_age().and_then(|age| OffsetDateTime::now_utc().checked_sub(age));
		let mut removed = 0;

		if let Some(cutoff) = cutoff {
			removed = self.store.evict_turns_older_than(cutoff).await?;

			let slots: Vec<SessionSlot> = self.lock_sessions().values().cloned().collect();

			for slot in slots {
				let mut state = slot.lock().await;

				while state.turns.front().is_some_and(|turn| turn.timestamp < cutoff) {
					state.turns.pop_front();
				}
			}
		}

		let released = self.release_idle_sessions();

		if released > 0 {
			tracing::debug!(released, "Idle session slots released.");
		}

		Ok(removed)
	}

	/// Forgets cached sessions that nobody holds and whose window is empty. They reload from the
	/// store on next use.
	fn release_idle_sessions(&self) -> usize {
		let mut sessions = self.lock_sessions();
		let before = sessions.len();

		// Clones are only handed out under this map lock, so a count of one means no waiters.
		sessions.retain(|_, slot| {
			Arc::strong_count(slot) > 1
				|| slot.try_lock().map_or(true, |state| !state.turns.is_empty())
		});

		before - sessions.len()
	}

	/// Starts the periodic age sweep. Returns `None` when no age window or interval is set.
	pub fn spawn_sweeper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
		if self.cfg.sweep_interval_secs == 0 || self.cfg.window_minutes.is_none() {
			return None;
		}

		let memory = Arc::clone(self);
		let period = StdDuration::from_secs(self.cfg.sweep_interval_secs);

		Some(tokio::spawn(async move {
			let mut ticker = tokio_time::interval(period);

			ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

			loop {
				ticker.tick().await;

				match memory.evict_expired().await {
					Ok(0) => {},
					Ok(removed) => tracing::info!(removed, "Expired conversation turns evicted."),
					Err(err) => tracing::warn!(error = %err, "Conversation sweep failed."),
				}
			}
		}))
	}

	fn lock_sessions(&self) -> MutexGuard<'_, HashMap<String, SessionSlot>> {
		self.sessions.lock().unwrap_or_else(|err| err.into_inner())
	}

	fn slot(&self, session_id: &str) -> SessionSlot {
		self.lock_sessions().entry(session_id.to_string()).or_default().clone()
	}

	fn window_age(&self) -> Option<Duration> {
		let minutes = self.cfg.window_minutes?;

		Duration::try_from(StdDuration::from_secs(minutes.saturating_mul(60))).ok()
	}

	async fn hydrate(&self, session_id: &str, state: &mut SessionState) -> Result<()> {
		if state.hydrated {
			return Ok(());
		}

		let snapshot = self.store.load(session_id, self.cfg.window_turns as usize).await?;

		state.head = snapshot.head;
		state.turns = snapshot.turns.into();
		state.hydrated = true;

		Ok(())
	}

	async fn write<T>(
		&self,
		session_id: &str,
		cancel: &CancelSignal,
		build: impl FnOnce(SessionHead, OffsetDateTime) -> (PendingWrite, T),
	) -> Result<T> {
		let slot = self.slot(session_id);
		let mut state = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(Error::Cancelled),
			state = slot.lock() => state,
		};

		self.hydrate(session_id, &mut state).await?;

		if cancel.is_cancelled() {
			return Err(Error::Cancelled);
		}

		let now = OffsetDateTime::now_utc();
		let (pending, output) = build(state.head, now);
		let evict_before = self.first_retained(&state.turns, &pending.turns, now);
		let commit = SessionCommit {
			session_id,
			expected_head: state.head,
			new_head: pending.new_head,
			turns: &pending.turns,
			audit: pending.audit.as_ref(),
			evict_turns_before: evict_before,
		};

		if let Err(err) = self.store.commit(commit).await {
			// The stored head may have moved. Reload before the next write.
			state.hydrated = false;

			tracing::error!(session_id, error = %err, "Session commit rejected.");

			return Err(err.into());
		}

		state.head = pending.new_head;
		state.turns.extend(pending.turns);

		if let Some(before) = evict_before {
			while state.turns.front().is_some_and(|turn| turn.turn_index < before) {
				state.turns.pop_front();
			}
		}

		Ok(output)
	}

	/// Lowest turn index still inside the window once `new_turns` are appended.
	fn first_retained(
		&self,
		cached: &VecDeque<ConversationTurn>,
		new_turns: &[ConversationTurn],
		now: OffsetDateTime,
	) -> Option<u64> {
		let turns: Vec<&ConversationTurn> = cached.iter().chain(new_turns).collect();
		let by_count = turns.len().saturating_sub(self.cfg.window_turns as usize);
		let by_age = self.window_age().and_then(|age| now.checked_sub(age)).map_or(0, |cutoff| {
			turns.iter().position(|turn| turn.timestamp >= cutoff).unwrap_or(turns.len())
		});

		turns
			.get(by_count.max(by_age))
			.map(|turn| turn.turn_index)
			.or_else(|| turns.last().map(|turn| turn.turn_index + 1))
	}
}

fn validate_session_id(session_id: &str) -> Result<&str> {
	let trimmed = session_id.trim();

	if trimmed.is_empty() {
		return Err(Error::InvalidRequest { message: "session_id must be non-empty.".to_string() });
	}

	Ok(trimmed)
}

fn new_turn(
	session_id: &str,
	turn_index: u64,
	role: Role,
	text: &str,
	timestamp: OffsetDateTime,
) -> ConversationTurn {
	ConversationTurn {
		session_id: session_id.to_string(),
		turn_index,
		role,
		text: text.to_string(),
		timestamp,
	}
}
