//! Session persistence in Postgres. Audit rows are insert-only.

use sqlx::{PgPool, Postgres, Row, Transaction, types::Json};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
	BoxFuture, Error, Result, db,
	sessions::{SessionCommit, SessionHead, SessionSnapshot, SessionStore},
};
use fara_domain::{AuditEntry, AuditOutcome, AuditRange, ConversationTurn, Role};

pub struct PgSessionStore {
	pool: PgPool,
}
impl PgSessionStore {
	pub fn new(pool: PgPool) -> Self {
		Self { pool }
	}

	async fn commit_inner(&self, commit: &SessionCommit<'_>) -> Result<()> {
		let mut tx = self.pool.begin().await?;
		let current = lock_head(&mut tx, commit.session_id).await?;

		if current.unwrap_or_default() != commit.expected_head {
			return Err(Error::Conflict(format!(
				"Session {} head moved from {:?} to {:?}.",
				commit.session_id, commit.expected_head, current
			)));
		}

		for turn in commit.turns {
			sqlx::query(
				"\
INSERT INTO conversation_turns (session_id, turn_index, role, text, created_at)
VALUES ($1, $2, $3, $4, $5)",
			)
			.bind(commit.session_id)
			.bind(to_i64(turn.turn_index)?)
			.bind(turn.role.as_str())
			.bind(turn.text.as_str())
			.bind(turn.timestamp)
			.execute(&mut *tx)
			.await
			.map_err(conflict_or_sqlx)?;
		}

		if let Some(entry) = commit.audit {
			sqlx::query(
				"\
INSERT INTO audit_entries (
	session_id,
	sequence,
	query_text,
	retrieved_chunk_ids,
	outcome,
	created_at
)
VALUES ($1, $2, $3, $4, $5, $6)",
			)
			.bind(commit.session_id)
			.bind(to_i64(entry.sequence)?)
			.bind(entry.query_text.as_str())
			.bind(entry.retrieved_chunk_ids.as_slice())
			.bind(Json(&entry.outcome))
			.bind(entry.timestamp)
			.execute(&mut *tx)
			.await
			.map_err(conflict_or_sqlx)?;
		}
		if let Some(before) = commit.evict_turns_before {
			sqlx::query("DELETE FROM conversation_turns WHERE session_id = $1 AND turn_index < $2")
				.bind(commit.session_id)
				.bind(to_i64(before)?)
				.execute(&mut *tx)
				.await?;
		}

		sqlx::query(
			"\
INSERT INTO session_heads (session_id, next_turn_index, next_audit_sequence, updated_at)
VALUES ($1, $2, $3, now())
ON CONFLICT (session_id) DO UPDATE
SET
	next_turn_index = EXCLUDED.next_turn_index,
	next_audit_sequence = EXCLUDED.next_audit_sequence,
	updated_at = EXCLUDED.updated_at",
		)
		.bind(commit.session_id)
		.bind(to_i64(commit.new_head.next_turn_index)?)
		.bind(to_i64(commit.new_head.next_audit_sequence)?)
		.execute(&mut *tx)
		.await
		.map_err(conflict_or_sqlx)?;

		tx.commit().await?;

		Ok(())
	}

	async fn load_inner(&self, session_id: &str, max_turns: usize) -> Result<SessionSnapshot> {
		let head = sqlx::query(
			"SELECT next_turn_index, next_audit_sequence FROM session_heads WHERE session_id = $1",
		)
		.bind(session_id)
		.fetch_optional(&self.pool)
		.await?
		.map(|row| read_head(&row))
		.transpose()?
		.unwrap_or_default();
		let rows = sqlx::query(
			"\
SELECT turn_index, role, text, created_at
FROM conversation_turns
WHERE session_id = $1
ORDER BY turn_index DESC
LIMIT $2",
		)
		.bind(session_id)
		.bind(max_turns as i64)
		.fetch_all(&self.pool)
		.await?;
		let mut turns = Vec::with_capacity(rows.len());

		for row in rows.iter().rev() {
			let raw_role: String = row.try_get("role")?;
			let role = Role::parse(&raw_role).ok_or_else(|| {
				Error::InvalidArgument(format!("Stored turn has unknown role {raw_role:?}."))
			})?;

			turns.push(ConversationTurn {
				session_id: session_id.to_string(),
				turn_index: row.try_get::<i64, _>("turn_index")? as u64,
				role,
				text: row.try_get("text")?,
				timestamp: row.try_get("created_at")?,
			});
		}

		Ok(SessionSnapshot { head, turns })
	}

	async fn audit_inner(&self, session_id: &str, range: AuditRange) -> Result<Vec<AuditEntry>> {
		let start = range.start.map(to_i64).transpose()?;
		let end = range.end.map(to_i64).transpose()?;
		let rows = sqlx::query(
			"\
SELECT sequence, query_text, retrieved_chunk_ids, outcome, created_at
FROM audit_entries
WHERE session_id = $1
	AND ($2::bigint IS NULL OR sequence >= $2)
	AND ($3::bigint IS NULL OR sequence < $3)
ORDER BY sequence ASC",
		)
		.bind(session_id)
		.bind(start)
		.bind(end)
		.fetch_all(&self.pool)
		.await?;
		let mut entries = Vec::with_capacity(rows.len());

		for row in rows {
			let Json(outcome): Json<AuditOutcome> = row.try_get("outcome")?;
			let retrieved_chunk_ids: Vec<Uuid> = row.try_get("retrieved_chunk_ids")?;

			entries.push(AuditEntry {
				session_id: session_id.to_string(),
				sequence: row.try_get::<i64, _>("sequence")? as u64,
				query_text: row.try_get("query_text")?,
				retrieved_chunk_ids,
				outcome,
				timestamp: row.try_get("created_at")?,
			});
		}

		Ok(entries)
	}
}
impl SessionStore for PgSessionStore {
	fn load<'a>(
		&'a self,
		session_id: &'a str,
		max_turns: usize,
	) -> BoxFuture<'a, Result<SessionSnapshot>> {
		Box::pin(self.load_inner(session_id, max_turns))
	}

	fn commit<'a>(&'a self, commit: SessionCommit<'a>) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move { self.commit_inner(&commit).await })
	}

	fn audit<'a>(
		&'a self,
		session_id: &'a str,
		range: AuditRange,
	) -> BoxFuture<'a, Result<Vec<AuditEntry>>> {
		Box::pin(self.audit_inner(session_id, range))
	}

	fn evict_turns_older_than(&self, cutoff: OffsetDateTime) -> BoxFuture<'_, Result<u64>> {
		Box::pin(async move {
			let result = sqlx::query("DELETE FROM conversation_turns WHERE created_at < $1")
				.bind(cutoff)
				.execute(&self.pool)
				.await?;

			Ok(result.rows_affected())
		})
	}
}

async fn lock_head(
	tx: &mut Transaction<'_, Postgres>,
	session_id: &str,
) -> Result<Option<SessionHead>> {
	let row = sqlx::query(
		"\
SELECT next_turn_index, next_audit_sequence
FROM session_heads
WHERE session_id = $1
FOR UPDATE",
	)
	.bind(session_id)
	.fetch_optional(&mut **tx)
	.await?;

	row.map(|row| read_head(&row)).transpose()
}

fn read_head(row: &sqlx::postgres::PgRow) -> Result<SessionHead> {
	Ok(SessionHead {
		next_turn_index: row.try_get::<i64, _>("next_turn_index")? as u64,
		next_audit_sequence: row.try_get::<i64, _>("next_audit_sequence")? as u64,
	})
}

fn to_i64(value: u64) -> Result<i64> {
	i64::try_from(value)
		.map_err(|_| Error::InvalidArgument(format!("Index {value} exceeds the storage range.")))
}

fn conflict_or_sqlx(err: sqlx::Error) -> Error {
	if let Some(db_err) = err.as_database_error()
		&& db_err.is_unique_violation()
	{
		return Error::Conflict(db_err.message().to_string());
	}
	if db::is_unreachable(&err) {
		return Error::Unavailable { index: "sessions".to_string(), message: err.to_string() };
	}

	Error::Sqlx(err)
}
