use time::OffsetDateTime;
use uuid::Uuid;

use fara_config::Postgres;
use fara_domain::{
	AuditEntry, AuditOutcome, AuditRange, Chunk, ConversationTurn, RetrievalFilter, Role,
	SourceCategory, chunk_id_for,
};
use fara_storage::{
	Error, VectorIndex,
	db::Db,
	pg_index::PgIndex,
	pg_sessions::PgSessionStore,
	sessions::{SessionCommit, SessionHead, SessionStore},
};
use fara_testkit::TestDatabase;

const DIM: u32 = 3;

async fn bootstrap(test_name: &str) -> Option<(TestDatabase, Db)> {
	let Some(base_dsn) = fara_testkit::env_dsn() else {
		eprintln!("Skipping {test_name}; set FARA_PG_DSN to run this test.");

		return None;
	};
	let test_db = TestDatabase::new(&base_dsn).await.expect("Failed to create test database.");
	let cfg = Postgres { dsn: test_db.dsn().to_string(), pool_max_conns: 2 };
	let db = Db::connect(&cfg).await.expect("Failed to connect to Postgres.");

	db.ensure_schema(DIM).await.expect("Failed to ensure schema.");

	Some((test_db, db))
}

fn chunk(document_id: &str, category: SourceCategory, offset: usize, embedding: [f32; 3]) -> Chunk {
	Chunk {
		chunk_id: chunk_id_for(document_id, offset),
		document_id: document_id.to_string(),
		source_category: category,
		offset,
		chunk_index: 0,
		text: format!("{document_id} at {offset}"),
		embedding: embedding.to_vec(),
		created_at: OffsetDateTime::now_utc(),
	}
}

fn turn(session_id: &str, turn_index: u64, role: Role) -> ConversationTurn {
	ConversationTurn {
		session_id: session_id.to_string(),
		turn_index,
		role,
		text: format!("turn {turn_index}"),
		timestamp: OffsetDateTime::now_utc(),
	}
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set FARA_PG_DSN to run."]
async fn schema_bootstrap_is_idempotent() {
	let Some((test_db, db)) = bootstrap("schema_bootstrap_is_idempotent").await else {
		return;
	};

	db.ensure_schema(DIM).await.expect("Failed to re-run schema.");

	for table in ["fara_chunks", "session_heads", "conversation_turns", "audit_entries"] {
		let count: i64 = sqlx::query_scalar(
			"SELECT count(*) FROM information_schema.tables WHERE table_name = $1",
		)
		.bind(table)
		.fetch_one(&db.pool)
		.await
		.expect("Failed to query schema tables.");

		assert_eq!(count, 1, "missing table {table}");
	}

	db.pool.close().await;
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set FARA_PG_DSN to run."]
async fn pg_index_filters_and_replaces() {
	let Some((test_db, db)) = bootstrap("pg_index_filters_and_replaces").await else {
		return;
	};
	let index = PgIndex::new("index_b", db.pool.clone(), DIM);
	let sox = chunk("sox/a.txt", SourceCategory::Sox, 0, [1.0, 0.0, 0.0]);
	let sec = chunk("public_sec/b.txt", SourceCategory::PublicSec, 0, [0.9, 0.1, 0.0]);

	index.upsert(&[sox.clone(), sec.clone()]).await.expect("Failed to upsert chunks.");
	index.upsert(std::slice::from_ref(&sox)).await.expect("Failed to upsert chunks twice.");

	assert_eq!(index.chunk_ids(None).await.expect("Failed to list chunk ids.").len(), 2);

	let filter = RetrievalFilter {
		source_categories: vec![SourceCategory::PublicSec],
		document_ids: Vec::new(),
	};
	let hits =
		index.search(&[1.0, 0.0, 0.0], 5, Some(&filter)).await.expect("Failed to search index.");

	assert_eq!(hits.len(), 1);
	assert_eq!(hits[0].chunk_id, sec.chunk_id);

	let hits = index.search(&[1.0, 0.0, 0.0], 5, None).await.expect("Failed to search index.");

	assert_eq!(hits[0].chunk_id, sox.chunk_id);
	assert!(hits[0].score > hits[1].score);

	index.delete(&[sox.chunk_id, Uuid::new_v4()]).await.expect("Failed to delete chunks.");

	let ids = index.chunk_ids(Some("sox/a.txt")).await.expect("Failed to list chunk ids.");

	assert!(ids.is_empty());

	db.pool.close().await;
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}

#[tokio::test]
#[ignore = "Requires external Postgres. Set FARA_PG_DSN to run."]
async fn pg_sessions_commit_trim_and_conflict() {
	let Some((test_db, db)) = bootstrap("pg_sessions_commit_trim_and_conflict").await else {
		return;
	};
	let store = PgSessionStore::new(db.pool.clone());
	let turns = [turn("s1", 0, Role::User), turn("s1", 1, Role::Assistant)];
	let audit = AuditEntry {
		session_id: "s1".to_string(),
		sequence: 0,
		query_text: "What is Section 404?".to_string(),
		retrieved_chunk_ids: vec![Uuid::new_v4()],
		outcome: AuditOutcome::Answered { answer_text: "An answer.".to_string(), partial: false },
		timestamp: OffsetDateTime::now_utc(),
	};
	let head = SessionHead { next_turn_index: 2, next_audit_sequence: 1 };

	store
		.commit(SessionCommit {
			session_id: "s1",
			expected_head: SessionHead::default(),
			new_head: head,
			turns: &turns,
			audit: Some(&audit),
			evict_turns_before: Some(1),
		})
		.await
		.expect("Failed to commit session.");

	let snapshot = store.load("s1", 10).await.expect("Failed to load session.");

	assert_eq!(snapshot.head, head);
	assert_eq!(snapshot.turns.len(), 1);
	assert_eq!(snapshot.turns[0].turn_index, 1);

	let stale = store
		.commit(SessionCommit {
			session_id: "s1",
			expected_head: SessionHead::default(),
			new_head: head,
			turns: &[],
			audit: None,
			evict_turns_before: None,
		})
		.await;

	assert!(matches!(stale, Err(Error::Conflict(_))));

	let entries = store.audit("s1", AuditRange::default()).await.expect("Failed to read audit.");

	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0].outcome, audit.outcome);
	assert_eq!(entries[0].retrieved_chunk_ids, audit.retrieved_chunk_ids);

	db.pool.close().await;
	test_db.cleanup().await.expect("Failed to cleanup test database.");
}
