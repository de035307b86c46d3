use std::{
	collections::BTreeSet,
	fs,
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use serde_json::{Map, Value};
use tokio::time;
use uuid::Uuid;

use fara_config::{
	Chunking, CompletionProviderConfig, Config, Corpus, EmbeddingProviderConfig, Memory,
	Providers as ProviderConfigs, Retrieval, Service, Storage,
};
use fara_domain::{
	AuditEntry, AuditOutcome, AuditRange, Chunk, IndexHit, RetrievalFilter, Role, SourceCategory,
	SourceIndex,
};
use fara_service::{
	BoxFuture, CancelHandle, CancelSignal, CompletionProvider, Error, FaraService, IngestRequest,
	Providers, QueryRequest, RetrieveRequest,
};
use fara_storage::{
	VectorIndex,
	dense::DenseIndex,
	filter_store::FilterStore,
	sessions::{MemorySessionStore, SessionCommit, SessionSnapshot, SessionStore},
};
use ::time::OffsetDateTime;

const DIM: u32 = 64;

#[derive(Default)]
struct StubIndex {
	name: &'static str,
	filterable: bool,
	hits: Vec<IndexHit>,
	fail: bool,
	delay: Option<Duration>,
}
impl VectorIndex for StubIndex {
	fn name(&self) -> &str {
		self.name
	}

	fn supports_filter(&self) -> bool {
		self.filterable
	}

	fn upsert<'a>(&'a self, _chunks: &'a [Chunk]) -> BoxFuture<'a, fara_storage::Result<()>> {
		Box::pin(async move { self.outcome(()) })
	}

	fn delete<'a>(&'a self, _chunk_ids: &'a [Uuid]) -> BoxFuture<'a, fara_storage::Result<()>> {
		Box::pin(async move { self.outcome(()) })
	}

	fn search<'a>(
		&'a self,
		_query: &'a [f32],
		k: usize,
		filter: Option<&'a RetrievalFilter>,
	) -> BoxFuture<'a, fara_storage::Result<Vec<IndexHit>>> {
		Box::pin(async move {
			if let Some(delay) = self.delay {
				time::sleep(delay).await;
			}

			let hits = self
				.hits
				.iter()
				.filter(|hit| {
					filter.is_none_or(|filter| {
						filter.matches(hit.source_category, &hit.document_id)
					})
				})
				.take(k)
				.cloned()
				.collect();

			self.outcome(hits)
		})
	}

	fn chunk_ids<'a>(
		&'a self,
		_document_id: Option<&'a str>,
	) -> BoxFuture<'a, fara_storage::Result<Vec<Uuid>>> {
		Box::pin(async move { self.outcome(Vec::new()) })
	}
}
impl StubIndex {
	fn outcome<T>(&self, value: T) -> fara_storage::Result<T> {
		if self.fail {
			return Err(fara_storage::Error::Unavailable {
				index: self.name.to_string(),
				message: "connection refused".to_string(),
			});
		}

		Ok(value)
	}
}

struct StubCompletion {
	calls: AtomicUsize,
	fail: bool,
}
impl StubCompletion {
	fn answering() -> Arc<Self> {
		Arc::new(Self { calls: AtomicUsize::new(0), fail: false })
	}

	fn failing() -> Arc<Self> {
		Arc::new(Self { calls: AtomicUsize::new(0), fail: true })
	}
}
impl CompletionProvider for StubCompletion {
	fn complete<'a>(
		&'a self,
		_cfg: &'a CompletionProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, fara_providers::Result<String>> {
		let call = self.calls.fetch_add(1, Ordering::SeqCst);

		Box::pin(async move {
			if self.fail {
				return Err(fara_providers::Error::InvalidResponse {
					message: "upstream returned 500".to_string(),
				});
			}

			Ok(format!("Answer {call} from {} messages.", messages.len()))
		})
	}
}

/// Pauses between listing a document and returning, widening the window between upsert and the
/// stale-chunk sweep of an ingest.
struct SlowListing {
	inner: FilterStore,
	delay: Duration,
}
impl VectorIndex for SlowListing {
	fn name(&self) -> &str {
		self.inner.name()
	}

	fn supports_filter(&self) -> bool {
		true
	}

	fn upsert<'a>(&'a self, chunks: &'a [Chunk]) -> BoxFuture<'a, fara_storage::Result<()>> {
		self.inner.upsert(chunks)
	}

	fn delete<'a>(&'a self, chunk_ids: &'a [Uuid]) -> BoxFuture<'a, fara_storage::Result<()>> {
		self.inner.delete(chunk_ids)
	}

	fn search<'a>(
		&'a self,
		query: &'a [f32],
		k: usize,
		filter: Option<&'a RetrievalFilter>,
	) -> BoxFuture<'a, fara_storage::Result<Vec<IndexHit>>> {
		self.inner.search(query, k, filter)
	}

	fn chunk_ids<'a>(
		&'a self,
		document_id: Option<&'a str>,
	) -> BoxFuture<'a, fara_storage::Result<Vec<Uuid>>> {
		Box::pin(async move {
			time::sleep(self.delay).await;

			self.inner.chunk_ids(document_id).await
		})
	}
}

/// Rejects the first answered exchange as if another process had moved the session head.
#[derive(Default)]
struct ContendedSessions {
	inner: MemorySessionStore,
	rejected: AtomicUsize,
}
impl SessionStore for ContendedSessions {
	fn load<'a>(
		&'a self,
		session_id: &'a str,
		max_turns: usize,
	) -> BoxFuture<'a, fara_storage::Result<SessionSnapshot>> {
		self.inner.load(session_id, max_turns)
	}

	fn commit<'a>(&'a self, commit: SessionCommit<'a>) -> BoxFuture<'a, fara_storage::Result<()>> {
		if commit.turns.len() == 2 && self.rejected.fetch_add(1, Ordering::SeqCst) == 0 {
			return Box::pin(async {
				Err::<(), _>(fara_storage::Error::Conflict("Session head moved.".to_string()))
			});
		}

		self.inner.commit(commit)
	}

	fn audit<'a>(
		&'a self,
		session_id: &'a str,
		range: AuditRange,
	) -> BoxFuture<'a, fara_storage::Result<Vec<AuditEntry>>> {
		self.inner.audit(session_id, range)
	}

	fn evict_turns_older_than(
		&self,
		cutoff: OffsetDateTime,
	) -> BoxFuture<'_, fara_storage::Result<u64>> {
		self.inner.evict_turns_older_than(cutoff)
	}
}

fn test_config() -> Config {
	Config {
		service: Service {
			http_bind: "127.0.0.1:8080".to_string(),
			admin_bind: "127.0.0.1:8081".to_string(),
			log_level: "info".to_string(),
		},
		storage: Storage {
			vector_dim: DIM,
			index_a: Default::default(),
			index_b: Default::default(),
			sessions: Default::default(),
			postgres: None,
			qdrant: None,
		},
		providers: ProviderConfigs {
			embedding: EmbeddingProviderConfig {
				provider_id: "local".to_string(),
				api_base: String::new(),
				api_key: String::new(),
				path: "/embeddings".to_string(),
				model: String::new(),
				dimensions: DIM,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			completion: CompletionProviderConfig {
				provider_id: "stub".to_string(),
				api_base: "http://127.0.0.1:9".to_string(),
				api_key: "key".to_string(),
				path: "/chat/completions".to_string(),
				model: "m".to_string(),
				temperature: 0.2,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
		},
		chunking: Chunking::default(),
		retrieval: Retrieval::default(),
		memory: Memory { sweep_interval_secs: 0, ..Default::default() },
		corpus: None,
	}
}

fn providers(completion: Arc<StubCompletion>) -> Providers {
	Providers { embedding: Providers::default().embedding, completion }
}

fn in_process_service(cfg: Config, completion: Arc<StubCompletion>) -> FaraService {
	FaraService::with_providers(
		cfg,
		Arc::new(DenseIndex::new("index_a", DIM)),
		Arc::new(FilterStore::new("index_b", DIM)),
		Arc::new(MemorySessionStore::new()),
		providers(completion),
	)
	.expect("Failed to build service.")
}

fn stub_service(
	cfg: Config,
	a: StubIndex,
	b: StubIndex,
	completion: Arc<StubCompletion>,
) -> FaraService {
	FaraService::with_providers(
		cfg,
		Arc::new(a),
		Arc::new(b),
		Arc::new(MemorySessionStore::new()),
		providers(completion),
	)
	.expect("Failed to build service.")
}

fn hit(id: u128, category: SourceCategory, score: f32) -> IndexHit {
	IndexHit {
		chunk_id: Uuid::from_u128(id),
		document_id: format!("{category}/doc-{id}.txt"),
		source_category: category,
		text: format!("Passage {id}."),
		score,
	}
}

fn index_a(hits: Vec<IndexHit>) -> StubIndex {
	StubIndex { name: "index_a", hits, ..Default::default() }
}

fn index_b(hits: Vec<IndexHit>) -> StubIndex {
	StubIndex { name: "index_b", filterable: true, hits, ..Default::default() }
}

fn retrieve_request(query: &str) -> RetrieveRequest {
	RetrieveRequest { query: query.to_string(), top_k: None, filter: None }
}

fn query_request(session_id: &str, query: &str) -> QueryRequest {
	QueryRequest {
		session_id: session_id.to_string(),
		query: query.to_string(),
		top_k: None,
		filter: None,
	}
}

#[tokio::test]
async fn section_404_text_is_retrieved_from_both_indexes() {
	let service = in_process_service(test_config(), StubCompletion::answering());
	let sentence = "Section 404 requires management assessment of internal controls.";

	service
		.ingest(IngestRequest {
			document_id: "sox/section-404.txt".to_string(),
			source_category: SourceCategory::Sox,
			text: sentence.to_string(),
		})
		.await
		.expect("Ingest failed.");

	let response = service
		.retrieve(retrieve_request("What does Section 404 require?"), &CancelSignal::never())
		.await
		.expect("Retrieve failed.");
	let hit = response
		.hits
		.iter()
		.find(|hit| hit.text.contains(sentence))
		.expect("Expected the Section 404 chunk among the hits.");

	assert!(!response.partial);
	assert!(hit.fused_score > 0.0);
	assert_eq!(hit.source_index, SourceIndex::Both);
	assert!(hit.score_a.is_some() && hit.score_b.is_some());
}

#[tokio::test]
async fn ingest_is_idempotent_across_both_indexes() {
	let mut cfg = test_config();

	cfg.chunking = Chunking { window_tokens: 4, overlap_fraction: 0.25 };

	let service = in_process_service(cfg, StubCompletion::answering());
	let request = IngestRequest {
		document_id: "public_sec/10-k.txt".to_string(),
		source_category: SourceCategory::PublicSec,
		text: "Revenue grew twelve percent while operating costs stayed flat across regions."
			.to_string(),
	};
	let first = service.ingest(request.clone()).await.expect("First ingest failed.");
	let second = service.ingest(request).await.expect("Second ingest failed.");

	assert_eq!(first.chunk_ids, second.chunk_ids);
	assert!(first.chunk_ids.len() > 1);

	let ids_a = service.index_a.chunk_ids(None).await.expect("Index A listing failed.");
	let ids_b = service.index_b.chunk_ids(None).await.expect("Index B listing failed.");
	let expected: BTreeSet<Uuid> = first.chunk_ids.iter().copied().collect();

	assert_eq!(ids_a.into_iter().collect::<BTreeSet<_>>(), expected);
	assert_eq!(ids_b.into_iter().collect::<BTreeSet<_>>(), expected);

	let report = service.consistency_report(None).await.expect("Report failed.");

	assert!(report.is_consistent());
	assert_eq!(report.in_both, expected.len());
}

#[tokio::test]
async fn reingest_removes_stale_chunks_and_delete_clears_document() {
	let mut cfg = test_config();

	cfg.chunking = Chunking { window_tokens: 3, overlap_fraction: 0.0 };

	let service = in_process_service(cfg, StubCompletion::answering());
	let long = IngestRequest {
		document_id: "sox/memo.txt".to_string(),
		source_category: SourceCategory::Sox,
		text: "one two three four five six seven eight nine".to_string(),
	};
	let short = IngestRequest { text: "one two three".to_string(), ..long.clone() };
	let first = service.ingest(long).await.expect("Ingest failed.");
	let second = service.ingest(short).await.expect("Re-ingest failed.");

	assert_eq!(first.chunk_ids.len(), 3);
	assert_eq!(second.chunk_ids.len(), 1);
	assert_eq!(
		second.index_b,
		fara_service::IndexWriteStatus::Written { upserted: 1, removed: 2 }
	);

	let ids_a = service.index_a.chunk_ids(Some("sox/memo.txt")).await.expect("List failed.");

	assert_eq!(ids_a, second.chunk_ids);

	service.delete_document("sox/memo.txt").await.expect("Delete failed.");

	assert!(service.index_b.chunk_ids(None).await.expect("List failed.").is_empty());
}

#[tokio::test]
async fn concurrent_reingest_leaves_one_complete_version() {
	let mut cfg = test_config();

	cfg.chunking = Chunking { window_tokens: 3, overlap_fraction: 0.0 };

	let slow = |name: &'static str| SlowListing {
		inner: FilterStore::new(name, DIM),
		delay: Duration::from_millis(50),
	};
	let service = FaraService::with_providers(
		cfg,
		Arc::new(slow("index_a")),
		Arc::new(slow("index_b")),
		Arc::new(MemorySessionStore::new()),
		providers(StubCompletion::answering()),
	)
	.expect("Failed to build service.");
	let first = IngestRequest {
		document_id: "sox/policy.txt".to_string(),
		source_category: SourceCategory::Sox,
		text: "one two three four five six".to_string(),
	};
	let second = IngestRequest {
		text: "alpha beta gamma delta epsilon zeta".to_string(),
		..first.clone()
	};
	let (first, second) = tokio::join!(service.ingest(first), service.ingest(second));
	let mut first = first.expect("Ingest failed.").chunk_ids;
	let mut second = second.expect("Ingest failed.").chunk_ids;

	first.sort();
	second.sort();

	assert_ne!(first, second);

	let ids_a = service.index_a.chunk_ids(Some("sox/policy.txt")).await.expect("List failed.");
	let ids_b = service.index_b.chunk_ids(Some("sox/policy.txt")).await.expect("List failed.");

	assert_eq!(ids_a, ids_b);
	assert!(ids_a == first || ids_a == second, "Document holds a mix of versions: {ids_a:?}.");
}

#[tokio::test]
async fn ingest_survives_one_index_and_fails_without_both() {
	let failing_a = StubIndex { name: "index_a", fail: true, ..Default::default() };
	let service = FaraService::with_providers(
		test_config(),
		Arc::new(failing_a),
		Arc::new(FilterStore::new("index_b", DIM)),
		Arc::new(MemorySessionStore::new()),
		providers(StubCompletion::answering()),
	)
	.expect("Failed to build service.");
	let request = IngestRequest {
		document_id: "private_sec/board.txt".to_string(),
		source_category: SourceCategory::PrivateSec,
		text: "The board approved the audit committee charter.".to_string(),
	};
	let response = service.ingest(request.clone()).await.expect("Ingest failed.");

	assert!(response.index_a.is_failed());
	assert!(!response.index_b.is_failed());
	assert!(response.is_partial());

	let both_down = stub_service(
		test_config(),
		StubIndex { name: "index_a", fail: true, ..Default::default() },
		StubIndex { name: "index_b", fail: true, ..Default::default() },
		StubCompletion::answering(),
	);
	let result = both_down.ingest(request).await;

	assert!(matches!(result, Err(Error::IndexUnavailable { .. })));
}

#[tokio::test]
async fn ingest_rejects_empty_documents() {
	let service = in_process_service(test_config(), StubCompletion::answering());
	let result = service
		.ingest(IngestRequest {
			document_id: "sox/empty.txt".to_string(),
			source_category: SourceCategory::Sox,
			text: "   \n ".to_string(),
		})
		.await;

	assert!(matches!(result, Err(Error::Chunking(fara_chunking::Error::Empty { .. }))));
}

#[tokio::test]
async fn equal_scores_tie_break_by_chunk_id() {
	let a = index_a(vec![hit(9, SourceCategory::Sox, 0.5), hit(3, SourceCategory::Sox, 0.5)]);
	let b = index_b(vec![hit(9, SourceCategory::Sox, 0.5), hit(3, SourceCategory::Sox, 0.5)]);
	let service = stub_service(test_config(), a, b, StubCompletion::answering());
	let never = CancelSignal::never();
	let first =
		service.retrieve(retrieve_request("controls"), &never).await.expect("Retrieve failed.");
	let second =
		service.retrieve(retrieve_request("controls"), &never).await.expect("Retrieve failed.");
	let ids: Vec<Uuid> = first.hits.iter().map(|hit| hit.chunk_id).collect();

	assert_eq!(ids, vec![Uuid::from_u128(3), Uuid::from_u128(9)]);
	assert_eq!(first.hits, second.hits);
}

#[tokio::test]
async fn failed_index_a_degrades_to_index_b() {
	let a = StubIndex { name: "index_a", fail: true, ..Default::default() };
	let b = index_b(vec![hit(1, SourceCategory::Sox, 0.8), hit(2, SourceCategory::Sox, 0.4)]);
	let service = stub_service(test_config(), a, b, StubCompletion::answering());
	let response = service
		.retrieve(retrieve_request("controls"), &CancelSignal::never())
		.await
		.expect("Retrieve failed.");

	assert!(response.partial);
	assert_eq!(response.failed_indexes, vec!["index_a".to_string()]);
	assert_eq!(response.hits.len(), 2);
	assert!(response.hits.iter().all(|hit| hit.source_index == SourceIndex::B));
	assert!((response.hits[0].fused_score - 0.4).abs() < 1e-6);
}

#[tokio::test]
async fn slow_index_counts_as_failed() {
	let mut cfg = test_config();

	cfg.retrieval.timeout_ms = 50;

	let a = StubIndex {
		name: "index_a",
		hits: vec![hit(1, SourceCategory::Sox, 0.9)],
		delay: Some(Duration::from_secs(5)),
		..Default::default()
	};
	let b = index_b(vec![hit(2, SourceCategory::Sox, 0.4)]);
	let service = stub_service(cfg, a, b, StubCompletion::answering());
	let response = service
		.retrieve(retrieve_request("controls"), &CancelSignal::never())
		.await
		.expect("Retrieve failed.");

	assert!(response.partial);
	assert_eq!(response.hits[0].chunk_id, Uuid::from_u128(2));
}

#[tokio::test]
async fn filter_post_filters_index_a() {
	let a = index_a(vec![
		hit(1, SourceCategory::PublicSec, 0.9),
		hit(2, SourceCategory::Sox, 0.8),
	]);
	let b = index_b(vec![hit(3, SourceCategory::PublicSec, 0.7), hit(4, SourceCategory::Sox, 0.6)]);
	let service = stub_service(test_config(), a, b, StubCompletion::answering());
	let request = RetrieveRequest {
		query: "controls".to_string(),
		top_k: Some(10),
		filter: Some(RetrievalFilter {
			source_categories: vec![SourceCategory::Sox],
			document_ids: Vec::new(),
		}),
	};
	let response =
		service.retrieve(request, &CancelSignal::never()).await.expect("Retrieve failed.");
	let ids: Vec<Uuid> = response.hits.iter().map(|hit| hit.chunk_id).collect();

	assert_eq!(ids, vec![Uuid::from_u128(2), Uuid::from_u128(4)]);
}

#[tokio::test]
async fn retrieve_rejects_out_of_range_top_k() {
	let service = in_process_service(test_config(), StubCompletion::answering());
	let request = RetrieveRequest { query: "q".to_string(), top_k: Some(0), filter: None };
	let result = service.retrieve(request, &CancelSignal::never()).await;

	assert!(matches!(result, Err(Error::InvalidRequest { .. })));
}

#[tokio::test]
async fn total_failure_writes_only_a_failed_audit_entry() {
	let a = StubIndex { name: "index_a", fail: true, ..Default::default() };
	let b = StubIndex { name: "index_b", fail: true, ..Default::default() };
	let completion = StubCompletion::answering();
	let service = stub_service(test_config(), a, b, completion.clone());
	let result = service.answer(query_request("s1", "controls?"), &CancelSignal::never()).await;

	assert!(matches!(result, Err(Error::Retrieval { .. })));
	assert_eq!(completion.calls.load(Ordering::SeqCst), 0);

	let audit = service.memory.get_audit("s1", AuditRange::default()).await.expect("Audit failed.");

	assert_eq!(audit.len(), 1);
	assert!(!audit.iter().any(|entry| entry.outcome.is_answered()));
	assert!(matches!(
		&audit[0].outcome,
		AuditOutcome::Failed { error_kind, .. } if error_kind == "retrieval"
	));

	let turns = service.memory.get_recent("s1", None, None).await.expect("Read failed.");

	assert!(turns.is_empty());
}

#[tokio::test]
async fn completion_failure_is_audited_without_turns() {
	let b = index_b(vec![hit(5, SourceCategory::Sox, 0.9)]);
	let service = stub_service(test_config(), index_a(Vec::new()), b, StubCompletion::failing());
	let result = service.answer(query_request("s1", "controls?"), &CancelSignal::never()).await;

	assert!(matches!(result, Err(Error::CompletionService { .. })));

	let audit = service.memory.get_audit("s1", AuditRange::default()).await.expect("Audit failed.");

	assert_eq!(audit.len(), 1);
	assert_eq!(audit[0].retrieved_chunk_ids, vec![Uuid::from_u128(5)]);
	assert!(matches!(
		&audit[0].outcome,
		AuditOutcome::Failed { error_kind, .. } if error_kind == "completion_service"
	));
	assert!(service.memory.get_recent("s1", None, None).await.expect("Read failed.").is_empty());
}

#[tokio::test]
async fn rejected_exchange_commit_is_audited_as_failure() {
	let b = index_b(vec![hit(7, SourceCategory::Sox, 0.9)]);
	let service = FaraService::with_providers(
		test_config(),
		Arc::new(index_a(Vec::new())),
		Arc::new(b),
		Arc::new(ContendedSessions::default()),
		providers(StubCompletion::answering()),
	)
	.expect("Failed to build service.");
	let result = service.answer(query_request("s1", "controls?"), &CancelSignal::never()).await;

	assert!(matches!(result, Err(Error::MemoryConsistency { .. })));

	let audit = service.memory.get_audit("s1", AuditRange::default()).await.expect("Audit failed.");

	assert_eq!(audit.len(), 1);
	assert_eq!(audit[0].retrieved_chunk_ids, vec![Uuid::from_u128(7)]);
	assert!(matches!(
		&audit[0].outcome,
		AuditOutcome::Failed { error_kind, .. } if error_kind == "memory_consistency"
	));
	assert!(service.memory.get_recent("s1", None, None).await.expect("Read failed.").is_empty());

	let retried = service
		.answer(query_request("s1", "controls?"), &CancelSignal::never())
		.await
		.expect("Answer failed.");

	assert_eq!(retried.audit_sequence, 1);
}

#[tokio::test]
async fn answer_records_turn_pair_and_citations() {
	let a = index_a(vec![hit(1, SourceCategory::Sox, 0.9)]);
	let b = index_b(vec![hit(1, SourceCategory::Sox, 0.7), hit(2, SourceCategory::Sox, 0.2)]);
	let mut cfg = test_config();

	cfg.retrieval.min_fused_score = Some(0.5);

	let service = stub_service(cfg, a, b, StubCompletion::answering());
	let response = service
		.answer(query_request("s1", "What is tested?"), &CancelSignal::never())
		.await
		.expect("Answer failed.");

	assert_eq!(response.cited_chunk_ids, vec![Uuid::from_u128(1)]);
	assert!(!response.partial);
	assert_eq!(response.audit_sequence, 0);

	let turns = service.memory.get_recent("s1", None, None).await.expect("Read failed.");

	assert_eq!(turns.len(), 2);
	assert_eq!(turns[0].role, Role::User);
	assert_eq!(turns[0].text, "What is tested?");
	assert_eq!(turns[1].role, Role::Assistant);
	assert_eq!(turns[1].text, response.answer_text);

	let audit = service.memory.get_audit("s1", AuditRange::default()).await.expect("Audit failed.");

	assert_eq!(audit[0].retrieved_chunk_ids, response.cited_chunk_ids);
	assert!(audit[0].outcome.is_answered());
}

#[tokio::test]
async fn concurrent_appends_never_collide() {
	let mut cfg = test_config();

	cfg.memory.window_turns = 100;

	let service = Arc::new(in_process_service(cfg, StubCompletion::answering()));
	let mut tasks = Vec::new();

	for i in 0..50 {
		let service = service.clone();

		tasks.push(tokio::spawn(async move {
			service
				.memory
				.append_turn("shared", Role::User, &format!("turn {i}"), &CancelSignal::never())
				.await
		}));
	}

	let mut indices = Vec::new();

	for task in tasks {
		let turn = task.await.expect("Task panicked.").expect("Append failed.");

		indices.push(turn.turn_index);
	}

	indices.sort_unstable();

	assert_eq!(indices, (0..50).collect::<Vec<u64>>());

	let turns = service.memory.get_recent("shared", None, None).await.expect("Read failed.");

	assert_eq!(turns.len(), 50);
	assert!(turns.windows(2).all(|pair| pair[0].turn_index + 1 == pair[1].turn_index));
}

#[tokio::test]
async fn eviction_keeps_every_audit_entry() {
	let mut cfg = test_config();

	cfg.memory.window_turns = 5;

	let service = stub_service(
		cfg,
		index_a(vec![hit(1, SourceCategory::Sox, 0.9)]),
		index_b(Vec::new()),
		StubCompletion::answering(),
	);
	let never = CancelSignal::never();

	for i in 0..10 {
		service
			.answer(query_request("s1", &format!("Question {i}?")), &never)
			.await
			.expect("Answer failed.");
	}

	let turns = service.memory.get_recent("s1", None, None).await.expect("Read failed.");
	let audit = service.memory.get_audit("s1", AuditRange::default()).await.expect("Audit failed.");
	let sequences: Vec<u64> = audit.iter().map(|entry| entry.sequence).collect();

	assert_eq!(turns.len(), 5);
	assert_eq!(turns.last().map(|turn| turn.turn_index), Some(19));
	assert_eq!(sequences, (0..10).collect::<Vec<u64>>());

	let tail = service
		.memory
		.get_audit("s1", AuditRange { start: Some(8), end: None })
		.await
		.expect("Audit failed.");

	assert_eq!(tail.len(), 2);
}

#[tokio::test]
async fn cancelled_query_leaves_session_untouched() {
	let a = StubIndex {
		name: "index_a",
		hits: vec![hit(1, SourceCategory::Sox, 0.9)],
		delay: Some(Duration::from_secs(5)),
		..Default::default()
	};
	let b = StubIndex {
		name: "index_b",
		filterable: true,
		delay: Some(Duration::from_secs(5)),
		..Default::default()
	};
	let mut cfg = test_config();

	cfg.retrieval.timeout_ms = 30_000;

	let completion = StubCompletion::answering();
	let service = Arc::new(stub_service(cfg, a, b, completion.clone()));
	let (handle, signal) = CancelHandle::new();
	let task = {
		let service = service.clone();

		tokio::spawn(async move { service.answer(query_request("s1", "controls?"), &signal).await })
	};

	time::sleep(Duration::from_millis(50)).await;
	drop(handle);

	let result = time::timeout(Duration::from_secs(2), task)
		.await
		.expect("Cancelled query did not return promptly.")
		.expect("Task panicked.");

	assert!(matches!(result, Err(Error::Cancelled)));
	assert_eq!(completion.calls.load(Ordering::SeqCst), 0);

	let audit = service.memory.get_audit("s1", AuditRange::default()).await.expect("Audit failed.");
	let turns = service.memory.get_recent("s1", None, None).await.expect("Read failed.");

	assert!(audit.is_empty());
	assert!(turns.is_empty());
}

#[tokio::test]
async fn corpus_ingest_walks_category_directories() {
	let root = std::env::temp_dir().join(format!("fara-corpus-{}", Uuid::new_v4().simple()));
	let sox = root.join("sox");

	fs::create_dir_all(&sox).expect("Failed to create corpus dir.");
	fs::write(sox.join("controls.txt"), "Quarterly access reviews are documented.")
		.expect("Failed to write corpus file.");
	fs::write(sox.join("notes.md"), "Not part of the corpus.").expect("Failed to write file.");
	fs::write(sox.join("binary.txt"), [0xff_u8, 0xfe, 0x00]).expect("Failed to write file.");

	let mut cfg = test_config();

	cfg.corpus = Some(Corpus {
		sox_dir: Some(sox.clone()),
		public_sec_dir: Some(root.join("missing")),
		private_sec_dir: None,
	});

	let service = in_process_service(cfg, StubCompletion::answering());
	let report = service.ingest_corpus().await.expect("Corpus ingest failed.");

	fs::remove_dir_all(&root).expect("Failed to remove corpus dir.");

	let ids: Vec<&str> = report.documents.iter().map(|doc| doc.document_id.as_str()).collect();

	assert_eq!(ids, vec!["sox/controls.txt"]);
	assert_eq!(report.skipped.len(), 2);
	assert!(report.skipped.iter().any(|skipped| skipped.path == sox.join("binary.txt")));
}
