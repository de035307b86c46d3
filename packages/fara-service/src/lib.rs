pub mod answer;
pub mod cancel;
pub mod corpus;
pub mod fusion;
pub mod ingest;
pub mod memory;
pub mod retrieve;

mod error;

pub use answer::{AnswerResponse, QueryRequest};
pub use cancel::{CancelHandle, CancelSignal};
pub use corpus::{CorpusDocument, CorpusReport, SkippedFile};
pub use error::{Error, Result};
pub use ingest::{
	ConsistencyReport, DeleteDocumentResponse, IndexWriteStatus, IngestRequest, IngestResponse,
};
pub use memory::{Exchange, MemoryTool};
pub use retrieve::{RetrieveRequest, RetrieveResponse};

use std::{future::Future, pin::Pin, sync::Arc};

use serde_json::Value;

use fara_chunking::{Chunker, ChunkingConfig};
use fara_config::{
	CompletionProviderConfig, Config, DenseBackend, EmbeddingProviderConfig, StoreBackend,
};
use fara_providers::{completion, embedding};
use fara_storage::{
	VectorIndex,
	db::Db,
	dense::DenseIndex,
	filter_store::FilterStore,
	pg_index::PgIndex,
	pg_sessions::PgSessionStore,
	qdrant::QdrantIndex,
	sessions::{MemorySessionStore, SessionStore},
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub const INDEX_A: &str = "index_a";
pub const INDEX_B: &str = "index_b";

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, fara_providers::Result<Vec<Vec<f32>>>>;
}

/// The external completion service. Called once per query and never retried here.
pub trait CompletionProvider
where
	Self: Send + Sync,
{
	fn complete<'a>(
		&'a self,
		cfg: &'a CompletionProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, fara_providers::Result<String>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub completion: Arc<dyn CompletionProvider>,
}
impl Default for Providers {
	fn default() -> Self {
		let providers = Arc::new(DefaultProviders);

		Self { embedding: providers.clone(), completion: providers }
	}
}

pub struct FaraService {
	pub cfg: Config,
	pub chunker: Chunker,
	pub index_a: Arc<dyn VectorIndex>,
	pub index_b: Arc<dyn VectorIndex>,
	pub memory: Arc<MemoryTool>,
	pub providers: Providers,
	document_locks: ingest::DocumentLocks,
}
impl FaraService {
	pub fn new(
		cfg: Config,
		index_a: Arc<dyn VectorIndex>,
		index_b: Arc<dyn VectorIndex>,
		sessions: Arc<dyn SessionStore>,
	) -> Result<Self> {
		Self::with_providers(cfg, index_a, index_b, sessions, Providers::default())
	}

	pub fn with_providers(
		cfg: Config,
		index_a: Arc<dyn VectorIndex>,
		index_b: Arc<dyn VectorIndex>,
		sessions: Arc<dyn SessionStore>,
		providers: Providers,
	) -> Result<Self> {
		let chunker = Chunker::new(ChunkingConfig {
			window_tokens: cfg.chunking.window_tokens,
			overlap_fraction: cfg.chunking.overlap_fraction,
		})?;
		let memory = Arc::new(MemoryTool::new(cfg.memory.clone(), sessions));

		Ok(Self {
			cfg,
			chunker,
			index_a,
			index_b,
			memory,
			providers,
			document_locks: Default::default(),
		})
	}

	/// Connects the backends named in the configuration and prepares their schemas.
	pub async fn from_config(cfg: Config) -> Result<Self> {
		let vector_dim = cfg.storage.vector_dim;
		let needs_postgres = cfg.storage.index_b.backend == StoreBackend::Postgres
			|| cfg.storage.sessions.backend == StoreBackend::Postgres;
		let db = if needs_postgres {
			let pg = cfg.storage.postgres.as_ref().ok_or_else(|| Error::InvalidRequest {
				message: "storage.postgres is required for the postgres backend.".to_string(),
			})?;
			let db = Db::connect(pg).await?;

			db.ensure_schema(vector_dim).await?;

			Some(db)
		} else {
			None
		};
		let index_a: Arc<dyn VectorIndex> = match cfg.storage.index_a.backend {
			DenseBackend::Memory => match &cfg.storage.index_a.snapshot_path {
				Some(path) => Arc::new(DenseIndex::open(INDEX_A, vector_dim, path.clone()).await?),
				None => Arc::new(DenseIndex::new(INDEX_A, vector_dim)),
			},
			DenseBackend::Qdrant => {
				let qdrant = cfg.storage.qdrant.as_ref().ok_or_else(|| Error::InvalidRequest {
					message: "storage.qdrant is required for the qdrant backend.".to_string(),
				})?;
				let index = QdrantIndex::new(INDEX_A, qdrant, vector_dim)?;

				index.ensure_collection().await?;

				Arc::new(index)
			},
		};
		let index_b: Arc<dyn VectorIndex> = match (cfg.storage.index_b.backend, &db) {
			(StoreBackend::Postgres, Some(db)) =>
				Arc::new(PgIndex::new(INDEX_B, db.pool.clone(), vector_dim)),
			_ => match &cfg.storage.index_b.snapshot_path {
				Some(path) => Arc::new(FilterStore::open(INDEX_B, vector_dim, path.clone()).await?),
				None => Arc::new(FilterStore::new(INDEX_B, vector_dim)),
			},
		};
		let sessions: Arc<dyn SessionStore> = match (cfg.storage.sessions.backend, &db) {
			(StoreBackend::Postgres, Some(db)) => Arc::new(PgSessionStore::new(db.pool.clone())),
			_ => Arc::new(MemorySessionStore::new()),
		};

		tracing::info!(
			index_a = ?cfg.storage.index_a.backend,
			index_b = ?cfg.storage.index_b.backend,
			sessions = ?cfg.storage.sessions.backend,
			vector_dim,
			"Service backends ready."
		);

		Self::new(cfg, index_a, index_b, sessions)
	}

	/// Embeds texts in one batch and checks the count and dimensions of the result.
	pub(crate) async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		let cfg = &self.cfg.providers.embedding;
		let vectors = self.providers.embedding.embed(cfg, texts).await?;

		if vectors.len() != texts.len() {
			return Err(Error::Provider {
				message: format!(
					"Embedding provider returned {} vectors for {} inputs.",
					vectors.len(),
					texts.len()
				),
			});
		}
		if let Some(vector) =
			vectors.iter().find(|vector| vector.len() != self.cfg.storage.vector_dim as usize)
		{
			return Err(Error::Provider {
				message: format!(
					"Embedding has {} dimensions, expected {}.",
					vector.len(),
					self.cfg.storage.vector_dim
				),
			});
		}

		Ok(vectors)
	}
}

struct DefaultProviders;
impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, fara_providers::Result<Vec<Vec<f32>>>> {
		Box::pin(embedding::embed(cfg, texts))
	}
}
impl CompletionProvider for DefaultProviders {
	fn complete<'a>(
		&'a self,
		cfg: &'a CompletionProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, fara_providers::Result<String>> {
		Box::pin(completion::complete(cfg, messages))
	}
}
