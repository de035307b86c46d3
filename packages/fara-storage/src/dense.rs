//! In-process approximate dense index.

use std::{
	collections::HashMap,
	path::PathBuf,
	sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
	BoxFuture, Error, Result, VectorIndex,
	quantized::{self, ScalarQuantized},
	snapshot,
};
use fara_domain::{Chunk, IndexHit, RetrievalFilter, SourceCategory, sort_index_hits};

#[derive(Clone, Debug, Serialize, Deserialize)]
struct DenseEntry {
	chunk_id: Uuid,
	document_id: String,
	source_category: SourceCategory,
	text: String,
	vector: ScalarQuantized,
}

/// Quantized brute-force index. Scores are approximate cosine similarities.
pub struct DenseIndex {
	name: String,
	vector_dim: u32,
	entries: RwLock<HashMap<Uuid, DenseEntry>>,
	snapshot_path: Option<PathBuf>,
	write_lock: Mutex<()>,
}
impl DenseIndex {
	pub fn new(name: impl Into<String>, vector_dim: u32) -> Self {
		Self {
			name: name.into(),
			vector_dim,
			entries: RwLock::new(HashMap::new()),
			snapshot_path: None,
			write_lock: Mutex::new(()),
		}
	}

	/// Opens an index backed by a snapshot file, loading it when present.
	pub async fn open(
		name: impl Into<String>,
		vector_dim: u32,
		snapshot_path: PathBuf,
	) -> Result<Self> {
		let loaded: Vec<DenseEntry> = snapshot::load(&snapshot_path).await?;
		let mut index = Self::new(name, vector_dim);
		let mismatched = loaded.iter().find(|entry| entry.vector.data.len() != vector_dim as usize);

		if let Some(entry) = mismatched {
			return Err(Error::InvalidArgument(format!(
				"Snapshot {} holds chunk {} with {} dimensions but index {} expects {vector_dim}.",
				snapshot_path.display(),
				entry.chunk_id,
				entry.vector.data.len(),
				index.name
			)));
		}

		tracing::info!(
			index = %index.name,
			path = %snapshot_path.display(),
			chunks = loaded.len(),
			"Dense index snapshot loaded."
		);

		index.entries =
			RwLock::new(loaded.into_iter().map(|entry| (entry.chunk_id, entry)).collect());
		index.snapshot_path = Some(snapshot_path);

		Ok(index)
	}

	pub fn len(&self) -> usize {
		self.read().len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, DenseEntry>> {
		self.entries.read().unwrap_or_else(|err| err.into_inner())
	}

	fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, DenseEntry>> {
		self.entries.write().unwrap_or_else(|err| err.into_inner())
	}

	async fn apply(&self, mutate: impl FnOnce(&mut HashMap<Uuid, DenseEntry>)) -> Result<()> {
		let _guard = self.write_lock.lock().await;
		let Some(path) = self.snapshot_path.as_ref() else {
			mutate(&mut *self.write());

			return Ok(());
		};
		let mut next = self.read().clone();

		mutate(&mut next);
		snapshot::write(path, snapshot::encode(next.values())?).await?;

		*self.write() = next;

		Ok(())
	}

	fn search_sync(&self, query: &[f32], k: usize) -> Vec<IndexHit> {
		let query_magnitude = quantized::magnitude(query);
		let mut hits: Vec<IndexHit> = self
			.read()
			.values()
			.map(|entry| IndexHit {
				chunk_id: entry.chunk_id,
				document_id: entry.document_id.clone(),
				source_category: entry.source_category,
				text: entry.text.clone(),
				score: entry.vector.cosine_to_query(query, query_magnitude),
			})
			.collect();

		sort_index_hits(&mut hits);
		hits.truncate(k);

		hits
	}
}
impl VectorIndex for DenseIndex {
	fn name(&self) -> &str {
		&self.name
	}

	fn supports_filter(&self) -> bool {
		false
	}

	fn upsert<'a>(&'a self, chunks: &'a [Chunk]) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			crate::check_dimensions(&self.name, chunks, self.vector_dim)?;

			let quantized: Vec<DenseEntry> = chunks
				.iter()
				.map(|chunk| DenseEntry {
					chunk_id: chunk.chunk_id,
					document_id: chunk.document_id.clone(),
					source_category: chunk.source_category,
					text: chunk.text.clone(),
					vector: ScalarQuantized::quantize(&chunk.embedding),
				})
				.collect();

			self.apply(|entries| {
				for entry in quantized {
					entries.insert(entry.chunk_id, entry);
				}
			})
			.await
		})
	}

	fn delete<'a>(&'a self, chunk_ids: &'a [Uuid]) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.apply(|entries| {
				for chunk_id in chunk_ids {
					entries.remove(chunk_id);
				}
			})
			.await
		})
	}

	fn search<'a>(
		&'a self,
		query: &'a [f32],
		k: usize,
		filter: Option<&'a RetrievalFilter>,
	) -> BoxFuture<'a, Result<Vec<IndexHit>>> {
		Box::pin(async move {
			crate::reject_filter(&self.name, filter)?;

			Ok(self.search_sync(query, k))
		})
	}

	fn chunk_ids<'a>(&'a self, document_id: Option<&'a str>) -> BoxFuture<'a, Result<Vec<Uuid>>> {
		Box::pin(async move {
			let mut ids: Vec<Uuid> = self
				.read()
				.values()
				.filter(|entry| document_id.is_none_or(|id| entry.document_id == id))
				.map(|entry| entry.chunk_id)
				.collect();

			ids.sort();

			Ok(ids)
		})
	}
}
