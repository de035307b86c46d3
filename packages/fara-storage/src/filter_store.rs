//! In-process filterable store with exact cosine scoring.

use std::{
	collections::HashMap,
	path::PathBuf,
	sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{BoxFuture, Result, VectorIndex, quantized, snapshot};
use fara_domain::{Chunk, IndexHit, RetrievalFilter, sort_index_hits};

pub struct FilterStore {
	name: String,
	vector_dim: u32,
	chunks: RwLock<HashMap<Uuid, Chunk>>,
	snapshot_path: Option<PathBuf>,
	write_lock: Mutex<()>,
}
impl FilterStore {
	pub fn new(name: impl Into<String>, vector_dim: u32) -> Self {
		Self {
			name: name.into(),
			vector_dim,
			chunks: RwLock::new(HashMap::new()),
			snapshot_path: None,
			write_lock: Mutex::new(()),
		}
	}

	/// Opens a durable store. Every mutation rewrites the snapshot before returning.
	pub async fn open(
		name: impl Into<String>,
		vector_dim: u32,
		snapshot_path: PathBuf,
	) -> Result<Self> {
		let loaded: Vec<Chunk> = snapshot::load(&snapshot_path).await?;
		let mut store = Self::new(name, vector_dim);

		crate::check_dimensions(&store.name, &loaded, vector_dim)?;

		tracing::info!(
			index = %store.name,
			path = %snapshot_path.display(),
			chunks = loaded.len(),
			"Filter store snapshot loaded."
		);

		store.chunks =
			RwLock::new(loaded.into_iter().map(|chunk| (chunk.chunk_id, chunk)).collect());
		store.snapshot_path = Some(snapshot_path);

		Ok(store)
	}

	fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Chunk>> {
		self.chunks.read().unwrap_or_else(|err| err.into_inner())
	}

	fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Chunk>> {
		self.chunks.write().unwrap_or_else(|err| err.into_inner())
	}

	/// Applies a mutation only once its snapshot is durable, so a failed write changes nothing.
	async fn apply(&self, mutate: impl FnOnce(&mut HashMap<Uuid, Chunk>)) -> Result<()> {
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
}
impl VectorIndex for FilterStore {
	fn name(&self) -> &str {
		&self.name
	}

	fn supports_filter(&self) -> bool {
		true
	}

	fn upsert<'a>(&'a self, chunks: &'a [Chunk]) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			crate::check_dimensions(&self.name, chunks, self.vector_dim)?;

			self.apply(|stored| {
				for chunk in chunks {
					stored.insert(chunk.chunk_id, chunk.clone());
				}
			})
			.await
		})
	}

	fn delete<'a>(&'a self, chunk_ids: &'a [Uuid]) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.apply(|stored| {
				for chunk_id in chunk_ids {
					stored.remove(chunk_id);
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
			let mut hits: Vec<IndexHit> = self
				.read()
				.values()
				.filter(|chunk| {
					filter.is_none_or(|filter| {
						filter.matches(chunk.source_category, &chunk.document_id)
					})
				})
				.map(|chunk| IndexHit {
					chunk_id: chunk.chunk_id,
					document_id: chunk.document_id.clone(),
					source_category: chunk.source_category,
					text: chunk.text.clone(),
					score: quantized::cosine(&chunk.embedding, query),
				})
				.collect();

			sort_index_hits(&mut hits);
			hits.truncate(k);

			Ok(hits)
		})
	}

	fn chunk_ids<'a>(&'a self, document_id: Option<&'a str>) -> BoxFuture<'a, Result<Vec<Uuid>>> {
		Box::pin(async move {
			let mut ids: Vec<Uuid> = self
				.read()
				.values()
				.filter(|chunk| document_id.is_none_or(|id| chunk.document_id == id))
				.map(|chunk| chunk.chunk_id)
				.collect();

			ids.sort();

			Ok(ids)
		})
	}
}

#[cfg(test)]
mod tests {
	use time::OffsetDateTime;

	use super::*;
	use fara_domain::{SourceCategory, chunk_id_for};

	fn chunk(document_id: &str, category: SourceCategory, embedding: Vec<f32>) -> Chunk {
		Chunk {
			chunk_id: chunk_id_for(document_id, 0),
			document_id: document_id.to_string(),
			source_category: category,
			offset: 0,
			chunk_index: 0,
			text: document_id.to_string(),
			embedding,
			created_at: OffsetDateTime::now_utc(),
		}
	}

	#[tokio::test]
	async fn filters_by_category_and_document() {
		let store = FilterStore::new("b", 2);
		let sox = chunk("sox/a.txt", SourceCategory::Sox, vec![1.0, 0.0]);
		let sec = chunk("sec/b.txt", SourceCategory::PublicSec, vec![1.0, 0.0]);

		store.upsert(&[sox.clone(), sec.clone()]).await.expect("upsert failed");

		let sox_only = RetrievalFilter {
			source_categories: vec![SourceCategory::Sox],
			document_ids: Vec::new(),
		};
		let hits = store.search(&[1.0, 0.0], 10, Some(&sox_only)).await.expect("search failed");

		assert_eq!(hits.len(), 1);
		assert_eq!(hits[0].chunk_id, sox.chunk_id);

		let by_document = RetrievalFilter {
			source_categories: Vec::new(),
			document_ids: vec!["sec/b.txt".to_string()],
		};
		let hits = store.search(&[1.0, 0.0], 10, Some(&by_document)).await.expect("search failed");

		assert_eq!(hits.len(), 1);
		assert_eq!(hits[0].chunk_id, sec.chunk_id);
	}

	#[tokio::test]
	async fn equal_scores_order_by_chunk_id() {
		let store = FilterStore::new("b", 2);
		let first = chunk("x", SourceCategory::Sox, vec![0.0, 1.0]);
		let second = chunk("y", SourceCategory::Sox, vec![0.0, 1.0]);

		store.upsert(&[first.clone(), second.clone()]).await.expect("upsert failed");

		let hits = store.search(&[0.0, 1.0], 10, None).await.expect("search failed");
		let mut expected = vec![first.chunk_id, second.chunk_id];

		expected.sort();

		assert_eq!(hits.iter().map(|hit| hit.chunk_id).collect::<Vec<_>>(), expected);
	}

	#[tokio::test]
	async fn delete_removes_chunks() {
		let store = FilterStore::new("b", 2);
		let stored = chunk("doc", SourceCategory::PrivateSec, vec![0.5, 0.5]);

		store.upsert(&[stored.clone()]).await.expect("upsert failed");
		store.delete(&[stored.chunk_id]).await.expect("delete failed");

		assert!(store.chunk_ids(None).await.expect("chunk_ids failed").is_empty());
	}

	#[tokio::test]
	async fn failed_snapshot_write_leaves_store_unchanged() {
		let dir = std::env::temp_dir().join(format!("fara_filter_{}", Uuid::new_v4()));
		let path = dir.join("b.json");
		let kept = chunk("kept", SourceCategory::Sox, vec![1.0, 0.0]);
		let store = FilterStore::open("b", 2, path.clone()).await.expect("open failed");

		store.upsert(&[kept.clone()]).await.expect("upsert failed");
		std::fs::remove_file(&path).expect("Failed to remove snapshot.");
		std::fs::create_dir(&path).expect("Failed to block snapshot path.");

		let added = chunk("added", SourceCategory::Sox, vec![0.0, 1.0]);

		assert!(store.upsert(&[added]).await.is_err());
		assert!(store.delete(&[kept.chunk_id]).await.is_err());
		assert_eq!(store.chunk_ids(None).await.expect("chunk_ids failed"), vec![kept.chunk_id]);

		std::fs::remove_dir_all(&dir).ok();
	}

	#[tokio::test]
	async fn open_rejects_snapshot_with_other_dimensions() {
		let path = std::env::temp_dir().join(format!("fara_filter_{}.json", Uuid::new_v4()));

		{
			let store = FilterStore::open("b", 2, path.clone()).await.expect("open failed");

			store
				.upsert(&[chunk("doc", SourceCategory::Sox, vec![1.0, 0.0])])
				.await
				.expect("upsert failed");
		}

		let reopened = FilterStore::open("b", 3, path.clone()).await;

		std::fs::remove_file(&path).ok();

		assert!(matches!(reopened, Err(crate::Error::InvalidArgument(_))));
	}
}
