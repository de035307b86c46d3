pub mod db;
pub mod dense;
pub mod filter_store;
pub mod pg_index;
pub mod pg_sessions;
pub mod qdrant;
pub mod quantized;
pub mod schema;
pub mod sessions;

mod error;
mod snapshot;

pub use error::Error;

use std::{future::Future, pin::Pin};

use uuid::Uuid;

use fara_domain::{Chunk, IndexHit, RetrievalFilter};

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Uniform contract over one vector index backend.
///
/// `upsert` replaces any chunk with the same id. `search` returns hits ordered by score
/// descending, chunk id ascending, and must fail with [`Error::Unavailable`] rather than return an
/// empty list when the backend cannot be reached.
pub trait VectorIndex
where
	Self: Send + Sync,
{
	fn name(&self) -> &str;

	/// Whether `search` honors a [`RetrievalFilter`]. Callers must not pass a filter otherwise.
	fn supports_filter(&self) -> bool;

	fn upsert<'a>(&'a self, chunks: &'a [Chunk]) -> BoxFuture<'a, Result<()>>;

	fn delete<'a>(&'a self, chunk_ids: &'a [Uuid]) -> BoxFuture<'a, Result<()>>;

	fn search<'a>(
		&'a self,
		query: &'a [f32],
		k: usize,
		filter: Option<&'a RetrievalFilter>,
	) -> BoxFuture<'a, Result<Vec<IndexHit>>>;

	/// Ids currently stored, optionally restricted to one document, in ascending order.
	fn chunk_ids<'a>(&'a self, document_id: Option<&'a str>) -> BoxFuture<'a, Result<Vec<Uuid>>>;
}

pub(crate) fn check_dimensions(index: &str, chunks: &[Chunk], vector_dim: u32) -> Result<()> {
	for chunk in chunks {
		if chunk.embedding.len() != vector_dim as usize {
			return Err(Error::InvalidArgument(format!(
				"Chunk {} has {} dimensions but index {index} expects {vector_dim}.",
				chunk.chunk_id,
				chunk.embedding.len()
			)));
		}
	}

	Ok(())
}

pub(crate) fn reject_filter(index: &str, filter: Option<&RetrievalFilter>) -> Result<()> {
	if filter.is_some_and(|filter| !filter.is_empty()) {
		return Err(Error::InvalidArgument(format!("Index {index} does not support filters.")));
	}

	Ok(())
}
