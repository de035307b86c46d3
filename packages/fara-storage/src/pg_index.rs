//! Filterable index in Postgres with pgvector.

use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::{BoxFuture, Error, Result, VectorIndex, db};
use fara_domain::{Chunk, IndexHit, RetrievalFilter, SourceCategory};

pub struct PgIndex {
	name: String,
	pool: PgPool,
	vector_dim: u32,
}
impl PgIndex {
	pub fn new(name: impl Into<String>, pool: PgPool, vector_dim: u32) -> Self {
		Self { name: name.into(), pool, vector_dim }
	}

	fn classify(&self, err: sqlx::Error) -> Error {
		if db::is_unreachable(&err) {
			Error::Unavailable { index: self.name.clone(), message: err.to_string() }
		} else {
			Error::Sqlx(err)
		}
	}

	async fn upsert_inner(&self, chunks: &[Chunk]) -> Result<()> {
		let mut tx = self.pool.begin().await.map_err(|err| self.classify(err))?;

		for chunk in chunks {
			sqlx::query(
				"\
INSERT INTO fara_chunks (
	chunk_id,
	document_id,
	source_category,
	chunk_offset,
	chunk_index,
	text,
	embedding,
	created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7::text::vector, $8)
ON CONFLICT (chunk_id) DO UPDATE
SET
	document_id = EXCLUDED.document_id,
	source_category = EXCLUDED.source_category,
	chunk_offset = EXCLUDED.chunk_offset,
	chunk_index = EXCLUDED.chunk_index,
	text = EXCLUDED.text,
	embedding = EXCLUDED.embedding,
	created_at = EXCLUDED.created_at",
			)
			.bind(chunk.chunk_id)
			.bind(chunk.document_id.as_str())
			.bind(chunk.source_category.as_str())
			.bind(chunk.offset as i64)
			.bind(chunk.chunk_index as i32)
			.bind(chunk.text.as_str())
			.bind(format_vector_text(&chunk.embedding))
			.bind(chunk.created_at)
			.execute(&mut *tx)
			.await
			.map_err(|err| self.classify(err))?;
		}

		tx.commit().await.map_err(|err| self.classify(err))?;

		Ok(())
	}
}
impl VectorIndex for PgIndex {
	fn name(&self) -> &str {
		&self.name
	}

	fn supports_filter(&self) -> bool {
		true
	}

	fn upsert<'a>(&'a self, chunks: &'a [Chunk]) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			crate::check_dimensions(&self.name, chunks, self.vector_dim)?;

			if chunks.is_empty() {
				return Ok(());
			}

			self.upsert_inner(chunks).await
		})
	}

	fn delete<'a>(&'a self, chunk_ids: &'a [Uuid]) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			if chunk_ids.is_empty() {
				return Ok(());
			}

			sqlx::query("DELETE FROM fara_chunks WHERE chunk_id = ANY($1)")
				.bind(chunk_ids)
				.execute(&self.pool)
				.await
				.map_err(|err| self.classify(err))?;

			Ok(())
		})
	}

	fn search<'a>(
		&'a self,
		query: &'a [f32],
		k: usize,
		filter: Option<&'a RetrievalFilter>,
	) -> BoxFuture<'a, Result<Vec<IndexHit>>> {
		Box::pin(async move {
			let categories: Option<Vec<String>> = filter
				.filter(|filter| !filter.source_categories.is_empty())
				.map(|filter| {
					filter.source_categories.iter().map(|c| c.as_str().to_string()).collect()
				});
			let document_ids: Option<Vec<String>> = filter
				.filter(|filter| !filter.document_ids.is_empty())
				.map(|filter| filter.document_ids.clone());
			let rows = sqlx::query(
				"\
SELECT
	chunk_id,
	document_id,
	source_category,
	text,
	(1 - (embedding <=> $1::text::vector))::real AS score
FROM fara_chunks
WHERE ($2::text[] IS NULL OR source_category = ANY($2))
	AND ($3::text[] IS NULL OR document_id = ANY($3))
ORDER BY embedding <=> $1::text::vector ASC, chunk_id ASC
LIMIT $4",
			)
			.bind(format_vector_text(query))
			.bind(categories)
			.bind(document_ids)
			.bind(k as i64)
			.fetch_all(&self.pool)
			.await
			.map_err(|err| self.classify(err))?;
			let mut hits = Vec::with_capacity(rows.len());

			for row in rows {
				let raw_category: String = row.try_get("source_category")?;
				let Ok(source_category) = raw_category.parse::<SourceCategory>() else {
					tracing::warn!(
						index = %self.name,
						source_category = %raw_category,
						"Stored chunk has an unknown source category. Skipping."
					);

					continue;
				};

				hits.push(IndexHit {
					chunk_id: row.try_get("chunk_id")?,
					document_id: row.try_get("document_id")?,
					source_category,
					text: row.try_get("text")?,
					score: row.try_get("score")?,
				});
			}

			fara_domain::sort_index_hits(&mut hits);

			Ok(hits)
		})
	}

	fn chunk_ids<'a>(&'a self, document_id: Option<&'a str>) -> BoxFuture<'a, Result<Vec<Uuid>>> {
		Box::pin(async move {
			let ids: Vec<Uuid> = sqlx::query_scalar(
				"\
SELECT chunk_id
FROM fara_chunks
WHERE ($1::text IS NULL OR document_id = $1)
ORDER BY chunk_id ASC",
			)
			.bind(document_id)
			.fetch_all(&self.pool)
			.await
			.map_err(|err| self.classify(err))?;

			Ok(ids)
		})
	}
}

fn format_vector_text(vec: &[f32]) -> String {
	let mut out = String::from("[");

	for (idx, value) in vec.iter().enumerate() {
		if idx > 0 {
			out.push(',');
		}

		out.push_str(&value.to_string());
	}

	out.push(']');

	out
}
