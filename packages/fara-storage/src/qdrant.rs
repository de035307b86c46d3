//! Unfiltered dense index on a Qdrant collection.

use std::collections::HashMap;

use qdrant_client::{
	Qdrant,
	client::Payload,
	qdrant::{
		Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, PointId,
		PointStruct, PointsIdsList, Query, QueryPointsBuilder, ScrollPointsBuilder,
		UpsertPointsBuilder, Value, VectorParamsBuilder, point_id::PointIdOptions, value::Kind,
	},
};
use uuid::Uuid;

use crate::{BoxFuture, Error, Result, VectorIndex};
use fara_domain::{Chunk, IndexHit, RetrievalFilter, SourceCategory, sort_index_hits};

const SCROLL_PAGE: u32 = 256;

pub struct QdrantIndex {
	name: String,
	client: Qdrant,
	collection: String,
	vector_dim: u32,
}
impl QdrantIndex {
	pub fn new(
		name: impl Into<String>,
		cfg: &fara_config::Qdrant,
		vector_dim: u32,
	) -> Result<Self> {
		let client = Qdrant::from_url(&cfg.url).build()?;

		Ok(Self { name: name.into(), client, collection: cfg.collection.clone(), vector_dim })
	}

	/// Creates the cosine collection when it does not exist yet.
	pub async fn ensure_collection(&self) -> Result<()> {
		if self.client.collection_exists(self.collection.clone()).await? {
			return Ok(());
		}

		let builder = CreateCollectionBuilder::new(self.collection.clone())
			.vectors_config(VectorParamsBuilder::new(self.vector_dim.into(), Distance::Cosine));

		self.client.create_collection(builder).await?;

		tracing::info!(
			index = %self.name,
			collection = %self.collection,
			"Qdrant collection created."
		);

		Ok(())
	}

	fn unavailable(&self, err: qdrant_client::QdrantError) -> Error {
		Error::Unavailable { index: self.name.clone(), message: err.to_string() }
	}
}
impl VectorIndex for QdrantIndex {
	fn name(&self) -> &str {
		&self.name
	}

	fn supports_filter(&self) -> bool {
		false
	}

	fn upsert<'a>(&'a self, chunks: &'a [Chunk]) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			crate::check_dimensions(&self.name, chunks, self.vector_dim)?;

			if chunks.is_empty() {
				return Ok(());
			}

			let mut points = Vec::with_capacity(chunks.len());

			for chunk in chunks {
				let mut payload_map = HashMap::new();

				payload_map
					.insert("document_id".to_string(), Value::from(chunk.document_id.clone()));
				payload_map.insert(
					"source_category".to_string(),
					Value::from(chunk.source_category.as_str().to_string()),
				);
				payload_map.insert("chunk_offset".to_string(), Value::from(chunk.offset as i64));
				payload_map
					.insert("chunk_index".to_string(), Value::from(chunk.chunk_index as i64));
				payload_map.insert("text".to_string(), Value::from(chunk.text.clone()));

				points.push(PointStruct::new(
					chunk.chunk_id.to_string(),
					chunk.embedding.clone(),
					Payload::from(payload_map),
				));
			}

			let upsert = UpsertPointsBuilder::new(self.collection.clone(), points).wait(true);

			self.client.upsert_points(upsert).await.map_err(|err| self.unavailable(err))?;

			Ok(())
		})
	}

	fn delete<'a>(&'a self, chunk_ids: &'a [Uuid]) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			if chunk_ids.is_empty() {
				return Ok(());
			}

			let ids = PointsIdsList {
				ids: chunk_ids.iter().map(|id| PointId::from(id.to_string())).collect(),
			};
			let delete = DeletePointsBuilder::new(self.collection.clone()).points(ids).wait(true);

			match self.client.delete_points(delete).await {
				Ok(_) => {},
				Err(err) =>
					if is_not_found_error(&err) {
						tracing::info!(index = %self.name, "Qdrant points missing during delete.");
					} else {
						return Err(self.unavailable(err));
					},
			}

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
			crate::reject_filter(&self.name, filter)?;

			let search = QueryPointsBuilder::new(self.collection.clone())
				.query(Query::new_nearest(query.to_vec()))
				.limit(k as u64)
				.with_payload(true);
			let response = self.client.query(search).await.map_err(|err| self.unavailable(err))?;
			let mut hits = Vec::with_capacity(response.result.len());

			for point in response.result {
				let Some(chunk_id) = point.id.as_ref().and_then(point_id_to_uuid) else {
					tracing::warn!(index = %self.name, "Qdrant point missing a UUID id. Skipping.");

					continue;
				};
				let Some(document_id) = payload_string(&point.payload, "document_id") else {
					tracing::warn!(
						chunk_id = %chunk_id,
						"Qdrant point missing document_id. Skipping."
					);

					continue;
				};
				let Some(source_category) = payload_string(&point.payload, "source_category")
					.and_then(|raw| raw.parse::<SourceCategory>().ok())
				else {
					tracing::warn!(
						chunk_id = %chunk_id,
						"Qdrant point missing a valid source_category. Skipping."
					);

					continue;
				};

				hits.push(IndexHit {
					chunk_id,
					document_id,
					source_category,
					text: payload_string(&point.payload, "text").unwrap_or_default(),
					score: point.score,
				});
			}

			sort_index_hits(&mut hits);

			Ok(hits)
		})
	}

	fn chunk_ids<'a>(&'a self, document_id: Option<&'a str>) -> BoxFuture<'a, Result<Vec<Uuid>>> {
		Box::pin(async move {
			let mut ids = Vec::new();
			let mut offset: Option<PointId> = None;

			loop {
				let mut scroll = ScrollPointsBuilder::new(self.collection.clone())
					.limit(SCROLL_PAGE)
					.with_payload(false)
					.with_vectors(false);

				if let Some(document_id) = document_id {
					scroll = scroll.filter(Filter::must([Condition::matches(
						"document_id",
						document_id.to_string(),
					)]));
				}
				if let Some(offset) = offset.take() {
					scroll = scroll.offset(offset);
				}

				let response =
					self.client.scroll(scroll).await.map_err(|err| self.unavailable(err))?;

				ids.extend(
					response
						.result
						.iter()
						.filter_map(|point| point.id.as_ref().and_then(point_id_to_uuid)),
				);

				match response.next_page_offset {
					Some(next) => offset = Some(next),
					None => break,
				}
			}

			ids.sort();

			Ok(ids)
		})
	}
}

fn point_id_to_uuid(point_id: &PointId) -> Option<Uuid> {
	match &point_id.point_id_options {
		Some(PointIdOptions::Uuid(id)) => Uuid::parse_str(id).ok(),
		_ => None,
	}
}

fn payload_string(payload: &HashMap<String, Value>, key: &str) -> Option<String> {
	match &payload.get(key)?.kind {
		Some(Kind::StringValue(value)) => Some(value.clone()),
		_ => None,
	}
}

fn is_not_found_error(err: &qdrant_client::QdrantError) -> bool {
	let message = err.to_string().to_lowercase();
	let point_not_found =
		(message.contains("not found") || message.contains("404")) && message.contains("point");
	let no_point_found = message.contains("no point") && message.contains("found");

	point_not_found || no_point_found
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reads_uuid_point_ids_only() {
		let id = Uuid::new_v4();

		assert_eq!(point_id_to_uuid(&PointId::from(id.to_string())), Some(id));
		assert_eq!(point_id_to_uuid(&PointId::from(7_u64)), None);
	}

	#[test]
	fn reads_string_payload_values() {
		let mut payload = HashMap::new();

		payload.insert("document_id".to_string(), Value::from("sox/a.txt".to_string()));
		payload.insert("chunk_index".to_string(), Value::from(3_i64));

		assert_eq!(payload_string(&payload, "document_id").as_deref(), Some("sox/a.txt"));
		assert_eq!(payload_string(&payload, "chunk_index"), None);
		assert_eq!(payload_string(&payload, "missing"), None);
	}
}
