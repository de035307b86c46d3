//! Document ingestion: chunk, embed, write both indexes.

use std::{
	collections::{BTreeSet, HashMap},
	sync::{Arc, Mutex, Weak},
};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex as DocumentLock;
use uuid::Uuid;

use crate::{Error, FaraService, Result};
use fara_chunking::TextChunk;
use fara_domain::{Chunk, SourceCategory};
use fara_storage::VectorIndex;

#[derive(Clone, Debug, Deserialize)]
pub struct IngestRequest {
	pub document_id: String,
	pub source_category: SourceCategory,
	pub text: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexWriteStatus {
	Written { upserted: usize, removed: usize },
	Failed { message: String },
}
impl IndexWriteStatus {
	pub fn is_failed(&self) -> bool {
		matches!(self, Self::Failed { .. })
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct IngestResponse {
	pub document_id: String,
	pub chunk_ids: Vec<Uuid>,
	pub index_a: IndexWriteStatus,
	pub index_b: IndexWriteStatus,
}
impl IngestResponse {
	/// One index missed this write and will lag until the next ingest of the document.
	pub fn is_partial(&self) -> bool {
		self.index_a.is_failed() || self.index_b.is_failed()
	}
}

#[derive(Clone, Debug, Serialize)]
pub struct DeleteDocumentResponse {
	pub document_id: String,
	pub index_a: IndexWriteStatus,
	pub index_b: IndexWriteStatus,
}

/// Chunk ids held by only one of the two indexes at the time of the scan.
#[derive(Clone, Debug, Default, Serialize)]
pub struct ConsistencyReport {
	pub document_id: Option<String>,
	pub in_both: usize,
	pub only_in_a: Vec<Uuid>,
	pub only_in_b: Vec<Uuid>,
}
impl ConsistencyReport {
	pub fn is_consistent(&self) -> bool {
		self.only_in_a.is_empty() && self.only_in_b.is_empty()
	}
}

/// Serializes index writes per document id. Entries die with their last holder.
#[derive(Default)]
pub(crate) struct DocumentLocks {
	locks: Mutex<HashMap<String, Weak<DocumentLock<()>>>>,
}
impl DocumentLocks {
	fn get(&self, document_id: &str) -> Arc<DocumentLock<()>> {
		let mut locks = self.locks.lock().unwrap_or_else(|err| err.into_inner());

		if let Some(lock) = locks.get(document_id).and_then(Weak::upgrade) {
			return lock;
		}

		locks.retain(|_, lock| lock.strong_count() > 0);

		let lock = Arc::new(DocumentLock::new(()));

		locks.insert(document_id.to_string(), Arc::downgrade(&lock));

		lock
	}
}

impl FaraService {
	pub async fn ingest(&self, req: IngestRequest) -> Result<IngestResponse> {
		let chunks = self.chunker.split(&req.document_id, req.source_category, &req.text)?;

		self.ingest_chunks(chunks).await
	}

	/// Writes freshly split chunks to both indexes. Either index may fail alone.
	pub(crate) async fn ingest_chunks(
		&self,
		text_chunks: Vec<TextChunk>,
	) -> Result<IngestResponse> {
		let Some(document_id) = text_chunks.first().map(|chunk| chunk.document_id.clone()) else {
			return Err(Error::InvalidRequest { message: "Nothing to ingest.".to_string() });
		};
		let texts: Vec<String> = text_chunks.iter().map(|chunk| chunk.text.clone()).collect();
		let embeddings = self.embed_texts(&texts).await?;
		let now = OffsetDateTime::now_utc();
		let chunks: Vec<Chunk> = text_chunks
			.into_iter()
			.zip(embeddings)
			.map(|(chunk, embedding)| Chunk {
				chunk_id: chunk.chunk_id,
				document_id: chunk.document_id,
				source_category: chunk.source_category,
				offset: chunk.start_offset,
				chunk_index: chunk.chunk_index,
				text: chunk.text,
				embedding,
				created_at: now,
			})
			.collect();
		let lock = self.document_locks.get(&document_id);
		let _writing = lock.lock().await;
		let (index_a, index_b) = tokio::join!(
			replace_document(&self.index_a, &document_id, &chunks),
			replace_document(&self.index_b, &document_id, &chunks),
		);

		both_failed(&self.index_a, &self.index_b, &index_a, &index_b)?;

		tracing::info!(
			document_id = %document_id,
			chunks = chunks.len(),
			index_a_failed = index_a.is_failed(),
			index_b_failed = index_b.is_failed(),
			"Document ingested."
		);

		Ok(IngestResponse {
			document_id,
			chunk_ids: chunks.iter().map(|chunk| chunk.chunk_id).collect(),
			index_a,
			index_b,
		})
	}

	pub async fn delete_document(&self, document_id: &str) -> Result<DeleteDocumentResponse> {
		let document_id = document_id.trim();

		if document_id.is_empty() {
			return Err(Error::InvalidRequest {
				message: "document_id must be non-empty.".to_string(),
			});
		}

		let lock = self.document_locks.get(document_id);
		let _writing = lock.lock().await;
		let (index_a, index_b) = tokio::join!(
			replace_document(&self.index_a, document_id, &[]),
			replace_document(&self.index_b, document_id, &[]),
		);

		both_failed(&self.index_a, &self.index_b, &index_a, &index_b)?;

		tracing::info!(document_id, "Document deleted.");

		Ok(DeleteDocumentResponse { document_id: document_id.to_string(), index_a, index_b })
	}

	pub async fn consistency_report(&self, document_id: Option<&str>) -> Result<ConsistencyReport> {
		let document_id = document_id.map(str::trim).filter(|id| !id.is_empty());
		let (ids_a, ids_b) = tokio::try_join!(
			self.index_a.chunk_ids(document_id),
			self.index_b.chunk_ids(document_id)
		)?;
		let ids_a: BTreeSet<Uuid> = ids_a.into_iter().collect();
		let ids_b: BTreeSet<Uuid> = ids_b.into_iter().collect();
		let report = ConsistencyReport {
			document_id: document_id.map(str::to_string),
			in_both: ids_a.intersection(&ids_b).count(),
			only_in_a: ids_a.difference(&ids_b).copied().collect(),
			only_in_b: ids_b.difference(&ids_a).copied().collect(),
		};

		if !report.is_consistent() {
			tracing::warn!(
				only_in_a = report.only_in_a.len(),
				only_in_b = report.only_in_b.len(),
				"Indexes diverge."
			);
		}

		Ok(report)
	}
}

/// Makes `index` hold exactly `chunks` for the document: upserts them, then removes chunk ids the
/// document no longer produces.
async fn replace_document(
	index: &Arc<dyn VectorIndex>,
	document_id: &str,
	chunks: &[Chunk],
) -> IndexWriteStatus {
	let result = async {
		if !chunks.is_empty() {
			index.upsert(chunks).await?;
		}

		let keep: BTreeSet<Uuid> = chunks.iter().map(|chunk| chunk.chunk_id).collect();
		let stale: Vec<Uuid> = index
			.chunk_ids(Some(document_id))
			.await?
			.into_iter()
			.filter(|chunk_id| !keep.contains(chunk_id))
			.collect();

		if !stale.is_empty() {
			index.delete(&stale).await?;
		}

		Ok::<_, fara_storage::Error>(IndexWriteStatus::Written {
			upserted: chunks.len(),
			removed: stale.len(),
		})
	}
	.await;

	result.unwrap_or_else(|err| {
		tracing::warn!(
			index = index.name(),
			document_id,
			error = %err,
			"Index write failed. Indexes will diverge until the next ingest."
		);

		IndexWriteStatus::Failed { message: err.to_string() }
	})
}

fn both_failed(
	index_a: &Arc<dyn VectorIndex>,
	index_b: &Arc<dyn VectorIndex>,
	status_a: &IndexWriteStatus,
	status_b: &IndexWriteStatus,
) -> Result<()> {
	if let (
		IndexWriteStatus::Failed { message: message_a },
		IndexWriteStatus::Failed { message: message_b },
	) = (status_a, status_b)
	{
		return Err(Error::IndexUnavailable {
			index: format!("{} and {}", index_a.name(), index_b.name()),
			message: format!("{message_a}; {message_b}"),
		});
	}

	Ok(())
}
