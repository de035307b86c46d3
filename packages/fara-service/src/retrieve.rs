//! Ensemble retrieval over Index A and Index B.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::time::{self, Duration, Instant};

use crate::{
	CancelSignal, Error, FaraService, Result,
	fusion::{self, FusionParams, FusionWeights},
};
use fara_domain::{IndexHit, RetrievalFilter, RetrievalHit};
use fara_storage::VectorIndex;

#[derive(Clone, Debug, Deserialize)]
pub struct RetrieveRequest {
	pub query: String,
	#[serde(default)]
	pub top_k: Option<u32>,
	#[serde(default)]
	pub filter: Option<RetrievalFilter>,
}

#[derive(Clone, Debug, Serialize)]
pub struct RetrieveResponse {
	pub hits: Vec<RetrievalHit>,
	/// Set when one index failed or timed out and the hits come from the other alone.
	pub partial: bool,
	pub failed_indexes: Vec<String>,
}

impl FaraService {
	pub async fn retrieve(
		&self,
		req: RetrieveRequest,
		cancel: &CancelSignal,
	) -> Result<RetrieveResponse> {
		let query = req.query.trim();

		if query.is_empty() {
			return Err(Error::InvalidRequest { message: "query must be non-empty.".to_string() });
		}

		let k = self.resolve_top_k(req.top_k)?;

		self.retrieve_inner(query, k, req.filter.as_ref(), cancel).await
	}

	pub(crate) fn resolve_top_k(&self, top_k: Option<u32>) -> Result<usize> {
		let cfg = &self.cfg.retrieval;
		let k = top_k.unwrap_or(cfg.top_k);

		if k == 0 || k > cfg.max_top_k {
			return Err(Error::InvalidRequest {
				message: format!("top_k must be between 1 and {}.", cfg.max_top_k),
			});
		}

		Ok(k as usize)
	}

	pub(crate) async fn retrieve_inner(
		&self,
		query: &str,
		k: usize,
		filter: Option<&RetrievalFilter>,
		cancel: &CancelSignal,
	) -> Result<RetrieveResponse> {
		let cfg = &self.cfg.retrieval;
		let filter = filter.filter(|filter| !filter.is_empty());
		let texts = [query.to_string()];
		let mut vectors = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(Error::Cancelled),
			vectors = self.embed_texts(&texts) => vectors?,
		};
		let Some(vector) = vectors.pop() else {
			return Err(Error::Provider { message: "Query embedding is missing.".to_string() });
		};
		let fetch = k.saturating_mul(cfg.overfetch_factor as usize);
		let deadline = Instant::now() + Duration::from_millis(cfg.timeout_ms);
		let searches = async {
			tokio::join!(
				search_index(&self.index_a, &vector, fetch, filter, deadline),
				search_index(&self.index_b, &vector, fetch, filter, deadline),
			)
		};
		let (result_a, result_b) = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(Error::Cancelled),
			results = searches => results,
		};
		let mut failed_indexes = Vec::new();
		let (hits_a, hits_b) = match (result_a, result_b) {
			(Ok(a), Ok(b)) => (a, b),
			(Err(err_a), Err(err_b)) => {
				tracing::error!(
					error_a = %err_a,
					error_b = %err_b,
					"Both indexes failed. Retrieval aborted."
				);

				return Err(Error::Retrieval {
					message: format!(
						"{} ({err_a}); {} ({err_b}).",
						self.index_a.name(),
						self.index_b.name()
					),
				});
			},
			(Err(err), Ok(b)) => {
				tracing::warn!(
					index = self.index_a.name(),
					error = %err,
					"Index search failed. Continuing degraded."
				);
				failed_indexes.push(self.index_a.name().to_string());

				(Vec::new(), b)
			},
			(Ok(a), Err(err)) => {
				tracing::warn!(
					index = self.index_b.name(),
					error = %err,
					"Index search failed. Continuing degraded."
				);
				failed_indexes.push(self.index_b.name().to_string());

				(a, Vec::new())
			},
		};
		let hits_a = post_filter(&self.index_a, hits_a, filter);
		let hits_b = post_filter(&self.index_b, hits_b, filter);
		let hits = fusion::fuse(
			&hits_a,
			&hits_b,
			FusionParams {
				weights: FusionWeights { weight_a: cfg.weight_a, weight_b: cfg.weight_b },
				k,
				min_fused_score: cfg.min_fused_score,
			},
		);

		tracing::debug!(
			k,
			fetch,
			hits_a = hits_a.len(),
			hits_b = hits_b.len(),
			fused = hits.len(),
			partial = !failed_indexes.is_empty(),
			"Retrieval fused."
		);

		Ok(RetrieveResponse { hits, partial: !failed_indexes.is_empty(), failed_indexes })
	}
}

/// Runs one index search under the shared deadline. A timeout counts as a failure.
async fn search_index(
	index: &Arc<dyn VectorIndex>,
	vector: &[f32],
	k: usize,
	filter: Option<&RetrievalFilter>,
	deadline: Instant,
) -> Result<Vec<IndexHit>, String> {
	let filter = filter.filter(|_| index.supports_filter());

	match time::timeout_at(deadline, index.search(vector, k, filter)).await {
		Ok(Ok(hits)) => Ok(hits),
		Ok(Err(err)) => Err(err.to_string()),
		Err(_) => Err("search timed out".to_string()),
	}
}

/// Applies the filter to hits from an index that could not take it as a query parameter.
fn post_filter(
	index: &Arc<dyn VectorIndex>,
	hits: Vec<IndexHit>,
	filter: Option<&RetrievalFilter>,
) -> Vec<IndexHit> {
	match filter {
		Some(filter) if !index.supports_filter() => hits
			.into_iter()
			.filter(|hit| filter.matches(hit.source_category, &hit.document_id))
			.collect(),
		_ => hits,
	}
}
