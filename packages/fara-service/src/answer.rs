//! Query orchestration: history, retrieval, completion, bookkeeping.

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::{CancelSignal, Error, FaraService, Result};
use fara_domain::{AuditOutcome, ConversationTurn, RetrievalFilter, RetrievalHit};

const SYSTEM_PROMPT: &str = "You are an assistant for financial audit work covering SOX controls \
and SEC filings. Answer using only the numbered context passages. Cite passages by their number. \
If the context does not contain the answer, say so.";

#[derive(Clone, Debug, Deserialize)]
pub struct QueryRequest {
	pub session_id: String,
	pub query: String,
	#[serde(default)]
	pub top_k: Option<u32>,
	#[serde(default)]
	pub filter: Option<RetrievalFilter>,
}

#[derive(Clone, Debug, Serialize)]
pub struct AnswerResponse {
	pub session_id: String,
	pub answer_text: String,
	/// Chunks placed in the prompt, in fused order.
	pub cited_chunk_ids: Vec<Uuid>,
	pub partial: bool,
	pub failed_indexes: Vec<String>,
	pub audit_sequence: u64,
}

impl FaraService {
	/// Answers one query within a session.
	///
	/// Failures after validation still leave a failed audit entry. Cancellation leaves the session
	/// untouched.
	pub async fn answer(&self, req: QueryRequest, cancel: &CancelSignal) -> Result<AnswerResponse> {
		let session_id = req.session_id.trim();
		let query = req.query.trim();

		if session_id.is_empty() {
			return Err(Error::InvalidRequest {
				message: "session_id must be non-empty.".to_string(),
			});
		}
		if query.is_empty() {
			return Err(Error::InvalidRequest { message: "query must be non-empty.".to_string() });
		}

		let k = self.resolve_top_k(req.top_k)?;
		let history = match self
			.memory
			.get_recent(session_id, Some(self.cfg.memory.prompt_turns as usize), None)
			.await
		{
			Ok(history) => history,
			Err(err) => return Err(self.record_failure(session_id, query, &[], err).await),
		};
		let retrieval = match self.retrieve_inner(query, k, req.filter.as_ref(), cancel).await {
			Ok(retrieval) => retrieval,
			Err(err) => return Err(self.record_failure(session_id, query, &[], err).await),
		};
		let cited_chunk_ids: Vec<Uuid> = retrieval.hits.iter().map(|hit| hit.chunk_id).collect();
		let messages = build_messages(&retrieval.hits, &history, query);
		let completion = tokio::select! {
			biased;
			_ = cancel.cancelled() => return Err(Error::Cancelled),
			completion = self
				.providers
				.completion
				.complete(&self.cfg.providers.completion, &messages) => completion,
		};
		let answer_text = match completion {
			Ok(text) => text,
			Err(err) => {
				let err = Error::CompletionService { message: err.to_string() };

				return Err(self.record_failure(session_id, query, &cited_chunk_ids, err).await);
			},
		};
		let exchange = match self
			.memory
			.record_exchange(
				session_id,
				query,
				&answer_text,
				&cited_chunk_ids,
				retrieval.partial,
				cancel,
			)
			.await
		{
			Ok(exchange) => exchange,
			Err(err) =>
				return Err(self.record_failure(session_id, query, &cited_chunk_ids, err).await),
		};

		tracing::info!(
			session_id,
			audit_sequence = exchange.audit.sequence,
			citations = cited_chunk_ids.len(),
			partial = retrieval.partial,
			"Query answered."
		);

		Ok(AnswerResponse {
			session_id: session_id.to_string(),
			answer_text,
			cited_chunk_ids,
			partial: retrieval.partial,
			failed_indexes: retrieval.failed_indexes,
			audit_sequence: exchange.audit.sequence,
		})
	}

	/// Writes a failed audit entry for `err` and hands the error back. Cancelled and invalid
	/// requests are not recorded.
	async fn record_failure(
		&self,
		session_id: &str,
		query: &str,
		chunk_ids: &[Uuid],
		err: Error,
	) -> Error {
		if matches!(err, Error::Cancelled | Error::InvalidRequest { .. }) {
			return err;
		}

		let outcome =
			AuditOutcome::Failed { error_kind: err.kind().to_string(), message: err.to_string() };

		if let Err(audit_err) = self
			.memory
			.append_audit(session_id, query, chunk_ids, outcome, &CancelSignal::never())
			.await
		{
			tracing::error!(
				session_id,
				error = %audit_err,
				"Failed to record the failed query in the audit log."
			);
		}

		tracing::warn!(session_id, error_kind = err.kind(), error = %err, "Query failed.");

		err
	}
}

fn build_messages(hits: &[RetrievalHit], history: &[ConversationTurn], query: &str) -> Vec<Value> {
	let mut context = String::new();

	for (i, hit) in hits.iter().enumerate() {
		if !context.is_empty() {
			context.push_str("\n\n");
		}

		context.push_str(&format!(
			"[{}] ({}, {})\n{}",
			i + 1,
			hit.source_category,
			hit.document_id,
			hit.text
		));
	}

	if context.is_empty() {
		context.push_str("No passages were retrieved.");
	}

	let mut messages = Vec::with_capacity(history.len() + 2);

	messages.push(json!({
		"role": "system",
		"content": format!("{SYSTEM_PROMPT}\n\nContext:\n{context}"),
	}));

	for turn in history {
		messages.push(json!({ "role": turn.role.as_str(), "content": turn.text }));
	}

	messages.push(json!({ "role": "user", "content": query }));

	messages
}
