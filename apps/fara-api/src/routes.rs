use axum::{
	Json, Router,
	extract::{Path, Query, State},
	http::StatusCode,
	response::{IntoResponse, Response},
	routing::{delete, get, post},
};
use serde::{Deserialize, Serialize};

use crate::state::AppState;
use fara_domain::{AuditEntry, AuditRange, ConversationTurn};
use fara_service::{
	AnswerResponse, CancelHandle, ConsistencyReport, CorpusReport, DeleteDocumentResponse, Error,
	IngestRequest, IngestResponse, QueryRequest, RetrieveRequest, RetrieveResponse,
};

#[derive(Debug, Default, Deserialize)]
pub struct TurnsQuery {
	pub max_turns: Option<usize>,
	pub max_age_secs: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AuditQuery {
	pub start: Option<u64>,
	pub end: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConsistencyQuery {
	pub document_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TurnsResponse {
	pub session_id: String,
	pub turns: Vec<ConversationTurn>,
}

#[derive(Debug, Serialize)]
pub struct AuditResponse {
	pub session_id: String,
	pub entries: Vec<AuditEntry>,
}

#[derive(Debug)]
pub struct ApiError {
	status: StatusCode,
	error_code: String,
	message: String,
}
impl ApiError {
	fn new(status: StatusCode, error_code: impl Into<String>, message: impl Into<String>) -> Self {
		Self { status, error_code: error_code.into(), message: message.into() }
	}
}
impl From<Error> for ApiError {
	fn from(err: Error) -> Self {
		let status = match &err {
			Error::InvalidRequest { .. } | Error::Chunking(_) => StatusCode::BAD_REQUEST,
			Error::Retrieval { .. } | Error::IndexUnavailable { .. } =>
				StatusCode::SERVICE_UNAVAILABLE,
			Error::CompletionService { .. } | Error::Provider { .. } => StatusCode::BAD_GATEWAY,
			Error::MemoryConsistency { .. } => StatusCode::CONFLICT,
			Error::Cancelled => StatusCode::REQUEST_TIMEOUT,
			Error::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
		};

		if status.is_server_error() {
			tracing::error!(error_kind = err.kind(), error = %err, "Request failed.");
		}

		Self::new(status, err.kind().to_ascii_uppercase(), err.to_string())
	}
}
impl IntoResponse for ApiError {
	fn into_response(self) -> Response {
		let body = ErrorBody { error_code: self.error_code, message: self.message };

		(self.status, Json(body)).into_response()
	}
}

#[derive(Debug, Serialize)]
struct ErrorBody {
	error_code: String,
	message: String,
}

pub fn router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health))
		.route("/v1/ingest", post(ingest))
		.route("/v1/ingest/corpus", post(ingest_corpus))
		.route("/v1/documents/{*document_id}", delete(delete_document))
		.route("/v1/retrieve", post(retrieve))
		.route("/v1/query", post(query))
		.route("/v1/sessions/{session_id}/turns", get(session_turns))
		.route("/v1/sessions/{session_id}/audit", get(session_audit))
		.with_state(state)
}

pub fn admin_router(state: AppState) -> Router {
	Router::new().route("/v1/admin/consistency", get(consistency)).with_state(state)
}

async fn health() -> StatusCode {
	StatusCode::OK
}

async fn ingest(
	State(state): State<AppState>,
	Json(payload): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, ApiError> {
	let response = state.service.ingest(payload).await?;

	Ok(Json(response))
}

async fn ingest_corpus(State(state): State<AppState>) -> Result<Json<CorpusReport>, ApiError> {
	let response = state.service.ingest_corpus().await?;

	Ok(Json(response))
}

async fn delete_document(
	State(state): State<AppState>,
	Path(document_id): Path<String>,
) -> Result<Json<DeleteDocumentResponse>, ApiError> {
	let response = state.service.delete_document(&document_id).await?;

	Ok(Json(response))
}

// The handle lives in the handler future. A client disconnect drops the future and cancels.
async fn retrieve(
	State(state): State<AppState>,
	Json(payload): Json<RetrieveRequest>,
) -> Result<Json<RetrieveResponse>, ApiError> {
	let (_handle, cancel) = CancelHandle::new();
	let response = state.service.retrieve(payload, &cancel).await?;

	Ok(Json(response))
}

async fn query(
	State(state): State<AppState>,
	Json(payload): Json<QueryRequest>,
) -> Result<Json<AnswerResponse>, ApiError> {
	let (_handle, cancel) = CancelHandle::new();
	let response = state.service.answer(payload, &cancel).await?;

	Ok(Json(response))
}

async fn session_turns(
	State(state): State<AppState>,
	Path(session_id): Path<String>,
	Query(params): Query<TurnsQuery>,
) -> Result<Json<TurnsResponse>, ApiError> {
	let max_age = params.max_age_secs.map(time::Duration::seconds);
	let turns = state.service.memory.get_recent(&session_id, params.max_turns, max_age).await?;

	Ok(Json(TurnsResponse { session_id, turns }))
}

async fn session_audit(
	State(state): State<AppState>,
	Path(session_id): Path<String>,
	Query(params): Query<AuditQuery>,
) -> Result<Json<AuditResponse>, ApiError> {
	let range = AuditRange { start: params.start, end: params.end };
	let entries = state.service.memory.get_audit(&session_id, range).await?;

	Ok(Json(AuditResponse { session_id, entries }))
}

async fn consistency(
	State(state): State<AppState>,
	Query(params): Query<ConsistencyQuery>,
) -> Result<Json<ConsistencyReport>, ApiError> {
	let report = state.service.consistency_report(params.document_id.as_deref()).await?;

	Ok(Json(report))
}
