pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Document {document_id} is empty.")]
	Empty { document_id: String },
	#[error("Document {document_id} is not text: {reason}")]
	NonText { document_id: String, reason: String },
	#[error("Document id must be non-empty.")]
	InvalidDocumentId,
	#[error("{message}")]
	InvalidConfig { message: String },
}
