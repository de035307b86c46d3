pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Chunking(#[from] fara_chunking::Error),
	#[error("Index {index} is unavailable: {message}")]
	IndexUnavailable { index: String, message: String },
	#[error("Retrieval failed: {message}")]
	Retrieval { message: String },
	#[error("Completion service error: {message}")]
	CompletionService { message: String },
	#[error("Memory consistency violation: {message}")]
	MemoryConsistency { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Request was cancelled.")]
	Cancelled,
}
impl Error {
	/// Stable name recorded in failed audit entries and returned to HTTP callers.
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Chunking(_) => "chunking",
			Self::IndexUnavailable { .. } => "index_unavailable",
			Self::Retrieval { .. } => "retrieval",
			Self::CompletionService { .. } => "completion_service",
			Self::MemoryConsistency { .. } => "memory_consistency",
			Self::Provider { .. } => "provider",
			Self::Storage { .. } => "storage",
			Self::InvalidRequest { .. } => "invalid_request",
			Self::Cancelled => "cancelled",
		}
	}
}

impl From<fara_storage::Error> for Error {
	fn from(err: fara_storage::Error) -> Self {
		match err {
			fara_storage::Error::Unavailable { index, message } =>
				Self::IndexUnavailable { index, message },
			fara_storage::Error::Conflict(message) => Self::MemoryConsistency { message },
			fara_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			other => Self::Storage { message: other.to_string() },
		}
	}
}

impl From<fara_providers::Error> for Error {
	fn from(err: fara_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}
