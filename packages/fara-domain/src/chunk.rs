use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Corpus partition a document belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
	Sox,
	PublicSec,
	PrivateSec,
}
impl SourceCategory {
	pub const ALL: [Self; 3] = [Self::Sox, Self::PublicSec, Self::PrivateSec];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Sox => "sox",
			Self::PublicSec => "public_sec",
			Self::PrivateSec => "private_sec",
		}
	}
}
impl fmt::Display for SourceCategory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
impl FromStr for SourceCategory {
	type Err = UnknownSourceCategory;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw.trim() {
			"sox" => Ok(Self::Sox),
			"public_sec" => Ok(Self::PublicSec),
			"private_sec" => Ok(Self::PrivateSec),
			other => Err(UnknownSourceCategory(other.to_string())),
		}
	}
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown source category {0:?}.")]
pub struct UnknownSourceCategory(pub String);

/// Indexed unit of retrieval. Never mutated after it is built; re-ingest replaces it wholesale.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
	pub chunk_id: Uuid,
	pub document_id: String,
	pub source_category: SourceCategory,
	/// Byte offset of the chunk start within the source document.
	pub offset: usize,
	pub chunk_index: u32,
	pub text: String,
	pub embedding: Vec<f32>,
	#[serde(with = "crate::time_serde")]
	pub created_at: OffsetDateTime,
}

/// Stable chunk identity. Identical `(document_id, offset)` pairs always map to the same id.
pub fn chunk_id_for(document_id: &str, offset: usize) -> Uuid {
	Uuid::new_v5(&Uuid::NAMESPACE_OID, format!("{document_id}:{offset}").as_bytes())
}
