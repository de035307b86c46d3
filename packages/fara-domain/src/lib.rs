pub mod chunk;
pub mod retrieval;
pub mod session;
pub mod time_serde;

pub use chunk::{Chunk, SourceCategory, UnknownSourceCategory, chunk_id_for};
pub use retrieval::{
	IndexHit, RetrievalFilter, RetrievalHit, SourceIndex, cmp_f32_desc, sort_index_hits,
};
pub use session::{AuditEntry, AuditOutcome, AuditRange, ConversationTurn, Role};
