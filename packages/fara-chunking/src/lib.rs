mod error;

pub use error::{Error, Result};

use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use fara_domain::{SourceCategory, chunk_id_for};

#[derive(Clone, Debug)]
pub struct ChunkingConfig {
	pub window_tokens: u32,
	pub overlap_fraction: f32,
}
impl ChunkingConfig {
	pub fn validate(&self) -> Result<()> {
		if self.window_tokens == 0 {
			return Err(Error::InvalidConfig {
				message: "window_tokens must be greater than zero.".to_string(),
			});
		}
		if !self.overlap_fraction.is_finite() || !(0.0..1.0).contains(&self.overlap_fraction) {
			return Err(Error::InvalidConfig {
				message: "overlap_fraction must be in the range [0.0, 1.0).".to_string(),
			});
		}

		Ok(())
	}

	/// Tokens shared by consecutive windows.
	pub fn overlap_tokens(&self) -> usize {
		let overlap = (self.window_tokens as f32 * self.overlap_fraction).floor() as usize;

		overlap.min(self.window_tokens as usize - 1)
	}

	/// Distance between consecutive window starts, always at least one token.
	pub fn step_tokens(&self) -> usize {
		self.window_tokens as usize - self.overlap_tokens()
	}
}

/// Chunk before embedding. The embedding stage turns it into a [`fara_domain::Chunk`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextChunk {
	pub chunk_id: Uuid,
	pub document_id: String,
	pub source_category: SourceCategory,
	pub chunk_index: u32,
	pub start_offset: usize,
	pub end_offset: usize,
	pub text: String,
}

#[derive(Clone, Debug)]
pub struct Chunker {
	cfg: ChunkingConfig,
}
impl Chunker {
	pub fn new(cfg: ChunkingConfig) -> Result<Self> {
		cfg.validate()?;

		Ok(Self { cfg })
	}

	pub fn config(&self) -> &ChunkingConfig {
		&self.cfg
	}

	/// Splits raw bytes, rejecting anything that is not UTF-8 text.
	pub fn split_bytes(
		&self,
		document_id: &str,
		source_category: SourceCategory,
		raw: &[u8],
	) -> Result<Vec<TextChunk>> {
		let text = std::str::from_utf8(raw).map_err(|err| Error::NonText {
			document_id: document_id.to_string(),
			reason: format!("invalid UTF-8 at byte {}.", err.valid_up_to()),
		})?;

		self.split(document_id, source_category, text)
	}

	/// Splits a document into overlapping token windows.
	///
	/// Tokens are the non-whitespace word-boundary segments of the text. Each chunk spans from the
	/// first byte of its first token to the last byte of its last token, so chunk text keeps the
	/// original punctuation and spacing. Identical input always yields identical chunk ids.
	pub fn split(
		&self,
		document_id: &str,
		source_category: SourceCategory,
		text: &str,
	) -> Result<Vec<TextChunk>> {
		let document_id = document_id.trim();

		if document_id.is_empty() {
			return Err(Error::InvalidDocumentId);
		}
		if let Some((offset, ch)) = text.char_indices().find(|(_, ch)| is_binary_control(*ch)) {
			return Err(Error::NonText {
				document_id: document_id.to_string(),
				reason: format!("control character U+{:04X} at byte {offset}.", ch as u32),
			});
		}

		let tokens: Vec<(usize, usize)> = text
			.split_word_bound_indices()
			.filter(|(_, segment)| !segment.trim().is_empty())
			.map(|(idx, segment)| (idx, idx + segment.len()))
			.collect();

		if tokens.is_empty() {
			return Err(Error::Empty { document_id: document_id.to_string() });
		}

		let window = self.cfg.window_tokens as usize;
		let step = self.cfg.step_tokens();
		let mut chunks = Vec::new();
		let mut start = 0_usize;
		let mut chunk_index = 0_u32;

		loop {
			let end = (start + window).min(tokens.len());
			let start_offset = tokens[start].0;
			let end_offset = tokens[end - 1].1;

			chunks.push(TextChunk {
				chunk_id: chunk_id_for(document_id, start_offset),
				document_id: document_id.to_string(),
				source_category,
				chunk_index,
				start_offset,
				end_offset,
				text: text[start_offset..end_offset].to_string(),
			});

			if end == tokens.len() {
				break;
			}

			start += step;
			chunk_index += 1;
		}

		tracing::debug!(
			document_id,
			token_count = tokens.len(),
			chunk_count = chunks.len(),
			"Document split into chunks."
		);

		Ok(chunks)
	}
}

fn is_binary_control(ch: char) -> bool {
	ch.is_control() && !matches!(ch, '\n' | '\r' | '\t' | '\u{c}')
}
