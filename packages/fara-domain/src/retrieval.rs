use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::SourceCategory;

/// Metadata restriction for a search. Empty lists do not restrict.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalFilter {
	pub source_categories: Vec<SourceCategory>,
	pub document_ids: Vec<String>,
}
impl RetrievalFilter {
	pub fn is_empty(&self) -> bool {
		self.source_categories.is_empty() && self.document_ids.is_empty()
	}

	pub fn matches(&self, source_category: SourceCategory, document_id: &str) -> bool {
		let category_ok = self.source_categories.is_empty()
			|| self.source_categories.contains(&source_category);
		let document_ok =
			self.document_ids.is_empty() || self.document_ids.iter().any(|id| id == document_id);

		category_ok && document_ok
	}
}

/// One scored row returned by a single index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexHit {
	pub chunk_id: Uuid,
	pub document_id: String,
	pub source_category: SourceCategory,
	pub text: String,
	pub score: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceIndex {
	A,
	B,
	Both,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetrievalHit {
	pub chunk_id: Uuid,
	pub document_id: String,
	pub source_category: SourceCategory,
	pub text: String,
	pub score_a: Option<f32>,
	pub score_b: Option<f32>,
	pub fused_score: f32,
	pub source_index: SourceIndex,
}

/// Descending score order with NaN sorted last.
pub fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}

/// Orders hits by score descending, then chunk id ascending.
pub fn sort_index_hits(hits: &mut [IndexHit]) {
	hits.sort_by(|a, b| cmp_f32_desc(a.score, b.score).then_with(|| a.chunk_id.cmp(&b.chunk_id)));
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn nan_sorts_last() {
		let mut scores = vec![0.2, f32::NAN, 0.9];

		scores.sort_by(|a, b| cmp_f32_desc(*a, *b));

		assert_eq!(scores[0], 0.9);
		assert_eq!(scores[1], 0.2);
		assert!(scores[2].is_nan());
	}

	#[test]
	fn empty_filter_matches_everything() {
		let filter = RetrievalFilter::default();

		assert!(filter.is_empty());
		assert!(filter.matches(SourceCategory::PrivateSec, "any"));
	}

	#[test]
	fn filter_requires_both_dimensions() {
		let filter = RetrievalFilter {
			source_categories: vec![SourceCategory::Sox],
			document_ids: vec!["sox/a.txt".to_string()],
		};

		assert!(filter.matches(SourceCategory::Sox, "sox/a.txt"));
		assert!(!filter.matches(SourceCategory::Sox, "sox/b.txt"));
		assert!(!filter.matches(SourceCategory::PublicSec, "sox/a.txt"));
	}
}
