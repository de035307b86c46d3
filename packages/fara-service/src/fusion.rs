//! Weighted score fusion of the two index result lists.

use ahash::AHashMap;
use uuid::Uuid;

use fara_domain::{IndexHit, RetrievalHit, SourceIndex, cmp_f32_desc};

#[derive(Clone, Copy, Debug)]
pub struct FusionWeights {
	pub weight_a: f32,
	pub weight_b: f32,
}

#[derive(Clone, Copy, Debug)]
pub struct FusionParams {
	pub weights: FusionWeights,
	pub k: usize,
	/// Hits strictly below this fused score are dropped before truncation.
	pub min_fused_score: Option<f32>,
}

struct Candidate<'a> {
	hit: &'a IndexHit,
	score_a: Option<f32>,
	score_b: Option<f32>,
}

/// Merges per-index hits by chunk id.
///
/// A chunk seen by both indexes scores `weight_a * score_a + weight_b * score_b`, a chunk seen by
/// one index scores that index's weighted score. Output is ordered by fused score descending, then
/// chunk id ascending, and holds at most `k` hits.
pub fn fuse(hits_a: &[IndexHit], hits_b: &[IndexHit], params: FusionParams) -> Vec<RetrievalHit> {
	let mut candidates: AHashMap<Uuid, Candidate<'_>> = AHashMap::new();

	for (hits, from_a) in [(hits_a, true), (hits_b, false)] {
		for hit in hits {
			if !hit.score.is_finite() {
				tracing::warn!(
					chunk_id = %hit.chunk_id,
					from_a,
					"Non-finite index score ignored."
				);

				continue;
			}

			let candidate = candidates.entry(hit.chunk_id).or_insert(Candidate {
				hit,
				score_a: None,
				score_b: None,
			});
			let slot = if from_a { &mut candidate.score_a } else { &mut candidate.score_b };

			// An index may report one chunk more than once. Keep its best score.
			*slot = Some(slot.map_or(hit.score, |existing| existing.max(hit.score)));
		}
	}

	let FusionWeights { weight_a, weight_b } = params.weights;
	let mut fused: Vec<RetrievalHit> = candidates
		.into_values()
		.map(|candidate| {
			let fused_score = candidate.score_a.map_or(0.0, |score| weight_a * score)
				+ candidate.score_b.map_or(0.0, |score| weight_b * score);
			let source_index = match (candidate.score_a, candidate.score_b) {
				(Some(_), Some(_)) => SourceIndex::Both,
				(Some(_), None) => SourceIndex::A,
				_ => SourceIndex::B,
			};

			RetrievalHit {
				chunk_id: candidate.hit.chunk_id,
				document_id: candidate.hit.document_id.clone(),
				source_category: candidate.hit.source_category,
				text: candidate.hit.text.clone(),
				score_a: candidate.score_a,
				score_b: candidate.score_b,
				fused_score,
				source_index,
			}
		})
		.collect();

	fused.sort_by(|left, right| {
		cmp_f32_desc(left.fused_score, right.fused_score)
			.then_with(|| left.chunk_id.cmp(&right.chunk_id))
	});

	if let Some(min) = params.min_fused_score {
		fused.retain(|hit| hit.fused_score >= min);
	}

	fused.truncate(params.k);

	fused
}
