//! Deterministic feature-hashing embedder for offline runs and tests.
//!
//! Each lowercase word of the input adds one to the bucket chosen by its BLAKE3 digest, and the
//! result is L2-normalized. Every text is embedded independently, so batch and single calls
//! produce bit-identical vectors. Buckets only ever accumulate, so cosine similarity between two
//! outputs is never negative.

use unicode_segmentation::UnicodeSegmentation;

pub fn embed(texts: &[String], dimensions: usize) -> Vec<Vec<f32>> {
	texts.iter().map(|text| embed_one(text, dimensions)).collect()
}

pub fn embed_one(text: &str, dimensions: usize) -> Vec<f32> {
	let mut vector = vec![0.0_f32; dimensions];

	if dimensions == 0 {
		return vector;
	}

	for word in text.unicode_words() {
		let word = word.to_lowercase();
		let digest = blake3::hash(word.as_bytes());
		let mut bucket = [0_u8; 8];

		bucket.copy_from_slice(&digest.as_bytes()[..8]);

		let idx = (u64::from_le_bytes(bucket) % dimensions as u64) as usize;

		vector[idx] += 1.0;
	}

	let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();

	if norm > 0.0 {
		for value in &mut vector {
			*value /= norm;
		}
	}

	vector
}
