//! Per-vector scalar quantization to `u8`.
//!
//! `quantized = round((value - min) / scale)` with `scale = (max - min) / 255`. Similarity is
//! computed against the full-precision query after on-the-fly reconstruction, trading a small
//! recall loss for a quarter of the memory.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalarQuantized {
	pub data: Vec<u8>,
	pub min: f32,
	pub scale: f32,
}
impl ScalarQuantized {
	pub fn quantize(vector: &[f32]) -> Self {
		if vector.is_empty() {
			return Self { data: Vec::new(), min: 0.0, scale: 1.0 };
		}

		let min = vector.iter().copied().fold(f32::INFINITY, f32::min);
		let max = vector.iter().copied().fold(f32::NEG_INFINITY, f32::max);
		let scale = if (max - min).abs() < f32::EPSILON { 1.0 } else { (max - min) / 255.0 };
		let data =
			vector.iter().map(|&v| ((v - min) / scale).round().clamp(0.0, 255.0) as u8).collect();

		Self { data, min, scale }
	}

	pub fn reconstruct(&self) -> Vec<f32> {
		self.data.iter().map(|&v| self.min + v as f32 * self.scale).collect()
	}

	/// Approximate cosine similarity. Zero for mismatched lengths or zero-magnitude vectors.
	pub fn cosine_to_query(&self, query: &[f32], query_magnitude: f32) -> f32 {
		if self.data.len() != query.len() || query_magnitude == 0.0 {
			return 0.0;
		}

		let mut dot = 0.0_f32;
		let mut self_mag_sq = 0.0_f32;

		for (&code, &q) in self.data.iter().zip(query) {
			let value = self.min + code as f32 * self.scale;

			dot += value * q;
			self_mag_sq += value * value;
		}

		let self_mag = self_mag_sq.sqrt();

		if self_mag == 0.0 {
			return 0.0;
		}

		dot / (self_mag * query_magnitude)
	}
}

pub fn magnitude(vector: &[f32]) -> f32 {
	vector.iter().map(|value| value * value).sum::<f32>().sqrt()
}

pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
	if a.len() != b.len() {
		return 0.0;
	}

	let denom = magnitude(a) * magnitude(b);

	if denom == 0.0 {
		return 0.0;
	}

	a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>() / denom
}
