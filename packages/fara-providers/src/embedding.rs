use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;

use crate::{Error, Result};

pub async fn embed(
	cfg: &fara_config::EmbeddingProviderConfig,
	texts: &[String],
) -> Result<Vec<Vec<f32>>> {
	if cfg.is_local() {
		return Ok(crate::hashing::embed(texts, cfg.dimensions as usize));
	}
	if texts.is_empty() {
		return Ok(Vec::new());
	}

	let headers = crate::auth_headers(&cfg.api_key, &cfg.default_headers)?;
	let json: Value = Client::builder()
		.timeout(Duration::from_millis(cfg.timeout_ms))
		.build()?
		.post(format!("{}{}", cfg.api_base, cfg.path))
		.headers(headers)
		.json(&serde_json::json!({
			"model": cfg.model,
			"input": texts,
			"dimensions": cfg.dimensions,
		}))
		.send()
		.await?
		.error_for_status()?
		.json()
		.await?;
	let vectors = parse_embedding_response(json)?;

	if vectors.len() != texts.len() {
		return Err(Error::InvalidResponse {
			message: format!("Expected {} embeddings, got {}.", texts.len(), vectors.len()),
		});
	}

	Ok(vectors)
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
	data: Vec<EmbeddingItem>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
	index: Option<usize>,
	embedding: Vec<f32>,
}

/// Decodes an `/embeddings` body, restoring input order from each item's `index`.
fn parse_embedding_response(json: Value) -> Result<Vec<Vec<f32>>> {
	let response: EmbeddingResponse = serde_json::from_value(json).map_err(|err| {
		Error::InvalidResponse { message: format!("Malformed embedding response: {err}.") }
	})?;
	let mut items = response
		.data
		.into_iter()
		.enumerate()
		.map(|(position, item)| (item.index.unwrap_or(position), item.embedding))
		.collect::<Vec<_>>();

	items.sort_by_key(|(index, _)| *index);

	Ok(items.into_iter().map(|(_, embedding)| embedding).collect())
}
