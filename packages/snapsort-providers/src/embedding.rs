use std::time::Duration;

use reqwest::Client;
use serde_json::Value;

use crate::{Error, Result};
use snapsort_config::EmbeddingProviderConfig;

/// Embeds `texts` in a single request against an OpenAI-compatible `/embeddings` endpoint.
///
/// The returned vectors are in input order and each has `cfg.dimensions` components.
pub async fn embed(cfg: &EmbeddingProviderConfig, texts: &[String]) -> Result<Vec<Vec<f32>>> {
	if texts.is_empty() {
		return Ok(Vec::new());
	}

	let client = Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?;
	let url = crate::endpoint_url(&cfg.api_base, &cfg.path);
	let body = serde_json::json!({
		"model": cfg.model,
		"input": texts,
		"dimensions": cfg.dimensions,
	});
	let res = client
		.post(url)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.json(&body)
		.send()
		.await?;
	let json: Value = res.error_for_status()?.json().await?;
	let vectors = parse_embedding_response(json)?;

	if vectors.len() != texts.len() {
		return Err(Error::invalid_response(format!(
			"Embedding provider returned {} vectors for {} inputs.",
			vectors.len(),
			texts.len()
		)));
	}
	if let Some(vec) = vectors.iter().find(|vec| vec.len() != cfg.dimensions as usize) {
		return Err(Error::invalid_response(format!(
			"Embedding vector has {} dimensions, expected {}.",
			vec.len(),
			cfg.dimensions
		)));
	}

	tracing::debug!(count = vectors.len(), model = %cfg.model, "Embedded texts.");

	Ok(vectors)
}

fn parse_embedding_response(json: Value) -> Result<Vec<Vec<f32>>> {
	let data = json
		.get("data")
		.and_then(|v| v.as_array())
		.ok_or_else(|| Error::invalid_response("Embedding response is missing data array."))?;
	let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());

	for (fallback_index, item) in data.iter().enumerate() {
		let index = item
			.get("index")
			.and_then(|v| v.as_u64())
			.map(|v| v as usize)
			.unwrap_or(fallback_index);
		let embedding = item
			.get("embedding")
			.and_then(|v| v.as_array())
			.ok_or_else(|| Error::invalid_response("Embedding item missing embedding array."))?;
		let vec = embedding
			.iter()
			.map(|value| {
				value
					.as_f64()
					.map(|number| number as f32)
					.ok_or_else(|| Error::invalid_response("Embedding value must be numeric."))
			})
			.collect::<Result<Vec<f32>>>()?;

		indexed.push((index, vec));
	}

	indexed.sort_by_key(|(index, _)| *index);

	Ok(indexed.into_iter().map(|(_, vec)| vec).collect())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_embeddings_in_index_order() {
		let json = serde_json::json!({
			"data": [
				{ "index": 1, "embedding": [2.0, 3.0] },
				{ "index": 0, "embedding": [0.5, 1.5] }
			]
		});
		let parsed = parse_embedding_response(json).expect("parse failed");

		assert_eq!(parsed, vec![vec![0.5, 1.5], vec![2.0, 3.0]]);
	}

	#[test]
	fn rejects_non_numeric_components() {
		let json = serde_json::json!({ "data": [{ "index": 0, "embedding": ["x"] }] });

		assert!(matches!(parse_embedding_response(json), Err(Error::InvalidResponse { .. })));
	}
}
