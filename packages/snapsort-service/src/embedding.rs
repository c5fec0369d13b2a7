//! Text composition, vector similarity and the embedding engine that keeps image vectors current.

use std::{
	cmp::Ordering,
	collections::HashSet,
	sync::Arc,
	time::Duration,
};

use tokio::{sync::Semaphore, task::JoinSet};

use crate::{
	EmbeddingProvider, Error, ImageStore, Result,
	cache::{self, Cache, CacheKind, CacheLimits},
};
use snapsort_config::{Config, EmbeddingProviderConfig};
use snapsort_domain::ImageRecord;

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityHit {
	pub image_id: String,
	pub similarity: f32,
}

/// Builds the text an image is embedded from: its descriptive text, or the filename when it has
/// none.
pub fn compose_image_text(
	image: &ImageRecord,
	min_label_confidence: f32,
	max_labels: usize,
) -> Option<String> {
	if let Some(text) = descriptive_text(image, min_label_confidence, max_labels) {
		return Some(text);
	}

	let name = image.display_name().trim();

	if name.is_empty() { None } else { Some(name.to_string()) }
}

/// Title, description, caption, visual summary, tags, then the most confident detected-object and
/// scene labels, joined in that order.
pub fn descriptive_text(
	image: &ImageRecord,
	min_label_confidence: f32,
	max_labels: usize,
) -> Option<String> {
	let mut parts: Vec<String> = Vec::new();

	for field in [&image.title, &image.description, &image.caption, &image.visual_summary] {
		if let Some(value) = field.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
			parts.push(value.to_string());
		}
	}

	let tags: Vec<&str> =
		image.tags.iter().map(|tag| tag.trim()).filter(|tag| !tag.is_empty()).collect();

	if !tags.is_empty() {
		parts.push(tags.join(", "));
	}

	if let Some(metadata) = &image.metadata {
		let labels = metadata.confident_labels(min_label_confidence, max_labels);

		if !labels.is_empty() {
			parts.push(labels.join(", "));
		}
	}

	if parts.is_empty() { None } else { Some(parts.join(". ")) }
}

/// Cosine similarity in `[-1, 1]`. Vectors of different lengths are a contract violation; a zero
/// vector is similar to nothing.
pub fn cosine_similarity(lhs: &[f32], rhs: &[f32]) -> Result<f32> {
	if lhs.len() != rhs.len() {
		return Err(Error::invalid_request(format!(
			"Vector length mismatch: {} vs {}.",
			lhs.len(),
			rhs.len()
		)));
	}

	let mut dot = 0.0_f32;
	let mut lhs_norm = 0.0_f32;
	let mut rhs_norm = 0.0_f32;

	for (l, r) in lhs.iter().zip(rhs.iter()) {
		dot += l * r;
		lhs_norm += l * l;
		rhs_norm += r * r;
	}

	if lhs_norm <= f32::EPSILON || rhs_norm <= f32::EPSILON {
		return Ok(0.0);
	}

	Ok((dot / (lhs_norm.sqrt() * rhs_norm.sqrt())).clamp(-1.0, 1.0))
}

/// Top `top_k` images whose similarity to `query` is strictly above `threshold`, best first. Ties
/// keep input order. Images without a vector and ids in `exclude` are skipped.
pub fn similarity_search(
	query: &[f32],
	images: &[ImageRecord],
	top_k: usize,
	threshold: f32,
	exclude: &HashSet<&str>,
) -> Result<Vec<SimilarityHit>> {
	let mut hits = Vec::new();

	for image in images {
		if exclude.contains(image.id.as_str()) {
			continue;
		}

		let Some(vector) = image.embedding.as_deref() else { continue };
		let similarity = cosine_similarity(query, vector)?;

		if similarity > threshold {
			hits.push(SimilarityHit { image_id: image.id.clone(), similarity });
		}
	}

	hits.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(Ordering::Equal));
	hits.truncate(top_k);

	Ok(hits)
}

/// Mean cosine similarity over all unordered pairs. Fewer than two vectors score 1.0.
pub fn diversity_score(vectors: &[&[f32]]) -> Result<f32> {
	if vectors.len() < 2 {
		return Ok(1.0);
	}

	let mut total = 0.0_f32;
	let mut pairs = 0_u32;

	for (i, lhs) in vectors.iter().enumerate() {
		for rhs in &vectors[i + 1..] {
			total += cosine_similarity(lhs, rhs)?;
			pairs += 1;
		}
	}

	Ok(total / pairs as f32)
}

pub struct EmbeddingEngine {
	provider_cfg: Arc<EmbeddingProviderConfig>,
	provider: Arc<dyn EmbeddingProvider>,
	images: Arc<dyn ImageStore>,
	query_cache: Arc<Cache<Arc<Vec<f32>>>>,
	query_ttl: Duration,
	min_label_confidence: f32,
	max_labels: usize,
	pub(crate) similarity_threshold: f32,
}
impl EmbeddingEngine {
	pub fn new(cfg: &Config, provider: Arc<dyn EmbeddingProvider>, images: Arc<dyn ImageStore>) -> Self {
		let query_ttl = Duration::from_secs(cfg.embedding.query_cache_ttl_secs);
		let dims = cfg.providers.embedding.dimensions as usize;
		let max_entries = cfg.embedding.query_cache_max_entries as usize;
		let limits = CacheLimits {
			max_entries,
			max_bytes: max_entries.max(1) * (dims * size_of::<f32>() + 256),
			default_ttl: query_ttl,
		};

		Self {
			provider_cfg: Arc::new(cfg.providers.embedding.clone()),
			provider,
			images,
			query_cache: Arc::new(Cache::new(CacheKind::QueryEmbedding, limits)),
			query_ttl,
			min_label_confidence: cfg.embedding.min_label_confidence,
			max_labels: cfg.embedding.max_labels as usize,
			similarity_threshold: cfg.embedding.similarity_threshold,
		}
	}

	pub fn query_cache(&self) -> &Arc<Cache<Arc<Vec<f32>>>> {
		&self.query_cache
	}

	pub fn image_text(&self, image: &ImageRecord) -> Option<String> {
		compose_image_text(image, self.min_label_confidence, self.max_labels)
	}

	/// Whether the image can take part in similarity ranking on more than its filename.
	pub fn is_embeddable(&self, image: &ImageRecord) -> bool {
		image.embedding.is_some()
			|| descriptive_text(image, self.min_label_confidence, self.max_labels).is_some()
	}

	/// Embeds a query, reusing a cached vector for the same normalized text.
	pub async fn embed_query(&self, query: &str) -> Result<Arc<Vec<f32>>> {
		let cfg = &self.provider_cfg;
		let key = match cache::build_embedding_cache_key(query, &cfg.provider_id, &cfg.model, cfg.dimensions)
		{
			Ok(key) => Some(key),
			Err(err) => {
				tracing::warn!(
					error = %err,
					cache_kind = CacheKind::QueryEmbedding.as_str(),
					"Cache key build failed."
				);

				None
			},
		};

		if let Some(key) = &key
			&& let Some(vector) = self.query_cache.get(key)
		{
			tracing::debug!(
				cache_kind = CacheKind::QueryEmbedding.as_str(),
				cache_key_prefix = cache::cache_key_prefix(key),
				hit = true,
				"Cache hit."
			);

			return Ok(vector);
		}

		let text = snapsort_domain::text::normalize_query(query);
		let mut vectors = self.embed_texts(&[text]).await?;
		let vector = Arc::new(
			vectors.pop().ok_or_else(|| Error::Provider { message: "No query vector returned.".to_string() })?,
		);

		if let Some(key) = key {
			self.query_cache.set(key, vector.clone(), Some(self.query_ttl));
		}

		Ok(vector)
	}

	/// Embeds `texts`, in input order.
	///
	/// Batching providers get one call per `batch_size` chunk. Otherwise texts go out one per call
	/// with at most `max_concurrency` calls in flight.
	pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		if texts.is_empty() {
			return Ok(Vec::new());
		}

		let batch_size = self.provider_cfg.batch_size as usize;

		if self.provider.supports_batch() && batch_size > 0 {
			let mut out = Vec::with_capacity(texts.len());

			for chunk in texts.chunks(batch_size) {
				let vectors = self.provider.embed(&self.provider_cfg, chunk).await?;

				if vectors.len() != chunk.len() {
					return Err(Error::Provider {
						message: format!(
							"Embedding provider returned {} vectors for {} texts.",
							vectors.len(),
							chunk.len()
						),
					});
				}

				out.extend(vectors);
			}

			return Ok(out);
		}

		self.embed_individually(texts).await
	}

	async fn embed_individually(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
		let permits = Arc::new(Semaphore::new(self.provider_cfg.max_concurrency.max(1) as usize));
		let mut tasks = JoinSet::new();

		for (index, text) in texts.iter().enumerate() {
			let permits = permits.clone();
			let provider = self.provider.clone();
			let cfg = self.provider_cfg.clone();
			let input = vec![text.clone()];

			tasks.spawn(async move {
				let _permit = permits
					.acquire_owned()
					.await
					.map_err(|_| Error::Provider { message: "Embedding pool closed.".to_string() })?;
				let mut vectors = provider.embed(&cfg, &input).await?;
				let vector = vectors.pop().ok_or_else(|| Error::Provider {
					message: "Embedding provider returned no vector.".to_string(),
				})?;

				Ok::<_, Error>((index, vector))
			});
		}

		let mut slots: Vec<Option<Vec<f32>>> = vec![None; texts.len()];

		while let Some(joined) = tasks.join_next().await {
			let (index, vector) = joined??;

			slots[index] = Some(vector);
		}

		slots
			.into_iter()
			.map(|slot| {
				slot.ok_or_else(|| Error::Provider { message: "Missing embedding result.".to_string() })
			})
			.collect()
	}

	/// Fills in missing image vectors and writes them back to the image store.
	///
	/// Images without any embeddable text are left alone. Write-back failures are logged and do
	/// not fail the call. Returns how many vectors were generated.
	pub async fn ensure_image_embeddings(
		&self,
		images: &mut [ImageRecord],
		owner_id: &str,
	) -> Result<usize> {
		let mut pending: Vec<(usize, String)> = Vec::new();

		for (index, image) in images.iter().enumerate() {
			if image.embedding.is_some() {
				continue;
			}
			if let Some(text) = self.image_text(image) {
				pending.push((index, text));
			}
		}

		if pending.is_empty() {
			return Ok(0);
		}

		let texts: Vec<String> = pending.iter().map(|(_, text)| text.clone()).collect();
		let vectors = self.embed_texts(&texts).await?;

		for ((index, _), vector) in pending.iter().zip(vectors) {
			let image = &mut images[*index];

			if let Err(err) = self.images.update_embedding(&image.id, &vector, owner_id).await {
				tracing::warn!(error = %err, image_id = %image.id, "Embedding write-back failed.");
			}

			image.embedding = Some(vector);
		}

		tracing::info!(generated = pending.len(), "Generated image embeddings.");

		Ok(pending.len())
	}
}
