mod error;
mod types;

pub use error::{Error, Result};
pub use types::{
	Aggregation, Atlas, Cache, Config, Dispatch, DispatchBreaker, DispatchClassifier,
	DispatchRateLimit, Embedding, EmbeddingProviderConfig, LlmProviderConfig, ObjectStoreConfig,
	Providers, Ranking, RankingWeights, Service, VisionProviderConfig,
};

use std::{env, fs, path::Path};

const ENV_PREFIX: &str = "env:";
const MAX_GRID_SIZE: u32 = 3;

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;
	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg)?;

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.trim().is_empty() {
		return Err(Error::validation("service.log_level", "must be non-empty."));
	}

	validate_providers(cfg)?;
	validate_cache(cfg)?;
	validate_atlas(cfg)?;
	validate_dispatch(cfg)?;
	validate_ranking(cfg)?;

	let embedding = &cfg.embedding;

	if !(-1.0..=1.0).contains(&embedding.similarity_threshold) {
		return Err(Error::validation(
			"embedding.similarity_threshold",
			"must be in the range -1.0-1.0.",
		));
	}
	if embedding.query_cache_ttl_secs == 0 {
		return Err(Error::validation("embedding.query_cache_ttl_secs", "must be greater than zero."));
	}

	for (key, value) in [
		("aggregation.conflict_penalty", cfg.aggregation.conflict_penalty),
		("aggregation.multi_source_bonus", cfg.aggregation.multi_source_bonus),
	] {
		if !value.is_finite() || !(0.0..=1.0).contains(&value) {
			return Err(Error::validation(key, "must be a finite number in the range 0.0-1.0."));
		}
	}

	Ok(())
}

fn validate_providers(cfg: &Config) -> Result<()> {
	let providers = &cfg.providers;

	if providers.embedding.dimensions == 0 {
		return Err(Error::validation(
			"providers.embedding.dimensions",
			"must be greater than zero.",
		));
	}
	if providers.embedding.max_concurrency == 0 {
		return Err(Error::validation(
			"providers.embedding.max_concurrency",
			"must be greater than zero.",
		));
	}
	if !providers.vision.cost_per_call.is_finite() || providers.vision.cost_per_call < 0.0 {
		return Err(Error::validation(
			"providers.vision.cost_per_call",
			"must be a finite number, zero or greater.",
		));
	}

	for (key, value) in [
		("providers.embedding.api_key", &providers.embedding.api_key),
		("providers.classifier.api_key", &providers.classifier.api_key),
		("providers.vision.api_key", &providers.vision.api_key),
		("providers.object_store.api_key", &providers.object_store.api_key),
		("providers.object_store.bucket", &providers.object_store.bucket),
	] {
		if value.trim().is_empty() {
			return Err(Error::validation(key, "must be non-empty."));
		}
	}

	for (key, value) in [
		("providers.embedding.timeout_ms", providers.embedding.timeout_ms),
		("providers.classifier.timeout_ms", providers.classifier.timeout_ms),
		("providers.vision.timeout_ms", providers.vision.timeout_ms),
		("providers.object_store.timeout_ms", providers.object_store.timeout_ms),
	] {
		if value == 0 {
			return Err(Error::validation(key, "must be greater than zero."));
		}
	}

	Ok(())
}

fn validate_cache(cfg: &Config) -> Result<()> {
	let cache = &cfg.cache;

	if cache.max_entries == 0 {
		return Err(Error::validation("cache.max_entries", "must be greater than zero."));
	}
	if cache.max_bytes == 0 {
		return Err(Error::validation("cache.max_bytes", "must be greater than zero."));
	}
	if cache.sweep_interval_secs == 0 {
		return Err(Error::validation("cache.sweep_interval_secs", "must be greater than zero."));
	}
	if cache.result_ttl_secs == 0 {
		return Err(Error::validation("cache.result_ttl_secs", "must be greater than zero."));
	}
	if !(0.0..=1.0).contains(&cache.min_confidence) {
		return Err(Error::validation("cache.min_confidence", "must be in the range 0.0-1.0."));
	}

	Ok(())
}

fn validate_atlas(cfg: &Config) -> Result<()> {
	let atlas = &cfg.atlas;

	if atlas.grid_size == 0 || atlas.grid_size > MAX_GRID_SIZE {
		return Err(Error::validation(
			"atlas.grid_size",
			format!("must be between 1 and {MAX_GRID_SIZE}."),
		));
	}
	if atlas.cell_px < 32 || atlas.cell_px > 2_048 {
		return Err(Error::validation("atlas.cell_px", "must be between 32 and 2048."));
	}
	if atlas.ttl_secs == 0 {
		return Err(Error::validation("atlas.ttl_secs", "must be greater than zero."));
	}
	if atlas.max_entries == 0 || atlas.max_bytes == 0 {
		return Err(Error::validation(
			"atlas.max_entries",
			"and atlas.max_bytes must be greater than zero.",
		));
	}

	Ok(())
}

fn validate_dispatch(cfg: &Config) -> Result<()> {
	let dispatch = &cfg.dispatch;

	if dispatch.hybrid_min_images > dispatch.hybrid_max_images {
		return Err(Error::validation(
			"dispatch.hybrid_min_images",
			"must be less than or equal to dispatch.hybrid_max_images.",
		));
	}
	if dispatch.hybrid_sample_size == 0 {
		return Err(Error::validation("dispatch.hybrid_sample_size", "must be greater than zero."));
	}
	if dispatch.vision_concurrency == 0 {
		return Err(Error::validation("dispatch.vision_concurrency", "must be greater than zero."));
	}
	if dispatch.max_processing_time_ms == 0 {
		return Err(Error::validation(
			"dispatch.max_processing_time_ms",
			"must be greater than zero.",
		));
	}
	if dispatch.default_max_results == 0 {
		return Err(Error::validation("dispatch.default_max_results", "must be greater than zero."));
	}
	if dispatch.breaker.failure_threshold == 0 {
		return Err(Error::validation(
			"dispatch.breaker.failure_threshold",
			"must be greater than zero.",
		));
	}

	for (key, value) in [
		("dispatch.metadata_coverage", dispatch.metadata_coverage),
		("dispatch.fallback_confidence", dispatch.fallback_confidence),
		("dispatch.classifier.model_threshold", dispatch.classifier.model_threshold),
		("dispatch.classifier.fallback_confidence", dispatch.classifier.fallback_confidence),
	] {
		if !value.is_finite() || !(0.0..=1.0).contains(&value) {
			return Err(Error::validation(key, "must be a finite number in the range 0.0-1.0."));
		}
	}

	Ok(())
}

fn validate_ranking(cfg: &Config) -> Result<()> {
	let weights = &cfg.ranking.weights;

	for (key, value) in [
		("ranking.weights.relevance", weights.relevance),
		("ranking.weights.quality", weights.quality),
		("ranking.weights.recency", weights.recency),
		("ranking.weights.popularity", weights.popularity),
		("ranking.weights.personalization", weights.personalization),
	] {
		if !value.is_finite() {
			return Err(Error::validation(key, "must be a finite number."));
		}
		if value < 0.0 {
			return Err(Error::validation(key, "must be zero or greater."));
		}
	}

	if !cfg.ranking.recency_tau_days.is_finite() || cfg.ranking.recency_tau_days <= 0.0 {
		return Err(Error::validation("ranking.recency_tau_days", "must be greater than zero."));
	}
	if !cfg.ranking.popularity_half_saturation.is_finite()
		|| cfg.ranking.popularity_half_saturation <= 0.0
	{
		return Err(Error::validation(
			"ranking.popularity_half_saturation",
			"must be greater than zero.",
		));
	}

	Ok(())
}

fn normalize(cfg: &mut Config) -> Result<()> {
	cfg.service.log_level = cfg.service.log_level.trim().to_string();

	let providers = &mut cfg.providers;

	for (key, value) in [
		("providers.embedding.api_key", &mut providers.embedding.api_key),
		("providers.classifier.api_key", &mut providers.classifier.api_key),
		("providers.vision.api_key", &mut providers.vision.api_key),
		("providers.object_store.api_key", &mut providers.object_store.api_key),
	] {
		resolve_env(key, value)?;
	}

	for base in [
		&mut providers.embedding.api_base,
		&mut providers.classifier.api_base,
		&mut providers.vision.api_base,
		&mut providers.object_store.api_base,
		&mut providers.object_store.public_base,
	] {
		let trimmed = base.trim().trim_end_matches('/').to_string();

		*base = trimmed;
	}

	Ok(())
}

fn resolve_env(key: &str, value: &mut String) -> Result<()> {
	let Some(var) = value.trim().strip_prefix(ENV_PREFIX) else { return Ok(()) };
	let var = var.trim().to_string();
	let resolved = env::var(&var)
		.map_err(|_| Error::MissingEnv { key: key.to_string(), var: var.clone() })?;

	*value = resolved;

	Ok(())
}
