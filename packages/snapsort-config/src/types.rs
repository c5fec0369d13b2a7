use serde::Deserialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
	pub service: Service,
	pub providers: Providers,
	#[serde(default)]
	pub cache: Cache,
	#[serde(default)]
	pub atlas: Atlas,
	#[serde(default)]
	pub embedding: Embedding,
	#[serde(default)]
	pub dispatch: Dispatch,
	#[serde(default)]
	pub ranking: Ranking,
	#[serde(default)]
	pub aggregation: Aggregation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Service {
	pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Providers {
	pub embedding: EmbeddingProviderConfig,
	pub classifier: LlmProviderConfig,
	pub vision: VisionProviderConfig,
	pub object_store: ObjectStoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	/// Either a literal key or `env:NAME` to read it from the environment at load time.
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub dimensions: u32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
	/// Texts per batched request. Zero disables batching and embeds one text per call.
	#[serde(default = "default_embedding_batch_size")]
	pub batch_size: u32,
	/// Upper bound on in-flight single-text calls when batching is unavailable.
	#[serde(default = "default_embedding_max_concurrency")]
	pub max_concurrency: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VisionProviderConfig {
	pub provider_id: String,
	pub api_base: String,
	pub api_key: String,
	pub path: String,
	pub model: String,
	pub temperature: f32,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
	/// Cost charged against the caller's budget for every visual-analysis call.
	#[serde(default = "default_vision_cost_per_call")]
	pub cost_per_call: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
	pub api_base: String,
	pub api_key: String,
	pub bucket: String,
	/// Base URL under which uploaded objects are publicly readable.
	pub public_base: String,
	pub timeout_ms: u64,
	#[serde(default)]
	pub default_headers: Map<String, Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Cache {
	pub max_entries: u32,
	pub max_bytes: u64,
	pub sweep_interval_secs: u64,
	pub result_ttl_secs: u64,
	/// Results are only written back when their confidence is strictly above this value.
	pub min_confidence: f32,
}
impl Default for Cache {
	fn default() -> Self {
		Self {
			max_entries: 1_000,
			max_bytes: 64 * 1_024 * 1_024,
			sweep_interval_secs: 60,
			result_ttl_secs: 3_600,
			min_confidence: 0.7,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Atlas {
	pub grid_size: u32,
	pub cell_px: u32,
	pub ttl_secs: u64,
	pub max_entries: u32,
	pub max_bytes: u64,
}
impl Default for Atlas {
	fn default() -> Self {
		Self {
			grid_size: 3,
			cell_px: 512,
			ttl_secs: 3_600,
			max_entries: 64,
			max_bytes: 256 * 1_024 * 1_024,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Embedding {
	pub similarity_threshold: f32,
	pub query_cache_ttl_secs: u64,
	pub query_cache_max_entries: u32,
	/// Detected-object and scene labels below this confidence are not used as embedding text.
	pub min_label_confidence: f32,
	pub max_labels: u32,
}
impl Default for Embedding {
	fn default() -> Self {
		Self {
			similarity_threshold: 0.5,
			query_cache_ttl_secs: 3_600,
			query_cache_max_entries: 512,
			min_label_confidence: 0.5,
			max_labels: 5,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Dispatch {
	pub max_visual_images: u32,
	pub metadata_min_images: u32,
	pub metadata_coverage: f32,
	pub hybrid_min_images: u32,
	pub hybrid_max_images: u32,
	pub hybrid_sample_size: u32,
	pub max_vision_calls: u32,
	pub vision_concurrency: u32,
	pub max_processing_time_ms: u64,
	pub default_max_results: u32,
	pub fallback_confidence: f32,
	pub classifier: DispatchClassifier,
	pub breaker: DispatchBreaker,
	pub rate_limit: DispatchRateLimit,
}
impl Default for Dispatch {
	fn default() -> Self {
		Self {
			max_visual_images: 50,
			metadata_min_images: 20,
			metadata_coverage: 0.5,
			hybrid_min_images: 10,
			hybrid_max_images: 100,
			hybrid_sample_size: 18,
			max_vision_calls: 6,
			vision_concurrency: 3,
			max_processing_time_ms: 30_000,
			default_max_results: 100,
			fallback_confidence: 0.1,
			classifier: DispatchClassifier::default(),
			breaker: DispatchBreaker::default(),
			rate_limit: DispatchRateLimit::default(),
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchClassifier {
	pub use_model: bool,
	/// The model is consulted only when rule-based confidence falls below this value.
	pub model_threshold: f32,
	pub fallback_confidence: f32,
}
impl Default for DispatchClassifier {
	fn default() -> Self {
		Self { use_model: false, model_threshold: 0.6, fallback_confidence: 0.5 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchBreaker {
	pub failure_threshold: u32,
	pub cooldown_ms: u64,
}
impl Default for DispatchBreaker {
	fn default() -> Self {
		Self { failure_threshold: 5, cooldown_ms: 30_000 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchRateLimit {
	/// Zero disables the limiter.
	pub max_vision_calls_per_minute: u32,
}
impl Default for DispatchRateLimit {
	fn default() -> Self {
		Self { max_vision_calls_per_minute: 60 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Ranking {
	pub weights: RankingWeights,
	pub recency_tau_days: f32,
	pub popularity_half_saturation: f32,
}
impl Default for Ranking {
	fn default() -> Self {
		Self {
			weights: RankingWeights::default(),
			recency_tau_days: 365.0,
			popularity_half_saturation: 10.0,
		}
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RankingWeights {
	pub relevance: f32,
	pub quality: f32,
	pub recency: f32,
	pub popularity: f32,
	pub personalization: f32,
}
impl Default for RankingWeights {
	fn default() -> Self {
		Self { relevance: 0.6, quality: 0.2, recency: 0.1, popularity: 0.05, personalization: 0.05 }
	}
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Aggregation {
	pub conflict_penalty: f32,
	pub multi_source_bonus: f32,
}
impl Default for Aggregation {
	fn default() -> Self {
		Self { conflict_penalty: 0.1, multi_source_bonus: 0.1 }
	}
}

fn default_embedding_batch_size() -> u32 {
	64
}

fn default_embedding_max_concurrency() -> u32 {
	4
}

fn default_vision_cost_per_call() -> f64 {
	1.0
}
