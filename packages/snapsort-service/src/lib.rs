pub mod aggregate;
pub mod atlas;
pub mod cache;
pub mod dispatch;
pub mod embedding;
pub mod ranking;
pub mod store;

mod error;

pub use aggregate::{AggregatedContent, AggregationMetadata, ContentAggregator};
pub use atlas::{Atlas, AtlasFinding, AtlasPacker, AtlasPosition, PixelBounds};
pub use cache::{Cache, CacheKind, CacheStats, SizeEstimate};
pub use dispatch::{
	CallRateLimiter, CircuitBreaker, Dispatcher, QueryAnalysis, SortHandle, SortProgress, SortStage,
	VisionBudget, VisionReservation,
};
pub use embedding::EmbeddingEngine;
pub use error::{Error, Result};
pub use ranking::{RankCandidate, RankingWeights};
pub use snapsort_providers::vision::{VisionFinding, VisionRequest};
pub use store::{ImageStore, MemoryImageStore};

use std::{future::Future, pin::Pin, sync::Arc};

use serde_json::Value;

use snapsort_config::{
	EmbeddingProviderConfig, LlmProviderConfig, ObjectStoreConfig, VisionProviderConfig,
};
use snapsort_providers::{classifier, embedding as embedding_api, object_store, vision};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub trait EmbeddingProvider
where
	Self: Send + Sync,
{
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>>;

	/// Whether one call may carry many texts. When false the engine sends one text per call.
	fn supports_batch(&self) -> bool {
		true
	}
}

pub trait ClassifierProvider
where
	Self: Send + Sync,
{
	fn classify<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, Result<Value>>;
}

pub trait VisionProvider
where
	Self: Send + Sync,
{
	fn analyze<'a>(
		&'a self,
		cfg: &'a VisionProviderConfig,
		req: &'a VisionRequest,
	) -> BoxFuture<'a, Result<Vec<VisionFinding>>>;
}

pub trait ObjectStore
where
	Self: Send + Sync,
{
	fn upload<'a>(
		&'a self,
		cfg: &'a ObjectStoreConfig,
		name: &'a str,
		bytes: Vec<u8>,
		content_type: &'a str,
	) -> BoxFuture<'a, Result<String>>;

	fn delete<'a>(&'a self, cfg: &'a ObjectStoreConfig, name: &'a str) -> BoxFuture<'a, Result<()>>;

	fn download<'a>(
		&'a self,
		cfg: &'a ObjectStoreConfig,
		location: &'a str,
	) -> BoxFuture<'a, Result<Vec<u8>>>;
}

#[derive(Clone)]
pub struct Providers {
	pub embedding: Arc<dyn EmbeddingProvider>,
	pub classifier: Arc<dyn ClassifierProvider>,
	pub vision: Arc<dyn VisionProvider>,
	pub object_store: Arc<dyn ObjectStore>,
}
impl Providers {
	pub fn new(
		embedding: Arc<dyn EmbeddingProvider>,
		classifier: Arc<dyn ClassifierProvider>,
		vision: Arc<dyn VisionProvider>,
		object_store: Arc<dyn ObjectStore>,
	) -> Self {
		Self { embedding, classifier, vision, object_store }
	}
}
impl Default for Providers {
	fn default() -> Self {
		let provider = Arc::new(DefaultProviders);

		Self {
			embedding: provider.clone(),
			classifier: provider.clone(),
			vision: provider.clone(),
			object_store: provider,
		}
	}
}

/// HTTP-backed providers built from the `[providers]` config section.
struct DefaultProviders;

impl EmbeddingProvider for DefaultProviders {
	fn embed<'a>(
		&'a self,
		cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		Box::pin(async move { Ok(embedding_api::embed(cfg, texts).await?) })
	}
}

impl ClassifierProvider for DefaultProviders {
	fn classify<'a>(
		&'a self,
		cfg: &'a LlmProviderConfig,
		messages: &'a [Value],
	) -> BoxFuture<'a, Result<Value>> {
		Box::pin(async move { Ok(classifier::classify(cfg, messages).await?) })
	}
}

impl VisionProvider for DefaultProviders {
	fn analyze<'a>(
		&'a self,
		cfg: &'a VisionProviderConfig,
		req: &'a VisionRequest,
	) -> BoxFuture<'a, Result<Vec<VisionFinding>>> {
		Box::pin(async move { Ok(vision::analyze(cfg, req).await?) })
	}
}

impl ObjectStore for DefaultProviders {
	fn upload<'a>(
		&'a self,
		cfg: &'a ObjectStoreConfig,
		name: &'a str,
		bytes: Vec<u8>,
		content_type: &'a str,
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move { Ok(object_store::upload(cfg, name, bytes, content_type).await?) })
	}

	fn delete<'a>(&'a self, cfg: &'a ObjectStoreConfig, name: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move { Ok(object_store::delete(cfg, name).await?) })
	}

	fn download<'a>(
		&'a self,
		cfg: &'a ObjectStoreConfig,
		location: &'a str,
	) -> BoxFuture<'a, Result<Vec<u8>>> {
		Box::pin(async move { Ok(object_store::download(cfg, location).await?) })
	}
}
