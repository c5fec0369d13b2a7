use std::{
	sync::{
		Arc,
		atomic::{AtomicUsize, Ordering},
	},
	time::Duration,
};

use serde_json::{Map, Value};

use snapsort_config::{
	Aggregation, Atlas, Cache, Config, Dispatch, Embedding, EmbeddingProviderConfig,
	LlmProviderConfig, ObjectStoreConfig, Ranking, Service, VisionProviderConfig,
};
use snapsort_domain::{
	ExecutionStrategy, ImageFilters, ImageRecord, SortOptions, SortRequest, SortResponse,
};
use snapsort_service::{
	BoxFuture, ClassifierProvider, Dispatcher, EmbeddingProvider, Error, ImageStore,
	MemoryImageStore, ObjectStore, Providers, Result, SortStage, VisionFinding, VisionProvider,
	VisionRequest,
};

const OWNER: &str = "owner-1";

/// Points texts mentioning "beach" one way and everything else another.
struct KeywordEmbedding {
	calls: Arc<AtomicUsize>,
	delay: Option<Duration>,
}
impl KeywordEmbedding {
	fn new() -> Self {
		Self { calls: Arc::new(AtomicUsize::new(0)), delay: None }
	}
}
impl EmbeddingProvider for KeywordEmbedding {
	fn embed<'a>(
		&'a self,
		_cfg: &'a EmbeddingProviderConfig,
		texts: &'a [String],
	) -> BoxFuture<'a, Result<Vec<Vec<f32>>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		Box::pin(async move {
			if let Some(delay) = self.delay {
				tokio::time::sleep(delay).await;
			}

			Ok(texts
				.iter()
				.map(|text| {
					if text.to_lowercase().contains("beach") {
						vec![1.0, 0.0, 0.0, 0.0]
					} else {
						vec![0.0, 1.0, 0.0, 0.0]
					}
				})
				.collect())
		})
	}
}

struct OfflineClassifier;
impl ClassifierProvider for OfflineClassifier {
	fn classify<'a>(
		&'a self,
		_cfg: &'a LlmProviderConfig,
		_messages: &'a [Value],
	) -> BoxFuture<'a, Result<Value>> {
		Box::pin(async { Err(Error::Provider { message: "offline".to_string() }) })
	}
}

#[derive(Clone, Copy)]
enum VisionMode {
	Answer,
	Fail,
	Hang,
}

/// Scores positions in grid order: the first label 0.9, each next one 0.05 lower.
struct ScriptedVision {
	mode: VisionMode,
	calls: Arc<AtomicUsize>,
}
impl ScriptedVision {
	fn new(mode: VisionMode) -> Self {
		Self { mode, calls: Arc::new(AtomicUsize::new(0)) }
	}
}
impl VisionProvider for ScriptedVision {
	fn analyze<'a>(
		&'a self,
		_cfg: &'a VisionProviderConfig,
		req: &'a VisionRequest,
	) -> BoxFuture<'a, Result<Vec<VisionFinding>>> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		let mode = self.mode;

		Box::pin(async move {
			match mode {
				VisionMode::Fail => Err(Error::Provider { message: "vision backend down".to_string() }),
				VisionMode::Hang => std::future::pending().await,
				VisionMode::Answer => Ok(req
					.labels
					.iter()
					.enumerate()
					.map(|(index, label)| VisionFinding {
						position: label.clone(),
						description: format!("tile {label}"),
						tags: vec!["sunset".to_string()],
						suitability_score: 0.9 - 0.05 * index as f32,
						reasoning: format!("Warm sky in {label}."),
						flagged: false,
					})
					.collect()),
			}
		})
	}
}

/// Uploads succeed, downloads fail so atlases are drawn from placeholders.
struct NullObjectStore;
impl ObjectStore for NullObjectStore {
	fn upload<'a>(
		&'a self,
		_cfg: &'a ObjectStoreConfig,
		name: &'a str,
		_bytes: Vec<u8>,
		_content_type: &'a str,
	) -> BoxFuture<'a, Result<String>> {
		Box::pin(async move { Ok(format!("https://cdn.test/{name}")) })
	}

	fn delete<'a>(&'a self, _cfg: &'a ObjectStoreConfig, _name: &'a str) -> BoxFuture<'a, Result<()>> {
		Box::pin(async { Ok(()) })
	}

	fn download<'a>(
		&'a self,
		_cfg: &'a ObjectStoreConfig,
		location: &'a str,
	) -> BoxFuture<'a, Result<Vec<u8>>> {
		Box::pin(async move { Err(Error::Provider { message: format!("{location} unavailable") }) })
	}
}

fn test_config() -> Config {
	Config {
		service: Service { log_level: "info".to_string() },
		providers: snapsort_config::Providers {
			embedding: EmbeddingProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/embeddings".to_string(),
				model: "test-embedding".to_string(),
				dimensions: 4,
				timeout_ms: 1_000,
				default_headers: Map::new(),
				batch_size: 16,
				max_concurrency: 2,
			},
			classifier: LlmProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/chat/completions".to_string(),
				model: "test-classifier".to_string(),
				temperature: 0.0,
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
			vision: VisionProviderConfig {
				provider_id: "test".to_string(),
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				path: "/chat/completions".to_string(),
				model: "test-vision".to_string(),
				temperature: 0.0,
				timeout_ms: 1_000,
				default_headers: Map::new(),
				cost_per_call: 1.0,
			},
			object_store: ObjectStoreConfig {
				api_base: "http://127.0.0.1:1".to_string(),
				api_key: "test-key".to_string(),
				bucket: "atlases".to_string(),
				public_base: "https://cdn.test".to_string(),
				timeout_ms: 1_000,
				default_headers: Map::new(),
			},
		},
		cache: Cache::default(),
		atlas: Atlas { cell_px: 16, ..Atlas::default() },
		embedding: Embedding::default(),
		dispatch: Dispatch::default(),
		ranking: Ranking::default(),
		aggregation: Aggregation::default(),
	}
}

fn build(vision: ScriptedVision, embedding: KeywordEmbedding, images: Vec<ImageRecord>) -> (Arc<Dispatcher>, Arc<MemoryImageStore>) {
	let store = Arc::new(MemoryImageStore::new(images));
	let providers = Providers::new(
		Arc::new(embedding),
		Arc::new(OfflineClassifier),
		Arc::new(vision),
		Arc::new(NullObjectStore),
	);
	let dispatcher = Dispatcher::new(test_config(), providers, store.clone() as Arc<dyn ImageStore>);

	(Arc::new(dispatcher), store)
}

fn bare_images(count: usize) -> Vec<ImageRecord> {
	(0..count)
		.map(|index| ImageRecord::new(format!("img-{index}"), OWNER, format!("s3://photos/IMG_{index:04}.jpg")))
		.collect()
}

fn described_images(count: usize) -> Vec<ImageRecord> {
	bare_images(count)
		.into_iter()
		.enumerate()
		.map(|(index, mut image)| {
			image.description = Some(if index % 2 == 0 {
				format!("Evening at the beach, shot {index}")
			} else {
				format!("Kitchen table, shot {index}")
			});

			image
		})
		.collect()
}

fn request(query: &str, images: Vec<ImageRecord>, options: SortOptions) -> SortRequest {
	SortRequest { query: query.to_string(), owner_id: OWNER.to_string(), images, options }
}

fn ids(response: &SortResponse) -> Vec<&str> {
	response.results.iter().map(|item| item.image.id.as_str()).collect()
}

fn positions(response: &SortResponse) -> Vec<u32> {
	response.results.iter().map(|item| item.position).collect()
}

fn visual_options() -> SortOptions {
	SortOptions { use_visual_analysis: true, ..Default::default() }
}

#[tokio::test]
async fn visual_query_on_small_set_uses_atlases() {
	let vision = ScriptedVision::new(VisionMode::Answer);
	let vision_calls = vision.calls.clone();
	let (dispatcher, store) = build(vision, KeywordEmbedding::new(), bare_images(10));
	let response = dispatcher
		.sort(request("colorful sunset photos", bare_images(10), visual_options()), None)
		.await
		.expect("Sort failed.");

	assert_eq!(response.method_used, ExecutionStrategy::Visual);
	assert_eq!(vision_calls.load(Ordering::SeqCst), 2);
	assert_eq!(response.vision_calls, 2);
	assert_eq!(response.cost_incurred, 2.0);
	assert!(!response.cached);
	assert_eq!(positions(&response), (1..=10).collect::<Vec<u32>>());
	// A1 of both atlases ties; input order breaks the tie.
	assert_eq!(
		ids(&response),
		vec![
			"img-0", "img-9", "img-1", "img-2", "img-3", "img-4", "img-5", "img-6", "img-7", "img-8"
		]
	);
	assert!((response.confidence - 0.9).abs() < 1e-5);
	assert_eq!(response.results[0].metadata.sources, vec!["vision".to_string()]);

	let written = store.snapshot();

	assert!(written.iter().all(|image| image.visual_summary.as_deref().is_some_and(|s| s.starts_with("tile "))));
	assert!(written.iter().all(|image| image.tags.iter().any(|tag| tag == "sunset")));
}

#[tokio::test]
async fn repeated_request_is_served_from_cache() {
	let vision = ScriptedVision::new(VisionMode::Answer);
	let vision_calls = vision.calls.clone();
	let (dispatcher, _) = build(vision, KeywordEmbedding::new(), bare_images(10));
	let first = dispatcher
		.sort(request("colorful sunset photos", bare_images(10), visual_options()), None)
		.await
		.expect("First sort failed.");
	let second = dispatcher
		.sort(request("Colorful  sunset photos", bare_images(10), visual_options()), None)
		.await
		.expect("Second sort failed.");

	assert!(!first.cached);
	assert!(second.cached);
	assert_ne!(first.request_id, second.request_id);
	assert_eq!(ids(&first), ids(&second));
	assert_eq!(second.vision_calls, 0);
	assert_eq!(vision_calls.load(Ordering::SeqCst), 2);
	assert_eq!(dispatcher.result_cache().stats().hits, 1);
}

#[tokio::test]
async fn failing_vision_degrades_to_hybrid_metadata() {
	let (dispatcher, _) =
		build(ScriptedVision::new(VisionMode::Fail), KeywordEmbedding::new(), described_images(10));
	let response = dispatcher
		.sort(request("colorful beach sunset", described_images(10), visual_options()), None)
		.await
		.expect("Sort failed.");

	assert_eq!(response.method_used, ExecutionStrategy::Hybrid);
	assert_eq!(response.results.len(), 10);
	assert!(response.warnings.iter().any(|warning| warning.contains("The visual strategy failed")));
	assert!(response.warnings.iter().any(|warning| warning.contains("Visual sample failed")));
	// Failed calls still count against the budget.
	assert_eq!(response.vision_calls, 4);
	assert!(dispatcher.result_cache().is_empty());

	// Metadata text overlap puts the beach shots first.
	let top: Vec<&str> = ids(&response).into_iter().take(5).collect();

	assert!(top.iter().all(|id| {
		let index: usize = id.trim_start_matches("img-").parse().expect("index");

		index % 2 == 0
	}));
}

#[tokio::test]
async fn cost_limit_stops_scheduling_more_atlases() {
	let vision = ScriptedVision::new(VisionMode::Answer);
	let vision_calls = vision.calls.clone();
	let (dispatcher, _) = build(vision, KeywordEmbedding::new(), bare_images(10));
	let options = SortOptions { max_cost: Some(1.0), ..visual_options() };
	let response = dispatcher
		.sort(request("colorful sunset photos", bare_images(10), options), None)
		.await
		.expect("Sort failed.");

	assert_eq!(response.method_used, ExecutionStrategy::Visual);
	assert_eq!(vision_calls.load(Ordering::SeqCst), 1);
	assert_eq!(response.vision_calls, 1);
	assert_eq!(response.cost_incurred, 1.0);
	assert_eq!(response.results.len(), 10);
	assert_eq!(response.results.last().map(|item| item.image.id.as_str()), Some("img-9"));
	assert!(response.warnings.iter().any(|warning| warning.contains("budget exhausted")));
	// Partial results are never cached.
	assert!(dispatcher.result_cache().is_empty());
}

#[tokio::test]
async fn empty_remaining_budget_disables_vision() {
	let vision = ScriptedVision::new(VisionMode::Answer);
	let vision_calls = vision.calls.clone();
	let (dispatcher, _) = build(vision, KeywordEmbedding::new(), described_images(6));
	let response = dispatcher
		.sort(request("colorful beach sunset", described_images(6), visual_options()), Some(0.0))
		.await
		.expect("Sort failed.");

	assert_eq!(vision_calls.load(Ordering::SeqCst), 0);
	assert_eq!(response.method_used, ExecutionStrategy::Embedding);
	assert_eq!(response.cost_incurred, 0.0);
	assert!(response.warnings.iter().any(|warning| warning.contains("not available")));
}

#[tokio::test]
async fn embedding_strategy_ranks_semantic_matches_first() {
	let embedding = KeywordEmbedding::new();
	let embedding_calls = embedding.calls.clone();
	let (dispatcher, store) =
		build(ScriptedVision::new(VisionMode::Answer), embedding, described_images(6));
	let response = dispatcher
		.sort(request("beach day", described_images(6), SortOptions::default()), None)
		.await
		.expect("Sort failed.");

	assert_eq!(response.method_used, ExecutionStrategy::Embedding);
	assert_eq!(ids(&response)[..3], ["img-0", "img-2", "img-4"]);
	assert_eq!(positions(&response), vec![1, 2, 3, 4, 5, 6]);
	// One batch for the images, one for the query.
	assert_eq!(embedding_calls.load(Ordering::SeqCst), 2);
	assert!(store.snapshot().iter().all(|image| image.embedding.is_some()));
}

#[tokio::test(start_paused = true)]
async fn slow_embeddings_fall_back_to_metadata() {
	let embedding =
		KeywordEmbedding { calls: Arc::new(AtomicUsize::new(0)), delay: Some(Duration::from_secs(10)) };
	let (dispatcher, _) =
		build(ScriptedVision::new(VisionMode::Answer), embedding, described_images(4));
	let options = SortOptions { max_processing_time_ms: Some(1_000), ..Default::default() };
	let response = dispatcher
		.sort(request("beach day", described_images(4), options), None)
		.await
		.expect("Sort failed.");

	assert_eq!(response.method_used, ExecutionStrategy::Metadata);
	assert!(response.warnings.iter().any(|warning| warning.contains("The embedding strategy failed")));
	assert_eq!(ids(&response)[..2], ["img-0", "img-2"]);
}

#[tokio::test]
async fn no_signal_keeps_input_order() {
	let (dispatcher, _) =
		build(ScriptedVision::new(VisionMode::Answer), KeywordEmbedding::new(), bare_images(5));
	let response = dispatcher
		.sort(request("something", bare_images(5), SortOptions::default()), None)
		.await
		.expect("Sort failed.");

	assert_eq!(response.method_used, ExecutionStrategy::Fallback);
	assert_eq!(ids(&response), vec!["img-0", "img-1", "img-2", "img-3", "img-4"]);
	assert!((response.confidence - 0.1).abs() < 1e-6);
	assert!(dispatcher.result_cache().is_empty());
}

#[tokio::test]
async fn max_results_truncates_with_dense_positions() {
	let (dispatcher, _) =
		build(ScriptedVision::new(VisionMode::Answer), KeywordEmbedding::new(), bare_images(5));
	let options = SortOptions { max_results: Some(2), ..Default::default() };
	let response = dispatcher
		.sort(request("something", bare_images(5), options), None)
		.await
		.expect("Sort failed.");

	assert_eq!(ids(&response), vec!["img-0", "img-1"]);
	assert_eq!(positions(&response), vec![1, 2]);
}

#[tokio::test]
async fn foreign_and_flagged_images_are_dropped() {
	let mut images = bare_images(3);
	let mut foreign = ImageRecord::new("foreign", "owner-2", "s3://photos/other.jpg");
	let mut flagged = ImageRecord::new("flagged", OWNER, "s3://photos/flagged.jpg");

	foreign.description = Some("Someone else's beach".to_string());
	flagged.flagged = true;
	images.push(foreign);
	images.push(flagged);

	let (dispatcher, _) =
		build(ScriptedVision::new(VisionMode::Answer), KeywordEmbedding::new(), Vec::new());
	let options = SortOptions { exclude_flagged: true, ..Default::default() };
	let response = dispatcher.sort(request("something", images, options), None).await.expect("Sort failed.");

	assert_eq!(ids(&response), vec!["img-0", "img-1", "img-2"]);
	assert!(response.warnings.iter().any(|warning| warning.contains("owned by someone else")));
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
	let (dispatcher, _) =
		build(ScriptedVision::new(VisionMode::Answer), KeywordEmbedding::new(), Vec::new());
	let mut missing_owner = request("sunset", bare_images(1), SortOptions::default());

	missing_owner.owner_id = " ".to_string();

	let err = dispatcher.sort(missing_owner, None).await.expect_err("Expected owner error.");

	assert!(matches!(err, Error::InvalidRequest { .. }), "Unexpected error: {err}");

	let options = SortOptions { min_confidence: Some(1.5), ..Default::default() };
	let err = dispatcher
		.sort(request("sunset", bare_images(1), options), None)
		.await
		.expect_err("Expected confidence error.");

	assert!(matches!(err, Error::InvalidRequest { .. }), "Unexpected error: {err}");

	let err = dispatcher
		.sort(request("sunset", bare_images(1), SortOptions::default()), Some(-1.0))
		.await
		.expect_err("Expected budget error.");

	assert!(matches!(err, Error::InvalidRequest { .. }), "Unexpected error: {err}");
}

#[tokio::test]
async fn owner_images_are_loaded_from_the_store() {
	let mut images = described_images(4);

	images.push(ImageRecord::new("foreign", "owner-2", "s3://photos/other.jpg"));

	let (dispatcher, _) =
		build(ScriptedVision::new(VisionMode::Answer), KeywordEmbedding::new(), images);
	let response = dispatcher
		.sort_owner_images("beach", OWNER, &ImageFilters::default(), SortOptions::default(), None)
		.await
		.expect("Sort failed.");

	assert_eq!(response.results.len(), 4);
	assert!(response.results.iter().all(|item| item.image.owner_id == OWNER));

	let picked = vec!["img-3".to_string(), "foreign".to_string(), "img-1".to_string()];
	let response = dispatcher
		.sort_image_ids("kitchen", OWNER, &picked, SortOptions::default(), None)
		.await
		.expect("Sort failed.");

	assert_eq!(response.results.len(), 2);
}

#[tokio::test]
async fn spawned_sort_can_be_cancelled() {
	let (dispatcher, _) =
		build(ScriptedVision::new(VisionMode::Hang), KeywordEmbedding::new(), bare_images(4));
	let mut handle =
		dispatcher.spawn_sort(request("colorful sunset photos", bare_images(4), visual_options()), None);
	let progress = handle.subscribe();

	handle.cancel();

	let err = handle.join().await.expect_err("Expected cancellation.");

	assert!(matches!(err, Error::Cancelled), "Unexpected error: {err}");
	assert_eq!(progress.borrow().stage, SortStage::Cancelled);
}

#[tokio::test]
async fn spawned_sort_reports_completion() {
	let (dispatcher, _) =
		build(ScriptedVision::new(VisionMode::Answer), KeywordEmbedding::new(), bare_images(3));
	let handle = dispatcher.spawn_sort(request("something", bare_images(3), SortOptions::default()), None);
	let progress = handle.subscribe();
	let response = handle.join().await.expect("Sort failed.");

	assert_eq!(response.results.len(), 3);
	assert!(progress.borrow().is_terminal());
	assert_eq!(progress.borrow().stage, SortStage::Done);
}

#[tokio::test(start_paused = true)]
async fn visual_deadline_bills_only_calls_that_reached_the_provider() {
	let vision = ScriptedVision::new(VisionMode::Hang);
	let vision_calls = vision.calls.clone();
	let (dispatcher, _) = build(vision, KeywordEmbedding::new(), described_images(10));
	let options = SortOptions { max_processing_time_ms: Some(1_000), ..visual_options() };
	let response = dispatcher
		.sort(request("colorful beach sunset", described_images(10), options), None)
		.await
		.expect("Sort failed.");

	assert_eq!(response.method_used, ExecutionStrategy::Hybrid);
	assert_eq!(response.vision_calls as usize, vision_calls.load(Ordering::SeqCst));
	assert_eq!(response.cost_incurred, f64::from(response.vision_calls));
	// The hybrid pass starts after the deadline and must not schedule anything.
	assert!(
		response
			.warnings
			.iter()
			.any(|warning| warning.contains("before visual analysis could start"))
	);
	assert_eq!(response.results.len(), 10);
}

#[tokio::test]
async fn images_beyond_the_vision_quota_are_ranked_from_metadata() {
	let (dispatcher, _) =
		build(ScriptedVision::new(VisionMode::Answer), KeywordEmbedding::new(), described_images(20));
	let options = SortOptions { max_vision_calls: Some(1), ..visual_options() };
	let response = dispatcher
		.sort(request("colorful beach sunset", described_images(20), options), None)
		.await
		.expect("Sort failed.");
	let position_of = |id: String| {
		response
			.results
			.iter()
			.find(|item| item.image.id == id)
			.map(|item| item.position)
			.expect("Image missing from results.")
	};

	assert_eq!(response.method_used, ExecutionStrategy::Visual);
	assert_eq!(response.vision_calls, 1);
	assert!(response.warnings.iter().any(|warning| warning.contains("ranked from metadata")));

	for beach in (10..20).step_by(2) {
		for kitchen in (9..20).step_by(2) {
			assert!(position_of(format!("img-{beach}")) < position_of(format!("img-{kitchen}")));
		}
	}

	let unanalyzed = response
		.results
		.iter()
		.find(|item| item.image.id == "img-10")
		.expect("Image missing from results.");

	assert!(!unanalyzed.reasoning.contains("No signal"));
}

#[tokio::test]
async fn vectors_of_another_dimension_do_not_demote_matches() {
	let mut images = described_images(4);

	images[0].embedding = Some(vec![1.0, 0.0, 0.0, 0.0]);
	images[1].embedding = Some(vec![0.0, 1.0, 0.0, 0.0]);
	images[2].embedding = Some(vec![1.0, 0.0, 0.0, 0.0]);
	images[3].embedding = Some(vec![1.0, 0.0]);

	let embedding = KeywordEmbedding::new();
	let embedding_calls = embedding.calls.clone();
	let (dispatcher, _) = build(ScriptedVision::new(VisionMode::Answer), embedding, images.clone());
	let response = dispatcher
		.sort(request("beach day", images, SortOptions::default()), None)
		.await
		.expect("Sort failed.");

	assert_eq!(response.method_used, ExecutionStrategy::Embedding);
	// Only the query needed a vector.
	assert_eq!(embedding_calls.load(Ordering::SeqCst), 1);
	assert_eq!(ids(&response)[..2], ["img-0", "img-2"]);
	assert!(response.results[..2].iter().all(|item| item.metadata.factors.relevance == 1.0));
	assert!(response.warnings.iter().any(|warning| warning.contains("different dimension")));

	// img-0 and img-2 point the same way, img-1 is orthogonal to both; img-3 is not comparable.
	let diversity = response.diversity.expect("Expected a diversity score.");

	assert!((diversity - 1.0 / 3.0).abs() < 1e-6);
}

#[tokio::test]
async fn packed_atlases_are_reused_until_invalidated() {
	let (dispatcher, _) =
		build(ScriptedVision::new(VisionMode::Answer), KeywordEmbedding::new(), Vec::new());
	let packer = dispatcher.atlas_packer();
	let images = bare_images(4);
	let reversed: Vec<ImageRecord> = images.iter().rev().cloned().collect();
	let first = packer.pack(&images, "sort").await.expect("Pack failed.");
	let same_set = packer.pack(&reversed, "sort").await.expect("Pack failed.");

	assert!(Arc::ptr_eq(&first, &same_set));
	assert_eq!(packer.cache().stats().hits, 1);

	let other_purpose = packer.pack(&images, "preview").await.expect("Pack failed.");

	assert!(!Arc::ptr_eq(&first, &other_purpose));
	assert!(packer.invalidate(&["img-3", "img-1", "img-2", "img-0"], "sort"));
	assert!(!packer.invalidate(&["img-0", "img-1", "img-2", "img-3"], "sort"));

	let rebuilt = packer.pack(&images, "sort").await.expect("Pack failed.");

	assert!(!Arc::ptr_eq(&first, &rebuilt));
	assert!(packer.cache().peek(&rebuilt.key).is_some());
}
