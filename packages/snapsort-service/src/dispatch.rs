//! Strategy dispatch: picks an execution path per request, runs it under the request's time and
//! cost budget, degrades on failure and assembles the ranked response.

pub mod classify;
pub mod guards;
pub mod progress;
pub mod select;

mod execute;

pub use classify::{ClassificationSource, QueryAnalysis};
pub use guards::{CallRateLimiter, CircuitBreaker, VisionBudget, VisionReservation};
pub use progress::{ProgressReporter, SortHandle, SortProgress, SortStage};
pub use select::SelectionInput;

use std::{collections::HashMap, sync::Arc, time::Duration};

use time::OffsetDateTime;
use tokio::{sync::oneshot, task::JoinHandle, time::Instant};
use uuid::Uuid;

use crate::{
	AtlasPacker, ContentAggregator, Error, ImageStore, Providers, Result,
	cache::{self, Cache, CacheKind, CacheLimits},
	embedding::{self, EmbeddingEngine},
	ranking::{self, RankCandidate, RankingWeights},
};
use execute::{ExecContext, StrategyOutput};
use snapsort_config::Config;
use snapsort_domain::{
	AnalysisUpdate, ContentSource, ExecutionStrategy, FactorScores, ImageFilters, ImageRecord,
	RankedResult, ResultMetadata, SortOptions, SortRequest, SortResponse, SortResultItem, SourcePayload,
	UserContext,
};

pub struct Dispatcher {
	pub(crate) cfg: Arc<Config>,
	pub(crate) providers: Providers,
	pub(crate) images: Arc<dyn ImageStore>,
	pub(crate) engine: Arc<EmbeddingEngine>,
	pub(crate) atlas: Arc<AtlasPacker>,
	pub(crate) aggregator: ContentAggregator,
	pub(crate) results: Arc<Cache<Arc<SortResponse>>>,
	pub(crate) breaker: Arc<CircuitBreaker>,
	pub(crate) limiter: Arc<CallRateLimiter>,
}
impl Dispatcher {
	pub fn new(cfg: Config, providers: Providers, images: Arc<dyn ImageStore>) -> Self {
		let breaker = Arc::new(CircuitBreaker::new(&cfg.dispatch.breaker));
		let limiter = Arc::new(CallRateLimiter::new(&cfg.dispatch.rate_limit));

		Self::with_guards(cfg, providers, images, breaker, limiter)
	}

	/// Shares an existing breaker and limiter, e.g. between dispatchers talking to the same
	/// vision backend.
	pub fn with_guards(
		cfg: Config,
		providers: Providers,
		images: Arc<dyn ImageStore>,
		breaker: Arc<CircuitBreaker>,
		limiter: Arc<CallRateLimiter>,
	) -> Self {
		let engine = Arc::new(EmbeddingEngine::new(&cfg, providers.embedding.clone(), images.clone()));
		let atlas = Arc::new(AtlasPacker::new(
			&cfg,
			providers.object_store.clone(),
			providers.vision.clone(),
		));
		let results = Arc::new(Cache::new(
			CacheKind::SortResult,
			CacheLimits {
				max_entries: cfg.cache.max_entries as usize,
				max_bytes: cfg.cache.max_bytes as usize,
				default_ttl: Duration::from_secs(cfg.cache.result_ttl_secs),
			},
		));

		Self {
			aggregator: ContentAggregator::new(&cfg.aggregation),
			cfg: Arc::new(cfg),
			providers,
			images,
			engine,
			atlas,
			results,
			breaker,
			limiter,
		}
	}

	pub fn config(&self) -> &Config {
		&self.cfg
	}

	pub fn result_cache(&self) -> &Arc<Cache<Arc<SortResponse>>> {
		&self.results
	}

	pub fn atlas_packer(&self) -> &Arc<AtlasPacker> {
		&self.atlas
	}

	pub fn embedding_engine(&self) -> &Arc<EmbeddingEngine> {
		&self.engine
	}

	pub fn breaker(&self) -> &Arc<CircuitBreaker> {
		&self.breaker
	}

	/// Starts the background expiry sweep for every cache the dispatcher owns. Needs a running
	/// Tokio runtime.
	pub fn spawn_sweepers(&self) -> Vec<JoinHandle<()>> {
		let interval = Duration::from_secs(self.cfg.cache.sweep_interval_secs.max(1));

		vec![
			Cache::spawn_sweeper(&self.results, interval),
			Cache::spawn_sweeper(self.engine.query_cache(), interval),
			Cache::spawn_sweeper(self.atlas.cache(), interval),
		]
	}

	/// Sorts `req.images` for `req.query`. `remaining_budget` is the caller's remaining cost
	/// allowance; `None` means unlimited.
	pub async fn sort(&self, req: SortRequest, remaining_budget: Option<f64>) -> Result<SortResponse> {
		self.sort_with_progress(req, remaining_budget, &ProgressReporter::detached()).await
	}

	/// Runs `sort` in the background and returns a handle for progress and cancellation.
	pub fn spawn_sort(self: &Arc<Self>, req: SortRequest, remaining_budget: Option<f64>) -> SortHandle {
		let (reporter, progress) = ProgressReporter::channel();
		let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
		let dispatcher = self.clone();
		let task = tokio::spawn(async move {
			tokio::select! {
				result = dispatcher.sort_with_progress(req, remaining_budget, &reporter) => result,
				// A dropped handle is not a cancellation.
				Ok(()) = &mut cancel_rx => {
					tracing::info!("Sort cancelled.");
					reporter.stage(SortStage::Cancelled);

					Err(Error::Cancelled)
				},
			}
		});

		SortHandle { progress, cancel: Some(cancel_tx), task }
	}

	/// Loads the owner's images through the image store, then sorts them.
	pub async fn sort_owner_images(
		&self,
		query: &str,
		owner_id: &str,
		filters: &ImageFilters,
		options: SortOptions,
		remaining_budget: Option<f64>,
	) -> Result<SortResponse> {
		let images = self.images.get_by_owner(owner_id, filters).await?;
		let req = SortRequest {
			query: query.to_string(),
			owner_id: owner_id.to_string(),
			images,
			options,
		};

		self.sort(req, remaining_budget).await
	}

	/// Loads the given images through the image store, then sorts them. Unknown ids are skipped.
	pub async fn sort_image_ids(
		&self,
		query: &str,
		owner_id: &str,
		image_ids: &[String],
		options: SortOptions,
		remaining_budget: Option<f64>,
	) -> Result<SortResponse> {
		let images = self.images.get_by_ids(image_ids, owner_id).await?;
		let req = SortRequest {
			query: query.to_string(),
			owner_id: owner_id.to_string(),
			images,
			options,
		};

		self.sort(req, remaining_budget).await
	}

	async fn sort_with_progress(
		&self,
		req: SortRequest,
		remaining_budget: Option<f64>,
		reporter: &ProgressReporter,
	) -> Result<SortResponse> {
		let result = self.run(req, remaining_budget, reporter).await;

		match &result {
			Ok(_) => reporter.stage(SortStage::Done),
			Err(err) => {
				tracing::warn!(error = %err, "Sort failed.");
				reporter.stage(SortStage::Failed);
			},
		}

		result
	}

	async fn run(
		&self,
		req: SortRequest,
		remaining_budget: Option<f64>,
		reporter: &ProgressReporter,
	) -> Result<SortResponse> {
		let started = Instant::now();
		let request_id = Uuid::new_v4().to_string();

		validate_request(&req, remaining_budget)?;

		let SortRequest { query, owner_id, images, options } = req;
		let mut warnings = Vec::new();
		let images = self.scope_images(images, &owner_id, &options, &mut warnings);

		reporter.stage(SortStage::CheckingCache);

		let cache_key = self.sort_cache_key(&query, &owner_id, &options, &images);

		if let Some(key) = &cache_key {
			if let Some(hit) = self.results.get(key) {
				tracing::info!(
					cache_kind = CacheKind::SortResult.as_str(),
					cache_key_prefix = cache::cache_key_prefix(key),
					hit = true,
					"Cache hit."
				);

				let mut response = hit.as_ref().clone();

				response.request_id = request_id;
				response.cached = true;
				response.processing_time_ms = elapsed_ms(started);
				response.cost_incurred = 0.0;
				response.vision_calls = 0;

				return Ok(response);
			}

			tracing::info!(
				cache_kind = CacheKind::SortResult.as_str(),
				cache_key_prefix = cache::cache_key_prefix(key),
				hit = false,
				"Cache miss."
			);
		}

		let deadline = started
			+ Duration::from_millis(
				options.max_processing_time_ms.unwrap_or(self.cfg.dispatch.max_processing_time_ms),
			);

		reporter.stage(SortStage::Classifying);

		let analysis = match tokio::time::timeout_at(
			deadline,
			classify::analyze_query(&query, &self.cfg, self.providers.classifier.as_ref()),
		)
		.await
		{
			Ok(analysis) => analysis,
			Err(_) => {
				warnings.push("Query classification timed out; using keyword rules.".to_string());

				classify::classify_rules(&query)
			},
		};
		let max_calls = options
			.max_vision_calls
			.map(|calls| calls.min(self.cfg.dispatch.max_vision_calls))
			.unwrap_or(self.cfg.dispatch.max_vision_calls);
		let max_cost = match (options.max_cost, remaining_budget) {
			(Some(lhs), Some(rhs)) => Some(lhs.min(rhs)),
			(lhs, rhs) => lhs.or(rhs),
		};
		let budget =
			Arc::new(VisionBudget::new(max_calls, max_cost, self.cfg.providers.vision.cost_per_call));
		let selection = self.selection_input(&images, &options, &analysis, &budget);
		let mut strategy = select::select_strategy(&selection, &self.cfg.dispatch);

		tracing::info!(
			strategy = strategy.as_str(),
			sort_type = analysis.sort_type.as_str(),
			classifier_confidence = analysis.confidence,
			image_count = images.len(),
			"Strategy selected."
		);

		if options.use_visual_analysis && !selection.vision_allowed {
			warnings.push("Visual analysis was requested but is not available for this request.".to_string());
		}

		let ctx = ExecContext {
			query: &query,
			owner_id: &owner_id,
			analysis: &analysis,
			budget: &budget,
			deadline,
			reporter,
			now: OffsetDateTime::now_utc(),
		};
		let output = loop {
			reporter.stage(SortStage::Executing(strategy));

			let attempt = match strategy {
				ExecutionStrategy::Visual => self.run_visual(&images, &ctx).await,
				ExecutionStrategy::Hybrid => self.run_hybrid(&images, &ctx).await,
				ExecutionStrategy::Embedding => self.run_embedding(&images, &ctx).await,
				ExecutionStrategy::Metadata => Ok(self.run_metadata(&images, &ctx)),
				ExecutionStrategy::Fallback => Ok(StrategyOutput::default()),
			};
			let next = strategy.degrade().unwrap_or(ExecutionStrategy::Fallback);

			match attempt {
				Ok(output) if output.has_signal() || strategy == ExecutionStrategy::Fallback => break output,
				Ok(output) => {
					tracing::info!(strategy = strategy.as_str(), next = next.as_str(), "Strategy produced no signal; degrading.");
					warnings.extend(output.warnings);
				},
				Err(err) if !err.is_recoverable() => return Err(err),
				Err(err) => {
					tracing::warn!(error = %err, strategy = strategy.as_str(), next = next.as_str(), "Strategy failed; degrading.");
					warnings.push(format!("The {strategy} strategy failed: {err}"));
				},
			}

			strategy = next;
		};

		reporter.stage(SortStage::Ranking);

		let (candidates, signal_confidence) =
			self.build_candidates(&images, &output, strategy, options.user_context.as_ref(), &ctx)?;
		let weights = if strategy == ExecutionStrategy::Fallback {
			RankingWeights::relevance_only()
		} else {
			RankingWeights::resolve(&self.cfg.ranking.weights, &options.sort_criteria)
		};
		let mut ranked = ranking::rank(candidates, &weights)?;
		let max_results = options
			.max_results
			.filter(|max| *max > 0)
			.unwrap_or(self.cfg.dispatch.default_max_results) as usize;

		ranked.truncate(max_results);

		let confidence = if strategy == ExecutionStrategy::Fallback {
			self.cfg.dispatch.fallback_confidence
		} else {
			signal_confidence
		};
		let below_minimum = options.min_confidence.map(|min| confidence < min).unwrap_or(false);

		warnings.extend(output.warnings.iter().cloned());

		if below_minimum {
			warnings.push(format!(
				"Result confidence {confidence:.2} is below the requested minimum."
			));
		}

		self.write_back_findings(&output, &owner_id).await;

		let diversity = result_diversity(&ranked);
		let mut metadata_by_id = self.result_metadata(&images, &output);
		let results = ranked
			.into_iter()
			.map(|ranked| {
				let mut metadata = metadata_by_id.remove(&ranked.image.id).unwrap_or_default();

				metadata.factors = ranked.breakdown;

				SortResultItem {
					image: ranked.image,
					sort_score: ranked.score,
					reasoning: ranked.reasoning,
					position: ranked.position,
					metadata,
				}
			})
			.collect();
		let response = SortResponse {
			request_id,
			results,
			processing_time_ms: elapsed_ms(started),
			confidence,
			method_used: strategy,
			sort_type: analysis.sort_type,
			cached: false,
			cost_incurred: budget.cost(),
			vision_calls: budget.calls(),
			diversity,
			warnings,
		};

		if let Some(key) = cache_key {
			self.store_result(key, &response, below_minimum || output.partial);
		}

		tracing::info!(
			strategy = strategy.as_str(),
			results = response.results.len(),
			confidence = response.confidence,
			vision_calls = response.vision_calls,
			processing_time_ms = response.processing_time_ms,
			"Sort completed."
		);

		Ok(response)
	}

	fn scope_images(
		&self,
		images: Vec<ImageRecord>,
		owner_id: &str,
		options: &SortOptions,
		warnings: &mut Vec<String>,
	) -> Vec<ImageRecord> {
		let total = images.len();
		let owned: Vec<ImageRecord> =
			images.into_iter().filter(|image| image.owner_id == owner_id).collect();

		if owned.len() < total {
			warnings.push(format!("Ignored {} images owned by someone else.", total - owned.len()));
		}

		if !options.exclude_flagged {
			return owned;
		}

		owned.into_iter().filter(|image| !image.flagged).collect()
	}

	fn sort_cache_key(
		&self,
		query: &str,
		owner_id: &str,
		options: &SortOptions,
		images: &[ImageRecord],
	) -> Option<String> {
		let mut hints = match serde_json::to_value(options) {
			Ok(hints) => hints,
			Err(err) => {
				tracing::warn!(error = %err, cache_kind = CacheKind::SortResult.as_str(), "Cache key build failed.");

				return None;
			},
		};

		// Time limits change how much work fits, not what is asked for.
		if let Some(map) = hints.as_object_mut() {
			map.remove("maxProcessingTimeMs");
		}

		let ids: Vec<&str> = images.iter().map(|image| image.id.as_str()).collect();

		match cache::build_sort_cache_key(query, owner_id, &hints, &ids) {
			Ok(key) => Some(key),
			Err(err) => {
				tracing::warn!(error = %err, cache_kind = CacheKind::SortResult.as_str(), "Cache key build failed.");

				None
			},
		}
	}

	fn selection_input(
		&self,
		images: &[ImageRecord],
		options: &SortOptions,
		analysis: &QueryAnalysis,
		budget: &VisionBudget,
	) -> SelectionInput {
		let with_metadata = images.iter().filter(|image| image.has_structured_metadata()).count();
		let metadata_coverage =
			if images.is_empty() { 0.0 } else { with_metadata as f32 / images.len() as f32 };

		SelectionInput {
			image_count: images.len(),
			vision_allowed: options.use_visual_analysis
				&& budget.can_afford_one()
				&& self.breaker.allow(),
			has_vision_terms: analysis.has_vision_terms(),
			metadata_coverage,
			any_embeddable: images.iter().any(|image| self.engine.is_embeddable(image)),
			any_metadata: with_metadata > 0,
		}
	}

	/// Factor scores per image plus the overall signal confidence: mean per-image confidence times
	/// the share of images that have any signal.
	fn build_candidates(
		&self,
		images: &[ImageRecord],
		output: &StrategyOutput,
		strategy: ExecutionStrategy,
		user_context: Option<&UserContext>,
		ctx: &ExecContext<'_>,
	) -> Result<(Vec<RankCandidate>, f32)> {
		let n = images.len();
		let mut candidates = Vec::with_capacity(n);
		let mut confidences = Vec::new();

		for (index, image) in images.iter().enumerate() {
			let sources = output.sources.get(&image.id).map(Vec::as_slice).unwrap_or_default();
			let (relevance, reasoning) = if strategy == ExecutionStrategy::Fallback {
				(1.0 - index as f32 / n as f32, "Original order kept.".to_string())
			} else {
				match self.summarize(sources)? {
					Some(summary) => {
						confidences.push(summary.confidence);

						(summary.relevance, summary.reasoning)
					},
					None => (0.0, "No signal for this image.".to_string()),
				}
			};
			let factors = FactorScores {
				relevance,
				quality: ranking::quality_score(image),
				recency: ranking::recency_score(
					image.captured_at(),
					ctx.now,
					self.cfg.ranking.recency_tau_days,
					ctx.analysis.time_order,
				),
				popularity: ranking::popularity_score(image, self.cfg.ranking.popularity_half_saturation),
				personalization: ranking::personalization_score(image, user_context),
			};

			candidates.push(RankCandidate { image: image.clone(), factors, reasoning });
		}

		let confidence = if confidences.is_empty() || n == 0 {
			0.0
		} else {
			let mean = confidences.iter().sum::<f32>() / confidences.len() as f32;

			mean * confidences.len() as f32 / n as f32
		};

		Ok((candidates, confidence.clamp(0.0, 1.0)))
	}

	fn summarize(&self, sources: &[ContentSource]) -> Result<Option<SignalSummary>> {
		match sources {
			[] => Ok(None),
			[single] => Ok(Some(SignalSummary {
				relevance: single.payload.relevance().unwrap_or(0.0),
				confidence: single.confidence(),
				reasoning: source_reasoning(single),
			})),
			many => {
				let merged = self.aggregator.aggregate(many)?;
				let relevance = merged.number("relevance").unwrap_or(0.0);
				let reasoning = merged
					.text("reasoning")
					.map(str::to_string)
					.unwrap_or_else(|| format!("Combined {} signals.", merged.sources.join(" + ")));

				Ok(Some(SignalSummary { relevance, confidence: merged.confidence, reasoning }))
			},
		}
	}

	fn result_metadata(
		&self,
		images: &[ImageRecord],
		output: &StrategyOutput,
	) -> HashMap<String, ResultMetadata> {
		images
			.iter()
			.filter_map(|image| {
				let sources = output.sources.get(&image.id)?;
				let metadata = match sources.as_slice() {
					[] => return None,
					[single] => {
						let (description, tags) = payload_details(&single.payload);

						ResultMetadata {
							sources: vec![single.tool.clone()],
							signal_confidence: Some(single.confidence()),
							description,
							tags,
							..Default::default()
						}
					},
					many => {
						let merged = self.aggregator.aggregate(many).ok()?;

						ResultMetadata {
							sources: merged.sources.clone(),
							signal_confidence: Some(merged.confidence),
							unresolved_conflicts: merged.unresolved_conflicts.clone(),
							description: merged.text("description").map(str::to_string),
							tags: merged.label_names("tags"),
							..Default::default()
						}
					},
				};

				Some((image.id.clone(), metadata))
			})
			.collect()
	}

	async fn write_back_findings(&self, output: &StrategyOutput, owner_id: &str) {
		for atlas_finding in &output.findings {
			let finding = &atlas_finding.finding;
			let update = AnalysisUpdate {
				visual_summary: Some(finding.description.clone()).filter(|d| !d.trim().is_empty()),
				tags: finding.tags.clone(),
				flagged: Some(finding.flagged),
			};

			if let Err(err) = self.images.update_analysis(&atlas_finding.image_id, &update, owner_id).await {
				tracing::warn!(error = %err, image_id = %atlas_finding.image_id, "Analysis write-back failed.");
			}
		}
	}

	fn store_result(&self, key: String, response: &SortResponse, skip: bool) {
		if skip || response.confidence <= self.cfg.cache.min_confidence {
			tracing::debug!(
				cache_kind = CacheKind::SortResult.as_str(),
				cache_key_prefix = cache::cache_key_prefix(&key),
				confidence = response.confidence,
				"Result not cached."
			);

			return;
		}

		let ttl = Duration::from_secs(self.cfg.cache.result_ttl_secs);

		if self.results.set(key.clone(), Arc::new(response.clone()), Some(ttl)) {
			tracing::info!(
				cache_kind = CacheKind::SortResult.as_str(),
				cache_key_prefix = cache::cache_key_prefix(&key),
				ttl_secs = self.cfg.cache.result_ttl_secs,
				"Cache stored."
			);
		}
	}
}

struct SignalSummary {
	relevance: f32,
	confidence: f32,
	reasoning: String,
}

fn validate_request(req: &SortRequest, remaining_budget: Option<f64>) -> Result<()> {
	if req.owner_id.trim().is_empty() {
		return Err(Error::invalid_request("ownerId must not be empty."));
	}
	if req.query.trim().is_empty() && req.images.is_empty() {
		return Err(Error::invalid_request("A query or at least one image is required."));
	}

	let options = &req.options;

	for (name, value) in [("maxCost", options.max_cost), ("remainingBudget", remaining_budget)] {
		if let Some(value) = value
			&& (!value.is_finite() || value < 0.0)
		{
			return Err(Error::invalid_request(format!("{name} must be a non-negative number.")));
		}
	}

	if let Some(min) = options.min_confidence
		&& !(0.0..=1.0).contains(&min)
	{
		return Err(Error::invalid_request("minConfidence must be between 0 and 1."));
	}
	if options.max_processing_time_ms == Some(0) {
		return Err(Error::invalid_request("maxProcessingTimeMs must be greater than zero."));
	}

	Ok(())
}

fn source_reasoning(source: &ContentSource) -> String {
	match &source.payload {
		SourcePayload::Visual(signal) => signal
			.reasoning
			.clone()
			.unwrap_or_else(|| format!("Visual suitability {:.2}.", signal.relevance)),
		SourcePayload::Embedding(signal) => format!("Semantic similarity {:.2}.", signal.similarity),
		SourcePayload::Metadata(signal) => {
			format!("Metadata match {:.2}.", signal.relevance.unwrap_or(0.0))
		},
	}
}

fn payload_details(payload: &SourcePayload) -> (Option<String>, Vec<String>) {
	match payload {
		SourcePayload::Visual(signal) => {
			(signal.description.clone(), signal.tags.iter().map(|tag| tag.name.clone()).collect())
		},
		SourcePayload::Metadata(signal) => {
			(signal.description.clone(), signal.tags.iter().map(|tag| tag.name.clone()).collect())
		},
		SourcePayload::Embedding(_) => (None, Vec::new()),
	}
}

/// Diversity over the returned images that carry a vector of the most common dimension.
fn result_diversity(ranked: &[RankedResult]) -> Option<f32> {
	let vectors: Vec<&[f32]> =
		ranked.iter().filter_map(|ranked| ranked.image.embedding.as_deref()).collect();
	let dimensions = vectors.first()?.len();
	let comparable: Vec<&[f32]> =
		vectors.into_iter().filter(|vector| vector.len() == dimensions).collect();

	match embedding::diversity_score(&comparable) {
		Ok(score) => Some(score),
		Err(err) => {
			tracing::debug!(error = %err, "Result diversity skipped.");

			None
		},
	}
}

fn elapsed_ms(started: Instant) -> u64 {
	started.elapsed().as_millis() as u64
}
