//! One executor per strategy. Each turns the image set into per-image content sources.

use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
};

use time::OffsetDateTime;
use tokio::{
	sync::Semaphore,
	task::JoinSet,
	time::{Instant, timeout_at},
};

use crate::{
	AtlasFinding, Error, Result,
	dispatch::{Dispatcher, QueryAnalysis, VisionBudget, progress::ProgressReporter},
	embedding, ranking,
};
use snapsort_domain::{
	ContentSource, EmbeddingSignal, ImageRecord, LabelItem, MetadataSignal, SortType,
	SourcePayload, VisualSignal, text,
};

pub(crate) const METADATA_TOOL: &str = "metadata";
pub(crate) const EMBEDDING_TOOL: &str = "embedding";
pub(crate) const VISION_TOOL: &str = "vision";

const STRUCTURED_METADATA_CONFIDENCE: f32 = 0.6;
const TEXT_ONLY_CONFIDENCE: f32 = 0.4;
const EMBEDDING_MATCH_CONFIDENCE: f32 = 0.7;
const EMBEDDING_WEAK_CONFIDENCE: f32 = 0.5;
const VISION_CONFIDENCE: f32 = 0.9;
const MAX_TEXT_TERMS: usize = 256;
const ATLAS_PURPOSE: &str = "sort";

/// Everything an executor needs to know about the request in flight.
pub(crate) struct ExecContext<'a> {
	pub(crate) query: &'a str,
	pub(crate) owner_id: &'a str,
	pub(crate) analysis: &'a QueryAnalysis,
	pub(crate) budget: &'a Arc<VisionBudget>,
	pub(crate) deadline: Instant,
	pub(crate) reporter: &'a ProgressReporter,
	pub(crate) now: OffsetDateTime,
}

#[derive(Debug, Default)]
pub(crate) struct StrategyOutput {
	pub(crate) sources: HashMap<String, Vec<ContentSource>>,
	pub(crate) findings: Vec<AtlasFinding>,
	pub(crate) warnings: Vec<String>,
	/// Some work was skipped or cut short by the time, cost or call budget.
	pub(crate) partial: bool,
}
impl StrategyOutput {
	pub(crate) fn has_signal(&self) -> bool {
		self.sources.values().any(|sources| !sources.is_empty())
	}

	fn has_tool(&self, image_id: &str, tool: &str) -> bool {
		self.sources
			.get(image_id)
			.map(|sources| sources.iter().any(|source| source.tool == tool))
			.unwrap_or(false)
	}

	fn push(&mut self, image_id: &str, source: ContentSource) {
		self.sources.entry(image_id.to_string()).or_default().push(source);
	}

	fn absorb(&mut self, other: StrategyOutput) {
		for (image_id, sources) in other.sources {
			self.sources.entry(image_id).or_default().extend(sources);
		}

		self.findings.extend(other.findings);
		self.warnings.extend(other.warnings);
		self.partial |= other.partial;
	}
}

impl Dispatcher {
	/// Scores images from stored metadata and text fields alone. Never calls out.
	pub(crate) fn run_metadata(&self, images: &[ImageRecord], ctx: &ExecContext<'_>) -> StrategyOutput {
		let mut output = StrategyOutput::default();
		let min_label = self.cfg.embedding.min_label_confidence;
		let max_labels = self.cfg.embedding.max_labels as usize;

		for image in images {
			let structured = image.has_structured_metadata();
			let descriptive = embedding::descriptive_text(image, min_label, max_labels);

			if !structured && descriptive.is_none() {
				continue;
			}

			let text_tokens = descriptive
				.as_deref()
				.map(|text_value| text::tokenize(text_value, MAX_TEXT_TERMS))
				.unwrap_or_default();
			let text_overlap = text::overlap_ratio(&ctx.analysis.terms, &text_tokens);
			let relevance = if structured {
				self.metadata_relevance(image, ctx, text_overlap)
			} else {
				text_overlap
			};
			let quality = image
				.metadata
				.as_ref()
				.and_then(|metadata| metadata.quality.as_ref())
				.and_then(|quality| quality.overall());
			let mut tags: Vec<LabelItem> = image.tags.iter().map(LabelItem::named).collect();

			if let Some(metadata) = &image.metadata {
				tags.extend(metadata.confident_labels(min_label, max_labels).into_iter().map(LabelItem::named));
			}

			let description = [&image.description, &image.caption, &image.visual_summary, &image.title]
				.into_iter()
				.find_map(|field| field.clone().filter(|value| !value.trim().is_empty()));
			let signal = MetadataSignal {
				relevance: Some(relevance),
				quality,
				description,
				tags,
				flagged: Some(image.flagged),
			};
			let confidence =
				if structured { STRUCTURED_METADATA_CONFIDENCE } else { TEXT_ONLY_CONFIDENCE };

			output.push(
				&image.id,
				ContentSource::new(METADATA_TOOL, SourcePayload::Metadata(signal), confidence, ctx.now),
			);
		}

		output
	}

	fn metadata_relevance(&self, image: &ImageRecord, ctx: &ExecContext<'_>, text_overlap: f32) -> f32 {
		let Some(metadata) = &image.metadata else { return text_overlap };
		let analysis = ctx.analysis;

		match analysis.sort_type {
			SortType::Quality | SortType::Aesthetic => metadata
				.quality
				.as_ref()
				.and_then(|quality| quality.overall())
				.map(|quality| quality.max(text_overlap))
				.unwrap_or(text_overlap),
			SortType::Chronological => ranking::recency_score(
				metadata.captured_at,
				ctx.now,
				self.cfg.ranking.recency_tau_days,
				analysis.time_order,
			),
			SortType::Color => {
				let colors = metadata
					.scenes
					.as_ref()
					.map(|scenes| scenes.dominant_colors.as_slice())
					.unwrap_or_default();

				if analysis.colors.is_empty() {
					// "colorful" and friends: more distinct dominant colors reads as more colorful.
					return (colors.len() as f32 / 5.0).min(1.0).max(text_overlap);
				}

				let matched = analysis
					.colors
					.iter()
					.filter(|wanted| {
						colors.iter().any(|color| color.to_lowercase().contains(wanted.as_str()))
					})
					.count();

				(matched as f32 / analysis.colors.len() as f32).max(text_overlap)
			},
			SortType::Location => {
				let place_tokens = metadata
					.location
					.as_ref()
					.and_then(|location| location.place_name.as_deref())
					.map(|place| text::tokenize(place, MAX_TEXT_TERMS))
					.unwrap_or_default();

				text::overlap_ratio(&analysis.terms, &place_tokens).max(text_overlap)
			},
			SortType::Scene | SortType::Subject | SortType::Custom => text_overlap,
		}
	}

	/// Ranks by cosine similarity between the query and image vectors, generating and writing back
	/// vectors for images that have none.
	pub(crate) async fn run_embedding(
		&self,
		images: &[ImageRecord],
		ctx: &ExecContext<'_>,
	) -> Result<StrategyOutput> {
		let mut output = StrategyOutput::default();
		let mut working: Vec<ImageRecord> = images.to_vec();

		match timeout_at(ctx.deadline, self.engine.ensure_image_embeddings(&mut working, ctx.owner_id))
			.await
		{
			Ok(Ok(_)) => {},
			Ok(Err(err)) => {
				if !err.is_recoverable() {
					return Err(err);
				}

				tracing::warn!(error = %err, "Image embedding failed; using stored vectors only.");
				output.warnings.push(format!("Some images could not be embedded: {err}"));
				output.partial = true;
			},
			Err(_) => {
				output.warnings.push("Processing time budget exhausted while embedding images.".to_string());
				output.partial = true;
			},
		}

		let query_vector = timeout_at(ctx.deadline, self.engine.embed_query(ctx.query))
			.await
			.map_err(|_| Error::Timeout { message: "query embedding".to_string() })??;
		// Vectors from another model or dimension setting cannot be compared with this query.
		let (comparable, stale): (Vec<ImageRecord>, Vec<ImageRecord>) =
			working.into_iter().partition(|image| {
				image.embedding.as_ref().map(|vector| vector.len() == query_vector.len()).unwrap_or(true)
			});

		if !stale.is_empty() {
			tracing::warn!(
				stale = stale.len(),
				dimensions = query_vector.len(),
				"Skipping image vectors with a different dimension."
			);
			output.warnings.push(format!(
				"{} images have vectors of a different dimension and were not compared.",
				stale.len()
			));
			output.partial = true;
		}

		let matched: HashSet<String> = embedding::similarity_search(
			&query_vector,
			&comparable,
			comparable.len(),
			self.engine.similarity_threshold,
			&HashSet::new(),
		)
		.unwrap_or_else(|err| {
			tracing::warn!(error = %err, "Similarity search skipped.");

			Vec::new()
		})
		.into_iter()
		.map(|hit| hit.image_id)
		.collect();

		for image in &comparable {
			let Some(vector) = image.embedding.as_deref() else { continue };
			let similarity = match embedding::cosine_similarity(&query_vector, vector) {
				Ok(similarity) => similarity,
				Err(err) => {
					tracing::warn!(error = %err, image_id = %image.id, "Skipping image vector.");

					continue;
				},
			};
			let is_match = matched.contains(&image.id);
			// Below-threshold images keep an order among themselves but trail every match.
			let relevance = if is_match { similarity } else { similarity.max(0.0) * 0.5 };
			let confidence = if is_match { EMBEDDING_MATCH_CONFIDENCE } else { EMBEDDING_WEAK_CONFIDENCE };

			output.push(
				&image.id,
				ContentSource::new(
					EMBEDDING_TOOL,
					SourcePayload::Embedding(EmbeddingSignal { relevance, similarity }),
					confidence,
					ctx.now,
				),
			);
		}

		Ok(output)
	}

	/// Packs images into atlases and runs one vision call per atlas with bounded concurrency. Stops
	/// scheduling when the budget, the rate limit or the circuit breaker says no, and stops waiting
	/// at the deadline.
	pub(crate) async fn run_visual(
		&self,
		images: &[ImageRecord],
		ctx: &ExecContext<'_>,
	) -> Result<StrategyOutput> {
		let mut output = StrategyOutput::default();
		let capacity = self.atlas.capacity();
		let total = images.len().div_ceil(capacity) as u32;
		let permits = Arc::new(Semaphore::new(self.cfg.dispatch.vision_concurrency.max(1) as usize));
		let mut tasks = JoinSet::new();

		for chunk in images.chunks(capacity) {
			if Instant::now() >= ctx.deadline {
				output.warnings.push("Processing time budget exhausted before visual analysis could start.".to_string());
				output.partial = true;

				break;
			}
			if !self.breaker.allow() {
				output.warnings.push("Visual analysis is temporarily unavailable.".to_string());
				output.partial = true;

				break;
			}
			if !ctx.budget.can_afford_one() {
				output.warnings.push("Visual analysis budget exhausted; remaining images were not analyzed.".to_string());
				output.partial = true;

				break;
			}
			if !self.limiter.try_acquire() {
				output.warnings.push("Visual analysis rate limit reached.".to_string());
				output.partial = true;

				break;
			}

			let reservation = match ctx.budget.reserve() {
				Ok(reservation) => reservation,
				Err(err) => {
					output.warnings.push(format!("Visual analysis stopped: {err}"));
					output.partial = true;

					break;
				},
			};

			let atlas = self.atlas.clone();
			let permits = permits.clone();
			let chunk = chunk.to_vec();
			let query = ctx.query.to_string();

			tasks.spawn(async move {
				let _permit = permits
					.acquire_owned()
					.await
					.map_err(|_| Error::Provider { message: "Vision pool closed.".to_string() })?;
				let packed = atlas.pack(&chunk, ATLAS_PURPOSE).await?;

				reservation.commit();
				atlas.analyze(&packed, &query).await
			});
		}

		let scheduled = tasks.len() as u32;
		let mut done = 0_u32;
		let mut last_err = None;

		ctx.reporter.step(0, total, None);

		loop {
			match timeout_at(ctx.deadline, tasks.join_next()).await {
				Ok(Some(Ok(Ok(findings)))) => {
					self.breaker.record_success();

					for atlas_finding in findings {
						let finding = &atlas_finding.finding;
						let signal = VisualSignal {
							relevance: finding.suitability_score,
							description: Some(finding.description.clone()).filter(|d| !d.trim().is_empty()),
							tags: finding.tags.iter().map(LabelItem::named).collect(),
							reasoning: Some(finding.reasoning.clone()).filter(|r| !r.trim().is_empty()),
							flagged: Some(finding.flagged),
						};

						output.push(
							&atlas_finding.image_id,
							ContentSource::new(VISION_TOOL, SourcePayload::Visual(signal), VISION_CONFIDENCE, ctx.now),
						);
						output.findings.push(atlas_finding);
					}
				},
				Ok(Some(Ok(Err(err)))) => {
					if matches!(err, Error::Provider { .. }) {
						self.breaker.record_failure();
					}

					tracing::warn!(error = %err, "Atlas analysis failed.");
					output.partial = true;
					last_err = Some(err);
				},
				Ok(Some(Err(err))) => {
					tracing::warn!(error = %err, "Atlas task failed.");
					output.partial = true;
					last_err = Some(Error::from(err));
				},
				Ok(None) => break,
				Err(_) => {
					// Waits for the aborted tasks so uncommitted reservations are refunded.
					tasks.shutdown().await;
					output.warnings.push(format!(
						"Processing time budget exhausted; {done} of {scheduled} visual analyses finished."
					));
					output.partial = true;

					break;
				},
			}

			done += 1;
			ctx.reporter.step(done, total, None);
		}

		if let Some(err) = last_err {
			if !output.has_signal() {
				return Err(err);
			}

			output.warnings.push(format!("Some visual analyses failed: {err}"));
		}

		if output.partial && output.has_signal() {
			let unanalyzed: Vec<ImageRecord> = images
				.iter()
				.filter(|image| !output.has_tool(&image.id, VISION_TOOL))
				.cloned()
				.collect();

			if !unanalyzed.is_empty() {
				output.warnings.push(format!(
					"{} images were not visually analyzed and are ranked from metadata.",
					unanalyzed.len()
				));

				let metadata = self.run_metadata(&unanalyzed, ctx);

				output.absorb(metadata);
			}
		}

		Ok(output)
	}

	/// Visual analysis of a sample next to metadata scoring of the whole set, joined before
	/// ranking.
	pub(crate) async fn run_hybrid(
		&self,
		images: &[ImageRecord],
		ctx: &ExecContext<'_>,
	) -> Result<StrategyOutput> {
		let sample_size = (self.cfg.dispatch.hybrid_sample_size as usize).min(images.len());
		let (sample, rest) = images.split_at(sample_size);
		let (visual, mut output) =
			tokio::join!(self.run_visual(sample, ctx), async { self.run_metadata(rest, ctx) });
		let mut visual_err = None;

		match visual {
			Ok(visual) => output.absorb(visual),
			Err(err) if !err.is_recoverable() => return Err(err),
			Err(err) => visual_err = Some(err),
		}

		// A cut-short visual pass has already scored part of the sample from metadata.
		let unscored: Vec<ImageRecord> = sample
			.iter()
			.filter(|image| !output.has_tool(&image.id, METADATA_TOOL))
			.cloned()
			.collect();
		let metadata = self.run_metadata(&unscored, ctx);

		output.absorb(metadata);

		if let Some(err) = visual_err {
			if !output.has_signal() {
				return Err(err);
			}

			output.warnings.push(format!("Visual sample failed: {err}"));
			output.partial = true;
		}

		Ok(output)
	}
}
