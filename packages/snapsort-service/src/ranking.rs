//! Weighted multi-factor ranking and the per-factor scoring helpers.

use std::cmp::Ordering;

use time::OffsetDateTime;

use crate::{Error, Result};
use snapsort_domain::{
	FactorScores, ImageRecord, RankedResult, SortCriterion, TimeOrder, UserContext,
};

const SECONDS_PER_DAY: f32 = 86_400.0;
// Score for an image with no quality analysis, so unknown sits between good and bad.
const NEUTRAL_QUALITY: f32 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RankingWeights {
	pub relevance: f32,
	pub quality: f32,
	pub recency: f32,
	pub popularity: f32,
	pub personalization: f32,
}
impl RankingWeights {
	/// Only relevance counts. Used when relevance already encodes the desired order.
	pub fn relevance_only() -> Self {
		Self { relevance: 1.0, ..Default::default() }
	}

	/// Configured weights narrowed to `criteria`. Without criteria the configured set is used as
	/// is; a listed factor whose configured weight is zero gets weight 1.
	pub fn resolve(cfg: &snapsort_config::RankingWeights, criteria: &[SortCriterion]) -> Self {
		let base = Self {
			relevance: cfg.relevance,
			quality: cfg.quality,
			recency: cfg.recency,
			popularity: cfg.popularity,
			personalization: cfg.personalization,
		};

		if criteria.is_empty() {
			return base;
		}

		let pick = |criterion: SortCriterion, weight: f32| {
			if !criteria.contains(&criterion) {
				return 0.0;
			}
			if weight > 0.0 { weight } else { 1.0 }
		};

		Self {
			relevance: pick(SortCriterion::Relevance, base.relevance),
			quality: pick(SortCriterion::Quality, base.quality),
			recency: pick(SortCriterion::Recency, base.recency),
			popularity: pick(SortCriterion::Popularity, base.popularity),
			personalization: pick(SortCriterion::Personalization, base.personalization),
		}
	}

	pub fn validate(&self) -> Result<()> {
		for (name, weight) in self.named() {
			if !weight.is_finite() || weight < 0.0 {
				return Err(Error::invalid_request(format!(
					"Ranking weight {name} must be a non-negative number."
				)));
			}
		}

		Ok(())
	}

	pub fn total(&self) -> f32 {
		self.named().iter().map(|(_, weight)| weight).sum()
	}

	fn named(&self) -> [(&'static str, f32); 5] {
		[
			("relevance", self.relevance),
			("quality", self.quality),
			("recency", self.recency),
			("popularity", self.popularity),
			("personalization", self.personalization),
		]
	}

	/// Weighted sum divided by the total weight, in `[0, 1]`. Zero total weight scores zero.
	pub fn score(&self, factors: &FactorScores) -> f32 {
		let total = self.total();

		if total <= f32::EPSILON {
			return 0.0;
		}

		let sum = self.relevance * factors.relevance
			+ self.quality * factors.quality
			+ self.recency * factors.recency
			+ self.popularity * factors.popularity
			+ self.personalization * factors.personalization;

		(sum / total).clamp(0.0, 1.0)
	}
}

#[derive(Debug, Clone)]
pub struct RankCandidate {
	pub image: ImageRecord,
	pub factors: FactorScores,
	/// Why the signal scored the image the way it did; extended with the top factors.
	pub reasoning: String,
}

/// Orders candidates by weighted score, highest first. Equal scores keep input order and positions
/// run 1..N without gaps.
pub fn rank(candidates: Vec<RankCandidate>, weights: &RankingWeights) -> Result<Vec<RankedResult>> {
	weights.validate()?;

	let mut scored: Vec<(f32, RankCandidate)> = candidates
		.into_iter()
		.map(|mut candidate| {
			candidate.factors = candidate.factors.clamped();

			(weights.score(&candidate.factors), candidate)
		})
		.collect();

	scored.sort_by(|a, b| cmp_f32_desc(a.0, b.0));

	Ok(scored
		.into_iter()
		.enumerate()
		.map(|(index, (score, candidate))| {
			let reasoning = explain(&candidate.reasoning, &candidate.factors, weights);

			RankedResult {
				image: candidate.image,
				score,
				position: index as u32 + 1,
				reasoning,
				breakdown: candidate.factors,
			}
		})
		.collect())
}

pub fn cmp_f32_desc(a: f32, b: f32) -> Ordering {
	match (a.is_nan(), b.is_nan()) {
		(true, true) => Ordering::Equal,
		(true, false) => Ordering::Greater,
		(false, true) => Ordering::Less,
		(false, false) => b.partial_cmp(&a).unwrap_or(Ordering::Equal),
	}
}

fn explain(prefix: &str, factors: &FactorScores, weights: &RankingWeights) -> String {
	let mut contributions: Vec<(&str, f32, f32)> = weights
		.named()
		.into_iter()
		.filter(|(_, weight)| *weight > 0.0)
		.map(|(name, weight)| {
			let value = match name {
				"relevance" => factors.relevance,
				"quality" => factors.quality,
				"recency" => factors.recency,
				"popularity" => factors.popularity,
				_ => factors.personalization,
			};

			(name, value, value * weight)
		})
		.collect();

	contributions.sort_by(|a, b| cmp_f32_desc(a.2, b.2));

	let top: Vec<String> = contributions
		.iter()
		.take(2)
		.filter(|(_, _, contribution)| *contribution > 0.0)
		.map(|(name, value, _)| format!("{name} {value:.2}"))
		.collect();

	match (prefix.trim().is_empty(), top.is_empty()) {
		(true, true) => "No ranking signal.".to_string(),
		(true, false) => format!("Top factors: {}.", top.join(", ")),
		(false, true) => prefix.trim().to_string(),
		(false, false) => format!("{} Top factors: {}.", prefix.trim(), top.join(", ")),
	}
}

pub fn quality_score(image: &ImageRecord) -> f32 {
	image
		.metadata
		.as_ref()
		.and_then(|metadata| metadata.quality.as_ref())
		.and_then(|quality| quality.overall())
		.unwrap_or(NEUTRAL_QUALITY)
}

/// Exponential decay with time constant `tau_days`. Images without a capture time score zero.
pub fn recency_score(
	captured_at: Option<OffsetDateTime>,
	now: OffsetDateTime,
	tau_days: f32,
	order: TimeOrder,
) -> f32 {
	let Some(captured_at) = captured_at else { return 0.0 };
	let age_days = ((now - captured_at).as_seconds_f32() / SECONDS_PER_DAY).max(0.0);
	let fresh = (-age_days / tau_days.max(f32::EPSILON)).exp();

	match order {
		TimeOrder::NewestFirst => fresh,
		TimeOrder::OldestFirst => 1.0 - fresh,
	}
}

/// Saturating view count, with a fixed share reserved for favorites.
pub fn popularity_score(image: &ImageRecord, half_saturation: f32) -> f32 {
	let views = image.view_count as f32;
	let view_share = views / (views + half_saturation.max(f32::EPSILON));
	let favorite = if image.favorite { 1.0 } else { 0.0 };

	(0.7 * view_share + 0.3 * favorite).clamp(0.0, 1.0)
}

/// Explicit favorites score 1; otherwise the share of preferred tags present on the image.
pub fn personalization_score(image: &ImageRecord, context: Option<&UserContext>) -> f32 {
	let Some(context) = context else { return 0.0 };

	if context.favorite_image_ids.iter().any(|id| id == &image.id) {
		return 1.0;
	}
	if context.preferred_tags.is_empty() {
		return 0.0;
	}

	let matched = context
		.preferred_tags
		.iter()
		.filter(|wanted| image.tags.iter().any(|tag| tag.trim().eq_ignore_ascii_case(wanted.trim())))
		.count();

	matched as f32 / context.preferred_tags.len() as f32
}

#[cfg(test)]
mod tests {
	use time::Duration;

	use super::*;

	fn candidate(id: &str, relevance: f32, quality: f32) -> RankCandidate {
		RankCandidate {
			image: ImageRecord::new(id, "u", format!("s3://{id}.jpg")),
			factors: FactorScores { relevance, quality, ..Default::default() },
			reasoning: String::new(),
		}
	}

	#[test]
	fn positions_are_dense_and_scores_non_increasing() {
		let weights = RankingWeights { relevance: 0.6, quality: 0.4, ..Default::default() };
		let ranked = rank(
			vec![
				candidate("a", 0.2, 0.2),
				candidate("b", 0.9, 0.1),
				candidate("c", 1.4, 0.9),
				candidate("d", 0.2, 0.2),
			],
			&weights,
		)
		.expect("rank");
		let ids: Vec<&str> = ranked.iter().map(|r| r.image.id.as_str()).collect();

		assert_eq!(ids, vec!["c", "b", "a", "d"]);
		assert_eq!(ranked.iter().map(|r| r.position).collect::<Vec<_>>(), vec![1, 2, 3, 4]);
		assert!(ranked.windows(2).all(|pair| pair[0].score >= pair[1].score));
		assert!(ranked.iter().all(|r| (0.0..=1.0).contains(&r.score)));
	}

	#[test]
	fn criteria_keep_only_listed_factors() {
		let cfg = snapsort_config::RankingWeights {
			relevance: 0.6,
			quality: 0.2,
			recency: 0.0,
			popularity: 0.1,
			personalization: 0.1,
		};
		let weights =
			RankingWeights::resolve(&cfg, &[SortCriterion::Quality, SortCriterion::Recency]);

		assert_eq!(
			weights,
			RankingWeights { quality: 0.2, recency: 1.0, ..Default::default() }
		);
	}

	#[test]
	fn negative_weights_are_rejected() {
		let weights = RankingWeights { quality: -1.0, ..Default::default() };

		assert!(matches!(rank(Vec::new(), &weights), Err(Error::InvalidRequest { .. })));
	}

	#[test]
	fn zero_weights_keep_input_order() {
		let ranked = rank(vec![candidate("a", 0.1, 0.1), candidate("b", 0.9, 0.9)], &RankingWeights::default())
			.expect("rank");

		assert_eq!(ranked[0].image.id, "a");
		assert_eq!(ranked[0].score, 0.0);
	}

	#[test]
	fn recency_respects_direction() {
		let now = OffsetDateTime::UNIX_EPOCH + Duration::days(1_000);
		let recent = Some(now - Duration::days(1));
		let old = Some(now - Duration::days(900));

		assert!(
			recency_score(recent, now, 365.0, TimeOrder::NewestFirst)
				> recency_score(old, now, 365.0, TimeOrder::NewestFirst)
		);
		assert!(
			recency_score(recent, now, 365.0, TimeOrder::OldestFirst)
				< recency_score(old, now, 365.0, TimeOrder::OldestFirst)
		);
		assert_eq!(recency_score(None, now, 365.0, TimeOrder::NewestFirst), 0.0);
	}

	#[test]
	fn personalization_prefers_favorites_then_tags() {
		let mut image = ImageRecord::new("x", "u", "s3://x.jpg");

		image.tags = vec!["Dog".to_string()];

		let context = UserContext {
			preferred_tags: vec!["dog".to_string(), "park".to_string()],
			favorite_image_ids: Vec::new(),
		};

		assert_eq!(personalization_score(&image, Some(&context)), 0.5);

		let favorites = UserContext { favorite_image_ids: vec!["x".to_string()], ..context };

		assert_eq!(personalization_score(&image, Some(&favorites)), 1.0);
		assert_eq!(personalization_score(&image, None), 0.0);
	}
}
