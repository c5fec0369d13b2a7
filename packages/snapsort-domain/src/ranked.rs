use serde::{Deserialize, Serialize};

use crate::ImageRecord;

/// Per-factor scores for one image, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FactorScores {
	pub relevance: f32,
	pub quality: f32,
	pub recency: f32,
	pub popularity: f32,
	pub personalization: f32,
}
impl FactorScores {
	pub fn clamped(self) -> Self {
		Self {
			relevance: unit(self.relevance),
			quality: unit(self.quality),
			recency: unit(self.recency),
			popularity: unit(self.popularity),
			personalization: unit(self.personalization),
		}
	}
}

/// One entry of an ordered result list. Positions are 1-based and dense.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedResult {
	pub image: ImageRecord,
	pub score: f32,
	pub position: u32,
	pub reasoning: String,
	pub breakdown: FactorScores,
}

fn unit(value: f32) -> f32 {
	if value.is_finite() { value.clamp(0.0, 1.0) } else { 0.0 }
}
