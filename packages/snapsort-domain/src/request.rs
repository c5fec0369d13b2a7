use serde::{Deserialize, Serialize};

use crate::{ExecutionStrategy, FactorScores, ImageRecord, SortType};

/// Body of the sorting API.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortRequest {
	pub query: String,
	pub owner_id: String,
	pub images: Vec<ImageRecord>,
	#[serde(default)]
	pub options: SortOptions,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortOptions {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_results: Option<u32>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub sort_criteria: Vec<SortCriterion>,
	#[serde(default)]
	pub use_visual_analysis: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_vision_calls: Option<u32>,
	#[serde(default)]
	pub exclude_flagged: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_processing_time_ms: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub max_cost: Option<f64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub min_confidence: Option<f32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub user_context: Option<UserContext>,
}

/// A ranking factor the caller wants to sort by. Listing criteria replaces the configured weight
/// set with only those factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortCriterion {
	Relevance,
	Quality,
	Recency,
	Popularity,
	Personalization,
}
impl SortCriterion {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Relevance => "relevance",
			Self::Quality => "quality",
			Self::Recency => "recency",
			Self::Popularity => "popularity",
			Self::Personalization => "personalization",
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserContext {
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub preferred_tags: Vec<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub favorite_image_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortResponse {
	pub request_id: String,
	pub results: Vec<SortResultItem>,
	pub processing_time_ms: u64,
	pub confidence: f32,
	pub method_used: ExecutionStrategy,
	pub sort_type: SortType,
	pub cached: bool,
	pub cost_incurred: f64,
	pub vision_calls: u32,
	/// Mean pairwise cosine similarity of the returned images' vectors. Lower means a more varied
	/// result set. Absent when no returned image carries a vector.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub diversity: Option<f32>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortResultItem {
	pub image: ImageRecord,
	pub sort_score: f32,
	pub reasoning: String,
	pub position: u32,
	pub metadata: ResultMetadata,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMetadata {
	pub factors: FactorScores,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub sources: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub signal_confidence: Option<f32>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub unresolved_conflicts: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tags: Vec<String>,
}
