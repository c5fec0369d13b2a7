use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One opinion about one image's attributes, produced by a single tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentSource {
	pub tool: String,
	pub payload: SourcePayload,
	confidence: f32,
	#[serde(with = "time::serde::rfc3339")]
	pub observed_at: OffsetDateTime,
}
impl ContentSource {
	/// Non-finite confidences become zero; everything else is clamped to `[0, 1]`.
	pub fn new(
		tool: impl Into<String>,
		payload: SourcePayload,
		confidence: f32,
		observed_at: OffsetDateTime,
	) -> Self {
		let confidence = if confidence.is_finite() { confidence.clamp(0.0, 1.0) } else { 0.0 };

		Self { tool: tool.into(), payload, confidence, observed_at }
	}

	pub fn confidence(&self) -> f32 {
		self.confidence
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourcePayload {
	Metadata(MetadataSignal),
	Embedding(EmbeddingSignal),
	Visual(VisualSignal),
}
impl SourcePayload {
	pub fn kind(&self) -> &'static str {
		match self {
			Self::Metadata(_) => "metadata",
			Self::Embedding(_) => "embedding",
			Self::Visual(_) => "visual",
		}
	}

	pub fn relevance(&self) -> Option<f32> {
		match self {
			Self::Metadata(signal) => signal.relevance,
			Self::Embedding(signal) => Some(signal.relevance),
			Self::Visual(signal) => Some(signal.relevance),
		}
	}
}

/// Derived from stored metadata without any external call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataSignal {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub relevance: Option<f32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub quality: Option<f32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tags: Vec<LabelItem>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub flagged: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingSignal {
	pub relevance: f32,
	pub similarity: f32,
}

/// Result of one visual-analysis call, rejoined to its image through the atlas position map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisualSignal {
	pub relevance: f32,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tags: Vec<LabelItem>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reasoning: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub flagged: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelItem {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub id: Option<String>,
	pub name: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub confidence: Option<f32>,
}
impl LabelItem {
	pub fn named(name: impl Into<String>) -> Self {
		Self { id: None, name: name.into(), confidence: None }
	}
}
