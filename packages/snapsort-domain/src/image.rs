use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// One image owned by the external image store.
///
/// The pipeline reads these freely and only ever writes back the embedding and the analysis fields
/// (see [`AnalysisUpdate`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageRecord {
	pub id: String,
	pub owner_id: String,
	/// Storage location, usually a URL the object store can resolve.
	pub location: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub filename: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub embedding: Option<Vec<f32>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub title: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub caption: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub visual_summary: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tags: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub metadata: Option<ImageMetadata>,
	#[serde(default)]
	pub favorite: bool,
	#[serde(default)]
	pub view_count: u64,
	#[serde(default)]
	pub flagged: bool,
}
impl ImageRecord {
	pub fn new(id: impl Into<String>, owner_id: impl Into<String>, location: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			owner_id: owner_id.into(),
			location: location.into(),
			filename: None,
			embedding: None,
			title: None,
			description: None,
			caption: None,
			visual_summary: None,
			tags: Vec::new(),
			metadata: None,
			favorite: false,
			view_count: 0,
			flagged: false,
		}
	}

	pub fn has_structured_metadata(&self) -> bool {
		self.metadata.as_ref().map(ImageMetadata::is_structured).unwrap_or(false)
	}

	/// Name used when nothing better describes the image: the explicit filename, else the last
	/// path segment of the storage location.
	pub fn display_name(&self) -> &str {
		if let Some(name) = self.filename.as_deref().map(str::trim).filter(|name| !name.is_empty()) {
			return name;
		}

		let trimmed = self.location.trim_end_matches('/');
		let tail = trimmed.rsplit('/').next().unwrap_or(trimmed);

		tail.split(['?', '#']).next().unwrap_or(tail)
	}

	pub fn captured_at(&self) -> Option<OffsetDateTime> {
		self.metadata.as_ref().and_then(|metadata| metadata.captured_at)
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub objects: Option<ObjectDetection>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub scenes: Option<SceneAnalysis>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub quality: Option<QualityAnalysis>,
	#[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
	pub captured_at: Option<OffsetDateTime>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub location: Option<GeoPoint>,
}
impl ImageMetadata {
	/// True when at least one analysis result (objects, scenes, quality) is present.
	pub fn is_structured(&self) -> bool {
		let objects = self.objects.as_ref().map(|o| !o.labels.is_empty()).unwrap_or(false);
		let scenes = self.scenes.as_ref().map(|s| !s.labels.is_empty()).unwrap_or(false);
		let quality = self.quality.as_ref().map(QualityAnalysis::has_scores).unwrap_or(false);

		objects || scenes || quality
	}

	/// Object and scene labels at or above `min_confidence`, most confident first, capped at `max`.
	pub fn confident_labels(&self, min_confidence: f32, max: usize) -> Vec<&str> {
		let mut labels: Vec<&DetectedLabel> = self
			.objects
			.iter()
			.flat_map(|objects| objects.labels.iter())
			.chain(self.scenes.iter().flat_map(|scenes| scenes.labels.iter()))
			.filter(|label| label.confidence >= min_confidence && !label.label.trim().is_empty())
			.collect();

		labels.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

		let mut out: Vec<&str> = Vec::new();

		for label in labels {
			let name = label.label.trim();

			if out.iter().any(|existing| existing.eq_ignore_ascii_case(name)) {
				continue;
			}

			out.push(name);

			if out.len() >= max {
				break;
			}
		}

		out
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ObjectDetection {
	#[serde(default)]
	pub labels: Vec<DetectedLabel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneAnalysis {
	#[serde(default)]
	pub labels: Vec<DetectedLabel>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub dominant_colors: Vec<String>,
}

/// Scores produced by an offline quality pass. Every score is in `[0, 1]` when present.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityAnalysis {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub quality_score: Option<f32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub brightness: Option<f32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub aesthetic_score: Option<f32>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub sharpness: Option<f32>,
}
impl QualityAnalysis {
	pub fn has_scores(&self) -> bool {
		self.quality_score.is_some()
			|| self.brightness.is_some()
			|| self.aesthetic_score.is_some()
			|| self.sharpness.is_some()
	}

	/// Mean of the quality, aesthetic and sharpness scores that are present.
	///
	/// Brightness is left out: a dark photo is not a worse photo.
	pub fn overall(&self) -> Option<f32> {
		let scores: Vec<f32> = [self.quality_score, self.aesthetic_score, self.sharpness]
			.into_iter()
			.flatten()
			.filter(|score| score.is_finite())
			.map(|score| score.clamp(0.0, 1.0))
			.collect();

		if scores.is_empty() {
			return None;
		}

		Some(scores.iter().sum::<f32>() / scores.len() as f32)
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedLabel {
	pub label: String,
	pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoPoint {
	pub latitude: f64,
	pub longitude: f64,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub place_name: Option<String>,
}

/// Analysis fields the pipeline writes back after a visual pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisUpdate {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub visual_summary: Option<String>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tags: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub flagged: Option<bool>,
}

/// Owner-scoped listing filters for the image store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageFilters {
	#[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
	pub captured_after: Option<OffsetDateTime>,
	#[serde(default, with = "time::serde::rfc3339::option", skip_serializing_if = "Option::is_none")]
	pub captured_before: Option<OffsetDateTime>,
	#[serde(default, skip_serializing_if = "Vec::is_empty")]
	pub tags: Vec<String>,
	#[serde(default)]
	pub include_flagged: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub limit: Option<u32>,
}
impl ImageFilters {
	pub fn matches(&self, image: &ImageRecord) -> bool {
		if image.flagged && !self.include_flagged {
			return false;
		}

		let captured_at = image.captured_at();

		if let Some(after) = self.captured_after
			&& !captured_at.map(|ts| ts >= after).unwrap_or(false)
		{
			return false;
		}
		if let Some(before) = self.captured_before
			&& !captured_at.map(|ts| ts < before).unwrap_or(false)
		{
			return false;
		}

		self.tags.iter().all(|wanted| image.tags.iter().any(|tag| tag.eq_ignore_ascii_case(wanted)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn display_name_prefers_filename_then_location_tail() {
		let mut image = ImageRecord::new("1", "u", "https://cdn.example.com/a/b/IMG_0001.jpg?sig=x");

		assert_eq!(image.display_name(), "IMG_0001.jpg");

		image.filename = Some("beach.jpg".to_string());

		assert_eq!(image.display_name(), "beach.jpg");
	}

	#[test]
	fn confident_labels_are_sorted_and_deduplicated() {
		let metadata = ImageMetadata {
			objects: Some(ObjectDetection {
				labels: vec![
					DetectedLabel { label: "dog".to_string(), confidence: 0.7 },
					DetectedLabel { label: "ball".to_string(), confidence: 0.2 },
				],
			}),
			scenes: Some(SceneAnalysis {
				labels: vec![
					DetectedLabel { label: "Beach".to_string(), confidence: 0.9 },
					DetectedLabel { label: "DOG".to_string(), confidence: 0.6 },
				],
				dominant_colors: Vec::new(),
			}),
			..Default::default()
		};

		assert_eq!(metadata.confident_labels(0.5, 5), vec!["Beach", "dog"]);
		assert_eq!(metadata.confident_labels(0.5, 1), vec!["Beach"]);
	}

	#[test]
	fn overall_quality_ignores_brightness() {
		let quality = QualityAnalysis {
			quality_score: Some(0.8),
			brightness: Some(0.0),
			aesthetic_score: Some(0.4),
			sharpness: None,
		};

		assert!((quality.overall().expect("score") - 0.6).abs() < 1e-6);
		assert_eq!(QualityAnalysis::default().overall(), None);
	}
}
