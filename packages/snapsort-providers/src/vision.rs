use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result, chat::ChatEndpoint};
use snapsort_config::VisionProviderConfig;

/// One visual-analysis call over a labeled atlas.
#[derive(Debug, Clone)]
pub struct VisionRequest {
	/// Publicly readable URL of the composite image.
	pub image_url: String,
	/// Position labels drawn on the atlas, in grid order.
	pub labels: Vec<String>,
	pub query: String,
	pub grid_size: u32,
}

/// What the model said about the image at one atlas position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisionFinding {
	pub position: String,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub tags: Vec<String>,
	/// How well the image answers the query, in `[0, 1]`.
	#[serde(default)]
	pub suitability_score: f32,
	#[serde(default)]
	pub reasoning: String,
	#[serde(default)]
	pub flagged: bool,
}

pub async fn analyze(cfg: &VisionProviderConfig, req: &VisionRequest) -> Result<Vec<VisionFinding>> {
	let endpoint = ChatEndpoint::from(cfg);
	let messages = build_messages(req);
	let reply = crate::chat::post_chat_json(&endpoint, &messages).await?;
	let findings = parse_findings(&reply, &req.labels)?;

	tracing::debug!(
		provider_id = %cfg.provider_id,
		positions = req.labels.len(),
		findings = findings.len(),
		"Vision analysis completed."
	);

	Ok(findings)
}

fn build_messages(req: &VisionRequest) -> Vec<Value> {
	let grid = req.grid_size;
	let system = format!(
		"You rank photos for a search query. The image is a {grid}x{grid} grid; every tile is \
		 labeled in its corner with a row letter and column number. Reply with a JSON object \
		 {{\"results\": [{{\"position\", \"description\", \"tags\", \"suitabilityScore\", \
		 \"reasoning\", \"flagged\"}}]}} with one entry per labeled tile. suitabilityScore is a \
		 number from 0 to 1. Set flagged to true for explicit or harmful content."
	);
	let user_text =
		format!("Query: {}\nLabeled positions: {}", req.query.trim(), req.labels.join(", "));

	vec![
		serde_json::json!({ "role": "system", "content": system }),
		serde_json::json!({
			"role": "user",
			"content": [
				{ "type": "text", "text": user_text },
				{ "type": "image_url", "image_url": { "url": req.image_url } }
			]
		}),
	]
}

/// Extracts findings for the requested labels. Entries for unknown labels are dropped, duplicate
/// labels keep their first entry.
fn parse_findings(reply: &Value, labels: &[String]) -> Result<Vec<VisionFinding>> {
	let items = reply
		.get("results")
		.and_then(Value::as_array)
		.ok_or_else(|| Error::invalid_response("Vision reply is missing results array."))?;
	let mut findings: Vec<VisionFinding> = Vec::with_capacity(items.len());

	for item in items {
		let Ok(mut finding) = serde_json::from_value::<VisionFinding>(item.clone()) else {
			tracing::warn!("Skipping malformed vision finding.");

			continue;
		};

		finding.position = finding.position.trim().to_ascii_uppercase();

		if !labels.iter().any(|label| label == &finding.position)
			|| findings.iter().any(|existing| existing.position == finding.position)
		{
			continue;
		}

		finding.suitability_score = normalize_score(finding.suitability_score);

		findings.push(finding);
	}

	Ok(findings)
}

// Models sometimes answer on a 0-10 or 0-100 scale.
fn normalize_score(raw: f32) -> f32 {
	if !raw.is_finite() || raw <= 0.0 {
		return 0.0;
	}
	if raw <= 1.0 {
		return raw;
	}
	if raw <= 10.0 {
		return raw / 10.0;
	}

	(raw / 100.0).min(1.0)
}
