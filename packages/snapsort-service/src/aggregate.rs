//! Merges several partial descriptions of one image into a single field set.
//!
//! Each source is flattened into dotted field paths. A path is only in conflict when at least two
//! sources set it and they disagree. Lists never conflict; they are merged with deduplication.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::{Error, Result};
use snapsort_config::Aggregation;
use snapsort_domain::ContentSource;

const CONFIDENCE_EPSILON: f32 = 1e-6;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedContent {
	/// Merged values keyed by dotted path.
	pub fields: BTreeMap<String, Value>,
	/// Distinct tool names, most confident first.
	pub sources: Vec<String>,
	pub confidence: f32,
	/// Paths whose conflict could not be decided on confidence alone.
	pub unresolved_conflicts: Vec<String>,
	pub metadata: AggregationMetadata,
}
impl AggregatedContent {
	pub fn number(&self, path: &str) -> Option<f32> {
		self.fields.get(path).and_then(Value::as_f64).map(|value| value as f32)
	}

	pub fn text(&self, path: &str) -> Option<&str> {
		self.fields.get(path).and_then(Value::as_str)
	}

	pub fn flag(&self, path: &str) -> Option<bool> {
		self.fields.get(path).and_then(Value::as_bool)
	}

	/// `name` of every object in a merged list, or the item itself for string lists.
	pub fn label_names(&self, path: &str) -> Vec<String> {
		let Some(items) = self.fields.get(path).and_then(Value::as_array) else {
			return Vec::new();
		};

		items
			.iter()
			.filter_map(|item| match item {
				Value::String(name) => Some(name.clone()),
				Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_string),
				_ => None,
			})
			.collect()
	}
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationMetadata {
	pub source_count: usize,
	pub tools: Vec<String>,
	pub conflicts_resolved: usize,
	pub conflicts_remaining: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct ContentAggregator {
	conflict_penalty: f32,
	multi_source_bonus: f32,
}
impl ContentAggregator {
	pub fn new(cfg: &Aggregation) -> Self {
		Self { conflict_penalty: cfg.conflict_penalty, multi_source_bonus: cfg.multi_source_bonus }
	}

	pub fn aggregate(&self, sources: &[ContentSource]) -> Result<AggregatedContent> {
		if sources.is_empty() {
			return Err(Error::invalid_request("Aggregation needs at least one content source."));
		}

		let mut ordered: Vec<&ContentSource> = sources.iter().collect();

		// Stable, so equally confident sources keep caller order.
		ordered.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));

		let mut by_path: BTreeMap<String, Vec<Contribution>> = BTreeMap::new();

		for source in &ordered {
			let payload = serde_json::to_value(&source.payload)
				.map_err(|err| Error::invalid_request(format!("Unserializable source: {err}")))?;
			let mut flat = Vec::new();

			if let Value::Object(map) = payload {
				flatten_into(&mut flat, "", &map, true);
			}

			for (path, value) in flat {
				by_path
					.entry(path)
					.or_default()
					.push(Contribution { value, confidence: source.confidence() });
			}
		}

		let mut fields = BTreeMap::new();
		let mut unresolved = Vec::new();
		let mut resolved_count = 0;

		for (path, contributions) in by_path {
			if contributions.iter().all(|c| c.value.is_array()) {
				fields.insert(path, merge_lists(&contributions));

				continue;
			}

			let mut distinct: Vec<&Value> = Vec::new();

			for contribution in &contributions {
				if !distinct.contains(&&contribution.value) {
					distinct.push(&contribution.value);
				}
			}

			if contributions.len() < 2 || distinct.len() < 2 {
				fields.insert(path, contributions[0].value.clone());

				continue;
			}

			let (value, resolved) = resolve_conflict(&contributions);

			if resolved {
				resolved_count += 1;
			} else {
				tracing::debug!(field = %path, "Conflict left unresolved.");
				unresolved.push(path.clone());
			}

			fields.insert(path, value);
		}

		let mut tools: Vec<String> = Vec::new();

		for source in &ordered {
			if !tools.contains(&source.tool) {
				tools.push(source.tool.clone());
			}
		}

		let mean = ordered.iter().map(|source| source.confidence()).sum::<f32>() / ordered.len() as f32;
		let bonus = if ordered.len() > 1 { self.multi_source_bonus } else { 0.0 };
		let confidence =
			(mean - self.conflict_penalty * unresolved.len() as f32 + bonus).clamp(0.0, 1.0);

		Ok(AggregatedContent {
			fields,
			sources: tools.clone(),
			confidence,
			metadata: AggregationMetadata {
				source_count: ordered.len(),
				tools,
				conflicts_resolved: resolved_count,
				conflicts_remaining: unresolved.len(),
			},
			unresolved_conflicts: unresolved,
		})
	}
}

struct Contribution {
	value: Value,
	confidence: f32,
}

fn flatten_into(out: &mut Vec<(String, Value)>, prefix: &str, map: &Map<String, Value>, root: bool) {
	for (key, value) in map {
		// The payload tag says which kind of source this is; it is not an image attribute.
		if root && key == "kind" {
			continue;
		}

		let path = if prefix.is_empty() { key.clone() } else { format!("{prefix}.{key}") };

		match value {
			Value::Null => {},
			Value::Object(inner) => flatten_into(out, &path, inner, false),
			other => out.push((path, other.clone())),
		}
	}
}

fn merge_lists(contributions: &[Contribution]) -> Value {
	let mut seen = HashSet::new();
	let mut merged = Vec::new();

	for contribution in contributions {
		let Value::Array(items) = &contribution.value else { continue };

		for item in items {
			if seen.insert(dedup_key(item)) {
				merged.push(item.clone());
			}
		}
	}

	Value::Array(merged)
}

// Identity of a list item: its id, else its case-folded name, else its value, else its structure.
fn dedup_key(item: &Value) -> String {
	if let Value::Object(map) = item {
		if let Some(id) = map.get("id").filter(|id| !id.is_null()) {
			return format!("id:{id}");
		}
		if let Some(name) = map.get("name").and_then(Value::as_str) {
			return format!("name:{}", name.trim().to_lowercase());
		}
		if let Some(value) = map.get("value") {
			return format!("value:{value}");
		}
	}
	if let Value::String(text) = item {
		return format!("name:{}", text.trim().to_lowercase());
	}

	let raw = serde_json::to_vec(item).unwrap_or_default();

	format!("hash:{}", blake3::hash(&raw).to_hex())
}

/// Returns the winning value and whether the decision was unambiguous.
fn resolve_conflict(contributions: &[Contribution]) -> (Value, bool) {
	if contributions.iter().all(|c| c.value.is_number()) {
		return resolve_numeric(contributions);
	}
	if contributions.iter().all(|c| c.value.is_boolean()) {
		return (Value::Bool(resolve_boolean(contributions)), true);
	}
	if contributions.iter().all(|c| c.value.is_string()) {
		return resolve_text(contributions);
	}

	let top = top_confidence(contributions);
	let leaders: Vec<&Contribution> = contributions
		.iter()
		.filter(|c| (c.confidence - top).abs() <= CONFIDENCE_EPSILON)
		.collect();
	let first = leaders[0].value.clone();
	let unanimous = leaders.iter().all(|c| c.value == first);

	(first, unanimous)
}

fn resolve_numeric(contributions: &[Contribution]) -> (Value, bool) {
	let total_weight: f64 = contributions.iter().map(|c| f64::from(c.confidence)).sum();
	let values = contributions.iter().filter_map(|c| c.value.as_f64().map(|v| (v, c.confidence)));

	if total_weight <= f64::EPSILON {
		let (sum, count) = values.fold((0.0, 0_u32), |(sum, count), (v, _)| (sum + v, count + 1));

		return (Value::from(sum / f64::from(count.max(1))), false);
	}

	let weighted: f64 = values.map(|(v, confidence)| v * f64::from(confidence)).sum();

	(Value::from(weighted / total_weight), true)
}

// Confidence-weighted majority; a tie goes to false.
fn resolve_boolean(contributions: &[Contribution]) -> bool {
	let (yes, no) = contributions.iter().fold((0.0_f32, 0.0_f32), |(yes, no), c| {
		match c.value.as_bool() {
			Some(true) => (yes + c.confidence, no),
			Some(false) => (yes, no + c.confidence),
			None => (yes, no),
		}
	});

	yes > no
}

// Most confident source first, then the longest string among equally confident sources.
fn resolve_text(contributions: &[Contribution]) -> (Value, bool) {
	let top = top_confidence(contributions);
	let leaders: Vec<&str> = contributions
		.iter()
		.filter(|c| (c.confidence - top).abs() <= CONFIDENCE_EPSILON)
		.filter_map(|c| c.value.as_str())
		.collect();
	let longest = leaders.iter().map(|text| text.chars().count()).max().unwrap_or(0);
	let winners: Vec<&str> =
		leaders.into_iter().filter(|text| text.chars().count() == longest).collect();
	let winner = winners.first().copied().unwrap_or_default();
	let unambiguous = winners.iter().all(|text| *text == winner);

	(Value::String(winner.to_string()), unambiguous)
}

fn top_confidence(contributions: &[Contribution]) -> f32 {
	contributions.iter().map(|c| c.confidence).fold(f32::MIN, f32::max)
}
