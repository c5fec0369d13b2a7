//! Query intent detection: keyword rules first, a language model only when the rules are unsure.

use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::ClassifierProvider;
use snapsort_config::Config;
use snapsort_domain::{SortType, TimeOrder, text};

const MAX_QUERY_TERMS: usize = 32;
const YEAR_PATTERN: &str = r"\b(19|20)\d{2}\b";
const NO_MATCH_CONFIDENCE: f32 = 0.3;

// Checked in this order; the first type with the most hits wins.
const RULES: [(SortType, &[&str]); 7] = [
	(SortType::Quality, &[
		"best", "top", "quality", "sharp", "sharpest", "clear", "blurry", "worst", "good", "great",
		"greatest", "nicest", "highlight", "highlights",
	]),
	(SortType::Chronological, &[
		"recent", "latest", "newest", "oldest", "earliest", "chronological", "date", "timeline",
		"ago", "year", "month", "week", "today", "yesterday",
	]),
	(SortType::Color, &[
		"color", "colour", "colorful", "colourful", "red", "orange", "yellow", "green", "blue",
		"purple", "pink", "black", "white", "gray", "grey", "brown", "golden", "vibrant",
		"monochrome",
	]),
	(SortType::Scene, &[
		"beach", "sunset", "sunrise", "mountain", "mountains", "forest", "city", "night",
		"landscape", "ocean", "sea", "lake", "snow", "sky", "park", "indoor", "outdoor", "street",
		"desert", "river",
	]),
	(SortType::Subject, &[
		"dog", "dogs", "cat", "cats", "people", "person", "family", "friends", "kid", "kids",
		"baby", "portrait", "portraits", "selfie", "selfies", "car", "food", "face", "faces", "pet",
		"pets", "bird", "birds",
	]),
	(SortType::Aesthetic, &[
		"beautiful", "aesthetic", "artistic", "stunning", "pretty", "gorgeous", "composition",
		"dramatic", "moody", "minimal", "cinematic",
	]),
	(SortType::Location, &[
		"trip", "vacation", "travel", "location", "place", "places", "near", "where", "country",
		"abroad", "home",
	]),
];

// Terms whose meaning lives in the pixels rather than in stored metadata.
const VISION_TERMS: &[&str] = &[
	"colorful", "colourful", "vibrant", "bright", "dark", "red", "orange", "yellow", "green", "blue",
	"purple", "pink", "golden", "sunset", "sunrise", "beautiful", "aesthetic", "stunning", "pretty",
	"gorgeous", "blurry", "sharp", "smiling", "smile", "happy", "lighting", "moody", "dramatic",
	"composition", "cinematic", "cozy", "style",
];

const COLOR_NAMES: &[&str] = &[
	"red", "orange", "yellow", "green", "blue", "purple", "pink", "black", "white", "gray", "grey",
	"brown", "golden",
];

const OLDEST_FIRST_TERMS: &[&str] = &["oldest", "earliest", "first"];

const STOPWORDS: &[&str] = &[
	"the", "my", "me", "show", "find", "photos", "photo", "pictures", "picture", "images", "image",
	"pics", "pic", "of", "with", "and", "in", "on", "at", "from", "for", "all", "by", "sort",
	"order", "please", "some", "to", "that", "are", "is", "be", "only", "most", "more", "first",
	"last", "get", "give",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
	Rules,
	Model,
	Fallback,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryAnalysis {
	pub sort_type: SortType,
	pub confidence: f32,
	pub vision_terms: Vec<String>,
	pub time_order: TimeOrder,
	/// Content-bearing query tokens, stopwords removed.
	pub terms: Vec<String>,
	pub colors: Vec<String>,
	pub source: ClassificationSource,
}
impl QueryAnalysis {
	pub fn has_vision_terms(&self) -> bool {
		!self.vision_terms.is_empty()
	}
}

pub fn classify_rules(query: &str) -> QueryAnalysis {
	let tokens = text::tokenize(query, MAX_QUERY_TERMS);
	let mut hits: Vec<(SortType, usize)> = RULES
		.iter()
		.map(|(sort_type, words)| {
			(*sort_type, words.iter().filter(|word| contains(&tokens, word)).count())
		})
		.collect();

	if Regex::new(YEAR_PATTERN).map(|re| re.is_match(query)).unwrap_or(false)
		&& let Some(entry) = hits.iter_mut().find(|(sort_type, _)| *sort_type == SortType::Chronological)
	{
		entry.1 += 1;
	}

	let mut best = (SortType::Custom, 0_usize);
	let mut runner_up = 0_usize;

	for (sort_type, count) in &hits {
		if *count > best.1 {
			runner_up = best.1;
			best = (*sort_type, *count);
		} else if *count > runner_up {
			runner_up = *count;
		}
	}

	let confidence = if best.1 == 0 {
		NO_MATCH_CONFIDENCE
	} else {
		let ambiguity = if runner_up == best.1 { 0.1 } else { 0.0 };

		(0.5 + 0.15 * best.1 as f32 - ambiguity).clamp(NO_MATCH_CONFIDENCE, 0.95)
	};
	let time_order = if OLDEST_FIRST_TERMS.iter().any(|word| contains(&tokens, word)) {
		TimeOrder::OldestFirst
	} else {
		TimeOrder::NewestFirst
	};

	QueryAnalysis {
		sort_type: best.0,
		confidence,
		vision_terms: pick(&tokens, VISION_TERMS),
		time_order,
		terms: tokens.iter().filter(|token| !STOPWORDS.contains(&token.as_str())).cloned().collect(),
		colors: pick(&tokens, COLOR_NAMES),
		source: ClassificationSource::Rules,
	}
}

/// Rule-based analysis, refined by the classifier model when enabled and the rules score below
/// the configured threshold. A failing model yields a fixed-confidence `custom` guess.
pub async fn analyze_query(
	query: &str,
	cfg: &Config,
	classifier: &dyn ClassifierProvider,
) -> QueryAnalysis {
	let rules = classify_rules(query);
	let settings = &cfg.dispatch.classifier;

	if !settings.use_model || rules.confidence >= settings.model_threshold {
		return rules;
	}

	let messages = build_messages(query);
	let reply = classifier.classify(&cfg.providers.classifier, &messages).await;

	match reply.map(|value| parse_model_reply(&value)) {
		Ok(Some((sort_type, confidence, vision_terms, time_order))) => {
			tracing::debug!(sort_type = sort_type.as_str(), confidence, "Model classified query.");

			QueryAnalysis {
				sort_type,
				confidence,
				vision_terms: if vision_terms.is_empty() { rules.vision_terms.clone() } else { vision_terms },
				time_order: time_order.unwrap_or(rules.time_order),
				source: ClassificationSource::Model,
				..rules
			}
		},
		Ok(None) => {
			tracing::warn!("Classifier reply was not usable.");

			fallback(rules, settings.fallback_confidence)
		},
		Err(err) => {
			tracing::warn!(error = %err, "Classifier call failed.");

			fallback(rules, settings.fallback_confidence)
		},
	}
}

fn fallback(rules: QueryAnalysis, confidence: f32) -> QueryAnalysis {
	QueryAnalysis {
		sort_type: SortType::Custom,
		confidence,
		source: ClassificationSource::Fallback,
		..rules
	}
}

fn contains(tokens: &[String], word: &str) -> bool {
	tokens.iter().any(|token| token == word)
}

fn pick(tokens: &[String], vocabulary: &[&str]) -> Vec<String> {
	tokens.iter().filter(|token| vocabulary.contains(&token.as_str())).cloned().collect()
}

fn build_messages(query: &str) -> Vec<Value> {
	let system = "Classify a photo search query. Reply with a JSON object: {\"sortType\": one of \
	              quality|chronological|color|scene|subject|aesthetic|location|custom, \
	              \"confidence\": number 0-1, \"visionTerms\": words that can only be judged by \
	              looking at the pixels, \"timeOrder\": newest_first|oldest_first}.";

	vec![
		serde_json::json!({ "role": "system", "content": system }),
		serde_json::json!({ "role": "user", "content": query.trim() }),
	]
}

type ModelReply = (SortType, f32, Vec<String>, Option<TimeOrder>);

fn parse_model_reply(value: &Value) -> Option<ModelReply> {
	let sort_type = value.get("sortType").and_then(Value::as_str).and_then(SortType::parse)?;
	let confidence = value.get("confidence").and_then(Value::as_f64).map(|c| c as f32)?;

	if !confidence.is_finite() {
		return None;
	}

	let vision_terms = value
		.get("visionTerms")
		.and_then(Value::as_array)
		.map(|items| {
			items
				.iter()
				.filter_map(Value::as_str)
				.map(|term| term.trim().to_lowercase())
				.filter(|term| !term.is_empty())
				.collect()
		})
		.unwrap_or_default();
	let time_order = value.get("timeOrder").and_then(|raw| serde_json::from_value(raw.clone()).ok());

	Some((sort_type, confidence.clamp(0.0, 1.0), vision_terms, time_order))
}
