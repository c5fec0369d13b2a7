use std::collections::HashSet;

/// Case-folds and collapses whitespace so semantically identical queries compare equal.
pub fn normalize_query(query: &str) -> String {
	query.split_whitespace().map(str::to_lowercase).collect::<Vec<_>>().join(" ")
}

/// Lowercased alphanumeric tokens of at least two characters, deduplicated, in first-seen order.
pub fn tokenize(text: &str, max_terms: usize) -> Vec<String> {
	let mut normalized = String::with_capacity(text.len());

	for ch in text.chars() {
		if ch.is_alphanumeric() {
			normalized.extend(ch.to_lowercase());
		} else {
			normalized.push(' ');
		}
	}

	let mut out = Vec::new();
	let mut seen = HashSet::new();

	for token in normalized.split_whitespace() {
		if out.len() >= max_terms {
			break;
		}
		if token.chars().count() < 2 {
			continue;
		}
		if seen.insert(token) {
			out.push(token.to_string());
		}
	}

	out
}

/// Fraction of `query_tokens` that appear among `text_tokens`.
pub fn overlap_ratio(query_tokens: &[String], text_tokens: &[String]) -> f32 {
	if query_tokens.is_empty() || text_tokens.is_empty() {
		return 0.0;
	}

	let text: HashSet<&str> = text_tokens.iter().map(String::as_str).collect();
	let matched = query_tokens.iter().filter(|token| text.contains(token.as_str())).count();

	matched as f32 / query_tokens.len() as f32
}
