use serde::{Deserialize, Serialize};

/// Execution path chosen once per sorting request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStrategy {
	Embedding,
	Metadata,
	Visual,
	Hybrid,
	Fallback,
}
impl ExecutionStrategy {
	pub const ALL: [Self; 5] =
		[Self::Embedding, Self::Metadata, Self::Visual, Self::Hybrid, Self::Fallback];

	pub fn as_str(self) -> &'static str {
		match self {
			Self::Embedding => "embedding",
			Self::Metadata => "metadata",
			Self::Visual => "visual",
			Self::Hybrid => "hybrid",
			Self::Fallback => "fallback",
		}
	}

	/// Next cheaper strategy to try when this one cannot produce a signal.
	pub fn degrade(self) -> Option<Self> {
		match self {
			Self::Visual => Some(Self::Hybrid),
			Self::Hybrid | Self::Embedding => Some(Self::Metadata),
			Self::Metadata => Some(Self::Fallback),
			Self::Fallback => None,
		}
	}

	pub fn uses_vision(self) -> bool {
		matches!(self, Self::Visual | Self::Hybrid)
	}
}
impl std::fmt::Display for ExecutionStrategy {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// What the query is asking to sort by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortType {
	Quality,
	Chronological,
	Color,
	Scene,
	Subject,
	Aesthetic,
	Location,
	Custom,
}
impl SortType {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Quality => "quality",
			Self::Chronological => "chronological",
			Self::Color => "color",
			Self::Scene => "scene",
			Self::Subject => "subject",
			Self::Aesthetic => "aesthetic",
			Self::Location => "location",
			Self::Custom => "custom",
		}
	}

	pub fn parse(raw: &str) -> Option<Self> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"quality" => Some(Self::Quality),
			"chronological" | "date" | "time" => Some(Self::Chronological),
			"color" | "colour" => Some(Self::Color),
			"scene" => Some(Self::Scene),
			"subject" | "object" | "people" => Some(Self::Subject),
			"aesthetic" => Some(Self::Aesthetic),
			"location" | "place" => Some(Self::Location),
			"custom" => Some(Self::Custom),
			_ => None,
		}
	}
}

/// Direction of the recency factor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeOrder {
	#[default]
	NewestFirst,
	OldestFirst,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn degrade_chain_ends_at_fallback() {
		let mut chain = vec![ExecutionStrategy::Visual];

		while let Some(next) = chain.last().and_then(|strategy| strategy.degrade()) {
			chain.push(next);
		}

		assert_eq!(
			chain,
			vec![
				ExecutionStrategy::Visual,
				ExecutionStrategy::Hybrid,
				ExecutionStrategy::Metadata,
				ExecutionStrategy::Fallback,
			]
		);
		assert_eq!(ExecutionStrategy::Embedding.degrade(), Some(ExecutionStrategy::Metadata));
	}

	#[test]
	fn strategy_serializes_as_method_name() {
		for strategy in ExecutionStrategy::ALL {
			let json = serde_json::to_value(strategy).expect("serialize");

			assert_eq!(json, serde_json::Value::String(strategy.as_str().to_string()));
		}
	}
}
