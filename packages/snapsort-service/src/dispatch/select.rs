use snapsort_config::Dispatch;
use snapsort_domain::ExecutionStrategy;

/// Facts about a request that decide its execution path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectionInput {
	pub image_count: usize,
	/// Visual analysis requested, quota left, budget covers one call and the circuit is closed.
	pub vision_allowed: bool,
	pub has_vision_terms: bool,
	/// Share of images carrying structured metadata, in `[0, 1]`.
	pub metadata_coverage: f32,
	pub any_embeddable: bool,
	pub any_metadata: bool,
}

/// First matching rule wins.
pub fn select_strategy(input: &SelectionInput, cfg: &Dispatch) -> ExecutionStrategy {
	let n = input.image_count;

	if input.vision_allowed && input.has_vision_terms && n <= cfg.max_visual_images as usize {
		return ExecutionStrategy::Visual;
	}
	if input.metadata_coverage >= cfg.metadata_coverage && n > cfg.metadata_min_images as usize {
		return ExecutionStrategy::Metadata;
	}
	if input.vision_allowed
		&& (cfg.hybrid_min_images as usize..=cfg.hybrid_max_images as usize).contains(&n)
	{
		return ExecutionStrategy::Hybrid;
	}
	if input.any_embeddable {
		return ExecutionStrategy::Embedding;
	}
	if input.any_metadata {
		return ExecutionStrategy::Metadata;
	}

	ExecutionStrategy::Fallback
}
