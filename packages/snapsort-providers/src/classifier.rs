use serde_json::Value;

use crate::{Result, chat::ChatEndpoint};
use snapsort_config::LlmProviderConfig;

/// Asks the classifier model to label a sorting query. The caller owns the prompt and the shape of
/// the reply; this only guarantees that a JSON object comes back.
pub async fn classify(cfg: &LlmProviderConfig, messages: &[Value]) -> Result<Value> {
	let endpoint = ChatEndpoint::from(cfg);
	let reply = crate::chat::post_chat_json(&endpoint, messages).await?;

	tracing::debug!(provider_id = %cfg.provider_id, model = %cfg.model, "Classifier replied.");

	Ok(reply)
}
