//! Shared plumbing for OpenAI-compatible chat completion endpoints that are asked to answer in
//! JSON.

use std::time::Duration;

use reqwest::Client;
use serde_json::{Map, Value};

use crate::{Error, Result};
use snapsort_config::{LlmProviderConfig, VisionProviderConfig};

const MAX_ATTEMPTS: usize = 3;

/// Connection details for one chat endpoint.
#[derive(Debug, Clone)]
pub struct ChatEndpoint<'a> {
	pub api_base: &'a str,
	pub api_key: &'a str,
	pub path: &'a str,
	pub model: &'a str,
	pub temperature: f32,
	pub timeout_ms: u64,
	pub default_headers: &'a Map<String, Value>,
}
impl<'a> From<&'a LlmProviderConfig> for ChatEndpoint<'a> {
	fn from(cfg: &'a LlmProviderConfig) -> Self {
		Self {
			api_base: &cfg.api_base,
			api_key: &cfg.api_key,
			path: &cfg.path,
			model: &cfg.model,
			temperature: cfg.temperature,
			timeout_ms: cfg.timeout_ms,
			default_headers: &cfg.default_headers,
		}
	}
}
impl<'a> From<&'a VisionProviderConfig> for ChatEndpoint<'a> {
	fn from(cfg: &'a VisionProviderConfig) -> Self {
		Self {
			api_base: &cfg.api_base,
			api_key: &cfg.api_key,
			path: &cfg.path,
			model: &cfg.model,
			temperature: cfg.temperature,
			timeout_ms: cfg.timeout_ms,
			default_headers: &cfg.default_headers,
		}
	}
}

/// Posts `messages` and returns the JSON object the model answered with.
///
/// Transport and HTTP status errors fail immediately. A reply whose content is not valid JSON is
/// retried, up to three attempts in total.
pub async fn post_chat_json(endpoint: &ChatEndpoint<'_>, messages: &[Value]) -> Result<Value> {
	let client = Client::builder().timeout(Duration::from_millis(endpoint.timeout_ms)).build()?;
	let url = crate::endpoint_url(endpoint.api_base, endpoint.path);
	let headers = crate::auth_headers(endpoint.api_key, endpoint.default_headers)?;
	let body = serde_json::json!({
		"model": endpoint.model,
		"temperature": endpoint.temperature,
		"response_format": { "type": "json_object" },
		"messages": messages,
	});
	let mut last_err = None;

	for attempt in 1..=MAX_ATTEMPTS {
		let res = client.post(&url).headers(headers.clone()).json(&body).send().await?;
		let json: Value = res.error_for_status()?.json().await?;

		match parse_chat_json(json) {
			Ok(parsed) => return Ok(parsed),
			Err(err) => {
				tracing::warn!(attempt, model = endpoint.model, error = %err, "Chat reply was not JSON.");

				last_err = Some(err);
			},
		}
	}

	Err(last_err.unwrap_or_else(|| Error::invalid_response("Chat response is not valid JSON.")))
}

pub(crate) fn parse_chat_json(json: Value) -> Result<Value> {
	if let Some(content) = json
		.get("choices")
		.and_then(|v| v.as_array())
		.and_then(|arr| arr.first())
		.and_then(|choice| choice.get("message"))
		.and_then(|msg| msg.get("content"))
		.and_then(|c| c.as_str())
	{
		return serde_json::from_str(strip_code_fence(content))
			.map_err(|_| Error::invalid_response("Chat content is not valid JSON."));
	}
	if json.is_object() && json.get("choices").is_none() {
		return Ok(json);
	}

	Err(Error::invalid_response("Chat response is missing JSON content."))
}

// Some models wrap JSON answers in a markdown fence even when asked not to.
fn strip_code_fence(content: &str) -> &str {
	let trimmed = content.trim();
	let Some(rest) = trimmed.strip_prefix("```") else {
		return trimmed;
	};
	let rest = rest.strip_prefix("json").unwrap_or(rest);

	rest.strip_suffix("```").unwrap_or(rest).trim()
}
