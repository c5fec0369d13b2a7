pub mod chat;
pub mod classifier;
pub mod embedding;
pub mod object_store;
pub mod vision;

mod error;

pub use error::{Error, Result};

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderName};
use serde_json::{Map, Value};

pub fn auth_headers(api_key: &str, default_headers: &Map<String, Value>) -> Result<HeaderMap> {
	let mut headers = HeaderMap::new();

	headers.insert(AUTHORIZATION, format!("Bearer {api_key}").parse()?);

	for (key, value) in default_headers {
		let Some(raw) = value.as_str() else {
			return Err(Error::InvalidConfig {
				message: format!("Default header {key} must be a string."),
			});
		};

		headers.insert(HeaderName::from_bytes(key.as_bytes())?, raw.parse()?);
	}

	Ok(headers)
}

pub(crate) fn endpoint_url(api_base: &str, path: &str) -> String {
	let base = api_base.trim_end_matches('/');

	if path.is_empty() {
		return base.to_string();
	}
	if path.starts_with('/') {
		return format!("{base}{path}");
	}

	format!("{base}/{path}")
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn joins_base_and_path() {
		assert_eq!(endpoint_url("http://h/v1/", "/embeddings"), "http://h/v1/embeddings");
		assert_eq!(endpoint_url("http://h/v1", "embeddings"), "http://h/v1/embeddings");
		assert_eq!(endpoint_url("http://h/v1", ""), "http://h/v1");
	}
}
