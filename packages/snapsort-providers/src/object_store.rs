//! Minimal client for a bucket-style object store that accepts `PUT`, `DELETE` and `GET` on
//! `{api_base}/{bucket}/{name}` and serves uploads publicly under `public_base`.

use std::time::Duration;

use reqwest::{Client, StatusCode, header::CONTENT_TYPE};

use crate::{Error, Result};
use snapsort_config::ObjectStoreConfig;

/// Uploads `bytes` as `name` and returns the public URL of the object.
pub async fn upload(
	cfg: &ObjectStoreConfig,
	name: &str,
	bytes: Vec<u8>,
	content_type: &str,
) -> Result<String> {
	let client = client(cfg)?;
	let res = client
		.put(object_url(cfg, name)?)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.header(CONTENT_TYPE, content_type)
		.body(bytes)
		.send()
		.await?;

	res.error_for_status()?;

	Ok(crate::endpoint_url(&cfg.public_base, name))
}

/// Deletes `name`. A missing object counts as deleted.
pub async fn delete(cfg: &ObjectStoreConfig, name: &str) -> Result<()> {
	let client = client(cfg)?;
	let res = client
		.delete(object_url(cfg, name)?)
		.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
		.send()
		.await?;

	if res.status() == StatusCode::NOT_FOUND {
		return Ok(());
	}

	res.error_for_status()?;

	Ok(())
}

/// Fetches the bytes behind `location`, which is either an absolute URL or an object name in the
/// configured bucket.
pub async fn download(cfg: &ObjectStoreConfig, location: &str) -> Result<Vec<u8>> {
	let client = client(cfg)?;
	let request = if location.starts_with("http://") || location.starts_with("https://") {
		client.get(location)
	} else {
		client
			.get(object_url(cfg, location)?)
			.headers(crate::auth_headers(&cfg.api_key, &cfg.default_headers)?)
	};
	let res = request.send().await?.error_for_status()?;

	Ok(res.bytes().await?.to_vec())
}

fn client(cfg: &ObjectStoreConfig) -> Result<Client> {
	Ok(Client::builder().timeout(Duration::from_millis(cfg.timeout_ms)).build()?)
}

fn object_url(cfg: &ObjectStoreConfig, name: &str) -> Result<String> {
	let name = name.trim_start_matches('/');

	if name.is_empty() || name.split('/').any(|segment| segment == "..") {
		return Err(Error::InvalidConfig { message: format!("Invalid object name {name:?}.") });
	}

	Ok(format!("{}/{}/{name}", cfg.api_base.trim_end_matches('/'), cfg.bucket))
}

#[cfg(test)]
mod tests {
	use serde_json::Map;

	use super::*;

	fn cfg() -> ObjectStoreConfig {
		ObjectStoreConfig {
			api_base: "http://store.local/".to_string(),
			api_key: "k".to_string(),
			bucket: "atlases".to_string(),
			public_base: "https://cdn.local".to_string(),
			timeout_ms: 1_000,
			default_headers: Map::new(),
		}
	}

	#[test]
	fn object_url_joins_bucket_and_name() {
		assert_eq!(
			object_url(&cfg(), "/atlas/abc.png").expect("valid name"),
			"http://store.local/atlases/atlas/abc.png"
		);
	}

	#[test]
	fn object_url_rejects_traversal() {
		assert!(object_url(&cfg(), "../secret").is_err());
		assert!(object_url(&cfg(), "").is_err());
	}
}
