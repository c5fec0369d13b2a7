//! In-process TTL cache with byte and entry budgets and least-recently-used eviction.

use std::{
	collections::HashMap,
	sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
	time::Duration,
};

use serde_json::Value;
use tokio::{task::JoinHandle, time::Instant};

use crate::{Error, Result};
use snapsort_domain::{SortResponse, text};

const SORT_CACHE_SCHEMA_VERSION: i32 = 1;
const EMBEDDING_CACHE_SCHEMA_VERSION: i32 = 1;
const ATLAS_CACHE_SCHEMA_VERSION: i32 = 1;
// Fixed per-entry overhead charged on top of the value estimate.
const ENTRY_OVERHEAD_BYTES: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheKind {
	SortResult,
	QueryEmbedding,
	Atlas,
}
impl CacheKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::SortResult => "sort_result",
			Self::QueryEmbedding => "query_embedding",
			Self::Atlas => "atlas",
		}
	}
}

/// Rough in-memory footprint of a cached value.
pub trait SizeEstimate {
	fn estimated_bytes(&self) -> usize;
}
impl SizeEstimate for Vec<f32> {
	fn estimated_bytes(&self) -> usize {
		self.len() * size_of::<f32>()
	}
}
impl SizeEstimate for Vec<u8> {
	fn estimated_bytes(&self) -> usize {
		self.len()
	}
}
impl SizeEstimate for String {
	fn estimated_bytes(&self) -> usize {
		self.len()
	}
}
impl SizeEstimate for SortResponse {
	fn estimated_bytes(&self) -> usize {
		serde_json::to_vec(self).map(|raw| raw.len()).unwrap_or(0)
	}
}
impl<T> SizeEstimate for Arc<T>
where
	T: SizeEstimate,
{
	fn estimated_bytes(&self) -> usize {
		self.as_ref().estimated_bytes()
	}
}

#[derive(Debug, Clone, Copy)]
pub struct CacheLimits {
	pub max_entries: usize,
	pub max_bytes: usize,
	pub default_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
	pub value: V,
	pub created_at: Instant,
	pub expires_at: Instant,
	pub access_count: u64,
	pub last_accessed: Instant,
	pub size_bytes: usize,
	// Breaks ties between equal `last_accessed` instants.
	access_seq: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
	pub entries: usize,
	pub bytes: usize,
	pub hits: u64,
	pub misses: u64,
	pub evictions: u64,
	pub expirations: u64,
}

/// All operations take a single lock, so every mutation is atomic with respect to the byte and
/// entry budgets.
pub struct Cache<V> {
	kind: CacheKind,
	limits: CacheLimits,
	inner: Mutex<CacheInner<V>>,
}

struct CacheInner<V> {
	entries: HashMap<String, CacheEntry<V>>,
	total_bytes: usize,
	seq: u64,
	stats: CacheStats,
}
impl<V> CacheInner<V> {
	fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
		let entry = self.entries.remove(key)?;

		self.total_bytes -= entry.size_bytes;

		Some(entry)
	}

	fn evict_lru(&mut self) -> bool {
		let Some(key) = self
			.entries
			.iter()
			.min_by_key(|(_, entry)| (entry.last_accessed, entry.access_seq))
			.map(|(key, _)| key.clone())
		else {
			return false;
		};

		self.remove(&key);
		self.stats.evictions += 1;

		true
	}

	fn next_seq(&mut self) -> u64 {
		self.seq += 1;

		self.seq
	}
}

impl<V> Cache<V>
where
	V: Clone + SizeEstimate,
{
	pub fn new(kind: CacheKind, limits: CacheLimits) -> Self {
		Self {
			kind,
			limits,
			inner: Mutex::new(CacheInner {
				entries: HashMap::new(),
				total_bytes: 0,
				seq: 0,
				stats: CacheStats::default(),
			}),
		}
	}

	pub fn kind(&self) -> CacheKind {
		self.kind
	}

	/// Returns the value while `now < expires_at`. A stale entry is dropped on the way out.
	pub fn get(&self, key: &str) -> Option<V> {
		let mut inner = self.lock();
		let now = Instant::now();
		let expired = match inner.entries.get(key) {
			None => {
				inner.stats.misses += 1;

				return None;
			},
			Some(entry) => now >= entry.expires_at,
		};

		if expired {
			inner.remove(key);
			inner.stats.misses += 1;
			inner.stats.expirations += 1;

			return None;
		}

		let seq = inner.next_seq();
		let entry = inner.entries.get_mut(key)?;

		entry.access_count += 1;
		entry.last_accessed = now;
		entry.access_seq = seq;

		let value = entry.value.clone();

		inner.stats.hits += 1;

		Some(value)
	}

	/// Stores `value` with `ttl` (or the default TTL). Returns false when the value alone is larger
	/// than the whole byte budget and was therefore not stored.
	pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) -> bool {
		let key = key.into();
		let size_bytes = value.estimated_bytes() + key.len() + ENTRY_OVERHEAD_BYTES;

		if size_bytes > self.limits.max_bytes || self.limits.max_entries == 0 {
			tracing::warn!(
				cache_kind = self.kind.as_str(),
				cache_key_prefix = cache_key_prefix(&key),
				payload_size = size_bytes,
				"Cache payload skipped due to size."
			);

			return false;
		}

		let mut inner = self.lock();

		inner.remove(&key);

		while inner.total_bytes + size_bytes > self.limits.max_bytes
			|| inner.entries.len() >= self.limits.max_entries
		{
			if !inner.evict_lru() {
				break;
			}
		}

		let now = Instant::now();
		let ttl = ttl.unwrap_or(self.limits.default_ttl);
		let access_seq = inner.next_seq();

		inner.total_bytes += size_bytes;
		inner.entries.insert(
			key,
			CacheEntry {
				value,
				created_at: now,
				expires_at: now + ttl,
				access_count: 0,
				last_accessed: now,
				size_bytes,
				access_seq,
			},
		);

		true
	}

	pub fn delete(&self, key: &str) -> bool {
		self.lock().remove(key).is_some()
	}

	/// Copy of the entry's bookkeeping without touching its recency.
	pub fn peek(&self, key: &str) -> Option<CacheEntry<V>> {
		self.lock().entries.get(key).cloned()
	}

	pub fn purge_expired(&self) -> usize {
		let mut inner = self.lock();
		let now = Instant::now();
		let expired: Vec<String> = inner
			.entries
			.iter()
			.filter(|(_, entry)| now >= entry.expires_at)
			.map(|(key, _)| key.clone())
			.collect();

		for key in &expired {
			inner.remove(key);
		}

		inner.stats.expirations += expired.len() as u64;

		expired.len()
	}

	pub fn clear(&self) {
		let mut inner = self.lock();

		inner.entries.clear();
		inner.total_bytes = 0;
	}

	pub fn len(&self) -> usize {
		self.lock().entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn stats(&self) -> CacheStats {
		let inner = self.lock();

		CacheStats { entries: inner.entries.len(), bytes: inner.total_bytes, ..inner.stats }
	}

	fn lock(&self) -> MutexGuard<'_, CacheInner<V>> {
		self.inner.lock().unwrap_or_else(PoisonError::into_inner)
	}
}

impl<V> Cache<V>
where
	V: Clone + SizeEstimate + Send + 'static,
{
	/// Periodically drops expired entries. The task ends once the cache itself is dropped.
	pub fn spawn_sweeper(cache: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
		let weak: Weak<Self> = Arc::downgrade(cache);

		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(interval);

			// The first tick completes immediately.
			ticker.tick().await;

			loop {
				ticker.tick().await;

				let Some(cache) = weak.upgrade() else { break };
				let purged = cache.purge_expired();

				if purged > 0 {
					tracing::debug!(cache_kind = cache.kind.as_str(), purged, "Cache sweep.");
				}
			}
		})
	}
}

pub fn hash_cache_key(payload: &Value) -> Result<String> {
	let raw = serde_json::to_vec(payload)
		.map_err(|err| Error::storage(format!("Failed to encode cache key payload: {err}")))?;

	Ok(blake3::hash(&raw).to_hex().to_string())
}

pub fn cache_key_prefix(key: &str) -> &str {
	let len = key.len().min(12);

	&key[..len]
}

pub fn build_sort_cache_key(
	query: &str,
	owner_id: &str,
	hints: &Value,
	image_ids: &[&str],
) -> Result<String> {
	let mut ids: Vec<&str> = image_ids.to_vec();

	ids.sort_unstable();

	let payload = serde_json::json!({
		"kind": CacheKind::SortResult.as_str(),
		"schema_version": SORT_CACHE_SCHEMA_VERSION,
		"query": text::normalize_query(query),
		"owner_id": owner_id,
		"hints": hints,
		"image_ids": ids,
	});

	hash_cache_key(&payload)
}

pub fn build_embedding_cache_key(
	text_value: &str,
	provider_id: &str,
	model: &str,
	dimensions: u32,
) -> Result<String> {
	let payload = serde_json::json!({
		"kind": CacheKind::QueryEmbedding.as_str(),
		"schema_version": EMBEDDING_CACHE_SCHEMA_VERSION,
		"text": text::normalize_query(text_value),
		"provider_id": provider_id,
		"model": model,
		"dimensions": dimensions,
	});

	hash_cache_key(&payload)
}

pub fn build_atlas_cache_key(
	image_ids: &[&str],
	purpose: &str,
	grid_size: u32,
	cell_px: u32,
) -> Result<String> {
	let mut ids: Vec<&str> = image_ids.to_vec();

	ids.sort_unstable();

	let payload = serde_json::json!({
		"kind": CacheKind::Atlas.as_str(),
		"schema_version": ATLAS_CACHE_SCHEMA_VERSION,
		"image_ids": ids,
		"purpose": purpose,
		"grid_size": grid_size,
		"cell_px": cell_px,
	});

	hash_cache_key(&payload)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn limits(max_entries: usize, max_bytes: usize) -> CacheLimits {
		CacheLimits { max_entries, max_bytes, default_ttl: Duration::from_secs(60) }
	}

	#[tokio::test(start_paused = true)]
	async fn value_expires_after_ttl() {
		let cache: Cache<String> = Cache::new(CacheKind::SortResult, limits(8, 4_096));

		cache.set("k", "v".to_string(), Some(Duration::from_secs(10)));
		tokio::time::advance(Duration::from_secs(9)).await;

		assert_eq!(cache.get("k").as_deref(), Some("v"));

		tokio::time::advance(Duration::from_secs(1)).await;

		assert_eq!(cache.get("k"), None);
		assert!(cache.is_empty());
		assert_eq!(cache.stats().expirations, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn entry_limit_evicts_least_recently_accessed() {
		let cache: Cache<String> = Cache::new(CacheKind::SortResult, limits(2, 4_096));

		cache.set("a", "1".to_string(), None);
		tokio::time::advance(Duration::from_millis(5)).await;
		cache.set("b", "2".to_string(), None);
		tokio::time::advance(Duration::from_millis(5)).await;

		assert!(cache.get("a").is_some());

		cache.set("c", "3".to_string(), None);

		assert!(cache.peek("b").is_none());
		assert!(cache.peek("a").is_some());
		assert!(cache.peek("c").is_some());
		assert_eq!(cache.stats().evictions, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn byte_budget_is_never_exceeded() {
		let budget = 3 * (100 + 1 + ENTRY_OVERHEAD_BYTES);
		let cache: Cache<Vec<u8>> = Cache::new(CacheKind::Atlas, limits(100, budget));

		for i in 0..10 {
			cache.set(format!("{i}"), vec![0_u8; 100], None);

			assert!(cache.stats().bytes <= budget);
		}

		assert_eq!(cache.len(), 3);
		assert!(!cache.set("huge", vec![0_u8; budget], None));
		assert!(cache.peek("huge").is_none());
	}

	#[tokio::test(start_paused = true)]
	async fn sweeper_purges_expired_entries() {
		let cache: Arc<Cache<String>> = Arc::new(Cache::new(CacheKind::Atlas, limits(8, 4_096)));
		let handle = Cache::spawn_sweeper(&cache, Duration::from_secs(1));

		cache.set("short", "x".to_string(), Some(Duration::from_millis(500)));
		cache.set("long", "y".to_string(), Some(Duration::from_secs(30)));
		tokio::time::sleep(Duration::from_millis(1_100)).await;

		assert!(cache.peek("short").is_none());
		assert!(cache.peek("long").is_some());

		drop(cache);
		tokio::time::sleep(Duration::from_secs(2)).await;

		assert!(handle.is_finished());
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
	async fn concurrent_get_and_set_keep_bookkeeping_consistent() {
		let cache: Arc<Cache<String>> = Arc::new(Cache::new(CacheKind::SortResult, limits(16, 64 * 1_024)));
		let mut workers = tokio::task::JoinSet::new();

		for worker in 0..8_usize {
			let cache = cache.clone();

			workers.spawn(async move {
				for round in 0..200_usize {
					let key = format!("k{}", (worker * 7 + round) % 32);

					cache.set(key.clone(), format!("value-of-{key}"), None);

					if let Some(value) = cache.get(&key) {
						assert_eq!(value, format!("value-of-{key}"));
					}

					tokio::task::yield_now().await;
				}
			});
		}

		while let Some(joined) = workers.join_next().await {
			joined.expect("Worker panicked.");
		}

		let stats = cache.stats();
		let stored_bytes: usize =
			(0..32).filter_map(|i| cache.peek(&format!("k{i}"))).map(|entry| entry.size_bytes).sum();

		assert!(stats.entries <= 16);
		assert_eq!(stats.bytes, stored_bytes);
		assert_eq!(stats.hits + stats.misses, 8 * 200);
	}

	#[test]
	fn sort_key_ignores_id_order_and_query_case() {
		let hints = serde_json::json!({ "maxResults": 10 });
		let lhs = build_sort_cache_key("Beach  Photos", "u1", &hints, &["b", "a"]).expect("key");
		let rhs = build_sort_cache_key("beach photos", "u1", &hints, &["a", "b"]).expect("key");
		let other_owner =
			build_sort_cache_key("beach photos", "u2", &hints, &["a", "b"]).expect("key");

		assert_eq!(lhs, rhs);
		assert_ne!(lhs, other_owner);
		assert_eq!(cache_key_prefix(&lhs).len(), 12);
	}
}
