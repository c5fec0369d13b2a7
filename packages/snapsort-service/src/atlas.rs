//! Packs up to nine images into one labeled grid so a single visual-analysis call can judge all of
//! them, and maps the model's per-position answers back to image ids.

mod glyphs;

use std::{io::Cursor, sync::Arc, time::Duration};

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage, imageops::{self, FilterType}};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::task::JoinSet;

use crate::{
	Error, ObjectStore, Result, SizeEstimate, VisionFinding, VisionProvider, VisionRequest,
	cache::{self, Cache, CacheKind, CacheLimits},
};
use snapsort_config::{Config, ObjectStoreConfig, VisionProviderConfig};
use snapsort_domain::ImageRecord;

/// Hard ceiling regardless of configured grid size.
pub const MAX_ATLAS_IMAGES: usize = 9;
pub const ATLAS_CONTENT_TYPE: &str = "image/png";

const ROW_LETTERS: [char; 3] = ['A', 'B', 'C'];
const PLACEHOLDER: Rgba<u8> = Rgba([204, 204, 204, 255]);
const BACKGROUND: Rgba<u8> = Rgba([255, 255, 255, 255]);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBounds {
	pub x: u32,
	pub y: u32,
	pub width: u32,
	pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtlasPosition {
	pub label: String,
	pub image_id: String,
	pub row: u32,
	pub col: u32,
	pub bounds: PixelBounds,
}

#[derive(Debug, Clone)]
pub struct Atlas {
	pub key: String,
	pub purpose: String,
	pub grid_size: u32,
	pub cell_px: u32,
	pub positions: Vec<AtlasPosition>,
	/// PNG-encoded composite.
	pub png: Arc<Vec<u8>>,
	/// Images whose source could not be fetched or decoded and were drawn as placeholders.
	pub placeholders: Vec<String>,
	pub created_at: OffsetDateTime,
}
impl Atlas {
	pub fn labels(&self) -> Vec<String> {
		self.positions.iter().map(|position| position.label.clone()).collect()
	}

	pub fn image_for(&self, label: &str) -> Option<&str> {
		let label = label.trim();

		self.positions
			.iter()
			.find(|position| position.label.eq_ignore_ascii_case(label))
			.map(|position| position.image_id.as_str())
	}
}
impl SizeEstimate for Atlas {
	fn estimated_bytes(&self) -> usize {
		self.png.len() + self.positions.len() * 96
	}
}

/// A visual finding rejoined to the image it describes.
#[derive(Debug, Clone, PartialEq)]
pub struct AtlasFinding {
	pub image_id: String,
	pub finding: VisionFinding,
}

/// Row letter plus 1-based column, e.g. index 4 in a 3x3 grid is `B2`.
pub fn position_label(index: usize, grid_size: u32) -> String {
	let grid = grid_size.max(1) as usize;
	let row = index / grid;
	let col = index % grid;
	let letter = ROW_LETTERS.get(row).copied().unwrap_or('?');

	format!("{letter}{}", col + 1)
}

/// Lays `image_ids` out row by row. Empty input and more images than the grid holds are rejected.
pub fn plan_positions(image_ids: &[&str], grid_size: u32, cell_px: u32) -> Result<Vec<AtlasPosition>> {
	if !(1..=3).contains(&grid_size) {
		return Err(Error::invalid_request(format!("Atlas grid size {grid_size} is out of range.")));
	}

	let capacity = (grid_size * grid_size) as usize;

	if image_ids.is_empty() {
		return Err(Error::invalid_request("An atlas needs at least one image."));
	}
	if image_ids.len() > capacity.min(MAX_ATLAS_IMAGES) {
		return Err(Error::invalid_request(format!(
			"An atlas holds at most {} images, got {}.",
			capacity.min(MAX_ATLAS_IMAGES),
			image_ids.len()
		)));
	}

	Ok(image_ids
		.iter()
		.enumerate()
		.map(|(index, id)| {
			let row = index as u32 / grid_size;
			let col = index as u32 % grid_size;

			AtlasPosition {
				label: position_label(index, grid_size),
				image_id: (*id).to_string(),
				row,
				col,
				bounds: PixelBounds { x: col * cell_px, y: row * cell_px, width: cell_px, height: cell_px },
			}
		})
		.collect())
}

/// Draws the grid and encodes it as PNG. `sources[i]` belongs to `positions[i]`; a missing or
/// undecodable source becomes a placeholder tile. Returns the PNG bytes and the ids drawn as
/// placeholders.
pub fn compose(
	positions: &[AtlasPosition],
	sources: &[Option<Vec<u8>>],
	grid_size: u32,
	cell_px: u32,
) -> Result<(Vec<u8>, Vec<String>)> {
	let side = grid_size * cell_px;
	let mut canvas = RgbaImage::from_pixel(side, side, BACKGROUND);
	let mut placeholders = Vec::new();
	let label_scale = (cell_px / 64).max(1);

	for (index, position) in positions.iter().enumerate() {
		let decoded = sources.get(index).and_then(Option::as_deref).and_then(|bytes| {
			match image::load_from_memory(bytes) {
				Ok(img) => Some(img),
				Err(err) => {
					tracing::warn!(error = %err, image_id = %position.image_id, "Atlas source is not a decodable image.");

					None
				},
			}
		});
		let bounds = position.bounds;

		match decoded {
			Some(img) => draw_tile(&mut canvas, &img, bounds),
			None => {
				glyphs::fill_rect(&mut canvas, bounds.x, bounds.y, bounds.width, bounds.height, PLACEHOLDER);
				placeholders.push(position.image_id.clone());
			},
		}

		glyphs::draw_label(&mut canvas, &position.label, bounds.x, bounds.y, label_scale);
	}

	let mut out = Cursor::new(Vec::new());

	DynamicImage::ImageRgba8(canvas).write_to(&mut out, ImageFormat::Png)?;

	Ok((out.into_inner(), placeholders))
}

// Fits the image inside its cell keeping the aspect ratio, centered.
fn draw_tile(canvas: &mut RgbaImage, img: &DynamicImage, bounds: PixelBounds) {
	let tile = img.resize(bounds.width, bounds.height, FilterType::Triangle).to_rgba8();
	let x = bounds.x + (bounds.width.saturating_sub(tile.width())) / 2;
	let y = bounds.y + (bounds.height.saturating_sub(tile.height())) / 2;

	imageops::overlay(canvas, &tile, i64::from(x), i64::from(y));
}

pub struct AtlasPacker {
	grid_size: u32,
	cell_px: u32,
	ttl: Duration,
	object_store_cfg: Arc<ObjectStoreConfig>,
	object_store: Arc<dyn ObjectStore>,
	vision_cfg: Arc<VisionProviderConfig>,
	vision: Arc<dyn VisionProvider>,
	cache: Arc<Cache<Arc<Atlas>>>,
}
impl AtlasPacker {
	pub fn new(
		cfg: &Config,
		object_store: Arc<dyn ObjectStore>,
		vision: Arc<dyn VisionProvider>,
	) -> Self {
		let ttl = Duration::from_secs(cfg.atlas.ttl_secs);
		let limits = CacheLimits {
			max_entries: cfg.atlas.max_entries as usize,
			max_bytes: cfg.atlas.max_bytes as usize,
			default_ttl: ttl,
		};

		Self {
			grid_size: cfg.atlas.grid_size,
			cell_px: cfg.atlas.cell_px,
			ttl,
			object_store_cfg: Arc::new(cfg.providers.object_store.clone()),
			object_store,
			vision_cfg: Arc::new(cfg.providers.vision.clone()),
			vision,
			cache: Arc::new(Cache::new(CacheKind::Atlas, limits)),
		}
	}

	/// Images one atlas can carry.
	pub fn capacity(&self) -> usize {
		((self.grid_size * self.grid_size) as usize).min(MAX_ATLAS_IMAGES)
	}

	pub fn cache(&self) -> &Arc<Cache<Arc<Atlas>>> {
		&self.cache
	}

	/// Builds (or reuses) the atlas for `images`. The cache key depends on the set of ids and the
	/// purpose tag, not on their order.
	pub async fn pack(&self, images: &[ImageRecord], purpose: &str) -> Result<Arc<Atlas>> {
		let ids: Vec<&str> = images.iter().map(|image| image.id.as_str()).collect();
		let positions = plan_positions(&ids, self.grid_size, self.cell_px)?;
		let key = cache::build_atlas_cache_key(&ids, purpose, self.grid_size, self.cell_px)?;

		if let Some(atlas) = self.cache.get(&key) {
			tracing::debug!(
				cache_kind = CacheKind::Atlas.as_str(),
				cache_key_prefix = cache::cache_key_prefix(&key),
				hit = true,
				"Cache hit."
			);

			return Ok(atlas);
		}

		let sources = self.fetch_sources(images).await;
		let grid_size = self.grid_size;
		let cell_px = self.cell_px;
		let (png, placeholders) = tokio::task::spawn_blocking({
			let positions = positions.clone();

			move || compose(&positions, &sources, grid_size, cell_px)
		})
		.await??;
		let atlas = Arc::new(Atlas {
			key: key.clone(),
			purpose: purpose.to_string(),
			grid_size,
			cell_px,
			positions,
			png: Arc::new(png),
			placeholders,
			created_at: OffsetDateTime::now_utc(),
		});

		if !self.cache.set(key.clone(), atlas.clone(), Some(self.ttl)) {
			tracing::debug!(cache_key_prefix = cache::cache_key_prefix(&key), "Atlas not cached.");
		}

		Ok(atlas)
	}

	/// Drops a cached atlas so the next `pack` recomposes it.
	pub fn invalidate(&self, image_ids: &[&str], purpose: &str) -> bool {
		match cache::build_atlas_cache_key(image_ids, purpose, self.grid_size, self.cell_px) {
			Ok(key) => self.cache.delete(&key),
			Err(err) => {
				tracing::warn!(error = %err, cache_kind = CacheKind::Atlas.as_str(), "Cache key build failed.");

				false
			},
		}
	}

	/// Uploads the composite, asks the vision model about it and rejoins the answers by label.
	/// The uploaded object is removed afterwards whether or not the analysis succeeded.
	pub async fn analyze(&self, atlas: &Atlas, query: &str) -> Result<Vec<AtlasFinding>> {
		let name = format!("atlases/{}-{}.png", cache::cache_key_prefix(&atlas.key), uuid::Uuid::new_v4());
		let url = self
			.object_store
			.upload(&self.object_store_cfg, &name, atlas.png.as_ref().clone(), ATLAS_CONTENT_TYPE)
			.await?;
		let req = VisionRequest {
			image_url: url,
			labels: atlas.labels(),
			query: query.to_string(),
			grid_size: atlas.grid_size,
		};
		let result = self.vision.analyze(&self.vision_cfg, &req).await;

		if let Err(err) = self.object_store.delete(&self.object_store_cfg, &name).await {
			tracing::warn!(error = %err, object = %name, "Atlas cleanup failed.");
		}

		let findings = result?;

		Ok(findings
			.into_iter()
			.filter_map(|finding| {
				let image_id = atlas.image_for(&finding.position)?.to_string();

				Some(AtlasFinding { image_id, finding })
			})
			.collect())
	}

	async fn fetch_sources(&self, images: &[ImageRecord]) -> Vec<Option<Vec<u8>>> {
		let mut tasks = JoinSet::new();

		for (index, image) in images.iter().enumerate() {
			let store = self.object_store.clone();
			let cfg = self.object_store_cfg.clone();
			let location = image.location.clone();
			let image_id = image.id.clone();

			tasks.spawn(async move {
				match store.download(&cfg, &location).await {
					Ok(bytes) => (index, Some(bytes)),
					Err(err) => {
						tracing::warn!(error = %err, image_id = %image_id, "Atlas source download failed.");

						(index, None)
					},
				}
			});
		}

		let mut sources = vec![None; images.len()];

		while let Some(joined) = tasks.join_next().await {
			match joined {
				Ok((index, bytes)) => sources[index] = bytes,
				Err(err) => tracing::warn!(error = %err, "Atlas source task failed."),
			}
		}

		sources
	}
}
