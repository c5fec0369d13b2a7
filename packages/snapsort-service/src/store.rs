use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::{BoxFuture, Error, Result};
use snapsort_domain::{AnalysisUpdate, ImageFilters, ImageRecord};

/// Owner-scoped access to the external image catalog. Every call only ever sees or touches images
/// whose `owner_id` matches.
pub trait ImageStore
where
	Self: Send + Sync,
{
	fn get_by_ids<'a>(
		&'a self,
		ids: &'a [String],
		owner_id: &'a str,
	) -> BoxFuture<'a, Result<Vec<ImageRecord>>>;

	fn get_by_owner<'a>(
		&'a self,
		owner_id: &'a str,
		filters: &'a ImageFilters,
	) -> BoxFuture<'a, Result<Vec<ImageRecord>>>;

	fn update_embedding<'a>(
		&'a self,
		id: &'a str,
		embedding: &'a [f32],
		owner_id: &'a str,
	) -> BoxFuture<'a, Result<()>>;

	fn update_analysis<'a>(
		&'a self,
		id: &'a str,
		update: &'a AnalysisUpdate,
		owner_id: &'a str,
	) -> BoxFuture<'a, Result<()>>;
}

/// Insertion-ordered in-memory catalog used by the command-line entry point and by tests.
#[derive(Debug, Default)]
pub struct MemoryImageStore {
	images: Mutex<Vec<ImageRecord>>,
}
impl MemoryImageStore {
	pub fn new(images: Vec<ImageRecord>) -> Self {
		Self { images: Mutex::new(images) }
	}

	/// Adds or replaces an image by id.
	pub fn insert(&self, image: ImageRecord) {
		let mut images = self.lock();

		match images.iter_mut().find(|existing| existing.id == image.id) {
			Some(existing) => *existing = image,
			None => images.push(image),
		}
	}

	pub fn snapshot(&self) -> Vec<ImageRecord> {
		self.lock().clone()
	}

	fn lock(&self) -> MutexGuard<'_, Vec<ImageRecord>> {
		self.images.lock().unwrap_or_else(PoisonError::into_inner)
	}

	fn with_owned_image<F>(&self, id: &str, owner_id: &str, f: F) -> Result<()>
	where
		F: FnOnce(&mut ImageRecord),
	{
		let mut images = self.lock();
		let image = images
			.iter_mut()
			.find(|image| image.id == id && image.owner_id == owner_id)
			.ok_or_else(|| Error::storage(format!("Image {id} not found for owner.")))?;

		f(image);

		Ok(())
	}
}

impl ImageStore for MemoryImageStore {
	fn get_by_ids<'a>(
		&'a self,
		ids: &'a [String],
		owner_id: &'a str,
	) -> BoxFuture<'a, Result<Vec<ImageRecord>>> {
		Box::pin(async move {
			let images = self.lock();

			// Caller order wins; unknown or foreign ids are skipped.
			Ok(ids
				.iter()
				.filter_map(|id| {
					images.iter().find(|image| &image.id == id && image.owner_id == owner_id)
				})
				.cloned()
				.collect())
		})
	}

	fn get_by_owner<'a>(
		&'a self,
		owner_id: &'a str,
		filters: &'a ImageFilters,
	) -> BoxFuture<'a, Result<Vec<ImageRecord>>> {
		Box::pin(async move {
			let images = self.lock();
			let limit = filters.limit.map(|limit| limit as usize).unwrap_or(usize::MAX);

			Ok(images
				.iter()
				.filter(|image| image.owner_id == owner_id && filters.matches(image))
				.take(limit)
				.cloned()
				.collect())
		})
	}

	fn update_embedding<'a>(
		&'a self,
		id: &'a str,
		embedding: &'a [f32],
		owner_id: &'a str,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.with_owned_image(id, owner_id, |image| image.embedding = Some(embedding.to_vec()))
		})
	}

	fn update_analysis<'a>(
		&'a self,
		id: &'a str,
		update: &'a AnalysisUpdate,
		owner_id: &'a str,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			self.with_owned_image(id, owner_id, |image| {
				if let Some(summary) = &update.visual_summary {
					image.visual_summary = Some(summary.clone());
				}

				for tag in &update.tags {
					if !image.tags.iter().any(|existing| existing.eq_ignore_ascii_case(tag)) {
						image.tags.push(tag.clone());
					}
				}

				if let Some(flagged) = update.flagged {
					image.flagged = flagged;
				}
			})
		})
	}
}
