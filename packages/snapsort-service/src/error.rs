pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Provider error: {message}")]
	Provider { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
	#[error("Image error: {message}")]
	Image { message: String },
	#[error("Budget exhausted: {message}")]
	Exhausted { message: String },
	#[error("Timed out: {message}")]
	Timeout { message: String },
	#[error("Sort was cancelled.")]
	Cancelled,
}
impl Error {
	pub fn invalid_request(message: impl Into<String>) -> Self {
		Self::InvalidRequest { message: message.into() }
	}

	pub fn storage(message: impl Into<String>) -> Self {
		Self::Storage { message: message.into() }
	}

	/// Failures worth trying a cheaper strategy for. Contract violations and cancellation are not.
	pub fn is_recoverable(&self) -> bool {
		!matches!(self, Self::InvalidRequest { .. } | Self::Cancelled)
	}
}

impl From<snapsort_providers::Error> for Error {
	fn from(err: snapsort_providers::Error) -> Self {
		Self::Provider { message: err.to_string() }
	}
}

impl From<image::ImageError> for Error {
	fn from(err: image::ImageError) -> Self {
		Self::Image { message: err.to_string() }
	}
}

impl From<tokio::task::JoinError> for Error {
	fn from(err: tokio::task::JoinError) -> Self {
		if err.is_cancelled() {
			return Self::Cancelled;
		}

		Self::Storage { message: format!("Background task failed: {err}") }
	}
}
