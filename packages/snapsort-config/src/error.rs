pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Failed to read config file at {path:?}.")]
	ReadConfig { path: std::path::PathBuf, source: std::io::Error },
	#[error("Failed to parse config file at {path:?}.")]
	ParseConfig { path: std::path::PathBuf, source: toml::de::Error },
	#[error("{key} references environment variable {var}, which is not set.")]
	MissingEnv { key: String, var: String },
	#[error("{key} {message}")]
	Validation { key: String, message: String },
}
impl Error {
	pub(crate) fn validation(key: impl Into<String>, message: impl Into<String>) -> Self {
		Self::Validation { key: key.into(), message: message.into() }
	}
}
