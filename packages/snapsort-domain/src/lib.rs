pub mod image;
pub mod ranked;
pub mod request;
pub mod source;
pub mod strategy;
pub mod text;

pub use image::{
	AnalysisUpdate, DetectedLabel, GeoPoint, ImageFilters, ImageMetadata, ImageRecord,
	ObjectDetection, QualityAnalysis, SceneAnalysis,
};
pub use ranked::{FactorScores, RankedResult};
pub use request::{
	ResultMetadata, SortCriterion, SortOptions, SortRequest, SortResponse, SortResultItem,
	UserContext,
};
pub use source::{
	ContentSource, EmbeddingSignal, LabelItem, MetadataSignal, SourcePayload, VisualSignal,
};
pub use strategy::{ExecutionStrategy, SortType, TimeOrder};
