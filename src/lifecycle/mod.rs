//! Training, persistence and inference over a model bundle

pub mod bundle;
pub mod pipeline;

pub use bundle::{BundleMetadata, ModelBundle, TrainingMetrics, BUNDLE_FORMAT_VERSION};
pub use pipeline::{load, predict, save, train};
