//! Learned models
//!
//! - [`sequence`]: autoregressive next-step predictor over feature windows
//! - [`blend`]: per-daypart non-negative reconciliation of physics and sequence
//! - [`mlp`], [`smartcore`]: the regressors a sequence predictor can wrap
//! - [`scaler`]: z-score statistics fitted on the training split

pub mod blend;
pub mod mlp;
pub mod scaler;
pub mod sequence;

#[cfg(feature = "forest")]
pub mod smartcore;

pub use blend::{BlendModelArtifact, BlendWeights};
pub use mlp::{MlpRegressor, TrainingHistory};
pub use scaler::FittedScaler;
pub use sequence::{SequenceModel, SequenceModelArtifact, SequencePredictor, SequenceValidation};
