pub mod engine;
pub mod estimator;
pub mod features;
pub mod metrics;

pub use engine::ForecastGenerator;
pub use estimator::{HorizonStep, PowerEstimator};
pub use features::{FeatureBuilder, FeatureVector, SeriesPoint};
pub use metrics::ForecastMetrics;
