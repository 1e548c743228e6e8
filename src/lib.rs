pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod lifecycle;
pub mod ml;
pub mod physics;
pub mod telemetry;

pub use config::Config;
pub use error::{ErrorKind, ForecastError, Result};
pub use lifecycle::{load, predict, save, train, ModelBundle};
