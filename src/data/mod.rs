//! Data preparation: CSV ingestion, resampling and alignment

pub mod loader;
pub mod prepare;

pub use loader::*;
pub use prepare::*;
