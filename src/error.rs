//! Error taxonomy for the forecasting pipeline.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ForecastError>;

/// Coarse error classes used for exit codes and structured reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::AsRefStr)]
pub enum ErrorKind {
    DataError,
    ConfigError,
    VersionMismatchError,
    ComponentUnavailableError,
    IoError,
    SerializationError,
}

impl ErrorKind {
    /// Process exit status reported by the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            ErrorKind::DataError => 2,
            ErrorKind::ConfigError => 3,
            ErrorKind::VersionMismatchError => 4,
            _ => 1,
        }
    }
}

#[derive(Debug, Error)]
pub enum ForecastError {
    #[error("Insufficient data for {stage}: need {required} rows, got {available}")]
    InsufficientData {
        stage: &'static str,
        required: usize,
        available: usize,
    },

    #[error("Missing required column '{column}' in {table} table")]
    MissingColumn { column: String, table: &'static str },

    #[error("Invalid record in {table} table at line {line}: {detail}")]
    InvalidRecord {
        table: &'static str,
        line: u64,
        detail: String,
    },

    #[error("Missing values in {table} table at {}", list_timestamps(.timestamps))]
    MissingValues {
        table: &'static str,
        timestamps: Vec<DateTime<Utc>>,
    },

    #[error("Invalid timestamp '{0}'")]
    InvalidTimestamp(String),

    #[error("Misaligned data: {0}")]
    Misaligned(String),

    #[error("Numerical failure at {timestamp}: {detail}")]
    Numerical {
        timestamp: DateTime<Utc>,
        detail: String,
    },

    #[error("Forecast horizon of {steps} steps exceeds the maximum of {max}")]
    HorizonTooLong { steps: usize, max: usize },

    #[error("No estimator produced a value at {timestamp}")]
    NoEstimate { timestamp: DateTime<Utc> },

    #[error("Model error: {0}")]
    Model(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Model bundle mismatch: {0}")]
    VersionMismatch(String),

    #[error("{component} estimate unavailable at {timestamp}")]
    ComponentUnavailable {
        component: &'static str,
        timestamp: DateTime<Utc>,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),
}

const LISTED_TIMESTAMPS: usize = 5;

fn list_timestamps(timestamps: &[DateTime<Utc>]) -> String {
    let mut out = timestamps
        .iter()
        .take(LISTED_TIMESTAMPS)
        .map(|ts| ts.to_rfc3339())
        .collect::<Vec<_>>()
        .join(", ");
    if timestamps.len() > LISTED_TIMESTAMPS {
        out.push_str(&format!(" and {} more", timestamps.len() - LISTED_TIMESTAMPS));
    }
    out
}

impl ForecastError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ForecastError::InsufficientData { .. }
            | ForecastError::MissingColumn { .. }
            | ForecastError::InvalidRecord { .. }
            | ForecastError::MissingValues { .. }
            | ForecastError::InvalidTimestamp(_)
            | ForecastError::Misaligned(_)
            | ForecastError::Numerical { .. }
            | ForecastError::HorizonTooLong { .. }
            | ForecastError::NoEstimate { .. }
            | ForecastError::Model(_) => ErrorKind::DataError,
            ForecastError::InvalidConfig(_) => ErrorKind::ConfigError,
            ForecastError::VersionMismatch(_) => ErrorKind::VersionMismatchError,
            ForecastError::ComponentUnavailable { .. } => ErrorKind::ComponentUnavailableError,
            ForecastError::Io { .. } => ErrorKind::IoError,
            ForecastError::Serialization(_) => ErrorKind::SerializationError,
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ForecastError::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<validator::ValidationErrors> for ForecastError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ForecastError::InvalidConfig(errors.to_string())
    }
}

impl From<bincode::Error> for ForecastError {
    fn from(error: bincode::Error) -> Self {
        ForecastError::Serialization(error.to_string())
    }
}

impl From<serde_json::Error> for ForecastError {
    fn from(error: serde_json::Error) -> Self {
        ForecastError::Serialization(error.to_string())
    }
}

/// Error description printed by the CLI on failure
#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ForecastError> for ErrorReport {
    fn from(error: &ForecastError) -> Self {
        Self {
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}
