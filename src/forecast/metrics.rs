//! Forecast accuracy metrics
//!
//! PV output is zero for a large share of every day, so percentage errors are
//! only taken over daylight samples.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ForecastError;

/// Samples with actual power at or below this are excluded from MAPE (W)
const MAPE_FLOOR_W: f64 = 1.0;

/// Forecast accuracy metrics
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastMetrics {
    /// Mean Absolute Error
    pub mae: f64,
    /// Root Mean Square Error
    pub rmse: f64,
    /// Mean Absolute Percentage Error over daylight samples (%)
    pub mape: f64,
    /// R² (coefficient of determination)
    pub r2: f64,
    /// Mean of predicted minus actual
    pub bias: f64,
    /// Largest absolute error
    pub max_error: f64,
    pub sample_count: usize,
}

impl ForecastMetrics {
    /// Calculate metrics from actual and predicted values
    pub fn calculate(actual: &[f64], predicted: &[f64]) -> Result<Self, ForecastMetricsError> {
        if actual.len() != predicted.len() {
            return Err(ForecastMetricsError::DimensionMismatch {
                actual: actual.len(),
                predicted: predicted.len(),
            });
        }
        if actual.is_empty() {
            return Err(ForecastMetricsError::EmptyData);
        }

        let n = actual.len() as f64;
        let errors: Vec<f64> = predicted.iter().zip(actual).map(|(p, a)| p - a).collect();

        let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / n;
        let sse: f64 = errors.iter().map(|e| e * e).sum();
        let rmse = (sse / n).sqrt();
        let bias = errors.iter().sum::<f64>() / n;
        let max_error = errors.iter().map(|e| e.abs()).fold(0.0f64, f64::max);

        let daylight: Vec<f64> = actual
            .iter()
            .zip(&errors)
            .filter(|(a, _)| **a > MAPE_FLOOR_W)
            .map(|(a, e)| e.abs() / a * 100.0)
            .collect();
        let mape = if daylight.is_empty() {
            0.0
        } else {
            daylight.iter().sum::<f64>() / daylight.len() as f64
        };

        let mean_actual = actual.iter().sum::<f64>() / n;
        let total_variance: f64 = actual.iter().map(|a| (a - mean_actual).powi(2)).sum();
        let r2 = if total_variance > 1e-10 {
            1.0 - sse / total_variance
        } else {
            0.0
        };

        Ok(Self {
            mae,
            rmse,
            mape,
            r2,
            bias,
            max_error,
            sample_count: actual.len(),
        })
    }

    /// Fractional RMSE improvement over a reference forecast (1.0 is perfect)
    pub fn skill_against(&self, reference: &ForecastMetrics) -> f64 {
        if reference.rmse <= 0.0 {
            return 0.0;
        }
        1.0 - self.rmse / reference.rmse
    }
}

impl fmt::Display for ForecastMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MAE={:.2}W, RMSE={:.2}W, MAPE={:.2}%, R²={:.3}, n={}",
            self.mae, self.rmse, self.mape, self.r2, self.sample_count
        )
    }
}

/// Forecast metrics calculation errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ForecastMetricsError {
    #[error("Dimension mismatch: actual={actual}, predicted={predicted}")]
    DimensionMismatch { actual: usize, predicted: usize },

    #[error("Empty data provided")]
    EmptyData,
}

impl From<ForecastMetricsError> for ForecastError {
    fn from(error: ForecastMetricsError) -> Self {
        match error {
            ForecastMetricsError::DimensionMismatch { .. } => {
                ForecastError::Misaligned(error.to_string())
            }
            ForecastMetricsError::EmptyData => ForecastError::InsufficientData {
                stage: "evaluation",
                required: 1,
                available: 0,
            },
        }
    }
}
