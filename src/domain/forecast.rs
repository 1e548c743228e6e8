use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ForecastError;

/// Physics-only power estimate for one timestamp
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsEstimate {
    pub timestamp: DateTime<Utc>,
    /// Estimated AC power (W)
    pub estimated_ac_power: f64,
}

/// Which component the blend had to do without
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Degradation {
    PhysicsUnavailable,
    SequenceUnavailable,
}

impl Degradation {
    /// Name of the missing component
    pub fn component(&self) -> &'static str {
        match self {
            Degradation::PhysicsUnavailable => "physics",
            Degradation::SequenceUnavailable => "sequence",
        }
    }
}

/// One step of a power forecast
///
/// Both components are retained so consumers can audit disagreement between
/// the physics and sequence models.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub timestamp: DateTime<Utc>,
    /// Reconciled power estimate (W)
    pub predicted_power: f64,
    pub physics_component: Option<f64>,
    pub sequence_component: Option<f64>,
    pub degradation: Option<Degradation>,
}

impl ForecastResult {
    pub fn is_degraded(&self) -> bool {
        self.degradation.is_some()
    }

    /// Absolute difference between the two components, if both exist
    pub fn component_disagreement(&self) -> Option<f64> {
        match (self.physics_component, self.sequence_component) {
            (Some(p), Some(s)) => Some((p - s).abs()),
            _ => None,
        }
    }

    /// The missing component as an error, for degraded steps
    pub fn unavailable_component(&self) -> Option<ForecastError> {
        self.degradation.map(|d| ForecastError::ComponentUnavailable {
            component: d.component(),
            timestamp: self.timestamp,
        })
    }
}
