use chrono::Duration;
use tracing::{info, warn};

use super::estimator::{HorizonStep, PowerEstimator};
use super::features::SeriesPoint;
use crate::config::EstimatorKind;
use crate::domain::{ForecastResult, WeatherRecord};
use crate::error::{ForecastError, Result};
use crate::ml::BlendModelArtifact;

/// End-to-end inference over a future horizon
///
/// Runs every registered estimator over the same horizon and reconciles the
/// results step by step with the blend.
pub struct ForecastGenerator<'a> {
    estimators: Vec<&'a dyn PowerEstimator>,
    blend: &'a BlendModelArtifact,
    cadence: Duration,
    max_horizon_steps: usize,
}

impl<'a> ForecastGenerator<'a> {
    pub fn new(blend: &'a BlendModelArtifact, cadence: Duration, max_horizon_steps: usize) -> Self {
        Self {
            estimators: Vec::new(),
            blend,
            cadence,
            max_horizon_steps,
        }
    }

    pub fn with_estimator(mut self, estimator: &'a dyn PowerEstimator) -> Self {
        self.estimators.push(estimator);
        self
    }

    /// Regular grid from the step after `history` to the last forecast timestamp
    ///
    /// Steps without a forecast value reuse the weather of the previous step.
    pub fn horizon(&self, history: &[SeriesPoint], weather: &[WeatherRecord]) -> Result<Vec<HorizonStep>> {
        let last = history.last().ok_or(ForecastError::InsufficientData {
            stage: "forecast history",
            required: 1,
            available: 0,
        })?;
        let end = weather
            .iter()
            .map(|w| w.timestamp)
            .max()
            .filter(|&end| end > last.timestamp)
            .ok_or(ForecastError::InsufficientData {
                stage: "weather forecast",
                required: 1,
                available: 0,
            })?;

        let cadence_secs = self.cadence.num_seconds().max(1);
        let steps = ((end - last.timestamp).num_seconds() / cadence_secs) as usize;
        if steps > self.max_horizon_steps {
            return Err(ForecastError::HorizonTooLong {
                steps,
                max: self.max_horizon_steps,
            });
        }

        let mut sorted = weather.to_vec();
        sorted.sort_by_key(|w| w.timestamp);
        let mut cursor = sorted.iter().peekable();
        let mut carried = last.weather();
        let mut horizon = Vec::with_capacity(steps);

        for k in 1..=steps {
            let timestamp = last.timestamp + self.cadence * k as i32;
            while let Some(w) = cursor.next_if(|w| w.timestamp < timestamp) {
                carried = *w;
            }
            match cursor.next_if(|w| w.timestamp == timestamp) {
                Some(w) => {
                    carried = *w;
                    horizon.push(HorizonStep {
                        weather: *w,
                        observed: true,
                    });
                }
                None => {
                    warn!(%timestamp, "no weather forecast for step; carrying previous weather forward");
                    horizon.push(HorizonStep {
                        weather: WeatherRecord {
                            timestamp,
                            ..carried
                        },
                        observed: false,
                    });
                }
            }
        }
        Ok(horizon)
    }

    pub fn generate(&self, history: &[SeriesPoint], weather: &[WeatherRecord]) -> Result<Vec<ForecastResult>> {
        let horizon = self.horizon(history, weather)?;
        let mut physics = vec![None; horizon.len()];
        let mut sequence = vec![None; horizon.len()];

        for estimator in &self.estimators {
            let values = estimator.estimate_horizon(history, &horizon)?;
            let slot = match estimator.kind() {
                EstimatorKind::Physics => &mut physics,
                EstimatorKind::Sequence => &mut sequence,
            };
            for (dst, value) in slot.iter_mut().zip(values) {
                *dst = value;
            }
        }

        let results = horizon
            .iter()
            .zip(physics.into_iter().zip(sequence))
            .map(|(step, (p, s))| self.blend.combine(step.weather.timestamp, p, s))
            .collect::<Result<Vec<_>>>()?;

        info!(
            steps = results.len(),
            degraded = results.iter().filter(|r| r.is_degraded()).count(),
            "forecast generated"
        );
        Ok(results)
    }
}
