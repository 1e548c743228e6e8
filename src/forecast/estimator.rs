use super::features::SeriesPoint;
use crate::config::EstimatorKind;
use crate::domain::WeatherRecord;
use crate::error::Result;
use crate::ml::SequencePredictor;
use crate::physics::PhysicsEstimator;

/// One future step of the forecast grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizonStep {
    pub weather: WeatherRecord,
    /// False when the weather forecast had no value for this step and the
    /// previous step's weather was carried forward
    pub observed: bool,
}

/// A source of power estimates over a forecast horizon
///
/// `None` marks a step the estimator could not produce a value for. Errors
/// abort the whole forecast.
pub trait PowerEstimator {
    fn kind(&self) -> EstimatorKind;

    fn estimate_horizon(
        &self,
        history: &[SeriesPoint],
        horizon: &[HorizonStep],
    ) -> Result<Vec<Option<f64>>>;
}

impl PowerEstimator for PhysicsEstimator {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Physics
    }

    fn estimate_horizon(
        &self,
        _history: &[SeriesPoint],
        horizon: &[HorizonStep],
    ) -> Result<Vec<Option<f64>>> {
        horizon
            .iter()
            .map(|step| {
                if !step.observed {
                    return Ok(None);
                }
                self.estimate(&step.weather)
                    .map(|estimate| Some(estimate.estimated_ac_power))
            })
            .collect()
    }
}

impl PowerEstimator for SequencePredictor {
    fn kind(&self) -> EstimatorKind {
        EstimatorKind::Sequence
    }

    fn estimate_horizon(
        &self,
        history: &[SeriesPoint],
        horizon: &[HorizonStep],
    ) -> Result<Vec<Option<f64>>> {
        let future: Vec<WeatherRecord> = horizon.iter().map(|s| s.weather).collect();
        Ok(self.rollout(history, &future)?.into_iter().map(Some).collect())
    }
}
