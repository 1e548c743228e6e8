//! Next-step power predictor over a window of feature vectors
//!
//! A sample for target step `t+1` is the `W` contiguous feature vectors ending
//! at `t`, flattened and scaled, followed by the exogenous inputs of `t+1`
//! (calendar encodings and forecast weather). The target is `ac_power(t+1)`.
//!
//! Multi-step forecasts roll the model forward: each prediction is appended
//! to the history together with that step's weather, and the next window is
//! rebuilt with the same [`FeatureBuilder`]. Errors compound with the horizon.

use chrono::{DateTime, Duration, Utc};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::mlp::{MlpRegressor, TrainingHistory};
use super::scaler::FittedScaler;
#[cfg(feature = "forest")]
use super::smartcore::ForestRegressor;
use crate::config::{SequenceConfig, SequenceKind};
use crate::domain::WeatherRecord;
use crate::error::{ForecastError, Result};
use crate::forecast::features::{
    exogenous_features, FeatureBuilder, FeatureVector, SeriesPoint, EXOGENOUS_FEATURES,
};

/// Fewest samples a sequence model is trained on
pub const MIN_SEQUENCE_SAMPLES: usize = 10;

/// Learned parameters, one variant per model kind
#[derive(Debug, Serialize, Deserialize)]
pub enum SequenceModel {
    Mlp(MlpRegressor),
    #[cfg(feature = "forest")]
    RandomForest(ForestRegressor),
}

impl SequenceModel {
    pub fn kind(&self) -> SequenceKind {
        match self {
            SequenceModel::Mlp(_) => SequenceKind::Mlp,
            #[cfg(feature = "forest")]
            SequenceModel::RandomForest(_) => SequenceKind::RandomForest,
        }
    }

    pub fn input_width(&self) -> usize {
        match self {
            SequenceModel::Mlp(m) => m.input_width(),
            #[cfg(feature = "forest")]
            SequenceModel::RandomForest(f) => f.input_width(),
        }
    }

    /// Prediction in scaled target units
    pub fn predict_scaled(&self, input: ArrayView1<f64>) -> Result<f64> {
        match self {
            SequenceModel::Mlp(m) => Ok(m.predict_one(input)),
            #[cfg(feature = "forest")]
            SequenceModel::RandomForest(f) => f.predict_one(input),
        }
    }
}

/// Immutable sequence model as persisted in a bundle
#[derive(Debug, Serialize, Deserialize)]
pub struct SequenceModelArtifact {
    /// Feature vectors per sample (W)
    pub window: usize,
    /// Width of one feature vector at training time
    pub feature_width: usize,
    pub model: SequenceModel,
}

/// One supervised example, referencing the feature table by position
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceSample {
    /// Index of step `t` in the point series
    pub end: usize,
    /// Timestamp of the target step `t+1`
    pub timestamp: DateTime<Utc>,
    pub weather: WeatherRecord,
    pub target: f64,
    /// `ac_power(t)`, the repeat-last-value forecast of the target
    pub last_observed: f64,
}

/// Out-of-sample predictions on the chronological validation split
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequenceValidation {
    pub timestamps: Vec<DateTime<Utc>>,
    pub weather: Vec<WeatherRecord>,
    pub targets: Vec<f64>,
    pub predictions: Vec<f64>,
    pub last_observed: Vec<f64>,
    pub training_samples: usize,
    pub history: Option<TrainingHistory>,
}

/// Feature vectors at each point, `None` where history is incomplete
pub fn feature_table(points: &[SeriesPoint], builder: &FeatureBuilder) -> Vec<Option<FeatureVector>> {
    (0..points.len()).map(|i| builder.build_at(points, i)).collect()
}

/// The `window` feature vectors ending at `end`, if all present and contiguous
fn window_at<'a>(
    table: &'a [Option<FeatureVector>],
    points: &[SeriesPoint],
    end: usize,
    window: usize,
    cadence: Duration,
) -> Option<Vec<&'a FeatureVector>> {
    if end + 1 < window || end >= points.len() {
        return None;
    }
    let start = end + 1 - window;
    if points[end].timestamp - points[start].timestamp != cadence * (window as i32 - 1) {
        return None;
    }
    table[start..=end].iter().map(Option::as_ref).collect()
}

/// Every sample whose window and target step are present
pub fn build_samples(
    points: &[SeriesPoint],
    table: &[Option<FeatureVector>],
    builder: &FeatureBuilder,
    window: usize,
) -> Vec<SequenceSample> {
    let cadence = builder.cadence();
    (0..points.len().saturating_sub(1))
        .filter(|&end| points[end + 1].timestamp - points[end].timestamp == cadence)
        .filter(|&end| window_at(table, points, end, window, cadence).is_some())
        .map(|end| SequenceSample {
            end,
            timestamp: points[end + 1].timestamp,
            weather: points[end + 1].weather(),
            target: points[end + 1].ac_power,
            last_observed: points[end].ac_power,
        })
        .collect()
}

fn assemble_input(
    scaler: &FittedScaler,
    builder: &FeatureBuilder,
    window: &[&FeatureVector],
    next: &WeatherRecord,
) -> Result<Vec<f64>> {
    let mut input = Vec::with_capacity(window.len() * builder.width() + EXOGENOUS_FEATURES);
    for fv in window {
        scaler.transform_into(&fv.values, &mut input)?;
    }
    scaler.transform_columns_into(&exogenous_features(next), &builder.exogenous_columns(), &mut input);
    Ok(input)
}

/// Number of rows at the end of `points` that form an unbroken cadence run
fn trailing_run(points: &[SeriesPoint], cadence: Duration) -> usize {
    if points.is_empty() {
        return 0;
    }
    let mut run = 1;
    for pair in points.windows(2).rev() {
        if pair[1].timestamp - pair[0].timestamp != cadence {
            break;
        }
        run += 1;
    }
    run
}

/// Fitted sequence model with the scaler and feature builder it was trained with
#[derive(Debug)]
pub struct SequencePredictor {
    artifact: SequenceModelArtifact,
    scaler: FittedScaler,
    builder: FeatureBuilder,
}

impl SequencePredictor {
    /// Reassemble a predictor, checking that the parts fit together
    pub fn new(
        artifact: SequenceModelArtifact,
        scaler: FittedScaler,
        builder: FeatureBuilder,
    ) -> Result<Self> {
        let width = builder.width();
        if scaler.width() != width || artifact.feature_width != width {
            return Err(ForecastError::VersionMismatch(format!(
                "feature width {} does not match scaler ({}) or model ({})",
                width,
                scaler.width(),
                artifact.feature_width
            )));
        }
        let expected = artifact.window * width + EXOGENOUS_FEATURES;
        if artifact.model.input_width() != expected {
            return Err(ForecastError::VersionMismatch(format!(
                "sequence model expects {} inputs, features provide {}",
                artifact.model.input_width(),
                expected
            )));
        }
        Ok(Self {
            artifact,
            scaler,
            builder,
        })
    }

    pub fn artifact(&self) -> &SequenceModelArtifact {
        &self.artifact
    }

    pub fn scaler(&self) -> &FittedScaler {
        &self.scaler
    }

    pub fn builder(&self) -> &FeatureBuilder {
        &self.builder
    }

    pub fn window(&self) -> usize {
        self.artifact.window
    }

    pub fn kind(&self) -> SequenceKind {
        self.artifact.model.kind()
    }

    /// Contiguous history rows needed for one prediction
    pub fn required_history(&self) -> usize {
        self.artifact.window + self.builder.warmup()
    }

    fn predict_input(&self, input: Vec<f64>) -> Result<f64> {
        let input = Array1::from_vec(input);
        let scaled = self.artifact.model.predict_scaled(input.view())?;
        Ok(self.scaler.unscale_target(scaled).max(0.0))
    }

    /// Train on a grid-aligned series
    pub fn fit(
        points: &[SeriesPoint],
        builder: FeatureBuilder,
        config: &SequenceConfig,
    ) -> Result<(Self, SequenceValidation)> {
        let table = feature_table(points, &builder);
        let samples = build_samples(points, &table, &builder, config.window);
        if samples.len() < MIN_SEQUENCE_SAMPLES {
            return Err(ForecastError::InsufficientData {
                stage: "sequence training",
                required: MIN_SEQUENCE_SAMPLES,
                available: samples.len(),
            });
        }

        let n_val = ((samples.len() as f64 * config.validation_split).round() as usize)
            .clamp(1, samples.len() - 1);
        let n_train = samples.len() - n_val;
        let (train, val) = samples.split_at(n_train);

        let train_rows: Vec<&[f64]> = train
            .iter()
            .filter_map(|s| table[s.end].as_ref())
            .map(|fv| fv.values.as_slice())
            .collect();
        let train_targets: Vec<f64> = train.iter().map(|s| s.target).collect();
        let scaler = FittedScaler::fit(&train_rows, &train_targets)?;

        let input_width = config.window * builder.width() + EXOGENOUS_FEATURES;
        let design = |set: &[SequenceSample]| -> Result<(Array2<f64>, Array1<f64>)> {
            let mut flat = Vec::with_capacity(set.len() * input_width);
            for sample in set {
                let window = window_at(&table, points, sample.end, config.window, builder.cadence())
                    .ok_or_else(|| ForecastError::Misaligned(format!("window ending at sample {} is incomplete", sample.end)))?;
                flat.extend(assemble_input(&scaler, &builder, &window, &sample.weather)?);
            }
            let x = Array2::from_shape_vec((set.len(), input_width), flat)
                .map_err(|e| ForecastError::Misaligned(e.to_string()))?;
            let y = set.iter().map(|s| scaler.scale_target(s.target)).collect();
            Ok((x, y))
        };
        let (train_x, train_y) = design(train)?;
        let (val_x, val_y) = design(val)?;

        info!(
            kind = %config.kind,
            window = config.window,
            train_samples = n_train,
            validation_samples = n_val,
            input_width,
            "training sequence model"
        );

        let (model, history) = match config.kind {
            SequenceKind::Mlp => {
                let (mlp, history) =
                    MlpRegressor::fit(train_x.view(), train_y.view(), val_x.view(), val_y.view(), config);
                (SequenceModel::Mlp(mlp), Some(history))
            }
            #[cfg(feature = "forest")]
            SequenceKind::RandomForest => (
                SequenceModel::RandomForest(ForestRegressor::fit(train_x.view(), train_y.view(), config)?),
                None,
            ),
            #[cfg(not(feature = "forest"))]
            SequenceKind::RandomForest => {
                return Err(ForecastError::InvalidConfig(
                    "sequence.kind = random_forest requires the 'forest' feature".to_string(),
                ))
            }
        };

        let predictor = Self::new(
            SequenceModelArtifact {
                window: config.window,
                feature_width: builder.width(),
                model,
            },
            scaler,
            builder,
        )?;

        let predictions = val_x
            .rows()
            .into_iter()
            .map(|row| predictor.predict_input(row.to_vec()))
            .collect::<Result<Vec<f64>>>()?;

        let validation = SequenceValidation {
            timestamps: val.iter().map(|s| s.timestamp).collect(),
            weather: val.iter().map(|s| s.weather).collect(),
            targets: val.iter().map(|s| s.target).collect(),
            predictions,
            last_observed: val.iter().map(|s| s.last_observed).collect(),
            training_samples: n_train,
            history,
        };
        Ok((predictor, validation))
    }

    /// Power at the step after the last history row
    pub fn predict_next(&self, history: &[SeriesPoint], next: &WeatherRecord) -> Result<f64> {
        let cadence = self.builder.cadence();
        let required = self.required_history();
        let available = trailing_run(history, cadence);
        if available < required {
            return Err(ForecastError::InsufficientData {
                stage: "prediction history",
                required,
                available,
            });
        }

        let end = history.len() - 1;
        if next.timestamp - history[end].timestamp != cadence {
            return Err(ForecastError::Misaligned(format!(
                "next step {} does not follow the last history row {}",
                next.timestamp, history[end].timestamp
            )));
        }

        let first = history.len() - required;
        let tail = &history[first..];
        let table = feature_table(tail, &self.builder);
        let window = window_at(&table, tail, tail.len() - 1, self.artifact.window, cadence)
            .ok_or_else(|| ForecastError::Misaligned("incomplete feature window".to_string()))?;
        let input = assemble_input(&self.scaler, &self.builder, &window, next)?;
        self.predict_input(input)
    }

    /// Autoregressive forecast over consecutive future steps
    pub fn rollout(&self, history: &[SeriesPoint], future: &[WeatherRecord]) -> Result<Vec<f64>> {
        let required = self.required_history();
        let keep = history.len().min(required);
        let mut points: Vec<SeriesPoint> = history[history.len() - keep..].to_vec();
        let mut out = Vec::with_capacity(future.len());

        for weather in future {
            let power = self.predict_next(&points, weather)?;
            out.push(power);
            points.push(SeriesPoint::predicted(weather, power));
            if points.len() > required {
                points.remove(0);
            }
        }
        debug!(steps = out.len(), "sequence rollout complete");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeatureConfig;
    use crate::error::ErrorKind;
    use chrono::TimeZone;

    fn builder() -> FeatureBuilder {
        FeatureBuilder::new(
            FeatureConfig {
                lags: 2,
                rolling_window: 3,
            },
            Duration::minutes(15),
        )
    }

    fn config() -> SequenceConfig {
        SequenceConfig {
            window: 3,
            hidden_units: 6,
            epochs: 20,
            ..SequenceConfig::default()
        }
    }

    fn series(n: usize) -> Vec<SeriesPoint> {
        let start = Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let ghi = (800.0 * ((i % 96) as f64 / 96.0 * std::f64::consts::TAU - 1.6).sin()).max(0.0);
                SeriesPoint {
                    timestamp: start + Duration::minutes(15 * i as i64),
                    ac_power: 1.8 * ghi,
                    ghi,
                    temp_air: 18.0,
                    wind_speed: 2.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_samples_skip_gaps() {
        let b = builder();
        let mut points = series(30);
        points.remove(15);
        let table = feature_table(&points, &b);
        let samples = build_samples(&points, &table, &b, 3);

        // warm-up 2, window 3: first target is index 5
        assert_eq!(samples[0].end, 4);
        for s in &samples {
            assert_eq!(s.timestamp - points[s.end].timestamp, Duration::minutes(15));
            assert!(window_at(&table, &points, s.end, 3, b.cadence()).is_some());
        }
        // no target directly after the hole, nor windows spanning it
        assert!(samples.iter().all(|s| s.end != 14));
        assert!(samples.iter().all(|s| !(15..19).contains(&s.end)));
    }

    #[test]
    fn test_fit_and_predict() {
        let points = series(96 * 4);
        let (predictor, validation) = SequencePredictor::fit(&points, builder(), &config()).unwrap();

        assert_eq!(predictor.kind(), SequenceKind::Mlp);
        assert_eq!(predictor.required_history(), 5);
        assert!(!validation.predictions.is_empty());
        assert_eq!(validation.predictions.len(), validation.targets.len());
        assert!(validation.predictions.iter().all(|p| *p >= 0.0));
        // scaler statistics only come from the training split
        assert_eq!(predictor.scaler().width(), builder().width());
    }

    #[test]
    fn test_short_history_names_shortfall() {
        let points = series(96 * 2);
        let (predictor, _) = SequencePredictor::fit(&points, builder(), &config()).unwrap();

        let history = &points[points.len() - 3..];
        let next = WeatherRecord {
            timestamp: history[2].timestamp + Duration::minutes(15),
            ghi: 100.0,
            temp_air: 18.0,
            wind_speed: 2.0,
        };
        let err = predictor.predict_next(history, &next).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataError);
        assert!(err.to_string().contains("need 5 rows, got 3"), "{err}");
    }

    #[test]
    fn test_rollout_matches_stepwise_prediction() {
        let points = series(96 * 2);
        let (predictor, _) = SequencePredictor::fit(&points, builder(), &config()).unwrap();

        let (history, future) = points.split_at(150);
        let weather: Vec<WeatherRecord> = future[..4].iter().map(SeriesPoint::weather).collect();
        let rolled = predictor.rollout(history, &weather).unwrap();
        assert_eq!(rolled.len(), 4);

        let first = predictor.predict_next(history, &weather[0]).unwrap();
        assert_eq!(rolled[0], first);

        let mut extended = history.to_vec();
        extended.push(SeriesPoint::predicted(&weather[0], first));
        assert_eq!(rolled[1], predictor.predict_next(&extended, &weather[1]).unwrap());
    }

    #[test]
    fn test_too_few_samples() {
        let err = SequencePredictor::fit(&series(8), builder(), &config()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataError);
    }

    #[cfg(feature = "forest")]
    #[test]
    fn test_random_forest_kind() {
        let points = series(96 * 2);
        let cfg = SequenceConfig {
            kind: SequenceKind::RandomForest,
            n_trees: 5,
            max_depth: 6,
            ..config()
        };
        let (predictor, validation) = SequencePredictor::fit(&points, builder(), &cfg).unwrap();
        assert_eq!(predictor.kind(), SequenceKind::RandomForest);
        assert!(validation.history.is_none());
        assert!(validation.predictions.iter().all(|p| *p >= 0.0));
    }
}
