use std::path::Path;

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::bundle::{BundleMetadata, ModelBundle, TrainingMetrics, BUNDLE_FORMAT_VERSION};
use crate::config::{Config, EstimatorKind};
use crate::data::{DataPreparer, TrainingTable};
use crate::domain::{ForecastResult, SiteGeometry, WeatherRecord};
use crate::error::{ForecastError, Result};
use crate::forecast::{FeatureBuilder, ForecastGenerator, ForecastMetrics, SeriesPoint};
use crate::ml::{BlendModelArtifact, SequencePredictor};
use crate::physics::PhysicsEstimator;

/// Prepare data, fit the sequence model, then fit the blend on its
/// validation predictions
pub fn train(table: &TrainingTable, site: &SiteGeometry, config: &Config) -> Result<ModelBundle> {
    config.check()?;
    let physics = PhysicsEstimator::new(*site, config.physics.clone())?;

    let preparer = DataPreparer::new(&config.data);
    let rows = preparer.prepare(table, config.data.min_aligned_rows, "training")?;
    let points: Vec<SeriesPoint> = rows.iter().map(SeriesPoint::from).collect();
    let builder = FeatureBuilder::new(config.features, preparer.cadence());

    let (sequence, validation) = SequencePredictor::fit(&points, builder, &config.sequence)?;

    // a solver failure on a validation sample aborts training
    let physics_out = validation
        .weather
        .iter()
        .map(|w| physics.estimate(w).map(|e| e.estimated_ac_power))
        .collect::<Result<Vec<_>>>()?;
    let timestamps = &validation.timestamps;
    let sequence_out = &validation.predictions;
    let targets = &validation.targets;

    let blend = BlendModelArtifact::fit(
        timestamps,
        &physics_out,
        sequence_out,
        targets,
        &config.blend,
        site.longitude,
        physics.ac_rating(),
    )?;
    let blended: Vec<f64> = timestamps
        .iter()
        .zip(physics_out.iter().zip(sequence_out))
        .map(|(ts, (p, s))| blend.blend(*ts, *p, *s))
        .collect();

    let metrics = TrainingMetrics {
        physics: ForecastMetrics::calculate(targets, &physics_out)?,
        sequence: ForecastMetrics::calculate(targets, sequence_out)?,
        blend: ForecastMetrics::calculate(targets, &blended)?,
        persistence: ForecastMetrics::calculate(targets, &validation.last_observed)?,
        training_samples: validation.training_samples,
        validation_samples: targets.len(),
    };
    info!(
        physics = %metrics.physics,
        sequence = %metrics.sequence,
        blend = %metrics.blend,
        persistence = %metrics.persistence,
        skill = metrics.blend.skill_against(&metrics.persistence),
        "validation metrics"
    );

    let (training_start, training_end) = match (rows.first(), rows.last()) {
        (Some(first), Some(last)) => (first.timestamp, last.timestamp),
        _ => {
            return Err(ForecastError::InsufficientData {
                stage: "training",
                required: config.data.min_aligned_rows,
                available: 0,
            })
        }
    };

    let metadata = BundleMetadata {
        format_version: BUNDLE_FORMAT_VERSION,
        crate_version: env!("CARGO_PKG_VERSION").to_string(),
        bundle_id: Uuid::new_v4(),
        trained_at: Utc::now(),
        training_start,
        training_end,
        cadence_minutes: config.data.cadence_minutes,
        features: config.features,
        feature_names: builder.feature_names(),
        sequence: config.sequence.clone(),
        physics: config.physics.clone(),
        site: *site,
        metrics,
    };
    info!(bundle_id = %metadata.bundle_id, kind = %sequence.kind(), "training complete");

    Ok(ModelBundle {
        metadata,
        sequence,
        blend,
    })
}

pub fn save(bundle: &ModelBundle, dir: &Path) -> Result<()> {
    bundle.save(dir)
}

pub fn load(dir: &Path) -> Result<ModelBundle> {
    ModelBundle::load(dir)
}

/// Forecast from the end of `history` to the last weather timestamp
pub fn predict(
    bundle: &ModelBundle,
    history: &TrainingTable,
    weather: &[WeatherRecord],
    site: &SiteGeometry,
    config: &Config,
) -> Result<Vec<ForecastResult>> {
    config.check()?;
    if config.features != bundle.metadata.features {
        return Err(ForecastError::VersionMismatch(format!(
            "feature config {:?} differs from the bundle's {:?}",
            config.features, bundle.metadata.features
        )));
    }
    if config.data.cadence_minutes != bundle.metadata.cadence_minutes {
        return Err(ForecastError::VersionMismatch(format!(
            "cadence of {} minutes differs from the bundle's {}",
            config.data.cadence_minutes, bundle.metadata.cadence_minutes
        )));
    }
    if *site != bundle.metadata.site {
        warn!(
            bundle_id = %bundle.metadata.bundle_id,
            latitude = site.latitude,
            longitude = site.longitude,
            "site geometry differs from training"
        );
    }

    let use_physics = config.forecast.is_enabled(EstimatorKind::Physics);
    let use_sequence = config.forecast.is_enabled(EstimatorKind::Sequence);
    let physics = PhysicsEstimator::new(*site, bundle.metadata.physics.clone())?;

    let preparer = DataPreparer::new(&config.data);
    let required = if use_sequence {
        bundle.sequence.required_history()
    } else {
        1
    };
    let rows = preparer.prepare(history, required, "prediction history")?;
    let points: Vec<SeriesPoint> = rows.iter().map(SeriesPoint::from).collect();
    let weather = preparer.prepare_weather(weather)?;

    let mut generator = ForecastGenerator::new(
        &bundle.blend,
        preparer.cadence(),
        config.forecast.max_horizon_steps,
    );
    if use_physics {
        generator = generator.with_estimator(&physics);
    }
    if use_sequence {
        generator = generator.with_estimator(&bundle.sequence);
    }
    generator.generate(&points, &weather)
}
