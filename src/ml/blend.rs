//! Learned reconciliation of the physics and sequence estimates
//!
//! Each daypart learns `b + w_p·physics + w_s·sequence` with non-negative
//! component weights, which keeps the blend monotone non-decreasing in both
//! inputs. The fit is exact non-negative least squares in two variables.

use chrono::{DateTime, Utc};
use itertools::izip;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::BlendConfig;
use crate::domain::{Degradation, ForecastResult};
use crate::error::{ForecastError, Result};
use crate::physics::solar_time;

/// Fewest samples a least-squares fit is attempted on
pub const MIN_BLEND_SAMPLES: usize = 3;

const SINGULAR_TOL: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendWeights {
    pub intercept: f64,
    pub physics: f64,
    pub sequence: f64,
}

impl BlendWeights {
    pub fn apply(&self, physics: f64, sequence: f64) -> f64 {
        self.intercept + self.physics * physics + self.sequence * sequence
    }

    fn sse(&self, physics: &[f64], sequence: &[f64], target: &[f64]) -> f64 {
        izip!(physics, sequence, target)
            .map(|(p, s, y)| (self.apply(*p, *s) - y).powi(2))
            .sum()
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len().max(1) as f64
}

/// Least squares on centred data for `target ≈ b + w·x`, with `w` clamped at zero
fn single_component(x: &[f64], target: &[f64]) -> (f64, f64) {
    let (mx, my) = (mean(x), mean(target));
    let sxx: f64 = x.iter().map(|v| (v - mx).powi(2)).sum();
    let sxy: f64 = x.iter().zip(target).map(|(v, y)| (v - mx) * (y - my)).sum();
    let w = if sxx > SINGULAR_TOL { (sxy / sxx).max(0.0) } else { 0.0 };
    (my - w * mx, w)
}

/// Exact non-negative least squares for `target ≈ b + w_p·p + w_s·s`
///
/// The unconstrained optimum is taken when both weights are non-negative.
/// Otherwise the optimum lies on a face of the feasible set, so the best of
/// the single-component fits and the intercept-only fit is returned.
pub fn fit_nnls(physics: &[f64], sequence: &[f64], target: &[f64]) -> BlendWeights {
    let (mp, ms, my) = (mean(physics), mean(sequence), mean(target));
    let (mut spp, mut sss, mut sps, mut spy, mut ssy) = (0.0, 0.0, 0.0, 0.0, 0.0);
    for (p, s, y) in izip!(physics, sequence, target) {
        let (dp, ds, dy) = (p - mp, s - ms, y - my);
        spp += dp * dp;
        sss += ds * ds;
        sps += dp * ds;
        spy += dp * dy;
        ssy += ds * dy;
    }

    let det = spp * sss - sps * sps;
    if det.abs() > SINGULAR_TOL * (spp * sss).max(1.0) {
        let wp = (spy * sss - ssy * sps) / det;
        let ws = (ssy * spp - spy * sps) / det;
        if wp >= 0.0 && ws >= 0.0 {
            return BlendWeights {
                intercept: my - wp * mp - ws * ms,
                physics: wp,
                sequence: ws,
            };
        }
    }

    let (bp, wp) = single_component(physics, target);
    let (bs, ws) = single_component(sequence, target);
    let candidates = [
        BlendWeights {
            intercept: bp,
            physics: wp,
            sequence: 0.0,
        },
        BlendWeights {
            intercept: bs,
            physics: 0.0,
            sequence: ws,
        },
        BlendWeights {
            intercept: my,
            physics: 0.0,
            sequence: 0.0,
        },
    ];
    candidates
        .into_iter()
        .min_by(|a, b| {
            a.sse(physics, sequence, target)
                .total_cmp(&b.sse(physics, sequence, target))
        })
        .unwrap_or(candidates[2])
}

/// Observed span of one component during fitting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentRange {
    pub min: f64,
    pub max: f64,
}

impl ComponentRange {
    fn of(values: &[f64]) -> Self {
        Self {
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Persisted blend: per-daypart weights and the ranges they were fitted on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlendModelArtifact {
    pub dayparts: usize,
    /// Site longitude, for the solar hour that selects the daypart
    pub longitude: f64,
    /// Upper clamp on the output (inverter AC rating, W)
    pub max_output: f64,
    pub global: BlendWeights,
    pub buckets: Vec<BlendWeights>,
    pub bucket_samples: Vec<usize>,
    pub physics_range: ComponentRange,
    pub sequence_range: ComponentRange,
}

impl BlendModelArtifact {
    /// Fit on out-of-sample component predictions
    pub fn fit(
        timestamps: &[DateTime<Utc>],
        physics: &[f64],
        sequence: &[f64],
        target: &[f64],
        config: &BlendConfig,
        longitude: f64,
        max_output: f64,
    ) -> Result<Self> {
        let n = timestamps.len();
        if physics.len() != n || sequence.len() != n || target.len() != n {
            return Err(ForecastError::Misaligned(format!(
                "blend inputs of unequal length: {n} timestamps, {} physics, {} sequence, {} targets",
                physics.len(),
                sequence.len(),
                target.len()
            )));
        }
        if n < MIN_BLEND_SAMPLES {
            return Err(ForecastError::InsufficientData {
                stage: "blend fitting",
                required: MIN_BLEND_SAMPLES,
                available: n,
            });
        }

        let global = fit_nnls(physics, sequence, target);
        let mut buckets = Vec::with_capacity(config.dayparts);
        let mut bucket_samples = Vec::with_capacity(config.dayparts);

        for bucket in 0..config.dayparts {
            let members: Vec<usize> = (0..n)
                .filter(|&i| daypart(timestamps[i], longitude, config.dayparts) == bucket)
                .collect();
            bucket_samples.push(members.len());
            if members.len() < config.min_samples_per_bucket {
                debug!(bucket, samples = members.len(), "daypart falls back to global weights");
                buckets.push(global);
                continue;
            }
            let pick = |v: &[f64]| members.iter().map(|&i| v[i]).collect::<Vec<f64>>();
            buckets.push(fit_nnls(&pick(physics), &pick(sequence), &pick(target)));
        }

        info!(
            samples = n,
            dayparts = config.dayparts,
            global_physics = global.physics,
            global_sequence = global.sequence,
            "blend fitted"
        );

        Ok(Self {
            dayparts: config.dayparts,
            longitude,
            max_output,
            global,
            buckets,
            bucket_samples,
            physics_range: ComponentRange::of(physics),
            sequence_range: ComponentRange::of(sequence),
        })
    }

    pub fn weights_at(&self, timestamp: DateTime<Utc>) -> BlendWeights {
        let bucket = daypart(timestamp, self.longitude, self.dayparts);
        self.buckets.get(bucket).copied().unwrap_or(self.global)
    }

    /// Blend two available components, clamped to `[0, max_output]`
    pub fn blend(&self, timestamp: DateTime<Utc>, physics: f64, sequence: f64) -> f64 {
        if !self.physics_range.contains(physics) || !self.sequence_range.contains(sequence) {
            debug!(%timestamp, physics, sequence, "blend input outside the fitted range");
        }
        self.weights_at(timestamp)
            .apply(physics, sequence)
            .clamp(0.0, self.max_output)
    }

    /// Reconcile whatever components are available at one step
    ///
    /// With a single component the result is exactly that component and the
    /// missing one is flagged.
    pub fn combine(
        &self,
        timestamp: DateTime<Utc>,
        physics: Option<f64>,
        sequence: Option<f64>,
    ) -> Result<ForecastResult> {
        let (predicted_power, degradation) = match (physics, sequence) {
            (Some(p), Some(s)) => (self.blend(timestamp, p, s), None),
            (Some(p), None) => (p, Some(Degradation::SequenceUnavailable)),
            (None, Some(s)) => (s, Some(Degradation::PhysicsUnavailable)),
            (None, None) => return Err(ForecastError::NoEstimate { timestamp }),
        };
        let result = ForecastResult {
            timestamp,
            predicted_power,
            physics_component: physics,
            sequence_component: sequence,
            degradation,
        };
        if let Some(event) = result.unavailable_component() {
            warn!(error = %event, kind = %event.kind(), "forecast step degraded to a single component");
        }
        Ok(result)
    }
}

/// Bucket of the apparent solar hour at `longitude`
pub fn daypart(timestamp: DateTime<Utc>, longitude: f64, dayparts: usize) -> usize {
    let hour = solar_time(timestamp, longitude);
    ((hour / 24.0 * dayparts as f64) as usize).min(dayparts.saturating_sub(1))
}
