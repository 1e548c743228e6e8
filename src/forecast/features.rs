//! Feature engineering for the sequence model
//!
//! A single [`FeatureBuilder`] serves training, validation and the
//! autoregressive inference rollout so the three can never drift apart.
//! Every feature at `t` is computed from points at or before `t` only.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::config::FeatureConfig;
use crate::domain::{AlignedRow, WeatherRecord};

/// Hour-of-day and day-of-year encodings
pub const CALENDAR_FEATURES: usize = 4;
/// Calendar encodings plus the three weather values of one step
pub const EXOGENOUS_FEATURES: usize = CALENDAR_FEATURES + 3;
/// ac_power, ghi, temp_air, wind_speed at `t`
const CURRENT_FEATURES: usize = 4;

/// The subset of an aligned row that features are derived from
///
/// Rollout rows synthesised during inference only know the predicted power
/// and the forecast weather, so features never look at voltage, current or
/// cumulative yield.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub ac_power: f64,
    pub ghi: f64,
    pub temp_air: f64,
    pub wind_speed: f64,
}

impl SeriesPoint {
    /// Row appended during rollout: predicted power with that step's weather
    pub fn predicted(weather: &WeatherRecord, ac_power: f64) -> Self {
        Self {
            timestamp: weather.timestamp,
            ac_power,
            ghi: weather.ghi,
            temp_air: weather.temp_air,
            wind_speed: weather.wind_speed,
        }
    }

    pub fn weather(&self) -> WeatherRecord {
        WeatherRecord {
            timestamp: self.timestamp,
            ghi: self.ghi,
            temp_air: self.temp_air,
            wind_speed: self.wind_speed,
        }
    }
}

impl From<&AlignedRow> for SeriesPoint {
    fn from(row: &AlignedRow) -> Self {
        Self {
            timestamp: row.timestamp,
            ac_power: row.ac_power,
            ghi: row.ghi,
            temp_air: row.temp_air,
            wind_speed: row.wind_speed,
        }
    }
}

/// Engineered features for one timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<f64>,
}

/// `(sin, cos)` of `value` on a cycle of length `period`
pub fn cyclical(value: f64, period: f64) -> (f64, f64) {
    let angle = value / period * std::f64::consts::TAU;
    (angle.sin(), angle.cos())
}

/// Fractional hour of day and day of year, both cyclically encoded
pub fn calendar_features(timestamp: DateTime<Utc>) -> [f64; CALENDAR_FEATURES] {
    let hour = timestamp.hour() as f64
        + timestamp.minute() as f64 / 60.0
        + timestamp.second() as f64 / 3600.0;
    let (hour_sin, hour_cos) = cyclical(hour, 24.0);
    let (doy_sin, doy_cos) = cyclical(timestamp.ordinal0() as f64, 365.25);
    [hour_sin, hour_cos, doy_sin, doy_cos]
}

/// Inputs known ahead of time for a target step
pub fn exogenous_features(weather: &WeatherRecord) -> [f64; EXOGENOUS_FEATURES] {
    let [hs, hc, ds, dc] = calendar_features(weather.timestamp);
    [hs, hc, ds, dc, weather.ghi, weather.temp_air, weather.wind_speed]
}

/// Population mean and standard deviation of a window
pub fn rolling_statistics(window: &[f64]) -> (f64, f64) {
    let n = window.len() as f64;
    let mean = window.iter().sum::<f64>() / n;
    let variance = window.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Builds [`FeatureVector`]s from a sorted, grid-aligned series
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureBuilder {
    config: FeatureConfig,
    cadence: Duration,
}

impl FeatureBuilder {
    pub fn new(config: FeatureConfig, cadence: Duration) -> Self {
        Self { config, cadence }
    }

    pub fn config(&self) -> FeatureConfig {
        self.config
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// Earlier steps needed before the first complete vector
    pub fn warmup(&self) -> usize {
        self.config.lags.max(self.config.rolling_window - 1)
    }

    pub fn width(&self) -> usize {
        CALENDAR_FEATURES + CURRENT_FEATURES + 2 * self.config.lags + 2
    }

    pub fn feature_names(&self) -> Vec<String> {
        let mut names: Vec<String> = [
            "hour_sin",
            "hour_cos",
            "doy_sin",
            "doy_cos",
            "ac_power",
            "ghi",
            "temp_air",
            "wind_speed",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        names.extend((1..=self.config.lags).map(|k| format!("ac_power_lag_{k}")));
        names.extend((1..=self.config.lags).map(|k| format!("ghi_lag_{k}")));
        names.push("ac_power_rolling_mean".to_string());
        names.push("ac_power_rolling_std".to_string());
        names
    }

    /// Positions of the exogenous inputs inside a feature vector
    ///
    /// The calendar block and the weather of `t` sit in the same order as
    /// [`exogenous_features`], which lets the scaler reuse their statistics.
    pub fn exogenous_columns(&self) -> [usize; EXOGENOUS_FEATURES] {
        [0, 1, 2, 3, 5, 6, 7]
    }

    /// Whether the `warmup` steps before `index` are all present
    ///
    /// The series is strictly increasing on the cadence grid, so the
    /// intermediate steps exist exactly when the span matches.
    fn has_history(&self, points: &[SeriesPoint], index: usize) -> bool {
        let warmup = self.warmup();
        if index < warmup || index >= points.len() {
            return false;
        }
        let span = points[index].timestamp - points[index - warmup].timestamp;
        span == self.cadence * warmup as i32
    }

    /// Feature vector at `points[index]`, or `None` when history is incomplete
    pub fn build_at(&self, points: &[SeriesPoint], index: usize) -> Option<FeatureVector> {
        if !self.has_history(points, index) {
            return None;
        }
        let point = &points[index];
        let lags = self.config.lags;

        let mut values = Vec::with_capacity(self.width());
        values.extend_from_slice(&calendar_features(point.timestamp));
        values.extend_from_slice(&[point.ac_power, point.ghi, point.temp_air, point.wind_speed]);
        values.extend((1..=lags).map(|k| points[index - k].ac_power));
        values.extend((1..=lags).map(|k| points[index - k].ghi));

        let window: Vec<f64> = points[index + 1 - self.config.rolling_window..=index]
            .iter()
            .map(|p| p.ac_power)
            .collect();
        let (mean, std) = rolling_statistics(&window);
        values.push(mean);
        values.push(std);

        Some(FeatureVector {
            timestamp: point.timestamp,
            values,
        })
    }

    /// All complete feature vectors, in time order
    pub fn build(&self, points: &[SeriesPoint]) -> Vec<FeatureVector> {
        (0..points.len())
            .filter_map(|i| self.build_at(points, i))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rstest::rstest;

    fn series(n: usize, start_hour: u32) -> Vec<SeriesPoint> {
        let start = Utc.with_ymd_and_hms(2024, 6, 1, start_hour, 0, 0).unwrap();
        (0..n)
            .map(|i| SeriesPoint {
                timestamp: start + Duration::minutes(15 * i as i64),
                ac_power: 100.0 * i as f64,
                ghi: 10.0 * i as f64,
                temp_air: 20.0,
                wind_speed: 2.0,
            })
            .collect()
    }

    fn builder(lags: usize, rolling_window: usize) -> FeatureBuilder {
        FeatureBuilder::new(
            FeatureConfig {
                lags,
                rolling_window,
            },
            Duration::minutes(15),
        )
    }

    #[test]
    fn test_cyclical_encoding() {
        let (s, c) = cyclical(6.0, 24.0);
        assert!((s - 1.0).abs() < 1e-12);
        assert!(c.abs() < 1e-12);

        let (s, c) = cyclical(0.0, 24.0);
        assert_eq!((s, c), (0.0, 1.0));
    }

    #[test]
    fn test_fractional_hour() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 12, 30, 0).unwrap();
        let [hs, hc, _, _] = calendar_features(ts);
        let (es, ec) = cyclical(12.5, 24.0);
        assert_eq!(hs, es);
        assert_eq!(hc, ec);
    }

    #[test]
    fn test_lag_and_rolling_values() {
        let b = builder(2, 3);
        let points = series(6, 10);
        let fv = b.build_at(&points, 4).unwrap();

        assert_eq!(fv.values.len(), b.width());
        assert_eq!(b.feature_names().len(), b.width());
        assert_eq!(fv.values[4], 400.0);
        assert_eq!(fv.values[5], 40.0);
        // power lags, then ghi lags
        assert_eq!(&fv.values[8..10], &[300.0, 200.0]);
        assert_eq!(&fv.values[10..12], &[30.0, 20.0]);
        // rolling over 200, 300, 400
        assert!((fv.values[12] - 300.0).abs() < 1e-9);
        assert!((fv.values[13] - (20000.0_f64 / 3.0).sqrt()).abs() < 1e-9);
    }

    #[rstest]
    #[case(1, 2, 1)]
    #[case(4, 4, 4)]
    #[case(2, 6, 5)]
    fn test_warmup(#[case] lags: usize, #[case] window: usize, #[case] expected: usize) {
        let b = builder(lags, window);
        assert_eq!(b.warmup(), expected);
        let points = series(10, 8);
        let vectors = b.build(&points);
        assert_eq!(vectors.len(), 10 - expected);
        assert_eq!(vectors[0].timestamp, points[expected].timestamp);
    }

    #[test]
    fn test_gap_drops_incomplete_vectors() {
        let b = builder(2, 2);
        let mut points = series(10, 8);
        points.remove(5);

        let vectors = b.build(&points);
        let stamps: Vec<_> = vectors.iter().map(|v| v.timestamp).collect();
        // the two steps after the hole lack history
        assert!(!stamps.contains(&points[5].timestamp));
        assert!(!stamps.contains(&points[6].timestamp));
        assert!(stamps.contains(&points[7].timestamp));
        assert_eq!(vectors.len(), 10 - 1 - 2 - 2);
    }

    #[test]
    fn test_exogenous_columns_match_exogenous_features() {
        let b = builder(2, 2);
        let points = series(5, 9);
        let fv = b.build_at(&points, 3).unwrap();
        let exo = exogenous_features(&points[3].weather());
        for (k, &col) in b.exogenous_columns().iter().enumerate() {
            assert_eq!(fv.values[col], exo[k]);
        }
    }

    proptest! {
        #[test]
        fn prop_no_look_ahead(
            values in prop::collection::vec((0.0f64..3000.0, 0.0f64..1100.0), 12..48),
            cut in 0usize..48,
            noise in -500.0f64..500.0,
        ) {
            let b = builder(3, 4);
            let start = Utc.with_ymd_and_hms(2024, 3, 10, 6, 0, 0).unwrap();
            let points: Vec<SeriesPoint> = values
                .iter()
                .enumerate()
                .map(|(i, &(p, g))| SeriesPoint {
                    timestamp: start + Duration::minutes(15 * i as i64),
                    ac_power: p,
                    ghi: g,
                    temp_air: 15.0,
                    wind_speed: 3.0,
                })
                .collect();
            let t = cut % points.len();

            let mut mutated = points.clone();
            for p in mutated.iter_mut().skip(t + 1) {
                p.ac_power += noise;
                p.ghi = (p.ghi - noise).max(0.0);
                p.temp_air += 5.0;
            }

            prop_assert_eq!(b.build_at(&points, t), b.build_at(&mutated, t));
            prop_assert_eq!(b.build_at(&points, t), b.build_at(&points[..=t], t));
        }
    }
}
