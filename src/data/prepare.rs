//! Resampling and alignment of raw telemetry and weather tables
//!
//! Raw tables are sorted, de-duplicated and resampled onto a regular grid.
//! Short holes are bridged by linear interpolation; grid points inside longer
//! outages are dropped rather than fabricated. Telemetry and weather are then
//! inner-joined on the grid.

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::{info, warn};

use super::loader::TrainingTable;
use crate::config::DataConfig;
use crate::domain::{AlignedRow, TelemetryRecord, WeatherRecord};
use crate::error::{ForecastError, Result};

/// A timestamped record that can be linearly interpolated
pub trait Sample: Copy {
    fn timestamp(&self) -> DateTime<Utc>;

    /// Value at `timestamp`, `frac` of the way from `self` to `next`
    fn lerp(&self, next: &Self, frac: f64, timestamp: DateTime<Utc>) -> Self;
}

fn mix(a: f64, b: f64, frac: f64) -> f64 {
    a + (b - a) * frac
}

impl Sample for TelemetryRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn lerp(&self, next: &Self, frac: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            voltage: mix(self.voltage, next.voltage, frac),
            current: mix(self.current, next.current, frac),
            ac_power: mix(self.ac_power, next.ac_power, frac),
            cumulative_yield: mix(self.cumulative_yield, next.cumulative_yield, frac),
        }
    }
}

impl Sample for WeatherRecord {
    fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn lerp(&self, next: &Self, frac: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            ghi: mix(self.ghi, next.ghi, frac),
            temp_air: mix(self.temp_air, next.temp_air, frac),
            wind_speed: mix(self.wind_speed, next.wind_speed, frac),
        }
    }
}

/// Sort by timestamp; on duplicate timestamps the later row wins
pub fn normalize<T: Sample>(records: &[T]) -> Vec<T> {
    let mut sorted = records.to_vec();
    // stable sort keeps file order among equal timestamps
    sorted.sort_by_key(|r| r.timestamp());

    let mut out: Vec<T> = Vec::with_capacity(sorted.len());
    let mut duplicates = 0usize;
    for record in sorted {
        match out.last_mut() {
            Some(last) if last.timestamp() == record.timestamp() => {
                *last = record;
                duplicates += 1;
            }
            _ => out.push(record),
        }
    }
    if duplicates > 0 {
        warn!(duplicates, "duplicate timestamps found; keeping the last occurrence");
    }
    out
}

/// First grid point at or after `ts`, grid anchored at the Unix epoch
pub fn grid_ceil(ts: DateTime<Utc>, cadence: Duration) -> DateTime<Utc> {
    let step = cadence.num_seconds();
    let secs = ts.timestamp();
    let mut aligned = secs.div_euclid(step) * step;
    if aligned < secs || (ts.timestamp_subsec_nanos() > 0 && aligned == secs) {
        aligned += step;
    }
    Utc.timestamp_opt(aligned, 0).single().unwrap_or(ts)
}

/// Resample onto the cadence grid
pub fn resample<T: Sample>(records: &[T], cadence: Duration, max_gap: Duration) -> Vec<T> {
    let records = normalize(records);
    let (Some(first), Some(last)) = (records.first(), records.last()) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut grid = grid_ceil(first.timestamp(), cadence);
    let end = last.timestamp();
    let mut i = 0usize;

    while grid <= end {
        // advance to the last record at or before the grid point
        while i + 1 < records.len() && records[i + 1].timestamp() <= grid {
            i += 1;
        }
        let prev = &records[i];
        if prev.timestamp() == grid {
            out.push(*prev);
        } else if let Some(next) = records.get(i + 1) {
            let span = next.timestamp() - prev.timestamp();
            if span <= max_gap {
                let frac = (grid - prev.timestamp()).num_milliseconds() as f64
                    / span.num_milliseconds() as f64;
                out.push(prev.lerp(next, frac, grid));
            }
        }
        grid += cadence;
    }
    out
}

/// Inner join on identical grid timestamps
pub fn align(telemetry: &[TelemetryRecord], weather: &[WeatherRecord]) -> Vec<AlignedRow> {
    let mut rows = Vec::with_capacity(telemetry.len().min(weather.len()));
    let (mut i, mut j) = (0usize, 0usize);
    while i < telemetry.len() && j < weather.len() {
        let (t, w) = (&telemetry[i], &weather[j]);
        match t.timestamp.cmp(&w.timestamp) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                rows.push(AlignedRow::join(t, w));
                i += 1;
                j += 1;
            }
        }
    }
    rows
}

/// Regular-cadence data preparation shared by training and prediction
#[derive(Debug, Clone, Copy)]
pub struct DataPreparer {
    cadence: Duration,
    max_gap: Duration,
}

impl DataPreparer {
    pub fn new(config: &DataConfig) -> Self {
        Self {
            cadence: config.cadence(),
            max_gap: config.max_gap(),
        }
    }

    pub fn cadence(&self) -> Duration {
        self.cadence
    }

    /// Resample both halves and join them, refusing fewer than `min_rows` rows
    pub fn prepare(
        &self,
        table: &TrainingTable,
        min_rows: usize,
        stage: &'static str,
    ) -> Result<Vec<AlignedRow>> {
        let telemetry = resample(&table.telemetry, self.cadence, self.max_gap);
        let weather = resample(&table.weather, self.cadence, self.max_gap);
        let rows = align(&telemetry, &weather);

        info!(
            stage,
            raw_telemetry = table.telemetry.len(),
            raw_weather = table.weather.len(),
            resampled_telemetry = telemetry.len(),
            resampled_weather = weather.len(),
            aligned = rows.len(),
            "prepared aligned table"
        );

        if rows.len() < min_rows {
            return Err(ForecastError::InsufficientData {
                stage,
                required: min_rows,
                available: rows.len(),
            });
        }
        Ok(rows)
    }

    /// Resample a weather forecast onto the grid
    pub fn prepare_weather(&self, weather: &[WeatherRecord]) -> Result<Vec<WeatherRecord>> {
        let resampled = resample(weather, self.cadence, self.max_gap);
        if resampled.is_empty() {
            return Err(ForecastError::InsufficientData {
                stage: "weather forecast",
                required: 1,
                available: 0,
            });
        }
        Ok(resampled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn ts(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, h, m, 0).unwrap()
    }

    fn weather(t: DateTime<Utc>, ghi: f64) -> WeatherRecord {
        WeatherRecord {
            timestamp: t,
            ghi,
            temp_air: 20.0,
            wind_speed: 1.0,
        }
    }

    fn telemetry(t: DateTime<Utc>, power: f64) -> TelemetryRecord {
        TelemetryRecord {
            timestamp: t,
            voltage: 300.0,
            current: power / 300.0,
            ac_power: power,
            cumulative_yield: 10.0,
        }
    }

    #[test]
    fn test_short_gap_is_interpolated() {
        let records = vec![weather(ts(10, 0), 100.0), weather(ts(10, 30), 200.0)];
        let out = resample(&records, Duration::minutes(15), Duration::minutes(60));
        assert_eq!(out.len(), 3);
        assert_eq!(out[1].timestamp, ts(10, 15));
        assert!((out[1].ghi - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_long_gap_is_dropped_not_fabricated() {
        let records = vec![weather(ts(8, 0), 100.0), weather(ts(12, 0), 500.0)];
        let out = resample(&records, Duration::minutes(15), Duration::minutes(60));
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].timestamp, ts(8, 0));
        assert_eq!(out[1].timestamp, ts(12, 0));
    }

    #[test]
    fn test_off_grid_samples_snap_to_grid() {
        let records = vec![
            weather(ts(10, 7), 100.0),
            weather(ts(10, 22), 250.0),
        ];
        let out = resample(&records, Duration::minutes(15), Duration::minutes(60));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, ts(10, 15));
        assert!((out[0].ghi - 180.0).abs() < 1e-9);
    }

    #[test]
    fn test_duplicates_keep_last() {
        let records = vec![
            weather(ts(10, 0), 100.0),
            weather(ts(10, 0), 120.0),
            weather(ts(10, 15), 140.0),
        ];
        let out = normalize(&records);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].ghi, 120.0);
    }

    #[test]
    fn test_align_is_inner_join() {
        let t = vec![telemetry(ts(10, 0), 1.0), telemetry(ts(10, 15), 2.0)];
        let w = vec![weather(ts(10, 15), 3.0), weather(ts(10, 30), 4.0)];
        let rows = align(&t, &w);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].timestamp, ts(10, 15));
        assert_eq!(rows[0].ac_power, 2.0);
        assert_eq!(rows[0].ghi, 3.0);
    }

    #[test]
    fn test_insufficient_rows_refused() {
        let preparer = DataPreparer::new(&DataConfig::default());
        let table = TrainingTable::new(
            vec![telemetry(ts(10, 0), 1.0), telemetry(ts(10, 15), 2.0)],
            vec![weather(ts(10, 0), 1.0), weather(ts(10, 15), 2.0)],
        );
        let err = preparer.prepare(&table, 96, "training").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DataError);
        assert!(err.to_string().contains("need 96 rows, got 2"));
    }

    #[test]
    fn test_grid_ceil() {
        let cadence = Duration::minutes(15);
        assert_eq!(grid_ceil(ts(10, 0), cadence), ts(10, 0));
        assert_eq!(grid_ceil(ts(10, 1), cadence), ts(10, 15));
    }
}
