#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use pv_hybrid_forecast::config::{Config, SequenceConfig};
use pv_hybrid_forecast::data::TrainingTable;
use pv_hybrid_forecast::domain::{SiteGeometry, TelemetryRecord, WeatherRecord};

pub const STEP_MINUTES: i64 = 15;
/// Power per unit of irradiance in the synthetic plant (W per W/m²)
pub const GAIN: f64 = 2.0;

pub fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

pub fn at_step(step: i64) -> DateTime<Utc> {
    start() + Duration::minutes(STEP_MINUTES * step)
}

/// Clear-sky GHI: half a sine between 06:00 and 18:00 UTC, zero at night
pub fn clear_sky_ghi(ts: DateTime<Utc>) -> f64 {
    let hour = ts.timestamp().rem_euclid(86_400) as f64 / 3600.0;
    (std::f64::consts::PI * (hour - 6.0) / 12.0).sin().max(0.0) * 1000.0
}

pub fn weather_at(step: i64) -> WeatherRecord {
    let timestamp = at_step(step);
    WeatherRecord {
        timestamp,
        ghi: clear_sky_ghi(timestamp),
        temp_air: 20.0,
        wind_speed: 2.0,
    }
}

/// Noise-free table where `ac_power = GAIN · ghi`, steps `[from, to)`
pub fn table(from: i64, to: i64) -> TrainingTable {
    let weather: Vec<WeatherRecord> = (from..to).map(weather_at).collect();
    let telemetry = weather
        .iter()
        .map(|w| TelemetryRecord {
            timestamp: w.timestamp,
            voltage: 300.0,
            current: GAIN * w.ghi / 300.0,
            ac_power: GAIN * w.ghi,
            cumulative_yield: 0.0,
        })
        .collect();
    TrainingTable::new(telemetry, weather)
}

pub fn days(n: i64) -> i64 {
    n * 24 * 60 / STEP_MINUTES
}

pub fn site() -> SiteGeometry {
    SiteGeometry::new(45.0, 0.0, 100.0, 30.0, 180.0)
}

/// Small network so tests train quickly
pub fn fast_config() -> Config {
    Config {
        sequence: SequenceConfig {
            window: 4,
            hidden_units: 8,
            epochs: 15,
            ..SequenceConfig::default()
        },
        ..Config::default()
    }
}
