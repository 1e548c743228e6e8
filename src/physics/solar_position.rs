//! Solar geometry from Spencer (1971) series
//!
//! Accurate to a fraction of a degree, which is well inside the error of
//! irradiance decomposition downstream.

use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Sun position seen from the site
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolarPosition {
    /// Angle from vertical (degrees)
    pub zenith: f64,
    /// Angle above the horizon (degrees)
    pub elevation: f64,
    /// Clockwise from north (degrees, 180 = south)
    pub azimuth: f64,
}

impl SolarPosition {
    pub fn is_above_horizon(&self) -> bool {
        self.elevation > 0.0
    }
}

/// Fractional year angle `B = 2π(doy − 1)/365` (radians)
pub fn day_angle(timestamp: DateTime<Utc>) -> f64 {
    std::f64::consts::TAU * (timestamp.ordinal() as f64 - 1.0) / 365.0
}

/// Solar declination (radians)
pub fn declination(b: f64) -> f64 {
    0.006918 - 0.399912 * b.cos() + 0.070257 * b.sin() - 0.006758 * (2.0 * b).cos()
        + 0.000907 * (2.0 * b).sin()
        - 0.002697 * (3.0 * b).cos()
        + 0.00148 * (3.0 * b).sin()
}

/// Equation of time (minutes)
pub fn equation_of_time(b: f64) -> f64 {
    229.18
        * (0.000075 + 0.001868 * b.cos()
            - 0.032077 * b.sin()
            - 0.014615 * (2.0 * b).cos()
            - 0.04089 * (2.0 * b).sin())
}

/// Apparent solar time at `longitude` (hours, 0..24)
pub fn solar_time(timestamp: DateTime<Utc>, longitude: f64) -> f64 {
    let utc_hours = timestamp.hour() as f64
        + timestamp.minute() as f64 / 60.0
        + timestamp.second() as f64 / 3600.0;
    let eot = equation_of_time(day_angle(timestamp));
    (utc_hours + longitude / 15.0 + eot / 60.0).rem_euclid(24.0)
}

pub fn solar_position(timestamp: DateTime<Utc>, latitude: f64, longitude: f64) -> SolarPosition {
    let decl = declination(day_angle(timestamp));
    let hour_angle = (15.0 * (solar_time(timestamp, longitude) - 12.0)).to_radians();
    let lat = latitude.to_radians();

    let cos_zenith = (lat.sin() * decl.sin() + lat.cos() * decl.cos() * hour_angle.cos())
        .clamp(-1.0, 1.0);
    let zenith = cos_zenith.acos();
    let elevation = std::f64::consts::FRAC_PI_2 - zenith;

    let denom = zenith.sin() * lat.cos();
    let cos_azimuth = if denom.abs() > 1e-9 {
        ((decl.sin() - cos_zenith * lat.sin()) / denom).clamp(-1.0, 1.0)
    } else {
        1.0
    };
    let mut azimuth = cos_azimuth.acos().to_degrees();
    if hour_angle > 0.0 {
        azimuth = 360.0 - azimuth;
    }

    SolarPosition {
        zenith: zenith.to_degrees(),
        elevation: elevation.to_degrees(),
        azimuth,
    }
}
