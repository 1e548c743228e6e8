//! Deterministic irradiance-to-power model
//!
//! Weather and site geometry go in, AC power comes out. Nothing here is
//! learned, so the estimator is available from the first forecast step.

pub mod diode;
pub mod inverter;
pub mod irradiance;
pub mod solar_position;
pub mod thermal;

pub use inverter::InverterModel;
pub use solar_position::{solar_position, solar_time, SolarPosition};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::PhysicsConfig;
use crate::domain::{PhysicsEstimate, SiteGeometry, WeatherRecord};
use crate::error::{ForecastError, Result};
use irradiance::PlaneOfArray;

/// Intermediate quantities of one evaluation
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsTrace {
    pub timestamp: DateTime<Utc>,
    pub sun: SolarPosition,
    pub poa: Option<PlaneOfArray>,
    pub cell_temperature: f64,
    pub dc_power: f64,
    pub ac_power: f64,
}

#[derive(Debug, Clone)]
pub struct PhysicsEstimator {
    site: SiteGeometry,
    config: PhysicsConfig,
    inverter: InverterModel,
}

impl PhysicsEstimator {
    pub fn new(site: SiteGeometry, config: PhysicsConfig) -> Result<Self> {
        site.check()?;
        Ok(Self {
            inverter: InverterModel::new(&config.inverter),
            site,
            config,
        })
    }

    pub fn site(&self) -> &SiteGeometry {
        &self.site
    }

    pub fn ac_rating(&self) -> f64 {
        self.inverter.ac_rating()
    }

    fn module_count(&self) -> f64 {
        (self.config.modules_per_string * self.config.strings) as f64
    }

    /// Full evaluation, exposing every intermediate step
    pub fn trace(&self, weather: &WeatherRecord) -> Result<PhysicsTrace> {
        let timestamp = weather.timestamp;
        let sun = solar_position(timestamp, self.site.latitude, self.site.longitude);

        if weather.ghi <= 0.0 || !sun.is_above_horizon() {
            return Ok(PhysicsTrace {
                timestamp,
                sun,
                poa: None,
                cell_temperature: weather.temp_air,
                dc_power: 0.0,
                ac_power: 0.0,
            });
        }

        let dni_extra = irradiance::extraterrestrial(solar_position::day_angle(timestamp));
        let components = irradiance::erbs(weather.ghi, sun.zenith, dni_extra);
        let aoi = irradiance::angle_of_incidence(
            self.site.tilt,
            self.site.azimuth,
            sun.zenith,
            sun.azimuth,
        );
        let poa = irradiance::poa_isotropic(
            &components,
            self.site.tilt,
            aoi,
            self.config.albedo,
            self.config.iam_factor,
        );

        let cell_temperature = thermal::sapm_cell_temperature(
            poa.global(),
            weather.temp_air,
            weather.wind_speed,
            &self.site.module_temperature_coefficients,
        );

        let params = diode::calc_params_desoto(&self.config.module, poa.effective, cell_temperature);
        let (_, _, p_mp) = params
            .max_power_point()
            .map_err(|e| ForecastError::Numerical {
                timestamp,
                detail: e.to_string(),
            })?;

        let dc_power = p_mp * self.module_count() * (1.0 - self.config.dc_loss_fraction);
        let ac_power = self.inverter.ac_power(dc_power);

        Ok(PhysicsTrace {
            timestamp,
            sun,
            poa: Some(poa),
            cell_temperature,
            dc_power,
            ac_power,
        })
    }

    pub fn estimate(&self, weather: &WeatherRecord) -> Result<PhysicsEstimate> {
        let trace = self.trace(weather)?;
        Ok(PhysicsEstimate {
            timestamp: trace.timestamp,
            estimated_ac_power: trace.ac_power,
        })
    }

    pub fn estimate_series(&self, weather: &[WeatherRecord]) -> Result<Vec<PhysicsEstimate>> {
        weather.iter().map(|w| self.estimate(w)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn estimator() -> PhysicsEstimator {
        let site = SiteGeometry::new(52.5, 13.4, 34.0, 30.0, 180.0);
        PhysicsEstimator::new(site, PhysicsConfig::default()).unwrap()
    }

    fn weather(ts: DateTime<Utc>, ghi: f64) -> WeatherRecord {
        WeatherRecord {
            timestamp: ts,
            ghi,
            temp_air: 20.0,
            wind_speed: 2.0,
        }
    }

    #[test]
    fn test_night_is_exactly_zero() {
        let est = estimator();
        let midnight = Utc.with_ymd_and_hms(2024, 6, 21, 23, 0, 0).unwrap();
        // sensor noise at night must not leak into the estimate
        assert_eq!(est.estimate(&weather(midnight, 15.0)).unwrap().estimated_ac_power, 0.0);

        let noon = Utc.with_ymd_and_hms(2024, 6, 21, 11, 0, 0).unwrap();
        assert_eq!(est.estimate(&weather(noon, 0.0)).unwrap().estimated_ac_power, 0.0);
        assert_eq!(est.estimate(&weather(noon, -3.0)).unwrap().estimated_ac_power, 0.0);
    }

    #[test]
    fn test_clear_summer_noon() {
        let est = estimator();
        let noon = Utc.with_ymd_and_hms(2024, 6, 21, 11, 0, 0).unwrap();
        let trace = est.trace(&weather(noon, 850.0)).unwrap();
        assert!(trace.poa.is_some());
        assert!(trace.cell_temperature > 20.0);
        assert!(trace.ac_power > 1200.0 && trace.ac_power <= 2000.0, "ac {}", trace.ac_power);
        assert!(trace.ac_power < trace.dc_power);
    }

    #[test]
    fn test_daily_profile_peaks_near_noon() {
        let est = estimator();
        let start = Utc.with_ymd_and_hms(2024, 6, 21, 0, 0, 0).unwrap();
        let series: Vec<WeatherRecord> = (0..96)
            .map(|i| {
                let ts = start + Duration::minutes(15 * i);
                let sun = solar_position(ts, 52.5, 13.4);
                weather(ts, (sun.elevation.to_radians().sin() * 900.0).max(0.0))
            })
            .collect();
        let out = est.estimate_series(&series).unwrap();
        let peak = out
            .iter()
            .max_by(|a, b| a.estimated_ac_power.total_cmp(&b.estimated_ac_power))
            .unwrap();
        let hour = (peak.timestamp - start).num_minutes() as f64 / 60.0;
        assert!((9.5..=12.5).contains(&hour), "peak at {hour} h UTC");
    }

    #[test]
    fn test_invalid_site_rejected() {
        let site = SiteGeometry::new(95.0, 13.4, 0.0, 30.0, 180.0);
        assert!(PhysicsEstimator::new(site, PhysicsConfig::default()).is_err());
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_ac_rating(
            ghi in 0.0f64..1400.0,
            temp_air in -25.0f64..48.0,
            wind in 0.0f64..25.0,
            minutes in 0i64..(366 * 24 * 60),
            latitude in -60.0f64..60.0,
            tilt in 0.0f64..60.0,
            azimuth in 0.0f64..360.0,
        ) {
            let site = SiteGeometry::new(latitude, 10.0, 0.0, tilt, azimuth);
            let est = PhysicsEstimator::new(site, PhysicsConfig::default()).unwrap();
            let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes);
            let p = est.estimate(&WeatherRecord { timestamp: ts, ghi, temp_air, wind_speed: wind })
                .unwrap()
                .estimated_ac_power;
            prop_assert!(p >= 0.0);
            prop_assert!(p <= est.ac_rating());
        }

        #[test]
        fn prop_no_irradiance_no_power(
            ghi in -50.0f64..=0.0,
            minutes in 0i64..(366 * 24 * 60),
        ) {
            let est = estimator();
            let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes);
            let p = est.estimate(&weather(ts, ghi)).unwrap().estimated_ac_power;
            prop_assert_eq!(p, 0.0);
        }
    }
}
