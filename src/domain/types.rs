use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

// ============================================================================
// Input Records
// ============================================================================

/// Electrical telemetry sample from the inverter
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: DateTime<Utc>,
    /// DC voltage (V)
    pub voltage: f64,
    /// DC current (A)
    pub current: f64,
    /// AC output power (W), the training target
    pub ac_power: f64,
    /// Cumulative energy yield (kWh)
    pub cumulative_yield: f64,
}

/// Weather observation or forecast point
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeatherRecord {
    pub timestamp: DateTime<Utc>,
    /// Global horizontal irradiance (W/m²)
    pub ghi: f64,
    /// Ambient air temperature (°C)
    pub temp_air: f64,
    /// Wind speed (m/s)
    pub wind_speed: f64,
}

/// Telemetry joined with weather on a regular time grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlignedRow {
    pub timestamp: DateTime<Utc>,
    pub voltage: f64,
    pub current: f64,
    pub ac_power: f64,
    pub cumulative_yield: f64,
    pub ghi: f64,
    pub temp_air: f64,
    pub wind_speed: f64,
}

impl AlignedRow {
    pub fn join(telemetry: &TelemetryRecord, weather: &WeatherRecord) -> Self {
        Self {
            timestamp: telemetry.timestamp,
            voltage: telemetry.voltage,
            current: telemetry.current,
            ac_power: telemetry.ac_power,
            cumulative_yield: telemetry.cumulative_yield,
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

// ============================================================================
// Site Geometry
// ============================================================================

/// SAPM module temperature model coefficients
///
/// Defaults are the open-rack glass/glass values.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct ModuleTemperatureCoefficients {
    /// Upper limit of module temperature at low wind, high irradiance
    #[validate(range(min = -10.0, max = 0.0))]
    pub a: f64,
    /// Rate at which module temperature drops as wind speed increases
    #[validate(range(min = -1.0, max = 0.0))]
    pub b: f64,
    /// Difference between cell and module back temperature at 1000 W/m² (°C)
    #[validate(range(min = 0.0, max = 20.0))]
    pub delta_t: f64,
}

impl Default for ModuleTemperatureCoefficients {
    fn default() -> Self {
        Self {
            a: -3.47,
            b: -0.0594,
            delta_t: 3.0,
        }
    }
}

/// Fixed geometry of a PV installation. Supplied, never learned.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
pub struct SiteGeometry {
    /// Latitude (degrees, positive = North)
    #[validate(range(min = -90.0, max = 90.0))]
    pub latitude: f64,
    /// Longitude (degrees, positive = East)
    #[validate(range(min = -180.0, max = 180.0))]
    pub longitude: f64,
    /// Altitude above sea level (m)
    #[serde(default)]
    #[validate(range(min = -500.0, max = 9000.0))]
    pub altitude: f64,
    /// Panel tilt from horizontal (degrees)
    #[validate(range(min = 0.0, max = 90.0))]
    pub tilt: f64,
    /// Panel azimuth (degrees, 0 = North, 180 = South)
    #[validate(range(min = 0.0, max = 360.0))]
    pub azimuth: f64,
    #[serde(default)]
    #[validate(nested)]
    pub module_temperature_coefficients: ModuleTemperatureCoefficients,
}

impl SiteGeometry {
    pub fn new(latitude: f64, longitude: f64, altitude: f64, tilt: f64, azimuth: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            tilt,
            azimuth,
            module_temperature_coefficients: ModuleTemperatureCoefficients::default(),
        }
    }

    /// Validate geometry, rejecting NaN as well as out-of-range values
    pub fn check(&self) -> crate::error::Result<()> {
        let values = [
            self.latitude,
            self.longitude,
            self.altitude,
            self.tilt,
            self.azimuth,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(crate::error::ForecastError::InvalidConfig(
                "site geometry contains non-finite values".to_string(),
            ));
        }
        self.validate()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_valid_site() {
        let site = SiteGeometry::new(59.33, 18.06, 20.0, 35.0, 180.0);
        assert!(site.check().is_ok());
    }

    #[rstest]
    #[case(95.0, 18.0, 30.0, 180.0)]
    #[case(59.0, -190.0, 30.0, 180.0)]
    #[case(59.0, 18.0, 95.0, 180.0)]
    #[case(59.0, 18.0, 30.0, 400.0)]
    #[case(f64::NAN, 18.0, 30.0, 180.0)]
    fn test_invalid_site_rejected(
        #[case] lat: f64,
        #[case] lon: f64,
        #[case] tilt: f64,
        #[case] azimuth: f64,
    ) {
        let site = SiteGeometry::new(lat, lon, 0.0, tilt, azimuth);
        let err = site.check().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ConfigError);
    }

    #[test]
    fn test_invalid_thermal_coefficients_rejected() {
        let mut site = SiteGeometry::new(45.0, 7.0, 0.0, 30.0, 180.0);
        site.module_temperature_coefficients.a = 3.0;
        assert!(site.check().is_err());
    }

    #[test]
    fn test_join_keeps_both_sides() {
        let ts = chrono::TimeZone::with_ymd_and_hms(&Utc, 2024, 6, 21, 12, 0, 0).unwrap();
        let telemetry = TelemetryRecord {
            timestamp: ts,
            voltage: 380.0,
            current: 8.0,
            ac_power: 2900.0,
            cumulative_yield: 1234.5,
        };
        let weather = WeatherRecord {
            timestamp: ts,
            ghi: 850.0,
            temp_air: 24.0,
            wind_speed: 2.5,
        };
        let row = AlignedRow::join(&telemetry, &weather);
        assert_eq!(row.ac_power, 2900.0);
        assert_eq!(row.ghi, 850.0);
        assert_eq!(row.weather(), weather);
    }
}
