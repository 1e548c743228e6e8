use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::domain::{ModuleTemperatureCoefficients, SiteGeometry};
use crate::error::{ForecastError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate, Default)]
pub struct Config {
    #[validate(nested)]
    pub data: DataConfig,
    #[validate(nested)]
    pub features: FeatureConfig,
    #[validate(nested)]
    pub site: SiteConfig,
    #[validate(nested)]
    pub physics: PhysicsConfig,
    #[validate(nested)]
    pub sequence: SequenceConfig,
    #[validate(nested)]
    pub blend: BlendConfig,
    #[validate(nested)]
    pub forecast: ForecastConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DataConfig {
    /// Target cadence of the aligned table
    #[validate(range(min = 1, max = 1440))]
    pub cadence_minutes: u32,
    /// Longest hole that is bridged by linear interpolation
    #[validate(range(min = 0, max = 1440))]
    pub max_gap_minutes: u32,
    /// Minimum aligned rows required to train
    #[validate(range(min = 2))]
    pub min_aligned_rows: usize,
    /// IANA zone used for timestamps without an explicit offset
    #[validate(custom(function = "validate_timezone"))]
    pub timezone: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            cadence_minutes: 15,
            max_gap_minutes: 60,
            min_aligned_rows: 96,
            timezone: "UTC".to_string(),
        }
    }
}

impl DataConfig {
    pub fn cadence(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.cadence_minutes as i64)
    }

    pub fn max_gap(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.max_gap_minutes as i64)
    }

    pub fn tz(&self) -> Result<chrono_tz::Tz> {
        self.timezone
            .parse()
            .map_err(|_| ForecastError::InvalidConfig(format!("unknown timezone '{}'", self.timezone)))
    }
}

fn validate_timezone(tz: &str) -> std::result::Result<(), ValidationError> {
    tz.parse::<chrono_tz::Tz>()
        .map(|_| ())
        .map_err(|_| ValidationError::new("unknown_timezone"))
}

/// Feature-engineering settings. Persisted with every model bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FeatureConfig {
    /// Number of lagged power/irradiance values
    #[validate(range(min = 1, max = 96))]
    pub lags: usize,
    /// Trailing window for rolling mean/std of power (inclusive of t)
    #[validate(range(min = 2, max = 96))]
    pub rolling_window: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lags: 4,
            rolling_window: 4,
        }
    }
}

/// Site defaults completing the geometry passed on the command line
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SiteConfig {
    #[validate(range(min = 0.0, max = 90.0))]
    pub tilt: f64,
    #[validate(range(min = 0.0, max = 360.0))]
    pub azimuth: f64,
    #[validate(nested)]
    pub module_temperature_coefficients: ModuleTemperatureCoefficients,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            tilt: 30.0,
            azimuth: 180.0,
            module_temperature_coefficients: ModuleTemperatureCoefficients::default(),
        }
    }
}

impl SiteConfig {
    pub fn geometry(&self, latitude: f64, longitude: f64, altitude: f64) -> SiteGeometry {
        SiteGeometry {
            latitude,
            longitude,
            altitude,
            tilt: self.tilt,
            azimuth: self.azimuth,
            module_temperature_coefficients: self.module_temperature_coefficients,
        }
    }
}

/// De Soto single-diode parameters at reference conditions (1000 W/m², 25 °C)
///
/// Defaults describe a Canadian Solar CS5P-220M module.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ModuleParameters {
    /// Light-generated current (A)
    #[validate(range(exclusive_min = 0.0))]
    pub i_l_ref: f64,
    /// Diode saturation current (A)
    #[validate(range(exclusive_min = 0.0))]
    pub i_o_ref: f64,
    /// Series resistance (Ω)
    #[validate(range(min = 0.0))]
    pub r_s: f64,
    /// Shunt resistance (Ω)
    #[validate(range(exclusive_min = 0.0))]
    pub r_sh_ref: f64,
    /// Modified ideality factor n·Ns·Vth (V)
    #[validate(range(exclusive_min = 0.0))]
    pub a_ref: f64,
    /// Short-circuit current temperature coefficient (A/°C)
    pub alpha_sc: f64,
    /// Bandgap at reference temperature (eV)
    pub eg_ref: f64,
    /// Bandgap temperature dependence (1/K)
    pub d_eg_dt: f64,
}

impl Default for ModuleParameters {
    fn default() -> Self {
        Self {
            i_l_ref: 5.114,
            i_o_ref: 8.196e-10,
            r_s: 1.065,
            r_sh_ref: 381.68,
            a_ref: 2.6373,
            alpha_sc: 0.004539,
            eg_ref: 1.121,
            d_eg_dt: -0.0002677,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct InverterConfig {
    /// Nameplate AC rating (W). Output is clipped here.
    #[validate(range(min = 1.0))]
    pub ac_rating_w: f64,
    /// DC power at which the efficiency curve's load ratio is 1.0 (W)
    #[validate(range(min = 1.0))]
    pub dc_rating_w: f64,
    /// (DC load ratio, efficiency) points, ascending by load ratio
    #[validate(custom(function = "validate_efficiency_curve"))]
    pub efficiency_curve: Vec<(f64, f64)>,
}

impl Default for InverterConfig {
    fn default() -> Self {
        Self {
            ac_rating_w: 2000.0,
            dc_rating_w: 2100.0,
            efficiency_curve: vec![
                (0.0, 0.0),
                (0.05, 0.90),
                (0.10, 0.935),
                (0.20, 0.955),
                (0.30, 0.962),
                (0.50, 0.966),
                (0.75, 0.965),
                (1.00, 0.962),
            ],
        }
    }
}

fn validate_efficiency_curve(curve: &[(f64, f64)]) -> std::result::Result<(), ValidationError> {
    if curve.len() < 2 {
        return Err(ValidationError::new("efficiency_curve_too_short"));
    }
    let ascending = curve.windows(2).all(|w| w[0].0 < w[1].0);
    let in_range = curve
        .iter()
        .all(|&(load, eff)| load >= 0.0 && (0.0..=1.0).contains(&eff));
    if !ascending || !in_range {
        return Err(ValidationError::new("efficiency_curve_invalid"));
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PhysicsConfig {
    #[validate(nested)]
    pub module: ModuleParameters,
    #[validate(range(min = 1))]
    pub modules_per_string: u32,
    #[validate(range(min = 1))]
    pub strings: u32,
    /// Wiring, soiling and mismatch losses applied to DC power
    #[validate(range(min = 0.0, max = 0.5))]
    pub dc_loss_fraction: f64,
    /// Ground reflectance
    #[validate(range(min = 0.0, max = 1.0))]
    pub albedo: f64,
    /// Schlick incidence-angle-modifier exponent
    #[validate(range(min = 1.0, max = 20.0))]
    pub iam_factor: f64,
    #[validate(nested)]
    pub inverter: InverterConfig,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            module: ModuleParameters::default(),
            modules_per_string: 10,
            strings: 1,
            dc_loss_fraction: 0.05,
            albedo: 0.2,
            iam_factor: 5.0,
            inverter: InverterConfig::default(),
        }
    }
}

/// Learned model used for the sequence component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SequenceKind {
    Mlp,
    RandomForest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SequenceConfig {
    pub kind: SequenceKind,
    /// Number of past feature vectors per prediction (W)
    #[validate(range(min = 1, max = 192))]
    pub window: usize,
    #[validate(range(min = 1, max = 512))]
    pub hidden_units: usize,
    #[validate(range(min = 1))]
    pub epochs: usize,
    #[validate(range(min = 1))]
    pub batch_size: usize,
    #[validate(range(min = 1e-6, max = 1.0))]
    pub learning_rate: f64,
    #[validate(range(min = 0.0, max = 1.0))]
    pub l2: f64,
    /// Epochs without validation improvement before stopping
    #[validate(range(min = 1))]
    pub patience: usize,
    /// Chronological fraction held out for validation and blend fitting
    #[validate(range(min = 0.05, max = 0.5))]
    pub validation_split: f64,
    pub seed: u64,
    #[validate(range(min = 1, max = 1000))]
    pub n_trees: usize,
    #[validate(range(min = 1, max = 64))]
    pub max_depth: usize,
    #[validate(range(min = 2))]
    pub min_samples_split: usize,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            kind: SequenceKind::Mlp,
            window: 8,
            hidden_units: 16,
            epochs: 80,
            batch_size: 32,
            learning_rate: 0.005,
            l2: 1e-5,
            patience: 10,
            validation_split: 0.2,
            seed: 42,
            n_trees: 50,
            max_depth: 10,
            min_samples_split: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct BlendConfig {
    /// Number of equal hour-of-day buckets with their own weights
    #[validate(range(min = 1, max = 24))]
    pub dayparts: usize,
    /// Buckets with fewer samples use the global fit
    #[validate(range(min = 3))]
    pub min_samples_per_bucket: usize,
}

impl Default for BlendConfig {
    fn default() -> Self {
        Self {
            dayparts: 4,
            min_samples_per_bucket: 24,
        }
    }
}

/// Power estimators that feed the blend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EstimatorKind {
    Physics,
    Sequence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ForecastConfig {
    /// Longest horizon the forecast generator accepts
    #[validate(range(min = 1, max = 2880))]
    pub max_horizon_steps: usize,
    /// Estimators enabled at inference. A disabled one is reported as unavailable.
    #[validate(length(min = 1))]
    pub components: Vec<EstimatorKind>,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            max_horizon_steps: 192,
            components: vec![EstimatorKind::Physics, EstimatorKind::Sequence],
        }
    }
}

impl ForecastConfig {
    pub fn is_enabled(&self, kind: EstimatorKind) -> bool {
        self.components.contains(&kind)
    }
}

impl Config {
    /// Layer defaults, an optional TOML file and `PVF__` environment variables
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            if !path.exists() {
                return Err(ForecastError::InvalidConfig(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            figment = figment.merge(Toml::file(path));
        }
        let config: Config = figment
            .merge(Env::prefixed("PVF__").split("__"))
            .extract()
            .map_err(|e| ForecastError::InvalidConfig(e.to_string()))?;
        config.check()?;
        Ok(config)
    }

    /// Reject invalid hyperparameters before any computation
    pub fn check(&self) -> Result<()> {
        self.validate()?;
        if self.data.max_gap_minutes < self.data.cadence_minutes {
            tracing::debug!(
                max_gap_minutes = self.data.max_gap_minutes,
                cadence_minutes = self.data.cadence_minutes,
                "max gap below cadence; no interpolation will take place"
            );
        }
        if self.physics.inverter.efficiency_curve[0].0 > 0.0 {
            return Err(ForecastError::InvalidConfig(
                "inverter efficiency curve must start at load ratio 0".to_string(),
            ));
        }
        #[cfg(not(feature = "forest"))]
        if self.sequence.kind == SequenceKind::RandomForest {
            return Err(ForecastError::InvalidConfig(
                "sequence.kind = random_forest requires the 'forest' feature".to_string(),
            ));
        }
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| ForecastError::Serialization(e.to_string()))
    }
}
