//! Irradiance decomposition and transposition
//!
//! GHI is split into beam and diffuse parts with the Erbs correlation, then
//! projected onto the array plane with an isotropic sky and a ground
//! reflection term.

use serde::{Deserialize, Serialize};

/// Solar constant (W/m²)
pub const SOLAR_CONSTANT: f64 = 1367.0;

/// Zenith beyond which beam irradiance is not resolved (degrees)
const MAX_BEAM_ZENITH: f64 = 87.0;
/// Floor on cos(zenith) when forming the clearness index
const MIN_COS_ZENITH: f64 = 0.065;

/// Extraterrestrial normal irradiance with Spencer's eccentricity correction
pub fn extraterrestrial(day_angle: f64) -> f64 {
    let b = day_angle;
    SOLAR_CONSTANT
        * (1.000110
            + 0.034221 * b.cos()
            + 0.001280 * b.sin()
            + 0.000719 * (2.0 * b).cos()
            + 0.000077 * (2.0 * b).sin())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentIrradiance {
    pub ghi: f64,
    pub dni: f64,
    pub dhi: f64,
}

/// Diffuse fraction of GHI for a clearness index
pub fn erbs_diffuse_fraction(kt: f64) -> f64 {
    if kt <= 0.22 {
        1.0 - 0.09 * kt
    } else if kt <= 0.80 {
        0.9511 - 0.1604 * kt + 4.388 * kt.powi(2) - 16.638 * kt.powi(3) + 12.336 * kt.powi(4)
    } else {
        0.165
    }
}

/// Erbs decomposition of GHI into DNI and DHI
pub fn erbs(ghi: f64, zenith: f64, dni_extra: f64) -> ComponentIrradiance {
    if ghi <= 0.0 {
        return ComponentIrradiance {
            ghi: 0.0,
            dni: 0.0,
            dhi: 0.0,
        };
    }
    let cos_zenith = zenith.to_radians().cos().max(MIN_COS_ZENITH);
    let kt = (ghi / (dni_extra * cos_zenith)).clamp(0.0, 1.0);
    let dhi = ghi * erbs_diffuse_fraction(kt);

    let dni = if zenith >= MAX_BEAM_ZENITH {
        0.0
    } else {
        ((ghi - dhi) / cos_zenith).clamp(0.0, dni_extra)
    };
    let dhi = if dni == 0.0 { ghi } else { dhi };

    ComponentIrradiance { ghi, dni, dhi }
}

/// Angle between the sun and the array normal (degrees)
pub fn angle_of_incidence(
    surface_tilt: f64,
    surface_azimuth: f64,
    solar_zenith: f64,
    solar_azimuth: f64,
) -> f64 {
    let tilt = surface_tilt.to_radians();
    let zenith = solar_zenith.to_radians();
    let cos_aoi = zenith.cos() * tilt.cos()
        + zenith.sin() * tilt.sin() * (solar_azimuth - surface_azimuth).to_radians().cos();
    cos_aoi.clamp(-1.0, 1.0).acos().to_degrees()
}

/// Schlick approximation of the Fresnel incidence angle modifier
///
/// `exponent` of 5 reproduces the original approximation.
pub fn schlick_iam(aoi: f64, exponent: f64) -> f64 {
    if aoi >= 90.0 {
        return 0.0;
    }
    let cos_aoi = aoi.to_radians().cos();
    (1.0 - (1.0 - cos_aoi).powf(exponent)).clamp(0.0, 1.0)
}

/// Plane-of-array irradiance components (W/m²)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaneOfArray {
    /// Beam component before reflection losses
    pub beam: f64,
    pub sky_diffuse: f64,
    pub ground_diffuse: f64,
    /// Irradiance reaching the cells, beam attenuated by the IAM
    pub effective: f64,
    pub aoi: f64,
}

impl PlaneOfArray {
    pub fn global(&self) -> f64 {
        self.beam + self.sky_diffuse + self.ground_diffuse
    }
}

/// Isotropic-sky transposition with albedo reflection
pub fn poa_isotropic(
    components: &ComponentIrradiance,
    surface_tilt: f64,
    aoi: f64,
    albedo: f64,
    iam_exponent: f64,
) -> PlaneOfArray {
    let tilt = surface_tilt.to_radians();
    let cos_aoi = aoi.to_radians().cos();

    let beam = if cos_aoi > 0.0 {
        components.dni * cos_aoi
    } else {
        0.0
    };
    let sky_diffuse = components.dhi * (1.0 + tilt.cos()) / 2.0;
    let ground_diffuse = components.ghi * albedo * (1.0 - tilt.cos()) / 2.0;
    let effective = beam * schlick_iam(aoi, iam_exponent) + sky_diffuse + ground_diffuse;

    PlaneOfArray {
        beam,
        sky_diffuse,
        ground_diffuse,
        effective: effective.max(0.0),
        aoi,
    }
}
