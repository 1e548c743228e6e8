//! De Soto single-diode module model
//!
//! Reference parameters are translated to operating conditions, then the
//! maximum power point is located by golden-section search over voltage.
//! Current at a given voltage comes from Newton iteration on the implicit
//! I–V equation
//!
//! `I = IL − I0·(exp((V + I·Rs)/a) − 1) − (V + I·Rs)/Rsh`

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ModuleParameters;

/// Boltzmann constant (eV/K)
const BOLTZMANN_EV: f64 = 8.617_333_262e-5;
const T_REF_K: f64 = 298.15;
const IRRADIANCE_REF: f64 = 1000.0;

const NEWTON_MAX_ITER: usize = 100;
const NEWTON_TOL: f64 = 1e-10;
const GOLDEN_TOL: f64 = 1e-6;
const GOLDEN_MAX_ITER: usize = 200;

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{0}")]
pub struct ConvergenceError(pub String);

/// Five parameters at operating conditions
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiodeParameters {
    pub photocurrent: f64,
    pub saturation_current: f64,
    pub series_resistance: f64,
    pub shunt_resistance: f64,
    /// n·Ns·Vth at cell temperature (V)
    pub nnsvth: f64,
}

/// Translate reference parameters to `irradiance` (W/m²) and `cell_temp` (°C)
pub fn calc_params_desoto(
    module: &ModuleParameters,
    irradiance: f64,
    cell_temp: f64,
) -> DiodeParameters {
    let tc = cell_temp + 273.15;
    let ratio = irradiance / IRRADIANCE_REF;
    let eg = module.eg_ref * (1.0 + module.d_eg_dt * (tc - T_REF_K));

    let photocurrent = ratio * (module.i_l_ref + module.alpha_sc * (tc - T_REF_K));
    let saturation_current = module.i_o_ref
        * (tc / T_REF_K).powi(3)
        * (module.eg_ref / (BOLTZMANN_EV * T_REF_K) - eg / (BOLTZMANN_EV * tc)).exp();
    let shunt_resistance = if ratio > 0.0 {
        module.r_sh_ref / ratio
    } else {
        f64::INFINITY
    };

    DiodeParameters {
        photocurrent: photocurrent.max(0.0),
        saturation_current,
        series_resistance: module.r_s,
        shunt_resistance,
        nnsvth: module.a_ref * tc / T_REF_K,
    }
}

impl DiodeParameters {
    /// Current at terminal voltage `v` (A)
    pub fn current_at(&self, v: f64) -> Result<f64, ConvergenceError> {
        let (il, i0, rs, rsh, a) = (
            self.photocurrent,
            self.saturation_current,
            self.series_resistance,
            self.shunt_resistance,
            self.nnsvth,
        );

        // The residual is concave and decreasing in I, so Newton from IL
        // approaches the root monotonically from above.
        let mut i = il;
        for _ in 0..NEWTON_MAX_ITER {
            let vd = v + i * rs;
            let exp_term = (vd / a).exp();
            let f = il - i0 * (exp_term - 1.0) - vd / rsh - i;
            let df = -i0 * rs / a * exp_term - rs / rsh - 1.0;
            let step = f / df;
            i -= step;
            if !i.is_finite() {
                return Err(ConvergenceError(format!("I-V solve diverged at V={v:.3}")));
            }
            if step.abs() < NEWTON_TOL {
                return Ok(i);
            }
        }
        Err(ConvergenceError(format!(
            "I-V solve did not converge within {NEWTON_MAX_ITER} iterations at V={v:.3}"
        )))
    }

    /// Upper bound of the open-circuit voltage, ignoring shunt and series losses
    pub fn voc_bound(&self) -> f64 {
        if self.photocurrent <= 0.0 {
            return 0.0;
        }
        self.nnsvth * (self.photocurrent / self.saturation_current + 1.0).ln()
    }

    /// Maximum power point as `(v_mp, i_mp, p_mp)`
    pub fn max_power_point(&self) -> Result<(f64, f64, f64), ConvergenceError> {
        if self.photocurrent <= 0.0 {
            return Ok((0.0, 0.0, 0.0));
        }
        let upper = self.voc_bound();
        if upper <= 0.0 || !upper.is_finite() {
            return Err(ConvergenceError(format!(
                "open-circuit voltage bound {upper} is unusable (I0={:e}, a={})",
                self.saturation_current, self.nnsvth
            )));
        }
        let power = |v: f64| self.current_at(v).map(|i| v * i);

        let inv_phi = (5f64.sqrt() - 1.0) / 2.0;
        let (mut lo, mut hi) = (0.0, upper);
        let mut x1 = hi - inv_phi * (hi - lo);
        let mut x2 = lo + inv_phi * (hi - lo);
        let mut p1 = power(x1)?;
        let mut p2 = power(x2)?;

        let mut iterations = 0;
        while hi - lo > GOLDEN_TOL {
            iterations += 1;
            if iterations > GOLDEN_MAX_ITER {
                return Err(ConvergenceError(
                    "maximum power point search did not converge".to_string(),
                ));
            }
            if p1 < p2 {
                lo = x1;
                x1 = x2;
                p1 = p2;
                x2 = lo + inv_phi * (hi - lo);
                p2 = power(x2)?;
            } else {
                hi = x2;
                x2 = x1;
                p2 = p1;
                x1 = hi - inv_phi * (hi - lo);
                p1 = power(x1)?;
            }
        }

        let v_mp = (lo + hi) / 2.0;
        let i_mp = self.current_at(v_mp)?;
        Ok((v_mp, i_mp, (v_mp * i_mp).max(0.0)))
    }
}
