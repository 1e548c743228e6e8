use crate::config::InverterConfig;

/// Piecewise-linear efficiency over DC load ratio with AC clipping
#[derive(Debug, Clone, PartialEq)]
pub struct InverterModel {
    ac_rating: f64,
    dc_rating: f64,
    curve: Vec<(f64, f64)>,
}

impl InverterModel {
    pub fn new(config: &InverterConfig) -> Self {
        Self {
            ac_rating: config.ac_rating_w,
            dc_rating: config.dc_rating_w,
            curve: config.efficiency_curve.clone(),
        }
    }

    pub fn ac_rating(&self) -> f64 {
        self.ac_rating
    }

    /// Efficiency at a DC load ratio; flat beyond the last curve point
    pub fn efficiency(&self, load_ratio: f64) -> f64 {
        let Some(&(first_load, first_eff)) = self.curve.first() else {
            return 0.0;
        };
        if load_ratio <= first_load {
            return first_eff;
        }
        for pair in self.curve.windows(2) {
            let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
            if load_ratio <= x1 {
                return y0 + (y1 - y0) * (load_ratio - x0) / (x1 - x0);
            }
        }
        self.curve.last().map(|&(_, eff)| eff).unwrap_or(0.0)
    }

    /// AC output (W) for a DC input (W)
    pub fn ac_power(&self, dc_power: f64) -> f64 {
        if dc_power <= 0.0 {
            return 0.0;
        }
        let ac = dc_power * self.efficiency(dc_power / self.dc_rating);
        ac.clamp(0.0, self.ac_rating)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn model() -> InverterModel {
        InverterModel::new(&InverterConfig::default())
    }

    #[rstest]
    #[case(0.0, 0.0)]
    #[case(0.05, 0.90)]
    #[case(0.075, 0.9175)]
    #[case(1.0, 0.962)]
    #[case(1.4, 0.962)]
    fn test_efficiency_interpolation(#[case] load: f64, #[case] expected: f64) {
        assert!((model().efficiency(load) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_clipping_at_ac_rating() {
        let inverter = model();
        assert_eq!(inverter.ac_power(5000.0), 2000.0);
        assert!(inverter.ac_power(1000.0) < 1000.0);
        assert_eq!(inverter.ac_power(-10.0), 0.0);
    }
}
