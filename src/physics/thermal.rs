use crate::domain::ModuleTemperatureCoefficients;

/// SAPM cell temperature (°C)
///
/// Back-of-module temperature `E·exp(a + b·WS) + Ta`, plus the conduction
/// difference `ΔT` scaled to the reference irradiance of 1000 W/m².
pub fn sapm_cell_temperature(
    poa_global: f64,
    temp_air: f64,
    wind_speed: f64,
    coefficients: &ModuleTemperatureCoefficients,
) -> f64 {
    let module = poa_global * (coefficients.a + coefficients.b * wind_speed.max(0.0)).exp() + temp_air;
    module + poa_global / 1000.0 * coefficients.delta_t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_irradiance_is_ambient() {
        let c = ModuleTemperatureCoefficients::default();
        assert_eq!(sapm_cell_temperature(0.0, 12.5, 3.0, &c), 12.5);
    }

    #[test]
    fn test_reference_open_rack() {
        // open rack glass/glass: about 30 °C over ambient at 1000 W/m², 1 m/s
        let c = ModuleTemperatureCoefficients::default();
        let t = sapm_cell_temperature(1000.0, 20.0, 1.0, &c);
        assert!((t - 20.0 - 32.0).abs() < 2.0, "cell temperature {t}");
    }

    #[test]
    fn test_wind_cools() {
        let c = ModuleTemperatureCoefficients::default();
        let calm = sapm_cell_temperature(800.0, 25.0, 0.0, &c);
        let windy = sapm_cell_temperature(800.0, 25.0, 8.0, &c);
        assert!(windy < calm);
    }
}
