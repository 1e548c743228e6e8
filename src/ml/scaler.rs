use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};

/// Columns with a spread below this are mapped to zero
const MIN_STD: f64 = 1e-10;

/// Z-score statistics of feature columns and the target
///
/// Fitted once on the training split and persisted with the model. Never
/// refitted at inference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedScaler {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    pub target_mean: f64,
    pub target_std: f64,
}

fn mean_std(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let n = values.clone().count().max(1) as f64;
    let mean = values.clone().sum::<f64>() / n;
    let variance = values.map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

fn standardize(value: f64, mean: f64, std: f64) -> f64 {
    if std < MIN_STD {
        0.0
    } else {
        (value - mean) / std
    }
}

impl FittedScaler {
    pub fn fit(rows: &[&[f64]], targets: &[f64]) -> Result<Self> {
        let Some(first) = rows.first() else {
            return Err(ForecastError::InsufficientData {
                stage: "scaler fitting",
                required: 1,
                available: 0,
            });
        };
        let width = first.len();
        if rows.iter().any(|r| r.len() != width) {
            return Err(ForecastError::Misaligned(
                "feature rows of unequal width".to_string(),
            ));
        }

        let (means, stds): (Vec<f64>, Vec<f64>) = (0..width)
            .map(|col| mean_std(rows.iter().map(move |r| r[col])))
            .unzip();
        let (target_mean, target_std) = mean_std(targets.iter().copied());

        Ok(Self {
            means,
            stds,
            target_mean,
            target_std,
        })
    }

    pub fn width(&self) -> usize {
        self.means.len()
    }

    /// Scale a full feature row
    pub fn transform_into(&self, values: &[f64], out: &mut Vec<f64>) -> Result<()> {
        if values.len() != self.width() {
            return Err(ForecastError::VersionMismatch(format!(
                "scaler fitted on {} columns, got {}",
                self.width(),
                values.len()
            )));
        }
        out.extend(
            values
                .iter()
                .zip(self.means.iter().zip(&self.stds))
                .map(|(v, (m, s))| standardize(*v, *m, *s)),
        );
        Ok(())
    }

    /// Scale values that share the statistics of the given columns
    pub fn transform_columns_into(&self, values: &[f64], columns: &[usize], out: &mut Vec<f64>) {
        out.extend(
            values
                .iter()
                .zip(columns)
                .map(|(v, &c)| standardize(*v, self.means[c], self.stds[c])),
        );
    }

    pub fn scale_target(&self, value: f64) -> f64 {
        standardize(value, self.target_mean, self.target_std)
    }

    pub fn unscale_target(&self, scaled: f64) -> f64 {
        if self.target_std < MIN_STD {
            self.target_mean
        } else {
            scaled * self.target_std + self.target_mean
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fit_and_transform() {
        let a = [1.0, 10.0, 5.0];
        let b = [3.0, 30.0, 5.0];
        let scaler = FittedScaler::fit(&[&a[..], &b[..]], &[100.0, 300.0]).unwrap();

        assert_eq!(scaler.width(), 3);
        let mut out = Vec::new();
        scaler.transform_into(&a, &mut out).unwrap();
        assert_eq!(out, vec![-1.0, -1.0, 0.0]);

        assert_eq!(scaler.scale_target(300.0), 1.0);
        assert_eq!(scaler.unscale_target(-1.0), 100.0);
    }

    #[test]
    fn test_width_mismatch_is_version_error() {
        let scaler = FittedScaler::fit(&[&[1.0, 2.0][..]], &[1.0]).unwrap();
        let mut out = Vec::new();
        let err = scaler.transform_into(&[1.0], &mut out).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::VersionMismatchError);
    }

    #[test]
    fn test_columns_reuse_statistics() {
        let a = [0.0, 10.0];
        let b = [2.0, 30.0];
        let scaler = FittedScaler::fit(&[&a[..], &b[..]], &[0.0, 1.0]).unwrap();
        let mut out = Vec::new();
        scaler.transform_columns_into(&[30.0], &[1], &mut out);
        assert_eq!(out, vec![1.0]);
    }

    #[test]
    fn test_empty_fit_refused() {
        assert!(FittedScaler::fit(&[], &[]).is_err());
    }
}
