//! Random forest sequence model backed by SmartCore
//!
//! Same scaled inputs as the MLP. Trees are deterministic for a fixed seed
//! and serialize losslessly with bincode.

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use smartcore::ensemble::random_forest_regressor::{
    RandomForestRegressor, RandomForestRegressorParameters,
};
use smartcore::linalg::basic::matrix::DenseMatrix;
use tracing::debug;

use crate::config::SequenceConfig;
use crate::error::{ForecastError, Result};

type Forest = RandomForestRegressor<f64, f64, DenseMatrix<f64>, Vec<f64>>;

#[derive(Debug, Serialize, Deserialize)]
pub struct ForestRegressor {
    model: Forest,
    n_features: usize,
    pub n_trees: usize,
    pub max_depth: usize,
}

impl ForestRegressor {
    pub fn parameters(config: &SequenceConfig) -> RandomForestRegressorParameters {
        RandomForestRegressorParameters {
            max_depth: Some(config.max_depth.min(u16::MAX as usize) as u16),
            min_samples_leaf: 2,
            min_samples_split: config.min_samples_split,
            n_trees: config.n_trees,
            m: None,
            keep_samples: false,
            seed: config.seed,
        }
    }

    pub fn fit(x: ArrayView2<f64>, y: ArrayView1<f64>, config: &SequenceConfig) -> Result<Self> {
        if x.nrows() == 0 || x.nrows() != y.len() {
            return Err(ForecastError::InsufficientData {
                stage: "random forest training",
                required: 1,
                available: x.nrows().min(y.len()),
            });
        }
        let (n_samples, n_features) = x.dim();
        let flat: Vec<f64> = x.iter().copied().collect();
        let matrix = DenseMatrix::new(n_samples, n_features, flat, false);
        let targets = y.to_vec();

        let model = RandomForestRegressor::fit(&matrix, &targets, Self::parameters(config))
            .map_err(|e| ForecastError::Model(format!("random forest training failed: {e:?}")))?;
        debug!(n_samples, n_features, n_trees = config.n_trees, "random forest fitted");

        Ok(Self {
            model,
            n_features,
            n_trees: config.n_trees,
            max_depth: config.max_depth,
        })
    }

    pub fn input_width(&self) -> usize {
        self.n_features
    }

    pub fn predict_one(&self, x: ArrayView1<f64>) -> Result<f64> {
        let row = DenseMatrix::new(1, self.n_features, x.to_vec(), false);
        let predictions = self
            .model
            .predict(&row)
            .map_err(|e| ForecastError::Model(format!("random forest prediction failed: {e:?}")))?;
        predictions
            .first()
            .copied()
            .ok_or_else(|| ForecastError::Model("random forest returned no prediction".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array1, Array2};

    fn config() -> SequenceConfig {
        SequenceConfig {
            n_trees: 10,
            max_depth: 5,
            min_samples_split: 2,
            ..SequenceConfig::default()
        }
    }

    #[test]
    fn test_parameters_follow_config() {
        let params = ForestRegressor::parameters(&config());
        assert_eq!(params.n_trees, 10);
        assert_eq!(params.max_depth, Some(5));
        assert_eq!(params.min_samples_split, 2);
        assert!(!params.keep_samples);
    }

    #[test]
    fn test_train_and_predict() {
        // y = 2x1 + 3x2
        let x: Array2<f64> = array![
            [1.0, 1.0],
            [2.0, 1.0],
            [1.0, 2.0],
            [2.0, 2.0],
            [3.0, 3.0],
            [4.0, 2.0],
            [2.0, 4.0],
            [3.0, 1.0],
            [1.0, 3.0],
            [4.0, 4.0],
        ];
        let y: Array1<f64> = x.rows().into_iter().map(|r| 2.0 * r[0] + 3.0 * r[1]).collect();

        let forest = ForestRegressor::fit(x.view(), y.view(), &config()).unwrap();
        assert_eq!(forest.input_width(), 2);

        let p = forest.predict_one(array![3.0, 3.0].view()).unwrap();
        assert!(p > 5.0 && p < 20.0, "prediction {p}");
    }

    #[test]
    fn test_bincode_round_trip_predicts_identically() {
        let x = Array2::from_shape_fn((40, 3), |(i, j)| ((i * 7 + j * 3) % 11) as f64);
        let y: Array1<f64> = x.rows().into_iter().map(|r| r[0] - r[1] + 0.5 * r[2]).collect();
        let forest = ForestRegressor::fit(x.view(), y.view(), &config()).unwrap();

        let bytes = bincode::serialize(&forest).unwrap();
        let restored: ForestRegressor = bincode::deserialize(&bytes).unwrap();
        for row in x.rows() {
            assert_eq!(
                forest.predict_one(row).unwrap().to_bits(),
                restored.predict_one(row).unwrap().to_bits()
            );
        }
    }

    #[test]
    fn test_empty_training_set_refused() {
        let x = Array2::<f64>::zeros((0, 2));
        let y = Array1::<f64>::zeros(0);
        assert!(ForestRegressor::fit(x.view(), y.view(), &config()).is_err());
    }
}
