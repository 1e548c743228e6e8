//! Small feed-forward regressor
//!
//! One tanh hidden layer plus a linear skip path from the inputs to the
//! output. The skip path lets the network represent the near-linear part of
//! the irradiance-to-power relation directly, the hidden layer fits the rest.
//! Training is plain mini-batch Adam on mean squared error with early
//! stopping on the validation loss. All randomness comes from one seeded
//! `StdRng`, so a given seed and dataset always produce the same weights.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, Dimension, Zip};
use rand::{rngs::StdRng, seq::SliceRandom, Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SequenceConfig;

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const EPSILON: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpRegressor {
    /// Hidden weights, `hidden × inputs`
    w1: Array2<f64>,
    b1: Array1<f64>,
    /// Hidden-to-output weights
    w2: Array1<f64>,
    /// Direct input-to-output weights
    skip: Array1<f64>,
    /// Output bias, kept as a one-element array so Adam treats it uniformly
    b2: Array1<f64>,
}

/// Per-epoch losses recorded while fitting
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train_loss: Vec<f64>,
    pub validation_loss: Vec<f64>,
    pub best_epoch: usize,
}

struct Gradients {
    w1: Array2<f64>,
    b1: Array1<f64>,
    w2: Array1<f64>,
    skip: Array1<f64>,
    b2: Array1<f64>,
}

struct Moments<D: Dimension> {
    m: ndarray::Array<f64, D>,
    v: ndarray::Array<f64, D>,
}

impl<D: Dimension> Moments<D> {
    fn zeros_like(param: &ndarray::Array<f64, D>) -> Self {
        Self {
            m: ndarray::Array::zeros(param.raw_dim()),
            v: ndarray::Array::zeros(param.raw_dim()),
        }
    }

    fn step(
        &mut self,
        param: &mut ndarray::Array<f64, D>,
        grad: &ndarray::Array<f64, D>,
        lr: f64,
        t: i32,
    ) {
        let c1 = 1.0 - BETA1.powi(t);
        let c2 = 1.0 - BETA2.powi(t);
        Zip::from(param)
            .and(grad)
            .and(&mut self.m)
            .and(&mut self.v)
            .for_each(|p, &g, m, v| {
                *m = BETA1 * *m + (1.0 - BETA1) * g;
                *v = BETA2 * *v + (1.0 - BETA2) * g * g;
                *p -= lr * (*m / c1) / ((*v / c2).sqrt() + EPSILON);
            });
    }
}

struct Adam {
    w1: Moments<ndarray::Ix2>,
    b1: Moments<ndarray::Ix1>,
    w2: Moments<ndarray::Ix1>,
    skip: Moments<ndarray::Ix1>,
    b2: Moments<ndarray::Ix1>,
    t: i32,
}

impl Adam {
    fn new(model: &MlpRegressor) -> Self {
        Self {
            w1: Moments::zeros_like(&model.w1),
            b1: Moments::zeros_like(&model.b1),
            w2: Moments::zeros_like(&model.w2),
            skip: Moments::zeros_like(&model.skip),
            b2: Moments::zeros_like(&model.b2),
            t: 0,
        }
    }

    fn update(&mut self, model: &mut MlpRegressor, grads: &Gradients, lr: f64) {
        self.t += 1;
        self.w1.step(&mut model.w1, &grads.w1, lr, self.t);
        self.b1.step(&mut model.b1, &grads.b1, lr, self.t);
        self.w2.step(&mut model.w2, &grads.w2, lr, self.t);
        self.skip.step(&mut model.skip, &grads.skip, lr, self.t);
        self.b2.step(&mut model.b2, &grads.b2, lr, self.t);
    }
}

impl MlpRegressor {
    /// Xavier-uniform hidden weights, zero skip path and biases
    pub fn init(inputs: usize, hidden: usize, rng: &mut StdRng) -> Self {
        let r1 = (6.0 / (inputs + hidden) as f64).sqrt();
        let r2 = (6.0 / (hidden + 1) as f64).sqrt();
        Self {
            w1: Array2::from_shape_fn((hidden, inputs), |_| rng.gen_range(-r1..r1)),
            b1: Array1::zeros(hidden),
            w2: Array1::from_shape_fn(hidden, |_| rng.gen_range(-r2..r2)),
            skip: Array1::zeros(inputs),
            b2: Array1::zeros(1),
        }
    }

    pub fn input_width(&self) -> usize {
        self.skip.len()
    }

    pub fn predict_one(&self, x: ArrayView1<f64>) -> f64 {
        let hidden = (self.w1.dot(&x) + &self.b1).mapv(f64::tanh);
        hidden.dot(&self.w2) + x.dot(&self.skip) + self.b2[0]
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Array1<f64> {
        let hidden = (x.dot(&self.w1.t()) + &self.b1).mapv(f64::tanh);
        hidden.dot(&self.w2) + x.dot(&self.skip) + self.b2[0]
    }

    fn mse(&self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> f64 {
        if y.is_empty() {
            return 0.0;
        }
        let err = self.predict(x) - &y;
        err.mapv(|e| e * e).mean().unwrap_or(0.0)
    }

    fn gradients(&self, x: ArrayView2<f64>, y: ArrayView1<f64>, l2: f64) -> Gradients {
        let n = y.len() as f64;
        let hidden = (x.dot(&self.w1.t()) + &self.b1).mapv(f64::tanh);
        let output = hidden.dot(&self.w2) + x.dot(&self.skip) + self.b2[0];
        let d_out = (output - &y) * (2.0 / n);

        let w2 = hidden.t().dot(&d_out) + &self.w2 * l2;
        let skip = x.t().dot(&d_out) + &self.skip * l2;
        let b2 = Array1::from_elem(1, d_out.sum());

        let d_hidden = d_out
            .view()
            .insert_axis(Axis(1))
            .dot(&self.w2.view().insert_axis(Axis(0)))
            * hidden.mapv(|h| 1.0 - h * h);
        let w1 = d_hidden.t().dot(&x) + &self.w1 * l2;
        let b1 = d_hidden.sum_axis(Axis(0));

        Gradients {
            w1,
            b1,
            w2,
            skip,
            b2,
        }
    }

    /// Fit on scaled inputs and targets
    ///
    /// Returns the parameters of the epoch with the lowest validation loss.
    /// Without validation rows the training loss drives early stopping.
    pub fn fit(
        train_x: ArrayView2<f64>,
        train_y: ArrayView1<f64>,
        val_x: ArrayView2<f64>,
        val_y: ArrayView1<f64>,
        config: &SequenceConfig,
    ) -> (Self, TrainingHistory) {
        let mut rng = StdRng::seed_from_u64(config.seed);
        let mut model = Self::init(train_x.ncols(), config.hidden_units, &mut rng);
        let mut adam = Adam::new(&model);
        let mut history = TrainingHistory::default();

        let mut best = model.clone();
        let mut best_loss = f64::INFINITY;
        let mut stale = 0usize;
        let mut order: Vec<usize> = (0..train_y.len()).collect();

        for epoch in 0..config.epochs {
            order.shuffle(&mut rng);
            for batch in order.chunks(config.batch_size) {
                let bx = train_x.select(Axis(0), batch);
                let by = train_y.select(Axis(0), batch);
                let grads = model.gradients(bx.view(), by.view(), config.l2);
                adam.update(&mut model, &grads, config.learning_rate);
            }

            let train_loss = model.mse(train_x, train_y);
            let val_loss = if val_y.is_empty() {
                train_loss
            } else {
                model.mse(val_x, val_y)
            };
            history.train_loss.push(train_loss);
            history.validation_loss.push(val_loss);

            if val_loss < best_loss {
                best_loss = val_loss;
                best = model.clone();
                history.best_epoch = epoch;
                stale = 0;
            } else {
                stale += 1;
                if stale >= config.patience {
                    debug!(epoch, best_epoch = history.best_epoch, "early stopping");
                    break;
                }
            }
        }

        debug!(
            epochs = history.train_loss.len(),
            best_epoch = history.best_epoch,
            best_loss,
            "mlp training finished"
        );
        (best, history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::s;

    fn config() -> SequenceConfig {
        SequenceConfig {
            hidden_units: 8,
            epochs: 300,
            batch_size: 16,
            learning_rate: 0.01,
            patience: 300,
            ..SequenceConfig::default()
        }
    }

    fn linear_data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((n, 2), |(i, j)| ((i * (j + 3)) % 17) as f64 / 8.0 - 1.0);
        let y = x.map_axis(Axis(1), |r| 0.7 * r[0] - 0.3 * r[1] + 0.1);
        (x, y)
    }

    #[test]
    fn test_learns_linear_relation() {
        let (x, y) = linear_data(120);
        let empty_x = Array2::<f64>::zeros((0, 2));
        let empty_y = Array1::<f64>::zeros(0);
        let (model, history) = MlpRegressor::fit(x.view(), y.view(), empty_x.view(), empty_y.view(), &config());

        let mse = model.mse(x.view(), y.view());
        assert!(mse < 1e-3, "mse {mse}");
        assert!(history.train_loss.last().unwrap() < &history.train_loss[0]);
    }

    #[test]
    fn test_training_is_deterministic() {
        let (x, y) = linear_data(64);
        let vx = x.slice(s![48.., ..]);
        let vy = y.slice(s![48..]);
        let (a, _) = MlpRegressor::fit(x.view(), y.view(), vx, vy, &config());
        let (b, _) = MlpRegressor::fit(x.view(), y.view(), vx, vy, &config());
        assert_eq!(a, b);
    }

    #[test]
    fn test_predict_one_matches_batch() {
        let mut rng = StdRng::seed_from_u64(7);
        let model = MlpRegressor::init(3, 4, &mut rng);
        let x = Array2::from_shape_fn((5, 3), |(i, j)| (i as f64 - j as f64) / 3.0);
        let batch = model.predict(x.view());
        for (i, row) in x.outer_iter().enumerate() {
            assert!((model.predict_one(row) - batch[i]).abs() < 1e-12);
        }
    }

    #[test]
    fn test_early_stopping_keeps_best_epoch() {
        let (x, y) = linear_data(80);
        let vx = x.slice(s![60.., ..]);
        let noisy = y.slice(s![60..]).mapv(|v| -v);
        let mut cfg = config();
        cfg.patience = 3;
        let (_, history) = MlpRegressor::fit(x.view(), y.view(), vx, noisy.view(), &cfg);
        assert!(history.validation_loss.len() < cfg.epochs);
        assert!(history.best_epoch < history.validation_loss.len());
    }
}
