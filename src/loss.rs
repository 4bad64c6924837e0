//! Loss registry and per-sample loss functions.
//!
//! Every function here works on a single sample (one row of an output layer) and
//! averages over that row, so a batch loss is the mean of the per-sample values.
//! Backends use them like:
//!
//! - run the forward pass
//! - compute `d_pred` for each sample via [`LossKind::backward`]
//! - backpropagate and update parameters with an optimizer

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Fuzz factor used for clipping, matching the usual Keras epsilon.
pub const EPSILON: f32 = 1e-7;

const HUBER_DELTA: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
/// Supported loss functions.
pub enum LossKind {
    MeanSquaredError,
    MeanAbsoluteError,
    MeanAbsolutePercentageError,
    MeanSquaredLogarithmicError,
    Huber,
    LogCosh,
    Poisson,
    /// Expects probabilities (e.g. a `sigmoid` output) and targets in `[0, 1]`.
    BinaryCrossentropy,
    /// Expects a probability row (e.g. a `softmax` output) and a one-hot target.
    CategoricalCrossentropy,
}

impl LossKind {
    pub const ALL: [LossKind; 9] = [
        LossKind::MeanSquaredError,
        LossKind::MeanAbsoluteError,
        LossKind::MeanAbsolutePercentageError,
        LossKind::MeanSquaredLogarithmicError,
        LossKind::Huber,
        LossKind::LogCosh,
        LossKind::Poisson,
        LossKind::BinaryCrossentropy,
        LossKind::CategoricalCrossentropy,
    ];

    pub fn name(self) -> &'static str {
        match self {
            LossKind::MeanSquaredError => "MeanSquaredError",
            LossKind::MeanAbsoluteError => "MeanAbsoluteError",
            LossKind::MeanAbsolutePercentageError => "MeanAbsolutePercentageError",
            LossKind::MeanSquaredLogarithmicError => "MeanSquaredLogarithmicError",
            LossKind::Huber => "Huber",
            LossKind::LogCosh => "LogCosh",
            LossKind::Poisson => "Poisson",
            LossKind::BinaryCrossentropy => "BinaryCrossentropy",
            LossKind::CategoricalCrossentropy => "CategoricalCrossentropy",
        }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|k| k.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::Set(format!("unknown loss {name:?}")))
    }

    pub fn names() -> impl Iterator<Item = &'static str> {
        Self::ALL.into_iter().map(LossKind::name)
    }

    pub fn is_classification(self) -> bool {
        matches!(
            self,
            LossKind::BinaryCrossentropy | LossKind::CategoricalCrossentropy
        )
    }

    /// Compute the loss of one sample.
    ///
    /// Shape contract: `pred.len() == target.len()`.
    #[inline]
    pub fn forward(self, pred: &[f32], target: &[f32]) -> f32 {
        check_shapes(pred, target);
        if pred.is_empty() {
            return 0.0;
        }
        let inv_n = 1.0 / pred.len() as f32;
        match self {
            LossKind::MeanSquaredError => {
                let mut sum = 0.0_f32;
                for (&p, &t) in pred.iter().zip(target) {
                    let diff = p - t;
                    sum = diff.mul_add(diff, sum);
                }
                sum * inv_n
            }
            LossKind::MeanAbsoluteError => {
                pred.iter().zip(target).map(|(p, t)| (p - t).abs()).sum::<f32>() * inv_n
            }
            LossKind::MeanAbsolutePercentageError => {
                let sum: f32 = pred
                    .iter()
                    .zip(target)
                    .map(|(p, t)| (t - p).abs() / t.abs().max(EPSILON))
                    .sum();
                100.0 * sum * inv_n
            }
            LossKind::MeanSquaredLogarithmicError => {
                let mut sum = 0.0_f32;
                for (&p, &t) in pred.iter().zip(target) {
                    let diff = p.max(EPSILON).ln_1p() - t.max(EPSILON).ln_1p();
                    sum = diff.mul_add(diff, sum);
                }
                sum * inv_n
            }
            LossKind::Huber => {
                let sum: f32 = pred
                    .iter()
                    .zip(target)
                    .map(|(p, t)| {
                        let e = (p - t).abs();
                        if e <= HUBER_DELTA {
                            0.5 * e * e
                        } else {
                            HUBER_DELTA * (e - 0.5 * HUBER_DELTA)
                        }
                    })
                    .sum();
                sum * inv_n
            }
            LossKind::LogCosh => {
                let sum: f32 = pred.iter().zip(target).map(|(p, t)| log_cosh(p - t)).sum();
                sum * inv_n
            }
            LossKind::Poisson => {
                let sum: f32 = pred
                    .iter()
                    .zip(target)
                    .map(|(&p, &t)| p - t * (p + EPSILON).ln())
                    .sum();
                sum * inv_n
            }
            LossKind::BinaryCrossentropy => {
                let sum: f32 = pred
                    .iter()
                    .zip(target)
                    .map(|(&p, &t)| {
                        let p = p.clamp(EPSILON, 1.0 - EPSILON);
                        -(t * p.ln() + (1.0 - t) * (1.0 - p).ln())
                    })
                    .sum();
                sum * inv_n
            }
            LossKind::CategoricalCrossentropy => categorical_crossentropy(pred, target),
        }
    }

    /// Compute the loss of one sample and its gradient w.r.t `pred`.
    ///
    /// Writes `d_pred = dL/d(pred)` into `d_pred` and returns the loss.
    ///
    /// Shape contract:
    /// - `pred.len() == target.len()`
    /// - `pred.len() == d_pred.len()`
    #[inline]
    pub fn backward(self, pred: &[f32], target: &[f32], d_pred: &mut [f32]) -> f32 {
        check_shapes(pred, target);
        assert_eq!(
            pred.len(),
            d_pred.len(),
            "pred len {} does not match d_pred len {}",
            pred.len(),
            d_pred.len()
        );
        if pred.is_empty() {
            return 0.0;
        }
        let inv_n = 1.0 / pred.len() as f32;

        for i in 0..pred.len() {
            let (p, t) = (pred[i], target[i]);
            d_pred[i] = match self {
                LossKind::MeanSquaredError => 2.0 * (p - t) * inv_n,
                LossKind::MeanAbsoluteError => sign(p - t) * inv_n,
                LossKind::MeanAbsolutePercentageError => {
                    100.0 * sign(p - t) / t.abs().max(EPSILON) * inv_n
                }
                LossKind::MeanSquaredLogarithmicError => {
                    if p > EPSILON {
                        let diff = p.ln_1p() - t.max(EPSILON).ln_1p();
                        2.0 * diff / (1.0 + p) * inv_n
                    } else {
                        0.0
                    }
                }
                LossKind::Huber => (p - t).clamp(-HUBER_DELTA, HUBER_DELTA) * inv_n,
                LossKind::LogCosh => (p - t).tanh() * inv_n,
                LossKind::Poisson => (1.0 - t / (p + EPSILON)) * inv_n,
                LossKind::BinaryCrossentropy => {
                    if p <= EPSILON || p >= 1.0 - EPSILON {
                        0.0
                    } else {
                        (p - t) / (p * (1.0 - p)) * inv_n
                    }
                }
                LossKind::CategoricalCrossentropy => {
                    if p <= EPSILON {
                        0.0
                    } else {
                        -t / p.min(1.0 - EPSILON)
                    }
                }
            };
        }

        self.forward(pred, target)
    }
}

#[inline]
fn check_shapes(pred: &[f32], target: &[f32]) {
    assert_eq!(
        pred.len(),
        target.len(),
        "pred len {} does not match target len {}",
        pred.len(),
        target.len()
    );
}

#[inline]
fn sign(x: f32) -> f32 {
    if x > 0.0 {
        1.0
    } else if x < 0.0 {
        -1.0
    } else {
        0.0
    }
}

/// `ln(cosh(x))` without overflow for large `|x|`.
#[inline]
pub(crate) fn log_cosh(x: f32) -> f32 {
    let a = x.abs();
    a + (-2.0 * a).exp().ln_1p() - std::f32::consts::LN_2
}

/// Cross-entropy of a probability row against a one-hot row (summed over classes).
#[inline]
pub(crate) fn categorical_crossentropy(pred: &[f32], target: &[f32]) -> f32 {
    let mut loss = 0.0_f32;
    for (&p, &t) in pred.iter().zip(target) {
        if t != 0.0 {
            loss -= t * p.clamp(EPSILON, 1.0 - EPSILON).ln();
        }
    }
    loss
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32, tol: f32) {
        assert!((a - b).abs() <= tol, "{a} vs {b}");
    }

    #[test]
    fn mse_is_zero_when_equal() {
        let pred = [1.0_f32, -2.0, 0.5];
        assert_eq!(LossKind::MeanSquaredError.forward(&pred, &pred), 0.0);
    }

    #[test]
    fn mse_backward_matches_expected_gradient() {
        let pred = [1.0_f32, 3.0];
        let target = [2.0_f32, 1.0];
        let mut d_pred = [0.0_f32; 2];
        let loss = LossKind::MeanSquaredError.backward(&pred, &target, &mut d_pred);

        // L = mean([(-1)^2, (2)^2]) = 2.5
        assert_close(loss, 2.5, 1e-6);
        // dL/dpred = 2 * (pred - target) / N
        assert_close(d_pred[0], -1.0, 1e-6);
        assert_close(d_pred[1], 2.0, 1e-6);
    }

    #[test]
    fn mae_is_mean_of_absolute_errors() {
        let loss = LossKind::MeanAbsoluteError.forward(&[1.0, -1.0, 4.0], &[0.0, 1.0, 4.0]);
        assert_close(loss, 1.0, 1e-6);
    }

    #[test]
    fn crossentropy_prefers_correct_class() {
        let target = [1.0_f32, 0.0, 0.0];
        let good = LossKind::CategoricalCrossentropy.forward(&[0.8, 0.1, 0.1], &target);
        let bad = LossKind::CategoricalCrossentropy.forward(&[0.1, 0.1, 0.8], &target);
        assert!(good < bad);

        let bce = LossKind::BinaryCrossentropy.forward(&[1.0, 0.0], &[1.0, 0.0]);
        assert!(bce.is_finite() && bce < 1e-3);
    }

    #[test]
    fn gradients_match_finite_differences() {
        let pred = [0.35_f32, 0.6, 0.2];
        let target = [0.0_f32, 1.0, 0.0];
        let eps = 1e-3_f32;

        for kind in LossKind::ALL {
            let mut d = [0.0_f32; 3];
            kind.backward(&pred, &target, &mut d);
            for i in 0..pred.len() {
                let mut plus = pred;
                let mut minus = pred;
                plus[i] += eps;
                minus[i] -= eps;
                let numeric = (kind.forward(&plus, &target) - kind.forward(&minus, &target))
                    / (2.0 * eps);
                let scale = numeric.abs().max(1.0);
                assert!(
                    (numeric - d[i]).abs() / scale < 2e-2,
                    "{kind:?}[{i}]: numeric={numeric} analytic={}",
                    d[i]
                );
            }
        }
    }

    #[test]
    fn log_cosh_is_stable() {
        assert!(log_cosh(500.0).is_finite());
        assert_close(log_cosh(0.0), 0.0, 1e-6);
    }
}
