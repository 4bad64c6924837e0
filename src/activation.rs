//! Activation functions.
//!
//! A dense layer computes a pre-activation value `z = W x + b` and then applies an
//! activation: `y = activation(z)`. All activations except `softmax` act element-wise;
//! `softmax` normalizes each row.
//!
//! Backends cache the *post-activation* outputs `y`. During backprop `dL/dz` is
//! recovered from `dL/dy` and `y` alone, so no separate `z` buffer is needed.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const SELU_ALPHA: f32 = 1.673_263_2;
const SELU_SCALE: f32 = 1.050_701;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
/// Activation applied by a dense layer.
pub enum Activation {
    #[default]
    Linear,
    #[serde(rename = "relu")]
    ReLU,
    Sigmoid,
    Tanh,
    Softmax,
    Elu,
    Selu,
    Softplus,
    Softsign,
    Exponential,
}

impl Activation {
    pub const ALL: [Activation; 10] = [
        Activation::Linear,
        Activation::ReLU,
        Activation::Sigmoid,
        Activation::Tanh,
        Activation::Softmax,
        Activation::Elu,
        Activation::Selu,
        Activation::Softplus,
        Activation::Softsign,
        Activation::Exponential,
    ];

    pub const NAMES: &'static [&'static str] = &[
        "linear",
        "relu",
        "sigmoid",
        "tanh",
        "softmax",
        "elu",
        "selu",
        "softplus",
        "softsign",
        "exponential",
    ];

    pub fn name(self) -> &'static str {
        match self {
            Activation::Linear => "linear",
            Activation::ReLU => "relu",
            Activation::Sigmoid => "sigmoid",
            Activation::Tanh => "tanh",
            Activation::Softmax => "softmax",
            Activation::Elu => "elu",
            Activation::Selu => "selu",
            Activation::Softplus => "softplus",
            Activation::Softsign => "softsign",
            Activation::Exponential => "exponential",
        }
    }

    /// Case-insensitive lookup by name.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|a| a.name().eq_ignore_ascii_case(name))
            .ok_or_else(|| Error::Set(format!("unknown activation {name:?}")))
    }

    /// True for activations whose gradient does not vanish for large inputs.
    pub fn is_rectifier(self) -> bool {
        matches!(self, Activation::ReLU | Activation::Elu | Activation::Selu)
    }

    /// Apply the activation in place to one row of pre-activations.
    #[inline]
    pub fn forward_row(self, row: &mut [f32]) {
        if self == Activation::Softmax {
            softmax(row);
            return;
        }
        for v in row.iter_mut() {
            *v = self.forward(*v);
        }
    }

    /// Turn `dL/dy` into `dL/dz` for one row, given the cached outputs `y`.
    #[inline]
    pub fn backward_row(self, y: &[f32], dy: &[f32], dz: &mut [f32]) {
        debug_assert_eq!(y.len(), dy.len());
        debug_assert_eq!(y.len(), dz.len());

        if self == Activation::Softmax {
            let mut dot = 0.0_f32;
            for (&yi, &gi) in y.iter().zip(dy) {
                dot = yi.mul_add(gi, dot);
            }
            for i in 0..y.len() {
                dz[i] = y[i] * (dy[i] - dot);
            }
            return;
        }
        for i in 0..y.len() {
            dz[i] = dy[i] * self.grad_from_output(y[i]);
        }
    }

    #[inline]
    pub(crate) fn forward(self, x: f32) -> f32 {
        match self {
            Activation::Linear => x,
            Activation::ReLU => x.max(0.0),
            Activation::Sigmoid => sigmoid(x),
            Activation::Tanh => x.tanh(),
            // Element-wise callers never see softmax; treat a lone value as a one-class row.
            Activation::Softmax => 1.0,
            Activation::Elu => {
                if x > 0.0 {
                    x
                } else {
                    x.exp_m1()
                }
            }
            Activation::Selu => {
                if x > 0.0 {
                    SELU_SCALE * x
                } else {
                    SELU_SCALE * SELU_ALPHA * x.exp_m1()
                }
            }
            Activation::Softplus => {
                // ln(1 + e^x) without overflow.
                x.max(0.0) + (-x.abs()).exp().ln_1p()
            }
            Activation::Softsign => x / (1.0 + x.abs()),
            Activation::Exponential => x.exp(),
        }
    }

    /// Derivative of the activation with respect to its input, expressed in terms
    /// of the cached post-activation output `y`.
    #[inline]
    pub(crate) fn grad_from_output(self, y: f32) -> f32 {
        match self {
            Activation::Linear => 1.0,
            Activation::ReLU => {
                if y > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Activation::Sigmoid => y * (1.0 - y),
            Activation::Tanh => 1.0 - y * y,
            Activation::Softmax => y * (1.0 - y),
            Activation::Elu => {
                if y > 0.0 {
                    1.0
                } else {
                    y + 1.0
                }
            }
            Activation::Selu => {
                if y > 0.0 {
                    SELU_SCALE
                } else {
                    y + SELU_SCALE * SELU_ALPHA
                }
            }
            // d/dx ln(1 + e^x) = sigmoid(x) = 1 - e^-y
            Activation::Softplus => -(-y).exp_m1(),
            Activation::Softsign => {
                let s = 1.0 - y.abs();
                s * s
            }
            Activation::Exponential => y,
        }
    }
}

#[inline]
fn sigmoid(x: f32) -> f32 {
    // Numerically stable sigmoid.
    if x >= 0.0 {
        let z = (-x).exp();
        1.0 / (1.0 + z)
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

#[inline]
fn softmax(row: &mut [f32]) {
    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut sum = 0.0_f32;
    for v in row.iter_mut() {
        *v = (*v - max).exp();
        sum += *v;
    }
    let inv = 1.0 / sum;
    for v in row.iter_mut() {
        *v *= inv;
    }
}
