//! Optimizer update rules.
//!
//! Design notes:
//! - Optimizer *state* (moments, step counter) lives next to the compiled model
//!   and survives across fit calls; recompiling starts it fresh.
//! - Tensors are updated one at a time. Slot buffers are allocated lazily on the
//!   first step so the state can be built before the parameter list is known.

use crate::optim::OptimizerConfig;

/// Per-tensor moment buffers. Which ones are used depends on the optimizer.
#[derive(Debug, Clone, Default)]
struct Slots {
    first: Vec<f32>,
    second: Vec<f32>,
    third: Vec<f32>,
}

impl Slots {
    fn ensure(&mut self, len: usize) {
        for buf in [&mut self.first, &mut self.second, &mut self.third] {
            if buf.len() != len {
                *buf = vec![0.0; len];
            }
        }
    }
}

/// Owned optimizer state.
#[derive(Debug, Clone)]
pub(crate) struct OptimizerState {
    config: OptimizerConfig,
    t: u64,
    slots: Vec<Slots>,
}

impl OptimizerState {
    pub fn new(config: OptimizerConfig) -> Self {
        Self {
            config,
            t: 0,
            slots: Vec::new(),
        }
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }

    /// Apply one update to every tensor in `params` using the matching `grads`.
    ///
    /// Shape contract: `params[i].len() == grads[i].len()`.
    pub fn step(&mut self, params: Vec<&mut [f32]>, grads: &[Vec<f32>]) {
        debug_assert_eq!(params.len(), grads.len());
        if self.slots.len() != params.len() {
            self.slots = vec![Slots::default(); params.len()];
        }
        self.t += 1;
        let t = self.t as i32;

        for ((w, g), s) in params.into_iter().zip(grads).zip(&mut self.slots) {
            debug_assert_eq!(w.len(), g.len());
            s.ensure(w.len());
            match self.config {
                OptimizerConfig::Sgd {
                    learning_rate,
                    momentum,
                    nesterov,
                } => sgd(w, g, s, learning_rate, momentum, nesterov),
                OptimizerConfig::RmsProp {
                    learning_rate,
                    rho,
                    momentum,
                    epsilon,
                    centered,
                } => rmsprop(w, g, s, learning_rate, rho, momentum, epsilon, centered),
                OptimizerConfig::Adam {
                    learning_rate,
                    beta_1,
                    beta_2,
                    epsilon,
                    amsgrad,
                } => adam(w, g, s, t, learning_rate, beta_1, beta_2, epsilon, amsgrad),
                OptimizerConfig::AdaMod {
                    learning_rate,
                    beta_1,
                    beta_2,
                    beta_3,
                    epsilon,
                } => adamod(w, g, s, t, learning_rate, beta_1, beta_2, beta_3, epsilon),
                OptimizerConfig::RAdam {
                    learning_rate,
                    beta_1,
                    beta_2,
                    epsilon,
                } => radam(w, g, s, t, learning_rate, beta_1, beta_2, epsilon),
                OptimizerConfig::Lamb {
                    learning_rate,
                    beta_1,
                    beta_2,
                    epsilon,
                    weight_decay,
                } => lamb(w, g, s, t, learning_rate, beta_1, beta_2, epsilon, weight_decay),
            }
        }
    }
}

#[inline]
fn moments(g: &[f32], s: &mut Slots, beta_1: f32, beta_2: f32) {
    for i in 0..g.len() {
        s.first[i] = beta_1 * s.first[i] + (1.0 - beta_1) * g[i];
        s.second[i] = beta_2 * s.second[i] + (1.0 - beta_2) * g[i] * g[i];
    }
}

fn sgd(w: &mut [f32], g: &[f32], s: &mut Slots, lr: f32, momentum: f32, nesterov: bool) {
    if momentum == 0.0 {
        for (w, &g) in w.iter_mut().zip(g) {
            *w -= lr * g;
        }
        return;
    }
    let v = &mut s.first;
    for i in 0..w.len() {
        v[i] = momentum * v[i] - lr * g[i];
        w[i] += if nesterov {
            momentum * v[i] - lr * g[i]
        } else {
            v[i]
        };
    }
}

#[allow(clippy::too_many_arguments)]
fn rmsprop(
    w: &mut [f32],
    g: &[f32],
    s: &mut Slots,
    lr: f32,
    rho: f32,
    momentum: f32,
    eps: f32,
    centered: bool,
) {
    for i in 0..w.len() {
        s.second[i] = rho * s.second[i] + (1.0 - rho) * g[i] * g[i];
        let mut denom = s.second[i];
        if centered {
            s.third[i] = rho * s.third[i] + (1.0 - rho) * g[i];
            denom -= s.third[i] * s.third[i];
        }
        let step = lr * g[i] / (denom.max(0.0) + eps).sqrt();
        if momentum > 0.0 {
            s.first[i] = momentum * s.first[i] + step;
            w[i] -= s.first[i];
        } else {
            w[i] -= step;
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn adam(
    w: &mut [f32],
    g: &[f32],
    s: &mut Slots,
    t: i32,
    lr: f32,
    beta_1: f32,
    beta_2: f32,
    eps: f32,
    amsgrad: bool,
) {
    moments(g, s, beta_1, beta_2);
    let lr_t = lr * (1.0 - beta_2.powi(t)).sqrt() / (1.0 - beta_1.powi(t));
    for i in 0..w.len() {
        let v = if amsgrad {
            s.third[i] = s.third[i].max(s.second[i]);
            s.third[i]
        } else {
            s.second[i]
        };
        w[i] -= lr_t * s.first[i] / (v.sqrt() + eps);
    }
}

/// Adam whose per-element step sizes are capped by their own exponential average.
#[allow(clippy::too_many_arguments)]
fn adamod(
    w: &mut [f32],
    g: &[f32],
    s: &mut Slots,
    t: i32,
    lr: f32,
    beta_1: f32,
    beta_2: f32,
    beta_3: f32,
    eps: f32,
) {
    moments(g, s, beta_1, beta_2);
    let corr_1 = 1.0 - beta_1.powi(t);
    let corr_2 = 1.0 - beta_2.powi(t);
    let lr_t = lr * corr_2.sqrt() / corr_1;
    for i in 0..w.len() {
        let eta = lr_t / (s.second[i].sqrt() + eps);
        s.third[i] = beta_3 * s.third[i] + (1.0 - beta_3) * eta;
        w[i] -= eta.min(s.third[i]) * s.first[i];
    }
}

/// Rectified Adam: plain momentum SGD until the variance estimate is tractable.
#[allow(clippy::too_many_arguments)]
fn radam(
    w: &mut [f32],
    g: &[f32],
    s: &mut Slots,
    t: i32,
    lr: f32,
    beta_1: f32,
    beta_2: f32,
    eps: f32,
) {
    moments(g, s, beta_1, beta_2);
    let beta_2_t = beta_2.powi(t);
    let corr_1 = 1.0 - beta_1.powi(t);
    let rho_inf = 2.0 / (1.0 - beta_2) - 1.0;
    let rho_t = rho_inf - 2.0 * t as f32 * beta_2_t / (1.0 - beta_2_t);

    if rho_t > 4.0 {
        let r = ((rho_t - 4.0) * (rho_t - 2.0) * rho_inf
            / ((rho_inf - 4.0) * (rho_inf - 2.0) * rho_t))
            .sqrt();
        let corr_2 = 1.0 - beta_2_t;
        for i in 0..w.len() {
            let m_hat = s.first[i] / corr_1;
            let v_hat = (s.second[i] / corr_2).sqrt();
            w[i] -= lr * r * m_hat / (v_hat + eps);
        }
    } else {
        for i in 0..w.len() {
            w[i] -= lr * s.first[i] / corr_1;
        }
    }
}

/// Layer-wise adaptive moments: the Adam direction scaled by `||w|| / ||update||`.
#[allow(clippy::too_many_arguments)]
fn lamb(
    w: &mut [f32],
    g: &[f32],
    s: &mut Slots,
    t: i32,
    lr: f32,
    beta_1: f32,
    beta_2: f32,
    eps: f32,
    weight_decay: f32,
) {
    moments(g, s, beta_1, beta_2);
    let corr_1 = 1.0 - beta_1.powi(t);
    let corr_2 = 1.0 - beta_2.powi(t);

    // Reuse `third` for the update direction.
    for i in 0..w.len() {
        let m_hat = s.first[i] / corr_1;
        let v_hat = s.second[i] / corr_2;
        s.third[i] = m_hat / (v_hat.sqrt() + eps) + weight_decay * w[i];
    }
    let w_norm = w.iter().map(|v| v * v).sum::<f32>().sqrt();
    let u_norm = s.third.iter().map(|v| v * v).sum::<f32>().sqrt();
    let trust = if w_norm > 0.0 && u_norm > 0.0 {
        w_norm / u_norm
    } else {
        1.0
    };
    for i in 0..w.len() {
        w[i] -= lr * trust * s.third[i];
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::OptimizerKind;

    /// Minimise `(w - 3)^2` from `w = 0`.
    fn converges(config: OptimizerConfig, steps: usize) -> f32 {
        let mut state = OptimizerState::new(config);
        let mut w = vec![0.0_f32];
        for _ in 0..steps {
            let g = vec![2.0 * (w[0] - 3.0)];
            state.step(vec![w.as_mut_slice()], std::slice::from_ref(&g));
        }
        w[0]
    }

    #[test]
    fn every_optimizer_descends() {
        for kind in OptimizerKind::ALL {
            let mut cfg = OptimizerConfig::default_for(kind).unwrap();
            if let OptimizerConfig::Sgd { learning_rate, .. } = &mut cfg {
                *learning_rate = 0.1;
            }
            let w = converges(cfg, 300);
            assert!(w > 0.0 && w < 3.5, "{kind:?} ended at {w}");
        }
    }

    #[test]
    fn plain_sgd_step() {
        let cfg = OptimizerConfig::Sgd {
            learning_rate: 0.5,
            momentum: 0.0,
            nesterov: false,
        };
        let mut state = OptimizerState::new(cfg);
        let mut w = vec![1.0_f32, -1.0];
        state.step(vec![w.as_mut_slice()], &[vec![1.0, 2.0]]);
        assert_eq!(w, vec![0.5, -2.0]);
    }

    #[test]
    fn adam_first_step_is_learning_rate_sized() {
        let cfg = OptimizerConfig::default_for(OptimizerKind::Adam).unwrap();
        let mut state = OptimizerState::new(cfg);
        let mut w = vec![0.0_f32];
        state.step(vec![w.as_mut_slice()], &[vec![5.0]]);
        assert!((w[0] + 0.001).abs() < 1e-5, "{}", w[0]);
    }
}
