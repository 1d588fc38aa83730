//! Adam optimizer

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use super::Optimizer;

/// Adam optimizer
///
/// m_t = β1 · m_{t-1} + (1 − β1) · g
/// v_t = β2 · v_{t-1} + (1 − β2) · g²
/// θ_t = θ_{t-1} − lr_t · m_t / (√v_t + ε),  lr_t = lr · √(1 − β2^t) / (1 − β1^t)
#[derive(Clone, Debug)]
pub struct Adam {
    lr: f32,
    beta1: f32,
    beta2: f32,
    epsilon: f32,
    t: u64,
    m: Vec<Array1<f32>>,
    v: Vec<Array1<f32>>,
}

/// Serializable Adam state for checkpoints
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AdamState {
    pub lr: f32,
    pub step: u64,
    pub m: Vec<Vec<f32>>,
    pub v: Vec<Vec<f32>>,
}

impl Adam {
    /// Create a new Adam optimizer
    pub fn new(lr: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Self {
            lr,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    /// Create Adam with β = (0.9, 0.999) and ε = 1e-8
    pub fn default_params(lr: f32) -> Self {
        Self::new(lr, 0.9, 0.999, 1e-8)
    }

    /// Number of steps taken.
    #[must_use]
    pub fn step_count(&self) -> u64 {
        self.t
    }

    fn ensure_moments(&mut self, params: &[Array1<f32>]) {
        let stale = self.m.len() != params.len()
            || self.m.iter().zip(params).any(|(m, p)| m.len() != p.len());
        if stale {
            self.m = params.iter().map(|p| Array1::zeros(p.len())).collect();
            self.v = self.m.clone();
        }
    }

    /// Snapshot the optimizer state.
    pub fn state(&self) -> AdamState {
        AdamState {
            lr: self.lr,
            step: self.t,
            m: self.m.iter().map(|a| a.to_vec()).collect(),
            v: self.v.iter().map(|a| a.to_vec()).collect(),
        }
    }

    /// Restore a snapshot taken with [`Adam::state`].
    pub fn load_state(&mut self, state: AdamState) {
        self.lr = state.lr;
        self.t = state.step;
        self.m = state.m.into_iter().map(Array1::from).collect();
        self.v = state.v.into_iter().map(Array1::from).collect();
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [Array1<f32>], grads: &[Array1<f32>]) {
        self.ensure_moments(params);
        self.t += 1;

        // Bias correction folded into the step size
        let t = self.t.min(i32::MAX as u64) as i32;
        let lr_t = self.lr * ((1.0 - self.beta2.powi(t)).sqrt() / (1.0 - self.beta1.powi(t)));

        for ((param, grad), (m, v)) in params
            .iter_mut()
            .zip(grads)
            .zip(self.m.iter_mut().zip(self.v.iter_mut()))
        {
            ndarray::Zip::from(param)
                .and(grad)
                .and(m)
                .and(v)
                .for_each(|p, &g, m, v| {
                    *m = self.beta1 * *m + (1.0 - self.beta1) * g;
                    *v = self.beta2 * *v + (1.0 - self.beta2) * g * g;
                    *p -= lr_t * *m / (v.sqrt() + self.epsilon);
                });
        }
    }

    fn lr(&self) -> f32 {
        self.lr
    }

    fn set_lr(&mut self, lr: f32) {
        self.lr = lr;
    }

    fn name(&self) -> &'static str {
        "Adam"
    }
}
