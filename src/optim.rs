//! Adam with bias correction, global-norm clipping and a learning-rate schedule.
//!
//! Parameters and gradients are passed as matching iterators (see
//! [`crate::encoder::Encoder::params_mut`] and [`crate::params::GeneParams::trainable_mut`]),
//! so one optimizer state serves any parameter container.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdamConfig {
    pub lr: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    /// L2 penalty folded into the gradient.
    pub weight_decay: f64,
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            lr: 1e-2,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            weight_decay: 0.0,
        }
    }
}

impl AdamConfig {
    pub fn with_lr(self, lr: f64) -> Self {
        Self { lr, ..self }
    }

    pub fn with_weight_decay(self, weight_decay: f64) -> Self {
        Self {
            weight_decay,
            ..self
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.lr > 0.0) || !self.lr.is_finite() {
            return Err(Error::Domain("lr must be positive and finite"));
        }
        if !(0.0..1.0).contains(&self.beta1) || !(0.0..1.0).contains(&self.beta2) {
            return Err(Error::Domain("Adam betas must lie in [0, 1)"));
        }
        if !(self.eps > 0.0) {
            return Err(Error::Domain("Adam eps must be positive"));
        }
        if !(self.weight_decay >= 0.0) || !self.weight_decay.is_finite() {
            return Err(Error::Domain("weight decay must be finite and >= 0"));
        }
        Ok(())
    }
}

/// Learning-rate multiplier as a function of the epoch index.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum LrSchedule {
    #[default]
    Constant,
    /// `decay^epoch`.
    Exponential { decay: f64 },
    /// `factor^(epoch / every)`.
    Step { factor: f64, every: usize },
}

impl LrSchedule {
    pub fn factor(&self, epoch: usize) -> f64 {
        match *self {
            LrSchedule::Constant => 1.0,
            LrSchedule::Exponential { decay } => decay.powf(epoch as f64),
            LrSchedule::Step { factor, every } => factor.powf((epoch / every.max(1)) as f64),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            LrSchedule::Constant => Ok(()),
            LrSchedule::Exponential { decay: f } | LrSchedule::Step { factor: f, .. }
                if !(f > 0.0 && f <= 1.0) =>
            {
                Err(Error::Domain("learning-rate decay factor must lie in (0, 1]"))
            }
            LrSchedule::Step { every: 0, .. } => Err(Error::Domain("step schedule needs every >= 1")),
            _ => Ok(()),
        }
    }
}

/// Euclidean norm of a gradient stream.
pub fn global_norm<'a>(grads: impl IntoIterator<Item = &'a f64>) -> f64 {
    grads.into_iter().map(|g| g * g).sum::<f64>().sqrt()
}

/// Multiplier that brings a gradient of norm `norm` down to at most `max_norm`.
pub fn clip_factor(norm: f64, max_norm: Option<f64>) -> f64 {
    match max_norm {
        Some(m) if norm > m => m / norm,
        _ => 1.0,
    }
}

/// Adam state for one parameter group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    config: AdamConfig,
    m: Vec<f64>,
    v: Vec<f64>,
    steps: u64,
}

impl Adam {
    pub fn new(config: AdamConfig, n_params: usize) -> Self {
        Self {
            config,
            m: vec![0.0; n_params],
            v: vec![0.0; n_params],
            steps: 0,
        }
    }

    pub fn config(&self) -> AdamConfig {
        self.config
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// One update. Gradients are multiplied by `grad_scale` (clipping) and the step size by
    /// `lr_scale` (schedule).
    pub fn step<'p, 'g>(
        &mut self,
        params: impl Iterator<Item = &'p mut f64>,
        grads: impl Iterator<Item = &'g f64>,
        grad_scale: f64,
        lr_scale: f64,
    ) {
        self.steps += 1;
        let AdamConfig {
            lr,
            beta1,
            beta2,
            eps,
            weight_decay,
        } = self.config;
        let t = self.steps as f64;
        let c1 = 1.0 - beta1.powf(t);
        let c2 = 1.0 - beta2.powf(t);
        let step = lr * lr_scale;
        for (((p, &g), m), v) in params
            .zip(grads)
            .zip(self.m.iter_mut())
            .zip(self.v.iter_mut())
        {
            let g = g * grad_scale + weight_decay * *p;
            *m = beta1 * *m + (1.0 - beta1) * g;
            *v = beta2 * *v + (1.0 - beta2) * g * g;
            let m_hat = *m / c1;
            let v_hat = *v / c2;
            *p -= step * m_hat / (v_hat.sqrt() + eps);
        }
    }
}
