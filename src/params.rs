//! The per-gene parameter table.
//!
//! Every decoder call receives a [`GeneParams`] explicitly; the optimizer produces a new table
//! each step and the trainer swaps it in whole. Rates and switch-time gaps are stored as natural
//! logs so that the constrained values stay strictly positive.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::regime::{CurveAdjoint, GeneCurve, RegimeKind, RegimeLayout, SwitchPolicy};
use crate::{Error, Result};

/// Clamp applied to raw log-parameters after every update.
pub const LOG_PARAM_BOUND: f64 = 10.0;

/// Fixed per-gene noise parameters, estimated once at initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoiseScales {
    /// Gaussian scale of unspliced residuals (value or log1p scale, per noise model).
    pub sigma_u: Array1<f64>,
    pub sigma_s: Array1<f64>,
    /// Negative-binomial inverse dispersion.
    pub dispersion_u: Array1<f64>,
    pub dispersion_s: Array1<f64>,
}

impl NoiseScales {
    pub fn unit(n_genes: usize) -> Self {
        Self {
            sigma_u: Array1::ones(n_genes),
            sigma_s: Array1::ones(n_genes),
            dispersion_u: Array1::ones(n_genes),
            dispersion_s: Array1::ones(n_genes),
        }
    }
}

/// Constrained, user-facing kinetic parameters of one gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneKinetics {
    /// Transcription rate per regime (zero outside induction regimes).
    pub alpha: Vec<f64>,
    pub beta: f64,
    pub gamma: f64,
    /// Regime switch times, strictly increasing.
    pub switch_times: Vec<f64>,
    /// Unspliced scale factor (observed u = scaling * kinetic u).
    pub scaling: f64,
}

impl GeneKinetics {
    /// Transcription rate of the first induction regime.
    pub fn induction_alpha(&self) -> f64 {
        self.alpha.iter().copied().find(|&a| a > 0.0).unwrap_or(0.0)
    }
}

/// Trainable and fixed per-gene parameters for all genes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneParams {
    pub layout: RegimeLayout,
    /// genes x regimes; only induction columns are used.
    pub log_alpha: Array2<f64>,
    pub log_beta: Array1<f64>,
    pub log_gamma: Array1<f64>,
    /// genes x (regimes - 1): `b_k = sum_{j<=k} exp(log_gap[j-1])`.
    pub log_gap: Array2<f64>,
    pub scaling: Array1<f64>,
    pub noise: NoiseScales,
}

impl GeneParams {
    /// Build the table from constrained kinetics (one entry per gene).
    pub fn from_kinetics(
        layout: &RegimeLayout,
        kinetics: &[GeneKinetics],
        noise: NoiseScales,
    ) -> Result<Self> {
        let g = kinetics.len();
        let k = layout.len();
        if g == 0 {
            return Err(Error::Domain("at least one gene is required"));
        }
        if noise.sigma_u.len() != g
            || noise.sigma_s.len() != g
            || noise.dispersion_u.len() != g
            || noise.dispersion_s.len() != g
        {
            return Err(Error::Shape("noise scales must have one entry per gene"));
        }
        let mut log_alpha = Array2::zeros((g, k));
        let mut log_beta = Array1::zeros(g);
        let mut log_gamma = Array1::zeros(g);
        let mut log_gap = Array2::zeros((g, k - 1));
        let mut scaling = Array1::ones(g);
        for (gi, kin) in kinetics.iter().enumerate() {
            if kin.alpha.len() != k || kin.switch_times.len() != k - 1 {
                return Err(Error::Shape("kinetics do not match the regime layout"));
            }
            if !(kin.beta > 0.0) || !(kin.gamma > 0.0) || !(kin.scaling > 0.0) {
                return Err(Error::Domain("beta, gamma and scaling must be positive"));
            }
            for (j, &kind) in layout.kinds().iter().enumerate() {
                if kind == RegimeKind::Induction {
                    if !(kin.alpha[j] > 0.0) {
                        return Err(Error::Domain("induction alpha must be positive"));
                    }
                    log_alpha[[gi, j]] = kin.alpha[j].ln();
                }
            }
            log_beta[gi] = kin.beta.ln();
            log_gamma[gi] = kin.gamma.ln();
            let mut prev = 0.0;
            for (j, &b) in kin.switch_times.iter().enumerate() {
                if !(b > prev) {
                    return Err(Error::Domain("switch times must be positive and increasing"));
                }
                log_gap[[gi, j]] = (b - prev).ln();
                prev = b;
            }
            scaling[gi] = kin.scaling;
        }
        let mut out = Self {
            layout: layout.clone(),
            log_alpha,
            log_beta,
            log_gamma,
            log_gap,
            scaling,
            noise,
        };
        out.clamp_log_params();
        Ok(out)
    }

    #[inline]
    pub fn n_genes(&self) -> usize {
        self.log_beta.len()
    }

    #[inline]
    pub fn n_regimes(&self) -> usize {
        self.layout.len()
    }

    /// Per-regime transcription rates of gene `g` (zero outside induction regimes).
    pub fn alphas(&self, g: usize) -> Vec<f64> {
        self.layout
            .kinds()
            .iter()
            .enumerate()
            .map(|(k, &kind)| match kind {
                RegimeKind::Induction => self.log_alpha[[g, k]].exp(),
                _ => 0.0,
            })
            .collect()
    }

    #[inline]
    pub fn beta(&self, g: usize) -> f64 {
        self.log_beta[g].exp()
    }

    #[inline]
    pub fn gamma(&self, g: usize) -> f64 {
        self.log_gamma[g].exp()
    }

    /// Switch times of gene `g`.
    pub fn switch_times(&self, g: usize) -> Vec<f64> {
        let mut acc = 0.0;
        self.log_gap
            .row(g)
            .iter()
            .map(|&lg| {
                acc += lg.exp();
                acc
            })
            .collect()
    }

    pub fn kinetics(&self, g: usize) -> GeneKinetics {
        GeneKinetics {
            alpha: self.alphas(g),
            beta: self.beta(g),
            gamma: self.gamma(g),
            switch_times: self.switch_times(g),
            scaling: self.scaling[g],
        }
    }

    /// Trajectory of gene `g` under the current values.
    pub fn curve(&self, g: usize, policy: SwitchPolicy) -> Result<GeneCurve> {
        GeneCurve::new(
            &self.layout,
            &self.alphas(g),
            self.beta(g),
            self.gamma(g),
            &self.switch_times(g),
            policy,
        )
    }

    /// Same shape, all zeros; used as a gradient holder.
    pub fn zeros_like(&self) -> Self {
        let g = self.n_genes();
        Self {
            layout: self.layout.clone(),
            log_alpha: Array2::zeros(self.log_alpha.raw_dim()),
            log_beta: Array1::zeros(g),
            log_gamma: Array1::zeros(g),
            log_gap: Array2::zeros(self.log_gap.raw_dim()),
            scaling: Array1::zeros(g),
            noise: NoiseScales {
                sigma_u: Array1::zeros(g),
                sigma_s: Array1::zeros(g),
                dispersion_u: Array1::zeros(g),
                dispersion_s: Array1::zeros(g),
            },
        }
    }

    /// Trainable entries, in a fixed order.
    pub fn trainable(&self) -> impl Iterator<Item = &f64> + '_ {
        self.log_alpha
            .iter()
            .chain(self.log_beta.iter())
            .chain(self.log_gamma.iter())
            .chain(self.log_gap.iter())
    }

    /// Trainable entries, mutable, in the same order as [`GeneParams::trainable`].
    pub fn trainable_mut(&mut self) -> impl Iterator<Item = &mut f64> + '_ {
        self.log_alpha
            .iter_mut()
            .chain(self.log_beta.iter_mut())
            .chain(self.log_gamma.iter_mut())
            .chain(self.log_gap.iter_mut())
    }

    pub fn n_trainable(&self) -> usize {
        self.log_alpha.len() + self.log_beta.len() + self.log_gamma.len() + self.log_gap.len()
    }

    /// Convert the curve adjoint of gene `g` into log-parameter gradients (accumulating).
    ///
    /// `self` is the gradient holder; `values` is the table the curve was built from.
    pub fn accumulate_curve_grads(&mut self, g: usize, values: &GeneParams, adj: &CurveAdjoint) {
        for (k, &kind) in values.layout.kinds().iter().enumerate() {
            if kind == RegimeKind::Induction {
                self.log_alpha[[g, k]] += values.log_alpha[[g, k]].exp() * adj.alpha[k];
            }
        }
        self.log_beta[g] += values.beta(g) * adj.beta;
        self.log_gamma[g] += values.gamma(g) * adj.gamma;

        // b_k depends on every gap j <= k.
        let n_gaps = values.log_gap.ncols();
        let mut tail = 0.0;
        for j in (0..n_gaps).rev() {
            tail += adj.boundary[j + 1];
            self.log_gap[[g, j]] += values.log_gap[[g, j]].exp() * tail;
        }
    }

    /// Zero the gradient of entries that are not trained.
    pub fn mask_frozen(&mut self, train_beta: bool) {
        for (k, &kind) in self.layout.kinds().iter().enumerate() {
            if kind != RegimeKind::Induction {
                self.log_alpha.column_mut(k).fill(0.0);
            }
        }
        if !train_beta {
            self.log_beta.fill(0.0);
        }
    }

    /// Keep raw log-parameters inside `[-LOG_PARAM_BOUND, LOG_PARAM_BOUND]`.
    pub fn clamp_log_params(&mut self) {
        for v in self.trainable_mut() {
            *v = v.clamp(-LOG_PARAM_BOUND, LOG_PARAM_BOUND);
        }
    }

    /// First gene with a non-finite trainable entry.
    pub fn first_non_finite_gene(&self) -> Option<usize> {
        (0..self.n_genes()).find(|&g| {
            !(self.log_beta[g].is_finite()
                && self.log_gamma[g].is_finite()
                && self.log_alpha.row(g).iter().all(|v| v.is_finite())
                && self.log_gap.row(g).iter().all(|v| v.is_finite()))
        })
    }
}
