//! Model configuration and the (encoder, gene table) pair that the objective evaluates.

use serde::{Deserialize, Serialize};

use crate::encoder::Encoder;
use crate::latent::TimePrior;
use crate::likelihood::NoiseModel;
use crate::params::GeneParams;
use crate::regime::{RegimeLayout, SwitchPolicy};
use crate::{Error, Result};

/// Where the regime weights of each (cell, gene) come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RegimeAssignment {
    /// Weights are the time gates of the gene's curve.
    #[default]
    Gated,
    /// The encoder emits per-(cell, gene) logits; their softmax blends the branches and is
    /// regularized toward the time gates.
    Amortized,
}

/// Structure of the generative model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    pub layout: RegimeLayout,
    pub policy: SwitchPolicy,
    pub assignment: RegimeAssignment,
    pub noise: NoiseModel,
    pub prior: TimePrior,
    /// Width of a per-cell log-normal prior whose median is the cell's capture time. When set,
    /// it replaces `prior` and the data must carry capture times.
    pub capture_sigma: Option<f64>,
    /// Latent-time range used by initialization.
    pub t_max: f64,
    /// Encoder hidden widths.
    pub hidden: (usize, usize),
    /// Estimate the unspliced scale factor at initialization (otherwise 1).
    pub fit_scaling: bool,
    /// Train `log_beta`; when false, beta stays at its initial value.
    pub train_beta: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            layout: RegimeLayout::default(),
            policy: SwitchPolicy::default(),
            assignment: RegimeAssignment::Gated,
            noise: NoiseModel::Gaussian,
            prior: TimePrior::LogNormal {
                mu: 0.0,
                sigma: 1.0,
            },
            capture_sigma: None,
            t_max: 10.0,
            hidden: (64, 32),
            fit_scaling: false,
            train_beta: true,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        self.policy.validate()?;
        self.prior.validate()?;
        if let Some(sigma) = self.capture_sigma {
            if !(sigma > 0.0) || !sigma.is_finite() {
                return Err(Error::Domain("capture_sigma must be positive and finite"));
            }
        }
        if !(self.t_max > 0.0) || !self.t_max.is_finite() {
            return Err(Error::Domain("t_max must be positive and finite"));
        }
        if self.hidden.0 == 0 || self.hidden.1 == 0 {
            return Err(Error::Domain("hidden layer widths must be positive"));
        }
        if self.assignment == RegimeAssignment::Amortized
            && !matches!(self.policy, SwitchPolicy::Soft { .. })
        {
            return Err(Error::Domain("amortized regime assignment requires soft switching"));
        }
        Ok(())
    }

    /// Size of the encoder's regime head, if any.
    pub fn regime_logits(&self) -> Option<usize> {
        match self.assignment {
            RegimeAssignment::Gated => None,
            RegimeAssignment::Amortized => Some(self.layout.len()),
        }
    }
}

/// Everything the objective reads: configuration, encoder weights and the gene table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityModel {
    pub config: ModelConfig,
    pub encoder: Encoder,
    pub genes: GeneParams,
}

impl VelocityModel {
    pub fn new(config: ModelConfig, encoder: Encoder, genes: GeneParams) -> Result<Self> {
        config.validate()?;
        if encoder.n_genes() != genes.n_genes() {
            return Err(Error::Shape("encoder and gene table disagree on the number of genes"));
        }
        if genes.layout != config.layout {
            return Err(Error::Domain("gene table layout differs from the model layout"));
        }
        if encoder.regime_head.as_ref().map(|h| h.n_regimes) != config.regime_logits() {
            return Err(Error::Domain("encoder regime head does not match the assignment mode"));
        }
        Ok(Self {
            config,
            encoder,
            genes,
        })
    }

    #[inline]
    pub fn n_genes(&self) -> usize {
        self.genes.n_genes()
    }
}
