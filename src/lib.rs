//! # velomix
//!
//! RNA velocity as a variational model with a mixture of kinetic regimes per gene.
//!
//! From unspliced/spliced count matrices (cells x genes) this crate jointly infers:
//!
//! - a latent time per cell (log-normal posterior produced by an amortized encoder), and
//! - per-gene kinetics `(alpha, beta, gamma)` plus regime switch times,
//!
//! by maximizing an ELBO whose decoder is the closed-form solution of the splicing ODE
//! `du/dt = alpha - beta u`, `ds/dt = beta u - gamma s`, chained across regimes.
//!
//! ## Public invariants (must not change)
//!
//! - **Randomness is an input**: reparameterized sampling takes `eps` from the caller; every
//!   seeded entry point is deterministic.
//! - **No hidden state**: the gene parameter table is passed into every decoder call and is
//!   replaced whole by each optimizer step.
//! - **NaN is reported, never masked**: non-finite values surface as
//!   [`Error::NumericalInstability`] with the offending cell/gene and a snapshot.
//! - **Backend-agnostic by default**: `ndarray` with hand-derived gradients. An optional `burn`
//!   warm start is feature-gated and exports back into the ndarray encoder.
//!
//! ## Module map
//!
//! - `kinetics`: closed-form splicing solution, its Jacobian, the `beta = gamma` limit
//! - `ode`: fixed-step integrators used to cross-check the closed form
//! - `regime`: regime layouts, soft/hard gating, continuity across switches
//! - `params`: the per-gene parameter table (log-space)
//! - `encoder`, `latent`: amortized log-normal posterior over latent time, priors and KL
//! - `likelihood`, `decoder`: noise models and predicted counts
//! - `elbo`: batch objective and its gradients
//! - `optim`, `init`, `train`: Adam, method-of-moments start, the training state machine
//! - `snapshot`, `restarts`: serializable model state, parallel independent fits
//! - `data`, `simulate`, `metrics`: inputs, synthetic data, diagnostics

use std::fmt;

pub mod activation;
pub mod data;
pub mod decoder;
pub mod elbo;
pub mod encoder;
pub mod init;
pub mod kinetics;
pub mod latent;
pub mod likelihood;
pub mod metrics;
pub mod model;
pub mod ode;
pub mod optim;
pub mod params;
pub mod regime;
pub mod restarts;
pub mod simplex;
pub mod simulate;
pub mod snapshot;
pub mod train;

#[cfg(feature = "burn")]
pub mod burn_encoder;

pub use data::CountData;
pub use model::{ModelConfig, RegimeAssignment, VelocityModel};
pub use train::{fit, ConvergenceStatus, FitResult, StopHandle, TrainConfig, Trainer};

/// Where and what went non-finite.
#[derive(Debug, Clone, PartialEq)]
pub struct InstabilityReport {
    /// Name of the non-finite quantity (e.g. `"latent time"`, `"log-likelihood"`).
    pub quantity: &'static str,
    pub iteration: Option<u64>,
    pub epoch: Option<usize>,
    pub batch: Option<usize>,
    /// Row within the full dataset when known, otherwise within the batch.
    pub cell: Option<usize>,
    pub gene: Option<usize>,
    /// Model state of the step that failed (before its update).
    pub snapshot: Option<snapshot::ModelSnapshot>,
}

impl InstabilityReport {
    pub fn new(quantity: &'static str) -> Self {
        Self {
            quantity,
            iteration: None,
            epoch: None,
            batch: None,
            cell: None,
            gene: None,
            snapshot: None,
        }
    }

    pub fn at_cell(mut self, cell: usize) -> Self {
        self.cell = Some(cell);
        self
    }

    pub fn at_gene(mut self, gene: usize) -> Self {
        self.gene = Some(gene);
        self
    }

    pub fn into_error(self) -> Error {
        Error::NumericalInstability(Box::new(self))
    }
}

impl fmt::Display for InstabilityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "non-finite {}", self.quantity)?;
        let fields = [
            ("iteration", self.iteration.map(|v| v as usize)),
            ("epoch", self.epoch),
            ("batch", self.batch),
            ("cell", self.cell),
            ("gene", self.gene),
        ];
        for (name, v) in fields {
            if let Some(v) = v {
                write!(f, " {name}={v}")?;
            }
        }
        Ok(())
    }
}

/// velomix error variants.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("shape mismatch: {0}")]
    Shape(&'static str),
    #[error("domain error: {0}")]
    Domain(&'static str),
    #[error("unspliced matrix is {unspliced:?} but spliced matrix is {spliced:?}")]
    ShapeMismatch {
        unspliced: (usize, usize),
        spliced: (usize, usize),
    },
    #[error("numerical instability: {0}")]
    NumericalInstability(Box<InstabilityReport>),
}

pub type Result<T> = std::result::Result<T, Error>;
