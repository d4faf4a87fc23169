//! Latent time -> predicted counts, and the score of observed counts under the noise model.
//!
//! A [`Decoder`] is rebuilt from the current [`GeneParams`] on every forward pass; it holds one
//! [`GeneCurve`] per gene and nothing else.

use ndarray::{Array2, Array3, ArrayView1, ArrayView3};

use crate::kinetics::KineticState;
use crate::likelihood::{NoiseModel, Score};
use crate::params::GeneParams;
use crate::regime::{GeneCurve, SwitchPolicy};
use crate::{Error, Result};

/// Predicted expression for a batch of cells.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    /// Observed-scale unspliced (`scaling * u`).
    pub unspliced: Array2<f64>,
    pub spliced: Array2<f64>,
    /// `beta * u - gamma * s` on the kinetic scale.
    pub velocity: Array2<f64>,
}

#[derive(Debug, Clone)]
pub struct Decoder<'a> {
    genes: &'a GeneParams,
    curves: Vec<GeneCurve>,
    noise: NoiseModel,
}

impl<'a> Decoder<'a> {
    pub fn new(genes: &'a GeneParams, policy: SwitchPolicy, noise: NoiseModel) -> Result<Self> {
        policy.validate()?;
        let curves = (0..genes.n_genes())
            .map(|g| genes.curve(g, policy))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            genes,
            curves,
            noise,
        })
    }

    #[inline]
    pub fn n_genes(&self) -> usize {
        self.curves.len()
    }

    #[inline]
    pub fn curve(&self, g: usize) -> &GeneCurve {
        &self.curves[g]
    }

    pub fn genes(&self) -> &GeneParams {
        self.genes
    }

    /// Kinetic-scale prediction of gene `g` at `t`, gated or blended by `weights`.
    pub fn predict(&self, g: usize, t: f64, weights: Option<&[f64]>) -> KineticState {
        match weights {
            Some(w) => self.curves[g].predict_weighted(t, w),
            None => self.curves[g].predict(t),
        }
    }

    /// Score observed `(u, s)` of gene `g` against a kinetic-scale prediction.
    ///
    /// The returned unspliced derivative is w.r.t. the observed-scale mean.
    pub fn score(&self, g: usize, u_obs: f64, s_obs: f64, pred: KineticState) -> (Score, Score) {
        let (su, ss) = self.noise.scales(&self.genes.noise, g);
        (
            self.noise.score(u_obs, self.genes.scaling[g] * pred.u, su),
            self.noise.score(s_obs, pred.s, ss),
        )
    }

    /// Velocity `beta * u - gamma * s` of gene `g` at a kinetic-scale state.
    #[inline]
    pub fn velocity(&self, g: usize, x: KineticState) -> f64 {
        self.genes.beta(g) * x.u - self.genes.gamma(g) * x.s
    }

    /// Predictions for every (cell, gene); `responsibilities` is cells x genes x regimes.
    pub fn predict_batch(
        &self,
        times: ArrayView1<f64>,
        responsibilities: Option<ArrayView3<f64>>,
    ) -> Result<Prediction> {
        let n = times.len();
        let g = self.n_genes();
        if let Some(r) = &responsibilities {
            let k = self.genes.n_regimes();
            if r.dim() != (n, g, k) {
                return Err(Error::Shape("responsibilities must be cells x genes x regimes"));
            }
        }
        let mut unspliced = Array2::zeros((n, g));
        let mut spliced = Array2::zeros((n, g));
        let mut velocity = Array2::zeros((n, g));
        let mut w = Vec::new();
        for i in 0..n {
            for j in 0..g {
                let x = match &responsibilities {
                    Some(r) => {
                        w.clear();
                        w.extend(r.slice(ndarray::s![i, j, ..]).iter().copied());
                        self.predict(j, times[i], Some(w.as_slice()))
                    }
                    None => self.predict(j, times[i], None),
                };
                unspliced[[i, j]] = self.genes.scaling[j] * x.u;
                spliced[[i, j]] = x.s;
                velocity[[i, j]] = self.velocity(j, x);
            }
        }
        Ok(Prediction {
            unspliced,
            spliced,
            velocity,
        })
    }

    /// Gate weights of every (cell, gene) at `times`.
    pub fn gates_batch(&self, times: ArrayView1<f64>) -> Array3<f64> {
        let k = self.genes.n_regimes();
        let mut out = Array3::zeros((times.len(), self.n_genes(), k));
        let mut w = vec![0.0; k];
        for (i, &t) in times.iter().enumerate() {
            for (j, curve) in self.curves.iter().enumerate() {
                curve.gates_into(t, &mut w);
                for (kk, &v) in w.iter().enumerate() {
                    out[[i, j, kk]] = v;
                }
            }
        }
        out
    }
}
