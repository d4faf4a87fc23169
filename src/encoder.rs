//! Amortized posterior network: cell expression -> latent-time posterior.
//!
//! Two hidden layers with leaky ReLU, then three heads read the second hidden layer:
//!
//! - `mu`: linear, the posterior's log-time location;
//! - `sigma`: `softplus(.) + SIGMA_FLOOR`, strictly positive;
//! - optional regime logits, `genes x regimes` per cell.
//!
//! Forward and backward are written out in ndarray. [`Encoder`] doubles as its own gradient
//! holder: [`Encoder::backward`] returns an `Encoder`-shaped value of parameter gradients, and
//! [`Encoder::params`] / [`Encoder::params_mut`] walk both in the same order.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::activation::{leaky_relu, leaky_relu_grad, sigmoid, softplus, softplus_inverse};
use crate::{Error, Result};

/// Lower bound added to the posterior scale.
pub const SIGMA_FLOOR: f64 = 1e-4;

/// Posterior scale produced by a freshly initialized encoder.
pub const INITIAL_SIGMA: f64 = 0.5;

/// Linear map from the hidden layer to per-gene regime logits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeHead {
    /// (genes * regimes) x hidden
    pub w: Array2<f64>,
    pub b: Array1<f64>,
    pub n_regimes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Encoder {
    /// hidden1 x (2 * genes)
    pub w1: Array2<f64>,
    pub b1: Array1<f64>,
    /// hidden2 x hidden1
    pub w2: Array2<f64>,
    pub b2: Array1<f64>,
    pub w_mu: Array1<f64>,
    pub b_mu: f64,
    pub w_sigma: Array1<f64>,
    pub b_sigma: f64,
    pub regime_head: Option<RegimeHead>,
}

/// Activations kept from [`Encoder::forward`] for the backward pass.
#[derive(Debug, Clone)]
pub struct EncoderPass {
    x: Array2<f64>,
    a1: Array2<f64>,
    h1: Array2<f64>,
    a2: Array2<f64>,
    h2: Array2<f64>,
    z_sigma: Array1<f64>,
    pub mu: Array1<f64>,
    pub sigma: Array1<f64>,
    /// cells x (genes * regimes)
    pub logits: Option<Array2<f64>>,
}

fn xavier(rng: &mut ChaCha8Rng, rows: usize, cols: usize) -> Array2<f64> {
    let bound = (6.0 / (rows + cols) as f64).sqrt();
    Array2::from_shape_simple_fn((rows, cols), || (2.0 * rng.random::<f64>() - 1.0) * bound)
}

fn xavier_vec(rng: &mut ChaCha8Rng, n: usize) -> Array1<f64> {
    let bound = (6.0 / (n + 1) as f64).sqrt();
    Array1::from_shape_simple_fn(n, || (2.0 * rng.random::<f64>() - 1.0) * bound)
}

/// Encoder input: `[ln(1 + u / scaling), ln(1 + s)]` per cell.
pub fn encoder_features(
    unspliced: ArrayView2<f64>,
    spliced: ArrayView2<f64>,
    scaling: ArrayView1<f64>,
) -> Result<Array2<f64>> {
    let (n, g) = unspliced.dim();
    if spliced.dim() != (n, g) || scaling.len() != g {
        return Err(Error::Shape("feature inputs disagree on cells or genes"));
    }
    let mut x = Array2::zeros((n, 2 * g));
    for i in 0..n {
        for j in 0..g {
            x[[i, j]] = (unspliced[[i, j]] / scaling[j]).ln_1p();
            x[[i, g + j]] = spliced[[i, j]].ln_1p();
        }
    }
    Ok(x)
}

impl Encoder {
    /// Xavier-uniform weights; `mu` starts at `initial_log_time`, `sigma` at [`INITIAL_SIGMA`].
    pub fn new(
        n_genes: usize,
        hidden: (usize, usize),
        regime_logits: Option<usize>,
        initial_log_time: f64,
        seed: u64,
    ) -> Result<Self> {
        let (h1, h2) = hidden;
        if n_genes == 0 || h1 == 0 || h2 == 0 {
            return Err(Error::Domain("encoder dimensions must be positive"));
        }
        if !initial_log_time.is_finite() {
            return Err(Error::Domain("initial log time must be finite"));
        }
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let w1 = xavier(&mut rng, h1, 2 * n_genes);
        let w2 = xavier(&mut rng, h2, h1);
        let w_mu = xavier_vec(&mut rng, h2);
        let w_sigma = xavier_vec(&mut rng, h2).mapv(|w| 0.1 * w);
        let regime_head = match regime_logits {
            Some(0) => return Err(Error::Domain("regime head needs at least one regime")),
            Some(k) => Some(RegimeHead {
                w: xavier(&mut rng, n_genes * k, h2).mapv(|w| 0.1 * w),
                b: Array1::zeros(n_genes * k),
                n_regimes: k,
            }),
            None => None,
        };
        Ok(Self {
            w1,
            b1: Array1::zeros(h1),
            w2,
            b2: Array1::zeros(h2),
            w_mu,
            b_mu: initial_log_time,
            w_sigma,
            b_sigma: softplus_inverse(INITIAL_SIGMA - SIGMA_FLOOR),
            regime_head,
        })
    }

    #[inline]
    pub fn input_dim(&self) -> usize {
        self.w1.ncols()
    }

    #[inline]
    pub fn n_genes(&self) -> usize {
        self.w1.ncols() / 2
    }

    pub fn forward(&self, x: ArrayView2<f64>) -> Result<EncoderPass> {
        if x.ncols() != self.input_dim() {
            return Err(Error::Shape("encoder input width must be 2 * genes"));
        }
        let a1 = x.dot(&self.w1.t()) + &self.b1;
        let h1 = a1.mapv(leaky_relu);
        let a2 = h1.dot(&self.w2.t()) + &self.b2;
        let h2 = a2.mapv(leaky_relu);
        let mu = h2.dot(&self.w_mu) + self.b_mu;
        let z_sigma = h2.dot(&self.w_sigma) + self.b_sigma;
        let sigma = z_sigma.mapv(|z| softplus(z) + SIGMA_FLOOR);
        let logits = self
            .regime_head
            .as_ref()
            .map(|head| h2.dot(&head.w.t()) + &head.b);
        Ok(EncoderPass {
            x: x.to_owned(),
            a1,
            h1,
            a2,
            h2,
            z_sigma,
            mu,
            sigma,
            logits,
        })
    }

    /// Parameter gradients given upstream gradients of the three heads.
    pub fn backward(
        &self,
        pass: &EncoderPass,
        d_mu: ArrayView1<f64>,
        d_sigma: ArrayView1<f64>,
        d_logits: Option<ArrayView2<f64>>,
    ) -> Self {
        let mut grads = self.zeros_like();
        let d_z = &d_sigma * &pass.z_sigma.mapv(sigmoid);

        grads.w_mu = pass.h2.t().dot(&d_mu);
        grads.b_mu = d_mu.sum();
        grads.w_sigma = pass.h2.t().dot(&d_z);
        grads.b_sigma = d_z.sum();

        let mut d_h2 = &d_mu.insert_axis(Axis(1)) * &self.w_mu.view().insert_axis(Axis(0));
        d_h2 += &(&d_z.view().insert_axis(Axis(1)) * &self.w_sigma.view().insert_axis(Axis(0)));
        if let (Some(head), Some(gh), Some(dl)) =
            (&self.regime_head, grads.regime_head.as_mut(), d_logits)
        {
            gh.w = dl.t().dot(&pass.h2);
            gh.b = dl.sum_axis(Axis(0));
            d_h2 += &dl.dot(&head.w);
        }

        let d_a2 = d_h2 * &pass.a2.mapv(leaky_relu_grad);
        grads.w2 = d_a2.t().dot(&pass.h1);
        grads.b2 = d_a2.sum_axis(Axis(0));

        let d_a1 = d_a2.dot(&self.w2) * &pass.a1.mapv(leaky_relu_grad);
        grads.w1 = d_a1.t().dot(&pass.x);
        grads.b1 = d_a1.sum_axis(Axis(0));
        grads
    }

    pub fn zeros_like(&self) -> Self {
        Self {
            w1: Array2::zeros(self.w1.raw_dim()),
            b1: Array1::zeros(self.b1.len()),
            w2: Array2::zeros(self.w2.raw_dim()),
            b2: Array1::zeros(self.b2.len()),
            w_mu: Array1::zeros(self.w_mu.len()),
            b_mu: 0.0,
            w_sigma: Array1::zeros(self.w_sigma.len()),
            b_sigma: 0.0,
            regime_head: self.regime_head.as_ref().map(|h| RegimeHead {
                w: Array2::zeros(h.w.raw_dim()),
                b: Array1::zeros(h.b.len()),
                n_regimes: h.n_regimes,
            }),
        }
    }

    pub fn params(&self) -> impl Iterator<Item = &f64> + '_ {
        let head = self
            .regime_head
            .iter()
            .flat_map(|RegimeHead { w, b, .. }| w.iter().chain(b.iter()));
        self.w1
            .iter()
            .chain(self.b1.iter())
            .chain(self.w2.iter())
            .chain(self.b2.iter())
            .chain(self.w_mu.iter())
            .chain(std::iter::once(&self.b_mu))
            .chain(self.w_sigma.iter())
            .chain(std::iter::once(&self.b_sigma))
            .chain(head)
    }

    pub fn params_mut(&mut self) -> impl Iterator<Item = &mut f64> + '_ {
        let head = self
            .regime_head
            .iter_mut()
            .flat_map(|RegimeHead { w, b, .. }| w.iter_mut().chain(b.iter_mut()));
        self.w1
            .iter_mut()
            .chain(self.b1.iter_mut())
            .chain(self.w2.iter_mut())
            .chain(self.b2.iter_mut())
            .chain(self.w_mu.iter_mut())
            .chain(std::iter::once(&mut self.b_mu))
            .chain(self.w_sigma.iter_mut())
            .chain(std::iter::once(&mut self.b_sigma))
            .chain(head)
    }

    pub fn n_params(&self) -> usize {
        self.params().count()
    }

    pub fn is_finite(&self) -> bool {
        self.params().all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn batch() -> Array2<f64> {
        array![
            [0.2, 1.3, 0.0, 0.7],
            [1.1, 0.4, 2.2, 0.1],
            [0.0, 0.9, 0.5, 1.6],
        ]
    }

    /// Scalar test objective: a fixed linear functional of every head.
    fn objective(enc: &Encoder, x: &Array2<f64>) -> f64 {
        let p = enc.forward(x.view()).unwrap();
        let mut v = 0.0;
        for i in 0..x.nrows() {
            v += (0.3 + i as f64) * p.mu[i] - (1.1 - 0.4 * i as f64) * p.sigma[i];
        }
        if let Some(l) = &p.logits {
            for ((i, j), &z) in l.indexed_iter() {
                v += 0.05 * ((i * 7 + j) % 5) as f64 * z;
            }
        }
        v
    }

    fn analytic(enc: &Encoder, x: &Array2<f64>) -> Encoder {
        let p = enc.forward(x.view()).unwrap();
        let n = x.nrows();
        let d_mu = Array1::from_shape_fn(n, |i| 0.3 + i as f64);
        let d_sigma = Array1::from_shape_fn(n, |i| -(1.1 - 0.4 * i as f64));
        let d_logits = p
            .logits
            .as_ref()
            .map(|l| Array2::from_shape_fn(l.raw_dim(), |(i, j)| 0.05 * ((i * 7 + j) % 5) as f64));
        enc.backward(&p, d_mu.view(), d_sigma.view(), d_logits.as_ref().map(|d| d.view()))
    }

    #[test]
    fn fresh_encoder_starts_at_requested_posterior() {
        let enc = Encoder::new(2, (8, 4), None, 1.5f64.ln(), 7).unwrap();
        let x = Array2::zeros((1, 4));
        let p = enc.forward(x.view()).unwrap();
        assert!((p.mu[0] - 1.5f64.ln()).abs() < 1e-12);
        assert!((p.sigma[0] - INITIAL_SIGMA).abs() < 1e-12);
    }

    #[test]
    fn same_seed_same_weights() {
        let a = Encoder::new(3, (5, 4), Some(2), 0.0, 11).unwrap();
        let b = Encoder::new(3, (5, 4), Some(2), 0.0, 11).unwrap();
        let c = Encoder::new(3, (5, 4), Some(2), 0.0, 12).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.n_params(), 5 * 6 + 5 + 4 * 5 + 4 + 4 + 1 + 4 + 1 + 6 * 4 + 6);
    }

    #[test]
    fn wrong_input_width_is_rejected() {
        let enc = Encoder::new(2, (4, 4), None, 0.0, 0).unwrap();
        let err = enc.forward(Array2::zeros((2, 5)).view()).unwrap_err();
        assert!(matches!(err, Error::Shape(_)));
    }

    #[test]
    fn sigma_is_positive_for_extreme_inputs() {
        let enc = Encoder::new(2, (4, 4), None, 0.0, 3).unwrap();
        let x = array![[1e3, -1e3, 1e3, 1e3], [-1e3, 1e3, -1e3, -1e3]];
        let p = enc.forward(x.view()).unwrap();
        assert!(p.sigma.iter().all(|&s| s >= SIGMA_FLOOR && s.is_finite()));
    }

    #[test]
    fn backward_matches_finite_differences() {
        for head in [None, Some(3)] {
            let enc = Encoder::new(2, (6, 5), head, 0.2, 42).unwrap();
            let x = batch();
            let grads = analytic(&enc, &x);
            let an: Vec<f64> = grads.params().copied().collect();
            let h = 1e-6;
            for i in 0..enc.n_params() {
                let mut p = enc.clone();
                *p.params_mut().nth(i).unwrap() += h;
                let mut m = enc.clone();
                *m.params_mut().nth(i).unwrap() -= h;
                let fd = (objective(&p, &x) - objective(&m, &x)) / (2.0 * h);
                assert!((fd - an[i]).abs() < 1e-5 * (1.0 + fd.abs()), "param {i}: fd={fd} an={}", an[i]);
            }
        }
    }

    #[test]
    fn features_are_log1p_and_scaled() {
        let u = array![[3.0, 0.0]];
        let s = array![[1.0, 7.0]];
        let x = encoder_features(u.view(), s.view(), array![3.0, 1.0].view()).unwrap();
        assert!((x[[0, 0]] - 2.0f64.ln()).abs() < 1e-15);
        assert_eq!(x[[0, 1]], 0.0);
        assert!((x[[0, 3]] - 8.0f64.ln()).abs() < 1e-15);
        assert!(encoder_features(u.view(), s.view(), array![1.0].view()).is_err());
    }
}
