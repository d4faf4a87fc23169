//! Observation models for counts given a predicted mean.
//!
//! Each model returns the log-density of one observation together with its derivative with
//! respect to the predicted mean, which is all the decoder needs for reverse mode.

use serde::{Deserialize, Serialize};
use statrs::function::gamma::ln_gamma;

use crate::params::NoiseScales;

/// Added to predicted means before taking logs in the count models.
pub const MEAN_EPS: f64 = 1e-8;

const HALF_LN_2PI: f64 = 0.918_938_533_204_672_7;

/// Noise model linking predicted abundance to observed counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NoiseModel {
    /// `x ~ N(mean, sigma^2)` on the value scale.
    #[default]
    Gaussian,
    /// `ln(1 + x) ~ N(ln(1 + mean), sigma^2)`, including the change-of-variable term.
    LogGaussian,
    /// `x ~ Poisson(mean)`.
    Poisson,
    /// `x ~ NB(mean, r)` with inverse dispersion `r` (variance `mean + mean^2 / r`).
    NegativeBinomial,
}

/// Log-density of one observation and its derivative w.r.t. the mean.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Score {
    pub log_lik: f64,
    pub d_mean: f64,
}

impl NoiseModel {
    /// Whether this model reads the Gaussian scales (`sigma_*`) or the NB dispersions.
    pub fn uses_sigma(&self) -> bool {
        matches!(self, NoiseModel::Gaussian | NoiseModel::LogGaussian)
    }

    /// `(scale_u, scale_s)` of gene `g` for this model.
    pub fn scales(&self, noise: &NoiseScales, g: usize) -> (f64, f64) {
        match self {
            NoiseModel::Gaussian | NoiseModel::LogGaussian => (noise.sigma_u[g], noise.sigma_s[g]),
            NoiseModel::NegativeBinomial => (noise.dispersion_u[g], noise.dispersion_s[g]),
            NoiseModel::Poisson => (1.0, 1.0),
        }
    }

    /// Score observation `x` against predicted `mean` (`mean >= 0`).
    ///
    /// `scale` is sigma for the Gaussian families, inverse dispersion for NB, ignored for
    /// Poisson.
    pub fn score(&self, x: f64, mean: f64, scale: f64) -> Score {
        match self {
            NoiseModel::Gaussian => {
                let r = x - mean;
                let z = r / scale;
                Score {
                    log_lik: -0.5 * z * z - scale.ln() - HALF_LN_2PI,
                    d_mean: r / (scale * scale),
                }
            }
            NoiseModel::LogGaussian => {
                let y = x.ln_1p();
                let m = mean.ln_1p();
                let r = y - m;
                let z = r / scale;
                Score {
                    log_lik: -0.5 * z * z - scale.ln() - HALF_LN_2PI - y,
                    d_mean: r / (scale * scale) / (1.0 + mean),
                }
            }
            NoiseModel::Poisson => {
                let lam = mean + MEAN_EPS;
                Score {
                    log_lik: x * lam.ln() - lam - ln_gamma(x + 1.0),
                    d_mean: x / lam - 1.0,
                }
            }
            NoiseModel::NegativeBinomial => {
                let lam = mean + MEAN_EPS;
                let r = scale;
                let denom = r + lam;
                Score {
                    log_lik: ln_gamma(x + r) - ln_gamma(r) - ln_gamma(x + 1.0)
                        + r * (r / denom).ln()
                        + x * (lam / denom).ln(),
                    d_mean: x / lam - (x + r) / denom,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ALL: [NoiseModel; 4] = [
        NoiseModel::Gaussian,
        NoiseModel::LogGaussian,
        NoiseModel::Poisson,
        NoiseModel::NegativeBinomial,
    ];

    #[test]
    fn gaussian_peaks_at_the_observation() {
        let at = NoiseModel::Gaussian.score(3.0, 3.0, 0.5);
        let off = NoiseModel::Gaussian.score(3.0, 3.4, 0.5);
        assert!(at.log_lik > off.log_lik);
        assert_eq!(at.d_mean, 0.0);
        assert!((at.log_lik - (-(0.5f64).ln() - HALF_LN_2PI)).abs() < 1e-12);
    }

    #[test]
    fn poisson_matches_closed_form() {
        // P(X=2 | 3) = 9/2 e^-3
        let s = NoiseModel::Poisson.score(2.0, 3.0, 1.0);
        let expect = (4.5f64).ln() - 3.0;
        assert!((s.log_lik - expect).abs() < 1e-7, "{} vs {expect}", s.log_lik);
    }

    #[test]
    fn negative_binomial_approaches_poisson() {
        for &(x, m) in &[(0.0, 1.5), (4.0, 2.0), (10.0, 7.5)] {
            let nb = NoiseModel::NegativeBinomial.score(x, m, 1e6);
            let p = NoiseModel::Poisson.score(x, m, 1.0);
            assert!((nb.log_lik - p.log_lik).abs() < 1e-4, "x={x}: {nb:?} vs {p:?}");
        }
    }

    #[test]
    fn negative_binomial_pmf_sums_to_one() {
        let total: f64 = (0..400)
            .map(|x| NoiseModel::NegativeBinomial.score(x as f64, 6.0, 2.5).log_lik.exp())
            .sum();
        assert!((total - 1.0).abs() < 1e-9, "{total}");
    }

    #[test]
    fn zero_mean_stays_finite() {
        for m in ALL {
            let s = m.score(3.0, 0.0, 0.7);
            assert!(s.log_lik.is_finite() && s.d_mean.is_finite(), "{m:?}: {s:?}");
        }
    }

    proptest! {
        #[test]
        fn prop_mean_derivative_matches_finite_difference(
            x in 0.0f64..30.0,
            mean in 0.1f64..30.0,
            scale in 0.2f64..5.0,
        ) {
            let x = x.round();
            let h = 1e-6;
            for m in ALL {
                let s = m.score(x, mean, scale);
                let fd = (m.score(x, mean + h, scale).log_lik - m.score(x, mean - h, scale).log_lik) / (2.0 * h);
                prop_assert!((fd - s.d_mean).abs() <= 1e-5 * (1.0 + fd.abs()), "{m:?}: fd={fd} an={}", s.d_mean);
            }
        }
    }
}
