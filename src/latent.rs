//! Latent-time posterior and prior.
//!
//! The encoder emits `(mu, sigma)` of a log-normal posterior over each cell's latent time, so
//! sampled times are positive without clamping. Sampling is reparameterized, `t = exp(mu + sigma
//! eps)`, with `eps ~ N(0, 1)` drawn by the caller.

use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;
use statrs::function::gamma::ln_gamma;

use crate::{Error, Result};

const HALF_LN_2PI_E: f64 = 1.418_938_533_204_672_7;

#[inline]
fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

#[inline]
fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Log-normal posterior `ln t ~ N(mu, sigma^2)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LogNormalPosterior {
    pub mu: f64,
    pub sigma: f64,
}

impl LogNormalPosterior {
    #[inline]
    pub fn sample(&self, eps: f64) -> f64 {
        (self.mu + self.sigma * eps).exp()
    }

    #[inline]
    pub fn mean(&self) -> f64 {
        (self.mu + 0.5 * self.sigma * self.sigma).exp()
    }

    #[inline]
    pub fn median(&self) -> f64 {
        self.mu.exp()
    }

    /// Standard deviation of `t`.
    pub fn std(&self) -> f64 {
        self.mean() * (self.sigma * self.sigma).exp_m1().sqrt()
    }
}

/// `KL(q || prior)` and its derivatives w.r.t. the posterior parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KlTerm {
    pub value: f64,
    pub d_mu: f64,
    pub d_sigma: f64,
}

/// Prior over latent time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum TimePrior {
    /// `ln t ~ N(mu, sigma^2)`.
    LogNormal { mu: f64, sigma: f64 },
    /// `t ~ Gamma(shape, scale)`.
    Gamma { shape: f64, scale: f64 },
    /// Flat on `[start, end]` with exponential tails of rate `2 / (tail * (end - start))`.
    ///
    /// Each tail carries `tail / 2` of the flat mass before truncation at `t = 0`; the density
    /// is renormalized over `t > 0`.
    TailedUniform { start: f64, end: f64, tail: f64 },
}

impl Default for TimePrior {
    fn default() -> Self {
        TimePrior::LogNormal {
            mu: 0.0,
            sigma: 1.0,
        }
    }
}

impl TimePrior {
    /// Log-normal prior with the given median.
    pub fn log_normal_with_median(median: f64, sigma: f64) -> Result<Self> {
        if !(median > 0.0) || !median.is_finite() {
            return Err(Error::Domain("prior median must be positive and finite"));
        }
        let p = TimePrior::LogNormal {
            mu: median.ln(),
            sigma,
        };
        p.validate()?;
        Ok(p)
    }

    pub fn validate(&self) -> Result<()> {
        match *self {
            TimePrior::LogNormal { mu, sigma } => {
                if !mu.is_finite() || !(sigma > 0.0) || !sigma.is_finite() {
                    return Err(Error::Domain("log-normal prior needs finite mu and sigma > 0"));
                }
            }
            TimePrior::Gamma { shape, scale } => {
                if !(shape > 0.0) || !(scale > 0.0) || !shape.is_finite() || !scale.is_finite() {
                    return Err(Error::Domain("gamma prior needs positive shape and scale"));
                }
            }
            TimePrior::TailedUniform { start, end, tail } => {
                if !(start >= 0.0) || !(end > start) || !end.is_finite() {
                    return Err(Error::Domain("tailed uniform prior needs 0 <= start < end"));
                }
                if !(tail > 0.0) || !tail.is_finite() {
                    return Err(Error::Domain("tailed uniform prior needs a positive tail"));
                }
            }
        }
        Ok(())
    }

    /// Typical log-time under the prior; used to center the encoder's `mu` head.
    pub fn log_location(&self) -> f64 {
        match *self {
            TimePrior::LogNormal { mu, .. } => mu,
            TimePrior::Gamma { shape, scale } => (shape * scale).ln(),
            TimePrior::TailedUniform { start, end, .. } => (0.5 * (start + end)).ln(),
        }
    }

    /// Closed-form `KL(q || self)`.
    pub fn kl(&self, q: LogNormalPosterior) -> KlTerm {
        let LogNormalPosterior { mu, sigma } = q;
        match *self {
            TimePrior::LogNormal {
                mu: m0,
                sigma: s0,
            } => {
                let v0 = s0 * s0;
                let dm = mu - m0;
                KlTerm {
                    value: (s0 / sigma).ln() + (sigma * sigma + dm * dm) / (2.0 * v0) - 0.5,
                    d_mu: dm / v0,
                    d_sigma: -1.0 / sigma + sigma / v0,
                }
            }
            TimePrior::Gamma { shape, scale } => {
                let m = q.mean();
                KlTerm {
                    value: -shape * mu - sigma.ln() + m / scale + ln_gamma(shape) + shape * scale.ln()
                        - HALF_LN_2PI_E,
                    d_mu: -shape + m / scale,
                    d_sigma: -1.0 / sigma + sigma * m / scale,
                }
            }
            TimePrior::TailedUniform { start, end, tail } => {
                // ln p(t) = -ln Z - lambda * (distance of t from [start, end])
                let width = end - start;
                let lambda = 2.0 / (tail * width);
                let ln_z = (width + (2.0 - (-lambda * start).exp()) / lambda).ln();
                let m = q.mean();
                let (mut excess, mut d_mu_ex, mut d_sigma_ex) = (0.0, 0.0, 0.0);
                if start > 0.0 {
                    // E[(start - t)+]
                    let z = (start.ln() - mu) / sigma;
                    let below = normal_cdf(z - sigma);
                    excess += start * normal_cdf(z) - m * below;
                    d_mu_ex -= m * below;
                    d_sigma_ex -= m * (sigma * below - normal_pdf(z - sigma));
                }
                // E[(t - end)+]
                let w = (end.ln() - mu) / sigma;
                let above = normal_cdf(sigma - w);
                excess += m * above - end * normal_cdf(-w);
                d_mu_ex += m * above;
                d_sigma_ex += m * (sigma * above + normal_pdf(w - sigma));
                KlTerm {
                    value: -mu - sigma.ln() - HALF_LN_2PI_E + ln_z + lambda * excess,
                    d_mu: -1.0 + lambda * d_mu_ex,
                    d_sigma: -1.0 / sigma + lambda * d_sigma_ex,
                }
            }
        }
    }
}

/// Reparameterized times `exp(mu + sigma * eps)` for a batch.
pub fn reparameterize(
    mu: ArrayView1<f64>,
    sigma: ArrayView1<f64>,
    eps: ArrayView1<f64>,
) -> Result<Array1<f64>> {
    if mu.len() != sigma.len() || mu.len() != eps.len() {
        return Err(Error::Shape("mu, sigma and eps must have equal length"));
    }
    Ok(ndarray::Zip::from(&mu)
        .and(&sigma)
        .and(&eps)
        .map_collect(|&m, &s, &e| (m + s * e).exp()))
}
