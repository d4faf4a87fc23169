//! Batch ELBO and its gradients.
//!
//! For cell `i`:
//!
//! \[
//! \mathrm{ELBO}_i = \sum_g \big[\log p(u_{ig}) + \log p(s_{ig})\big]
//!   - w_t\,\mathrm{KL}(q(t_i)\,\|\,p_i(t)) - w_r \sum_g \mathrm{KL}(r_{ig}\,\|\,w_{ig}(t_i))
//! \]
//!
//! The last term is present only with amortized regime assignment. `p_i` is the model's time
//! prior, or a log-normal centred on the cell's capture time when `capture_sigma` is set. The training loss is
//! `-mean_i ELBO_i`; all gradients below are of that loss.

use ndarray::{s, Array1, Array2, Array3, ArrayView1, ArrayView2, Zip};
use serde::{Deserialize, Serialize};

use crate::decoder::Decoder;
use crate::encoder::{encoder_features, Encoder};
use crate::latent::{reparameterize, LogNormalPosterior, TimePrior};
use crate::model::{RegimeAssignment, VelocityModel};
use crate::optim::global_norm;
use crate::params::GeneParams;
use crate::regime::CurveAdjoint;
use crate::simplex::{categorical_kl, softmax_into};
use crate::{Error, InstabilityReport, Result};

/// Gate weights below this are floored inside the regime KL.
pub const GATE_FLOOR: f64 = 1e-12;

/// How the latent time of each cell is obtained.
#[derive(Debug, Clone, Copy)]
pub enum LatentDraw<'a> {
    /// `t = exp(mu + sigma * eps)` with one standard-normal `eps` per cell.
    Sample(ArrayView1<'a, f64>),
    /// `t = exp(mu + sigma^2 / 2)`.
    PosteriorMean,
}

/// Weights of the two regularizers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ElboWeights {
    pub kl_time: f64,
    pub kl_regime: f64,
}

impl Default for ElboWeights {
    fn default() -> Self {
        Self {
            kl_time: 1.0,
            kl_regime: 1.0,
        }
    }
}

/// Per-cell means of the objective components.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ElboTerms {
    pub elbo: f64,
    pub log_likelihood: f64,
    pub kl_time: f64,
    pub kl_regime: f64,
}

/// Gradients of the loss for both parameter groups.
#[derive(Debug, Clone)]
pub struct Gradients {
    pub encoder: Encoder,
    pub genes: GeneParams,
}

impl Gradients {
    pub fn encoder_norm(&self) -> f64 {
        global_norm(self.encoder.params())
    }

    pub fn genes_norm(&self) -> f64 {
        global_norm(self.genes.trainable())
    }
}

/// Result of [`evaluate_batch`].
#[derive(Debug, Clone)]
pub struct BatchEvaluation {
    pub terms: ElboTerms,
    pub times: Array1<f64>,
    pub mu: Array1<f64>,
    pub sigma: Array1<f64>,
    /// cells x genes x regimes (amortized assignment only).
    pub responsibilities: Option<Array3<f64>>,
    pub grads: Option<Gradients>,
}

fn instability(quantity: &'static str) -> InstabilityReport {
    InstabilityReport::new(quantity)
}

/// Evaluate the objective on one batch; with `with_grads`, also its gradients.
///
/// Cell indices in errors are batch rows. Models with a capture-time prior need
/// [`evaluate_batch_with_capture`].
pub fn evaluate_batch(
    model: &VelocityModel,
    unspliced: ArrayView2<f64>,
    spliced: ArrayView2<f64>,
    draw: LatentDraw<'_>,
    weights: ElboWeights,
    with_grads: bool,
) -> Result<BatchEvaluation> {
    evaluate_batch_with_capture(model, unspliced, spliced, None, draw, weights, with_grads)
}

/// [`evaluate_batch`] with the capture time of every batch row.
///
/// `capture` is read only when the model sets `capture_sigma`.
pub fn evaluate_batch_with_capture(
    model: &VelocityModel,
    unspliced: ArrayView2<f64>,
    spliced: ArrayView2<f64>,
    capture: Option<ArrayView1<f64>>,
    draw: LatentDraw<'_>,
    weights: ElboWeights,
    with_grads: bool,
) -> Result<BatchEvaluation> {
    let (n, g) = unspliced.dim();
    if spliced.dim() != (n, g) {
        return Err(Error::ShapeMismatch {
            unspliced: unspliced.dim(),
            spliced: spliced.dim(),
        });
    }
    if g != model.n_genes() {
        return Err(Error::Shape("batch gene count differs from the model"));
    }
    if n == 0 {
        return Err(Error::Domain("batch must contain at least one cell"));
    }
    let cfg = &model.config;
    let capture = match (cfg.capture_sigma, capture) {
        (None, _) => None,
        (Some(_), None) => return Err(Error::Domain("capture-time prior needs capture times")),
        (Some(_), Some(c)) if c.len() != n => {
            return Err(Error::Shape("one capture time per batch row is required"))
        }
        (Some(sigma), Some(c)) => Some((c, sigma)),
    };
    let k = cfg.layout.len();
    let amortized = cfg.assignment == RegimeAssignment::Amortized;

    let x = encoder_features(unspliced, spliced, model.genes.scaling.view())?;
    let pass = model.encoder.forward(x.view())?;
    let times = match draw {
        LatentDraw::Sample(eps) => reparameterize(pass.mu.view(), pass.sigma.view(), eps)?,
        LatentDraw::PosteriorMean => Zip::from(&pass.mu)
            .and(&pass.sigma)
            .map_collect(|&mu, &sigma| LogNormalPosterior { mu, sigma }.mean()),
    };
    if let Some(i) = times.iter().position(|t| !t.is_finite()) {
        return Err(instability("latent time").at_cell(i).into_error());
    }
    let logits = match (&pass.logits, amortized) {
        (Some(l), true) => Some(l),
        (None, true) => return Err(Error::Domain("amortized assignment needs encoder regime logits")),
        _ => None,
    };

    let decoder = Decoder::new(&model.genes, cfg.policy, cfg.noise)?;
    let inv_n = 1.0 / n as f64;
    let mut responsibilities = amortized.then(|| Array3::zeros((n, g, k)));
    let mut adjs: Vec<CurveAdjoint> = (0..g).map(|_| CurveAdjoint::new(k)).collect();
    let mut d_mu = Array1::<f64>::zeros(n);
    let mut d_sigma = Array1::<f64>::zeros(n);
    let mut d_logits = amortized.then(|| Array2::<f64>::zeros((n, g * k)));

    let (mut sum_ll, mut sum_kl_t, mut sum_kl_r) = (0.0, 0.0, 0.0);
    let mut gate = vec![0.0; k];
    let mut resp = vec![0.0; k];
    let mut lg = vec![0.0; k];
    let mut d_w = vec![0.0; k];
    let mut d_r = vec![0.0; k];
    let mut d_gate = vec![0.0; k];

    for i in 0..n {
        let t = times[i];
        let post = LogNormalPosterior {
            mu: pass.mu[i],
            sigma: pass.sigma[i],
        };
        let prior = match capture {
            Some((c, sigma)) => TimePrior::log_normal_with_median(c[i], sigma)?,
            None => cfg.prior,
        };
        let kl_t = prior.kl(post);
        if !kl_t.value.is_finite() {
            return Err(instability("time KL").at_cell(i).into_error());
        }
        sum_kl_t += kl_t.value;
        let mut d_t = 0.0;

        for gi in 0..g {
            let curve = decoder.curve(gi);
            curve.gates_into(t, &mut gate);
            let blend: &[f64] = match logits {
                Some(l) => {
                    for (dst, &z) in lg.iter_mut().zip(l.slice(s![i, gi * k..(gi + 1) * k])) {
                        *dst = z;
                    }
                    softmax_into(&lg, &mut resp);
                    if let Some(r) = responsibilities.as_mut() {
                        for (j, &v) in resp.iter().enumerate() {
                            r[[i, gi, j]] = v;
                        }
                    }
                    &resp
                }
                None => &gate,
            };

            let pred = curve.predict_weighted(t, blend);
            if !pred.is_finite() {
                return Err(instability("predicted expression").at_cell(i).at_gene(gi).into_error());
            }
            let (score_u, score_s) = decoder.score(gi, unspliced[[i, gi]], spliced[[i, gi]], pred);
            let ll = score_u.log_lik + score_s.log_lik;
            if !ll.is_finite() {
                return Err(instability("log-likelihood").at_cell(i).at_gene(gi).into_error());
            }
            sum_ll += ll;
            let kl_r = if amortized {
                categorical_kl(blend, &gate, GATE_FLOOR)
            } else {
                0.0
            };
            sum_kl_r += kl_r;

            if !with_grads {
                continue;
            }
            let gu = -inv_n * score_u.d_mean * model.genes.scaling[gi];
            let gs = -inv_n * score_s.d_mean;
            d_t += curve.backward_blend(t, blend, gu, gs, &mut adjs[gi], &mut d_w);
            match d_logits.as_mut() {
                Some(dl) => {
                    let c = inv_n * weights.kl_regime;
                    for j in 0..k {
                        let (r, w) = (blend[j], gate[j]);
                        d_r[j] = d_w[j];
                        if r > 0.0 {
                            d_r[j] += c * (r.ln() - w.max(GATE_FLOOR).ln() + 1.0);
                        }
                        d_gate[j] = if w > GATE_FLOOR { -c * r / w } else { 0.0 };
                    }
                    d_t += curve.backward_gates(t, &d_gate, &mut adjs[gi]);
                    let dot: f64 = blend.iter().zip(&d_r).map(|(r, d)| r * d).sum();
                    for j in 0..k {
                        dl[[i, gi * k + j]] = blend[j] * (d_r[j] - dot);
                    }
                }
                None => {
                    d_t += curve.backward_gates(t, &d_w, &mut adjs[gi]);
                }
            }
        }

        if with_grads {
            d_mu[i] = inv_n * weights.kl_time * kl_t.d_mu + d_t * t;
            d_sigma[i] = inv_n * weights.kl_time * kl_t.d_sigma
                + match draw {
                    LatentDraw::Sample(eps) => d_t * t * eps[i],
                    LatentDraw::PosteriorMean => d_t * t * post.sigma,
                };
        }
    }

    let ll = sum_ll * inv_n;
    let kl_time = sum_kl_t * inv_n;
    let kl_regime = sum_kl_r * inv_n;
    let terms = ElboTerms {
        elbo: ll - weights.kl_time * kl_time - weights.kl_regime * kl_regime,
        log_likelihood: ll,
        kl_time,
        kl_regime,
    };

    let grads = if with_grads {
        let encoder = model.encoder.backward(
            &pass,
            d_mu.view(),
            d_sigma.view(),
            d_logits.as_ref().map(|d| d.view()),
        );
        if !encoder.is_finite() {
            return Err(instability("encoder gradient").into_error());
        }
        let mut genes = model.genes.zeros_like();
        for (gi, adj) in adjs.iter_mut().enumerate() {
            decoder.curve(gi).finish(adj);
            genes.accumulate_curve_grads(gi, &model.genes, adj);
        }
        genes.mask_frozen(cfg.train_beta);
        if let Some(gi) = genes.first_non_finite_gene() {
            return Err(instability("kinetic gradient").at_gene(gi).into_error());
        }
        Some(Gradients { encoder, genes })
    } else {
        None
    };

    Ok(BatchEvaluation {
        terms,
        times,
        mu: pass.mu,
        sigma: pass.sigma,
        responsibilities,
        grads,
    })
}
