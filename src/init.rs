//! Heuristic starting point: method-of-moments kinetics and initial latent times.
//!
//! Per gene (training cells only):
//!
//! 1. cells above the `percentile` of both modalities are taken as near steady state;
//! 2. with β = 1, γ is the no-intercept regression slope of u on s over those cells and α is
//!    their mean unspliced level;
//! 3. each cell's gene-local time inverts the induction branch (or, when the layout switches
//!    induction -> repression, whichever of the two branches explains the cell better);
//! 4. gene-local times are rank-normalized onto `[0, t_max]` and the cell's initial time is the
//!    median over informative genes;
//! 5. the switch-off time is the median initial time of the steady cells, other switch times are
//!    spread evenly around it;
//! 6. noise scales come from the residuals of this initial fit.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use statrs::statistics::{Data, OrderStatistics, RankTieBreaker};
use tracing::warn;

use crate::kinetics::{solve, KineticState, Rates};
use crate::likelihood::NoiseModel;
use crate::model::ModelConfig;
use crate::params::{GeneKinetics, GeneParams, NoiseScales};
use crate::regime::{RegimeKind, RegimeLayout, SwitchPolicy};
use crate::{Error, Result};

const GAMMA_RANGE: (f64, f64) = (1e-3, 1e3);
const DISPERSION_RANGE: (f64, f64) = (0.1, 1e4);
/// Smallest `exp(-rate * tau)` used when inverting a branch.
const MIN_DECAY: f64 = 1e-6;

/// Output of [`initialize`].
#[derive(Debug, Clone)]
pub struct InitialFit {
    pub genes: GeneParams,
    /// Initial latent time of every input cell.
    pub t_init: Array1<f64>,
    /// Genes without usable signal that received default kinetics.
    pub fallback_genes: Vec<usize>,
}

fn mean_std(x: ArrayView1<f64>) -> (f64, f64) {
    let n = x.len().max(1) as f64;
    let m = x.sum() / n;
    let v = x.iter().map(|&v| (v - m) * (v - m)).sum::<f64>() / n;
    (m, v.sqrt())
}

fn percentile_of_positive(x: ArrayView1<f64>, p: usize) -> Option<f64> {
    let pos: Vec<f64> = x.iter().copied().filter(|&v| v > 0.0).collect();
    if pos.is_empty() {
        return None;
    }
    Some(Data::new(pos).percentile(p))
}

/// Elapsed time on the induction branch from the origin.
fn induction_time(u: f64, s: f64, r: Rates) -> f64 {
    let Rates { alpha, beta, gamma } = r;
    let ratio = if ((gamma - beta) / beta).abs() > 1e-3 {
        // x = s - beta/(gamma-beta) u relaxes to x_inf at rate gamma.
        let c = beta / (gamma - beta);
        let x_inf = alpha / gamma - c * alpha / beta;
        1.0 - (s - c * u) / x_inf
    } else {
        1.0 - beta * u / alpha
    };
    let rate = if ((gamma - beta) / beta).abs() > 1e-3 { gamma } else { beta };
    -ratio.clamp(MIN_DECAY, 1.0).ln() / rate
}

/// Elapsed time on the repression branch from the induction steady state.
fn repression_time(u: f64, s: f64, r: Rates) -> f64 {
    let Rates { alpha, beta, gamma } = r;
    let (u0, s0) = (alpha / beta, alpha / gamma);
    let (ratio, rate) = if ((gamma - beta) / beta).abs() > 1e-3 {
        let c = beta / (gamma - beta);
        ((s - c * u) / (s0 - c * u0), gamma)
    } else {
        (u / u0, beta)
    };
    -ratio.clamp(MIN_DECAY, 1.0).ln() / rate
}

/// Empirical-CDF map of `x` onto `[0, t_max]` (ties share their average rank).
fn rank_to_time(x: &[f64], t_max: f64) -> Vec<f64> {
    let n = x.len();
    if n < 2 {
        return vec![0.5 * t_max; n];
    }
    Data::new(x.to_vec())
        .ranks(RankTieBreaker::Average)
        .into_iter()
        .map(|r| t_max * (r - 1.0) / (n - 1) as f64)
        .collect()
}

/// Switch times with the switch-off boundary at `switch_off` and the rest spread evenly.
fn spread_switch_times(layout: &RegimeLayout, switch_off: Option<f64>, t_max: f64) -> Vec<f64> {
    let k = layout.len();
    match (layout.switch_off_boundary(), switch_off) {
        (Some(j), Some(b)) => {
            let b = b.clamp(0.05 * t_max, 0.95 * t_max);
            (1..k)
                .map(|i| {
                    if i <= j {
                        b * i as f64 / j as f64
                    } else {
                        b + (t_max - b) * (i - j) as f64 / (k - j) as f64
                    }
                })
                .collect()
        }
        _ => (1..k).map(|i| t_max * i as f64 / k as f64).collect(),
    }
}

struct GeneMoments {
    rates: Rates,
    steady: Vec<usize>,
    scaling: f64,
}

fn gene_moments(u: ArrayView1<f64>, s: ArrayView1<f64>, fit_scaling: bool, p: usize) -> Option<GeneMoments> {
    let (_, su) = mean_std(u);
    let (_, ss) = mean_std(s);
    let scaling = if fit_scaling && su > 0.0 && ss > 0.0 {
        su / ss
    } else {
        1.0
    };
    let u: Array1<f64> = u.mapv(|v| v / scaling);
    let pu = percentile_of_positive(u.view(), p)?;
    let ps = percentile_of_positive(s, p)?;
    let mut steady: Vec<usize> = (0..u.len()).filter(|&i| u[i] >= pu && s[i] >= ps).collect();
    if steady.is_empty() {
        steady = (0..u.len()).filter(|&i| s[i] >= ps).collect();
    }
    let (num, den) = steady
        .iter()
        .fold((0.0, 0.0), |(a, b), &i| (a + u[i] * s[i], b + s[i] * s[i]));
    if !(den > 0.0) || !(num > 0.0) {
        return None;
    }
    let mut gamma = num / den;
    if gamma < 0.05 {
        gamma *= 1.2;
    } else if gamma > 1.5 {
        gamma /= 1.2;
    }
    let gamma = gamma.clamp(GAMMA_RANGE.0, GAMMA_RANGE.1);
    let beta = 1.0;
    let alpha = beta * steady.iter().map(|&i| u[i]).sum::<f64>() / steady.len() as f64;
    if !(alpha > 0.0) {
        return None;
    }
    Some(GeneMoments {
        rates: Rates { alpha, beta, gamma },
        steady,
        scaling,
    })
}

/// Gene-local time of every cell for one gene.
fn gene_times(layout: &RegimeLayout, u: ArrayView1<f64>, s: ArrayView1<f64>, m: &GeneMoments) -> Vec<f64> {
    let r = m.rates;
    let (_, su) = mean_std(u);
    let (_, ss) = mean_std(s);
    let (su, ss) = (su.max(1e-12), ss.max(1e-12));
    let with_repression = layout.switch_off_boundary().is_some();
    let induction: Vec<f64> = (0..u.len())
        .map(|i| induction_time(u[i] / m.scaling, s[i], r))
        .collect();
    if !with_repression {
        return induction;
    }
    // Repression cells sit after the latest induction cell.
    let t_switch = induction.iter().copied().fold(0.0, f64::max);
    let repressed = r.with_alpha(0.0);
    let top = KineticState::new(r.alpha / r.beta, r.alpha / r.gamma);
    (0..u.len())
        .map(|i| {
            let (ui, si) = (u[i] / m.scaling, s[i]);
            let dist = |x: KineticState| ((ui - x.u) / su).powi(2) + ((si - x.s) / ss).powi(2);
            let t_ind = induction[i];
            let t_rep = repression_time(ui, si, r);
            let d_ind = dist(solve(r, KineticState::default(), t_ind));
            let d_rep = dist(solve(repressed, top, t_rep));
            if d_rep < d_ind {
                t_switch + t_rep
            } else {
                t_ind
            }
        })
        .collect()
}

/// Residual-based noise scales for a fitted table and initial times.
pub fn estimate_noise(
    noise: NoiseModel,
    genes: &GeneParams,
    unspliced: ArrayView2<f64>,
    spliced: ArrayView2<f64>,
    times: ArrayView1<f64>,
) -> Result<NoiseScales> {
    let (n, g) = unspliced.dim();
    if spliced.dim() != (n, g) || times.len() != n || genes.n_genes() != g {
        return Err(Error::Shape("noise estimation inputs disagree on cells or genes"));
    }
    let mut out = NoiseScales::unit(g);
    let mut pred_u = Array2::zeros((n, g));
    let mut pred_s = Array2::zeros((n, g));
    for j in 0..g {
        let curve = genes.curve(j, SwitchPolicy::Hard)?;
        for i in 0..n {
            let x = curve.predict(times[i]);
            pred_u[[i, j]] = genes.scaling[j] * x.u;
            pred_s[[i, j]] = x.s;
        }
    }
    let sigma = |obs: ArrayView1<f64>, pred: ArrayView1<f64>, log: bool| {
        let tf = |v: f64| if log { v.ln_1p() } else { v };
        let obs_t: Array1<f64> = obs.mapv(tf);
        let res: Array1<f64> = &obs_t - &pred.mapv(tf);
        let (_, sd_obs) = mean_std(obs_t.view());
        let (_, sd_res) = mean_std(res.view());
        sd_res.max(0.05 * sd_obs).max(1e-3)
    };
    let dispersion = |obs: ArrayView1<f64>, pred: ArrayView1<f64>| {
        let (mut num, mut den) = (0.0, 0.0);
        for (&x, &m) in obs.iter().zip(pred.iter()) {
            num += m * m;
            den += (x - m) * (x - m) - m;
        }
        if den > 0.0 && num > 0.0 {
            (num / den).clamp(DISPERSION_RANGE.0, DISPERSION_RANGE.1)
        } else {
            DISPERSION_RANGE.1
        }
    };
    let log = noise == NoiseModel::LogGaussian;
    for j in 0..g {
        let (ou, os) = (unspliced.column(j), spliced.column(j));
        let (pu, ps) = (pred_u.column(j), pred_s.column(j));
        out.sigma_u[j] = sigma(ou, pu, log);
        out.sigma_s[j] = sigma(os, ps, log);
        out.dispersion_u[j] = dispersion(ou, pu);
        out.dispersion_s[j] = dispersion(os, ps);
    }
    Ok(out)
}

/// Method-of-moments initialization from the given (training) cells.
pub fn initialize(
    unspliced: ArrayView2<f64>,
    spliced: ArrayView2<f64>,
    model: &ModelConfig,
    percentile: usize,
) -> Result<InitialFit> {
    model.validate()?;
    let (n, g) = unspliced.dim();
    if spliced.dim() != (n, g) {
        return Err(Error::ShapeMismatch {
            unspliced: unspliced.dim(),
            spliced: spliced.dim(),
        });
    }
    if n == 0 || g == 0 {
        return Err(Error::Domain("initialization needs at least one cell and one gene"));
    }
    if !(1..=99).contains(&percentile) {
        return Err(Error::Domain("steady-state percentile must lie in 1..=99"));
    }
    let layout = &model.layout;
    let t_max = model.t_max;

    let mut moments = Vec::with_capacity(g);
    let mut fallback_genes = Vec::new();
    let mut per_gene_times: Vec<Vec<f64>> = Vec::new();
    for j in 0..g {
        let m = gene_moments(unspliced.column(j), spliced.column(j), model.fit_scaling, percentile);
        if let Some(m) = &m {
            let t = gene_times(layout, unspliced.column(j), spliced.column(j), m);
            per_gene_times.push(rank_to_time(&t, t_max));
        } else {
            warn!(gene = j, "no steady-state signal; using default kinetics");
            fallback_genes.push(j);
        }
        moments.push(m);
    }

    let t_init: Array1<f64> = if per_gene_times.is_empty() {
        warn!("no informative genes; starting every cell at t_max / 2");
        Array1::from_elem(n, 0.5 * t_max)
    } else {
        Array1::from_shape_fn(n, |i| {
            Data::new(per_gene_times.iter().map(|t| t[i]).collect::<Vec<f64>>()).median()
        })
    };

    let kinetics: Vec<GeneKinetics> = moments
        .iter()
        .map(|m| {
            let (rates, scaling, switch_off) = match m {
                Some(m) => {
                    let steady_t: Vec<f64> = m.steady.iter().map(|&i| t_init[i]).collect();
                    let b = if steady_t.is_empty() {
                        None
                    } else {
                        Some(Data::new(steady_t).median())
                    };
                    (m.rates, m.scaling, b)
                }
                None => (
                    Rates {
                        alpha: 1.0,
                        beta: 1.0,
                        gamma: 1.0,
                    },
                    1.0,
                    None,
                ),
            };
            let alpha = layout
                .kinds()
                .iter()
                .map(|&k| if k == RegimeKind::Induction { rates.alpha } else { 0.0 })
                .collect();
            GeneKinetics {
                alpha,
                beta: rates.beta,
                gamma: rates.gamma,
                switch_times: spread_switch_times(layout, switch_off, t_max),
                scaling,
            }
        })
        .collect();

    let unit = GeneParams::from_kinetics(layout, &kinetics, NoiseScales::unit(g))?;
    let noise = estimate_noise(model.noise, &unit, unspliced, spliced, t_init.view())?;
    let genes = GeneParams { noise, ..unit };
    Ok(InitialFit {
        genes,
        t_init,
        fallback_genes,
    })
}
