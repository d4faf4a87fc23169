//! Mixture-of-regimes kinetics for one gene.
//!
//! A gene walks through an ordered list of regimes. Regime 0 starts at `t = 0` from
//! `(u, s) = (0, 0)`; regime `k` starts at switch time `b_k` from the state regime `k-1` reached
//! at `b_k`. Entry states are computed analytically, so the trajectory is continuous by
//! construction.
//!
//! The prediction at latent time `t` blends the branches with gate weights `w_k(t)`:
//!
//! - [`SwitchPolicy::Soft`]: `w_k = σ((t-b_k)/T) - σ((t-b_{k+1})/T)` (with `b_0 = -∞`, `b_K = +∞`),
//!   so gradients reach the switch times directly through the gates;
//! - [`SwitchPolicy::Hard`]: one-hot indicator of `b_k <= t < b_{k+1}`.
//!
//! Evaluated before its own start, a branch returns its entry state, so the blend is continuous
//! in `t` under either policy.
//!
//! Reverse mode: per-cell calls accumulate into a [`CurveAdjoint`]; [`GeneCurve::finish`] then
//! pulls entry-state adjoints back through the switch chain once per batch.

use serde::{Deserialize, Serialize};

use crate::activation::sigmoid;
use crate::kinetics::{solve_with_jacobian, KineticJacobian, KineticState, Partials, Rates};
use crate::{Error, Result};

/// Kinetic regime of a gene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegimeKind {
    /// Transcription on, with its own learned rate α.
    Induction,
    /// Transcription off (α = 0).
    Repression,
    /// State frozen at the regime's entry state.
    Steady,
}

/// Validated, ordered list of regimes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegimeLayout {
    kinds: Vec<RegimeKind>,
}

impl RegimeLayout {
    /// At least one regime, and at least one of them an induction regime.
    pub fn new(kinds: Vec<RegimeKind>) -> Result<Self> {
        if kinds.is_empty() {
            return Err(Error::Domain("regime layout must have at least one regime"));
        }
        if !kinds.contains(&RegimeKind::Induction) {
            return Err(Error::Domain("regime layout must contain an induction regime"));
        }
        Ok(Self { kinds })
    }

    /// Single induction branch.
    pub fn induction() -> Self {
        Self {
            kinds: vec![RegimeKind::Induction],
        }
    }

    /// Induction followed by repression.
    pub fn induction_repression() -> Self {
        Self {
            kinds: vec![RegimeKind::Induction, RegimeKind::Repression],
        }
    }

    /// Off until switch-on, induction until switch-off, then repression.
    pub fn on_off() -> Self {
        Self {
            kinds: vec![
                RegimeKind::Steady,
                RegimeKind::Induction,
                RegimeKind::Repression,
            ],
        }
    }

    #[inline]
    pub fn kinds(&self) -> &[RegimeKind] {
        &self.kinds
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Number of switch times (`len() - 1`).
    #[inline]
    pub fn n_switches(&self) -> usize {
        self.kinds.len() - 1
    }

    /// Boundary index `k` of the first induction -> repression transition, if any.
    pub fn switch_off_boundary(&self) -> Option<usize> {
        (1..self.kinds.len()).find(|&k| {
            self.kinds[k - 1] == RegimeKind::Induction && self.kinds[k] == RegimeKind::Repression
        })
    }
}

impl Default for RegimeLayout {
    fn default() -> Self {
        Self::induction_repression()
    }
}

/// How regime boundaries enter the prediction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SwitchPolicy {
    /// Sigmoid-gated blending with the given time temperature.
    Soft { temperature: f64 },
    /// Exactly one regime active.
    Hard,
}

impl Default for SwitchPolicy {
    fn default() -> Self {
        Self::Soft { temperature: 0.1 }
    }
}

impl SwitchPolicy {
    pub fn validate(&self) -> Result<()> {
        match *self {
            SwitchPolicy::Soft { temperature } if !(temperature > 0.0) || !temperature.is_finite() => {
                Err(Error::Domain("switch temperature must be positive and finite"))
            }
            _ => Ok(()),
        }
    }
}

/// One branch of the mixture together with its parameter set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Branch {
    Kinetic(Rates),
    Frozen,
}

impl Branch {
    fn for_kind(kind: RegimeKind, rates: Rates, alpha: f64) -> Self {
        match kind {
            RegimeKind::Induction => Branch::Kinetic(rates.with_alpha(alpha)),
            RegimeKind::Repression => Branch::Kinetic(rates.with_alpha(0.0)),
            RegimeKind::Steady => Branch::Frozen,
        }
    }

    /// State after `tau` from `init`, with the Jacobian of [`crate::kinetics::solve`].
    pub fn advance(&self, init: KineticState, tau: f64) -> (KineticState, KineticJacobian) {
        match *self {
            Branch::Kinetic(rates) => solve_with_jacobian(rates, init, tau),
            Branch::Frozen => (
                init,
                KineticJacobian {
                    du: Partials {
                        u0: 1.0,
                        ..Partials::default()
                    },
                    ds: Partials {
                        s0: 1.0,
                        ..Partials::default()
                    },
                },
            ),
        }
    }

    pub fn state(&self, init: KineticState, tau: f64) -> KineticState {
        match *self {
            Branch::Kinetic(rates) => crate::kinetics::solve(rates, init, tau),
            Branch::Frozen => init,
        }
    }
}

/// Adjoints accumulated by [`GeneCurve`] backward calls.
#[derive(Debug, Clone, PartialEq)]
pub struct CurveAdjoint {
    /// d/dα_k; only induction regimes receive gradient.
    pub alpha: Vec<f64>,
    pub beta: f64,
    pub gamma: f64,
    /// d/db_k; entry 0 stays zero (`b_0 = 0` is fixed).
    pub boundary: Vec<f64>,
    entry: Vec<KineticState>,
}

impl CurveAdjoint {
    pub fn new(n_regimes: usize) -> Self {
        Self {
            alpha: vec![0.0; n_regimes],
            beta: 0.0,
            gamma: 0.0,
            boundary: vec![0.0; n_regimes],
            entry: vec![KineticState::default(); n_regimes],
        }
    }
}

/// Precomputed trajectory of one gene for the current parameter values.
///
/// Rebuilt on every forward pass; never outlives a parameter update.
#[derive(Debug, Clone)]
pub struct GeneCurve {
    kinds: Vec<RegimeKind>,
    branches: Vec<Branch>,
    /// `boundaries[0] = 0`, `boundaries[k] = b_k`.
    boundaries: Vec<f64>,
    entries: Vec<KineticState>,
    /// `entry_jacobians[k]`: Jacobian of `entries[k]` w.r.t. branch `k-1` inputs.
    entry_jacobians: Vec<KineticJacobian>,
    policy: SwitchPolicy,
}

impl GeneCurve {
    /// Build the curve from per-regime `alphas`, shared `(beta, gamma)` and `switch_times`.
    ///
    /// `alphas` has one entry per regime (ignored for non-induction regimes);
    /// `switch_times` has `len - 1` strictly increasing positive entries.
    pub fn new(
        layout: &RegimeLayout,
        alphas: &[f64],
        beta: f64,
        gamma: f64,
        switch_times: &[f64],
        policy: SwitchPolicy,
    ) -> Result<Self> {
        let k = layout.len();
        if alphas.len() != k {
            return Err(Error::Shape("alphas must have one entry per regime"));
        }
        if switch_times.len() != layout.n_switches() {
            return Err(Error::Shape("switch_times must have len(regimes) - 1 entries"));
        }
        let rates = Rates {
            alpha: 0.0,
            beta,
            gamma,
        };
        let branches: Vec<Branch> = layout
            .kinds()
            .iter()
            .zip(alphas)
            .map(|(&kind, &alpha)| Branch::for_kind(kind, rates, alpha))
            .collect();

        let mut boundaries = Vec::with_capacity(k);
        boundaries.push(0.0);
        boundaries.extend_from_slice(switch_times);

        let mut entries = Vec::with_capacity(k);
        let mut entry_jacobians = Vec::with_capacity(k);
        entries.push(KineticState::default());
        entry_jacobians.push(KineticJacobian::default());
        for j in 1..k {
            let gap = boundaries[j] - boundaries[j - 1];
            let (state, jac) = branches[j - 1].advance(entries[j - 1], gap);
            entries.push(state);
            entry_jacobians.push(jac);
        }

        Ok(Self {
            kinds: layout.kinds().to_vec(),
            branches,
            boundaries,
            entries,
            entry_jacobians,
            policy,
        })
    }

    #[inline]
    pub fn n_regimes(&self) -> usize {
        self.branches.len()
    }

    /// Switch times `b_1..b_{K-1}`.
    pub fn switch_times(&self) -> &[f64] {
        &self.boundaries[1..]
    }

    /// Entry state of every regime.
    pub fn entry_states(&self) -> &[KineticState] {
        &self.entries
    }

    pub fn policy(&self) -> SwitchPolicy {
        self.policy
    }

    /// State of branch `k` at latent time `t`.
    #[inline]
    pub fn branch_state(&self, k: usize, t: f64) -> KineticState {
        self.branches[k].state(self.entries[k], t - self.boundaries[k])
    }

    /// Gate weights at `t`, written into `out` (length = number of regimes).
    pub fn gates_into(&self, t: f64, out: &mut [f64]) {
        let k = self.n_regimes();
        debug_assert_eq!(out.len(), k);
        match self.policy {
            SwitchPolicy::Soft { temperature } => {
                // entered(j) = σ((t - b_j)/T): share of the time axis past switch j.
                let entered = |j: usize| {
                    if j == 0 {
                        1.0
                    } else if j < k {
                        sigmoid((t - self.boundaries[j]) / temperature)
                    } else {
                        0.0
                    }
                };
                for (j, w) in out.iter_mut().enumerate() {
                    *w = entered(j) - entered(j + 1);
                }
            }
            SwitchPolicy::Hard => {
                let active = self.active_regime(t);
                for (j, w) in out.iter_mut().enumerate() {
                    *w = if j == active { 1.0 } else { 0.0 };
                }
            }
        }
    }

    /// Gate weights at `t`.
    pub fn gates(&self, t: f64) -> Vec<f64> {
        let mut out = vec![0.0; self.n_regimes()];
        self.gates_into(t, &mut out);
        out
    }

    /// Index of the regime whose validity interval contains `t`.
    pub fn active_regime(&self, t: f64) -> usize {
        self.boundaries[1..]
            .iter()
            .take_while(|&&b| t >= b)
            .count()
    }

    /// Prediction blended with arbitrary `weights` (gates or learned responsibilities).
    pub fn predict_weighted(&self, t: f64, weights: &[f64]) -> KineticState {
        let mut out = KineticState::default();
        for (k, &w) in weights.iter().enumerate() {
            if w == 0.0 {
                continue;
            }
            let x = self.branch_state(k, t);
            out.u += w * x.u;
            out.s += w * x.s;
        }
        out
    }

    /// Gated prediction at `t`.
    pub fn predict(&self, t: f64) -> KineticState {
        let w = self.gates(t);
        self.predict_weighted(t, &w)
    }

    /// Backward through `predict_weighted`.
    ///
    /// Accumulates branch adjoints (scaled by `weights`) into `adj`, writes `d/dw_k` into
    /// `d_weights`, and returns the direct gradient w.r.t. `t`.
    pub fn backward_blend(
        &self,
        t: f64,
        weights: &[f64],
        gu: f64,
        gs: f64,
        adj: &mut CurveAdjoint,
        d_weights: &mut [f64],
    ) -> f64 {
        let mut dt = 0.0;
        for k in 0..self.n_regimes() {
            let tau = t - self.boundaries[k];
            let (x, jac) = self.branches[k].advance(self.entries[k], tau);
            d_weights[k] = gu * x.u + gs * x.s;
            let w = weights[k];
            if w == 0.0 {
                continue;
            }
            let p = jac.vjp(w * gu, w * gs);
            self.accumulate_rates(k, &p, adj);
            adj.entry[k].u += p.u0;
            adj.entry[k].s += p.s0;
            if tau > 0.0 {
                dt += p.tau;
                if k > 0 {
                    adj.boundary[k] -= p.tau;
                }
            }
        }
        dt
    }

    /// Backward through the gates: `d_weights` is `d/dw_k`. Returns the gradient w.r.t. `t`.
    pub fn backward_gates(&self, t: f64, d_weights: &[f64], adj: &mut CurveAdjoint) -> f64 {
        let temperature = match self.policy {
            SwitchPolicy::Soft { temperature } => temperature,
            SwitchPolicy::Hard => return 0.0,
        };
        let mut dt = 0.0;
        for k in 1..self.n_regimes() {
            // σ_k enters w_k with +1 and w_{k-1} with -1.
            let sig = sigmoid((t - self.boundaries[k]) / temperature);
            let slope = sig * (1.0 - sig) / temperature;
            let g = (d_weights[k] - d_weights[k - 1]) * slope;
            dt += g;
            adj.boundary[k] -= g;
        }
        dt
    }

    /// Backward through the gated prediction [`GeneCurve::predict`]. Returns `d/dt`.
    pub fn backward_point(&self, t: f64, gu: f64, gs: f64, adj: &mut CurveAdjoint) -> f64 {
        let k = self.n_regimes();
        let w = self.gates(t);
        let mut dw = vec![0.0; k];
        let dt = self.backward_blend(t, &w, gu, gs, adj, &mut dw);
        dt + self.backward_gates(t, &dw, adj)
    }

    /// Pull entry-state adjoints back through the switch chain. Call once, after all cells.
    pub fn finish(&self, adj: &mut CurveAdjoint) {
        for k in (1..self.n_regimes()).rev() {
            let e = adj.entry[k];
            let p = self.entry_jacobians[k].vjp(e.u, e.s);
            self.accumulate_rates(k - 1, &p, adj);
            adj.entry[k - 1].u += p.u0;
            adj.entry[k - 1].s += p.s0;
            adj.boundary[k] += p.tau;
            if k > 1 {
                adj.boundary[k - 1] -= p.tau;
            }
        }
    }

    fn accumulate_rates(&self, k: usize, p: &Partials, adj: &mut CurveAdjoint) {
        match self.branches[k] {
            Branch::Kinetic(_) => {
                if self.kinds[k] == RegimeKind::Induction {
                    adj.alpha[k] += p.alpha;
                }
                adj.beta += p.beta;
                adj.gamma += p.gamma;
            }
            Branch::Frozen => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinetics::solve;
    use crate::ode::{integrate_splicing, OdeMethod};
    use crate::simplex::validate_simplex;
    use proptest::prelude::*;

    fn curve(layout: RegimeLayout, switch: &[f64], policy: SwitchPolicy) -> GeneCurve {
        let alphas: Vec<f64> = (0..layout.len()).map(|k| 2.0 + 0.5 * k as f64).collect();
        GeneCurve::new(&layout, &alphas, 1.0, 0.5, switch, policy).unwrap()
    }

    #[test]
    fn layout_requires_an_induction_regime() {
        assert!(RegimeLayout::new(vec![]).is_err());
        assert!(RegimeLayout::new(vec![RegimeKind::Repression]).is_err());
        assert_eq!(RegimeLayout::on_off().switch_off_boundary(), Some(2));
        assert_eq!(RegimeLayout::induction().switch_off_boundary(), None);
    }

    #[test]
    fn entry_state_of_repression_equals_end_of_induction() {
        let c = curve(RegimeLayout::induction_repression(), &[3.0], SwitchPolicy::Hard);
        let end = solve(Rates { alpha: 2.0, beta: 1.0, gamma: 0.5 }, KineticState::default(), 3.0);
        assert_eq!(c.entry_states()[1], end);
    }

    #[test]
    fn hard_switching_is_continuous_across_boundaries() {
        let c = curve(RegimeLayout::on_off(), &[1.0, 4.0], SwitchPolicy::Hard);
        for &b in c.switch_times() {
            let before = c.predict(b - 1e-10);
            let after = c.predict(b + 1e-10);
            assert!((before.u - after.u).abs() < 1e-8, "u jump at {b}: {before:?} {after:?}");
            assert!((before.s - after.s).abs() < 1e-8, "s jump at {b}: {before:?} {after:?}");
        }
    }

    #[test]
    fn hard_switching_matches_piecewise_integration() {
        let c = curve(RegimeLayout::induction_repression(), &[2.5], SwitchPolicy::Hard);
        let r = Rates { alpha: 2.0, beta: 1.0, gamma: 0.5 };
        let at_switch =
            integrate_splicing(OdeMethod::Rk4, r, KineticState::default(), 2.5, 2_500).unwrap();
        let later =
            integrate_splicing(OdeMethod::Rk4, r.with_alpha(0.0), at_switch, 3.0, 3_000).unwrap();
        let got = c.predict(5.5);
        assert!((got.u - later.u).abs() < 1e-8 && (got.s - later.s).abs() < 1e-8, "{got:?} vs {later:?}");
    }

    #[test]
    fn soft_gates_approach_hard_gates_away_from_switches() {
        let soft = curve(RegimeLayout::on_off(), &[1.0, 4.0], SwitchPolicy::Soft { temperature: 0.01 });
        let hard = curve(RegimeLayout::on_off(), &[1.0, 4.0], SwitchPolicy::Hard);
        for &t in &[0.3, 2.0, 3.5, 6.0] {
            let (a, b) = (soft.predict(t), hard.predict(t));
            assert!((a.u - b.u).abs() < 1e-9 && (a.s - b.s).abs() < 1e-9, "t={t}: {a:?} vs {b:?}");
        }
    }

    #[test]
    fn degenerate_switch_times_stay_finite() {
        for &b in &[1e-300, 1e-12, 1e12, 1e300, f64::MAX] {
            for policy in [SwitchPolicy::Hard, SwitchPolicy::Soft { temperature: 0.1 }] {
                let c = curve(RegimeLayout::induction_repression(), &[b], policy);
                for &t in &[0.0, 1e-6, 1.0, 50.0, 1e6] {
                    let x = c.predict(t);
                    assert!(x.is_finite() && x.u >= 0.0 && x.s >= 0.0, "b={b} t={t}: {x:?}");
                    let mut adj = CurveAdjoint::new(2);
                    let dt = c.backward_point(t, 1.0, 1.0, &mut adj);
                    c.finish(&mut adj);
                    assert!(dt.is_finite(), "b={b} t={t}");
                    assert!(adj.boundary.iter().all(|g| g.is_finite()), "b={b} t={t}: {adj:?}");
                }
            }
        }
        // switch at ~0 collapses to pure repression from the origin
        let c = curve(RegimeLayout::induction_repression(), &[1e-300], SwitchPolicy::Hard);
        let x = c.predict(3.0);
        assert!(x.u < 1e-200 && x.s < 1e-200, "{x:?}");
    }

    fn weighted_objective(c: &GeneCurve, times: &[f64], wu: &[f64], ws: &[f64]) -> f64 {
        times
            .iter()
            .zip(wu.iter().zip(ws))
            .map(|(&t, (&a, &b))| {
                let x = c.predict(t);
                a * x.u + b * x.s
            })
            .sum()
    }

    fn check_gradients(layout: RegimeLayout, switch: Vec<f64>, policy: SwitchPolicy) {
        let k = layout.len();
        let alphas: Vec<f64> = (0..k).map(|j| 1.5 + 0.7 * j as f64).collect();
        let (beta, gamma) = (0.9, 0.4);
        let times = [0.37, 1.31, 2.23, 3.71, 5.13, 7.9];
        let wu = [0.3, -1.2, 0.8, 0.5, -0.4, 1.1];
        let ws = [1.0, 0.2, -0.6, 0.9, 0.7, -0.3];

        let build = |a: &[f64], b: f64, g: f64, sw: &[f64]| {
            GeneCurve::new(&layout, a, b, g, sw, policy).unwrap()
        };
        let c = build(&alphas[..], beta, gamma, &switch[..]);
        let mut adj = CurveAdjoint::new(k);
        let mut dts = Vec::new();
        for ((&t, &a), &b) in times.iter().zip(&wu).zip(&ws) {
            dts.push(c.backward_point(t, a, b, &mut adj));
        }
        c.finish(&mut adj);

        let h = 1e-6;
        let tol = |x: f64| 1e-5 * (1.0 + x.abs());
        let f = |a: &[f64], b: f64, g: f64, sw: &[f64]| weighted_objective(&build(a, b, g, sw), &times, &wu, &ws);

        for j in 0..k {
            if layout.kinds()[j] != RegimeKind::Induction {
                assert_eq!(adj.alpha[j], 0.0);
                continue;
            }
            let (mut p, mut m) = (alphas.clone(), alphas.clone());
            p[j] += h;
            m[j] -= h;
            let fd = (f(&p[..], beta, gamma, &switch[..]) - f(&m[..], beta, gamma, &switch[..])) / (2.0 * h);
            assert!((fd - adj.alpha[j]).abs() < tol(fd), "alpha[{j}]: fd={fd} an={}", adj.alpha[j]);
        }
        let fd_b = (f(&alphas[..], beta + h, gamma, &switch[..]) - f(&alphas[..], beta - h, gamma, &switch[..])) / (2.0 * h);
        assert!((fd_b - adj.beta).abs() < tol(fd_b), "beta: fd={fd_b} an={}", adj.beta);
        let fd_g = (f(&alphas[..], beta, gamma + h, &switch[..]) - f(&alphas[..], beta, gamma - h, &switch[..])) / (2.0 * h);
        assert!((fd_g - adj.gamma).abs() < tol(fd_g), "gamma: fd={fd_g} an={}", adj.gamma);
        for j in 0..switch.len() {
            let (mut p, mut m) = (switch.clone(), switch.clone());
            p[j] += h;
            m[j] -= h;
            let fd = (f(&alphas[..], beta, gamma, &p[..]) - f(&alphas[..], beta, gamma, &m[..])) / (2.0 * h);
            let an = adj.boundary[j + 1];
            assert!((fd - an).abs() < tol(fd), "switch[{j}]: fd={fd} an={an}");
        }
        for (i, &t) in times.iter().enumerate() {
            let x = |tt: f64| {
                let y = c.predict(tt);
                wu[i] * y.u + ws[i] * y.s
            };
            let fd = (x(t + h) - x(t - h)) / (2.0 * h);
            assert!((fd - dts[i]).abs() < tol(fd), "t[{i}]: fd={fd} an={}", dts[i]);
        }
    }

    #[test]
    fn soft_gradients_match_finite_differences() {
        check_gradients(
            RegimeLayout::on_off(),
            vec![0.8, 4.4],
            SwitchPolicy::Soft { temperature: 0.5 },
        );
        check_gradients(
            RegimeLayout::induction_repression(),
            vec![3.0],
            SwitchPolicy::Soft { temperature: 0.2 },
        );
        check_gradients(RegimeLayout::induction(), vec![], SwitchPolicy::Soft { temperature: 0.2 });
    }

    #[test]
    fn hard_gradients_match_finite_differences() {
        check_gradients(RegimeLayout::induction_repression(), vec![3.0], SwitchPolicy::Hard);
        check_gradients(
            RegimeLayout::new(vec![
                RegimeKind::Induction,
                RegimeKind::Steady,
                RegimeKind::Repression,
                RegimeKind::Induction,
            ])
            .unwrap(),
            vec![1.0, 2.0, 4.5],
            SwitchPolicy::Hard,
        );
    }

    proptest! {
        #[test]
        fn prop_gates_lie_on_simplex(
            t in 0.0f64..20.0,
            gaps in prop::collection::vec(1e-3f64..5.0, 0..4),
            temperature in 1e-3f64..2.0,
        ) {
            let mut switch = Vec::new();
            let mut acc = 0.0;
            for g in &gaps {
                acc += g;
                switch.push(acc);
            }
            let mut kinds = vec![RegimeKind::Induction];
            kinds.extend(std::iter::repeat(RegimeKind::Repression).take(gaps.len()));
            let layout = RegimeLayout::new(kinds).unwrap();
            for policy in [SwitchPolicy::Hard, SwitchPolicy::Soft { temperature }] {
                let c = curve(layout.clone(), &switch, policy);
                prop_assert!(validate_simplex(&c.gates(t), 1e-12).is_ok());
            }
        }

        #[test]
        fn prop_soft_prediction_is_continuous_in_time(
            b in 0.1f64..8.0,
            t in 0.0f64..10.0,
        ) {
            let c = curve(RegimeLayout::induction_repression(), &[b], SwitchPolicy::Soft { temperature: 0.05 });
            let x0 = c.predict(t);
            let x1 = c.predict(t + 1e-9);
            // |d/dt| <= alpha / (temperature) scale; generous bound
            prop_assert!((x0.u - x1.u).abs() < 1e-6 && (x0.s - x1.s).abs() < 1e-6);
        }
    }
}
