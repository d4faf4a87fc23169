//! Closed-form solution of the two-species splicing model.
//!
//! \[
//! \frac{du}{dt} = \alpha - \beta u, \qquad \frac{ds}{dt} = \beta u - \gamma s
//! \]
//!
//! Starting from \((u_0, s_0)\) and after an elapsed time \(\tau \ge 0\):
//!
//! \[
//! u(\tau) = u_0 e^{-\beta\tau} + \tfrac{\alpha}{\beta}(1 - e^{-\beta\tau}),\quad
//! s(\tau) = s_0 e^{-\gamma\tau} + \tfrac{\alpha}{\gamma}(1 - e^{-\gamma\tau})
//!         + (\beta u_0 - \alpha)\,\varphi(\beta,\gamma,\tau)
//! \]
//!
//! with the coupling term \(\varphi = (e^{-\gamma\tau} - e^{-\beta\tau})/(\beta-\gamma)\).
//! \(\varphi\) is symmetric in \((\beta,\gamma)\) and has the finite limit \(\tau e^{-\gamma\tau}\)
//! at \(\beta=\gamma\). Near that point it is evaluated by its Taylor series in
//! \(x = (\beta-\gamma)\tau\), never by dividing two vanishing differences.
//!
//! Every exponential here has a non-positive argument, so nothing overflows as \(\tau\to\infty\).

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Below this value of \(|\beta-\gamma|\,\tau\) the coupling term uses its series form.
pub const DEGENERATE_TOL: f64 = 1e-3;

/// Transcription (`alpha`), splicing (`beta`) and degradation (`gamma`) rates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rates {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl Rates {
    /// Validated constructor: `alpha >= 0`, `beta > 0`, `gamma > 0`, all finite.
    pub fn new(alpha: f64, beta: f64, gamma: f64) -> Result<Self> {
        if !(alpha >= 0.0) || !alpha.is_finite() {
            return Err(Error::Domain("alpha must be finite and >= 0"));
        }
        if !(beta > 0.0) || !beta.is_finite() || !(gamma > 0.0) || !gamma.is_finite() {
            return Err(Error::Domain("beta and gamma must be positive and finite"));
        }
        Ok(Self { alpha, beta, gamma })
    }

    /// Same splicing/degradation rates with a different transcription rate.
    #[inline]
    pub fn with_alpha(self, alpha: f64) -> Self {
        Self { alpha, ..self }
    }
}

/// Unspliced/spliced abundance pair.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct KineticState {
    pub u: f64,
    pub s: f64,
}

impl KineticState {
    #[inline]
    pub fn new(u: f64, s: f64) -> Self {
        Self { u, s }
    }

    #[inline]
    pub fn is_finite(&self) -> bool {
        self.u.is_finite() && self.s.is_finite()
    }
}

/// Partial derivatives of one output with respect to every input of [`solve`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Partials {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
    pub u0: f64,
    pub s0: f64,
    pub tau: f64,
}

/// Jacobian of `(u, s)` with respect to `(alpha, beta, gamma, u0, s0, tau)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KineticJacobian {
    pub du: Partials,
    pub ds: Partials,
}

impl KineticJacobian {
    /// Vector-Jacobian product: pulls the adjoint `(gu, gs)` of the output back to the inputs.
    #[inline]
    pub fn vjp(&self, gu: f64, gs: f64) -> Partials {
        let (a, b) = (&self.du, &self.ds);
        Partials {
            alpha: gu * a.alpha + gs * b.alpha,
            beta: gu * a.beta + gs * b.beta,
            gamma: gu * a.gamma + gs * b.gamma,
            u0: gu * a.u0 + gs * b.u0,
            s0: gu * a.s0 + gs * b.s0,
            tau: gu * a.tau + gs * b.tau,
        }
    }
}

/// Right-hand side of the splicing ODE.
#[inline]
pub fn derivative(rates: Rates, state: KineticState) -> KineticState {
    KineticState {
        u: rates.alpha - rates.beta * state.u,
        s: rates.beta * state.u - rates.gamma * state.s,
    }
}

/// Fixed point `(alpha/beta, alpha/gamma)`.
#[inline]
pub fn steady_state(rates: Rates) -> KineticState {
    KineticState {
        u: rates.alpha / rates.beta,
        s: rates.alpha / rates.gamma,
    }
}

/// Coupling term \(\varphi\) and \(\psi = -\partial\varphi/\partial\beta\).
#[derive(Debug, Clone, Copy)]
struct Coupling {
    phi: f64,
    psi: f64,
}

fn coupling_series(beta: f64, gamma: f64, tau: f64, eg: f64) -> Coupling {
    let x = (beta - gamma) * tau;
    let x2 = x * x;
    let x3 = x2 * x;
    let x4 = x2 * x2;
    // sum_n (-x)^n / (n+1)!  and  sum_n (-x)^n / (n! (n+2))
    let phi = eg * tau * (1.0 - x / 2.0 + x2 / 6.0 - x3 / 24.0 + x4 / 120.0);
    let psi = eg * tau * tau * (0.5 - x / 3.0 + x2 / 8.0 - x3 / 30.0 + x4 / 144.0);
    Coupling { phi, psi }
}

fn coupling_closed(beta: f64, gamma: f64, tau: f64, eb: f64, eg: f64) -> Coupling {
    let d = beta - gamma;
    let phi = (eg - eb) / d;
    let psi = (phi - tau * eb) / d;
    Coupling { phi, psi }
}

#[inline]
fn coupling(beta: f64, gamma: f64, tau: f64, eb: f64, eg: f64) -> Coupling {
    if ((beta - gamma) * tau).abs() < DEGENERATE_TOL {
        coupling_series(beta, gamma, tau, eg)
    } else {
        coupling_closed(beta, gamma, tau, eb, eg)
    }
}

// NaN must survive so that callers can report it.
#[inline]
fn elapsed(tau: f64) -> f64 {
    if tau < 0.0 {
        0.0
    } else {
        tau
    }
}

#[inline]
fn non_negative(x: f64) -> f64 {
    if x < 0.0 {
        0.0
    } else {
        x
    }
}

/// Evaluate the closed-form solution after elapsed time `tau`.
///
/// Negative `tau` is treated as zero; `tau = +inf` returns [`steady_state`].
/// Outputs are clamped at zero to absorb rounding (the exact solution is non-negative for
/// non-negative inputs).
pub fn solve(rates: Rates, init: KineticState, tau: f64) -> KineticState {
    let tau = elapsed(tau);
    if tau == f64::INFINITY {
        return steady_state(rates);
    }
    let Rates { alpha, beta, gamma } = rates;
    let eb = (-beta * tau).exp();
    let eg = (-gamma * tau).exp();
    let omb = -(-beta * tau).exp_m1();
    let omg = -(-gamma * tau).exp_m1();
    let c = coupling(beta, gamma, tau, eb, eg);

    let u = init.u * eb + alpha / beta * omb;
    let s = init.s * eg + alpha / gamma * omg + (beta * init.u - alpha) * c.phi;
    KineticState {
        u: non_negative(u),
        s: non_negative(s),
    }
}

/// Like [`solve`], also returning the full Jacobian.
pub fn solve_with_jacobian(
    rates: Rates,
    init: KineticState,
    tau: f64,
) -> (KineticState, KineticJacobian) {
    let tau = elapsed(tau);
    let Rates { alpha, beta, gamma } = rates;
    if tau == f64::INFINITY {
        let jac = KineticJacobian {
            du: Partials {
                alpha: 1.0 / beta,
                beta: -alpha / (beta * beta),
                ..Partials::default()
            },
            ds: Partials {
                alpha: 1.0 / gamma,
                gamma: -alpha / (gamma * gamma),
                ..Partials::default()
            },
        };
        return (steady_state(rates), jac);
    }

    let eb = (-beta * tau).exp();
    let eg = (-gamma * tau).exp();
    let omb = -(-beta * tau).exp_m1();
    let omg = -(-gamma * tau).exp_m1();
    let c = coupling(beta, gamma, tau, eb, eg);
    let drive = beta * init.u - alpha;

    let u = init.u * eb + alpha / beta * omb;
    let s = init.s * eg + alpha / gamma * omg + drive * c.phi;

    let du = Partials {
        alpha: omb / beta,
        beta: -tau * eb * init.u + alpha * (tau * eb / beta - omb / (beta * beta)),
        gamma: 0.0,
        u0: eb,
        s0: 0.0,
        tau: alpha - beta * u,
    };
    let ds = Partials {
        alpha: omg / gamma - c.phi,
        beta: init.u * c.phi - drive * c.psi,
        gamma: -tau * eg * init.s
            + alpha * (tau * eg / gamma - omg / (gamma * gamma))
            + drive * (c.psi - tau * c.phi),
        u0: beta * c.phi,
        s0: eg,
        tau: beta * u - gamma * s,
    };

    (
        KineticState {
            u: non_negative(u),
            s: non_negative(s),
        },
        KineticJacobian { du, ds },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rates(alpha: f64, beta: f64, gamma: f64) -> Rates {
        Rates { alpha, beta, gamma }
    }

    fn close(a: f64, b: f64, tol: f64) -> bool {
        (a - b).abs() <= tol * (1.0 + a.abs().max(b.abs()))
    }

    #[test]
    fn zero_elapsed_time_returns_initial_state() {
        let init = KineticState::new(0.7, 1.9);
        let out = solve(rates(2.0, 1.0, 0.5), init, 0.0);
        assert!(close(out.u, 0.7, 1e-14) && close(out.s, 1.9, 1e-14), "{out:?}");
    }

    #[test]
    fn infinite_time_saturates_to_steady_state() {
        let r = rates(2.0, 1.0, 0.5);
        let init = KineticState::new(5.0, 0.1);
        let far = solve(r, init, 1e4);
        let inf = solve(r, init, f64::INFINITY);
        let ss = steady_state(r);
        assert!(close(far.u, ss.u, 1e-12) && close(far.s, ss.s, 1e-12), "{far:?} vs {ss:?}");
        assert_eq!(inf, ss);
    }

    #[test]
    fn equal_rates_far_in_time_do_not_produce_nan() {
        let r = rates(1.0, 0.3, 0.3);
        for &tau in &[1e3, 1e200, f64::MAX] {
            let (out, jac) = solve_with_jacobian(r, KineticState::new(2.0, 1.0), tau);
            assert!(out.is_finite(), "tau={tau}: {out:?}");
            assert!(jac.ds.beta.is_finite() && jac.ds.gamma.is_finite(), "tau={tau}: {jac:?}");
        }
    }

    #[test]
    fn nan_elapsed_time_is_not_masked() {
        let out = solve(rates(1.0, 1.0, 0.5), KineticState::default(), f64::NAN);
        assert!(out.u.is_nan() || out.s.is_nan(), "{out:?}");
    }

    #[test]
    fn negative_elapsed_time_is_clamped() {
        let init = KineticState::new(0.2, 0.4);
        assert_eq!(solve(rates(3.0, 1.0, 0.5), init, -2.0), init);
    }

    #[test]
    fn series_and_closed_form_agree_around_threshold() {
        let (gamma, tau): (f64, f64) = (0.8, 3.0);
        for &x in &[2e-4, 5e-4, 9e-4, 1e-3, 2e-3, -5e-4, -2e-3] {
            let beta = gamma + x / tau;
            let eb = (-beta * tau).exp();
            let eg = (-gamma * tau).exp();
            let a = coupling_series(beta, gamma, tau, eg);
            let b = coupling_closed(beta, gamma, tau, eb, eg);
            assert!(close(a.phi, b.phi, 1e-9), "phi x={x}: {} vs {}", a.phi, b.phi);
            assert!(close(a.psi, b.psi, 1e-6), "psi x={x}: {} vs {}", a.psi, b.psi);
        }
    }

    #[test]
    fn degenerate_limit_matches_lhopital_form() {
        let (alpha, gamma): (f64, f64) = (2.0, 0.5);
        let init = KineticState::new(0.3, 0.1);
        for &tau in &[0.1, 1.0, 5.0, 20.0] {
            let eg = (-gamma * tau).exp();
            let expected = init.s * eg
                + alpha / gamma * (1.0 - eg)
                + (gamma * init.u - alpha) * tau * eg;
            let got = solve(rates(alpha, gamma, gamma), init, tau).s;
            assert!(close(got, expected, 1e-12), "tau={tau}: {got} vs {expected}");
        }
    }

    #[test]
    fn beta_to_gamma_continuity_from_both_sides() {
        let (alpha, gamma): (f64, f64) = (2.0, 0.5);
        let init = KineticState::new(0.3, 0.1);
        for &tau in &[0.1, 1.0, 5.0, 20.0] {
            let at = solve(rates(alpha, gamma, gamma), init, tau);
            for &delta in &[1e-2, 1e-4, 1e-6, 1e-9, 1e-12] {
                for sign in [-1.0, 1.0] {
                    let d = sign * delta;
                    let near = solve(rates(alpha, gamma + d, gamma), init, tau);
                    assert!(
                        (near.s - at.s).abs() <= 20.0 * delta,
                        "tau={tau} d={d}: s={} vs s*={}",
                        near.s,
                        at.s
                    );
                    assert!((near.u - at.u).abs() <= 20.0 * delta);
                }
            }
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            .. ProptestConfig::default()
        })]
        #[test]
        fn prop_solution_satisfies_the_ode(
            alpha in 0.0f64..5.0,
            beta in 0.05f64..5.0,
            gamma in 0.05f64..5.0,
            u0 in 0.0f64..5.0,
            s0 in 0.0f64..5.0,
            tau in 1e-2f64..10.0,
        ) {
            let r = rates(alpha, beta, gamma);
            let init = KineticState::new(u0, s0);
            let h = 1e-5;
            let plus = solve(r, init, tau + h);
            let minus = solve(r, init, tau - h);
            let fd_u = (plus.u - minus.u) / (2.0 * h);
            let fd_s = (plus.s - minus.s) / (2.0 * h);
            let rhs = derivative(r, solve(r, init, tau));
            prop_assert!(close(fd_u, rhs.u, 1e-5), "du/dt: fd={fd_u} rhs={}", rhs.u);
            prop_assert!(close(fd_s, rhs.s, 1e-5), "ds/dt: fd={fd_s} rhs={}", rhs.s);
        }

        #[test]
        fn prop_jacobian_matches_finite_differences(
            alpha in 0.0f64..5.0,
            beta in 0.05f64..5.0,
            gamma_offset in -1.0f64..1.0,
            u0 in 0.0f64..5.0,
            s0 in 0.0f64..5.0,
            tau in 1e-2f64..10.0,
        ) {
            // Half the cases land close to beta == gamma.
            let gamma = if gamma_offset.abs() < 0.5 {
                (beta + gamma_offset * 1e-4).max(0.05)
            } else {
                (beta + gamma_offset * 2.0).max(0.05)
            };
            let init = KineticState::new(u0, s0);
            let (_, jac) = solve_with_jacobian(rates(alpha, beta, gamma), init, tau);

            let h = 1e-6;
            let eval = |a: f64, b: f64, g: f64, u: f64, s: f64, t: f64| {
                solve(rates(a, b, g), KineticState::new(u, s), t)
            };
            let fd = |f: &dyn Fn(f64) -> KineticState, x: f64| {
                let p = f(x + h);
                let m = f(x - h);
                ((p.u - m.u) / (2.0 * h), (p.s - m.s) / (2.0 * h))
            };
            let checks: [(&str, (f64, f64), (f64, f64)); 6] = [
                ("alpha", fd(&|x| eval(x, beta, gamma, u0, s0, tau), alpha.max(h)), (jac.du.alpha, jac.ds.alpha)),
                ("beta", fd(&|x| eval(alpha, x, gamma, u0, s0, tau), beta), (jac.du.beta, jac.ds.beta)),
                ("gamma", fd(&|x| eval(alpha, beta, x, u0, s0, tau), gamma), (jac.du.gamma, jac.ds.gamma)),
                ("u0", fd(&|x| eval(alpha, beta, gamma, x, s0, tau), u0.max(h)), (jac.du.u0, jac.ds.u0)),
                ("s0", fd(&|x| eval(alpha, beta, gamma, u0, x, tau), s0.max(h)), (jac.du.s0, jac.ds.s0)),
                ("tau", fd(&|x| eval(alpha, beta, gamma, u0, s0, x), tau), (jac.du.tau, jac.ds.tau)),
            ];
            for (name, (fu, fs), (ju, js)) in checks {
                prop_assert!(close(fu, ju, 1e-5), "du/d{name}: fd={fu} analytic={ju}");
                prop_assert!(close(fs, js, 1e-5), "ds/d{name}: fd={fs} analytic={js}");
            }
        }

        #[test]
        fn prop_repression_from_steady_state_decays_monotonically(
            alpha_prev in 0.1f64..5.0,
            beta in 0.1f64..5.0,
            gamma in 0.1f64..5.0,
        ) {
            let r = rates(0.0, beta, gamma);
            let mut prev = steady_state(rates(alpha_prev, beta, gamma));
            for k in 1..=400 {
                let cur = solve(r, steady_state(rates(alpha_prev, beta, gamma)), 0.05 * k as f64);
                prop_assert!(cur.u >= 0.0 && cur.s >= 0.0, "negative at k={k}: {cur:?}");
                prop_assert!(cur.u <= prev.u + 1e-12, "u increased at k={k}");
                prop_assert!(cur.s <= prev.s + 1e-12, "s increased at k={k}");
                prev = cur;
            }
        }

        #[test]
        fn prop_repression_stays_non_negative_and_vanishes(
            beta in 0.1f64..5.0,
            gamma in 0.1f64..5.0,
            u0 in 0.0f64..10.0,
            s0 in 0.0f64..10.0,
        ) {
            let r = rates(0.0, beta, gamma);
            let init = KineticState::new(u0, s0);
            let mut prev_u = u0;
            for k in 1..=200 {
                let cur = solve(r, init, 0.1 * k as f64);
                prop_assert!(cur.u >= 0.0 && cur.s >= 0.0, "negative at k={k}: {cur:?}");
                prop_assert!(cur.u <= prev_u + 1e-12, "u increased at k={k}");
                prev_u = cur.u;
            }
            let late = solve(r, init, 200.0);
            prop_assert!(late.u <= 1e-4 * (u0 + s0) + 1e-300);
            prop_assert!(late.s <= 1e-4 * (u0 + s0) + 1e-300);
        }
    }
}
