//! Fixed-step integrators, used as a numerical reference for the closed-form kinetics.
//!
//! The model itself never integrates numerically: [`crate::kinetics::solve`] is exact.
//! These helpers exist so that the closed form (and regime chaining) can be checked against an
//! independent discretization of the same ODE. No adaptive stepping, no hidden tolerances.

use ndarray::{Array1, ArrayView1};

use crate::kinetics::{derivative, KineticState, Rates};
use crate::{Error, Result};

/// Fixed-step ODE method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OdeMethod {
    /// Explicit Euler (1st order).
    Euler,
    /// Heun / explicit trapezoid (2nd order).
    Heun,
    /// Classical Runge-Kutta (4th order).
    Rk4,
}

/// Integrate `dx/dt = f(x, t)` forward with `steps` fixed steps of size `dt`.
pub fn integrate_fixed(
    method: OdeMethod,
    x0: &Array1<f64>,
    t0: f64,
    dt: f64,
    steps: usize,
    mut f: impl FnMut(&ArrayView1<f64>, f64) -> Array1<f64>,
) -> Result<Array1<f64>> {
    if steps == 0 {
        return Err(Error::Domain("steps must be >= 1"));
    }
    if !dt.is_finite() {
        return Err(Error::Domain("dt must be finite"));
    }

    let mut x = x0.clone();
    let mut t = t0;
    for _ in 0..steps {
        match method {
            OdeMethod::Euler => {
                let v = f(&x.view(), t);
                x.scaled_add(dt, &v);
            }
            OdeMethod::Heun => {
                let v0 = f(&x.view(), t);
                let mut x_pred = x.clone();
                x_pred.scaled_add(dt, &v0);
                let v1 = f(&x_pred.view(), t + dt);
                x.scaled_add(0.5 * dt, &v0);
                x.scaled_add(0.5 * dt, &v1);
            }
            OdeMethod::Rk4 => {
                let k1 = f(&x.view(), t);
                let k2 = f(&(&x + &(&k1 * (0.5 * dt))).view(), t + 0.5 * dt);
                let k3 = f(&(&x + &(&k2 * (0.5 * dt))).view(), t + 0.5 * dt);
                let k4 = f(&(&x + &(&k3 * dt)).view(), t + dt);
                x.scaled_add(dt / 6.0, &k1);
                x.scaled_add(dt / 3.0, &k2);
                x.scaled_add(dt / 3.0, &k3);
                x.scaled_add(dt / 6.0, &k4);
            }
        }
        t += dt;
    }
    Ok(x)
}

/// Integrate the splicing ODE for elapsed time `tau` with `steps` fixed steps.
pub fn integrate_splicing(
    method: OdeMethod,
    rates: Rates,
    init: KineticState,
    tau: f64,
    steps: usize,
) -> Result<KineticState> {
    if !(tau >= 0.0) {
        return Err(Error::Domain("tau must be >= 0"));
    }
    let x0 = Array1::from_vec(vec![init.u, init.s]);
    let dt = tau / steps.max(1) as f64;
    let x = integrate_fixed(method, &x0, 0.0, dt, steps, |x, _t| {
        let d = derivative(rates, KineticState::new(x[0], x[1]));
        Array1::from_vec(vec![d.u, d.s])
    })?;
    Ok(KineticState::new(x[0], x[1]))
}
