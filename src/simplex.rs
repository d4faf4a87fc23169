//! Probability-simplex helpers for regime responsibilities.
//!
//! Public invariant: functions named `validate_*` never normalize. Anything that produces a
//! simplex vector from unnormalized input says so in its name (`softmax_*`).

use crate::{Error, Result};

/// Check whether `p` lies on the probability simplex (within `tol`).
pub fn validate_simplex(p: &[f64], tol: f64) -> Result<()> {
    if p.is_empty() {
        return Err(Error::Domain("simplex vector must be non-empty"));
    }
    if !(tol >= 0.0) || !tol.is_finite() {
        return Err(Error::Domain("tol must be finite and >= 0"));
    }
    if p.iter().any(|&x| !x.is_finite()) {
        return Err(Error::Domain("simplex vector contains non-finite values"));
    }
    if p.iter().any(|&x| x < -tol) {
        return Err(Error::Domain("simplex vector has negative entries"));
    }
    let s: f64 = p.iter().sum();
    if (s - 1.0).abs() > tol {
        return Err(Error::Domain("simplex vector does not sum to 1 (within tol)"));
    }
    Ok(())
}

/// Max-shifted softmax of `logits` written into `out` (same length).
pub fn softmax_into(logits: &[f64], out: &mut [f64]) {
    debug_assert_eq!(logits.len(), out.len());
    let m = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut z = 0.0;
    for (o, &l) in out.iter_mut().zip(logits) {
        *o = (l - m).exp();
        z += *o;
    }
    for o in out.iter_mut() {
        *o /= z;
    }
}

/// `KL(r || w) = sum_k r_k ln(r_k / w_k)` with `w` floored at `floor`.
///
/// Terms with `r_k = 0` contribute zero.
pub fn categorical_kl(r: &[f64], w: &[f64], floor: f64) -> f64 {
    r.iter()
        .zip(w)
        .filter(|&(&rk, _)| rk > 0.0)
        .map(|(&rk, &wk)| rk * (rk.ln() - wk.max(floor).ln()))
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn softmax_handles_large_logits() {
        let mut out = [0.0; 3];
        softmax_into(&[1000.0, 999.0, -1000.0], &mut out);
        validate_simplex(&out, 1e-12).unwrap();
        assert!(out[0] > out[1] && out[2] == 0.0);
    }

    #[test]
    fn kl_is_zero_for_identical_distributions() {
        let p = [0.2, 0.5, 0.3];
        assert!(categorical_kl(&p, &p, 1e-12).abs() < 1e-15);
    }

    #[test]
    fn validate_rejects_unnormalized() {
        assert!(validate_simplex(&[0.5, 0.6], 1e-9).is_err());
        assert!(validate_simplex(&[], 1e-9).is_err());
        assert!(validate_simplex(&[1.2, -0.2], 1e-9).is_err());
    }

    proptest! {
        #[test]
        fn prop_softmax_lies_on_simplex(logits in prop::collection::vec(-50.0f64..50.0, 1..8)) {
            let mut out = vec![0.0; logits.len()];
            softmax_into(&logits, &mut out);
            prop_assert!(validate_simplex(&out, 1e-12).is_ok());
        }

        #[test]
        fn prop_kl_is_non_negative(
            a in prop::collection::vec(0.01f64..1.0, 4),
            b in prop::collection::vec(0.01f64..1.0, 4),
        ) {
            let (za, zb) = (a.iter().sum::<f64>(), b.iter().sum::<f64>());
            let r: Vec<f64> = a.iter().map(|x| x / za).collect();
            let w: Vec<f64> = b.iter().map(|x| x / zb).collect();
            prop_assert!(categorical_kl(&r, &w, 1e-300) >= -1e-12);
        }
    }
}
