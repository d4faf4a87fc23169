//! Scalar activations shared by the encoder and the regime gates.

/// Negative slope of the leaky ReLU used in the encoder.
pub const LEAKY_SLOPE: f64 = 0.01;

/// Logistic sigmoid, evaluated without overflow for large `|x|`.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// `ln(1 + e^x)`, evaluated without overflow.
#[inline]
pub fn softplus(x: f64) -> f64 {
    if x > 30.0 {
        x
    } else if x < -30.0 {
        x.exp()
    } else {
        x.exp().ln_1p()
    }
}

/// Inverse of [`softplus`] for `y > 0`.
#[inline]
pub fn softplus_inverse(y: f64) -> f64 {
    if y > 30.0 {
        y
    } else {
        y.exp_m1().ln()
    }
}

#[inline]
pub fn leaky_relu(x: f64) -> f64 {
    if x > 0.0 {
        x
    } else {
        LEAKY_SLOPE * x
    }
}

#[inline]
pub fn leaky_relu_grad(x: f64) -> f64 {
    if x > 0.0 {
        1.0
    } else {
        LEAKY_SLOPE
    }
}
