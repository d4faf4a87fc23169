//! Burn-backed (opt-in) warm start of the encoder's location head.
//!
//! The regression of `mu` onto initial log-times runs with Burn autodiff and Adam, then the
//! trunk and `mu` head are exported back into the ndarray [`Encoder`]. The `sigma` and regime
//! heads are carried over from the starting encoder untouched, so Burn tensor types never reach
//! the default API surface. The trainer calls this when `TrainConfig::burn_warm_start` is set.

use burn_core as burn;

use burn::module::{Module, Param};
use burn::tensor::activation::leaky_relu;
use burn::tensor::{backend::Backend, Tensor, TensorData};
use burn_autodiff::Autodiff;
use burn_ndarray::NdArray;
use burn_nn::{Linear, LinearConfig};
use burn_optim::{AdamConfig, GradientsParams, LearningRate, Optimizer};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use tracing::debug;

use crate::activation::LEAKY_SLOPE;
use crate::encoder::Encoder;
use crate::{Error, Result};

/// Default burn backend for the warm start: ndarray + autodiff.
pub type BurnBackend = Autodiff<NdArray<f32>>;

#[derive(Module, Debug)]
struct BurnLocationNet<B: Backend> {
    l1: Linear<B>,
    l2: Linear<B>,
    mu: Linear<B>,
}

fn to_burn_2<B: Backend>(device: &B::Device, x: &Array2<f64>) -> Tensor<B, 2> {
    let (rows, cols) = x.dim();
    let flat: Vec<f32> = x.iter().map(|&v| v as f32).collect();
    Tensor::from_data(TensorData::new(flat, [rows, cols]), device)
}

fn to_burn_1<B: Backend>(device: &B::Device, x: &Array1<f64>) -> Tensor<B, 1> {
    let flat: Vec<f32> = x.iter().map(|&v| v as f32).collect();
    Tensor::from_data(TensorData::new(flat, [x.len()]), device)
}

/// Burn linear layer carrying ndarray weights `w` (out x in) and bias `b`.
fn linear_from<B: Backend>(device: &B::Device, w: &Array2<f64>, b: &Array1<f64>) -> Linear<B> {
    let (d_out, d_in) = w.dim();
    let mut layer = LinearConfig::new(d_in, d_out).with_bias(true).init(device);
    // Burn stores the weight as [d_in, d_out].
    layer.weight = Param::from_tensor(to_burn_2(device, &w.t().to_owned()));
    layer.bias = Some(Param::from_tensor(to_burn_1(device, b)));
    layer
}

fn export_linear<B: Backend>(layer: &Linear<B>) -> Result<(Array2<f64>, Array1<f64>)> {
    let w_data = layer.weight.val().into_data();
    let (d_in, d_out) = match w_data.shape.as_slice() {
        &[d_in, d_out] => (d_in, d_out),
        _ => return Err(Error::Shape("burn linear weight must be rank 2")),
    };
    let w_flat: Vec<f32> = w_data
        .to_vec()
        .map_err(|_| Error::Domain("burn weight is not f32 data"))?;
    let w = Array2::from_shape_fn((d_out, d_in), |(j, i)| f64::from(w_flat[i * d_out + j]));
    let b = match &layer.bias {
        Some(bias) => {
            let flat: Vec<f32> = bias
                .val()
                .into_data()
                .to_vec()
                .map_err(|_| Error::Domain("burn bias is not f32 data"))?;
            Array1::from_iter(flat.into_iter().map(f64::from))
        }
        None => Array1::zeros(d_out),
    };
    Ok((w, b))
}

impl<B: Backend> BurnLocationNet<B> {
    fn from_encoder(device: &B::Device, enc: &Encoder) -> Self {
        let w_mu = enc.w_mu.view().insert_axis(ndarray::Axis(0)).to_owned();
        Self {
            l1: linear_from(device, &enc.w1, &enc.b1),
            l2: linear_from(device, &enc.w2, &enc.b2),
            mu: linear_from(device, &w_mu, &Array1::from_elem(1, enc.b_mu)),
        }
    }

    fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let h1 = leaky_relu(self.l1.forward(x), LEAKY_SLOPE);
        let h2 = leaky_relu(self.l2.forward(h1), LEAKY_SLOPE);
        self.mu.forward(h2)
    }

    /// Copy trunk and location head into `into`.
    fn export_into(&self, into: &mut Encoder) -> Result<()> {
        let (w1, b1) = export_linear(&self.l1)?;
        let (w2, b2) = export_linear(&self.l2)?;
        let (w_mu, b_mu) = export_linear(&self.mu)?;
        if w1.dim() != into.w1.dim() || w2.dim() != into.w2.dim() || w_mu.nrows() != 1 {
            return Err(Error::Shape("exported burn layers do not match the encoder"));
        }
        into.w1 = w1;
        into.b1 = b1;
        into.w2 = w2;
        into.b2 = b2;
        into.w_mu = w_mu.row(0).to_owned();
        into.b_mu = b_mu[0];
        Ok(())
    }
}

/// Regress the location head of `encoder` onto `targets` (squared error, full batch) in Burn.
///
/// `x` are encoder features (see [`crate::encoder::encoder_features`]). Returns the updated
/// encoder; `encoder` itself is not modified.
pub fn warm_start_location_burn(
    device: &<BurnBackend as Backend>::Device,
    encoder: &Encoder,
    x: ArrayView2<f64>,
    targets: ArrayView1<f64>,
    steps: usize,
    lr: LearningRate,
) -> Result<Encoder> {
    if x.ncols() != encoder.input_dim() {
        return Err(Error::Shape("encoder input width must be 2 * genes"));
    }
    if x.nrows() != targets.len() || targets.is_empty() {
        return Err(Error::Shape("one target per cell is required"));
    }
    if !(lr > 0.0) {
        return Err(Error::Domain("lr must be positive"));
    }

    let mut net = BurnLocationNet::<BurnBackend>::from_encoder(device, encoder);
    let mut optim = AdamConfig::new().init::<BurnBackend, BurnLocationNet<BurnBackend>>();
    let xb = to_burn_2::<BurnBackend>(device, &x.to_owned());
    let yb = to_burn_2::<BurnBackend>(device, &targets.to_owned().insert_axis(ndarray::Axis(1)));

    for _ in 0..steps {
        let pred = net.forward(xb.clone());
        let loss = (pred - yb.clone()).powf_scalar(2.0).mean();
        let grads = GradientsParams::from_grads(loss.backward(), &net);
        net = optim.step(lr, net, grads);
    }

    let mut out = encoder.clone();
    net.export_into(&mut out)?;
    if !out.is_finite() {
        return Err(crate::InstabilityReport::new("encoder warm start").into_error());
    }
    debug!(steps, "burn warm start exported");
    Ok(out)
}
