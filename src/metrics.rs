//! Evaluation helpers: correlations and reconstruction error.
//!
//! These are diagnostics, not training signals; none of them feeds a gradient.

use ndarray::{ArrayView1, ArrayView2, Zip};
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, RankTieBreaker};

use crate::data::CountData;
use crate::{Error, Result};

fn check_pair(a: &ArrayView1<f64>, b: &ArrayView1<f64>) -> Result<()> {
    if a.len() != b.len() {
        return Err(Error::Shape("correlation inputs must have equal length"));
    }
    if a.len() < 2 {
        return Err(Error::Domain("correlation needs at least two points"));
    }
    if a.iter().chain(b.iter()).any(|x| !x.is_finite()) {
        return Err(Error::Domain("correlation inputs must be finite"));
    }
    Ok(())
}

fn pearson_slices(a: &[f64], b: &[f64]) -> Result<f64> {
    let n = a.len() as f64;
    let ma = a.iter().sum::<f64>() / n;
    let mb = b.iter().sum::<f64>() / n;
    let (mut sab, mut saa, mut sbb) = (0.0, 0.0, 0.0);
    for (&x, &y) in a.iter().zip(b) {
        let (dx, dy) = (x - ma, y - mb);
        sab += dx * dy;
        saa += dx * dx;
        sbb += dy * dy;
    }
    if !(saa > 0.0) || !(sbb > 0.0) {
        return Err(Error::Domain("correlation is undefined for a constant input"));
    }
    Ok(sab / (saa.sqrt() * sbb.sqrt()))
}

/// Pearson correlation coefficient.
pub fn pearson(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Result<f64> {
    check_pair(&a, &b)?;
    pearson_slices(&a.to_vec(), &b.to_vec())
}

/// Spearman rank correlation (ties get their average rank).
pub fn spearman(a: ArrayView1<f64>, b: ArrayView1<f64>) -> Result<f64> {
    check_pair(&a, &b)?;
    let ra = Data::new(a.to_vec()).ranks(RankTieBreaker::Average);
    let rb = Data::new(b.to_vec()).ranks(RankTieBreaker::Average);
    pearson_slices(&ra, &rb)
}

/// `|estimate - truth| / |truth|`.
pub fn relative_error(estimate: f64, truth: f64) -> f64 {
    (estimate - truth).abs() / truth.abs()
}

/// Mean squared and mean absolute error over both modalities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReconstructionErrors {
    pub mse: f64,
    pub mae: f64,
}

pub fn reconstruction_errors(
    data: &CountData,
    unspliced_pred: ArrayView2<f64>,
    spliced_pred: ArrayView2<f64>,
) -> Result<ReconstructionErrors> {
    let all: Vec<usize> = (0..data.n_cells()).collect();
    reconstruction_errors_on(data, unspliced_pred, spliced_pred, &all)
}

/// [`reconstruction_errors`] restricted to the rows `cells` (e.g. one side of a train/validation
/// split). Predictions cover every cell of `data`.
pub fn reconstruction_errors_on(
    data: &CountData,
    unspliced_pred: ArrayView2<f64>,
    spliced_pred: ArrayView2<f64>,
    cells: &[usize],
) -> Result<ReconstructionErrors> {
    let dim = (data.n_cells(), data.n_genes());
    if unspliced_pred.dim() != dim || spliced_pred.dim() != dim {
        return Err(Error::Shape("predictions must match the data shape"));
    }
    if cells.is_empty() {
        return Err(Error::Domain("reconstruction error needs at least one cell"));
    }
    if cells.iter().any(|&c| c >= dim.0) {
        return Err(Error::Shape("cell index out of range"));
    }
    let mut se = 0.0;
    let mut ae = 0.0;
    let mut acc = |obs: ArrayView2<f64>, pred: ArrayView2<f64>| {
        for &c in cells {
            Zip::from(obs.row(c)).and(pred.row(c)).for_each(|&o, &p| {
                let r = o - p;
                se += r * r;
                ae += r.abs();
            });
        }
    };
    acc(data.unspliced(), unspliced_pred);
    acc(data.spliced(), spliced_pred);
    let n = 2.0 * (cells.len() * dim.1) as f64;
    Ok(ReconstructionErrors {
        mse: se / n,
        mae: ae / n,
    })
}
