//! Validated cell x gene count matrices.

use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

use crate::{Error, Result};

/// Unspliced and spliced counts with cell and gene identifiers.
///
/// Rows are cells, columns are genes; both matrices share the ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct CountData {
    unspliced: Array2<f64>,
    spliced: Array2<f64>,
    cell_ids: Vec<String>,
    gene_ids: Vec<String>,
    /// Known capture time of every cell, if the experiment has one.
    capture_times: Option<Array1<f64>>,
}

impl CountData {
    pub fn new(
        unspliced: Array2<f64>,
        spliced: Array2<f64>,
        cell_ids: Vec<String>,
        gene_ids: Vec<String>,
    ) -> Result<Self> {
        if unspliced.dim() != spliced.dim() {
            return Err(Error::ShapeMismatch {
                unspliced: unspliced.dim(),
                spliced: spliced.dim(),
            });
        }
        let (n, g) = unspliced.dim();
        if n == 0 || g == 0 {
            return Err(Error::Domain("count data needs at least one cell and one gene"));
        }
        if cell_ids.len() != n {
            return Err(Error::Shape("one cell id per row is required"));
        }
        if gene_ids.len() != g {
            return Err(Error::Shape("one gene id per column is required"));
        }
        if unspliced
            .iter()
            .chain(spliced.iter())
            .any(|&x| !x.is_finite() || x < 0.0)
        {
            return Err(Error::Domain("counts must be finite and non-negative"));
        }
        Ok(Self {
            unspliced,
            spliced,
            cell_ids,
            gene_ids,
            capture_times: None,
        })
    }

    /// Attach one positive capture time per cell (e.g. sampling day).
    pub fn with_capture_times(mut self, times: Array1<f64>) -> Result<Self> {
        if times.len() != self.n_cells() {
            return Err(Error::Shape("one capture time per cell is required"));
        }
        if times.iter().any(|&t| !(t > 0.0) || !t.is_finite()) {
            return Err(Error::Domain("capture times must be positive and finite"));
        }
        self.capture_times = Some(times);
        Ok(self)
    }

    pub fn capture_times(&self) -> Option<ArrayView1<'_, f64>> {
        self.capture_times.as_ref().map(|t| t.view())
    }

    /// Like [`CountData::new`] with generated ids `cell_<i>` / `gene_<j>`.
    pub fn from_matrices(unspliced: Array2<f64>, spliced: Array2<f64>) -> Result<Self> {
        let (n, g) = unspliced.dim();
        let cell_ids = (0..n).map(|i| format!("cell_{i}")).collect();
        let gene_ids = (0..g).map(|j| format!("gene_{j}")).collect();
        Self::new(unspliced, spliced, cell_ids, gene_ids)
    }

    #[inline]
    pub fn unspliced(&self) -> ArrayView2<'_, f64> {
        self.unspliced.view()
    }

    #[inline]
    pub fn spliced(&self) -> ArrayView2<'_, f64> {
        self.spliced.view()
    }

    pub fn cell_ids(&self) -> &[String] {
        &self.cell_ids
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    #[inline]
    pub fn n_cells(&self) -> usize {
        self.unspliced.nrows()
    }

    #[inline]
    pub fn n_genes(&self) -> usize {
        self.unspliced.ncols()
    }

    /// Copy out the rows `cells` of both matrices.
    pub fn rows(&self, cells: &[usize]) -> (Array2<f64>, Array2<f64>) {
        (
            self.unspliced.select(Axis(0), cells),
            self.spliced.select(Axis(0), cells),
        )
    }

    /// Capture times of the rows `cells`, if present.
    pub fn capture_rows(&self, cells: &[usize]) -> Option<Array1<f64>> {
        self.capture_times.as_ref().map(|t| t.select(Axis(0), cells))
    }
}
