//! Independent fits from different seeds, run in parallel.
//!
//! Each run owns its own [`Trainer`](crate::train::Trainer); only the input data is shared, and
//! only by reference. A failed run is reported as-is and never retried.

use rayon::prelude::*;
use tracing::info;

use crate::data::CountData;
use crate::model::ModelConfig;
use crate::train::{fit, FitResult, TrainConfig};
use crate::Result;

/// Outcome of [`fit_restarts`].
#[derive(Debug)]
pub struct Restarts {
    /// `(seed, result)` in the order the seeds were given.
    pub runs: Vec<(u64, Result<FitResult>)>,
    /// Index into `runs` of the successful run with the highest final ELBO.
    pub best: Option<usize>,
}

impl Restarts {
    pub fn best_result(&self) -> Option<&FitResult> {
        self.best.and_then(|i| self.runs[i].1.as_ref().ok())
    }

    pub fn n_failed(&self) -> usize {
        self.runs.iter().filter(|(_, r)| r.is_err()).count()
    }
}

/// Fit once per seed; `train_config.seed` is overridden by each entry of `seeds`.
pub fn fit_restarts(
    data: &CountData,
    model_config: &ModelConfig,
    train_config: &TrainConfig,
    seeds: &[u64],
) -> Restarts {
    let runs: Vec<(u64, Result<FitResult>)> = seeds
        .par_iter()
        .map(|&seed| {
            let cfg = TrainConfig {
                seed,
                ..train_config.clone()
            };
            (seed, fit(data, model_config.clone(), cfg))
        })
        .collect();

    let best = runs
        .iter()
        .enumerate()
        .filter_map(|(i, (_, r))| r.as_ref().ok().map(|f| (i, f.final_elbo)))
        .filter(|(_, elbo)| elbo.is_finite())
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(i, _)| i);

    info!(
        runs = runs.len(),
        failed = runs.iter().filter(|(_, r)| r.is_err()).count(),
        best_seed = best.map(|i| runs[i].0),
        "restarts finished"
    );
    Restarts { runs, best }
}
