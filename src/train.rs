//! The training driver: an explicit state machine around one fit.
//!
//! ```text
//! Initialized --train_epoch--> Training --+--> Converged --+
//!                                         +--> Exhausted --+--finalize--> FitResult
//!                                         +--> Stopped ----+
//! ```
//!
//! All mutable state (model, optimizer moments, counters, RNG, best-so-far model) lives in the
//! [`Trainer`]; independent trainers never share anything but read-only input.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, Zip};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::data::CountData;
use crate::decoder::Decoder;
use crate::elbo::{evaluate_batch_with_capture, BatchEvaluation, ElboWeights, Gradients, LatentDraw};
use crate::encoder::{encoder_features, Encoder};
use crate::init::initialize;
use crate::latent::LogNormalPosterior;
use crate::metrics::{reconstruction_errors, reconstruction_errors_on, ReconstructionErrors};
use crate::model::{ModelConfig, RegimeAssignment, VelocityModel};
use crate::optim::{clip_factor, global_norm, Adam, AdamConfig, LrSchedule};
use crate::params::GeneKinetics;
use crate::simplex::validate_simplex;
use crate::snapshot::ModelSnapshot;
use crate::{Error, Result};

/// Responsibilities of every (cell, gene) must sum to one within this.
const SIMPLEX_TOL: f64 = 1e-9;

/// Plateau detection on the monitored ELBO.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceCriteria {
    /// Moving-average window, in epochs.
    pub window: usize,
    /// Relative improvement at or below which an epoch counts as a stall.
    pub threshold: f64,
    /// Consecutive stalls before the run is declared converged.
    pub patience: usize,
}

impl Default for ConvergenceCriteria {
    fn default() -> Self {
        Self {
            window: 5,
            threshold: 1e-4,
            patience: 10,
        }
    }
}

/// Optimization settings of one fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Adam step size of the encoder.
    pub lr_encoder: f64,
    /// Adam step size of the kinetic table.
    pub lr_kinetics: f64,
    /// L2 decay on encoder weights.
    pub weight_decay: f64,
    pub schedule: LrSchedule,
    pub batch_size: usize,
    /// Optimizer step budget.
    pub max_iterations: u64,
    /// Epochs during which only the encoder is updated.
    pub warmup_epochs: usize,
    /// Full-batch steps regressing the encoder onto the initial times.
    pub encoder_pretrain_steps: usize,
    /// Run those steps with Burn autodiff instead of the native gradients (`burn` feature).
    pub burn_warm_start: bool,
    pub convergence: ConvergenceCriteria,
    /// Global-norm clip applied per parameter group.
    pub grad_clip: Option<f64>,
    pub elbo_weights: ElboWeights,
    /// Share of cells held out for convergence monitoring.
    pub validation_fraction: f64,
    /// Steady-state percentile used by the method-of-moments start.
    pub init_percentile: usize,
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            lr_encoder: 1e-2,
            lr_kinetics: 1e-2,
            weight_decay: 0.0,
            schedule: LrSchedule::Constant,
            batch_size: 256,
            max_iterations: 5_000,
            warmup_epochs: 0,
            encoder_pretrain_steps: 200,
            burn_warm_start: false,
            convergence: ConvergenceCriteria::default(),
            grad_clip: Some(10.0),
            elbo_weights: ElboWeights::default(),
            validation_fraction: 0.0,
            init_percentile: 95,
            seed: 0,
        }
    }
}

impl TrainConfig {
    pub fn validate(&self) -> Result<()> {
        let positive = |v: f64| v > 0.0 && v.is_finite();
        if !positive(self.lr_encoder) || !positive(self.lr_kinetics) {
            return Err(Error::Domain("learning rates must be positive and finite"));
        }
        if !(self.weight_decay >= 0.0) || !self.weight_decay.is_finite() {
            return Err(Error::Domain("weight_decay must be non-negative"));
        }
        self.schedule.validate()?;
        if self.batch_size == 0 || self.max_iterations == 0 {
            return Err(Error::Domain("batch_size and max_iterations must be >= 1"));
        }
        let c = &self.convergence;
        if c.window == 0 || c.patience == 0 {
            return Err(Error::Domain("convergence window and patience must be >= 1"));
        }
        if !(c.threshold >= 0.0) || !c.threshold.is_finite() {
            return Err(Error::Domain("convergence threshold must be non-negative"));
        }
        if let Some(clip) = self.grad_clip {
            if !positive(clip) {
                return Err(Error::Domain("grad_clip must be positive"));
            }
        }
        let w = self.elbo_weights;
        if !(w.kl_time >= 0.0 && w.kl_regime >= 0.0) || !w.kl_time.is_finite() || !w.kl_regime.is_finite() {
            return Err(Error::Domain("KL weights must be non-negative and finite"));
        }
        if !(0.0..1.0).contains(&self.validation_fraction) {
            return Err(Error::Domain("validation_fraction must lie in [0, 1)"));
        }
        if !(1..=99).contains(&self.init_percentile) {
            return Err(Error::Domain("init_percentile must lie in 1..=99"));
        }
        if self.burn_warm_start && !cfg!(feature = "burn") {
            return Err(Error::Domain("burn_warm_start needs the `burn` feature"));
        }
        Ok(())
    }
}

/// Lifecycle state of a [`Trainer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Initialized,
    Training,
    Converged,
    /// Step budget spent before the plateau criterion fired.
    Exhausted,
    Stopped,
    Finalized,
}

impl Phase {
    /// Whether further epochs are refused.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Phase::Converged | Phase::Exhausted | Phase::Stopped | Phase::Finalized
        )
    }
}

/// How a fit ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceStatus {
    Converged,
    /// Budget exhausted; the result holds the best-so-far model.
    Unconverged,
    /// Cancelled through a [`StopHandle`].
    Stopped,
}

/// Cooperative cancellation flag, checked between batches.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// One line of the training history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    /// Optimizer steps taken so far.
    pub iteration: u64,
    /// Mean training-batch ELBO of the epoch.
    pub train_elbo: f64,
    /// Posterior-mean ELBO of the validation cells, or of the training cells without a
    /// validation split. Evaluated on the end-of-epoch model.
    pub monitored_elbo: f64,
    /// Moving average of `monitored_elbo` once `window` epochs are available.
    pub smoothed_elbo: Option<f64>,
    pub lr_scale: f64,
}

/// Moving-average plateau detector.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvergenceMonitor {
    criteria: ConvergenceCriteria,
    values: Vec<f64>,
    stalls: usize,
}

impl ConvergenceMonitor {
    pub fn new(criteria: ConvergenceCriteria) -> Self {
        Self {
            criteria,
            values: Vec::new(),
            stalls: 0,
        }
    }

    fn average(&self, end: usize) -> f64 {
        let w = self.criteria.window;
        self.values[end - w..end].iter().sum::<f64>() / w as f64
    }

    /// Record one epoch; returns the current moving average, if defined.
    pub fn push(&mut self, value: f64) -> Option<f64> {
        self.values.push(value);
        let n = self.values.len();
        let w = self.criteria.window;
        if n < w {
            return None;
        }
        let now = self.average(n);
        if n > w {
            let prev = self.average(n - 1);
            let rel = (now - prev) / prev.abs().max(f64::MIN_POSITIVE);
            if rel <= self.criteria.threshold {
                self.stalls += 1;
            } else {
                self.stalls = 0;
            }
        }
        Some(now)
    }

    pub fn stalls(&self) -> usize {
        self.stalls
    }

    pub fn converged(&self) -> bool {
        self.stalls >= self.criteria.patience
    }
}

/// Fit quality on one side of the train/validation split, at the posterior mean.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SplitMetrics {
    pub cells: usize,
    pub reconstruction: ReconstructionErrors,
    /// Mean per-cell log-likelihood.
    pub log_likelihood: f64,
    pub elbo: f64,
}

/// Cell indices with their rows copied out of the data.
#[derive(Debug, Clone)]
struct Split {
    cells: Vec<usize>,
    unspliced: Array2<f64>,
    spliced: Array2<f64>,
    capture: Option<Array1<f64>>,
}

impl Split {
    fn new(data: &CountData, cells: Vec<usize>) -> Self {
        let (unspliced, spliced) = data.rows(&cells);
        let capture = data.capture_rows(&cells);
        Self {
            cells,
            unspliced,
            spliced,
            capture,
        }
    }
}

/// Everything a fit produces.
#[derive(Debug, Clone)]
pub struct FitResult {
    pub cell_ids: Vec<String>,
    pub gene_ids: Vec<String>,
    /// Posterior mean of every cell's latent time.
    pub latent_time: Array1<f64>,
    pub latent_time_std: Array1<f64>,
    /// Predicted observed-scale unspliced counts.
    pub unspliced: Array2<f64>,
    pub spliced: Array2<f64>,
    /// `beta * u - gamma * s` at the latent time, on the kinetic scale.
    pub velocity: Array2<f64>,
    /// cells x genes x regimes.
    pub responsibilities: Array3<f64>,
    pub kinetics: Vec<GeneKinetics>,
    /// Full-data ELBO at the posterior mean.
    pub final_elbo: f64,
    pub history: Vec<EpochRecord>,
    pub status: ConvergenceStatus,
    pub iterations: u64,
    /// Errors over every cell.
    pub reconstruction: ReconstructionErrors,
    /// Held-out cells, sorted; empty without a validation split.
    pub validation_cells: Vec<usize>,
    pub train_metrics: SplitMetrics,
    pub validation_metrics: Option<SplitMetrics>,
    /// Genes that started from default kinetics.
    pub fallback_genes: Vec<usize>,
    pub snapshot: ModelSnapshot,
}

/// Explicit context of one training run.
#[derive(Debug, Clone)]
pub struct Trainer {
    model: VelocityModel,
    config: TrainConfig,
    data: CountData,
    train: Split,
    validation: Option<Split>,
    encoder_opt: Adam,
    kinetics_opt: Adam,
    rng: ChaCha8Rng,
    phase: Phase,
    epoch: usize,
    iteration: u64,
    monitor: ConvergenceMonitor,
    history: Vec<EpochRecord>,
    best: Option<(f64, VelocityModel)>,
    stop: StopHandle,
    fallback_genes: Vec<usize>,
}

impl Trainer {
    /// Validate, split, initialize kinetics and warm-start the encoder.
    pub fn new(data: &CountData, model_config: ModelConfig, config: TrainConfig) -> Result<Self> {
        model_config.validate()?;
        config.validate()?;
        if model_config.capture_sigma.is_some() && data.capture_times().is_none() {
            return Err(Error::Domain("capture-time prior needs capture times on the data"));
        }
        let n = data.n_cells();
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut rng);
        let n_val = (config.validation_fraction * n as f64).floor() as usize;
        if n_val >= n {
            return Err(Error::Domain("validation split leaves no training cells"));
        }
        let mut val_cells = order[..n_val].to_vec();
        let mut train_cells = order[n_val..].to_vec();
        val_cells.sort_unstable();
        train_cells.sort_unstable();

        let train = Split::new(data, train_cells);
        let (u, s) = (train.unspliced.view(), train.spliced.view());
        let init = initialize(u, s, &model_config, config.init_percentile)?;
        let mut encoder = Encoder::new(
            data.n_genes(),
            model_config.hidden,
            model_config.regime_logits(),
            model_config.prior.log_location(),
            rng.random(),
        )?;
        let x = encoder_features(u, s, init.genes.scaling.view())?;
        let floor = 0.01 * model_config.t_max;
        let targets = init.t_init.mapv(|t| t.max(floor).ln());
        pretrain_location(&mut encoder, x.view(), targets.view(), &config)?;

        let model = VelocityModel::new(model_config, encoder, init.genes)?;
        let encoder_opt = Adam::new(
            AdamConfig::default()
                .with_lr(config.lr_encoder)
                .with_weight_decay(config.weight_decay),
            model.encoder.n_params(),
        );
        let kinetics_opt = Adam::new(
            AdamConfig::default().with_lr(config.lr_kinetics),
            model.genes.n_trainable(),
        );
        let validation = (!val_cells.is_empty()).then(|| Split::new(data, val_cells));

        info!(
            cells = n,
            genes = data.n_genes(),
            validation_cells = validation.as_ref().map_or(0, |v| v.cells.len()),
            fallback_genes = init.fallback_genes.len(),
            "trainer initialized"
        );
        Ok(Self {
            model,
            monitor: ConvergenceMonitor::new(config.convergence),
            config,
            data: data.clone(),
            train,
            validation,
            encoder_opt,
            kinetics_opt,
            rng,
            phase: Phase::Initialized,
            epoch: 0,
            iteration: 0,
            history: Vec::new(),
            best: None,
            stop: StopHandle::default(),
            fallback_genes: init.fallback_genes,
        })
    }

    pub fn model(&self) -> &VelocityModel {
        &self.model
    }

    pub fn config(&self) -> &TrainConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn history(&self) -> &[EpochRecord] {
        &self.history
    }

    /// A handle that stops this run before its next batch.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn status(&self) -> ConvergenceStatus {
        match self.phase {
            Phase::Converged => ConvergenceStatus::Converged,
            Phase::Stopped => ConvergenceStatus::Stopped,
            _ => ConvergenceStatus::Unconverged,
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            info!(from = ?self.phase, to = ?phase, epoch = self.epoch, iteration = self.iteration, "phase transition");
            self.phase = phase;
        }
    }

    /// Attach run position, global cell index and a snapshot to an instability error.
    fn diagnose(&self, err: Error, batch: Option<usize>, cells: &[usize]) -> Error {
        match err {
            Error::NumericalInstability(mut report) => {
                report.iteration = Some(self.iteration);
                report.epoch = Some(self.epoch);
                report.batch = batch;
                report.cell = report.cell.and_then(|c| cells.get(c).copied());
                report.snapshot = ModelSnapshot::capture(&self.model, &self.data).ok();
                warn!(%report, "training aborted");
                Error::NumericalInstability(report)
            }
            other => other,
        }
    }

    /// One pass over the shuffled training cells. Returns the phase afterwards.
    ///
    /// Terminal phases are returned unchanged without doing any work.
    pub fn train_epoch(&mut self) -> Result<Phase> {
        if self.phase.is_terminal() {
            return Ok(self.phase);
        }
        self.set_phase(Phase::Training);

        let mut order = self.train.cells.clone();
        order.shuffle(&mut self.rng);
        let lr_scale = self.config.schedule.factor(self.epoch);
        let warmup = self.epoch < self.config.warmup_epochs;
        let weights = self.config.elbo_weights;

        let (mut elbo_sum, mut cells_seen) = (0.0, 0usize);
        for (batch, cells) in order.chunks(self.config.batch_size).enumerate() {
            if self.stop.is_stopped() {
                self.set_phase(Phase::Stopped);
                return Ok(self.phase);
            }
            if self.iteration >= self.config.max_iterations {
                break;
            }
            let (u, s) = self.data.rows(cells);
            let capture = self.data.capture_rows(cells);
            let eps: Array1<f64> = (0..cells.len())
                .map(|_| self.rng.sample::<f64, _>(StandardNormal))
                .collect();
            let ev = evaluate_batch_with_capture(
                &self.model,
                u.view(),
                s.view(),
                capture.as_ref().map(|c| c.view()),
                LatentDraw::Sample(eps.view()),
                weights,
                true,
            )
            .map_err(|e| self.diagnose(e, Some(batch), cells))?;
            let Some(grads) = &ev.grads else {
                return Err(Error::Domain("batch evaluation returned no gradients"));
            };
            self.apply_update(grads, lr_scale, warmup)
                .map_err(|e| self.diagnose(e, Some(batch), cells))?;
            self.iteration += 1;
            elbo_sum += ev.terms.elbo * cells.len() as f64;
            cells_seen += cells.len();
        }

        if cells_seen > 0 {
            self.close_epoch(elbo_sum / cells_seen as f64, lr_scale)?;
        }
        if self.phase == Phase::Training && self.iteration >= self.config.max_iterations {
            warn!(
                iterations = self.iteration,
                stalls = self.monitor.stalls(),
                "iteration budget exhausted before convergence; restoring best model"
            );
            if let Some((_, best)) = self.best.take() {
                self.model = best;
            }
            self.set_phase(Phase::Exhausted);
        }
        Ok(self.phase)
    }

    /// One Adam step of both groups on a copy of the model and optimizer state.
    ///
    /// Nothing is committed unless every updated parameter is finite.
    fn apply_update(&mut self, grads: &Gradients, lr_scale: f64, warmup: bool) -> Result<()> {
        let mut next = self.model.clone();
        let mut encoder_opt = self.encoder_opt.clone();
        let mut kinetics_opt = self.kinetics_opt.clone();
        let enc_scale = clip_factor(grads.encoder_norm(), self.config.grad_clip);
        encoder_opt.step(
            next.encoder.params_mut(),
            grads.encoder.params(),
            enc_scale,
            lr_scale,
        );
        if !warmup {
            let kin_scale = clip_factor(grads.genes_norm(), self.config.grad_clip);
            kinetics_opt.step(
                next.genes.trainable_mut(),
                grads.genes.trainable(),
                kin_scale,
                lr_scale,
            );
            next.genes.clamp_log_params();
        }
        if !next.encoder.is_finite() {
            return Err(crate::InstabilityReport::new("encoder weights").into_error());
        }
        if let Some(g) = next.genes.first_non_finite_gene() {
            return Err(crate::InstabilityReport::new("kinetic parameters").at_gene(g).into_error());
        }
        self.model = next;
        self.encoder_opt = encoder_opt;
        self.kinetics_opt = kinetics_opt;
        Ok(())
    }

    /// Posterior-mean evaluation of a whole split.
    fn evaluate_split(&self, split: &Split) -> Result<BatchEvaluation> {
        evaluate_batch_with_capture(
            &self.model,
            split.unspliced.view(),
            split.spliced.view(),
            split.capture.as_ref().map(|c| c.view()),
            LatentDraw::PosteriorMean,
            self.config.elbo_weights,
            false,
        )
        .map_err(|e| self.diagnose(e, None, &split.cells))
    }

    fn split_metrics(
        &self,
        split: &Split,
        pred_u: ArrayView2<f64>,
        pred_s: ArrayView2<f64>,
    ) -> Result<SplitMetrics> {
        let ev = self.evaluate_split(split)?;
        Ok(SplitMetrics {
            cells: split.cells.len(),
            reconstruction: reconstruction_errors_on(&self.data, pred_u, pred_s, &split.cells)?,
            log_likelihood: ev.terms.log_likelihood,
            elbo: ev.terms.elbo,
        })
    }

    fn close_epoch(&mut self, train_elbo: f64, lr_scale: f64) -> Result<()> {
        let monitored = self.validation.as_ref().unwrap_or(&self.train);
        let monitored_elbo = self.evaluate_split(monitored)?.terms.elbo;
        let smoothed_elbo = self.monitor.push(monitored_elbo);
        self.epoch += 1;
        debug!(
            epoch = self.epoch,
            iteration = self.iteration,
            train_elbo,
            monitored_elbo,
            smoothed_elbo,
            lr_encoder = self.config.lr_encoder * lr_scale,
            lr_kinetics = self.config.lr_kinetics * lr_scale,
            "epoch finished"
        );
        self.history.push(EpochRecord {
            epoch: self.epoch,
            iteration: self.iteration,
            train_elbo,
            monitored_elbo,
            smoothed_elbo,
            lr_scale,
        });
        if self.best.as_ref().map_or(true, |(b, _)| monitored_elbo > *b) {
            self.best = Some((monitored_elbo, self.model.clone()));
        }
        if self.monitor.converged() {
            self.set_phase(Phase::Converged);
        }
        Ok(())
    }

    /// Train until converged, exhausted or stopped.
    pub fn run(&mut self) -> Result<ConvergenceStatus> {
        while !self.train_epoch()?.is_terminal() {}
        Ok(self.status())
    }

    /// Freeze the model and compute point estimates for every cell.
    pub fn finalize(mut self) -> Result<FitResult> {
        let status = self.status();
        self.set_phase(Phase::Finalized);
        let data = &self.data;
        let ev = evaluate_batch_with_capture(
            &self.model,
            data.unspliced(),
            data.spliced(),
            data.capture_times(),
            LatentDraw::PosteriorMean,
            self.config.elbo_weights,
            false,
        )
        .map_err(|e| self.diagnose(e, None, &(0..data.n_cells()).collect::<Vec<_>>()))?;

        let decoder = Decoder::new(&self.model.genes, self.model.config.policy, self.model.config.noise)?;
        let responsibilities = match (self.model.config.assignment, ev.responsibilities) {
            (RegimeAssignment::Amortized, Some(r)) => r,
            _ => decoder.gates_batch(ev.times.view()),
        };
        for lane in responsibilities.lanes(Axis(2)) {
            match lane.as_slice() {
                Some(p) => validate_simplex(p, SIMPLEX_TOL)?,
                None => validate_simplex(&lane.to_vec(), SIMPLEX_TOL)?,
            }
        }
        let pred = decoder.predict_batch(ev.times.view(), Some(responsibilities.view()))?;
        let latent_time_std = Zip::from(&ev.mu)
            .and(&ev.sigma)
            .map_collect(|&mu, &sigma| LogNormalPosterior { mu, sigma }.std());
        let reconstruction = reconstruction_errors(data, pred.unspliced.view(), pred.spliced.view())?;
        let train_metrics = self.split_metrics(&self.train, pred.unspliced.view(), pred.spliced.view())?;
        let validation_metrics = match &self.validation {
            Some(v) => Some(self.split_metrics(v, pred.unspliced.view(), pred.spliced.view())?),
            None => None,
        };
        let validation_cells = self.validation.as_ref().map_or_else(Vec::new, |v| v.cells.clone());
        let kinetics = (0..self.model.n_genes())
            .map(|g| self.model.genes.kinetics(g))
            .collect();
        let snapshot = ModelSnapshot::capture(&self.model, data)?;
        Ok(FitResult {
            cell_ids: data.cell_ids().to_vec(),
            gene_ids: data.gene_ids().to_vec(),
            latent_time: ev.times,
            latent_time_std,
            unspliced: pred.unspliced,
            spliced: pred.spliced,
            velocity: pred.velocity,
            responsibilities,
            kinetics,
            final_elbo: ev.terms.elbo,
            history: self.history,
            status,
            iterations: self.iteration,
            reconstruction,
            validation_cells,
            train_metrics,
            validation_metrics,
            fallback_genes: self.fallback_genes,
            snapshot,
        })
    }
}

/// Regress the `mu` head onto `targets` (squared error, full batch).
fn pretrain_location(
    encoder: &mut Encoder,
    x: ArrayView2<f64>,
    targets: ArrayView1<f64>,
    config: &TrainConfig,
) -> Result<()> {
    if config.encoder_pretrain_steps == 0 {
        return Ok(());
    }
    if config.burn_warm_start {
        return burn_pretrain(encoder, x, targets, config);
    }
    let n = targets.len() as f64;
    let mut adam = Adam::new(AdamConfig::default().with_lr(config.lr_encoder), encoder.n_params());
    let zeros = Array1::<f64>::zeros(targets.len());
    for _ in 0..config.encoder_pretrain_steps {
        let pass = encoder.forward(x)?;
        let d_mu = (&pass.mu - &targets) / n;
        let grads = encoder.backward(&pass, d_mu.view(), zeros.view(), None);
        let scale = clip_factor(global_norm(grads.params()), config.grad_clip);
        adam.step(encoder.params_mut(), grads.params(), scale, 1.0);
    }
    if !encoder.is_finite() {
        return Err(crate::InstabilityReport::new("encoder warm start").into_error());
    }
    let pass = encoder.forward(x)?;
    let rmse = ((&pass.mu - &targets).mapv(|d| d * d).sum() / n).sqrt();
    debug!(steps = config.encoder_pretrain_steps, rmse, "encoder warm start finished");
    Ok(())
}

#[cfg(feature = "burn")]
fn burn_pretrain(
    encoder: &mut Encoder,
    x: ArrayView2<f64>,
    targets: ArrayView1<f64>,
    config: &TrainConfig,
) -> Result<()> {
    *encoder = crate::burn_encoder::warm_start_location_burn(
        &Default::default(),
        encoder,
        x,
        targets,
        config.encoder_pretrain_steps,
        config.lr_encoder,
    )?;
    Ok(())
}

#[cfg(not(feature = "burn"))]
fn burn_pretrain(
    _encoder: &mut Encoder,
    _x: ArrayView2<f64>,
    _targets: ArrayView1<f64>,
    _config: &TrainConfig,
) -> Result<()> {
    Err(Error::Domain("burn_warm_start needs the `burn` feature"))
}

/// Initialize, train and finalize in one call.
pub fn fit(data: &CountData, model_config: ModelConfig, config: TrainConfig) -> Result<FitResult> {
    let mut trainer = Trainer::new(data, model_config, config)?;
    trainer.run()?;
    trainer.finalize()
}
