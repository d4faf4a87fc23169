use ndarray::Array1;
use velomix::kinetics::Rates;
use velomix::latent::TimePrior;
use velomix::metrics::{relative_error, spearman};
use velomix::regime::RegimeLayout;
use velomix::simulate::{simulate, SyntheticConfig};
use velomix::train::ConvergenceCriteria;
use velomix::{fit, FitResult, ModelConfig, Result, TrainConfig};

const TRUTH: Rates = Rates {
    alpha: 2.0,
    beta: 1.0,
    gamma: 0.5,
};

fn fit_induction(truth: Rates, seed: u64) -> Result<(FitResult, Array1<f64>)> {
    let sim = simulate(&SyntheticConfig::induction(3, 200, truth, 5.0, seed))?;
    let model = ModelConfig {
        layout: RegimeLayout::induction(),
        prior: TimePrior::log_normal_with_median(2.5, 1.0)?,
        t_max: 5.0,
        hidden: (32, 16),
        fit_scaling: false,
        train_beta: true,
        ..ModelConfig::default()
    };
    let train = TrainConfig {
        lr_encoder: 5e-3,
        lr_kinetics: 1e-2,
        batch_size: 50,
        max_iterations: 3_000,
        encoder_pretrain_steps: 500,
        convergence: ConvergenceCriteria {
            window: 10,
            threshold: 1e-5,
            patience: 20,
        },
        seed: 7,
        ..TrainConfig::default()
    };
    let res = fit(&sim.data, model, train)?;
    Ok((res, sim.true_time))
}

fn assert_rates_recovered(res: &FitResult, truth: Rates) {
    for (g, k) in res.kinetics.iter().enumerate() {
        let alpha = k.induction_alpha();
        assert!(relative_error(alpha, truth.alpha) < 0.2, "gene {g}: alpha {alpha}");
        assert!(relative_error(k.beta, truth.beta) < 0.2, "gene {g}: beta {}", k.beta);
        assert!(relative_error(k.gamma, truth.gamma) < 0.2, "gene {g}: gamma {}", k.gamma);
    }
}

/// Three induction genes x 200 cells with times uniform on [0, 5]: the fit must recover the
/// rates within 20% and order the cells by true time.
#[test]
fn induction_kinetics_and_time_are_recovered() -> Result<()> {
    let (res, true_time) = fit_induction(TRUTH, 2024)?;
    assert!(res.final_elbo.is_finite());
    assert_rates_recovered(&res, TRUTH);

    let rho = spearman(res.latent_time.view(), true_time.view())?;
    assert!(rho > 0.9, "spearman {rho}");

    // Velocity is ds/dt on the kinetic scale: positive throughout induction.
    let positive = res.velocity.iter().filter(|&&v| v > 0.0).count();
    assert!(positive as f64 > 0.95 * res.velocity.len() as f64);
    Ok(())
}

/// A splicing rate away from the initial value 1 is learned, not inherited.
#[test]
fn splicing_rate_other_than_one_is_recovered() -> Result<()> {
    let truth = Rates {
        alpha: 4.0,
        beta: 2.0,
        gamma: 1.0,
    };
    let (res, _) = fit_induction(truth, 2024)?;
    assert_rates_recovered(&res, truth);
    Ok(())
}

#[test]
fn reconstruction_error_is_near_the_noise_floor() -> Result<()> {
    let sim = simulate(&SyntheticConfig::induction(3, 120, TRUTH, 5.0, 5))?;
    let model = ModelConfig {
        layout: RegimeLayout::induction(),
        t_max: 5.0,
        hidden: (16, 8),
        train_beta: false,
        ..ModelConfig::default()
    };
    let train = TrainConfig {
        batch_size: 40,
        max_iterations: 600,
        seed: 1,
        ..TrainConfig::default()
    };
    let res = fit(&sim.data, model, train)?;
    // observation noise has std 0.05
    assert!(res.reconstruction.mse < 0.05, "mse {}", res.reconstruction.mse);
    let std: Array1<f64> = res.latent_time_std;
    assert!(std.iter().all(|s| s.is_finite() && *s > 0.0));
    Ok(())
}
