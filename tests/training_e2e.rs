use velomix::kinetics::Rates;
use velomix::regime::{RegimeLayout, SwitchPolicy};
use velomix::restarts::fit_restarts;
use velomix::simulate::{simulate, SyntheticConfig, SyntheticData};
use velomix::train::Phase;
use velomix::{
    fit, ConvergenceStatus, ModelConfig, RegimeAssignment, Result, TrainConfig, Trainer,
};

fn switching_data(seed: u64) -> Result<SyntheticData> {
    let genes = [
        (
            Rates {
                alpha: 2.0,
                beta: 1.0,
                gamma: 0.5,
            },
            3.0,
        ),
        (
            Rates {
                alpha: 1.0,
                beta: 2.0,
                gamma: 0.8,
            },
            2.5,
        ),
    ];
    simulate(&SyntheticConfig::induction_repression(&genes, 80, 6.0, seed))
}

fn model() -> ModelConfig {
    ModelConfig {
        layout: RegimeLayout::induction_repression(),
        policy: SwitchPolicy::Soft { temperature: 0.2 },
        t_max: 6.0,
        hidden: (16, 8),
        ..ModelConfig::default()
    }
}

fn train(seed: u64) -> TrainConfig {
    TrainConfig {
        batch_size: 20,
        max_iterations: 200,
        encoder_pretrain_steps: 50,
        seed,
        ..TrainConfig::default()
    }
}

#[test]
fn same_seed_gives_identical_fits() -> Result<()> {
    let sim = switching_data(3)?;
    let a = fit(&sim.data, model(), train(9))?;
    let b = fit(&sim.data, model(), train(9))?;
    assert_eq!(a.kinetics, b.kinetics);
    assert_eq!(a.latent_time, b.latent_time);
    assert_eq!(a.final_elbo.to_bits(), b.final_elbo.to_bits());
    assert_eq!(a.history, b.history);

    let c = fit(&sim.data, model(), train(10))?;
    assert_ne!(a.latent_time, c.latent_time);
    Ok(())
}

#[test]
fn elbo_improves_over_training() -> Result<()> {
    let sim = switching_data(4)?;
    let cfg = TrainConfig {
        max_iterations: 400,
        ..train(2)
    };
    let mut trainer = Trainer::new(&sim.data, model(), cfg)?;
    trainer.run()?;
    let h = trainer.history();
    assert!(h.len() >= 10);
    let mean = |r: &[velomix::train::EpochRecord]| {
        r.iter().map(|e| e.train_elbo).sum::<f64>() / r.len() as f64
    };
    let early = mean(&h[..3]);
    let late = mean(&h[h.len() - 3..]);
    assert!(late > early, "early {early}, late {late}");
    Ok(())
}

#[test]
fn amortized_assignment_trains_and_reports_responsibilities() -> Result<()> {
    let sim = switching_data(5)?;
    let cfg = ModelConfig {
        assignment: RegimeAssignment::Amortized,
        ..model()
    };
    let res = fit(&sim.data, cfg, train(1))?;
    assert_eq!(res.responsibilities.dim(), (80, 2, 2));
    for r in res.responsibilities.outer_iter() {
        for g in r.outer_iter() {
            assert!((g.sum() - 1.0).abs() < 1e-9);
            assert!(g.iter().all(|&v| v >= 0.0));
        }
    }
    for k in &res.kinetics {
        assert_eq!(k.alpha[1], 0.0);
        assert!(k.switch_times[0] > 0.0);
    }
    Ok(())
}

#[test]
fn restarts_pick_the_best_successful_run() -> Result<()> {
    let sim = switching_data(6)?;
    let out = fit_restarts(&sim.data, &model(), &train(0), &[1, 2, 3]);
    assert_eq!(out.runs.len(), 3);
    assert_eq!(out.n_failed(), 0);
    let seeds: Vec<u64> = out.runs.iter().map(|(s, _)| *s).collect();
    assert_eq!(seeds, vec![1, 2, 3]);
    let best = out.best_result().map(|r| r.final_elbo);
    let Some(best) = best else {
        panic!("no best run");
    };
    for (_, r) in &out.runs {
        if let Ok(r) = r {
            assert!(r.final_elbo <= best);
        }
    }
    // Each restart equals a standalone fit with the same seed.
    let solo = fit(&sim.data, model(), train(2))?;
    let Ok(second) = &out.runs[1].1 else {
        panic!("run failed");
    };
    assert_eq!(second.kinetics, solo.kinetics);
    Ok(())
}

#[test]
fn stopped_run_finalizes_with_stopped_status() -> Result<()> {
    let sim = switching_data(7)?;
    let mut trainer = Trainer::new(&sim.data, model(), train(3))?;
    let handle = trainer.stop_handle();
    trainer.train_epoch()?;
    let steps = trainer.iteration();
    handle.stop();
    assert_eq!(trainer.run()?, ConvergenceStatus::Stopped);
    assert_eq!(trainer.phase(), Phase::Stopped);
    assert_eq!(trainer.iteration(), steps);
    let res = trainer.finalize()?;
    assert_eq!(res.status, ConvergenceStatus::Stopped);
    assert_eq!(res.iterations, steps);
    Ok(())
}

#[test]
fn stop_from_another_thread_is_honoured() -> Result<()> {
    let sim = switching_data(8)?;
    let cfg = TrainConfig {
        max_iterations: 1_000_000,
        ..train(4)
    };
    let mut trainer = Trainer::new(&sim.data, model(), cfg)?;
    let handle = trainer.stop_handle();
    let stopper = std::thread::spawn(move || {
        std::thread::sleep(std::time::Duration::from_millis(50));
        handle.stop();
    });
    let status = trainer.run()?;
    stopper.join().map_err(|_| velomix::Error::Domain("stopper thread panicked"))?;
    assert!(matches!(
        status,
        ConvergenceStatus::Stopped | ConvergenceStatus::Converged
    ));
    Ok(())
}
