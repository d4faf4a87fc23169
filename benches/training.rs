use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use ndarray::Array1;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};

use velomix::elbo::{evaluate_batch, ElboWeights, LatentDraw};
use velomix::kinetics::Rates;
use velomix::regime::RegimeLayout;
use velomix::simulate::{simulate, SyntheticConfig};
use velomix::{ModelConfig, RegimeAssignment, TrainConfig, Trainer};

fn bench_batch(c: &mut Criterion) {
    let mut group = c.benchmark_group("elbo_batch");
    group.sample_size(20);

    let genes: Vec<(Rates, f64)> = (0..20)
        .map(|g| {
            let rates = Rates {
                alpha: 1.0 + 0.1 * g as f64,
                beta: 1.0,
                gamma: 0.4 + 0.02 * g as f64,
            };
            (rates, 3.0)
        })
        .collect();
    let sim = simulate(&SyntheticConfig::induction_repression(&genes, 256, 8.0, 1))
        .unwrap_or_else(|e| panic!("simulate: {e}"));
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let eps: Array1<f64> = (0..256).map(|_| StandardNormal.sample(&mut rng)).collect();

    for assignment in [RegimeAssignment::Gated, RegimeAssignment::Amortized] {
        let model = ModelConfig {
            layout: RegimeLayout::induction_repression(),
            assignment,
            t_max: 8.0,
            ..ModelConfig::default()
        };
        let train = TrainConfig {
            encoder_pretrain_steps: 0,
            ..TrainConfig::default()
        };
        let trainer = Trainer::new(&sim.data, model, train).unwrap_or_else(|e| panic!("{e}"));
        let label = format!("{assignment:?}");
        group.bench_function(BenchmarkId::new("with_grads", &label), |b| {
            b.iter(|| {
                evaluate_batch(
                    trainer.model(),
                    sim.data.unspliced(),
                    sim.data.spliced(),
                    LatentDraw::Sample(eps.view()),
                    ElboWeights::default(),
                    true,
                )
                .map(|ev| ev.terms.elbo)
            })
        });
        group.bench_function(BenchmarkId::new("epoch", &label), |b| {
            b.iter_batched(
                || trainer.clone(),
                |mut t| t.train_epoch(),
                criterion::BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_batch);
criterion_main!(benches);
