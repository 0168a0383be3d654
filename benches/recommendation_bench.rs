use criterion::{black_box, criterion_group, criterion_main, Criterion};
use factorec::algorithms::trainer;
use factorec::services::ratings_store::RatingViews;
use factorec::*;

fn synthetic_observations(members: usize, items: usize) -> Vec<Observation> {
    let mut observations = Vec::new();
    for m in 0..members {
        for i in 0..items {
            // roughly a fifth of the pairs are engaged, two thirds of those rated
            if (m * 7 + i * 13) % 5 == 0 {
                let member = format!("s{}", m);
                let item = format!("c{}", i);
                if (m + i) % 3 == 0 {
                    observations.push(Observation::new(member, item));
                } else {
                    let rating = Rating::new(((m + 2 * i) % 10 + 1) as u8).unwrap();
                    observations.push(Observation::rated(member, item, rating));
                }
            }
        }
    }
    observations
}

fn benchmark_training(c: &mut Criterion) {
    let views = RatingViews::build(synthetic_observations(200, 60));
    let hyperparameters = Hyperparameters {
        seed: Some(1),
        ..Hyperparameters::default()
    };

    c.bench_function("sgd_train_40_epochs", |b| {
        b.iter(|| {
            black_box(
                trainer::fit(
                    views.engagement.items(),
                    views.engagement.members(),
                    &views.known_ratings,
                    &hyperparameters,
                )
                .unwrap(),
            );
        });
    });
}

fn benchmark_recommendation(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.storage.data_dir = dir.path().to_path_buf();
    config.training.seed = Some(1);
    let state = AppState::new(config);

    rt.block_on(async {
        for observation in synthetic_observations(200, 60) {
            state.catalog.record("bench", &observation).unwrap();
        }
        state.ratings_store.reload("bench").await.unwrap();
        let hyperparameters = state.config.training.hyperparameters();
        state.training_service.train("bench", &hyperparameters).await.unwrap();
    });

    c.bench_function("recommend_top_3", |b| {
        b.to_async(&rt).iter(|| async {
            black_box(
                state
                    .recommendation_service
                    .recommend("bench", "s1", 3)
                    .await
                    .unwrap(),
            );
        });
    });
}

fn benchmark_reload_views(c: &mut Criterion) {
    let observations = synthetic_observations(200, 60);

    c.bench_function("build_rating_views", |b| {
        b.iter(|| black_box(RatingViews::build(observations.clone())));
    });
}

criterion_group!(
    benches,
    benchmark_training,
    benchmark_recommendation,
    benchmark_reload_views
);
criterion_main!(benches);
