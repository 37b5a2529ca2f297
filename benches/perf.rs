use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use race_trainer::config::{ForestParams, SeasonRoster};
use race_trainer::encoder::{EncodedFeatureMatrix, FeatureEncoder};
use race_trainer::forest::{RandomForest, sqrt_features};
use race_trainer::sample_gen::{RaceEntryRecord, SampleGenerator};
use race_trainer::training::Labels;

fn population(n: usize) -> Vec<RaceEntryRecord> {
    SampleGenerator::new(SeasonRoster::season_2025())
        .expect("builtin roster")
        .generate(n, Some(42))
        .expect("generate")
}

fn encoded(records: &[RaceEntryRecord]) -> EncodedFeatureMatrix {
    FeatureEncoder::default().fit(records).expect("fit encoder")
}

fn bench_generate(c: &mut Criterion) {
    let generator = SampleGenerator::new(SeasonRoster::season_2025()).unwrap();
    c.bench_function("generate_3000", |b| {
        b.iter(|| {
            let records = generator.generate(black_box(3000), Some(42)).unwrap();
            black_box(records.len());
        })
    });
}

fn bench_encoder_fit(c: &mut Criterion) {
    let records = population(3000);
    c.bench_function("encoder_fit_3000", |b| {
        b.iter(|| {
            let encoded = FeatureEncoder::default().fit(black_box(&records)).unwrap();
            black_box(encoded.matrix.n_rows());
        })
    });
}

fn bench_encoder_transform(c: &mut Criterion) {
    let records = population(3000);
    let state = encoded(&records).state;
    c.bench_function("encoder_transform_3000", |b| {
        b.iter(|| {
            let matrix = state.transform(black_box(&records)).unwrap();
            black_box(matrix.n_rows());
        })
    });
}

fn bench_forest_fit(c: &mut Criterion) {
    let records = population(3000);
    let matrix = encoded(&records).matrix;
    let labels = Labels::from_records(&records);
    let params = ForestParams {
        n_trees: 20,
        ..ForestParams::default()
    };
    let max_features = sqrt_features(matrix.n_cols());
    c.bench_function("forest_fit_podium_20_trees", |b| {
        b.iter(|| {
            let forest =
                RandomForest::fit(black_box(&matrix.rows), &labels.podium, &params, max_features)
                    .unwrap();
            black_box(forest.trees.len());
        })
    });
}

criterion_group!(
    perf,
    bench_generate,
    bench_encoder_fit,
    bench_encoder_transform,
    bench_forest_fit
);
criterion_main!(perf);
