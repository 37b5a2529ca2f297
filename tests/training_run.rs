use std::fs;
use std::path::Path;
use std::sync::Barrier;
use std::thread;

use race_trainer::TrainError;
use race_trainer::artifacts::{
    ArtifactWriter, RunSummary, latest_run_id, load_run, manifest_file_name, model_file_name,
    read_manifest,
};
use race_trainer::config::{SeasonRoster, TrainingConfig};
use race_trainer::encoder::{EncodedFeatureMatrix, FeatureEncoder};
use race_trainer::estimator::{Algorithm, Task};
use race_trainer::pipeline;
use race_trainer::sample_gen::{SampleGenerator, load_records};
use race_trainer::selector::{SelectedModels, select};
use race_trainer::training::{Labels, TrainingOutcome, train_all};

fn quick_config(dir: &Path, run_id: &str) -> TrainingConfig {
    let mut cfg = TrainingConfig {
        sample_count: 400,
        seed: Some(9),
        models_dir: dir.to_path_buf(),
        run_id: Some(run_id.to_string()),
        ..TrainingConfig::default()
    };
    cfg.params.forest.n_trees = 10;
    cfg.params.forest.max_depth = 6;
    cfg.params.boosting.n_rounds = 20;
    cfg
}

struct Trained {
    seed: u64,
    sample_count: usize,
    encoded: EncodedFeatureMatrix,
    outcome: TrainingOutcome,
    selected: SelectedModels,
}

impl Trained {
    fn new(seed: u64) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let cfg = quick_config(dir.path(), "unused");
        let generator = SampleGenerator::new(SeasonRoster::season_2025()).unwrap();
        let records = generator.generate(300, Some(seed)).unwrap();
        let encoded = FeatureEncoder::default().fit(&records).unwrap();
        let outcome = train_all(&encoded.matrix, &Labels::from_records(&records), &cfg).unwrap();
        let selected = select(&outcome.candidates).unwrap();
        Self {
            seed,
            sample_count: records.len(),
            encoded,
            outcome,
            selected,
        }
    }

    fn persist(&self, dir: &Path, run_id: &str) -> Result<(), TrainError> {
        let summary = RunSummary {
            sample_count: self.sample_count,
            train_rows: self.outcome.train_rows,
            eval_rows: self.outcome.eval_rows,
            seed: Some(self.seed),
            candidates: &self.outcome.candidates,
            skipped: &self.outcome.skipped,
        };
        ArtifactWriter::new(dir)
            .persist(&self.selected, &self.encoded.state, run_id, &summary)
            .map(|_| ())
    }
}

#[test]
fn reference_run_meets_sanity_bounds() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainingConfig {
        sample_count: 3000,
        seed: Some(42),
        models_dir: dir.path().to_path_buf(),
        run_id: Some("20250101_000000".to_string()),
        ..TrainingConfig::default()
    };
    let outcome = pipeline::run(&cfg).unwrap();
    let manifest = &outcome.manifest;

    assert_eq!(manifest.sample_count, 3000);
    assert_eq!(manifest.train_rows + manifest.eval_rows, 3000);
    assert_eq!(manifest.eval_rows, 600);

    let position = manifest.selected(Task::Position).unwrap();
    assert!(position.metrics.mae().unwrap() < 3.0, "{}", position.metrics.summary());
    for task in [Task::Winner, Task::Podium] {
        let entry = manifest.selected(task).unwrap();
        assert!(entry.metrics.accuracy().unwrap() > 0.90, "{task}: {}", entry.metrics.summary());
        assert!(entry.metrics.f1().unwrap() > 0.0, "{task}: {}", entry.metrics.summary());
    }
    assert_eq!(manifest.candidates.len(), 9);
    assert!(manifest.skipped.is_empty());
}

#[test]
fn manifest_round_trip_preserves_feature_order() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = quick_config(dir.path(), "roundtrip");
    let outcome = pipeline::run(&cfg).unwrap();

    let manifest = read_manifest(dir.path(), "roundtrip").unwrap();
    assert_eq!(manifest, outcome.manifest);
    assert_eq!(manifest.feature_list, cfg.features.names());
    assert_eq!(manifest.feature_list.len(), 12);
    assert_eq!(manifest.feature_list[0], "qualifying_position");
    assert_eq!(manifest.feature_list[11], "circuit_encoded");

    for file in &manifest.files_saved {
        assert!(dir.path().join(file).exists(), "{file} missing");
    }
    for task in Task::ALL {
        let entry = manifest.selected(task).unwrap();
        assert!(manifest.files_saved.contains(&entry.file));
        assert!(entry.file.ends_with("_roundtrip.json"));
    }

    let run = load_run(dir.path(), "roundtrip").unwrap();
    assert_eq!(run.encoder.feature_names(), manifest.feature_list);
    let generator = SampleGenerator::new(SeasonRoster::season_2025()).unwrap();
    let race = generator.generate(20, Some(77)).unwrap();
    for record in &race {
        let pred = run.predict(record).unwrap();
        assert!(pred.position.is_finite());
        assert!((0.0..=1.0).contains(&pred.win_probability));
        assert!((0.0..=1.0).contains(&pred.podium_probability));
    }
    assert_eq!(latest_run_id(dir.path()).unwrap().as_deref(), Some("roundtrip"));
}

#[test]
fn persisting_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = quick_config(dir.path(), "same");
    let generator = SampleGenerator::new(SeasonRoster::season_2025()).unwrap();
    let records = generator.generate(300, Some(4)).unwrap();
    let encoded = FeatureEncoder::default().fit(&records).unwrap();
    let outcome = train_all(&encoded.matrix, &Labels::from_records(&records), &cfg).unwrap();
    let selected = select(&outcome.candidates).unwrap();
    let summary = RunSummary {
        sample_count: records.len(),
        train_rows: outcome.train_rows,
        eval_rows: outcome.eval_rows,
        seed: Some(4),
        candidates: &outcome.candidates,
        skipped: &outcome.skipped,
    };

    let writer = ArtifactWriter::new(dir.path());
    let first = writer.persist(&selected, &encoded.state, "same", &summary).unwrap();
    let bytes = fs::read(dir.path().join(manifest_file_name("same"))).unwrap();
    let second = writer.persist(&selected, &encoded.state, "same", &summary).unwrap();
    assert_eq!(first, second);
    assert_eq!(bytes, fs::read(dir.path().join(manifest_file_name("same"))).unwrap());

    // Another run's files are never overwritten.
    let changed = RunSummary {
        sample_count: records.len() + 1,
        ..summary
    };
    let err = writer
        .persist(&selected, &encoded.state, "same", &changed)
        .unwrap_err();
    assert!(matches!(err, TrainError::Persistence { .. }));
    assert_eq!(bytes, fs::read(dir.path().join(manifest_file_name("same"))).unwrap());
}

#[test]
fn single_record_population_is_a_generation_error() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = TrainingConfig {
        sample_count: 1,
        ..quick_config(dir.path(), "tiny")
    };
    let err = pipeline::run(&cfg).unwrap_err();
    assert!(matches!(err, TrainError::Generation(_)), "{err}");
    assert_eq!(latest_run_id(dir.path()).unwrap(), None);
}

#[test]
fn failed_estimator_is_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = quick_config(dir.path(), "skip");
    cfg.params.logistic.learning_rate = f64::NAN;
    let outcome = pipeline::run(&cfg).unwrap();

    assert_eq!(outcome.skipped.len(), 2);
    for skipped in &outcome.skipped {
        assert_eq!(skipped.algorithm, Algorithm::LogisticRegression);
        assert!(skipped.reason.contains("learning rate"));
    }
    assert_eq!(outcome.manifest.skipped, outcome.skipped);
    assert_eq!(outcome.manifest.candidates.len(), 7);
    for task in [Task::Winner, Task::Podium] {
        assert_ne!(
            outcome.selected.get(task).candidate.algorithm,
            Algorithm::LogisticRegression
        );
    }
}

#[test]
fn task_without_candidates_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = quick_config(dir.path(), "nopos");
    cfg.algorithms = vec![Algorithm::LogisticRegression, Algorithm::LinearRegression];
    cfg.params.linear.l2 = -1.0;
    let err = pipeline::run(&cfg).unwrap_err();
    assert!(
        matches!(err, TrainError::Selection { task: Task::Position }),
        "{err}"
    );
    assert_eq!(err.stage(), "select");
    assert_eq!(latest_run_id(dir.path()).unwrap(), None);
}

#[test]
fn historical_records_can_replace_generation() {
    let dir = tempfile::tempdir().unwrap();
    let generator = SampleGenerator::new(SeasonRoster::season_2025()).unwrap();
    let records = generator.generate(300, Some(31)).unwrap();
    let path = dir.path().join("history.json");
    fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

    let mut cfg = quick_config(&dir.path().join("models"), "history");
    cfg.records_path = Some(path);
    let outcome = pipeline::run(&cfg).unwrap();
    assert_eq!(outcome.manifest.sample_count, 300);
    assert_eq!(outcome.manifest.seed, None);
    assert_eq!(outcome.labels.races, 15);
}

#[test]
fn malformed_record_is_an_encoding_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    fs::write(&path, r#"[{"race_id": 0, "driver": "X"}]"#).unwrap();

    let mut cfg = quick_config(&dir.path().join("models"), "broken");
    cfg.records_path = Some(path);
    let err = pipeline::run(&cfg).unwrap_err();
    assert!(matches!(err, TrainError::Encoding(ref msg) if msg.contains("record 0")), "{err}");
}

#[test]
fn conflicting_model_file_leaves_no_manifest() {
    let dir = tempfile::tempdir().unwrap();
    let trained = Trained::new(4);
    fs::write(dir.path().join(model_file_name(Task::Winner, "clash")), "{}\n").unwrap();

    let err = trained.persist(dir.path(), "clash").unwrap_err();
    assert!(matches!(err, TrainError::Persistence { .. }), "{err}");
    assert!(!dir.path().join(manifest_file_name("clash")).exists());
    assert_eq!(latest_run_id(dir.path()).unwrap(), None);
}

#[test]
fn concurrent_runs_under_one_id_never_mix_files() {
    let first = Trained::new(4);
    let second = Trained::new(5);
    assert_ne!(
        first.encoded.state.fingerprint(),
        second.encoded.state.fingerprint()
    );

    for _ in 0..20 {
        let dir = tempfile::tempdir().unwrap();
        let barrier = Barrier::new(2);
        let (a, b) = thread::scope(|scope| {
            let a = scope.spawn(|| {
                barrier.wait();
                first.persist(dir.path(), "20250101_000000_000")
            });
            let b = scope.spawn(|| {
                barrier.wait();
                second.persist(dir.path(), "20250101_000000_000")
            });
            (a.join().unwrap(), b.join().unwrap())
        });
        assert!(!(a.is_ok() && b.is_ok()));

        let manifest = dir.path().join(manifest_file_name("20250101_000000_000"));
        assert_eq!(manifest.exists(), a.is_ok() || b.is_ok());
        if manifest.exists() {
            load_run(dir.path(), "20250101_000000_000").unwrap();
        }
        for entry in fs::read_dir(dir.path()).unwrap() {
            let name = entry.unwrap().file_name();
            assert!(!name.to_string_lossy().ends_with(".tmp"), "{name:?}");
        }
    }
}

#[test]
fn repeated_finishing_positions_are_an_encoding_error() {
    let dir = tempfile::tempdir().unwrap();
    let generator = SampleGenerator::new(SeasonRoster::season_2025()).unwrap();
    let mut records = generator.generate(20, Some(12)).unwrap();
    for record in &mut records {
        match record.finishing_position {
            4 => record.finishing_position = 3,
            5 => record.finishing_position = 2,
            _ => {}
        }
    }
    let race_id = records[0].race_id;
    let path = dir.path().join("dupes.json");
    fs::write(&path, serde_json::to_string(&records).unwrap()).unwrap();

    let err = load_records(&path).unwrap_err();
    assert!(
        matches!(err, TrainError::Encoding(ref msg) if msg.contains(&format!("race {race_id}"))),
        "{err}"
    );
}

#[test]
fn empty_records_file_is_a_generation_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.json");
    fs::write(&path, "[]").unwrap();
    let err = load_records(&path).unwrap_err();
    assert!(matches!(err, TrainError::Generation(_)), "{err}");

    let mut cfg = quick_config(&dir.path().join("models"), "empty");
    cfg.records_path = Some(path);
    let err = pipeline::run(&cfg).unwrap_err();
    assert_eq!(err.stage(), "generate");
}
