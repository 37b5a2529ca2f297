use tracing::info;

use crate::artifacts::{ArtifactWriter, RunSummary, TrainingRunManifest, validate_run_id};
use crate::config::TrainingConfig;
use crate::encoder::FeatureEncoder;
use crate::error::TrainResult;
use crate::sample_gen::{LabelSummary, SampleGenerator, label_summary, load_records};
use crate::selector::{self, SelectedModels};
use crate::training::{self, Labels, SkippedCandidate};

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: String,
    pub seed: Option<u64>,
    pub labels: LabelSummary,
    pub manifest: TrainingRunManifest,
    pub selected: SelectedModels,
    pub skipped: Vec<SkippedCandidate>,
}

pub fn default_run_id() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S_%3f").to_string()
}

/// generate (or load) -> encode -> train -> evaluate -> select -> persist.
pub fn run(cfg: &TrainingConfig) -> TrainResult<RunOutcome> {
    let run_id = cfg.run_id.clone().unwrap_or_else(default_run_id);
    validate_run_id(&run_id)?;

    let (records, seed) = match &cfg.records_path {
        Some(path) => {
            info!(run_id = %run_id, path = %path.display(), "loading race records");
            (load_records(path)?, None)
        }
        None => {
            let seed = cfg.seed.unwrap_or_else(rand::random);
            let generator = SampleGenerator::new(cfg.roster()?)?;
            info!(run_id = %run_id, samples = cfg.sample_count, seed, "generating race records");
            (generator.generate(cfg.sample_count, Some(seed))?, Some(seed))
        }
    };
    let labels_summary = label_summary(&records);
    info!(
        records = labels_summary.records,
        races = labels_summary.races,
        winners = labels_summary.winners,
        podiums = labels_summary.podiums,
        "records ready"
    );

    let encoded = FeatureEncoder::new(cfg.features.clone()).fit(&records)?;
    let labels = Labels::from_records(&records);
    let outcome = training::train_all(&encoded.matrix, &labels, cfg)?;
    info!(
        candidates = outcome.candidates.len(),
        skipped = outcome.skipped.len(),
        "training finished"
    );

    let selected = selector::select(&outcome.candidates)?;
    let manifest = ArtifactWriter::new(&cfg.models_dir).persist(
        &selected,
        &encoded.state,
        &run_id,
        &RunSummary {
            sample_count: records.len(),
            train_rows: outcome.train_rows,
            eval_rows: outcome.eval_rows,
            seed,
            candidates: &outcome.candidates,
            skipped: &outcome.skipped,
        },
    )?;

    Ok(RunOutcome {
        run_id,
        seed,
        labels: labels_summary,
        manifest,
        selected,
        skipped: outcome.skipped,
    })
}
