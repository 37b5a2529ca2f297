use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::TrainingConfig;
use crate::encoder::FeatureMatrix;
use crate::error::{TrainError, TrainResult};
use crate::estimator::{self, Algorithm, FittedModel, Task};
use crate::metrics::{self, EvalSplit, MetricsBundle};
use crate::sample_gen::RaceEntryRecord;

/// Per-task targets, row-aligned with the feature matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Labels {
    pub position: Vec<f64>,
    pub winner: Vec<f64>,
    pub podium: Vec<f64>,
}

impl Labels {
    pub fn from_records(records: &[RaceEntryRecord]) -> Self {
        let flag = |b: bool| if b { 1.0 } else { 0.0 };
        Self {
            position: records.iter().map(|r| r.finishing_position as f64).collect(),
            winner: records.iter().map(|r| flag(r.is_winner())).collect(),
            podium: records.iter().map(|r| flag(r.is_podium())).collect(),
        }
    }

    pub fn for_task(&self, task: Task) -> &[f64] {
        match task {
            Task::Position => &self.position,
            Task::Winner => &self.winner,
            Task::Podium => &self.podium,
        }
    }

    pub fn len(&self) -> usize {
        self.position.len()
    }

    pub fn is_empty(&self) -> bool {
        self.position.is_empty()
    }

    fn select(&self, rows: &[usize]) -> Labels {
        let pick = |v: &[f64]| rows.iter().map(|&i| v[i]).collect();
        Labels {
            position: pick(&self.position),
            winner: pick(&self.winner),
            podium: pick(&self.podium),
        }
    }
}

/// Row indices of the training and held-out partitions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainTestSplit {
    pub train: Vec<usize>,
    pub eval: Vec<usize>,
}

impl TrainTestSplit {
    pub fn new(n: usize, eval_fraction: f64, seed: u64) -> TrainResult<Self> {
        if !(eval_fraction > 0.0 && eval_fraction < 1.0) {
            return Err(TrainError::Generation(format!(
                "eval fraction must be in (0, 1), got {eval_fraction}"
            )));
        }
        if n < 2 {
            return Err(TrainError::Generation(format!(
                "need at least 2 rows to hold out an evaluation split, got {n}"
            )));
        }
        let n_eval = ((n as f64) * eval_fraction).round() as usize;
        let n_eval = n_eval.clamp(1, n - 1);

        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut StdRng::seed_from_u64(seed));
        let eval = order.split_off(n - n_eval);
        Ok(Self { train: order, eval })
    }
}

#[derive(Debug, Clone)]
pub struct CandidateModel {
    pub algorithm: Algorithm,
    pub task: Task,
    pub model: FittedModel,
    pub metrics: MetricsBundle,
    pub encoder_fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedCandidate {
    pub task: Task,
    pub algorithm: Algorithm,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct TrainingOutcome {
    pub candidates: Vec<CandidateModel>,
    pub skipped: Vec<SkippedCandidate>,
    pub train_rows: usize,
    pub eval_rows: usize,
}

/// Fits every enabled algorithm against every task it supports and scores it
/// on the held-out rows. A failed fit is logged and recorded in `skipped`;
/// it never stops the other fits.
pub fn train_all(
    matrix: &FeatureMatrix,
    labels: &Labels,
    cfg: &TrainingConfig,
) -> TrainResult<TrainingOutcome> {
    if matrix.n_rows() != labels.len() {
        return Err(TrainError::Encoding(format!(
            "{} encoded rows but {} label rows",
            matrix.n_rows(),
            labels.len()
        )));
    }
    let split = TrainTestSplit::new(matrix.n_rows(), cfg.eval_fraction, cfg.split_seed)?;
    let train_x = matrix.select(&split.train);
    let eval_x = matrix.select(&split.eval);
    let train_y = labels.select(&split.train);
    let eval_y = labels.select(&split.eval);
    info!(
        train_rows = split.train.len(),
        eval_rows = split.eval.len(),
        split_seed = cfg.split_seed,
        "training split ready"
    );

    let mut algorithms: Vec<Algorithm> = Vec::new();
    for &algorithm in &cfg.algorithms {
        if !algorithms.contains(&algorithm) {
            algorithms.push(algorithm);
        }
    }

    let mut candidates = Vec::new();
    let mut skipped = Vec::new();
    for task in Task::ALL {
        for &algorithm in algorithms.iter().filter(|a| a.supports(task)) {
            let started = Instant::now();
            let model = match estimator::fit(
                algorithm,
                task,
                &train_x.rows,
                train_y.for_task(task),
                &cfg.params,
            ) {
                Ok(model) => model,
                Err(err) => {
                    let reason = match err {
                        TrainError::EstimatorFit { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    warn!(
                        task = %task,
                        algorithm = %algorithm,
                        reason = %reason,
                        "skipping candidate"
                    );
                    skipped.push(SkippedCandidate {
                        task,
                        algorithm,
                        reason,
                    });
                    continue;
                }
            };
            debug!(
                task = %task,
                algorithm = %algorithm,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "fit done"
            );

            let eval_split = EvalSplit {
                matrix: &eval_x,
                targets: eval_y.for_task(task),
                fingerprint: &train_x.fingerprint,
            };
            let bundle = metrics::evaluate(&model, task, &eval_split)?;
            info!(
                task = %task,
                algorithm = %algorithm,
                metrics = %bundle.summary(),
                "candidate evaluated"
            );
            candidates.push(CandidateModel {
                algorithm,
                task,
                model,
                metrics: bundle,
                encoder_fingerprint: train_x.fingerprint.clone(),
            });
        }
    }

    Ok(TrainingOutcome {
        candidates,
        skipped,
        train_rows: split.train.len(),
        eval_rows: split.eval.len(),
    })
}
