use serde::{Deserialize, Serialize};

use crate::encoder::FeatureMatrix;
use crate::error::{TrainError, TrainResult};
use crate::estimator::{DECISION_THRESHOLD, FittedModel, Task};

/// Held-out rows with their targets, tagged with the encoder fingerprint the
/// model under evaluation was trained against.
#[derive(Debug, Clone, Copy)]
pub struct EvalSplit<'a> {
    pub matrix: &'a FeatureMatrix,
    pub targets: &'a [f64],
    pub fingerprint: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricsBundle {
    Regression {
        samples: usize,
        mae: f64,
    },
    Classification {
        samples: usize,
        accuracy: f64,
        precision: f64,
        recall: f64,
        f1: f64,
    },
}

impl MetricsBundle {
    pub fn samples(&self) -> usize {
        match self {
            MetricsBundle::Regression { samples, .. } => *samples,
            MetricsBundle::Classification { samples, .. } => *samples,
        }
    }

    pub fn mae(&self) -> Option<f64> {
        match self {
            MetricsBundle::Regression { mae, .. } => Some(*mae),
            MetricsBundle::Classification { .. } => None,
        }
    }

    pub fn accuracy(&self) -> Option<f64> {
        match self {
            MetricsBundle::Classification { accuracy, .. } => Some(*accuracy),
            MetricsBundle::Regression { .. } => None,
        }
    }

    pub fn f1(&self) -> Option<f64> {
        match self {
            MetricsBundle::Classification { f1, .. } => Some(*f1),
            MetricsBundle::Regression { .. } => None,
        }
    }

    /// One-line summary for console output.
    pub fn summary(&self) -> String {
        match self {
            MetricsBundle::Regression { mae, .. } => format!("mae={mae:.3}"),
            MetricsBundle::Classification {
                accuracy,
                precision,
                recall,
                f1,
                ..
            } => format!("acc={accuracy:.3} prec={precision:.3} rec={recall:.3} f1={f1:.3}"),
        }
    }
}

pub fn evaluate(
    model: &FittedModel,
    task: Task,
    split: &EvalSplit<'_>,
) -> TrainResult<MetricsBundle> {
    if split.matrix.fingerprint != split.fingerprint {
        return Err(TrainError::Encoding(format!(
            "evaluation rows were encoded with {} but the {task} model expects {}",
            split.matrix.fingerprint, split.fingerprint
        )));
    }
    if split.matrix.n_rows() != split.targets.len() {
        return Err(TrainError::Encoding(format!(
            "{} evaluation rows but {} targets",
            split.matrix.n_rows(),
            split.targets.len()
        )));
    }

    let predictions: Vec<f64> = split.matrix.rows.iter().map(|row| model.predict(row)).collect();
    if task.is_classification() {
        let truth: Vec<bool> = split.targets.iter().map(|&t| t >= 0.5).collect();
        let predicted: Vec<bool> = predictions
            .iter()
            .map(|&p| p >= DECISION_THRESHOLD)
            .collect();
        Ok(classification_metrics(&truth, &predicted))
    } else {
        Ok(MetricsBundle::Regression {
            samples: predictions.len(),
            mae: mean_absolute_error(split.targets, &predictions),
        })
    }
}

pub fn mean_absolute_error(truth: &[f64], predicted: &[f64]) -> f64 {
    if truth.is_empty() {
        return 0.0;
    }
    truth
        .iter()
        .zip(predicted)
        .map(|(t, p)| (t - p).abs())
        .sum::<f64>()
        / truth.len() as f64
}

/// Positive-class metrics; any ratio with a zero denominator is 0.
pub fn classification_metrics(truth: &[bool], predicted: &[bool]) -> MetricsBundle {
    let (mut tp, mut fp, mut fneg, mut tn) = (0usize, 0usize, 0usize, 0usize);
    for (&t, &p) in truth.iter().zip(predicted) {
        match (t, p) {
            (true, true) => tp += 1,
            (false, true) => fp += 1,
            (true, false) => fneg += 1,
            (false, false) => tn += 1,
        }
    }
    let samples = tp + fp + fneg + tn;
    let accuracy = ratio(tp + tn, samples);
    let precision = ratio(tp, tp + fp);
    let recall = ratio(tp, tp + fneg);
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    MetricsBundle::Classification {
        samples,
        accuracy,
        precision,
        recall,
        f1,
    }
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 { 0.0 } else { num as f64 / den as f64 }
}
