use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::estimator::{Algorithm, Task};

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("sample generation failed: {0}")]
    Generation(String),

    #[error("feature encoding failed: {0}")]
    Encoding(String),

    #[error("{algorithm} could not be fit for the {task} task: {reason}")]
    EstimatorFit {
        task: Task,
        algorithm: Algorithm,
        reason: String,
    },

    #[error("no viable candidate left for the {task} task")]
    Selection { task: Task },

    #[error("persisting {}: {reason}", path.display())]
    Persistence { path: PathBuf, reason: String },
}

pub type TrainResult<T> = Result<T, TrainError>;

impl TrainError {
    pub fn stage(&self) -> &'static str {
        match self {
            TrainError::Generation(_) => "generate",
            TrainError::Encoding(_) => "encode",
            TrainError::EstimatorFit { .. } => "train",
            TrainError::Selection { .. } => "select",
            TrainError::Persistence { .. } => "persist",
        }
    }

    pub(crate) fn fit(task: Task, algorithm: Algorithm, reason: impl Into<String>) -> Self {
        TrainError::EstimatorFit {
            task,
            algorithm,
            reason: reason.into(),
        }
    }

    pub(crate) fn persist(path: &Path, reason: impl ToString) -> Self {
        TrainError::Persistence {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        }
    }
}
