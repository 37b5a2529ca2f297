use std::fmt;

use serde::{Deserialize, Serialize};

use crate::boosting::{BoostLoss, GradientBoosting};
use crate::config::EstimatorParams;
use crate::error::{TrainError, TrainResult};
use crate::forest::{RandomForest, sqrt_features};
use crate::linear::{LinearModel, LogisticModel};

/// Probability at or above which a classifier predicts the positive class.
pub const DECISION_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Task {
    Position,
    Winner,
    Podium,
}

impl Task {
    pub const ALL: [Task; 3] = [Task::Position, Task::Winner, Task::Podium];

    pub fn name(self) -> &'static str {
        match self {
            Task::Position => "position",
            Task::Winner => "winner",
            Task::Podium => "podium",
        }
    }

    pub fn is_classification(self) -> bool {
        !matches!(self, Task::Position)
    }

    pub fn file_stem(self) -> &'static str {
        match self {
            Task::Position => "position_model",
            Task::Winner => "winner_model",
            Task::Podium => "podium_model",
        }
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    RandomForest,
    GradientBoosting,
    LogisticRegression,
    LinearRegression,
}

impl Algorithm {
    pub const ALL: [Algorithm; 4] = [
        Algorithm::RandomForest,
        Algorithm::GradientBoosting,
        Algorithm::LogisticRegression,
        Algorithm::LinearRegression,
    ];

    pub fn id(self) -> &'static str {
        match self {
            Algorithm::RandomForest => "random_forest",
            Algorithm::GradientBoosting => "gradient_boosting",
            Algorithm::LogisticRegression => "logistic_regression",
            Algorithm::LinearRegression => "linear_regression",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|a| a.id() == raw.trim())
    }

    pub fn supports(self, task: Task) -> bool {
        match self {
            Algorithm::RandomForest | Algorithm::GradientBoosting => true,
            Algorithm::LogisticRegression => task.is_classification(),
            Algorithm::LinearRegression => !task.is_classification(),
        }
    }

    /// Last-resort ordering when every selection metric ties; lower wins.
    pub fn priority(self) -> u8 {
        match self {
            Algorithm::RandomForest => 0,
            Algorithm::GradientBoosting => 1,
            Algorithm::LogisticRegression => 2,
            Algorithm::LinearRegression => 3,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model_type", rename_all = "snake_case")]
pub enum FittedModel {
    RandomForest(RandomForest),
    GradientBoosting(GradientBoosting),
    LogisticRegression(LogisticModel),
    LinearRegression(LinearModel),
}

impl FittedModel {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            FittedModel::RandomForest(_) => Algorithm::RandomForest,
            FittedModel::GradientBoosting(_) => Algorithm::GradientBoosting,
            FittedModel::LogisticRegression(_) => Algorithm::LogisticRegression,
            FittedModel::LinearRegression(_) => Algorithm::LinearRegression,
        }
    }

    /// Regression value for the position task, positive-class probability
    /// for the classification tasks.
    pub fn predict(&self, row: &[f64]) -> f64 {
        match self {
            FittedModel::RandomForest(m) => m.predict(row),
            FittedModel::GradientBoosting(m) => m.predict(row),
            FittedModel::LogisticRegression(m) => m.predict(row),
            FittedModel::LinearRegression(m) => m.predict(row),
        }
    }

    pub fn predict_class(&self, row: &[f64]) -> bool {
        self.predict(row) >= DECISION_THRESHOLD
    }

    fn is_finite(&self) -> bool {
        match self {
            FittedModel::RandomForest(m) => m.is_finite(),
            FittedModel::GradientBoosting(m) => m.is_finite(),
            FittedModel::LogisticRegression(m) => m.is_finite(),
            FittedModel::LinearRegression(m) => m.is_finite(),
        }
    }
}

/// Fits one (algorithm, task) pair. Classification targets are 0/1.
pub fn fit(
    algorithm: Algorithm,
    task: Task,
    x: &[Vec<f64>],
    y: &[f64],
    params: &EstimatorParams,
) -> TrainResult<FittedModel> {
    if !algorithm.supports(task) {
        return Err(TrainError::fit(task, algorithm, "task not supported"));
    }
    if x.is_empty() {
        return Err(TrainError::fit(task, algorithm, "empty training set"));
    }
    let width = x[0].len();
    if width == 0 || x.iter().any(|row| row.len() != width) {
        return Err(TrainError::fit(task, algorithm, "ragged feature rows"));
    }

    let fitted = match algorithm {
        Algorithm::RandomForest => RandomForest::fit(x, y, &params.forest, sqrt_features(width))
            .map(FittedModel::RandomForest),
        Algorithm::GradientBoosting => {
            let loss = if task.is_classification() {
                BoostLoss::LogLoss
            } else {
                BoostLoss::SquaredError
            };
            GradientBoosting::fit(x, y, &params.boosting, loss).map(FittedModel::GradientBoosting)
        }
        Algorithm::LogisticRegression => {
            LogisticModel::fit(x, y, &params.logistic).map(FittedModel::LogisticRegression)
        }
        Algorithm::LinearRegression => {
            LinearModel::fit(x, y, &params.linear).map(FittedModel::LinearRegression)
        }
    }
    .map_err(|reason| TrainError::fit(task, algorithm, reason))?;

    if !fitted.is_finite() {
        return Err(TrainError::fit(task, algorithm, "fitted parameters are not finite"));
    }
    Ok(fitted)
}
