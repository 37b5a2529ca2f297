use serde::{Deserialize, Serialize};

use crate::config::BoostingParams;
use crate::linear::sigmoid;
use crate::tree::{RegressionTree, TreeParams};

// L2 penalty on leaf weights.
const LEAF_LAMBDA: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoostLoss {
    SquaredError,
    LogLoss,
}

/// Additive ensemble of shallow trees fitted to the loss gradient.
///
/// With `LogLoss` the raw score is a log-odds and `predict` returns the
/// sigmoid of it; leaves take a regularised Newton step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoosting {
    pub loss: BoostLoss,
    pub base_score: f64,
    pub learning_rate: f64,
    pub trees: Vec<RegressionTree>,
}

impl GradientBoosting {
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        params: &BoostingParams,
        loss: BoostLoss,
    ) -> Result<Self, String> {
        if params.n_rounds == 0 {
            return Err("n_rounds must be at least 1".to_string());
        }
        if params.max_depth == 0 {
            return Err("max_depth must be at least 1".to_string());
        }
        if !(params.learning_rate.is_finite() && params.learning_rate > 0.0) {
            return Err(format!("learning rate {} is not usable", params.learning_rate));
        }
        if x.is_empty() || x.len() != y.len() {
            return Err(format!("{} rows but {} targets", x.len(), y.len()));
        }

        let n = x.len();
        let mean = y.iter().sum::<f64>() / n as f64;
        let base_score = match loss {
            BoostLoss::SquaredError => mean,
            BoostLoss::LogLoss => {
                let p = mean.clamp(1e-6, 1.0 - 1e-6);
                (p / (1.0 - p)).ln()
            }
        };

        let rows: Vec<usize> = (0..n).collect();
        let mut raw = vec![base_score; n];
        let mut residual = vec![0.0; n];
        let mut hessian = vec![1.0; n];
        let mut trees = Vec::with_capacity(params.n_rounds);

        for round in 0..params.n_rounds {
            for i in 0..n {
                match loss {
                    BoostLoss::SquaredError => residual[i] = y[i] - raw[i],
                    BoostLoss::LogLoss => {
                        let p = sigmoid(raw[i]);
                        residual[i] = y[i] - p;
                        hessian[i] = p * (1.0 - p);
                    }
                }
            }

            let tree = RegressionTree::fit_with_leaves(
                x,
                &residual,
                &rows,
                TreeParams {
                    max_depth: params.max_depth,
                    min_samples_leaf: params.min_samples_leaf,
                    max_features: None,
                    seed: round as u64,
                },
                |leaf| {
                    let g: f64 = leaf.iter().map(|&i| residual[i]).sum();
                    let h: f64 = leaf.iter().map(|&i| hessian[i]).sum();
                    g / (h + LEAF_LAMBDA)
                },
            );

            for (score, row) in raw.iter_mut().zip(x) {
                *score += params.learning_rate * tree.predict(row);
            }
            if raw.iter().any(|v| !v.is_finite()) {
                return Err(format!("scores diverged at round {round}"));
            }
            trees.push(tree);
        }

        Ok(Self {
            loss,
            base_score,
            learning_rate: params.learning_rate,
            trees,
        })
    }

    pub fn raw_score(&self, row: &[f64]) -> f64 {
        self.base_score
            + self.learning_rate * self.trees.iter().map(|t| t.predict(row)).sum::<f64>()
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let raw = self.raw_score(row);
        match self.loss {
            BoostLoss::SquaredError => raw,
            BoostLoss::LogLoss => sigmoid(raw),
        }
    }

    pub fn is_finite(&self) -> bool {
        self.base_score.is_finite()
            && self
                .trees
                .iter()
                .flat_map(|t| &t.nodes)
                .all(|n| n.value.is_finite() && n.threshold.is_finite())
    }
}
