use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::config::ForestParams;
use crate::tree::{RegressionTree, TreeParams};

/// Bagged CART trees; the prediction is the mean over trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    pub max_features: Option<usize>,
    pub trees: Vec<RegressionTree>,
}

impl RandomForest {
    /// Each tree draws its bootstrap sample and feature subsets from its own
    /// seed, so the forest is identical whatever the thread count.
    pub fn fit(
        x: &[Vec<f64>],
        y: &[f64],
        params: &ForestParams,
        max_features: Option<usize>,
    ) -> Result<Self, String> {
        if params.n_trees == 0 {
            return Err("n_trees must be at least 1".to_string());
        }
        if params.max_depth == 0 {
            return Err("max_depth must be at least 1".to_string());
        }
        if x.is_empty() || x.len() != y.len() {
            return Err(format!("{} rows but {} targets", x.len(), y.len()));
        }

        let n = x.len();
        let trees = (0..params.n_trees)
            .into_par_iter()
            .map(|t| {
                let seed = tree_seed(params.seed, t);
                let mut rng = StdRng::seed_from_u64(seed);
                let rows: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit(
                    x,
                    y,
                    &rows,
                    TreeParams {
                        max_depth: params.max_depth,
                        min_samples_leaf: params.min_samples_leaf,
                        max_features,
                        seed: seed.rotate_left(17),
                    },
                )
            })
            .collect();

        Ok(Self {
            max_features,
            trees,
        })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|t| t.predict(row)).sum::<f64>() / self.trees.len() as f64
    }

    pub fn is_finite(&self) -> bool {
        self.trees
            .iter()
            .flat_map(|t| &t.nodes)
            .all(|n| n.value.is_finite() && n.threshold.is_finite())
    }
}

/// Square root of the column count, rounded, at least one.
pub fn sqrt_features(n_features: usize) -> Option<usize> {
    Some(((n_features as f64).sqrt().round() as usize).max(1))
}

fn tree_seed(base: u64, tree: usize) -> u64 {
    base.wrapping_add((tree as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}
