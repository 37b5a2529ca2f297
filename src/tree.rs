// Flat CART nodes: `feature == -1` is a leaf; `x <= threshold` or NaN goes left.

use rand::rngs::StdRng;
use rand::{SeedableRng, seq::index};
use serde::{Deserialize, Serialize};

const MIN_GAIN: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeNode {
    pub feature: i32,
    pub threshold: f64,
    pub left: i32,
    pub right: i32,
    pub value: f64,
}

impl TreeNode {
    fn leaf(value: f64) -> Self {
        Self {
            feature: -1,
            threshold: 0.0,
            left: -1,
            right: -1,
            value,
        }
    }

    fn is_leaf(&self) -> bool {
        self.feature < 0
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_leaf: usize,
    /// Features examined per split; `None` examines all of them.
    pub max_features: Option<usize>,
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    pub nodes: Vec<TreeNode>,
}

impl RegressionTree {
    pub fn fit(x: &[Vec<f64>], y: &[f64], indices: &[usize], params: TreeParams) -> Self {
        Self::fit_with_leaves(x, y, indices, params, |rows| mean(y, rows))
    }

    /// Grows the tree on `y` but assigns each leaf `leaf_value(rows)`.
    pub fn fit_with_leaves(
        x: &[Vec<f64>],
        y: &[f64],
        indices: &[usize],
        params: TreeParams,
        leaf_value: impl Fn(&[usize]) -> f64,
    ) -> Self {
        let n_features = x.first().map(|row| row.len()).unwrap_or(0);
        let mut builder = Builder {
            x,
            y,
            params,
            n_features,
            rng: StdRng::seed_from_u64(params.seed),
            leaf_value: &leaf_value,
            nodes: Vec::new(),
        };
        if indices.is_empty() {
            builder.nodes.push(TreeNode::leaf(0.0));
        } else {
            builder.grow(indices.to_vec(), 0);
        }
        Self {
            nodes: builder.nodes,
        }
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        let mut idx = 0usize;
        loop {
            let Some(node) = self.nodes.get(idx) else {
                return 0.0;
            };
            if node.is_leaf() {
                return node.value;
            }
            let x = row.get(node.feature as usize).copied().unwrap_or(f64::NAN);
            let next = if x.is_nan() || x <= node.threshold {
                node.left
            } else {
                node.right
            };
            if next < 0 {
                return node.value;
            }
            idx = next as usize;
        }
    }

    #[cfg(test)]
    fn depth(&self) -> usize {
        fn walk(nodes: &[TreeNode], idx: i32) -> usize {
            let Some(node) = usize::try_from(idx).ok().and_then(|i| nodes.get(i)) else {
                return 0;
            };
            if node.is_leaf() {
                return 0;
            }
            1 + walk(nodes, node.left).max(walk(nodes, node.right))
        }
        walk(&self.nodes, 0)
    }
}

struct Split {
    feature: usize,
    threshold: f64,
    left: Vec<usize>,
    right: Vec<usize>,
}

struct Builder<'a, F: Fn(&[usize]) -> f64> {
    x: &'a [Vec<f64>],
    y: &'a [f64],
    params: TreeParams,
    n_features: usize,
    rng: StdRng,
    leaf_value: &'a F,
    nodes: Vec<TreeNode>,
}

impl<F: Fn(&[usize]) -> f64> Builder<'_, F> {
    fn grow(&mut self, rows: Vec<usize>, depth: usize) -> usize {
        let id = self.nodes.len();
        let value = (self.leaf_value)(&rows);
        self.nodes.push(TreeNode::leaf(value));

        let min_leaf = self.params.min_samples_leaf.max(1);
        if depth >= self.params.max_depth || rows.len() < 2 * min_leaf {
            return id;
        }
        let Some(split) = self.best_split(&rows, min_leaf) else {
            return id;
        };

        let left = self.grow(split.left, depth + 1);
        let right = self.grow(split.right, depth + 1);
        let node = &mut self.nodes[id];
        node.feature = split.feature as i32;
        node.threshold = split.threshold;
        node.left = left as i32;
        node.right = right as i32;
        id
    }

    fn candidate_features(&mut self) -> Vec<usize> {
        match self.params.max_features {
            Some(m) if m > 0 && m < self.n_features => {
                let mut picked = index::sample(&mut self.rng, self.n_features, m).into_vec();
                picked.sort_unstable();
                picked
            }
            _ => (0..self.n_features).collect(),
        }
    }

    fn best_split(&mut self, rows: &[usize], min_leaf: usize) -> Option<Split> {
        let n = rows.len();
        let total: f64 = rows.iter().map(|&i| self.y[i]).sum();
        let parent_score = total * total / n as f64;

        let mut best: Option<(f64, usize, f64)> = None;
        let mut pairs: Vec<(f64, f64)> = Vec::with_capacity(n);
        for feature in self.candidate_features() {
            pairs.clear();
            pairs.extend(rows.iter().map(|&i| (self.x[i][feature], self.y[i])));
            pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

            let mut left_sum = 0.0;
            for k in 1..n {
                left_sum += pairs[k - 1].1;
                if k < min_leaf || n - k < min_leaf {
                    continue;
                }
                if pairs[k - 1].0 == pairs[k].0 {
                    continue;
                }
                let right_sum = total - left_sum;
                let score =
                    left_sum * left_sum / k as f64 + right_sum * right_sum / (n - k) as f64;
                let improves = match best {
                    Some((best_score, _, _)) => score > best_score,
                    None => score > parent_score + MIN_GAIN,
                };
                if improves {
                    let threshold = 0.5 * (pairs[k - 1].0 + pairs[k].0);
                    best = Some((score, feature, threshold));
                }
            }
        }

        let (_, feature, threshold) = best?;
        let (left, right): (Vec<usize>, Vec<usize>) = rows
            .iter()
            .copied()
            .partition(|&i| self.x[i][feature].is_nan() || self.x[i][feature] <= threshold);
        if left.is_empty() || right.is_empty() {
            return None;
        }
        Some(Split {
            feature,
            threshold,
            left,
            right,
        })
    }
}

pub(crate) fn mean(y: &[f64], rows: &[usize]) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    rows.iter().map(|&i| y[i]).sum::<f64>() / rows.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(max_depth: usize) -> TreeParams {
        TreeParams {
            max_depth,
            min_samples_leaf: 1,
            max_features: None,
            seed: 1,
        }
    }

    #[test]
    fn separates_a_step_function() {
        let x: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64, 0.0]).collect();
        let y: Vec<f64> = (0..20).map(|i| if i < 8 { 1.0 } else { 5.0 }).collect();
        let rows: Vec<usize> = (0..20).collect();
        let tree = RegressionTree::fit(&x, &y, &rows, params(4));

        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.nodes[0].feature, 0);
        assert!((tree.nodes[0].threshold - 7.5).abs() < 1e-12);
        assert_eq!(tree.predict(&[3.0, 0.0]), 1.0);
        assert_eq!(tree.predict(&[15.0, 0.0]), 5.0);
    }

    #[test]
    fn depth_limit_is_respected() {
        let x: Vec<Vec<f64>> = (0..64).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..64).map(|i| (i * i) as f64).collect();
        let rows: Vec<usize> = (0..64).collect();
        let tree = RegressionTree::fit(&x, &y, &rows, params(3));
        assert!(tree.depth() <= 3);
    }

    #[test]
    fn constant_target_is_a_single_leaf() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y = vec![2.0; 10];
        let rows: Vec<usize> = (0..10).collect();
        let tree = RegressionTree::fit(&x, &y, &rows, params(5));
        assert_eq!(tree.nodes.len(), 1);
        assert_eq!(tree.predict(&[100.0]), 2.0);
    }

    #[test]
    fn nan_inputs_follow_the_left_branch() {
        let x: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64]).collect();
        let y: Vec<f64> = (0..10).map(|i| if i < 5 { 0.0 } else { 1.0 }).collect();
        let rows: Vec<usize> = (0..10).collect();
        let tree = RegressionTree::fit(&x, &y, &rows, params(2));
        assert_eq!(tree.predict(&[f64::NAN]), 0.0);
    }

    #[test]
    fn dangling_children_do_not_panic() {
        let tree = RegressionTree {
            nodes: vec![TreeNode {
                feature: 0,
                threshold: 0.5,
                left: 7,
                right: -1,
                value: 3.0,
            }],
        };
        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.predict(&[0.0]), 0.0);
        assert_eq!(tree.predict(&[1.0]), 3.0);
        assert_eq!(RegressionTree { nodes: Vec::new() }.depth(), 0);
    }
}
