use serde::{Deserialize, Serialize};

use crate::config::{LinearParams, LogisticParams};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub bias: f64,
    pub coeffs: Vec<f64>,
    pub iterations: usize,
}

impl LogisticModel {
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &LogisticParams) -> Result<Self, String> {
        if x.is_empty() || x.len() != y.len() {
            return Err(format!("{} rows but {} targets", x.len(), y.len()));
        }
        if !(params.learning_rate.is_finite() && params.learning_rate > 0.0) {
            return Err(format!("learning rate {} is not usable", params.learning_rate));
        }
        let width = x[0].len();
        let n = x.len() as f64;
        let mut coeffs = vec![0.0; width];
        let mut bias = 0.0;
        let mut prev_loss = f64::INFINITY;
        let mut iterations = 0;

        for iter in 0..params.max_iters {
            iterations = iter + 1;
            let mut grad = vec![0.0; width];
            let mut grad_bias = 0.0;
            let mut loss = 0.0;
            for (row, &target) in x.iter().zip(y) {
                let p = sigmoid(bias + dot(&coeffs, row));
                let err = p - target;
                grad_bias += err;
                for (g, v) in grad.iter_mut().zip(row) {
                    *g += err * v;
                }
                loss -= target * p.max(1e-12).ln() + (1.0 - target) * (1.0 - p).max(1e-12).ln();
            }

            bias -= params.learning_rate * grad_bias / n;
            for (w, g) in coeffs.iter_mut().zip(&grad) {
                *w -= params.learning_rate * (g / n + params.l2 * *w);
            }
            if !bias.is_finite() || coeffs.iter().any(|w| !w.is_finite()) {
                return Err(format!("coefficients diverged after {iterations} iterations"));
            }

            let loss = loss / n;
            if (prev_loss - loss).abs() < params.tolerance {
                break;
            }
            prev_loss = loss;
        }

        Ok(Self {
            bias,
            coeffs,
            iterations,
        })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        sigmoid(self.bias + dot(&self.coeffs, row))
    }

    pub fn is_finite(&self) -> bool {
        self.bias.is_finite() && self.coeffs.iter().all(|w| w.is_finite())
    }
}

/// Ridge regression; the intercept is not penalised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub bias: f64,
    pub coeffs: Vec<f64>,
}

impl LinearModel {
    pub fn fit(x: &[Vec<f64>], y: &[f64], params: &LinearParams) -> Result<Self, String> {
        if x.is_empty() || x.len() != y.len() {
            return Err(format!("{} rows but {} targets", x.len(), y.len()));
        }
        if !(params.l2.is_finite() && params.l2 >= 0.0) {
            return Err(format!("l2 penalty {} is not usable", params.l2));
        }
        let width = x[0].len() + 1;

        // Normal equations over [1, x].
        let mut a = vec![vec![0.0; width + 1]; width];
        for (row, &target) in x.iter().zip(y) {
            let aug: Vec<f64> = std::iter::once(1.0).chain(row.iter().copied()).collect();
            for i in 0..width {
                for j in 0..width {
                    a[i][j] += aug[i] * aug[j];
                }
                a[i][width] += aug[i] * target;
            }
        }
        for (i, row) in a.iter_mut().enumerate().skip(1) {
            row[i] += params.l2 * x.len() as f64;
        }

        let solution = solve(a)?;
        Ok(Self {
            bias: solution[0],
            coeffs: solution[1..].to_vec(),
        })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        self.bias + dot(&self.coeffs, row)
    }

    pub fn is_finite(&self) -> bool {
        self.bias.is_finite() && self.coeffs.iter().all(|w| w.is_finite())
    }
}

pub(crate) fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

// Gaussian elimination with partial pivoting on an augmented [A | b] system.
fn solve(mut a: Vec<Vec<f64>>) -> Result<Vec<f64>, String> {
    let n = a.len();
    let scale = (0..n).map(|i| a[i][i].abs()).fold(1.0, f64::max);
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 * scale {
            return Err(format!("singular design matrix at column {col}"));
        }
        a.swap(col, pivot);
        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..=n {
                a[row][k] -= factor * a[col][k];
            }
        }
    }

    let mut out = vec![0.0; n];
    for row in (0..n).rev() {
        let mut acc = a[row][n];
        for k in row + 1..n {
            acc -= a[row][k] * out[k];
        }
        out[row] = acc / a[row][row];
    }
    if out.iter().any(|v| !v.is_finite()) {
        return Err("solution is not finite".to_string());
    }
    Ok(out)
}
