//! Logistic regression fitted by damped Newton steps.

use ndarray::{s, Array1, Array2};

use super::traits::{check_training_data, check_width, Model, ModelFactory};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct LogisticParams {
    /// L2 penalty on the slopes (not the intercept). Keeps separable data finite.
    pub penalty: f64,
    pub max_iter: usize,
    pub tol: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            penalty: 1e-4,
            max_iter: 100,
            tol: 1e-8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogisticRegression {
    params: LogisticParams,
    /// Intercept first, then one slope per feature.
    coefficients: Option<Array1<f64>>,
}

impl LogisticRegression {
    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.coefficients.as_ref()
    }

    fn linear(x: &Array2<f64>, beta: &Array1<f64>) -> Array1<f64> {
        x.dot(&beta.slice(s![1..])) + beta[0]
    }

    fn objective(&self, x: &Array2<f64>, y: &Array1<f64>, beta: &Array1<f64>) -> f64 {
        let eta = Self::linear(x, beta);
        let nll: f64 = eta
            .iter()
            .zip(y.iter())
            .map(|(&z, &t)| softplus(z) - t * z)
            .sum();
        let slopes = beta.slice(s![1..]);
        nll + 0.5 * self.params.penalty * slopes.dot(&slopes)
    }
}

impl ModelFactory for LogisticRegression {
    type Params = LogisticParams;

    fn create(params: &LogisticParams) -> Result<Self> {
        if params.penalty < 0.0 || params.max_iter == 0 {
            return Err(PipelineError::config(format!(
                "invalid logistic regression settings: {:?}",
                params
            )));
        }
        Ok(Self {
            params: params.clone(),
            coefficients: None,
        })
    }
}

impl Model for LogisticRegression {
    fn name(&self) -> &'static str {
        "logistic_regression"
    }

    fn fit(&mut self, features: &Array2<f64>, labels: &Array1<f64>) -> Result<()> {
        check_training_data(features, labels)?;
        let p = features.ncols();
        let penalty = self.params.penalty;
        let mut beta = Array1::<f64>::zeros(p + 1);

        for _ in 0..self.params.max_iter {
            let prob = Self::linear(features, &beta).mapv(sigmoid);
            let resid = &prob - labels;
            let weights = prob.mapv(|q| (q * (1.0 - q)).max(1e-12));

            let mut grad = Array1::<f64>::zeros(p + 1);
            grad[0] = resid.sum();
            let slope_grad = features.t().dot(&resid) + &beta.slice(s![1..]) * penalty;
            grad.slice_mut(s![1..]).assign(&slope_grad);

            let mut hessian = Array2::<f64>::zeros((p + 1, p + 1));
            hessian[[0, 0]] = weights.sum();
            for j in 0..p {
                let weighted = &features.column(j) * &weights;
                let cross = weighted.sum();
                hessian[[0, j + 1]] = cross;
                hessian[[j + 1, 0]] = cross;
                for k in j..p {
                    let v = weighted.dot(&features.column(k));
                    hessian[[j + 1, k + 1]] = v;
                    hessian[[k + 1, j + 1]] = v;
                }
                hessian[[j + 1, j + 1]] += penalty;
            }

            let step = solve(hessian, grad)?;

            // Backtrack until the penalized likelihood does not get worse.
            let current = self.objective(features, labels, &beta);
            let mut scale = 1.0;
            let mut candidate = &beta - &(&step * scale);
            while self.objective(features, labels, &candidate) > current && scale > 1e-6 {
                scale *= 0.5;
                candidate = &beta - &(&step * scale);
            }

            let change = step.iter().fold(0.0f64, |m, v| m.max((v * scale).abs()));
            beta = candidate;
            if change < self.params.tol {
                break;
            }
        }

        if beta.iter().any(|v| !v.is_finite()) {
            return Err(PipelineError::model("logistic regression diverged"));
        }
        self.coefficients = Some(beta);
        Ok(())
    }

    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        let beta = self
            .coefficients
            .as_ref()
            .ok_or_else(|| PipelineError::model("logistic regression is not fitted"))?;
        check_width(beta.len() - 1, features)?;
        Ok(Self::linear(features, beta).mapv(sigmoid))
    }
}

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

/// log(1 + e^z) without overflow.
fn softplus(z: f64) -> f64 {
    if z > 0.0 {
        z + (-z).exp().ln_1p()
    } else {
        z.exp().ln_1p()
    }
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Array2<f64>, mut b: Array1<f64>) -> Result<Array1<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[[i, col]].abs().total_cmp(&a[[j, col]].abs()))
            .unwrap_or(col);
        if a[[pivot, col]].abs() < 1e-14 {
            return Err(PipelineError::model("singular Hessian in logistic regression"));
        }
        if pivot != col {
            for k in 0..n {
                a.swap([col, k], [pivot, k]);
            }
            b.swap(col, pivot);
        }
        for row in col + 1..n {
            let factor = a[[row, col]] / a[[col, col]];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[[row, k]] -= factor * a[[col, k]];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = Array1::<f64>::zeros(n);
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[[row, k]] * x[k]).sum();
        x[row] = (b[row] - tail) / a[[row, row]];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::roc_auc;
    use ndarray::array;

    #[test]
    fn test_solve_small_system() {
        let a = array![[2.0, 1.0], [1.0, 3.0]];
        let b = array![3.0, 5.0];
        let x = solve(a, b).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_probabilities_follow_signal() {
        let x = Array2::from_shape_vec(
            (8, 1),
            vec![-2.0, -1.5, -1.0, -0.2, 0.3, 0.1, 1.2, 2.0],
        )
        .unwrap();
        let y = array![0.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 1.0];

        let mut model = LogisticRegression::create(&LogisticParams::default()).unwrap();
        model.fit(&x, &y).unwrap();
        let coef = model.coefficients().unwrap();
        assert!(coef[1] > 0.0);

        let prob = model.predict_proba(&x).unwrap();
        assert!(prob.iter().all(|p| (0.0..=1.0).contains(p)));
        assert!(prob[7] > prob[0]);
        assert!(roc_auc(y.as_slice().unwrap(), prob.as_slice().unwrap()) > 0.85);
    }

    #[test]
    fn test_separable_data_stays_finite() {
        let x = Array2::from_shape_vec((6, 1), vec![-3.0, -2.0, -1.0, 1.0, 2.0, 3.0]).unwrap();
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0];
        let mut model = LogisticRegression::create(&LogisticParams::default()).unwrap();
        model.fit(&x, &y).unwrap();
        let prob = model.predict_proba(&x).unwrap();
        assert!(prob.iter().all(|p| p.is_finite()));
        assert!(prob[0] < 0.01 && prob[5] > 0.99);
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let model = LogisticRegression::create(&LogisticParams::default()).unwrap();
        let x = Array2::zeros((2, 1));
        assert!(matches!(model.predict_proba(&x), Err(PipelineError::Model(_))));
    }
}
