use serde::Deserialize;
use std::cmp::Ordering;
use std::fmt;

/// Class-probability cutoff for hard predictions.
pub const THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Accuracy,
    RocAuc,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
            Metric::RocAuc => "roc_auc",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Scores of one fitted model on one partition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelMetrics {
    pub accuracy: f64,
    pub roc_auc: f64,
}

impl ModelMetrics {
    pub fn compute(truth: &[f64], prob: &[f64]) -> Self {
        Self {
            accuracy: accuracy(truth, prob),
            roc_auc: roc_auc(truth, prob),
        }
    }

    pub fn get(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Accuracy => self.accuracy,
            Metric::RocAuc => self.roc_auc,
        }
    }
}

/// Share of rows whose thresholded probability matches the label.
pub fn accuracy(truth: &[f64], prob: &[f64]) -> f64 {
    if truth.is_empty() {
        return f64::NAN;
    }
    let correct = truth
        .iter()
        .zip(prob)
        .filter(|(&y, &p)| (p >= THRESHOLD) == (y == 1.0))
        .count();
    correct as f64 / truth.len() as f64
}

/// Area under the ROC curve via the rank-sum statistic; tied scores share their average rank.
/// NaN when either class is absent.
pub fn roc_auc(truth: &[f64], prob: &[f64]) -> f64 {
    let n_pos = truth.iter().filter(|&&y| y == 1.0).count();
    let n_neg = truth.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return f64::NAN;
    }

    let mut order: Vec<usize> = (0..prob.len()).collect();
    order.sort_by(|&a, &b| prob[a].partial_cmp(&prob[b]).unwrap_or(Ordering::Equal));

    let mut positive_rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && prob[order[j + 1]] == prob[order[i]] {
            j += 1;
        }
        // ranks are 1-based
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        for &idx in &order[i..=j] {
            if truth[idx] == 1.0 {
                positive_rank_sum += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let n_neg = n_neg as f64;
    (positive_rank_sum - n_pos * (n_pos + 1.0) / 2.0) / (n_pos * n_neg)
}

/// Rows are truth, columns are prediction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfusionMatrix {
    pub true_negative: usize,
    pub false_positive: usize,
    pub false_negative: usize,
    pub true_positive: usize,
}

impl ConfusionMatrix {
    pub fn from_predictions(truth: &[f64], prob: &[f64]) -> Self {
        let mut matrix = Self::default();
        for (&y, &p) in truth.iter().zip(prob) {
            match (y == 1.0, p >= THRESHOLD) {
                (false, false) => matrix.true_negative += 1,
                (false, true) => matrix.false_positive += 1,
                (true, false) => matrix.false_negative += 1,
                (true, true) => matrix.true_positive += 1,
            }
        }
        matrix
    }

    pub fn total(&self) -> usize {
        self.true_negative + self.false_positive + self.false_negative + self.true_positive
    }
}

/// Mean and standard error of a metric across resamples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricEstimate {
    pub mean: f64,
    pub std_err: f64,
    pub n: usize,
}

impl MetricEstimate {
    pub fn from_values(values: &[f64]) -> Self {
        let n = values.len();
        if n == 0 {
            return Self {
                mean: f64::NAN,
                std_err: f64::NAN,
                n,
            };
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let std_err = if n > 1 {
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            (var / n as f64).sqrt()
        } else {
            f64::NAN
        };
        Self { mean, std_err, n }
    }
}
