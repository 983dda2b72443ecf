//! Bagged classification trees with per-split feature sampling.

use ndarray::{Array1, Array2};
use rand::seq::index::sample;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::cmp::Ordering;

use super::traits::{check_training_data, check_width, Model, ModelFactory};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct ForestParams {
    /// Features drawn at each split; clamped to the feature count at fit time.
    pub mtry: usize,
    pub trees: usize,
    /// Nodes with fewer rows than this become leaves.
    pub min_n: usize,
    pub seed: u64,
}

#[derive(Debug, Clone)]
enum Node {
    Leaf {
        positive_rate: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
}

impl Node {
    fn predict(&self, row: &[f64]) -> f64 {
        let mut node = self;
        loop {
            match node {
                Node::Leaf { positive_rate } => return *positive_rate,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }
}

/// Gini impurity of a node, scaled by its size.
fn weighted_gini(n: usize, positives: usize) -> f64 {
    if n == 0 {
        return 0.0;
    }
    2.0 * positives as f64 * (n - positives) as f64 / n as f64
}

struct TreeBuilder<'a> {
    x: &'a Array2<f64>,
    y: &'a Array1<f64>,
    mtry: usize,
    min_n: usize,
}

impl<'a> TreeBuilder<'a> {
    fn grow(&self, rows: Vec<usize>, rng: &mut ChaCha8Rng) -> Node {
        let n = rows.len();
        let positives = rows.iter().filter(|&&r| self.y[r] == 1.0).count();
        let leaf = Node::Leaf {
            positive_rate: positives as f64 / n.max(1) as f64,
        };
        if n < self.min_n || positives == 0 || positives == n {
            return leaf;
        }

        let parent = weighted_gini(n, positives);
        let mut best: Option<(usize, f64, f64)> = None;

        for feature in sample(rng, self.x.ncols(), self.mtry) {
            let mut sorted = rows.clone();
            sorted.sort_by(|&a, &b| {
                self.x[[a, feature]]
                    .partial_cmp(&self.x[[b, feature]])
                    .unwrap_or(Ordering::Equal)
            });

            let mut left_pos = 0;
            for i in 0..n - 1 {
                if self.y[sorted[i]] == 1.0 {
                    left_pos += 1;
                }
                let here = self.x[[sorted[i], feature]];
                let next = self.x[[sorted[i + 1], feature]];
                if here == next {
                    continue;
                }
                let left_n = i + 1;
                let impurity = weighted_gini(left_n, left_pos)
                    + weighted_gini(n - left_n, positives - left_pos);
                if best.map_or(true, |(_, _, b)| impurity < b) {
                    best = Some((feature, (here + next) / 2.0, impurity));
                }
            }
        }

        match best {
            Some((feature, threshold, impurity)) if impurity < parent - 1e-12 => {
                let (left, right): (Vec<usize>, Vec<usize>) = rows
                    .into_iter()
                    .partition(|&r| self.x[[r, feature]] <= threshold);
                Node::Split {
                    feature,
                    threshold,
                    left: Box::new(self.grow(left, rng)),
                    right: Box::new(self.grow(right, rng)),
                }
            }
            _ => leaf,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RandomForest {
    params: ForestParams,
    trees: Vec<Node>,
    n_features: usize,
}

impl RandomForest {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl ModelFactory for RandomForest {
    type Params = ForestParams;

    fn create(params: &ForestParams) -> Result<Self> {
        if params.trees == 0 || params.mtry == 0 {
            return Err(PipelineError::config(format!(
                "random forest needs trees >= 1 and mtry >= 1, got {:?}",
                params
            )));
        }
        Ok(Self {
            params: params.clone(),
            trees: Vec::new(),
            n_features: 0,
        })
    }
}

impl Model for RandomForest {
    fn name(&self) -> &'static str {
        "random_forest"
    }

    fn fit(&mut self, features: &Array2<f64>, labels: &Array1<f64>) -> Result<()> {
        check_training_data(features, labels)?;
        let n = features.nrows();
        let builder = TreeBuilder {
            x: features,
            y: labels,
            mtry: self.params.mtry.min(features.ncols()),
            min_n: self.params.min_n.max(2),
        };

        let mut rng = ChaCha8Rng::seed_from_u64(self.params.seed);
        self.trees = (0..self.params.trees)
            .map(|_| {
                let bootstrap: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                builder.grow(bootstrap, &mut rng)
            })
            .collect();
        self.n_features = features.ncols();
        Ok(())
    }

    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(PipelineError::model("random forest is not fitted"));
        }
        check_width(self.n_features, features)?;
        let n_trees = self.trees.len() as f64;
        Ok(features
            .rows()
            .into_iter()
            .map(|row| {
                let row = row.to_vec();
                self.trees.iter().map(|tree| tree.predict(&row)).sum::<f64>() / n_trees
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::{accuracy, roc_auc};

    /// Class is 1 when the first feature is positive; the second feature is noise.
    fn threshold_data(n: usize) -> (Array2<f64>, Array1<f64>) {
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let mut x = Array2::zeros((n, 2));
        let mut y = Array1::zeros(n);
        for i in 0..n {
            let signal: f64 = rng.gen_range(-1.0..1.0);
            x[[i, 0]] = signal;
            x[[i, 1]] = rng.gen_range(-1.0..1.0);
            y[i] = if signal > 0.0 { 1.0 } else { 0.0 };
        }
        (x, y)
    }

    fn params(seed: u64) -> ForestParams {
        ForestParams {
            mtry: 1,
            trees: 25,
            min_n: 2,
            seed,
        }
    }

    #[test]
    fn test_forest_learns_threshold() {
        let (x, y) = threshold_data(120);
        let mut forest = RandomForest::create(&params(1)).unwrap();
        forest.fit(&x, &y).unwrap();
        assert_eq!(forest.n_trees(), 25);

        let prob = forest.predict_proba(&x).unwrap();
        let truth = y.to_vec();
        assert!(accuracy(&truth, prob.as_slice().unwrap()) > 0.9);
        assert!(roc_auc(&truth, prob.as_slice().unwrap()) > 0.95);
    }

    #[test]
    fn test_same_seed_same_forest() {
        let (x, y) = threshold_data(60);
        let mut a = RandomForest::create(&params(4)).unwrap();
        let mut b = RandomForest::create(&params(4)).unwrap();
        a.fit(&x, &y).unwrap();
        b.fit(&x, &y).unwrap();
        assert_eq!(a.predict_proba(&x).unwrap(), b.predict_proba(&x).unwrap());
    }

    #[test]
    fn test_large_min_n_gives_constant_prediction() {
        let (x, y) = threshold_data(30);
        let mut forest = RandomForest::create(&ForestParams {
            mtry: 2,
            trees: 5,
            min_n: 1000,
            seed: 2,
        })
        .unwrap();
        forest.fit(&x, &y).unwrap();
        let prob = forest.predict_proba(&x).unwrap();
        assert!(prob.iter().all(|&p| (p - prob[0]).abs() < 1e-12));
    }

    #[test]
    fn test_zero_trees_rejected() {
        let mut bad = params(0);
        bad.trees = 0;
        assert!(RandomForest::create(&bad).is_err());
    }

    #[test]
    fn test_width_mismatch_fails() {
        let (x, y) = threshold_data(20);
        let mut forest = RandomForest::create(&params(3)).unwrap();
        forest.fit(&x, &y).unwrap();
        let wide = Array2::zeros((2, 3));
        assert!(matches!(forest.predict_proba(&wide), Err(PipelineError::Model(_))));
    }
}
