use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use crate::dataset::Dataset;
use crate::error::{PipelineError, Result};

/// Disjoint train/test partition of a dataset.
#[derive(Debug, Clone)]
pub struct Split {
    pub train: Dataset,
    pub test: Dataset,
    pub train_rows: Vec<usize>,
    pub test_rows: Vec<usize>,
}

/// Analysis/assessment rows of one fold, as indices into the training set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub index: usize,
    pub analysis: Vec<usize>,
    pub assessment: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct FoldSet {
    folds: Vec<Fold>,
}

impl FoldSet {
    pub fn folds(&self) -> &[Fold] {
        &self.folds
    }

    pub fn len(&self) -> usize {
        self.folds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folds.is_empty()
    }
}

/// Row indices grouped by stratum, strata in sorted order.
fn group_by_stratum(data: &Dataset, strata: &str) -> Result<BTreeMap<String, Vec<usize>>> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    for (row, key) in data.strata(strata)?.into_iter().enumerate() {
        groups.entry(key).or_default().push(row);
    }
    Ok(groups)
}

/// Seeded stratified train/test splitter.
#[derive(Debug, Clone)]
pub struct Splitter {
    train_fraction: f64,
    strata: String,
    seed: u64,
}

impl Splitter {
    pub fn new(train_fraction: f64, strata: impl Into<String>, seed: u64) -> Result<Self> {
        if !(train_fraction > 0.0 && train_fraction < 1.0) {
            return Err(PipelineError::config(format!(
                "training fraction must be in (0, 1), got {}",
                train_fraction
            )));
        }
        Ok(Self {
            train_fraction,
            strata: strata.into(),
            seed,
        })
    }

    /// Within each stratum, `floor(n * fraction)` shuffled rows go to train.
    #[instrument(skip(self, data), fields(rows = data.len()))]
    pub fn split(&self, data: &Dataset) -> Result<Split> {
        if data.is_empty() {
            return Err(PipelineError::config("cannot split an empty dataset"));
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut train_rows = Vec::new();
        let mut test_rows = Vec::new();

        for (stratum, mut rows) in group_by_stratum(data, &self.strata)? {
            rows.shuffle(&mut rng);
            let n_train = (rows.len() as f64 * self.train_fraction).floor() as usize;
            debug!(%stratum, size = rows.len(), n_train, "Stratum split");
            train_rows.extend_from_slice(&rows[..n_train]);
            test_rows.extend_from_slice(&rows[n_train..]);
        }

        train_rows.sort_unstable();
        test_rows.sort_unstable();

        Ok(Split {
            train: data.take(&train_rows)?,
            test: data.take(&test_rows)?,
            train_rows,
            test_rows,
        })
    }
}

/// Stratified k-fold partition of `train`.
#[instrument(skip(train), fields(rows = train.len()))]
pub fn vfold(train: &Dataset, k: usize, strata: &str, seed: u64) -> Result<FoldSet> {
    if k < 2 {
        return Err(PipelineError::config(format!(
            "number of folds must be at least 2, got {}",
            k
        )));
    }

    let classes = train.class_counts()?;
    if k > classes.minority() {
        return Err(PipelineError::config(format!(
            "{} folds requested but the minority outcome class has {} record(s)",
            k,
            classes.minority()
        )));
    }

    let groups = group_by_stratum(train, strata)?;
    let smallest = groups.values().map(Vec::len).min().unwrap_or(0);
    if k > smallest {
        return Err(PipelineError::config(format!(
            "{} folds requested but the smallest '{}' stratum has {} record(s)",
            k, strata, smallest
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut members: Vec<Vec<usize>> = vec![Vec::new(); k];
    // Continue the round-robin across strata so fold sizes differ by at most one.
    let mut next = 0;
    for (_, mut rows) in groups {
        rows.shuffle(&mut rng);
        for row in rows {
            members[next % k].push(row);
            next += 1;
        }
    }

    let folds = (0..k)
        .map(|index| {
            let mut assessment = members[index].clone();
            assessment.sort_unstable();
            let mut analysis: Vec<usize> = members
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .flat_map(|(_, rows)| rows.iter().copied())
                .collect();
            analysis.sort_unstable();
            Fold {
                index,
                analysis,
                assessment,
            }
        })
        .collect();

    Ok(FoldSet { folds })
}
