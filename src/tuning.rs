use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, instrument};

use crate::dataset::Dataset;
use crate::error::{PipelineError, Result};
use crate::feature_engineering::Recipe;
use crate::metrics::{accuracy, roc_auc, Metric, MetricEstimate};
use crate::models::{HyperParams, ModelSpec};
use crate::split::FoldSet;

/// Resampled performance of one hyperparameter combination.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub config: String,
    pub params: HyperParams,
    pub accuracy: MetricEstimate,
    pub roc_auc: MetricEstimate,
}

impl Candidate {
    pub fn estimate(&self, metric: Metric) -> MetricEstimate {
        match metric {
            Metric::Accuracy => self.accuracy,
            Metric::RocAuc => self.roc_auc,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TuningResults {
    pub model: String,
    /// In grid order.
    pub candidates: Vec<Candidate>,
}

impl TuningResults {
    /// Best first by mean `metric`; equal means keep grid order, NaN sorts last.
    pub fn ranked(&self, metric: Metric) -> Vec<&Candidate> {
        let key = |c: &Candidate| {
            let mean = c.estimate(metric).mean;
            if mean.is_nan() {
                f64::NEG_INFINITY
            } else {
                mean
            }
        };
        let mut ranked: Vec<&Candidate> = self.candidates.iter().collect();
        ranked.sort_by(|a, b| key(b).total_cmp(&key(a)));
        ranked
    }

    pub fn show_best(&self, metric: Metric, n: usize) -> Vec<&Candidate> {
        self.ranked(metric).into_iter().take(n).collect()
    }
}

/// Folds with the recipe fitted on each analysis set and applied to both halves.
fn prepare_folds(recipe: &Recipe, train: &Dataset, folds: &FoldSet) -> Result<Vec<(Dataset, Dataset)>> {
    folds
        .folds()
        .iter()
        .map(|fold| {
            let analysis = train.take(&fold.analysis)?;
            let assessment = train.take(&fold.assessment)?;
            let fitted = recipe.fit(&analysis)?;
            Ok((fitted.apply(&analysis)?, fitted.apply(&assessment)?))
        })
        .collect()
}

/// Cross-validated grid search. Fixed specs are resampled once with no parameters.
#[instrument(skip_all, fields(model = spec.name(), folds = folds.len(), grid_size = grid_size))]
pub fn tune(
    spec: &ModelSpec,
    recipe: &Recipe,
    train: &Dataset,
    folds: &FoldSet,
    grid_size: usize,
    seed: u64,
) -> Result<TuningResults> {
    if grid_size == 0 {
        return Err(PipelineError::config("grid size must be at least 1"));
    }
    if folds.is_empty() {
        return Err(PipelineError::config("tuning needs at least one fold"));
    }

    let prepared = prepare_folds(recipe, train, folds)?;
    // mtry's upper bound counts predictors after encoding
    let n_predictors = recipe.fit(train)?.output_columns().len() - 1;

    let grid = match spec.search_space() {
        None => vec![HyperParams::new()],
        Some(space) => {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            space.latin_hypercube(grid_size, n_predictors, &mut rng)
        }
    };
    info!(candidates = grid.len(), n_predictors, "Tuning grid built");

    let mut candidates = Vec::with_capacity(grid.len());
    for (i, params) in grid.into_iter().enumerate() {
        let model = spec.finalize(&params, n_predictors)?;
        let mut accuracies = Vec::with_capacity(prepared.len());
        let mut aucs = Vec::with_capacity(prepared.len());

        for (analysis, assessment) in &prepared {
            let fitted = model.fit(analysis)?;
            let prob = fitted.predict_proba(assessment)?;
            let truth = assessment.labels()?;
            accuracies.push(accuracy(&truth, &prob));
            aucs.push(roc_auc(&truth, &prob));
        }

        let candidate = Candidate {
            config: format!("Model{:02}", i + 1),
            params,
            accuracy: MetricEstimate::from_values(&accuracies),
            roc_auc: MetricEstimate::from_values(&aucs),
        };
        debug!(
            config = %candidate.config,
            params = %candidate.params,
            accuracy = candidate.accuracy.mean,
            roc_auc = candidate.roc_auc.mean,
            "Candidate resampled"
        );
        candidates.push(candidate);
    }

    Ok(TuningResults {
        model: spec.name().to_string(),
        candidates,
    })
}

/// Parameters of the first candidate, in grid order, with the highest mean `metric`.
pub fn select_best(results: &TuningResults, metric: Metric) -> Result<HyperParams> {
    let mut best: Option<(&Candidate, f64)> = None;
    for candidate in &results.candidates {
        let mean = candidate.estimate(metric).mean;
        if mean.is_nan() {
            continue;
        }
        if best.map_or(true, |(_, top)| mean > top) {
            best = Some((candidate, mean));
        }
    }

    let (candidate, mean) = best.ok_or_else(|| {
        PipelineError::config(format!(
            "no {} candidate has a finite {}",
            results.model, metric
        ))
    })?;
    info!(model = %results.model, config = %candidate.config, %metric, mean, "Best candidate selected");
    Ok(candidate.params.clone())
}
