use tracing::{info, instrument};

use crate::dataset::ClassCounts;
use crate::error::Result;
use crate::feature_engineering::FittedRecipe;
use crate::metrics::{ConfusionMatrix, ModelMetrics};
use crate::models::{FinalizedModel, HyperParams};
use crate::split::Split;

/// Held-out result of a finalized model. Built once by `last_fit`.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub model: String,
    pub params: HyperParams,
    pub metrics: ModelMetrics,
    pub confusion: ConfusionMatrix,
    pub test_balance: ClassCounts,
}

/// Fits `model` once on the encoded training set and scores the encoded test set.
/// `recipe` must have been fitted on `split.train`.
#[instrument(skip_all, fields(model = model.name()))]
pub fn last_fit(model: &FinalizedModel, recipe: &FittedRecipe, split: &Split) -> Result<Evaluation> {
    let train = recipe.apply(&split.train)?;
    let test = recipe.apply(&split.test)?;

    let fitted = model.fit(&train)?;
    let prob = fitted.predict_proba(&test)?;
    let truth = test.labels()?;

    let evaluation = Evaluation {
        model: model.name().to_string(),
        params: model.hyperparams(),
        metrics: ModelMetrics::compute(&truth, &prob),
        confusion: ConfusionMatrix::from_predictions(&truth, &prob),
        test_balance: ClassCounts::from_labels(&truth),
    };
    info!(
        accuracy = evaluation.metrics.accuracy,
        roc_auc = evaluation.metrics.roc_auc,
        "Test set scored"
    );
    Ok(evaluation)
}
