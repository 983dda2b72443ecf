//! Model specifications: which learner, which hyperparameters are tuned and over what range.

use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::fmt;

use super::gbdt::{BoostParams, BoostedTreesModel};
use super::logistic::{LogisticParams, LogisticRegression};
use super::random_forest::{ForestParams, RandomForest};
use super::traits::{Model, ModelFactory};
use crate::dataset::Dataset;
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParamId {
    Mtry,
    Trees,
    MinN,
    TreeDepth,
    LearnRate,
}

impl ParamId {
    pub fn name(&self) -> &'static str {
        match self {
            ParamId::Mtry => "mtry",
            ParamId::Trees => "trees",
            ParamId::MinN => "min_n",
            ParamId::TreeDepth => "tree_depth",
            ParamId::LearnRate => "learn_rate",
        }
    }
}

/// Valid range and type of a hyperparameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamDomain {
    /// Integer in `[1, number of predictors]`, known only once the recipe is fitted.
    PredictorCount,
    Count { low: usize, high: usize },
    /// Continuous rate in `[10^log10_low, 10^log10_high]`, sampled on the log scale.
    Rate { log10_low: f64, log10_high: f64 },
}

impl ParamDomain {
    fn count_bounds(&self, n_predictors: usize) -> Option<(usize, usize)> {
        match *self {
            ParamDomain::PredictorCount => Some((1, n_predictors.max(1))),
            ParamDomain::Count { low, high } => Some((low, high)),
            ParamDomain::Rate { .. } => None,
        }
    }

    /// Maps a point of `[0, 1)` onto the domain.
    fn from_unit(&self, u: f64, n_predictors: usize) -> ParamValue {
        match self.count_bounds(n_predictors) {
            Some((low, high)) => {
                let span = (high - low + 1) as f64;
                ParamValue::Count((low + (u * span).floor() as usize).min(high))
            }
            None => {
                let (lo, hi) = self.log10_bounds();
                ParamValue::Rate(10f64.powf(lo + u * (hi - lo)))
            }
        }
    }

    fn log10_bounds(&self) -> (f64, f64) {
        match *self {
            ParamDomain::Rate {
                log10_low,
                log10_high,
            } => (log10_low, log10_high),
            _ => (f64::NAN, f64::NAN),
        }
    }

    fn contains(&self, value: ParamValue, n_predictors: usize) -> bool {
        match (self.count_bounds(n_predictors), value) {
            (Some((low, high)), ParamValue::Count(count)) => count >= low && count <= high,
            (None, ParamValue::Rate(rate)) => {
                let (lo, hi) = self.log10_bounds();
                rate > 0.0 && rate.log10() >= lo - 1e-9 && rate.log10() <= hi + 1e-9
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParamValue {
    Count(usize),
    Rate(f64),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Count(v) => write!(f, "{}", v),
            ParamValue::Rate(v) => write!(f, "{:.3e}", v),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamSpec {
    pub id: ParamId,
    pub domain: ParamDomain,
}

impl ParamSpec {
    pub fn new(id: ParamId, domain: ParamDomain) -> Self {
        Self { id, domain }
    }
}

/// One bound value per tuned parameter. Empty for fixed models.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HyperParams(BTreeMap<ParamId, ParamValue>);

impl HyperParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: ParamId, value: ParamValue) -> Self {
        self.0.insert(id, value);
        self
    }

    pub fn get(&self, id: ParamId) -> Option<ParamValue> {
        self.0.get(&id).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ParamId, ParamValue)> + '_ {
        self.0.iter().map(|(id, value)| (*id, *value))
    }

    pub fn count(&self, id: ParamId) -> Result<usize> {
        match self.get(id) {
            Some(ParamValue::Count(v)) => Ok(v),
            Some(ParamValue::Rate(_)) => Err(PipelineError::config(format!(
                "{} must be an integer count",
                id.name()
            ))),
            None => Err(PipelineError::config(format!("{} is not set", id.name()))),
        }
    }

    pub fn rate(&self, id: ParamId) -> Result<f64> {
        match self.get(id) {
            Some(ParamValue::Rate(v)) => Ok(v),
            Some(ParamValue::Count(_)) => Err(PipelineError::config(format!(
                "{} must be a continuous rate",
                id.name()
            ))),
            None => Err(PipelineError::config(format!("{} is not set", id.name()))),
        }
    }
}

impl fmt::Display for HyperParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(none)");
        }
        let parts: Vec<String> = self
            .iter()
            .map(|(id, value)| format!("{}={}", id.name(), value))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpace {
    params: Vec<ParamSpec>,
}

impl SearchSpace {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Space-filling design: each parameter's range is cut into `size` strata and every stratum
    /// is used once. Candidates that coincide after integer rounding are dropped.
    pub fn latin_hypercube<R: Rng>(
        &self,
        size: usize,
        n_predictors: usize,
        rng: &mut R,
    ) -> Vec<HyperParams> {
        let mut columns: Vec<Vec<ParamValue>> = Vec::with_capacity(self.params.len());
        for spec in &self.params {
            let mut strata: Vec<usize> = (0..size).collect();
            strata.shuffle(rng);
            columns.push(
                strata
                    .into_iter()
                    .map(|stratum| {
                        let u = (stratum as f64 + rng.gen::<f64>()) / size as f64;
                        spec.domain.from_unit(u, n_predictors)
                    })
                    .collect(),
            );
        }

        let mut grid: Vec<HyperParams> = Vec::with_capacity(size);
        for i in 0..size {
            let candidate = self
                .params
                .iter()
                .zip(&columns)
                .fold(HyperParams::new(), |acc, (spec, values)| {
                    acc.with(spec.id, values[i])
                });
            if !grid.contains(&candidate) {
                grid.push(candidate);
            }
        }
        grid
    }

    pub fn validate(&self, params: &HyperParams, n_predictors: usize) -> Result<()> {
        for spec in &self.params {
            let value = params.get(spec.id).ok_or_else(|| {
                PipelineError::config(format!("{} is not set", spec.id.name()))
            })?;
            if !spec.domain.contains(value, n_predictors) {
                return Err(PipelineError::config(format!(
                    "{} = {} is outside {:?}",
                    spec.id.name(),
                    value,
                    spec.domain
                )));
            }
        }
        if let Some((id, _)) = params
            .iter()
            .find(|(id, _)| !self.params.iter().any(|spec| spec.id == *id))
        {
            return Err(PipelineError::config(format!(
                "{} is not a tunable parameter of this model",
                id.name()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Classification,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FixedModel {
    LogisticRegression(LogisticParams),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunableKind {
    RandomForest,
    BoostedTrees,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TunableModel {
    pub kind: TunableKind,
    pub space: SearchSpace,
    /// Seed for learners that sample (bootstrap rows, split features).
    pub seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelSpec {
    Fixed(FixedModel),
    Tunable(TunableModel),
}

impl ModelSpec {
    pub fn logistic_regression() -> Self {
        ModelSpec::Fixed(FixedModel::LogisticRegression(LogisticParams::default()))
    }

    pub fn random_forest(seed: u64) -> Self {
        ModelSpec::Tunable(TunableModel {
            kind: TunableKind::RandomForest,
            space: SearchSpace::new(vec![
                ParamSpec::new(ParamId::Mtry, ParamDomain::PredictorCount),
                ParamSpec::new(ParamId::Trees, ParamDomain::Count { low: 1, high: 2000 }),
                ParamSpec::new(ParamId::MinN, ParamDomain::Count { low: 2, high: 40 }),
            ]),
            seed,
        })
    }

    pub fn boosted_trees(seed: u64) -> Self {
        ModelSpec::Tunable(TunableModel {
            kind: TunableKind::BoostedTrees,
            space: SearchSpace::new(vec![
                ParamSpec::new(ParamId::Mtry, ParamDomain::PredictorCount),
                ParamSpec::new(ParamId::Trees, ParamDomain::Count { low: 1, high: 2000 }),
                ParamSpec::new(ParamId::MinN, ParamDomain::Count { low: 2, high: 40 }),
                ParamSpec::new(ParamId::TreeDepth, ParamDomain::Count { low: 1, high: 15 }),
                ParamSpec::new(
                    ParamId::LearnRate,
                    ParamDomain::Rate {
                        log10_low: -10.0,
                        log10_high: -1.0,
                    },
                ),
            ]),
            seed,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ModelSpec::Fixed(FixedModel::LogisticRegression(_)) => "logistic_regression",
            ModelSpec::Tunable(TunableModel {
                kind: TunableKind::RandomForest,
                ..
            }) => "random_forest",
            ModelSpec::Tunable(TunableModel {
                kind: TunableKind::BoostedTrees,
                ..
            }) => "boosted_trees",
        }
    }

    pub fn mode(&self) -> Mode {
        Mode::Classification
    }

    pub fn requires_tuning(&self) -> bool {
        matches!(self, ModelSpec::Tunable(_))
    }

    pub fn search_space(&self) -> Option<&SearchSpace> {
        match self {
            ModelSpec::Fixed(_) => None,
            ModelSpec::Tunable(tunable) => Some(&tunable.space),
        }
    }

    /// Binds `params` to the spec. Fixed models accept only an empty set.
    pub fn finalize(&self, params: &HyperParams, n_predictors: usize) -> Result<FinalizedModel> {
        match self {
            ModelSpec::Fixed(FixedModel::LogisticRegression(settings)) => {
                if !params.is_empty() {
                    return Err(PipelineError::config(format!(
                        "logistic_regression has no tunable parameters, got {}",
                        params
                    )));
                }
                Ok(FinalizedModel::LogisticRegression(settings.clone()))
            }
            ModelSpec::Tunable(tunable) => {
                tunable.space.validate(params, n_predictors)?;
                Ok(match tunable.kind {
                    TunableKind::RandomForest => FinalizedModel::RandomForest(ForestParams {
                        mtry: params.count(ParamId::Mtry)?,
                        trees: params.count(ParamId::Trees)?,
                        min_n: params.count(ParamId::MinN)?,
                        seed: tunable.seed,
                    }),
                    TunableKind::BoostedTrees => FinalizedModel::BoostedTrees(BoostParams {
                        mtry: params.count(ParamId::Mtry)?,
                        trees: params.count(ParamId::Trees)?,
                        min_n: params.count(ParamId::MinN)?,
                        tree_depth: params.count(ParamId::TreeDepth)?,
                        learn_rate: params.rate(ParamId::LearnRate)?,
                    }),
                })
            }
        }
    }
}

/// A spec with every hyperparameter bound, ready for a single fit.
#[derive(Debug, Clone, PartialEq)]
pub enum FinalizedModel {
    LogisticRegression(LogisticParams),
    RandomForest(ForestParams),
    BoostedTrees(BoostParams),
}

impl FinalizedModel {
    pub fn name(&self) -> &'static str {
        match self {
            FinalizedModel::LogisticRegression(_) => "logistic_regression",
            FinalizedModel::RandomForest(_) => "random_forest",
            FinalizedModel::BoostedTrees(_) => "boosted_trees",
        }
    }

    pub fn hyperparams(&self) -> HyperParams {
        match self {
            FinalizedModel::LogisticRegression(_) => HyperParams::new(),
            FinalizedModel::RandomForest(p) => HyperParams::new()
                .with(ParamId::Mtry, ParamValue::Count(p.mtry))
                .with(ParamId::Trees, ParamValue::Count(p.trees))
                .with(ParamId::MinN, ParamValue::Count(p.min_n)),
            FinalizedModel::BoostedTrees(p) => HyperParams::new()
                .with(ParamId::Mtry, ParamValue::Count(p.mtry))
                .with(ParamId::Trees, ParamValue::Count(p.trees))
                .with(ParamId::MinN, ParamValue::Count(p.min_n))
                .with(ParamId::TreeDepth, ParamValue::Count(p.tree_depth))
                .with(ParamId::LearnRate, ParamValue::Rate(p.learn_rate)),
        }
    }

    fn build(&self) -> Result<Box<dyn Model>> {
        Ok(match self {
            FinalizedModel::LogisticRegression(p) => Box::new(LogisticRegression::create(p)?),
            FinalizedModel::RandomForest(p) => Box::new(RandomForest::create(p)?),
            FinalizedModel::BoostedTrees(p) => Box::new(BoostedTreesModel::create(p)?),
        })
    }

    /// Fits a fresh learner on an encoded dataset.
    pub fn fit(&self, data: &Dataset) -> Result<FittedModel> {
        let (x, y) = data.design_matrix()?;
        let mut model = self.build()?;
        model.fit(&x, &y)?;
        Ok(FittedModel {
            model,
            features: data.feature_names(),
        })
    }
}

pub struct FittedModel {
    model: Box<dyn Model>,
    features: Vec<String>,
}

impl FittedModel {
    pub fn name(&self) -> &'static str {
        self.model.name()
    }

    /// Positive-class probability per row. `data` must carry the columns seen at fit time.
    pub fn predict_proba(&self, data: &Dataset) -> Result<Vec<f64>> {
        if data.feature_names() != self.features {
            return Err(PipelineError::model(format!(
                "{} was fitted on columns {:?}, got {:?}",
                self.name(),
                self.features,
                data.feature_names()
            )));
        }
        let (x, _) = data.design_matrix()?;
        Ok(self.model.predict_proba(&x)?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use polars::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_spec_capabilities() {
        let logistic = ModelSpec::logistic_regression();
        assert_eq!(logistic.name(), "logistic_regression");
        assert_eq!(logistic.mode(), Mode::Classification);
        assert!(!logistic.requires_tuning());
        assert!(logistic.search_space().is_none());

        let forest = ModelSpec::random_forest(1);
        assert!(forest.requires_tuning());
        let ids: Vec<ParamId> = forest
            .search_space()
            .unwrap()
            .params()
            .iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec![ParamId::Mtry, ParamId::Trees, ParamId::MinN]);

        let boosted = ModelSpec::boosted_trees(1);
        assert_eq!(boosted.search_space().unwrap().params().len(), 5);
    }

    #[test]
    fn test_latin_hypercube_covers_each_stratum() {
        let space = SearchSpace::new(vec![
            ParamSpec::new(ParamId::Trees, ParamDomain::Count { low: 1, high: 1000 }),
            ParamSpec::new(
                ParamId::LearnRate,
                ParamDomain::Rate {
                    log10_low: -4.0,
                    log10_high: -1.0,
                },
            ),
        ]);
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let grid = space.latin_hypercube(10, 5, &mut rng);
        assert_eq!(grid.len(), 10);

        let mut buckets: Vec<usize> = grid
            .iter()
            .map(|p| (p.count(ParamId::Trees).unwrap() - 1) / 100)
            .collect();
        buckets.sort_unstable();
        assert_eq!(buckets, (0..10).collect::<Vec<_>>());

        for p in &grid {
            space.validate(p, 5).unwrap();
        }

        let mut again = ChaCha8Rng::seed_from_u64(42);
        assert_eq!(space.latin_hypercube(10, 5, &mut again), grid);
    }

    #[test]
    fn test_latin_hypercube_drops_duplicates() {
        let space = SearchSpace::new(vec![ParamSpec::new(
            ParamId::Mtry,
            ParamDomain::PredictorCount,
        )]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let grid = space.latin_hypercube(20, 3, &mut rng);
        assert_eq!(grid.len(), 3);
    }

    #[test]
    fn test_finalize_validates_ranges() {
        let forest = ModelSpec::random_forest(7);
        let good = HyperParams::new()
            .with(ParamId::Mtry, ParamValue::Count(3))
            .with(ParamId::Trees, ParamValue::Count(100))
            .with(ParamId::MinN, ParamValue::Count(5));
        let finalized = forest.finalize(&good, 10).unwrap();
        assert_eq!(
            finalized,
            FinalizedModel::RandomForest(ForestParams {
                mtry: 3,
                trees: 100,
                min_n: 5,
                seed: 7
            })
        );
        assert_eq!(finalized.hyperparams(), good);

        let too_many = good.clone().with(ParamId::Mtry, ParamValue::Count(11));
        assert!(matches!(
            forest.finalize(&too_many, 10),
            Err(PipelineError::Config(_))
        ));

        let wrong_type = good.clone().with(ParamId::Trees, ParamValue::Rate(0.5));
        assert!(forest.finalize(&wrong_type, 10).is_err());

        let extra = good.with(ParamId::LearnRate, ParamValue::Rate(0.01));
        assert!(forest.finalize(&extra, 10).is_err());
    }

    #[test]
    fn test_fixed_model_rejects_params() {
        let logistic = ModelSpec::logistic_regression();
        assert!(logistic.finalize(&HyperParams::new(), 4).is_ok());
        let params = HyperParams::new().with(ParamId::Trees, ParamValue::Count(3));
        assert!(logistic.finalize(&params, 4).is_err());
    }

    #[test]
    fn test_fitted_model_checks_columns() {
        let frame = df!(
            "a" => [-1.0, -0.5, 0.5, 1.0],
            "y" => [0i64, 0, 1, 1]
        )
        .unwrap();
        let data = Dataset::new(frame, "y").unwrap();
        let fitted = ModelSpec::logistic_regression()
            .finalize(&HyperParams::new(), 1)
            .unwrap()
            .fit(&data)
            .unwrap();
        assert_eq!(fitted.predict_proba(&data).unwrap().len(), 4);

        let renamed = df!("b" => [0.0], "y" => [0i64]).unwrap();
        let other = Dataset::new(renamed, "y").unwrap();
        assert!(matches!(
            fitted.predict_proba(&other),
            Err(PipelineError::Model(_))
        ));
    }
}
