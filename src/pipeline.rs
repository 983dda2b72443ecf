use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::data_loader::{ClinicalSchema, DataLoader};
use crate::error::Result;
use crate::evaluation::last_fit;
use crate::feature_engineering::Recipe;
use crate::models::ModelSpec;
use crate::report::ComparisonReport;
use crate::split::{vfold, Splitter};
use crate::tuning::{select_best, tune};

/// Cross-validation candidates listed per model in the report.
const REPORT_TOP_N: usize = 5;

/// Load, split, tune, select and test every model described by the config.
pub struct Pipeline {
    config: Config,
    schema: ClinicalSchema,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            schema: ClinicalSchema::heart_failure(),
        }
    }

    /// Seeds of the sampling learners and of each grid derive from the split seed.
    fn model_specs(&self) -> Vec<ModelSpec> {
        let seed = self.config.split.seed;
        vec![
            ModelSpec::logistic_regression(),
            ModelSpec::random_forest(seed.wrapping_add(1)),
            ModelSpec::boosted_trees(seed.wrapping_add(2)),
        ]
    }

    #[instrument(skip_all, fields(data_path = %self.config.data_path.display()))]
    pub fn run(&self) -> Result<ComparisonReport> {
        let config = &self.config;
        let bands = config.age_bands.to_bands()?;
        let data = DataLoader::new(&config.data_path, self.schema.clone(), bands).load()?;

        let splitter = Splitter::new(
            config.split.train_fraction,
            config.split.strata.as_str(),
            config.split.seed,
        )?;
        let split = splitter.split(&data)?;
        info!(
            train = split.train.len(),
            test = split.test.len(),
            "Train/test split made"
        );

        let folds = vfold(
            &split.train,
            config.split.folds,
            &config.split.strata,
            config.split.seed,
        )?;

        let recipe = Recipe::new(self.schema.outcome.as_str())
            .with_unseen_levels(config.recipe.unseen_levels)
            .with_level_order(self.schema.age.as_str(), bands.labels());
        let fitted = recipe.fit(&split.train)?;
        let n_predictors = fitted.output_columns().len() - 1;
        for levels in fitted.categorical_levels() {
            debug!(
                field = %levels.field,
                reference = levels.reference().unwrap_or("(none)"),
                levels = levels.levels.len(),
                "Categorical field encoded"
            );
        }
        info!(n_predictors, "Recipe fitted on training set");

        let metric = config.tuning.metric;
        let mut report = ComparisonReport::new(metric, REPORT_TOP_N);
        for (i, spec) in self.model_specs().iter().enumerate() {
            let grid_seed = config.split.seed.wrapping_add(100 + i as u64);
            let results = tune(
                spec,
                &recipe,
                &split.train,
                &folds,
                config.tuning.grid_size,
                grid_seed,
            )?;
            let best = select_best(&results, metric)?;
            let model = spec.finalize(&best, n_predictors)?;
            let evaluation = last_fit(&model, &fitted, &split)?;
            report.push(results, evaluation);
        }

        if let Some(best) = report.best() {
            info!(model = %best.evaluation.model, %metric, "Pipeline finished");
        }
        Ok(report)
    }
}
