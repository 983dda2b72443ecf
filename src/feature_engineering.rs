use polars::prelude::*;
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::dataset::{is_numeric_dtype, Dataset};
use crate::error::{PipelineError, Result};

/// What `apply` does with a categorical level the recipe never saw at fit time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnseenLevelPolicy {
    /// Fail with `PipelineError::UnseenLevel`.
    #[default]
    Error,
    /// Encode the row with every indicator of that field set to zero.
    AllZero,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericStats {
    pub field: String,
    pub mean: f64,
    pub std_dev: f64,
}

/// Observed levels, sorted unless the recipe was given an order for the field.
/// The first one is the reference level and gets no column.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoricalLevels {
    pub field: String,
    pub levels: Vec<String>,
}

impl CategoricalLevels {
    pub fn reference(&self) -> Option<&str> {
        self.levels.first().map(String::as_str)
    }

    pub fn indicator_names(&self) -> Vec<String> {
        self.levels
            .iter()
            .skip(1)
            .map(|level| format!("{}_{}", self.field, level))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum FieldStep {
    Normalize(NumericStats),
    Dummy(CategoricalLevels),
}

/// Unfitted recipe: normalize numeric fields, dummy-encode string fields, leave the outcome alone.
#[derive(Debug, Clone)]
pub struct Recipe {
    outcome: String,
    unseen_levels: UnseenLevelPolicy,
    level_orders: BTreeMap<String, Vec<String>>,
}

impl Recipe {
    pub fn new(outcome: impl Into<String>) -> Self {
        Self {
            outcome: outcome.into(),
            unseen_levels: UnseenLevelPolicy::default(),
            level_orders: BTreeMap::new(),
        }
    }

    pub fn with_unseen_levels(mut self, policy: UnseenLevelPolicy) -> Self {
        self.unseen_levels = policy;
        self
    }

    /// Fixes the level order of an ordered categorical field such as a banded age.
    /// Observed levels missing from `order` follow it in sorted order.
    pub fn with_level_order(mut self, field: impl Into<String>, order: Vec<String>) -> Self {
        self.level_orders.insert(field.into(), order);
        self
    }

    fn levels_of(&self, field: &str, mut observed: Vec<String>) -> Vec<String> {
        observed.sort();
        observed.dedup();
        match self.level_orders.get(field) {
            None => observed,
            Some(order) => {
                let mut levels: Vec<String> = order
                    .iter()
                    .filter(|level| observed.binary_search(*level).is_ok())
                    .cloned()
                    .collect();
                levels.extend(observed.into_iter().filter(|level| !order.contains(level)));
                levels
            }
        }
    }

    pub fn outcome(&self) -> &str {
        &self.outcome
    }

    /// Learns per-field parameters from `train` only.
    pub fn fit(&self, train: &Dataset) -> Result<FittedRecipe> {
        let mut steps = Vec::new();

        for field in train.column_names() {
            if field == self.outcome {
                continue;
            }
            let dtype = train.frame().column(&field)?.dtype().clone();

            if is_numeric_dtype(&dtype) {
                let values = train.numeric_values(&field)?;
                steps.push(FieldStep::Normalize(numeric_stats(&field, &values)?));
            } else if dtype == DataType::String {
                let levels = self.levels_of(&field, train.string_values(&field)?);
                steps.push(FieldStep::Dummy(CategoricalLevels { field, levels }));
            } else {
                return Err(PipelineError::recipe(format!(
                    "field '{}' has unsupported dtype {}",
                    field, dtype
                )));
            }
        }

        debug!(fields = steps.len(), rows = train.len(), "Recipe fitted");
        Ok(FittedRecipe {
            outcome: self.outcome.clone(),
            unseen_levels: self.unseen_levels,
            steps,
        })
    }
}

fn numeric_stats(field: &str, values: &[f64]) -> Result<NumericStats> {
    if values.len() < 2 {
        return Err(PipelineError::recipe(format!(
            "field '{}' needs at least 2 records to estimate its spread, got {}",
            field,
            values.len()
        )));
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std_dev = variance.sqrt();

    if !std_dev.is_finite() || std_dev <= 1e-12 * mean.abs().max(1.0) {
        return Err(PipelineError::recipe(format!(
            "field '{}' has zero variance (constant value {}), cannot be scaled",
            field, mean
        )));
    }

    Ok(NumericStats {
        field: field.to_string(),
        mean,
        std_dev,
    })
}

/// Recipe with parameters bound. Read-only once built.
#[derive(Debug, Clone)]
pub struct FittedRecipe {
    outcome: String,
    unseen_levels: UnseenLevelPolicy,
    steps: Vec<FieldStep>,
}

impl FittedRecipe {
    pub fn numeric_stats(&self) -> impl Iterator<Item = &NumericStats> {
        self.steps.iter().filter_map(|step| match step {
            FieldStep::Normalize(stats) => Some(stats),
            FieldStep::Dummy(_) => None,
        })
    }

    pub fn categorical_levels(&self) -> impl Iterator<Item = &CategoricalLevels> {
        self.steps.iter().filter_map(|step| match step {
            FieldStep::Dummy(levels) => Some(levels),
            FieldStep::Normalize(_) => None,
        })
    }

    /// Output schema: transformed predictors in fit order, then the outcome.
    pub fn output_columns(&self) -> Vec<String> {
        let mut columns = Vec::new();
        for step in &self.steps {
            match step {
                FieldStep::Normalize(stats) => columns.push(stats.field.clone()),
                FieldStep::Dummy(levels) => columns.extend(levels.indicator_names()),
            }
        }
        columns.push(self.outcome.clone());
        columns
    }

    /// Transforms `data` with the fitted parameters. Never refits.
    pub fn apply(&self, data: &Dataset) -> Result<Dataset> {
        let mut columns: Vec<Column> = Vec::new();

        for step in &self.steps {
            match step {
                FieldStep::Normalize(stats) => {
                    let dtype = self.field_dtype(data, &stats.field)?;
                    if !is_numeric_dtype(&dtype) {
                        return Err(PipelineError::recipe(format!(
                            "field '{}' was numeric at fit time but is {} now",
                            stats.field, dtype
                        )));
                    }
                    let scaled: Vec<f64> = data
                        .numeric_values(&stats.field)?
                        .into_iter()
                        .map(|v| (v - stats.mean) / stats.std_dev)
                        .collect();
                    columns.push(Column::from(Series::new(
                        stats.field.as_str().into(),
                        scaled,
                    )));
                }
                FieldStep::Dummy(levels) => {
                    let dtype = self.field_dtype(data, &levels.field)?;
                    if dtype != DataType::String {
                        return Err(PipelineError::recipe(format!(
                            "field '{}' was categorical at fit time but is {} now",
                            levels.field, dtype
                        )));
                    }
                    columns.extend(self.encode(levels, &data.string_values(&levels.field)?)?);
                }
            }
        }

        columns.push(data.frame().column(&self.outcome)?.clone());
        Dataset::new(DataFrame::new(columns)?, self.outcome.clone())
    }

    fn field_dtype(&self, data: &Dataset, field: &str) -> Result<DataType> {
        data.frame()
            .column(field)
            .map(|column| column.dtype().clone())
            .map_err(|_| PipelineError::recipe(format!("field '{}' is missing", field)))
    }

    fn encode(&self, levels: &CategoricalLevels, values: &[String]) -> Result<Vec<Column>> {
        let mut indicators = vec![vec![0.0f64; values.len()]; levels.levels.len()];
        let mut unseen = 0usize;

        for (row, value) in values.iter().enumerate() {
            match levels.levels.iter().position(|level| level == value) {
                Some(index) => indicators[index][row] = 1.0,
                None => match self.unseen_levels {
                    UnseenLevelPolicy::Error => {
                        return Err(PipelineError::UnseenLevel {
                            field: levels.field.clone(),
                            level: value.clone(),
                        })
                    }
                    UnseenLevelPolicy::AllZero => unseen += 1,
                },
            }
        }

        if unseen > 0 {
            warn!(
                field = %levels.field,
                rows = unseen,
                "Unseen levels encoded as all-zero indicators"
            );
        }

        Ok(levels
            .indicator_names()
            .into_iter()
            .zip(indicators.into_iter().skip(1))
            .map(|(name, column)| Column::from(Series::new(name.into(), column)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_loader::AgeBands;

    fn train() -> Dataset {
        let frame = df!(
            "age" => ["[40,50)", "[50,60)", "[60,70)", "[50,60)", "[40,50)", "[60,70)"],
            "serum_sodium" => [130i64, 135, 140, 137, 133, 141],
            "platelets" => [265000.0, 262000.0, 327000.0, 210000.0, 305000.0, 224000.0],
            "smoking" => ["no", "yes", "no", "no", "yes", "no"],
            "DEATH_EVENT" => [1i64, 0, 0, 1, 0, 1]
        )
        .unwrap();
        Dataset::new(frame, "DEATH_EVENT").unwrap()
    }

    fn test_rows(age: &str) -> Dataset {
        let frame = df!(
            "age" => [age, "[40,50)"],
            "serum_sodium" => [136i64, 129],
            "platelets" => [250000.0, 300000.0],
            "smoking" => ["yes", "no"],
            "DEATH_EVENT" => [0i64, 1]
        )
        .unwrap();
        Dataset::new(frame, "DEATH_EVENT").unwrap()
    }

    #[test]
    fn test_train_is_standardized() {
        let data = train();
        let fitted = Recipe::new("DEATH_EVENT").fit(&data).unwrap();
        let baked = fitted.apply(&data).unwrap();

        for field in ["serum_sodium", "platelets"] {
            let values = baked.numeric_values(field).unwrap();
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
            assert!(mean.abs() < 1e-12, "{} mean {}", field, mean);
            assert!((var.sqrt() - 1.0).abs() < 1e-12, "{} std {}", field, var.sqrt());
        }
    }

    #[test]
    fn test_dummy_columns_drop_reference_level() {
        let fitted = Recipe::new("DEATH_EVENT").fit(&train()).unwrap();
        assert_eq!(
            fitted.output_columns(),
            vec![
                "age_[50,60)",
                "age_[60,70)",
                "serum_sodium",
                "platelets",
                "smoking_yes",
                "DEATH_EVENT"
            ]
        );
        let baked = fitted.apply(&train()).unwrap();
        assert_eq!(baked.column_names(), fitted.output_columns());
        assert_eq!(
            baked.numeric_values("smoking_yes").unwrap(),
            vec![0.0, 1.0, 0.0, 0.0, 1.0, 0.0]
        );
        assert_eq!(baked.labels().unwrap(), train().labels().unwrap());
    }

    #[test]
    fn test_test_set_uses_train_parameters() {
        let fitted = Recipe::new("DEATH_EVENT").fit(&train()).unwrap();
        let stats = fitted
            .numeric_stats()
            .find(|s| s.field == "serum_sodium")
            .unwrap()
            .clone();

        let baked = fitted.apply(&test_rows("[60,70)")).unwrap();
        let sodium = baked.numeric_values("serum_sodium").unwrap();
        assert!((sodium[0] - (136.0 - stats.mean) / stats.std_dev).abs() < 1e-12);
        assert_eq!(baked.column_names(), fitted.output_columns());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let fitted = Recipe::new("DEATH_EVENT").fit(&train()).unwrap();
        let before: Vec<NumericStats> = fitted.numeric_stats().cloned().collect();
        let once = fitted.apply(&test_rows("[50,60)")).unwrap();
        let twice = fitted.apply(&test_rows("[50,60)")).unwrap();
        assert!(once.frame().equals(twice.frame()));
        let after: Vec<NumericStats> = fitted.numeric_stats().cloned().collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_constant_field_is_recipe_error() {
        let frame = df!(
            "serum_sodium" => [137.0, 137.0, 137.0],
            "DEATH_EVENT" => [1i64, 0, 1]
        )
        .unwrap();
        let data = Dataset::new(frame, "DEATH_EVENT").unwrap();
        match Recipe::new("DEATH_EVENT").fit(&data) {
            Err(PipelineError::Recipe(msg)) => assert!(msg.contains("serum_sodium")),
            other => panic!("expected recipe error, got {:?}", other),
        }
    }

    #[test]
    fn test_unseen_level_errors_by_default() {
        let fitted = Recipe::new("DEATH_EVENT").fit(&train()).unwrap();
        match fitted.apply(&test_rows("[90,100)")) {
            Err(PipelineError::UnseenLevel { field, level }) => {
                assert_eq!(field, "age");
                assert_eq!(level, "[90,100)");
            }
            other => panic!("expected unseen level error, got {:?}", other),
        }
    }

    #[test]
    fn test_unseen_level_all_zero_policy() {
        let fitted = Recipe::new("DEATH_EVENT")
            .with_unseen_levels(UnseenLevelPolicy::AllZero)
            .fit(&train())
            .unwrap();
        let baked = fitted.apply(&test_rows("[90,100)")).unwrap();
        assert_eq!(baked.numeric_values("age_[50,60)").unwrap(), vec![0.0, 0.0]);
        assert_eq!(baked.numeric_values("age_[60,70)").unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_missing_field_at_apply_is_recipe_error() {
        let fitted = Recipe::new("DEATH_EVENT").fit(&train()).unwrap();
        let frame = df!("age" => ["[40,50)"], "DEATH_EVENT" => [0i64]).unwrap();
        let data = Dataset::new(frame, "DEATH_EVENT").unwrap();
        assert!(matches!(fitted.apply(&data), Err(PipelineError::Recipe(_))));
    }

    #[test]
    fn test_level_order_follows_bands() {
        let bands = AgeBands::new(5.0, 5.0, 105.0).unwrap();
        let frame = df!(
            "age" => ["[100,105)", "[5,10)", "[95,100)", "[5,10)"],
            "DEATH_EVENT" => [1i64, 0, 1, 0]
        )
        .unwrap();
        let data = Dataset::new(frame, "DEATH_EVENT").unwrap();

        let sorted = Recipe::new("DEATH_EVENT").fit(&data).unwrap();
        let levels = sorted.categorical_levels().next().unwrap();
        assert_eq!(levels.reference(), Some("[100,105)"));

        let ordered = Recipe::new("DEATH_EVENT")
            .with_level_order("age", bands.labels())
            .fit(&data)
            .unwrap();
        let levels = ordered.categorical_levels().next().unwrap();
        assert_eq!(levels.reference(), Some("[5,10)"));
        assert_eq!(
            ordered.output_columns(),
            vec!["age_[95,100)", "age_[100,105)", "DEATH_EVENT"]
        );
    }

    #[test]
    fn test_single_training_row_is_recipe_error() {
        let one = train().take(&[0]).unwrap();
        assert!(matches!(
            Recipe::new("DEATH_EVENT").fit(&one),
            Err(PipelineError::Recipe(_))
        ));
    }

    #[test]
    fn test_unsupported_dtype_is_recipe_error() {
        let frame = df!(
            "discharged" => [true, false, true],
            "DEATH_EVENT" => [0i64, 1, 0]
        )
        .unwrap();
        let data = Dataset::new(frame, "DEATH_EVENT").unwrap();
        assert!(matches!(
            Recipe::new("DEATH_EVENT").fit(&data),
            Err(PipelineError::Recipe(_))
        ));
    }
}
