use ndarray::{Array1, Array2};
use polars::prelude::*;

use crate::error::{PipelineError, Result};

/// Counts of each outcome class. Class 1 is the positive (event) class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClassCounts {
    pub negative: usize,
    pub positive: usize,
}

impl ClassCounts {
    pub fn from_labels(labels: &[f64]) -> Self {
        let positive = labels.iter().filter(|&&y| y == 1.0).count();
        Self {
            negative: labels.len() - positive,
            positive,
        }
    }

    pub fn total(&self) -> usize {
        self.negative + self.positive
    }

    pub fn minority(&self) -> usize {
        self.negative.min(self.positive)
    }

    pub fn positive_rate(&self) -> f64 {
        if self.total() == 0 {
            return f64::NAN;
        }
        self.positive as f64 / self.total() as f64
    }
}

/// An ordered set of records sharing one schema, with a designated binary outcome column.
#[derive(Debug, Clone)]
pub struct Dataset {
    frame: DataFrame,
    outcome: String,
}

impl Dataset {
    pub fn new(frame: DataFrame, outcome: impl Into<String>) -> Result<Self> {
        let outcome = outcome.into();
        if frame.get_column_index(&outcome).is_none() {
            return Err(PipelineError::data_quality(format!(
                "outcome column '{}' is not present",
                outcome
            )));
        }
        Ok(Self { frame, outcome })
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn into_frame(self) -> DataFrame {
        self.frame
    }

    pub fn outcome(&self) -> &str {
        &self.outcome
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    pub fn column_names(&self) -> Vec<String> {
        self.frame
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .collect()
    }

    /// Every column except the outcome, in frame order.
    pub fn feature_names(&self) -> Vec<String> {
        self.column_names()
            .into_iter()
            .filter(|name| name != &self.outcome)
            .collect()
    }

    /// Rows at `rows`, in the given order.
    pub fn take(&self, rows: &[usize]) -> Result<Self> {
        let idx: Vec<IdxSize> = rows.iter().map(|&row| row as IdxSize).collect();
        let idx = IdxCa::from_vec("rows".into(), idx);
        let frame = self.frame.take(&idx)?;
        Ok(Self {
            frame,
            outcome: self.outcome.clone(),
        })
    }

    /// Outcome as 0.0/1.0; anything else is a data quality failure.
    pub fn labels(&self) -> Result<Vec<f64>> {
        let series = self
            .frame
            .column(&self.outcome)?
            .as_materialized_series()
            .cast(&DataType::Float64)?;
        series
            .f64()?
            .into_iter()
            .enumerate()
            .map(|(row, value)| match value {
                Some(v) if v == 0.0 || v == 1.0 => Ok(v),
                Some(v) => Err(PipelineError::data_quality(format!(
                    "outcome '{}' has non-binary value {} at row {}",
                    self.outcome, v, row
                ))),
                None => Err(PipelineError::data_quality(format!(
                    "outcome '{}' is missing or non-numeric at row {}",
                    self.outcome, row
                ))),
            })
            .collect()
    }

    pub fn class_counts(&self) -> Result<ClassCounts> {
        Ok(ClassCounts::from_labels(&self.labels()?))
    }

    /// Values of `field` rendered as strings, used as stratification keys.
    pub fn strata(&self, field: &str) -> Result<Vec<String>> {
        if self.frame.get_column_index(field).is_none() {
            return Err(PipelineError::config(format!(
                "stratification field '{}' is not a column",
                field
            )));
        }
        let series = self
            .frame
            .column(field)?
            .as_materialized_series()
            .cast(&DataType::String)?;
        series
            .str()?
            .into_iter()
            .enumerate()
            .map(|(row, value)| {
                value.map(str::to_string).ok_or_else(|| {
                    PipelineError::data_quality(format!(
                        "stratification field '{}' is missing at row {}",
                        field, row
                    ))
                })
            })
            .collect()
    }

    pub(crate) fn numeric_values(&self, field: &str) -> Result<Vec<f64>> {
        let series = self
            .frame
            .column(field)?
            .as_materialized_series()
            .cast(&DataType::Float64)?;
        series
            .f64()?
            .into_iter()
            .enumerate()
            .map(|(row, value)| {
                value.ok_or_else(|| {
                    PipelineError::data_quality(format!(
                        "field '{}' is missing at row {}",
                        field, row
                    ))
                })
            })
            .collect()
    }

    pub(crate) fn string_values(&self, field: &str) -> Result<Vec<String>> {
        let column = self.frame.column(field)?;
        column
            .as_materialized_series()
            .str()?
            .into_iter()
            .enumerate()
            .map(|(row, value)| {
                value.map(str::to_string).ok_or_else(|| {
                    PipelineError::data_quality(format!(
                        "field '{}' is missing at row {}",
                        field, row
                    ))
                })
            })
            .collect()
    }

    /// Feature matrix (every non-outcome column, which must all be numeric) and label vector.
    pub fn design_matrix(&self) -> Result<(Array2<f64>, Array1<f64>)> {
        let features = self.feature_names();
        let mut x = Array2::zeros((self.len(), features.len()));

        for (j, name) in features.iter().enumerate() {
            let dtype = self.frame.column(name)?.dtype().clone();
            if !is_numeric_dtype(&dtype) {
                return Err(PipelineError::model(format!(
                    "field '{}' has dtype {} and must be encoded before fitting",
                    name, dtype
                )));
            }
            let values = self.numeric_values(name)?;
            for (i, v) in values.into_iter().enumerate() {
                x[[i, j]] = v;
            }
        }

        let y = Array1::from_vec(self.labels()?);
        Ok((x, y))
    }
}

pub(crate) fn is_numeric_dtype(dtype: &DataType) -> bool {
    matches!(
        dtype,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> Dataset {
        let frame = df!(
            "x" => [1.0, 2.0, 3.0, 4.0],
            "group" => ["a", "b", "a", "b"],
            "y" => [0i64, 1, 0, 1]
        )
        .unwrap();
        Dataset::new(frame, "y").unwrap()
    }

    #[test]
    fn test_missing_outcome_column_rejected() {
        let frame = df!("x" => [1.0, 2.0]).unwrap();
        assert!(matches!(
            Dataset::new(frame, "y"),
            Err(PipelineError::DataQuality(_))
        ));
    }

    #[test]
    fn test_take_preserves_requested_order() {
        let data = small();
        let subset = data.take(&[3, 0]).unwrap();
        assert_eq!(subset.numeric_values("x").unwrap(), vec![4.0, 1.0]);
        assert_eq!(subset.outcome(), "y");
    }

    #[test]
    fn test_class_counts() {
        let counts = small().class_counts().unwrap();
        assert_eq!(counts, ClassCounts { negative: 2, positive: 2 });
        assert_eq!(counts.minority(), 2);
        assert!((counts.positive_rate() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_non_binary_outcome_rejected() {
        let frame = df!("x" => [1.0, 2.0], "y" => [0i64, 2]).unwrap();
        let data = Dataset::new(frame, "y").unwrap();
        assert!(matches!(data.labels(), Err(PipelineError::DataQuality(_))));
    }

    #[test]
    fn test_design_matrix_requires_encoded_features() {
        assert!(matches!(
            small().design_matrix(),
            Err(PipelineError::Model(_))
        ));

        let frame = df!("x" => [1.0, 2.0], "z" => [3i64, 4], "y" => [0i64, 1]).unwrap();
        let (x, y) = Dataset::new(frame, "y").unwrap().design_matrix().unwrap();
        assert_eq!(x.dim(), (2, 2));
        assert_eq!(x[[1, 1]], 4.0);
        assert_eq!(y.to_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn test_strata_renders_values() {
        assert_eq!(small().strata("y").unwrap(), vec!["0", "1", "0", "1"]);
        assert!(matches!(
            small().strata("nope"),
            Err(PipelineError::Config(_))
        ));
    }
}
