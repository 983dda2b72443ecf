use ndarray::{Array1, Array2};

use crate::error::{PipelineError, Result};

/// Binary classifier over a dense, already-encoded feature matrix. Labels are 0.0/1.0.
pub trait Model {
    fn name(&self) -> &'static str;
    fn fit(&mut self, features: &Array2<f64>, labels: &Array1<f64>) -> Result<()>;
    /// Probability of class 1 for every row.
    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>>;
}

pub trait ModelFactory {
    type Params;

    fn create(params: &Self::Params) -> Result<Self>
    where
        Self: Sized;
}

pub(crate) fn check_training_data(features: &Array2<f64>, labels: &Array1<f64>) -> Result<()> {
    if features.nrows() != labels.len() {
        return Err(PipelineError::model(format!(
            "{} feature rows but {} labels",
            features.nrows(),
            labels.len()
        )));
    }
    if features.nrows() == 0 || features.ncols() == 0 {
        return Err(PipelineError::model(format!(
            "cannot fit on a {}x{} feature matrix",
            features.nrows(),
            features.ncols()
        )));
    }
    if let Some(bad) = labels.iter().find(|&&y| y != 0.0 && y != 1.0) {
        return Err(PipelineError::model(format!("label {} is not 0 or 1", bad)));
    }
    Ok(())
}

pub(crate) fn check_width(expected: usize, features: &Array2<f64>) -> Result<()> {
    if features.ncols() != expected {
        return Err(PipelineError::model(format!(
            "model was fitted on {} features, got {}",
            expected,
            features.ncols()
        )));
    }
    Ok(())
}
