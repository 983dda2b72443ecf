use polars::error::PolarsError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Every failure is terminal for the stage that raised it.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("load error: {0}")]
    Load(String),

    #[error("data quality error: {0}")]
    DataQuality(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("recipe error: {0}")]
    Recipe(String),

    #[error("unseen level '{level}' in field '{field}'")]
    UnseenLevel { field: String, level: String },

    #[error("model error: {0}")]
    Model(String),

    #[error("dataframe error: {0}")]
    Polars(#[from] PolarsError),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn recipe(msg: impl Into<String>) -> Self {
        Self::Recipe(msg.into())
    }

    pub fn data_quality(msg: impl Into<String>) -> Self {
        Self::DataQuality(msg.into())
    }

    pub fn model(msg: impl Into<String>) -> Self {
        Self::Model(msg.into())
    }
}
