pub mod config;
pub mod data_loader;
pub mod dataset;
pub mod error;
pub mod evaluation;
pub mod feature_engineering;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod split;
pub mod tuning;

pub use config::Config;
pub use data_loader::{AgeBands, ClinicalSchema, DataLoader};
pub use dataset::{ClassCounts, Dataset};
pub use error::{PipelineError, Result};
pub use evaluation::{last_fit, Evaluation};
pub use feature_engineering::{FittedRecipe, Recipe, UnseenLevelPolicy};
pub use metrics::{Metric, ModelMetrics};
pub use models::{FinalizedModel, FittedModel, HyperParams, Model, ModelSpec};
pub use pipeline::Pipeline;
pub use report::ComparisonReport;
pub use split::{vfold, FoldSet, Split, Splitter};
pub use tuning::{select_best, tune, TuningResults};
