use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::data_loader::AgeBands;
use crate::error::{PipelineError, Result};
use crate::feature_engineering::UnseenLevelPolicy;
use crate::metrics::Metric;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub data_path: PathBuf,
    #[serde(default)]
    pub split: SplitParams,
    #[serde(default)]
    pub tuning: TuningParams,
    #[serde(default)]
    pub recipe: RecipeParams,
    #[serde(default)]
    pub age_bands: AgeBandParams,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SplitParams {
    pub seed: u64,
    pub train_fraction: f64,
    pub strata: String,
    pub folds: usize,
}

impl Default for SplitParams {
    fn default() -> Self {
        Self {
            seed: 42,
            train_fraction: 0.75,
            strata: "DEATH_EVENT".to_string(),
            folds: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TuningParams {
    pub grid_size: usize,
    pub metric: Metric,
}

impl Default for TuningParams {
    fn default() -> Self {
        Self {
            grid_size: 20,
            metric: Metric::RocAuc,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecipeParams {
    pub unseen_levels: UnseenLevelPolicy,
}

impl Default for RecipeParams {
    /// Rare age bands can land entirely in one fold's assessment set.
    fn default() -> Self {
        Self {
            unseen_levels: UnseenLevelPolicy::AllZero,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AgeBandParams {
    pub start: f64,
    pub width: f64,
    pub end: f64,
}

impl Default for AgeBandParams {
    fn default() -> Self {
        Self {
            start: 30.0,
            width: 10.0,
            end: 100.0,
        }
    }
}

impl AgeBandParams {
    pub fn to_bands(&self) -> Result<AgeBands> {
        AgeBands::new(self.start, self.width, self.end)
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| {
            PipelineError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)
            .map_err(|e| PipelineError::config(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let split = &self.split;
        if !(split.train_fraction > 0.0 && split.train_fraction < 1.0) {
            return Err(PipelineError::config(format!(
                "split.train_fraction must be in (0, 1), got {}",
                split.train_fraction
            )));
        }
        if split.folds < 2 {
            return Err(PipelineError::config(format!(
                "split.folds must be at least 2, got {}",
                split.folds
            )));
        }
        if split.strata.is_empty() {
            return Err(PipelineError::config("split.strata must name a column"));
        }
        if self.tuning.grid_size == 0 {
            return Err(PipelineError::config("tuning.grid_size must be at least 1"));
        }
        self.age_bands.to_bands()?;
        Ok(())
    }
}
