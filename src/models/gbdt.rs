use gbdt::config::Config as GBDTConfig;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use ndarray::{Array1, Array2};

use super::traits::{check_training_data, check_width, Model, ModelFactory};
use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct BoostParams {
    /// Features sampled per tree, turned into a sampling ratio at fit time.
    pub mtry: usize,
    pub trees: usize,
    pub min_n: usize,
    pub tree_depth: usize,
    pub learn_rate: f64,
}

pub struct BoostedTreesModel {
    model: Option<GBDT>,
    params: BoostParams,
    n_features: usize,
}

impl BoostedTreesModel {
    fn config(&self, n_features: usize) -> GBDTConfig {
        let mtry = self.params.mtry.min(n_features).max(1);
        let mut config = GBDTConfig::new();
        config.set_feature_size(n_features);
        config.set_iterations(self.params.trees);
        config.set_max_depth(self.params.tree_depth as u32);
        config.set_min_leaf_size(self.params.min_n);
        config.set_shrinkage(self.params.learn_rate as f32);
        // labels are +1/-1 under this loss
        config.set_loss("LogLikelyhood");
        config.set_debug(false);
        config.set_data_sample_ratio(1.0);
        config.set_feature_sample_ratio(feature_sample_ratio(mtry, n_features));
        config.set_training_optimization_level(2);
        config
    }
}

impl Model for BoostedTreesModel {
    fn name(&self) -> &'static str {
        "boosted_trees"
    }

    fn fit(&mut self, features: &Array2<f64>, labels: &Array1<f64>) -> Result<()> {
        check_training_data(features, labels)?;
        let mut train_data = features.to_data_vec(Some(labels));

        let mut gbdt = GBDT::new(&self.config(features.ncols()));
        gbdt.fit(&mut train_data);

        self.model = Some(gbdt);
        self.n_features = features.ncols();
        Ok(())
    }

    fn predict_proba(&self, features: &Array2<f64>) -> Result<Array1<f64>> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| PipelineError::model("boosted trees model is not fitted"))?;
        check_width(self.n_features, features)?;

        let test_data = features.to_data_vec(None);
        let predictions = model.predict(&test_data);
        Ok(predictions
            .into_iter()
            .map(|p| (p as f64).clamp(0.0, 1.0))
            .collect())
    }
}

impl ModelFactory for BoostedTreesModel {
    type Params = BoostParams;

    fn create(params: &BoostParams) -> Result<Self> {
        if params.trees == 0 || params.tree_depth == 0 || params.mtry == 0 {
            return Err(PipelineError::config(format!(
                "boosted trees need trees, tree_depth and mtry >= 1, got {:?}",
                params
            )));
        }
        if !(params.learn_rate > 0.0 && params.learn_rate.is_finite()) {
            return Err(PipelineError::config(format!(
                "learn_rate must be positive, got {}",
                params.learn_rate
            )));
        }
        Ok(Self {
            model: None,
            params: params.clone(),
            n_features: 0,
        })
    }
}

/// Ratio that gbdt truncates back to exactly `mtry` features.
fn feature_sample_ratio(mtry: usize, n_features: usize) -> f64 {
    ((mtry as f64 + 0.5) / n_features as f64).min(1.0)
}

pub trait IntoDataVec {
    /// Rows in the gbdt crate's format. With labels, 0/1 becomes -1/+1.
    fn to_data_vec(&self, labels: Option<&Array1<f64>>) -> DataVec;
}

impl IntoDataVec for Array2<f64> {
    fn to_data_vec(&self, labels: Option<&Array1<f64>>) -> DataVec {
        self.rows()
            .into_iter()
            .enumerate()
            .map(|(i, row)| {
                let feature: Vec<f32> = row.iter().map(|&v| v as f32).collect();
                match labels {
                    Some(labels) => {
                        let label = if labels[i] == 1.0 { 1.0 } else { -1.0 };
                        Data::new_training_data(feature, 1.0, label, None)
                    }
                    None => Data::new_test_data(feature, None),
                }
            })
            .collect()
    }
}
