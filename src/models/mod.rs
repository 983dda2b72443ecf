pub mod gbdt;
pub mod logistic;
pub mod random_forest;
pub mod spec;
pub mod traits;

pub use self::gbdt::{BoostParams, BoostedTreesModel};
pub use logistic::{LogisticParams, LogisticRegression};
pub use random_forest::{ForestParams, RandomForest};
pub use spec::{
    FinalizedModel, FittedModel, FixedModel, HyperParams, Mode, ModelSpec, ParamDomain, ParamId,
    ParamSpec, ParamValue, SearchSpace, TunableKind, TunableModel,
};
pub use traits::{Model, ModelFactory};
