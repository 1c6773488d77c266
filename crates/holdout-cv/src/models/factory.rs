//! Builds pipelines, preprocessors and deconfounders from their identifiers.
use crate::config::{CvConfig, GridSearchLevel, ReducedDim};
use crate::deconfounding::{Augment, NoDeconfounding, Residualize};
use crate::error::{CvError, Result};
use crate::feature_selection::{ScoreFunc, SelectKBest, VarianceThreshold};
use crate::models::estimator_trait::{Deconfounder, Estimator, Identity, Transformer};
use crate::models::knn::{Knn, KnnMode};
use crate::models::nearest_centroid::NearestCentroid;
use crate::models::ridge::Ridge;
use crate::pipeline::{ParamGrid, ParamValue, Pipeline, Stage};
use crate::preprocessing::{ScalerKind, ScalingTransform};
use crate::workflow::WorkflowKind;

pub const ESTIMATORS: [&str; 3] = ["nearest_centroid", "knn", "ridge"];
pub const REDUCERS: [&str; 3] = ["select_k_best", "variance_threshold", "none"];
pub const PREPROCESSORS: [&str; 3] = ["robust_scaler", "standard_scaler", "none"];
pub const DECONFOUNDERS: [&str; 3] = ["residualize", "augment", "none"];

/// Everything needed to build one pipeline template.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineRequest {
    pub workflow: WorkflowKind,
    pub estimator: String,
    pub dim_red_method: String,
    pub preprocessing_method: String,
    pub reduced_dim: usize,
    pub train_set_size: usize,
    pub level: GridSearchLevel,
}

/// Source of the pluggable stages used by the runner.
pub trait PipelineFactory: Send + Sync {
    /// Pipeline template and its hyper-parameter grid.
    fn make_pipeline(&self, request: &PipelineRequest) -> Result<(Pipeline, ParamGrid)>;

    fn preprocessor(&self, id: &str) -> Result<Box<dyn Transformer>>;

    fn deconfounder(&self, id: &str, level: GridSearchLevel) -> Result<Box<dyn Deconfounder>>;

    /// Reject identifiers this factory cannot build, before any data is read.
    fn check(&self, config: &CvConfig) -> Result<()>;
}

/// Factory for the stages shipped with this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPipelineFactory;

impl DefaultPipelineFactory {
    fn estimator(&self, request: &PipelineRequest) -> Result<(Box<dyn Estimator>, ParamGrid)> {
        let level = request.level;
        match (request.estimator.as_str(), request.workflow) {
            ("nearest_centroid", WorkflowKind::Classify) => {
                Ok((Box::new(NearestCentroid::new()), ParamGrid::new()))
            }
            ("knn", workflow) => {
                let mode = match workflow {
                    WorkflowKind::Classify => KnnMode::Classify,
                    WorkflowKind::Regress => KnnMode::Regress,
                };
                let values: &[i64] = match level {
                    GridSearchLevel::None => &[5],
                    GridSearchLevel::Light => &[3, 5, 7],
                    GridSearchLevel::Exhaustive => &[1, 3, 5, 7, 9, 11, 15],
                };
                // more neighbours than training samples is pointless
                let max_k = request.train_set_size.max(1) as i64;
                let mut values: Vec<i64> = values.iter().map(|&k| k.min(max_k)).collect();
                values.dedup();
                let grid = ParamGrid::new().with(
                    Stage::Estimator,
                    "n_neighbors",
                    values.into_iter().map(ParamValue::Int).collect(),
                );
                Ok((Box::new(Knn::new(5, mode)), grid))
            }
            ("ridge", WorkflowKind::Regress) => {
                let values: &[f64] = match level {
                    GridSearchLevel::None => &[1.0],
                    GridSearchLevel::Light => &[0.1, 1.0, 10.0],
                    GridSearchLevel::Exhaustive => &[1e-3, 1e-2, 0.1, 1.0, 10.0, 100.0, 1e3],
                };
                let grid = ParamGrid::new().with(
                    Stage::Estimator,
                    "alpha",
                    values.iter().map(|&a| ParamValue::Float(a)).collect(),
                );
                Ok((Box::new(Ridge::new(1.0)), grid))
            }
            (name, workflow) => Err(CvError::Config(format!(
                "Estimator '{}' is not available for the {} workflow. Valid choices: {:?}",
                name, workflow, ESTIMATORS
            ))),
        }
    }

    fn reducer(&self, request: &PipelineRequest) -> Result<(Box<dyn Transformer>, ParamGrid)> {
        match request.dim_red_method.as_str() {
            "select_k_best" => {
                let score_func = match request.workflow {
                    WorkflowKind::Classify => ScoreFunc::FClassif,
                    WorkflowKind::Regress => ScoreFunc::FRegression,
                };
                let k = request.reduced_dim.max(1);
                let values: Vec<usize> = match request.level {
                    GridSearchLevel::None | GridSearchLevel::Light => vec![k],
                    GridSearchLevel::Exhaustive => {
                        let mut v = vec![(k / 2).max(1), k, k * 2];
                        v.dedup();
                        v
                    }
                };
                let grid = ParamGrid::new().with(
                    Stage::Reducer,
                    "k",
                    values.into_iter().map(|k| ParamValue::Int(k as i64)).collect(),
                );
                Ok((Box::new(SelectKBest::new(k, score_func)), grid))
            }
            "variance_threshold" => {
                let grid = match request.level {
                    GridSearchLevel::Exhaustive => ParamGrid::new().with(
                        Stage::Reducer,
                        "threshold",
                        vec![ParamValue::Float(1e-5), ParamValue::Float(1e-2), ParamValue::Float(0.1)],
                    ),
                    _ => ParamGrid::new(),
                };
                Ok((Box::new(VarianceThreshold::default()), grid))
            }
            "none" => Ok((Box::new(Identity::selecting_all()), ParamGrid::new())),
            other => Err(CvError::Config(format!(
                "Unknown dimensionality reduction method: {}. Valid choices: {:?}",
                other, REDUCERS
            ))),
        }
    }
}

impl PipelineFactory for DefaultPipelineFactory {
    fn make_pipeline(&self, request: &PipelineRequest) -> Result<(Pipeline, ParamGrid)> {
        let preprocessor = self.preprocessor(&request.preprocessing_method)?;
        let (reducer, reducer_grid) = self.reducer(request)?;
        let (estimator, estimator_grid) = self.estimator(request)?;
        let grid = reducer_grid.extend(estimator_grid);
        Ok((Pipeline::new(preprocessor, reducer, estimator), grid))
    }

    fn preprocessor(&self, id: &str) -> Result<Box<dyn Transformer>> {
        match id {
            "robust_scaler" => Ok(Box::new(ScalingTransform::new(ScalerKind::Robust))),
            "standard_scaler" => Ok(Box::new(ScalingTransform::new(ScalerKind::Standard))),
            "none" => Ok(Box::new(Identity::new())),
            other => Err(CvError::Config(format!(
                "Unknown preprocessing method: {}. Valid choices: {:?}",
                other, PREPROCESSORS
            ))),
        }
    }

    fn deconfounder(&self, id: &str, level: GridSearchLevel) -> Result<Box<dyn Deconfounder>> {
        log::trace!("Building deconfounder {} (grid search level {})", id, level);
        match id {
            "residualize" => Ok(Box::new(Residualize)),
            "augment" => Ok(Box::new(Augment)),
            "none" => Ok(Box::new(NoDeconfounding)),
            other => Err(CvError::Config(format!(
                "Unknown deconfounding method: {}. Valid choices: {:?}",
                other, DECONFOUNDERS
            ))),
        }
    }

    fn check(&self, config: &CvConfig) -> Result<()> {
        let request = PipelineRequest {
            workflow: config.workflow,
            estimator: config.estimator.clone(),
            dim_red_method: config.dim_red_method.clone(),
            preprocessing_method: config.preprocessing_method.clone(),
            reduced_dim: 1,
            train_set_size: 1,
            level: config.grid_search_level,
        };
        self.make_pipeline(&request)?;
        self.deconfounder(&config.deconfounder, config.grid_search_level)?;
        Ok(())
    }
}

/// Target dimensionality of the reduction stage, clamped to
/// `[1, num_features]`.
pub fn compute_reduced_dimensionality(
    preset: ReducedDim,
    train_set_size: usize,
    num_features: usize,
) -> usize {
    let n = train_set_size as f64;
    let raw = match preset {
        ReducedDim::Tenth => (n / 10.0).floor() as usize,
        ReducedDim::Sqrt => n.sqrt().floor() as usize,
        ReducedDim::Log2 => n.max(1.0).log2().floor() as usize,
        ReducedDim::All => num_features,
        ReducedDim::Count(count) => count,
        ReducedDim::Fraction(frac) => (frac * num_features as f64).floor() as usize,
    };
    raw.clamp(1, num_features.max(1))
}
