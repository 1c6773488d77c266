//! holdout-cv: repeated-holdout cross-validation across multiple feature sets.
//!
//! Every repetition draws a fresh train/test partition of the shared sample
//! universe, evaluates each modality (feature set) on it with a leakage-safe
//! pipeline of imputation, preprocessing, deconfounding, dimensionality
//! reduction and estimation, and records predictions, scores, best
//! hyper-parameters and feature importances. Results are persisted as JSON
//! and summarised per modality.
//!
//! The [`engine::CrossValidationEngine`] is the entry point; datasets and
//! pipeline components are plugged in through the
//! [`data_handling::DatasetCollection`] and [`models::factory::PipelineFactory`]
//! traits.
pub mod config;
pub mod data_handling;
pub mod deconfounding;
pub mod engine;
pub mod error;
pub mod feature_selection;
pub mod math;
pub mod metrics;
pub mod models;
pub mod optimizer;
pub mod pipeline;
pub mod preprocessing;
pub mod report;
pub mod results;
pub mod runner;
pub mod split;
pub mod workflow;

pub use config::{load_config, CvConfig, GridSearchLevel, ImputeStrategy, ReducedDim};
pub use data_handling::{DatasetCollection, MultiDataset, SampleId};
pub use engine::{CrossValidationEngine, Phase, RunOutcome};
pub use error::{CvError, Result};
pub use metrics::ChanceMethod;
pub use results::{ExperimentState, ResultAccumulator, ResultRecord, Summary};
pub use workflow::WorkflowKind;
