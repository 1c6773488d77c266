//! Experiment configuration.
//!
//! `CvConfig` mirrors what a user would put in a JSON config file; all fields
//! have defaults so partial files are accepted. Validation happens in
//! [`CvConfig::validate`] before any split is drawn.
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CvError, Result};
use crate::workflow::WorkflowKind;

/// File name of the consolidated result artifact inside `out_dir`.
pub const RESULTS_FILE_NAME: &str = "cv_results.json";
/// File name of the per-repetition checkpoint inside `out_dir`.
pub const CHECKPOINT_FILE_NAME: &str = "cv_results_checkpoint.json";
/// Default number of inner repeated-holdout splits used by the optimizer.
pub const INNER_CV_NUM_SPLITS: usize = 10;

/// How many hyper-parameter values are explored during inner optimization.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum GridSearchLevel {
    None,
    #[default]
    Light,
    Exhaustive,
}

impl FromStr for GridSearchLevel {
    type Err = CvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "none" => Ok(GridSearchLevel::None),
            "light" => Ok(GridSearchLevel::Light),
            "exhaustive" => Ok(GridSearchLevel::Exhaustive),
            _ => Err(CvError::Config(format!(
                "Unrecognized level of grid search: {}. Valid choices: none, light, exhaustive",
                s
            ))),
        }
    }
}

impl fmt::Display for GridSearchLevel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            GridSearchLevel::None => "none",
            GridSearchLevel::Light => "light",
            GridSearchLevel::Exhaustive => "exhaustive",
        };
        write!(f, "{}", name)
    }
}

/// Strategy for filling missing (non-finite) feature values.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImputeStrategy {
    /// Refuse to run on data with missing values.
    #[default]
    Raise,
    Mean,
    Median,
    MostFrequent,
}

impl FromStr for ImputeStrategy {
    type Err = CvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "raise" => Ok(ImputeStrategy::Raise),
            "mean" => Ok(ImputeStrategy::Mean),
            "median" => Ok(ImputeStrategy::Median),
            "most_frequent" => Ok(ImputeStrategy::MostFrequent),
            _ => Err(CvError::Config(format!("Unknown imputation strategy: {}", s))),
        }
    }
}

/// Preset for the target dimensionality of the reduction stage.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReducedDim {
    /// A tenth of the training-set size.
    #[default]
    Tenth,
    /// Square root of the training-set size.
    Sqrt,
    /// Base-2 logarithm of the training-set size.
    Log2,
    All,
    Count(usize),
    /// Fraction of the available features, in (0, 1].
    Fraction(f64),
}

impl FromStr for ReducedDim {
    type Err = CvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "tenth" => Ok(ReducedDim::Tenth),
            "sqrt" => Ok(ReducedDim::Sqrt),
            "log2" => Ok(ReducedDim::Log2),
            "all" => Ok(ReducedDim::All),
            other => {
                if let Ok(count) = other.parse::<usize>() {
                    Ok(ReducedDim::Count(count))
                } else if let Ok(frac) = other.parse::<f64>() {
                    Ok(ReducedDim::Fraction(frac))
                } else {
                    Err(CvError::Config(format!(
                        "Invalid reduced dimensionality: {}. Use tenth, sqrt, log2, all, a count or a fraction",
                        s
                    )))
                }
            }
        }
    }
}

/// Central configuration of a cross-validation experiment.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CvConfig {
    pub workflow: WorkflowKind,
    pub estimator: String,
    pub dim_red_method: String,
    pub reduced_dim: ReducedDim,
    pub preprocessing_method: String,
    pub impute_strategy: ImputeStrategy,
    pub covariates: Vec<String>,
    pub deconfounder: String,
    pub train_fraction: f64,
    #[serde(deserialize_with = "deserialize_repetitions")]
    pub num_repetitions: usize,
    /// Scoring metric; the workflow default is used when absent.
    pub scoring: Option<String>,
    pub grid_search_level: GridSearchLevel,
    pub inner_cv_splits: usize,
    pub num_workers: usize,
    /// Evaluate grid candidates in parallel. Ignored when repetitions run on
    /// more than one worker.
    pub parallel_inner_search: bool,
    pub checkpointing: bool,
    pub make_visualizations: bool,
    pub out_dir: PathBuf,
    pub seed: Option<u64>,
}

impl Default for CvConfig {
    fn default() -> Self {
        Self {
            workflow: WorkflowKind::Classify,
            estimator: "nearest_centroid".to_string(),
            dim_red_method: "select_k_best".to_string(),
            reduced_dim: ReducedDim::Tenth,
            preprocessing_method: "robust_scaler".to_string(),
            impute_strategy: ImputeStrategy::Raise,
            covariates: Vec::new(),
            deconfounder: "residualize".to_string(),
            train_fraction: 0.5,
            num_repetitions: 200,
            scoring: None,
            grid_search_level: GridSearchLevel::Light,
            inner_cv_splits: INNER_CV_NUM_SPLITS,
            num_workers: 1,
            parallel_inner_search: false,
            checkpointing: false,
            make_visualizations: true,
            out_dir: PathBuf::from("."),
            seed: None,
        }
    }
}

impl CvConfig {
    /// Check parameters and their combinations.
    pub fn validate(&self) -> Result<()> {
        if !(self.train_fraction > 0.0 && self.train_fraction < 1.0) {
            return Err(CvError::Config(format!(
                "Train fraction must be > 0.0 and < 1.0, got {}",
                self.train_fraction
            )));
        }
        if self.num_repetitions <= 1 {
            return Err(CvError::Config(
                "More than 1 repetition is necessary".to_string(),
            ));
        }
        if self.num_workers == 0 {
            return Err(CvError::Config(
                "Number of workers must be at least 1".to_string(),
            ));
        }
        if self.inner_cv_splits == 0 {
            return Err(CvError::Config(
                "Number of inner splits must be at least 1".to_string(),
            ));
        }
        if let ReducedDim::Fraction(frac) = self.reduced_dim {
            if !(frac > 0.0 && frac <= 1.0) {
                return Err(CvError::Config(format!(
                    "Reduced dimensionality fraction must be in (0, 1], got {}",
                    frac
                )));
            }
        }
        if let ReducedDim::Count(0) = self.reduced_dim {
            return Err(CvError::Config(
                "Reduced dimensionality must select at least one feature".to_string(),
            ));
        }
        let metric = self.scoring_metric();
        if !self.workflow.supports_metric(&metric) {
            return Err(CvError::Config(format!(
                "Scoring metric '{}' is not available for the {} workflow. Valid choices: {:?}",
                metric,
                self.workflow,
                self.workflow.metric_names()
            )));
        }
        Ok(())
    }

    /// The scoring metric in effect, falling back to the workflow default.
    pub fn scoring_metric(&self) -> String {
        self.scoring
            .clone()
            .unwrap_or_else(|| self.workflow.default_metric().to_string())
    }

    /// Worker count clamped to the available processing units.
    pub fn effective_workers(&self) -> usize {
        let available = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        if self.num_workers > available {
            log::warn!(
                "Requested {} workers, only {} available; using {}",
                self.num_workers,
                available,
                available
            );
        }
        self.num_workers.clamp(1, available)
    }

    pub fn results_path(&self) -> PathBuf {
        self.out_dir.join(RESULTS_FILE_NAME)
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.out_dir.join(CHECKPOINT_FILE_NAME)
    }
}

/// Load an experiment configuration from a JSON file.
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<CvConfig> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        CvError::Config(format!("Failed to read config {}: {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        CvError::Config(format!("Failed to parse config {}: {}", path.display(), e))
    })
}

/// Convert a user-supplied repetition count into an integer count.
pub fn repetitions_from_f64(value: f64) -> Result<usize> {
    if !value.is_finite() {
        return Err(CvError::Config(
            "Infinite number of repetitions is not supported".to_string(),
        ));
    }
    if value < 0.0 || value.fract() != 0.0 {
        return Err(CvError::Config(format!(
            "Number of repetitions must be a whole number, got {}",
            value
        )));
    }
    Ok(value as usize)
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawCount {
    Int(u64),
    Float(f64),
    Text(String),
}

fn deserialize_repetitions<'de, D>(deserializer: D) -> std::result::Result<usize, D::Error>
where
    D: Deserializer<'de>,
{
    let value = match RawCount::deserialize(deserializer)? {
        RawCount::Int(n) => return Ok(n as usize),
        RawCount::Float(f) => f,
        RawCount::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| serde::de::Error::custom(format!("invalid repetition count: {}", s)))?,
    };
    repetitions_from_f64(value).map_err(serde::de::Error::custom)
}
