use std::path::PathBuf;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CvError>;

/// Errors surfaced by the cross-validation engine.
#[derive(Error, Debug)]
pub enum CvError {
    /// Invalid configuration, raised before any data is touched.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Missing or malformed feature/covariate data for a modality.
    #[error("Input data error in modality '{modality}': {reason}")]
    InputData { modality: String, reason: String },

    /// A transform or estimator failed to fit.
    #[error("Failed to fit {stage} for modality '{modality}': {source}")]
    Fit {
        modality: String,
        stage: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Hyper-parameter optimization failed for modality '{modality}': {reason}")]
    Optimization { modality: String, reason: String },

    /// Reading or writing a result artifact failed.
    #[error("Failed to access results at {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("Result for repetition {repetition} and modality '{modality}' already recorded")]
    DuplicateRecord { repetition: usize, modality: String },

    #[error("Unknown result slot: repetition {repetition}, modality '{modality}'")]
    UnknownRecord { repetition: usize, modality: String },

    #[error("Failed to write figure {}: {reason}", path.display())]
    Visualization { path: PathBuf, reason: String },
}

impl CvError {
    pub(crate) fn input(modality: &str, reason: impl Into<String>) -> Self {
        CvError::InputData {
            modality: modality.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn fit(modality: &str, stage: &str, source: anyhow::Error) -> Self {
        CvError::Fit {
            modality: modality.to_string(),
            stage: stage.to_string(),
            source,
        }
    }

    pub(crate) fn persistence(path: impl Into<PathBuf>, source: impl Into<anyhow::Error>) -> Self {
        CvError::Persistence {
            path: path.into(),
            source: source.into(),
        }
    }

    /// True for errors raised during configuration validation.
    pub fn is_config(&self) -> bool {
        matches!(self, CvError::Config(_))
    }
}
