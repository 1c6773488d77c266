//! Role-named model pipelines and their hyper-parameter grids.
//!
//! A [`Pipeline`] is a template of three stages: preprocessor, reducer and
//! estimator. Fitting it yields an immutable [`FittedPipeline`]. Stages are
//! addressed by [`Stage`] role, never by position, so feature-importance
//! extraction asks the reducer and the estimator directly.
use std::fmt;

use anyhow::Context;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::models::estimator_trait::{Estimator, FittedEstimator, FittedTransformer, Transformer};

/// Role of a stage inside a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Preprocessor,
    Reducer,
    Estimator,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            Stage::Preprocessor => "preprocessor",
            Stage::Reducer => "reducer",
            Stage::Estimator => "estimator",
        };
        write!(f, "{}", name)
    }
}

/// A single hyper-parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Int(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            ParamValue::Text(_) => None,
        }
    }

    /// Non-negative integer view, used for counts such as `k`.
    pub fn as_usize(&self) -> Option<usize> {
        match self {
            ParamValue::Int(v) if *v >= 0 => Some(*v as usize),
            _ => None,
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// One assignment of hyper-parameters, in grid order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Params(pub Vec<(Stage, String, ParamValue)>);

impl Params {
    pub fn get(&self, stage: Stage, name: &str) -> Option<&ParamValue> {
        self.0
            .iter()
            .find(|(s, n, _)| *s == stage && n == name)
            .map(|(_, _, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(stage, name, value)| format!("{}__{}={}", stage, name, value))
            .collect();
        write!(f, "{{{}}}", parts.join(", "))
    }
}

/// Ordered hyper-parameter grid.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParamGrid {
    entries: Vec<(Stage, String, Vec<ParamValue>)>,
}

impl ParamGrid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter with its candidate values. Empty value lists are ignored.
    pub fn with(mut self, stage: Stage, name: &str, values: Vec<ParamValue>) -> Self {
        if !values.is_empty() {
            self.entries.push((stage, name.to_string(), values));
        }
        self
    }

    /// Append the entries of `other` after this grid's entries.
    pub fn extend(mut self, other: ParamGrid) -> Self {
        self.entries.extend(other.entries);
        self
    }

    /// Number of combinations [`ParamGrid::candidates`] yields, at least 1.
    pub fn num_candidates(&self) -> usize {
        self.entries.iter().map(|(_, _, v)| v.len()).product()
    }

    /// Every combination, last parameter varying fastest. An empty grid has
    /// exactly one (empty) candidate.
    pub fn candidates(&self) -> Vec<Params> {
        let mut out = vec![Params::default()];
        for (stage, name, values) in &self.entries {
            out = out
                .into_iter()
                .flat_map(|prefix| {
                    values.iter().map(move |value| {
                        let mut next = prefix.clone();
                        next.0.push((*stage, name.clone(), value.clone()));
                        next
                    })
                })
                .collect();
        }
        out
    }
}

/// Unfitted pipeline template.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub preprocessor: Box<dyn Transformer>,
    pub reducer: Box<dyn Transformer>,
    pub estimator: Box<dyn Estimator>,
}

impl Pipeline {
    pub fn new(
        preprocessor: Box<dyn Transformer>,
        reducer: Box<dyn Transformer>,
        estimator: Box<dyn Estimator>,
    ) -> Self {
        Pipeline {
            preprocessor,
            reducer,
            estimator,
        }
    }

    /// A copy of this template with `params` applied.
    pub fn with_params(&self, params: &Params) -> anyhow::Result<Pipeline> {
        let mut pipeline = self.clone();
        for (stage, name, value) in &params.0 {
            match stage {
                Stage::Preprocessor => pipeline.preprocessor.set_param(name, value)?,
                Stage::Reducer => pipeline.reducer.set_param(name, value)?,
                Stage::Estimator => pipeline.estimator.set_param(name, value)?,
            }
        }
        Ok(pipeline)
    }

    /// Fit every stage in order on the given rows.
    pub fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> anyhow::Result<FittedPipeline> {
        let preprocessor = self
            .preprocessor
            .fit(x, y)
            .with_context(|| format!("fitting preprocessor {}", self.preprocessor.name()))?;
        let x = preprocessor.transform(x)?;
        let reducer = self
            .reducer
            .fit(&x, y)
            .with_context(|| format!("fitting reducer {}", self.reducer.name()))?;
        let x = reducer.transform(&x)?;
        let estimator = self
            .estimator
            .fit(&x, y)
            .with_context(|| format!("fitting estimator {}", self.estimator.name()))?;
        Ok(FittedPipeline {
            preprocessor,
            reducer,
            estimator,
        })
    }

    pub fn describe(&self) -> String {
        format!(
            "{} -> {} -> {}",
            self.preprocessor.name(),
            self.reducer.name(),
            self.estimator.name()
        )
    }
}

/// A fitted pipeline. There is no way to refit it.
#[derive(Debug)]
pub struct FittedPipeline {
    preprocessor: Box<dyn FittedTransformer>,
    reducer: Box<dyn FittedTransformer>,
    estimator: Box<dyn FittedEstimator>,
}

impl FittedPipeline {
    pub fn predict(&self, x: &Array2<f64>) -> anyhow::Result<Array1<f64>> {
        let x = self.preprocessor.transform(x)?;
        let x = self.reducer.transform(&x)?;
        self.estimator.predict(&x)
    }

    /// Importance aligned to the `num_features` original columns.
    ///
    /// Available only if the reducer reports selected columns and the
    /// estimator reports importances; unselected columns are `None`.
    /// Selected indices beyond `num_features` (covariate columns appended by
    /// a deconfounder) are dropped.
    pub fn feature_importance(&self, num_features: usize) -> Option<Vec<Option<f64>>> {
        let selected = self.reducer.selected_indices()?;
        let importance = self.estimator.feature_importance()?;
        if importance.len() != selected.len() {
            log::debug!(
                "Importance length {} does not match {} selected features",
                importance.len(),
                selected.len()
            );
            return None;
        }
        let mut full = vec![None; num_features];
        for (&idx, &value) in selected.iter().zip(importance.iter()) {
            if idx < num_features {
                full[idx] = Some(value);
            }
        }
        Some(full)
    }
}
