use std::fmt;

use ndarray::{Array1, Array2};

use crate::pipeline::ParamValue;

/// An unfitted transform (preprocessor, imputer or dimensionality reducer).
///
/// Templates are never mutated by fitting: `fit` returns a separate fitted
/// object so the same template can be refit on every inner split.
pub trait Transformer: Send + Sync + fmt::Debug {
    /// Human readable name, used in logs and error messages.
    fn name(&self) -> &str;

    /// Set a hyper-parameter by name.
    fn set_param(&mut self, name: &str, value: &ParamValue) -> anyhow::Result<()> {
        anyhow::bail!("{} has no hyper-parameter '{}' (got {})", self.name(), name, value)
    }

    /// Fit on training rows. Reducers may use the targets; preprocessors
    /// ignore them.
    fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> anyhow::Result<Box<dyn FittedTransformer>>;

    fn box_clone(&self) -> Box<dyn Transformer>;
}

/// A transform whose parameters are frozen.
pub trait FittedTransformer: Send + Sync + fmt::Debug {
    fn transform(&self, x: &Array2<f64>) -> anyhow::Result<Array2<f64>>;

    /// Indices of the input columns kept by a feature selector. Transforms
    /// that mix columns (or keep them all implicitly) return `None`.
    fn selected_indices(&self) -> Option<Vec<usize>> {
        None
    }
}

/// An unfitted predictive model.
pub trait Estimator: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn set_param(&mut self, name: &str, value: &ParamValue) -> anyhow::Result<()> {
        anyhow::bail!("{} has no hyper-parameter '{}' (got {})", self.name(), name, value)
    }

    fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> anyhow::Result<Box<dyn FittedEstimator>>;

    fn box_clone(&self) -> Box<dyn Estimator>;
}

pub trait FittedEstimator: Send + Sync + fmt::Debug {
    /// Predicted labels (classification) or values (regression).
    fn predict(&self, x: &Array2<f64>) -> anyhow::Result<Array1<f64>>;

    /// One importance score per input column, when the model has a notion of it.
    fn feature_importance(&self) -> Option<Array1<f64>> {
        None
    }
}

/// Removes the influence of covariates from features.
pub trait Deconfounder: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Fit on training features and training covariates. Targets are never
    /// passed in.
    fn fit(
        &self,
        x: &Array2<f64>,
        covariates: &Array2<f64>,
    ) -> anyhow::Result<Box<dyn FittedDeconfounder>>;
}

pub trait FittedDeconfounder: Send + Sync + fmt::Debug {
    fn transform(&self, x: &Array2<f64>, covariates: &Array2<f64>) -> anyhow::Result<Array2<f64>>;
}

impl Clone for Box<dyn Transformer> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

impl Clone for Box<dyn Estimator> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Pass-through transform, also used as the "select all features" reducer.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    select_all: bool,
}

impl Identity {
    pub fn new() -> Self {
        Identity { select_all: false }
    }

    /// An identity that reports every input column as selected.
    pub fn selecting_all() -> Self {
        Identity { select_all: true }
    }
}

#[derive(Debug)]
struct FittedIdentity {
    selected: Option<Vec<usize>>,
}

impl Transformer for Identity {
    fn name(&self) -> &str {
        "none"
    }

    fn fit(&self, x: &Array2<f64>, _y: &Array1<f64>) -> anyhow::Result<Box<dyn FittedTransformer>> {
        let selected = self.select_all.then(|| (0..x.ncols()).collect());
        Ok(Box::new(FittedIdentity { selected }))
    }

    fn box_clone(&self) -> Box<dyn Transformer> {
        Box::new(self.clone())
    }
}

impl FittedTransformer for FittedIdentity {
    fn transform(&self, x: &Array2<f64>) -> anyhow::Result<Array2<f64>> {
        Ok(x.to_owned())
    }

    fn selected_indices(&self) -> Option<Vec<usize>> {
        self.selected.clone()
    }
}
