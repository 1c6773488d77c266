//! Univariate feature selection methods following scikit-learn's API.
//!
//! See: https://scikit-learn.org/stable/modules/feature_selection.html#univariate-feature-selection

use std::collections::BTreeMap;

use anyhow::bail;
use ndarray::{Array1, Array2, Axis};
use statrs::distribution::{ContinuousCDF, FisherSnedecor};

use crate::models::estimator_trait::{FittedTransformer, Transformer};
use crate::pipeline::ParamValue;

/// Compute Pearson's r for each feature and the target.
///
/// # Parameters
///
/// * `x` - A 2D array of shape (n_samples, n_features).
/// * `y` - A 1D array of shape (n_samples,).
/// * `force_finite` - Replace non-finite coefficients (constant features or
///   targets) with 0.0.
///
/// # Returns
///
/// An array of shape (n_features,) with one coefficient per feature.
pub fn r_regression(x: &Array2<f64>, y: &Array1<f64>, force_finite: bool) -> Array1<f64> {
    let n_samples = x.nrows() as f64;
    let y_mean = y.sum() / n_samples;
    let y_centered = y.mapv(|v| v - y_mean);
    let y_norm = y_centered.dot(&y_centered).sqrt();

    let mut correlation_coefficient = Array1::zeros(x.ncols());
    for (i, col) in x.axis_iter(Axis(1)).enumerate() {
        let col_mean = col.sum() / n_samples;
        let centered = col.mapv(|v| v - col_mean);
        let x_norm = centered.dot(&centered).sqrt();
        correlation_coefficient[i] = centered.dot(&y_centered) / (x_norm * y_norm);
    }

    if force_finite {
        correlation_coefficient.mapv_inplace(|v| if v.is_finite() { v } else { 0.0 });
    }

    correlation_coefficient
}

/// Univariate linear regression tests returning F-statistic and p-values.
///
/// # Returns
///
/// A tuple of F-statistics and p-values, each of shape (n_features,). With
/// `force_finite`, an infinite statistic becomes `f64::MAX` (p = 0) and a NaN
/// statistic becomes 0 (p = 1).
pub fn f_regression(x: &Array2<f64>, y: &Array1<f64>, force_finite: bool) -> (Array1<f64>, Array1<f64>) {
    let correlation_coefficient = r_regression(x, y, false);
    let deg_of_freedom = y.len() as f64 - 2.0;

    let f_statistic = correlation_coefficient.mapv(|r| {
        let r2 = r * r;
        r2 / (1.0 - r2) * deg_of_freedom
    });

    finalize(f_statistic, 1.0, deg_of_freedom, force_finite)
}

/// One-way ANOVA F-test of each feature against the class labels.
///
/// Labels are the integer-valued class codes used throughout the crate.
pub fn f_classif(x: &Array2<f64>, y: &Array1<f64>, force_finite: bool) -> (Array1<f64>, Array1<f64>) {
    let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
    for (i, &label) in y.iter().enumerate() {
        groups.entry(label.round() as i64).or_default().push(i);
    }
    let n_samples = y.len() as f64;
    let n_classes = groups.len() as f64;
    let df_between = n_classes - 1.0;
    let df_within = n_samples - n_classes;

    let f_statistic: Array1<f64> = x
        .axis_iter(Axis(1))
        .map(|col| {
            let grand_mean = col.sum() / n_samples;
            let mut ss_between = 0.0;
            let mut ss_within = 0.0;
            for rows in groups.values() {
                let group_mean = rows.iter().map(|&r| col[r]).sum::<f64>() / rows.len() as f64;
                ss_between += rows.len() as f64 * (group_mean - grand_mean).powi(2);
                ss_within += rows.iter().map(|&r| (col[r] - group_mean).powi(2)).sum::<f64>();
            }
            (ss_between / df_between) / (ss_within / df_within)
        })
        .collect();

    finalize(f_statistic, df_between, df_within, force_finite)
}

fn finalize(
    mut f_statistic: Array1<f64>,
    df1: f64,
    df2: f64,
    force_finite: bool,
) -> (Array1<f64>, Array1<f64>) {
    let mut p_values = Array1::from_elem(f_statistic.len(), f64::NAN);
    if let Ok(f_dist) = FisherSnedecor::new(df1, df2) {
        for (p, &f) in p_values.iter_mut().zip(f_statistic.iter()) {
            if f.is_finite() {
                *p = 1.0 - f_dist.cdf(f);
            }
        }
    }

    if force_finite {
        for (f, p) in f_statistic.iter_mut().zip(p_values.iter_mut()) {
            if f.is_infinite() {
                *f = f64::MAX;
                *p = 0.0;
            } else if f.is_nan() {
                *f = 0.0;
                *p = 1.0;
            }
        }
    }

    (f_statistic, p_values)
}

/// Univariate scoring function used by [`SelectKBest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreFunc {
    FClassif,
    FRegression,
}

/// Select the k features with the highest F-scores.
///
/// Ties are broken in favour of the lower column index; the selected columns
/// keep their original order.
#[derive(Debug, Clone)]
pub struct SelectKBest {
    /// The number of top features to select.
    k: usize,
    score_func: ScoreFunc,
}

impl SelectKBest {
    pub fn new(k: usize, score_func: ScoreFunc) -> Self {
        SelectKBest { k, score_func }
    }

    /// Indices of the k best features, ascending.
    pub fn select(&self, x: &Array2<f64>, y: &Array1<f64>) -> Vec<usize> {
        let (f_scores, _) = match self.score_func {
            ScoreFunc::FClassif => f_classif(x, y, true),
            ScoreFunc::FRegression => f_regression(x, y, true),
        };

        let mut indices: Vec<usize> = (0..f_scores.len()).collect();
        // stable sort, descending by score
        indices.sort_by(|&i, &j| f_scores[j].total_cmp(&f_scores[i]));
        indices.truncate(self.k.min(x.ncols()));
        indices.sort_unstable();
        indices
    }
}

/// Frozen column selection.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedSelector {
    pub indices: Vec<usize>,
    pub n_features_in: usize,
}

impl FittedTransformer for FittedSelector {
    fn transform(&self, x: &Array2<f64>) -> anyhow::Result<Array2<f64>> {
        if x.ncols() != self.n_features_in {
            bail!(
                "selector was fit on {} columns, got {}",
                self.n_features_in,
                x.ncols()
            );
        }
        Ok(x.select(Axis(1), &self.indices))
    }

    fn selected_indices(&self) -> Option<Vec<usize>> {
        Some(self.indices.clone())
    }
}

impl Transformer for SelectKBest {
    fn name(&self) -> &str {
        "select_k_best"
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> anyhow::Result<()> {
        match (name, value.as_usize()) {
            ("k", Some(k)) if k > 0 => {
                self.k = k;
                Ok(())
            }
            _ => bail!("invalid parameter for select_k_best: {}={}", name, value),
        }
    }

    fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> anyhow::Result<Box<dyn FittedTransformer>> {
        if x.nrows() != y.len() {
            bail!("{} rows but {} targets", x.nrows(), y.len());
        }
        if x.ncols() == 0 {
            bail!("cannot select features from an empty matrix");
        }
        Ok(Box::new(FittedSelector {
            indices: self.select(x, y),
            n_features_in: x.ncols(),
        }))
    }

    fn box_clone(&self) -> Box<dyn Transformer> {
        Box::new(self.clone())
    }
}
