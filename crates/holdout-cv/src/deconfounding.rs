//! Covariate encoding and deconfounding transforms.
//!
//! Deconfounders are fit on training features and training covariates only;
//! targets never enter. The fitted object is then applied to each partition
//! with that partition's own covariates.
use std::collections::BTreeSet;

use anyhow::bail;
use ndarray::{concatenate, Array2, Axis};

use crate::data_handling::{CovariateKind, CovariateTable, CovariateValue};
use crate::error::{CvError, Result};
use crate::math::{least_squares, with_intercept};
use crate::models::estimator_trait::{Deconfounder, FittedDeconfounder};

/// Encode covariates of both partitions into numeric matrices.
///
/// Numeric covariates are used as is. Categorical covariates are dummy coded
/// with the levels observed in `train` (sorted, first level dropped); a test
/// level never seen in training encodes as all zeros. Nothing is retained
/// between calls.
pub fn encode_covariates(
    train: &CovariateTable,
    test: &CovariateTable,
) -> Result<(Array2<f64>, Array2<f64>)> {
    let mut train_cols: Vec<Vec<f64>> = Vec::new();
    let mut test_cols: Vec<Vec<f64>> = Vec::new();

    for (idx, name) in train.names.iter().enumerate() {
        let test_idx = test
            .names
            .iter()
            .position(|n| n == name)
            .ok_or_else(|| CvError::input(name, "covariate missing from test partition"))?;
        let train_values = &train.columns[idx];
        let test_values = &test.columns[test_idx];

        match train.kinds[idx] {
            CovariateKind::Numeric => {
                train_cols.push(numeric_column(name, train_values)?);
                test_cols.push(numeric_column(name, test_values)?);
            }
            CovariateKind::Categorical => {
                let levels: BTreeSet<&str> = train_values.iter().filter_map(category).collect();
                for level in levels.iter().skip(1) {
                    train_cols.push(dummy_column(train_values, level));
                    test_cols.push(dummy_column(test_values, level));
                }
                let unseen = test_values
                    .iter()
                    .filter_map(category)
                    .filter(|l| !levels.contains(l))
                    .count();
                if unseen > 0 {
                    log::debug!(
                        "Covariate '{}': {} test samples carry levels unseen in training",
                        name,
                        unseen
                    );
                }
            }
        }
    }

    Ok((
        columns_to_matrix(train_cols, train.nrows()),
        columns_to_matrix(test_cols, test.nrows()),
    ))
}

fn category(value: &CovariateValue) -> Option<&str> {
    match value {
        CovariateValue::Categorical(s) => Some(s.as_str()),
        CovariateValue::Numeric(_) => None,
    }
}

fn numeric_column(name: &str, values: &[CovariateValue]) -> Result<Vec<f64>> {
    values
        .iter()
        .map(|v| match v {
            CovariateValue::Numeric(x) if x.is_finite() => Ok(*x),
            CovariateValue::Numeric(_) => Err(CvError::input(name, "non-finite covariate value")),
            CovariateValue::Categorical(s) => Err(CvError::input(
                name,
                format!("expected a numeric covariate, got '{}'", s),
            )),
        })
        .collect()
}

fn dummy_column(values: &[CovariateValue], level: &str) -> Vec<f64> {
    values
        .iter()
        .map(|v| if category(v) == Some(level) { 1.0 } else { 0.0 })
        .collect()
}

fn columns_to_matrix(columns: Vec<Vec<f64>>, nrows: usize) -> Array2<f64> {
    let ncols = columns.len();
    Array2::from_shape_fn((nrows, ncols), |(r, c)| columns[c][r])
}

/// Regress covariates out of every feature (ordinary least squares with an
/// intercept) and keep the residuals.
#[derive(Debug, Clone, Default)]
pub struct Residualize;

/// Coefficients of the covariate model, one column per feature.
#[derive(Debug, Clone, PartialEq)]
pub struct FittedResidualize {
    pub coefficients: Array2<f64>,
}

impl Deconfounder for Residualize {
    fn name(&self) -> &str {
        "residualize"
    }

    fn fit(
        &self,
        x: &Array2<f64>,
        covariates: &Array2<f64>,
    ) -> anyhow::Result<Box<dyn FittedDeconfounder>> {
        Ok(Box::new(self.fit_coefficients(x, covariates)?))
    }
}

impl Residualize {
    pub fn fit_coefficients(
        &self,
        x: &Array2<f64>,
        covariates: &Array2<f64>,
    ) -> anyhow::Result<FittedResidualize> {
        if x.nrows() != covariates.nrows() {
            bail!(
                "{} feature rows but {} covariate rows",
                x.nrows(),
                covariates.nrows()
            );
        }
        let design = with_intercept(covariates);
        let coefficients = least_squares(&design, x)?;
        Ok(FittedResidualize { coefficients })
    }
}

impl FittedDeconfounder for FittedResidualize {
    fn transform(&self, x: &Array2<f64>, covariates: &Array2<f64>) -> anyhow::Result<Array2<f64>> {
        let design = with_intercept(covariates);
        if design.ncols() != self.coefficients.nrows() || x.ncols() != self.coefficients.ncols() {
            bail!(
                "deconfounder was fit on {} covariates and {} features, got {} and {}",
                self.coefficients.nrows() - 1,
                self.coefficients.ncols(),
                covariates.ncols(),
                x.ncols()
            );
        }
        Ok(x - &design.dot(&self.coefficients))
    }
}

/// Append the covariates to the features as extra columns.
#[derive(Debug, Clone, Default)]
pub struct Augment;

#[derive(Debug, Clone)]
struct FittedAugment {
    n_covariates: usize,
}

impl Deconfounder for Augment {
    fn name(&self) -> &str {
        "augment"
    }

    fn fit(
        &self,
        _x: &Array2<f64>,
        covariates: &Array2<f64>,
    ) -> anyhow::Result<Box<dyn FittedDeconfounder>> {
        Ok(Box::new(FittedAugment {
            n_covariates: covariates.ncols(),
        }))
    }
}

impl FittedDeconfounder for FittedAugment {
    fn transform(&self, x: &Array2<f64>, covariates: &Array2<f64>) -> anyhow::Result<Array2<f64>> {
        if covariates.ncols() != self.n_covariates {
            bail!(
                "expected {} covariates, got {}",
                self.n_covariates,
                covariates.ncols()
            );
        }
        Ok(concatenate(Axis(1), &[x.view(), covariates.view()])?)
    }
}

/// Leaves features untouched.
#[derive(Debug, Clone, Default)]
pub struct NoDeconfounding;

#[derive(Debug, Clone)]
struct Passthrough;

impl Deconfounder for NoDeconfounding {
    fn name(&self) -> &str {
        "none"
    }

    fn fit(&self, _x: &Array2<f64>, _c: &Array2<f64>) -> anyhow::Result<Box<dyn FittedDeconfounder>> {
        Ok(Box::new(Passthrough))
    }
}

impl FittedDeconfounder for Passthrough {
    fn transform(&self, x: &Array2<f64>, _c: &Array2<f64>) -> anyhow::Result<Array2<f64>> {
        Ok(x.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn table(kind: CovariateKind, values: Vec<CovariateValue>) -> CovariateTable {
        CovariateTable {
            names: vec!["c".to_string()],
            kinds: vec![kind],
            columns: vec![values],
        }
    }

    fn cat(s: &str) -> CovariateValue {
        CovariateValue::Categorical(s.to_string())
    }

    #[test]
    fn categorical_levels_come_from_training() {
        let train = table(CovariateKind::Categorical, vec![cat("b"), cat("a"), cat("c"), cat("a")]);
        let test = table(CovariateKind::Categorical, vec![cat("c"), cat("z")]);
        let (tr, te) = encode_covariates(&train, &test).unwrap();
        // levels a, b, c -> dummies for b and c
        assert_eq!(tr.dim(), (4, 2));
        assert_eq!(tr.row(0).to_vec(), vec![1.0, 0.0]);
        assert_eq!(tr.row(1).to_vec(), vec![0.0, 0.0]);
        assert_eq!(te.row(0).to_vec(), vec![0.0, 1.0]);
        assert_eq!(te.row(1).to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn non_finite_numeric_covariate_is_rejected() {
        let train = table(CovariateKind::Numeric, vec![CovariateValue::Numeric(f64::NAN)]);
        let test = table(CovariateKind::Numeric, vec![CovariateValue::Numeric(1.0)]);
        assert!(encode_covariates(&train, &test).is_err());
    }

    #[test]
    fn residualize_removes_linear_covariate_effect() {
        let cov = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        // feature = 2 * covariate + 1
        let x = array![[3.0], [5.0], [7.0], [9.0], [11.0]];
        let fitted = Residualize.fit(&x, &cov).unwrap();
        let out = fitted.transform(&x, &cov).unwrap();
        assert!(out.iter().all(|v| v.abs() < 1e-9));

        let test_cov = array![[10.0]];
        let test_x = array![[22.0]];
        let out = fitted.transform(&test_x, &test_cov).unwrap();
        assert!((out[[0, 0]] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn augment_appends_columns() {
        let x = array![[1.0, 2.0], [3.0, 4.0]];
        let cov = array![[9.0], [8.0]];
        let out = Augment.fit(&x, &cov).unwrap().transform(&x, &cov).unwrap();
        assert_eq!(out.row(1).to_vec(), vec![3.0, 4.0, 8.0]);
    }
}
