//! Column-wise preprocessing: scaling and missing-value imputation.
//!
//! Every transform here learns its parameters from the training rows only
//! and applies the frozen parameters to any later matrix.

use anyhow::bail;
use ndarray::{Array1, Array2, Axis};

use crate::config::ImputeStrategy;
use crate::math::quantile_sorted;
use crate::models::estimator_trait::{FittedTransformer, Transformer};

/// Per-column location and scale learned from training data.
#[derive(Clone, Debug, PartialEq)]
pub struct Scaler {
    pub center: Vec<f64>,
    pub scale: Vec<f64>,
}

impl Scaler {
    /// Minimum scale to avoid division by zero when transforming.
    const MIN_STD: f64 = 1e-6;
}

/// Fit a mean/std `Scaler` where rows are samples and columns are features.
pub fn fit_standard_scaler(x: &Array2<f64>) -> anyhow::Result<Scaler> {
    let (nrows, ncols) = x.dim();
    if nrows == 0 || ncols == 0 {
        bail!("standard scaler requires a non-empty matrix, got {}x{}", nrows, ncols);
    }

    let mut center = vec![0.0f64; ncols];
    let mut scale = vec![0.0f64; ncols];
    for (c, col) in x.axis_iter(Axis(1)).enumerate() {
        let mean = col.sum() / nrows as f64;
        let var = col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / nrows as f64;
        center[c] = mean;
        scale[c] = var.sqrt().max(Scaler::MIN_STD);
    }

    Ok(Scaler { center, scale })
}

/// Fit a median/IQR `Scaler`. Columns with zero spread keep unit scale.
pub fn fit_robust_scaler(x: &Array2<f64>) -> anyhow::Result<Scaler> {
    let (nrows, ncols) = x.dim();
    if nrows == 0 || ncols == 0 {
        bail!("robust scaler requires a non-empty matrix, got {}x{}", nrows, ncols);
    }

    let mut center = Vec::with_capacity(ncols);
    let mut scale = Vec::with_capacity(ncols);
    for col in x.axis_iter(Axis(1)) {
        let mut values = col.to_vec();
        values.sort_by(|a, b| a.total_cmp(b));
        center.push(quantile_sorted(&values, 0.5));
        let iqr = quantile_sorted(&values, 0.75) - quantile_sorted(&values, 0.25);
        scale.push(if iqr > Scaler::MIN_STD { iqr } else { 1.0 });
    }

    Ok(Scaler { center, scale })
}

/// Apply a fitted `Scaler` to all rows and return a new matrix.
pub fn transform_all(x: &Array2<f64>, sc: &Scaler) -> anyhow::Result<Array2<f64>> {
    if x.ncols() != sc.center.len() {
        bail!(
            "scaler was fit on {} columns, got {}",
            sc.center.len(),
            x.ncols()
        );
    }
    let mut out = x.to_owned();
    for (c, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
        col.mapv_inplace(|v| (v - sc.center[c]) / sc.scale[c]);
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalerKind {
    Standard,
    Robust,
}

/// Scaling transform usable as a pipeline stage.
#[derive(Debug, Clone)]
pub struct ScalingTransform {
    kind: ScalerKind,
}

impl ScalingTransform {
    pub fn new(kind: ScalerKind) -> Self {
        ScalingTransform { kind }
    }
}

impl Transformer for ScalingTransform {
    fn name(&self) -> &str {
        match self.kind {
            ScalerKind::Standard => "standard_scaler",
            ScalerKind::Robust => "robust_scaler",
        }
    }

    fn fit(&self, x: &Array2<f64>, _y: &Array1<f64>) -> anyhow::Result<Box<dyn FittedTransformer>> {
        let scaler = match self.kind {
            ScalerKind::Standard => fit_standard_scaler(x)?,
            ScalerKind::Robust => fit_robust_scaler(x)?,
        };
        Ok(Box::new(scaler))
    }

    fn box_clone(&self) -> Box<dyn Transformer> {
        Box::new(self.clone())
    }
}

impl FittedTransformer for Scaler {
    fn transform(&self, x: &Array2<f64>) -> anyhow::Result<Array2<f64>> {
        transform_all(x, self)
    }
}

/// Fills non-finite entries with a per-column statistic of the training rows.
#[derive(Debug, Clone)]
pub struct Imputer {
    strategy: ImputeStrategy,
}

/// Fill values learned by an [`Imputer`].
#[derive(Debug, Clone, PartialEq)]
pub struct FittedImputer {
    pub fill_values: Vec<f64>,
}

impl Imputer {
    pub fn new(strategy: ImputeStrategy) -> Self {
        Imputer { strategy }
    }

    /// Per-column fill values from the finite entries of `x`.
    pub fn fit_values(&self, x: &Array2<f64>) -> anyhow::Result<FittedImputer> {
        if self.strategy == ImputeStrategy::Raise {
            bail!("missing values present and no imputation strategy configured");
        }
        let mut fill_values = Vec::with_capacity(x.ncols());
        for (c, col) in x.axis_iter(Axis(1)).enumerate() {
            let mut observed: Vec<f64> = col.iter().copied().filter(|v| v.is_finite()).collect();
            if observed.is_empty() {
                bail!("column {} has no observed values in the training set", c);
            }
            fill_values.push(self.fill_value(&mut observed));
        }
        Ok(FittedImputer { fill_values })
    }

    fn fill_value(&self, observed: &mut [f64]) -> f64 {
        match self.strategy {
            ImputeStrategy::Mean | ImputeStrategy::Raise => {
                observed.iter().sum::<f64>() / observed.len() as f64
            }
            ImputeStrategy::Median => {
                observed.sort_by(|a, b| a.total_cmp(b));
                quantile_sorted(observed, 0.5)
            }
            ImputeStrategy::MostFrequent => {
                // Ties resolve to the smallest value.
                observed.sort_by(|a, b| a.total_cmp(b));
                let mut best = observed[0];
                let mut best_count = 0;
                let mut i = 0;
                while i < observed.len() {
                    let mut j = i;
                    while j < observed.len() && observed[j] == observed[i] {
                        j += 1;
                    }
                    if j - i > best_count {
                        best_count = j - i;
                        best = observed[i];
                    }
                    i = j;
                }
                best
            }
        }
    }
}

impl Transformer for Imputer {
    fn name(&self) -> &str {
        "imputer"
    }

    fn fit(&self, x: &Array2<f64>, _y: &Array1<f64>) -> anyhow::Result<Box<dyn FittedTransformer>> {
        Ok(Box::new(self.fit_values(x)?))
    }

    fn box_clone(&self) -> Box<dyn Transformer> {
        Box::new(self.clone())
    }
}

impl FittedTransformer for FittedImputer {
    fn transform(&self, x: &Array2<f64>) -> anyhow::Result<Array2<f64>> {
        if x.ncols() != self.fill_values.len() {
            bail!(
                "imputer was fit on {} columns, got {}",
                self.fill_values.len(),
                x.ncols()
            );
        }
        let mut out = x.to_owned();
        for (c, mut col) in out.axis_iter_mut(Axis(1)).enumerate() {
            let fill = self.fill_values[c];
            col.mapv_inplace(|v| if v.is_finite() { v } else { fill });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn standard_scaler_centers_columns() {
        let x = array![[1.0, 10.0], [3.0, 10.0], [5.0, 10.0]];
        let sc = fit_standard_scaler(&x).unwrap();
        assert!((sc.center[0] - 3.0).abs() < 1e-12);
        let z = transform_all(&x, &sc).unwrap();
        assert!(z.column(0).sum().abs() < 1e-12);
        // constant column is not blown up
        assert!(z.column(1).iter().all(|v| v.abs() < 1e-12));
    }

    #[test]
    fn robust_scaler_uses_median_and_iqr() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [100.0]];
        let sc = fit_robust_scaler(&x).unwrap();
        assert_eq!(sc.center[0], 3.0);
        assert_eq!(sc.scale[0], 2.0);
    }

    #[test]
    fn imputer_uses_training_statistics() {
        let train = array![[1.0, f64::NAN], [3.0, 4.0], [f64::NAN, 8.0]];
        let test = array![[f64::NAN, f64::NAN]];
        let y = Array1::zeros(3);
        let fitted = Imputer::new(ImputeStrategy::Mean).fit(&train, &y).unwrap();
        let filled = fitted.transform(&test).unwrap();
        assert_eq!(filled[[0, 0]], 2.0);
        assert_eq!(filled[[0, 1]], 6.0);
    }

    #[test]
    fn imputer_most_frequent_prefers_smallest_on_tie() {
        let train = array![[2.0], [1.0], [2.0], [1.0], [f64::NAN]];
        let y = Array1::zeros(5);
        let fitted = Imputer::new(ImputeStrategy::MostFrequent).fit(&train, &y).unwrap();
        assert_eq!(fitted.transform(&array![[f64::NAN]]).unwrap()[[0, 0]], 1.0);
    }

    #[test]
    fn imputer_rejects_unobserved_column() {
        let train = array![[1.0, f64::NAN], [2.0, f64::NAN]];
        let y = Array1::zeros(2);
        assert!(Imputer::new(ImputeStrategy::Median).fit(&train, &y).is_err());
    }

    #[test]
    fn raise_strategy_fails() {
        let train = array![[1.0], [f64::NAN]];
        let y = Array1::zeros(2);
        assert!(Imputer::new(ImputeStrategy::Raise).fit(&train, &y).is_err());
    }
}
