use anyhow::bail;
use ndarray::{Array1, Array2, Axis};

use crate::math::least_squares;
use crate::models::estimator_trait::{Estimator, FittedEstimator};
use crate::pipeline::ParamValue;

/// L2-penalized linear regression. The intercept is not penalized.
#[derive(Debug, Clone)]
pub struct Ridge {
    alpha: f64,
}

impl Ridge {
    pub fn new(alpha: f64) -> Self {
        Ridge { alpha }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FittedRidge {
    pub coef: Array1<f64>,
    pub intercept: f64,
}

impl Estimator for Ridge {
    fn name(&self) -> &str {
        "ridge"
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> anyhow::Result<()> {
        match (name, value.as_f64()) {
            ("alpha", Some(alpha)) if alpha >= 0.0 && alpha.is_finite() => {
                self.alpha = alpha;
                Ok(())
            }
            _ => bail!("invalid parameter for ridge: {}={}", name, value),
        }
    }

    fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> anyhow::Result<Box<dyn FittedEstimator>> {
        let (n, p) = x.dim();
        if n != y.len() {
            bail!("{} rows but {} targets", n, y.len());
        }
        if n == 0 {
            bail!("cannot fit ridge on zero samples");
        }
        let x_mean = x.mean_axis(Axis(0)).unwrap_or_else(|| Array1::zeros(p));
        let y_mean = y.sum() / n as f64;
        let xc = x - &x_mean;
        let yc = (y - y_mean).insert_axis(Axis(1));

        // Augmented system [Xc; sqrt(alpha) I] b = [yc; 0]
        let penalty = self.alpha.sqrt();
        let mut design = Array2::zeros((n + p, p));
        design.slice_mut(ndarray::s![..n, ..]).assign(&xc);
        for j in 0..p {
            design[[n + j, j]] = penalty;
        }
        let mut target = Array2::zeros((n + p, 1));
        target.slice_mut(ndarray::s![..n, ..]).assign(&yc);

        let coef = least_squares(&design, &target)?.column(0).to_owned();
        let intercept = y_mean - x_mean.dot(&coef);
        Ok(Box::new(FittedRidge { coef, intercept }))
    }

    fn box_clone(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }
}

impl FittedEstimator for FittedRidge {
    fn predict(&self, x: &Array2<f64>) -> anyhow::Result<Array1<f64>> {
        if x.ncols() != self.coef.len() {
            bail!("model was fit on {} features, got {}", self.coef.len(), x.ncols());
        }
        Ok(x.dot(&self.coef) + self.intercept)
    }

    /// Absolute coefficients.
    fn feature_importance(&self) -> Option<Array1<f64>> {
        Some(self.coef.mapv(f64::abs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn recovers_linear_relation_without_penalty() {
        let x = array![[0.0, 1.0], [1.0, 0.0], [2.0, 1.0], [3.0, 3.0], [4.0, 2.0]];
        let y = x.column(0).mapv(|v| 3.0 * v) - x.column(1).mapv(|v| 2.0 * v) + 1.0;
        let fitted = Ridge::new(0.0).fit(&x, &y).unwrap();
        let pred = fitted.predict(&x).unwrap();
        for (p, t) in pred.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1e-8);
        }
        let importance = fitted.feature_importance().unwrap();
        assert!((importance[0] - 3.0).abs() < 1e-8);
        assert!((importance[1] - 2.0).abs() < 1e-8);
    }

    #[test]
    fn penalty_shrinks_coefficients() {
        let x = array![[0.0], [1.0], [2.0], [3.0]];
        let y = array![0.0, 1.0, 2.0, 3.0];
        let free = Ridge::new(0.0).fit(&x, &y).unwrap().feature_importance().unwrap();
        let shrunk = Ridge::new(10.0).fit(&x, &y).unwrap().feature_importance().unwrap();
        assert!(shrunk[0] < free[0]);
    }

    #[test]
    fn alpha_must_be_non_negative() {
        let mut ridge = Ridge::new(1.0);
        assert!(ridge.set_param("alpha", &ParamValue::Float(-1.0)).is_err());
        assert!(ridge.set_param("lambda", &ParamValue::Float(1.0)).is_err());
    }
}
