use anyhow::bail;
use ndarray::{Array1, Array2, Axis};

use crate::feature_selection::FittedSelector;
use crate::models::estimator_trait::{FittedTransformer, Transformer};
use crate::pipeline::ParamValue;

/// Drop columns whose training variance does not exceed `threshold`.
///
/// If every column would be dropped, the single highest-variance column is
/// kept so downstream estimators always see at least one feature.
#[derive(Debug, Clone)]
pub struct VarianceThreshold {
    threshold: f64,
}

impl VarianceThreshold {
    pub fn new(threshold: f64) -> Self {
        VarianceThreshold { threshold }
    }
}

impl Default for VarianceThreshold {
    fn default() -> Self {
        VarianceThreshold::new(1e-5)
    }
}

impl Transformer for VarianceThreshold {
    fn name(&self) -> &str {
        "variance_threshold"
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> anyhow::Result<()> {
        match (name, value.as_f64()) {
            ("threshold", Some(t)) if t >= 0.0 => {
                self.threshold = t;
                Ok(())
            }
            _ => bail!("invalid parameter for variance_threshold: {}={}", name, value),
        }
    }

    fn fit(&self, x: &Array2<f64>, _y: &Array1<f64>) -> anyhow::Result<Box<dyn FittedTransformer>> {
        if x.nrows() == 0 || x.ncols() == 0 {
            bail!("variance threshold requires a non-empty matrix");
        }
        let variances: Vec<f64> = x
            .axis_iter(Axis(1))
            .map(|col| {
                let mean = col.sum() / col.len() as f64;
                col.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / col.len() as f64
            })
            .collect();
        let mut indices: Vec<usize> = variances
            .iter()
            .enumerate()
            .filter(|(_, v)| **v > self.threshold)
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            let best = variances
                .iter()
                .enumerate()
                .fold(0, |best, (i, v)| if *v > variances[best] { i } else { best });
            log::trace!("All features below variance threshold; keeping column {}", best);
            indices.push(best);
        }
        Ok(Box::new(FittedSelector {
            indices,
            n_features_in: x.ncols(),
        }))
    }

    fn box_clone(&self) -> Box<dyn Transformer> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn drops_constant_columns() {
        let x = array![[1.0, 5.0, 0.0], [2.0, 5.0, 1.0], [3.0, 5.0, 0.0]];
        let fitted = VarianceThreshold::default().fit(&x, &Array1::zeros(3)).unwrap();
        assert_eq!(fitted.selected_indices(), Some(vec![0, 2]));
        assert_eq!(fitted.transform(&x).unwrap().ncols(), 2);
    }

    #[test]
    fn keeps_one_column_when_all_constant() {
        let x = array![[1.0, 2.0], [1.0, 2.0]];
        let fitted = VarianceThreshold::default().fit(&x, &Array1::zeros(2)).unwrap();
        assert_eq!(fitted.selected_indices(), Some(vec![0]));
    }
}
