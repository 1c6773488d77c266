use std::collections::BTreeMap;

use anyhow::bail;
use ndarray::{Array1, Array2, Axis};

use crate::models::estimator_trait::{Estimator, FittedEstimator};
use crate::pipeline::ParamValue;

/// How neighbour targets are combined into a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnnMode {
    /// Majority vote, ties go to the smaller class code.
    Classify,
    /// Mean of the neighbour targets.
    Regress,
}

/// k-nearest-neighbours with Euclidean distance.
#[derive(Debug, Clone)]
pub struct Knn {
    n_neighbors: usize,
    mode: KnnMode,
}

impl Knn {
    pub fn new(n_neighbors: usize, mode: KnnMode) -> Self {
        Knn { n_neighbors, mode }
    }
}

#[derive(Debug, Clone)]
struct FittedKnn {
    x: Array2<f64>,
    y: Array1<f64>,
    k: usize,
    mode: KnnMode,
}

impl Estimator for Knn {
    fn name(&self) -> &str {
        "knn"
    }

    fn set_param(&mut self, name: &str, value: &ParamValue) -> anyhow::Result<()> {
        match (name, value.as_usize()) {
            ("n_neighbors", Some(k)) if k > 0 => {
                self.n_neighbors = k;
                Ok(())
            }
            _ => bail!("invalid parameter for knn: {}={}", name, value),
        }
    }

    fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> anyhow::Result<Box<dyn FittedEstimator>> {
        if x.nrows() != y.len() {
            bail!("{} rows but {} targets", x.nrows(), y.len());
        }
        if x.nrows() == 0 {
            bail!("cannot fit knn on zero samples");
        }
        // k larger than the training set degrades to all samples
        Ok(Box::new(FittedKnn {
            x: x.to_owned(),
            y: y.to_owned(),
            k: self.n_neighbors.min(x.nrows()),
            mode: self.mode,
        }))
    }

    fn box_clone(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }
}

impl FittedKnn {
    fn predict_row(&self, row: ndarray::ArrayView1<f64>) -> f64 {
        let mut distances: Vec<(f64, usize)> = self
            .x
            .axis_iter(Axis(0))
            .enumerate()
            .map(|(i, train)| {
                let d: f64 = train.iter().zip(row.iter()).map(|(a, b)| (a - b).powi(2)).sum();
                (d, i)
            })
            .collect();
        // stable: equidistant neighbours keep training order
        distances.sort_by(|a, b| a.0.total_cmp(&b.0));
        let neighbours = &distances[..self.k];

        match self.mode {
            KnnMode::Regress => {
                neighbours.iter().map(|&(_, i)| self.y[i]).sum::<f64>() / self.k as f64
            }
            KnnMode::Classify => {
                let mut votes: BTreeMap<i64, usize> = BTreeMap::new();
                for &(_, i) in neighbours {
                    *votes.entry(self.y[i].round() as i64).or_insert(0) += 1;
                }
                let mut winner = (0i64, 0usize);
                for (&class, &count) in &votes {
                    if count > winner.1 {
                        winner = (class, count);
                    }
                }
                winner.0 as f64
            }
        }
    }
}

impl FittedEstimator for FittedKnn {
    fn predict(&self, x: &Array2<f64>) -> anyhow::Result<Array1<f64>> {
        if x.ncols() != self.x.ncols() {
            bail!("model was fit on {} features, got {}", self.x.ncols(), x.ncols());
        }
        Ok(x.axis_iter(Axis(0)).map(|row| self.predict_row(row)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn classifies_by_majority_vote() {
        let x = array![[0.0], [0.1], [0.2], [5.0], [5.1]];
        let y = array![0.0, 0.0, 1.0, 1.0, 1.0];
        let fitted = Knn::new(3, KnnMode::Classify).fit(&x, &y).unwrap();
        assert_eq!(fitted.predict(&array![[0.05], [4.9]]).unwrap().to_vec(), vec![0.0, 1.0]);
        assert!(fitted.feature_importance().is_none());
    }

    #[test]
    fn regresses_by_mean() {
        let x = array![[0.0], [1.0], [10.0]];
        let y = array![2.0, 4.0, 100.0];
        let fitted = Knn::new(2, KnnMode::Regress).fit(&x, &y).unwrap();
        assert_eq!(fitted.predict(&array![[0.4]]).unwrap()[0], 3.0);
    }

    #[test]
    fn rejects_zero_neighbours() {
        let mut knn = Knn::new(1, KnnMode::Classify);
        assert!(knn.set_param("n_neighbors", &ParamValue::Int(0)).is_err());
        assert!(knn.set_param("n_neighbors", &ParamValue::Int(4)).is_ok());
    }
}
