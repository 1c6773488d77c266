use std::collections::BTreeMap;

use anyhow::bail;
use ndarray::{Array1, Array2, Axis};

use crate::models::estimator_trait::{Estimator, FittedEstimator};

/// Nearest class-centroid classifier (Euclidean distance).
#[derive(Debug, Clone, Default)]
pub struct NearestCentroid;

impl NearestCentroid {
    pub fn new() -> Self {
        NearestCentroid
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FittedNearestCentroid {
    /// Class codes, ascending.
    pub classes: Vec<f64>,
    /// One centroid per row, aligned with `classes`.
    pub centroids: Array2<f64>,
}

impl Estimator for NearestCentroid {
    fn name(&self) -> &str {
        "nearest_centroid"
    }

    fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> anyhow::Result<Box<dyn FittedEstimator>> {
        if x.nrows() != y.len() {
            bail!("{} rows but {} labels", x.nrows(), y.len());
        }
        if x.nrows() == 0 {
            bail!("cannot fit nearest centroid on zero samples");
        }

        let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (i, &label) in y.iter().enumerate() {
            groups.entry(label.round() as i64).or_default().push(i);
        }

        let mut centroids = Array2::zeros((groups.len(), x.ncols()));
        for (mut centroid, rows) in centroids.axis_iter_mut(Axis(0)).zip(groups.values()) {
            let members = x.select(Axis(0), rows);
            if let Some(mean) = members.mean_axis(Axis(0)) {
                centroid.assign(&mean);
            }
        }

        Ok(Box::new(FittedNearestCentroid {
            classes: groups.keys().map(|&c| c as f64).collect(),
            centroids,
        }))
    }

    fn box_clone(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }
}

impl FittedEstimator for FittedNearestCentroid {
    fn predict(&self, x: &Array2<f64>) -> anyhow::Result<Array1<f64>> {
        if x.ncols() != self.centroids.ncols() {
            bail!(
                "model was fit on {} features, got {}",
                self.centroids.ncols(),
                x.ncols()
            );
        }
        let predictions = x
            .axis_iter(Axis(0))
            .map(|row| {
                let mut best = (f64::INFINITY, self.classes[0]);
                for (centroid, &class) in self.centroids.axis_iter(Axis(0)).zip(&self.classes) {
                    let dist: f64 = row
                        .iter()
                        .zip(centroid.iter())
                        .map(|(a, b)| (a - b).powi(2))
                        .sum();
                    if dist < best.0 {
                        best = (dist, class);
                    }
                }
                best.1
            })
            .collect();
        Ok(predictions)
    }

    /// Spread of the class centroids along each feature (population std over
    /// classes). Features on which the centroids coincide score zero.
    fn feature_importance(&self) -> Option<Array1<f64>> {
        Some(self.centroids.std_axis(Axis(0), 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn predicts_closest_centroid() {
        let x = array![[0.0, 0.0], [0.2, 0.1], [5.0, 0.0], [5.2, 0.1]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let fitted = NearestCentroid::new().fit(&x, &y).unwrap();
        let pred = fitted.predict(&array![[0.3, 0.0], [4.0, 0.0]]).unwrap();
        assert_eq!(pred.to_vec(), vec![0.0, 1.0]);
    }

    #[test]
    fn importance_reflects_centroid_separation() {
        let x = array![[0.0, 1.0], [0.0, 1.0], [4.0, 1.0], [4.0, 1.0]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let fitted = NearestCentroid::new().fit(&x, &y).unwrap();
        let importance = fitted.feature_importance().unwrap();
        assert_eq!(importance.to_vec(), vec![2.0, 0.0]);
    }
}
