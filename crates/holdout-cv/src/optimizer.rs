//! Nested grid search confined to the training partition.
use ndarray::{Array1, Array2, Axis};
use rand::Rng;
use rayon::prelude::*;

use crate::config::INNER_CV_NUM_SPLITS;
use crate::error::{CvError, Result};
use crate::metrics;
use crate::pipeline::{FittedPipeline, ParamGrid, Params, Pipeline};
use crate::split::shuffle_split_indices;

/// Grid search over repeated inner holdout splits.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSearch {
    pub num_splits: usize,
    /// Fraction of the training partition used to fit each inner split.
    pub train_fraction: f64,
    /// Higher-is-better scoring metric.
    pub metric: String,
    /// Evaluate candidates on the rayon pool.
    pub parallel: bool,
}

/// Outcome of [`GridSearch::optimize`].
#[derive(Debug)]
pub struct OptimizedPipeline {
    /// Best candidate refit on the whole training partition.
    pub pipeline: FittedPipeline,
    pub params: Params,
    /// Aligned to the original feature indices; `None` when unavailable.
    pub importance: Option<Vec<Option<f64>>>,
}

type InnerSplit = (Vec<usize>, Vec<usize>);

impl GridSearch {
    pub fn new(train_fraction: f64, metric: &str) -> Self {
        GridSearch {
            num_splits: INNER_CV_NUM_SPLITS,
            train_fraction,
            metric: metric.to_string(),
            parallel: false,
        }
    }

    /// Inner training-set size: `floor(f * n)` clamped to `[1, n - 1]` so
    /// every inner split keeps a validation sample.
    pub fn inner_train_size(&self, n_samples: usize) -> usize {
        let size = (n_samples as f64 * self.train_fraction).floor() as usize;
        size.clamp(1, n_samples.saturating_sub(1).max(1))
    }

    /// Select the best candidate of `grid` using only `x`/`y`, then refit it
    /// on all of `x`/`y`.
    ///
    /// Inner splits are drawn once from `rng` and shared by every candidate.
    /// The candidate with the highest mean inner score wins; on ties the
    /// earliest candidate in grid order is kept.
    #[allow(clippy::too_many_arguments)]
    pub fn optimize<R: Rng + ?Sized>(
        &self,
        modality: &str,
        template: &Pipeline,
        grid: &ParamGrid,
        x: &Array2<f64>,
        y: &Array1<f64>,
        num_features: usize,
        rng: &mut R,
    ) -> Result<OptimizedPipeline> {
        let candidates = grid.candidates();

        let best = if candidates.len() == 1 {
            log::trace!("[{}] single candidate, skipping inner validation", modality);
            candidates.into_iter().next().unwrap_or_default()
        } else {
            let n = x.nrows();
            if n < 2 {
                return Err(CvError::Optimization {
                    modality: modality.to_string(),
                    reason: format!(
                        "{} candidates but only {} training sample(s) for inner validation",
                        candidates.len(),
                        n
                    ),
                });
            }
            let train_size = self.inner_train_size(n);
            let splits: Vec<InnerSplit> = (0..self.num_splits)
                .map(|_| shuffle_split_indices(n, train_size, rng))
                .collect();

            let scores: Vec<Option<f64>> = if self.parallel {
                candidates
                    .par_iter()
                    .map(|params| self.score_candidate(modality, template, params, x, y, &splits))
                    .collect()
            } else {
                candidates
                    .iter()
                    .map(|params| self.score_candidate(modality, template, params, x, y, &splits))
                    .collect()
            };

            let mut best: Option<(usize, f64)> = None;
            for (i, score) in scores.iter().enumerate() {
                if let Some(score) = *score {
                    if best.map_or(true, |(_, s)| score > s) {
                        best = Some((i, score));
                    }
                }
            }
            let (best_idx, best_score) = best.ok_or_else(|| CvError::Optimization {
                modality: modality.to_string(),
                reason: format!("all {} candidates failed inner validation", candidates.len()),
            })?;
            log::debug!(
                "[{}] best of {} candidates: {} (mean {} = {:.4})",
                modality,
                candidates.len(),
                candidates[best_idx],
                self.metric,
                best_score
            );
            candidates[best_idx].clone()
        };

        let pipeline = template
            .with_params(&best)
            .and_then(|p| p.fit(x, y))
            .map_err(|e| CvError::fit(modality, "pipeline", e))?;
        let importance = pipeline.feature_importance(num_features);
        Ok(OptimizedPipeline {
            pipeline,
            params: best,
            importance,
        })
    }

    /// Mean inner score of one candidate, `None` if it cannot be fit or
    /// scored on some split.
    fn score_candidate(
        &self,
        modality: &str,
        template: &Pipeline,
        params: &Params,
        x: &Array2<f64>,
        y: &Array1<f64>,
        splits: &[InnerSplit],
    ) -> Option<f64> {
        let pipeline = match template.with_params(params) {
            Ok(p) => p,
            Err(e) => {
                log::debug!("[{}] skipping candidate {}: {}", modality, params, e);
                return None;
            }
        };
        let mut total = 0.0;
        for (train_idx, valid_idx) in splits {
            let x_train = x.select(Axis(0), train_idx);
            let y_train = y.select(Axis(0), train_idx);
            let x_valid = x.select(Axis(0), valid_idx);
            let y_valid = y.select(Axis(0), valid_idx);
            let score = pipeline
                .fit(&x_train, &y_train)
                .and_then(|fitted| fitted.predict(&x_valid))
                .map_err(|e| e.to_string())
                .and_then(|pred| {
                    metrics::score(&self.metric, &y_valid, &pred).map_err(|e| e.to_string())
                });
            match score {
                Ok(s) if s.is_finite() => total += s,
                Ok(s) => {
                    log::debug!("[{}] candidate {} scored {}, skipping", modality, params, s);
                    return None;
                }
                Err(e) => {
                    log::debug!("[{}] candidate {} failed: {}", modality, params, e);
                    return None;
                }
            }
        }
        Some(total / splits.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::estimator_trait::Identity;
    use crate::feature_selection::VarianceThreshold;
    use crate::models::knn::{Knn, KnnMode};
    use crate::models::nearest_centroid::NearestCentroid;
    use crate::pipeline::{ParamValue, Stage};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn two_blobs() -> (Array2<f64>, Array1<f64>) {
        let mut data = Vec::new();
        let mut labels = Vec::new();
        for i in 0..20 {
            let class = (i % 2) as f64;
            data.push(class * 10.0 + (i as f64) * 0.01);
            data.push((i as f64) * 0.1);
            labels.push(class);
        }
        (
            Array2::from_shape_vec((20, 2), data).unwrap(),
            Array1::from_vec(labels),
        )
    }

    fn knn_template() -> Pipeline {
        Pipeline::new(
            Box::new(Identity::new()),
            Box::new(Identity::selecting_all()),
            Box::new(Knn::new(1, KnnMode::Classify)),
        )
    }

    #[test]
    fn inner_train_size_keeps_validation_sample() {
        let gs = GridSearch::new(0.99, "accuracy");
        assert_eq!(gs.inner_train_size(10), 9);
        assert_eq!(gs.inner_train_size(2), 1);
        let gs = GridSearch::new(0.01, "accuracy");
        assert_eq!(gs.inner_train_size(10), 1);
    }

    #[test]
    fn ties_keep_first_candidate() {
        let (x, y) = two_blobs();
        // both thresholds keep every column, so the candidates score the same
        let template = Pipeline::new(
            Box::new(Identity::new()),
            Box::new(VarianceThreshold::default()),
            Box::new(NearestCentroid::new()),
        );
        let grid = ParamGrid::new().with(
            Stage::Reducer,
            "threshold",
            vec![ParamValue::Float(1e-3), ParamValue::Float(0.0)],
        );
        let gs = GridSearch::new(0.5, "balanced_accuracy");
        let mut rng = StdRng::seed_from_u64(11);
        let out = gs.optimize("m", &template, &grid, &x, &y, 2, &mut rng).unwrap();
        assert_eq!(out.params.get(Stage::Reducer, "threshold"), Some(&ParamValue::Float(1e-3)));
        let importance = out.importance.unwrap();
        assert_eq!(importance.len(), 2);
        assert!(importance.iter().all(|v| v.is_some()));
    }

    #[test]
    fn invalid_candidates_are_skipped() {
        let (x, y) = two_blobs();
        let grid = ParamGrid::new().with(
            Stage::Estimator,
            "n_neighbors",
            vec![ParamValue::Int(0), ParamValue::Int(1)],
        );
        let gs = GridSearch::new(0.5, "accuracy");
        let out = gs
            .optimize("m", &knn_template(), &grid, &x, &y, 2, &mut StdRng::seed_from_u64(1))
            .unwrap();
        assert_eq!(out.params.get(Stage::Estimator, "n_neighbors"), Some(&ParamValue::Int(1)));
    }

    #[test]
    fn all_invalid_candidates_fail() {
        let (x, y) = two_blobs();
        let grid = ParamGrid::new().with(
            Stage::Estimator,
            "n_neighbors",
            vec![ParamValue::Int(0), ParamValue::Text("many".to_string())],
        );
        let gs = GridSearch::new(0.5, "accuracy");
        let err = gs
            .optimize("m", &knn_template(), &grid, &x, &y, 2, &mut StdRng::seed_from_u64(1))
            .unwrap_err();
        assert!(matches!(err, CvError::Optimization { .. }));
    }

    #[test]
    fn parallel_search_matches_sequential() {
        let (x, y) = two_blobs();
        let grid = ParamGrid::new().with(
            Stage::Estimator,
            "n_neighbors",
            (1..=7).map(ParamValue::Int).collect(),
        );
        let mut gs = GridSearch::new(0.5, "balanced_accuracy");
        let seq = gs
            .optimize("m", &knn_template(), &grid, &x, &y, 2, &mut StdRng::seed_from_u64(5))
            .unwrap();
        gs.parallel = true;
        let par = gs
            .optimize("m", &knn_template(), &grid, &x, &y, 2, &mut StdRng::seed_from_u64(5))
            .unwrap();
        assert_eq!(seq.params, par.params);
    }

    #[test]
    fn refit_uses_whole_training_partition() {
        let (x, y) = two_blobs();
        let gs = GridSearch::new(0.5, "accuracy");
        let out = gs
            .optimize("m", &knn_template(), &ParamGrid::new(), &x, &y, 2, &mut StdRng::seed_from_u64(2))
            .unwrap();
        // 1-nn on its own training data is exact
        assert_eq!(out.pipeline.predict(&x).unwrap(), y);
    }
}
