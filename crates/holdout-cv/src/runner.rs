//! One holdout repetition across every modality.
//!
//! Per modality the order is fixed: impute, preprocess, deconfound, optimize,
//! evaluate. Every transform is fit on the training partition and only
//! applied to the test partition. Records of a repetition are committed
//! together once all modalities succeeded.
use std::sync::Mutex;

use ndarray::{Array1, Array2};
use rand::Rng;

use crate::config::{CvConfig, ImputeStrategy};
use crate::data_handling::{DatasetCollection, SampleId};
use crate::deconfounding::encode_covariates;
use crate::error::{CvError, Result};
use crate::models::estimator_trait::Transformer;
use crate::models::factory::{compute_reduced_dimensionality, PipelineFactory, PipelineRequest};
use crate::optimizer::GridSearch;
use crate::preprocessing::Imputer;
use crate::results::{ResultAccumulator, ResultRecord};
use crate::split::{repetition_rng, HoldoutSplit};
use crate::workflow::Evaluation;

/// Borrowed inputs shared by every repetition of a run.
pub struct RepetitionRunner<'a> {
    pub config: &'a CvConfig,
    pub dataset: &'a dyn DatasetCollection,
    pub factory: &'a dyn PipelineFactory,
    pub universe: &'a [SampleId],
    pub train_size: usize,
    /// Grid candidates may be evaluated in parallel.
    pub inner_parallel: bool,
}

type Partitions = (Array2<f64>, Array2<f64>);

impl<'a> RepetitionRunner<'a> {
    /// Compute the records of `repetition` without storing them.
    pub fn run(&self, repetition: usize) -> Result<Vec<ResultRecord>> {
        let mut rng = repetition_rng(self.config.seed, repetition);
        let split = HoldoutSplit::draw(self.universe, self.train_size, &mut rng);
        log::trace!(
            "[rep {}] {} train / {} test samples",
            repetition,
            split.train.len(),
            split.test.len()
        );

        let mut records = Vec::with_capacity(self.dataset.modality_ids().len());
        for modality in self.dataset.modality_ids() {
            records.push(self.run_modality(repetition, &modality, &split, &mut rng)?);
        }
        Ok(records)
    }

    /// Run `repetition` and commit its records to `sink` in one step.
    pub fn run_into(&self, repetition: usize, sink: &Mutex<ResultAccumulator>) -> Result<()> {
        let records = self.run(repetition)?;
        let mut acc = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        acc.commit(records)
    }

    fn run_modality<R: Rng>(
        &self,
        repetition: usize,
        modality: &str,
        split: &HoldoutSplit,
        rng: &mut R,
    ) -> Result<ResultRecord> {
        let (x_train, y_train) = self.dataset.subset(modality, &split.train)?;
        let (x_test, y_test) = self.dataset.subset(modality, &split.test)?;
        let num_features = x_train.ncols();

        let (x_train, x_test) = self.impute(modality, x_train, x_test, &y_train)?;

        let preprocessor = self.factory.preprocessor(&self.config.preprocessing_method)?;
        let (x_train, x_test) = fit_apply(modality, "preprocessor", preprocessor.as_ref(), &x_train, &x_test, &y_train)?;

        let (x_train, x_test) = self.deconfound(modality, split, x_train, x_test)?;

        let reduced_dim = compute_reduced_dimensionality(
            self.config.reduced_dim,
            self.train_size,
            x_train.ncols(),
        );
        let request = PipelineRequest {
            workflow: self.config.workflow,
            estimator: self.config.estimator.clone(),
            dim_red_method: self.config.dim_red_method.clone(),
            preprocessing_method: self.config.preprocessing_method.clone(),
            reduced_dim,
            train_set_size: self.train_size,
            level: self.config.grid_search_level,
        };
        let (template, grid) = self.factory.make_pipeline(&request)?;
        log::trace!(
            "[rep {} / {}] {} with {} candidate(s), reduced dim {}",
            repetition,
            modality,
            template.describe(),
            grid.num_candidates(),
            reduced_dim
        );

        let search = GridSearch {
            num_splits: self.config.inner_cv_splits,
            train_fraction: self.config.train_fraction,
            metric: self.config.scoring_metric(),
            parallel: self.inner_parallel,
        };
        let optimized = search.optimize(modality, &template, &grid, &x_train, &y_train, num_features, rng)?;

        let predictions = optimized
            .pipeline
            .predict(&x_test)
            .map_err(|e| CvError::fit(modality, "prediction", e))?;

        let record = self.config.workflow.evaluate_predictions(Evaluation {
            repetition,
            modality,
            test_ids: &split.test,
            truth: &y_test,
            predictions: &predictions,
            best_params: optimized.params,
            feature_importance: optimized.importance,
        })?;
        log::debug!(
            "[rep {} / {}] {} = {:?}",
            repetition,
            modality,
            search.metric,
            record.metrics.get(&search.metric)
        );
        Ok(record)
    }

    fn impute(
        &self,
        modality: &str,
        x_train: Array2<f64>,
        x_test: Array2<f64>,
        y_train: &Array1<f64>,
    ) -> Result<Partitions> {
        let has_non_finite = |x: &Array2<f64>| x.iter().any(|v| !v.is_finite());
        if !self.dataset.has_missing(modality)? {
            if has_non_finite(&x_train) || has_non_finite(&x_test) {
                return Err(CvError::input(
                    modality,
                    "non-finite feature values in a modality not flagged as missing",
                ));
            }
            return Ok((x_train, x_test));
        }
        if self.config.impute_strategy == ImputeStrategy::Raise {
            return Err(CvError::input(
                modality,
                "modality has missing values and no imputation strategy is configured",
            ));
        }
        let imputer = Imputer::new(self.config.impute_strategy);
        let fitted = imputer
            .fit(&x_train, y_train)
            .map_err(|e| CvError::input(modality, e.to_string()))?;
        let train = fitted
            .transform(&x_train)
            .map_err(|e| CvError::input(modality, e.to_string()))?;
        let test = fitted
            .transform(&x_test)
            .map_err(|e| CvError::input(modality, e.to_string()))?;
        Ok((train, test))
    }

    fn deconfound(
        &self,
        modality: &str,
        split: &HoldoutSplit,
        x_train: Array2<f64>,
        x_test: Array2<f64>,
    ) -> Result<Partitions> {
        if self.config.covariates.is_empty() {
            return Ok((x_train, x_test));
        }
        let train_cov = self.dataset.covariates(&self.config.covariates, &split.train)?;
        let test_cov = self.dataset.covariates(&self.config.covariates, &split.test)?;
        let (c_train, c_test) = encode_covariates(&train_cov, &test_cov)?;

        let deconfounder = self
            .factory
            .deconfounder(&self.config.deconfounder, self.config.grid_search_level)?;
        let fitted = deconfounder
            .fit(&x_train, &c_train)
            .map_err(|e| CvError::fit(modality, "deconfounder", e))?;
        let train = fitted
            .transform(&x_train, &c_train)
            .map_err(|e| CvError::fit(modality, "deconfounder", e))?;
        let test = fitted
            .transform(&x_test, &c_test)
            .map_err(|e| CvError::fit(modality, "deconfounder", e))?;
        Ok((train, test))
    }
}

/// Fit `stage` on the training rows and apply it to both partitions.
fn fit_apply(
    modality: &str,
    role: &str,
    stage: &dyn Transformer,
    x_train: &Array2<f64>,
    x_test: &Array2<f64>,
    y_train: &Array1<f64>,
) -> Result<Partitions> {
    let fitted = stage
        .fit(x_train, y_train)
        .map_err(|e| CvError::fit(modality, role, e))?;
    let train = fitted
        .transform(x_train)
        .map_err(|e| CvError::fit(modality, role, e))?;
    let test = fitted
        .transform(x_test)
        .map_err(|e| CvError::fit(modality, role, e))?;
    Ok((train, test))
}
