//! Experiment orchestration: validation, repetitions, checkpoints and the
//! final artifact.
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use rayon::prelude::*;

use crate::config::CvConfig;
use crate::data_handling::{ensure_unique_ids, DatasetCollection, SampleId};
use crate::error::{CvError, Result};
use crate::metrics::{chance_accuracy, ChanceMethod};
use crate::models::factory::{DefaultPipelineFactory, PipelineFactory};
use crate::results::{ExperimentState, ResultAccumulator, Summary};
use crate::runner::RepetitionRunner;
use crate::split::train_set_size;
use crate::workflow::WorkflowKind;

/// Lifecycle of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Configured,
    Running,
    Persisted,
    Summarized,
}

/// What [`CrossValidationEngine::run`] produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub results_path: PathBuf,
    pub summary: Summary,
    /// True if an existing artifact was loaded instead of computing.
    pub reloaded: bool,
    pub figures: Vec<PathBuf>,
}

pub struct CrossValidationEngine {
    config: CvConfig,
    dataset: Box<dyn DatasetCollection>,
    factory: Box<dyn PipelineFactory>,
    universe: Vec<SampleId>,
    train_size: usize,
    workers: usize,
    phase: Phase,
}

impl CrossValidationEngine {
    /// Validate `config` against `dataset` using the built-in pipeline factory.
    pub fn new<D>(config: CvConfig, dataset: D) -> Result<Self>
    where
        D: DatasetCollection + 'static,
    {
        Self::with_factory(config, dataset, DefaultPipelineFactory)
    }

    pub fn with_factory<D, F>(config: CvConfig, dataset: D, factory: F) -> Result<Self>
    where
        D: DatasetCollection + 'static,
        F: PipelineFactory + 'static,
    {
        config.validate()?;
        factory.check(&config)?;

        let universe = dataset.sample_ids();
        if universe.len() < 2 {
            return Err(CvError::Config(format!(
                "At least 2 samples are required, got {}",
                universe.len()
            )));
        }
        ensure_unique_ids(&universe)?;
        let modalities = dataset.modality_ids();
        if modalities.is_empty() {
            return Err(CvError::Config("No modalities to evaluate".to_string()));
        }
        for modality in &modalities {
            dataset.num_features(modality)?;
        }
        if !config.covariates.is_empty() {
            // resolves every covariate name
            dataset.covariates(&config.covariates, &[])?;
        }

        let train_size = train_set_size(universe.len(), config.train_fraction);
        let workers = config.effective_workers();
        Ok(CrossValidationEngine {
            config,
            dataset: Box::new(dataset),
            factory: Box::new(factory),
            universe,
            train_size,
            workers,
            phase: Phase::Configured,
        })
    }

    pub fn config(&self) -> &CvConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn train_set_size(&self) -> usize {
        self.train_size
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Grid candidates are evaluated in parallel only when repetitions run
    /// sequentially.
    pub fn inner_search_parallel(&self) -> bool {
        self.config.parallel_inner_search && self.workers == 1
    }

    /// Chance-level accuracy of the dataset's class sizes.
    pub fn chance_accuracy(&self, method: ChanceMethod) -> Result<f64> {
        chance_accuracy(&self.dataset.target_sizes(), method)
    }

    fn fresh_accumulator(&self) -> ResultAccumulator {
        ResultAccumulator::new(
            self.config.workflow,
            &self.config.scoring_metric(),
            self.config.num_repetitions,
            self.dataset.modality_ids(),
        )
    }

    /// Run the experiment, or reload it if a non-empty result artifact is
    /// already present in the output directory.
    pub fn run(&mut self) -> Result<RunOutcome> {
        let results_path = self.config.results_path();
        let (state, reloaded) = if artifact_exists(&results_path) {
            log::info!(
                "Results already exist at {}, loading them instead of recomputing",
                results_path.display()
            );
            let state = ExperimentState::load(&results_path)?;
            if state.config != self.config {
                log::warn!("Loaded results were produced with a different configuration");
            }
            (state, true)
        } else {
            self.log_experiment();
            self.phase = Phase::Running;
            let mut state = self.run_repetitions()?;
            state.completed = Some(Utc::now());
            state.save(&results_path)?;
            log::info!("Results saved to {}", results_path.display());
            state
                .accumulator
                .export_csv(results_path.with_extension("csv"))?;
            self.discard_checkpoint();
            (state, false)
        };
        self.phase = Phase::Persisted;

        let summary = state.accumulator.summarize();
        log_summary(&summary);

        let figures = if self.config.make_visualizations {
            state
                .accumulator
                .workflow()
                .visualize(&summary, &state.accumulator, &self.config.out_dir)?
        } else {
            Vec::new()
        };
        self.phase = Phase::Summarized;

        Ok(RunOutcome {
            results_path,
            summary,
            reloaded,
            figures,
        })
    }

    /// Start from a compatible checkpoint if there is one.
    fn initial_state(&self) -> ExperimentState {
        let fresh = ExperimentState::new(self.config.clone(), self.fresh_accumulator());
        let checkpoint_path = self.config.checkpoint_path();
        if !artifact_exists(&checkpoint_path) {
            return fresh;
        }
        match ExperimentState::load(&checkpoint_path) {
            Ok(mut state) if state.accumulator.is_compatible_with(&fresh.accumulator) => {
                let dropped = state.accumulator.retain_complete_repetitions();
                if dropped > 0 {
                    log::debug!("Dropped {} records of incomplete repetitions", dropped);
                }
                log::info!(
                    "Resuming from checkpoint {} with {} of {} repetitions done",
                    checkpoint_path.display(),
                    state.accumulator.completed_repetitions().len(),
                    self.config.num_repetitions
                );
                state.config = self.config.clone();
                state
            }
            Ok(_) => {
                log::warn!(
                    "Ignoring checkpoint {}: it belongs to a different experiment",
                    checkpoint_path.display()
                );
                fresh
            }
            Err(e) => {
                log::warn!("Ignoring unreadable checkpoint: {}", e);
                fresh
            }
        }
    }

    fn run_repetitions(&self) -> Result<ExperimentState> {
        let state = self.initial_state();
        let pending: Vec<usize> = (0..self.config.num_repetitions)
            .filter(|&rep| !state.accumulator.is_repetition_complete(rep))
            .collect();
        let runner = RepetitionRunner {
            config: &self.config,
            dataset: self.dataset.as_ref(),
            factory: self.factory.as_ref(),
            universe: &self.universe,
            train_size: self.train_size,
            inner_parallel: self.inner_search_parallel(),
        };
        let created = state.created;
        let sink = Mutex::new(state.accumulator);

        let run_one = |rep: usize| -> Result<()> {
            runner.run_into(rep, &sink)?;
            let acc = sink.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let done = acc.completed_repetitions().len();
            log::info!("Repetition {} done ({}/{})", rep, done, self.config.num_repetitions);
            if self.config.checkpointing {
                let mut checkpoint = ExperimentState::new(self.config.clone(), acc.clone());
                checkpoint.created = created;
                checkpoint.save(self.config.checkpoint_path())?;
            }
            Ok(())
        };

        if self.workers > 1 {
            log::info!(
                "Running {} repetitions on {} workers",
                pending.len(),
                self.workers
            );
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.workers)
                .build()
                .map_err(|e| CvError::Config(format!("Failed to start worker pool: {}", e)))?;
            pool.install(|| pending.par_iter().try_for_each(|&rep| run_one(rep)))?;
        } else {
            for &rep in &pending {
                run_one(rep)?;
            }
        }

        let accumulator = sink
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut state = ExperimentState::new(self.config.clone(), accumulator);
        state.created = created;
        Ok(state)
    }

    fn discard_checkpoint(&self) {
        let path = self.config.checkpoint_path();
        if path.exists() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Could not remove checkpoint {}: {}", path.display(), e);
            }
        }
    }

    fn log_experiment(&self) {
        log::info!("Workflow                 : {}", self.config.workflow);
        log::info!("Modalities               : {:?}", self.dataset.modality_ids());
        log::info!(
            "Training set size        : {} of {} ({:.0}%)",
            self.train_size,
            self.universe.len(),
            self.config.train_fraction * 100.0
        );
        log::info!("Repetitions              : {}", self.config.num_repetitions);
        log::info!("Estimator                : {}", self.config.estimator);
        log::info!("Dim. reduction method    : {}", self.config.dim_red_method);
        log::info!("Level of grid search     : {}", self.config.grid_search_level);
        log::info!("Scoring metric           : {}", self.config.scoring_metric());
        log::info!("Workers                  : {}", self.workers);
        if !self.config.covariates.is_empty() {
            log::info!(
                "Covariates               : {:?} ({})",
                self.config.covariates,
                self.config.deconfounder
            );
        }
        if self.config.workflow == WorkflowKind::Classify {
            for method in [ChanceMethod::Balanced, ChanceMethod::Imbalanced, ChanceMethod::ZeroRule] {
                match self.chance_accuracy(method) {
                    Ok(chance) => log::info!("Chance accuracy ({:<10}): {:.4}", method.to_string(), chance),
                    Err(e) => log::warn!("Chance accuracy unavailable: {}", e),
                }
            }
        }
    }
}

fn artifact_exists(path: &Path) -> bool {
    std::fs::metadata(path)
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}

fn log_summary(summary: &Summary) {
    for modality in &summary.modalities {
        match modality.metrics.get(&summary.metric) {
            Some(stats) => log::info!(
                "{}: {} {:.4} +/- {:.4} (median {:.4}, 95% [{:.4}, {:.4}], n={})",
                modality.modality,
                summary.metric,
                stats.mean,
                stats.std,
                stats.median,
                stats.ci_low,
                stats.ci_high,
                stats.count
            ),
            None => log::warn!("{}: no finite {} recorded", modality.modality, summary.metric),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_artifact_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cv_results.json");
        assert!(!artifact_exists(&path));
        std::fs::write(&path, "").unwrap();
        assert!(!artifact_exists(&path));
        std::fs::write(&path, "{}").unwrap();
        assert!(artifact_exists(&path));
        assert!(!artifact_exists(dir.path()));
    }
}
