use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use ndarray::{Array1, Array2};

use holdout_cv::config::{CvConfig, GridSearchLevel, ReducedDim};
use holdout_cv::data_handling::{CovariateTable, DatasetCollection, MultiDataset, SampleId};
use holdout_cv::engine::{CrossValidationEngine, Phase};
use holdout_cv::error::CvError;
use holdout_cv::metrics::ChanceMethod;
use holdout_cv::models::factory::DefaultPipelineFactory;
use holdout_cv::results::{ExperimentState, ResultAccumulator};
use holdout_cv::runner::RepetitionRunner;
use holdout_cv::split::train_set_size;
use holdout_cv::workflow::WorkflowKind;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn sample_id(i: usize) -> SampleId {
    format!("sample_{:02}", i)
}

/// 20 samples, two balanced classes, the first two features carry the signal.
fn classification_dataset() -> MultiDataset {
    let labels: Vec<(SampleId, String)> = (0..20)
        .map(|i| (sample_id(i), if i % 2 == 0 { "healthy" } else { "disease" }.to_string()))
        .collect();
    let features: HashMap<SampleId, Vec<f64>> = (0..20)
        .map(|i| {
            let class = (i % 2) as f64;
            let row = (0..10)
                .map(|j| {
                    let noise = ((i * 7 + j * 13) % 11) as f64 / 11.0;
                    if j < 2 {
                        class * 4.0 + noise
                    } else {
                        noise
                    }
                })
                .collect();
            (sample_id(i), row)
        })
        .collect();
    MultiDataset::with_class_labels(labels)
        .unwrap()
        .add_modality("proteomics", features, false)
        .unwrap()
}

fn config(out_dir: &Path) -> CvConfig {
    CvConfig {
        train_fraction: 0.5,
        num_repetitions: 5,
        grid_search_level: GridSearchLevel::None,
        make_visualizations: false,
        out_dir: out_dir.to_path_buf(),
        seed: Some(7),
        ..CvConfig::default()
    }
}

#[test]
fn test_end_to_end_classification() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());

    let mut engine = CrossValidationEngine::new(cfg, classification_dataset()).unwrap();
    assert_eq!(engine.phase(), Phase::Configured);
    assert_eq!(engine.train_set_size(), 10);
    assert!((engine.chance_accuracy(ChanceMethod::Balanced).unwrap() - 0.5).abs() < 1e-12);

    let outcome = engine.run().unwrap();
    assert_eq!(engine.phase(), Phase::Summarized);
    assert!(!outcome.reloaded);
    assert!(outcome.results_path.exists());
    assert!(outcome.results_path.with_extension("csv").exists());

    let state = ExperimentState::load(&outcome.results_path).unwrap();
    assert!(state.completed.is_some());
    assert!(state.accumulator.is_complete());
    let records = state.accumulator.records_for("proteomics");
    assert_eq!(records.len(), 5);
    for record in records {
        assert_eq!(record.test_ids.len(), 10);
        assert_eq!(record.predictions.len(), 10);
        assert!(record.metrics.contains_key("balanced_accuracy"));
    }

    let summary = outcome.summary.modality("proteomics").unwrap();
    assert_eq!(summary.num_repetitions, 5);
    assert_eq!(summary.metrics["balanced_accuracy"].count, 5);
}

#[test]
fn test_rerun_loads_existing_results() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(dir.path());

    let first = CrossValidationEngine::new(cfg.clone(), classification_dataset())
        .unwrap()
        .run()
        .unwrap();
    let second = CrossValidationEngine::new(cfg, classification_dataset())
        .unwrap()
        .run()
        .unwrap();

    assert!(second.reloaded);
    assert_eq!(first.summary, second.summary);
}

#[test]
fn test_single_repetition_is_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = CvConfig {
        num_repetitions: 1,
        ..config(dir.path())
    };
    let err = CrossValidationEngine::new(cfg, classification_dataset()).err().unwrap();
    assert!(err.is_config());
}

/// Wraps a dataset and reports one sample id twice.
struct RepeatedId(MultiDataset);

impl DatasetCollection for RepeatedId {
    fn sample_ids(&self) -> Vec<SampleId> {
        let mut ids = self.0.sample_ids();
        ids.push(ids[0].clone());
        ids
    }

    fn modality_ids(&self) -> Vec<String> {
        self.0.modality_ids()
    }

    fn num_features(&self, modality: &str) -> holdout_cv::Result<usize> {
        self.0.num_features(modality)
    }

    fn has_missing(&self, modality: &str) -> holdout_cv::Result<bool> {
        self.0.has_missing(modality)
    }

    fn subset(&self, modality: &str, ids: &[SampleId]) -> holdout_cv::Result<(Array2<f64>, Array1<f64>)> {
        self.0.subset(modality, ids)
    }

    fn covariates(&self, names: &[String], ids: &[SampleId]) -> holdout_cv::Result<CovariateTable> {
        self.0.covariates(names, ids)
    }

    fn target_sizes(&self) -> BTreeMap<String, usize> {
        self.0.target_sizes()
    }
}

#[test]
fn test_repeated_sample_id_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let err = CrossValidationEngine::new(config(dir.path()), RepeatedId(classification_dataset()))
        .err()
        .unwrap();
    assert!(matches!(err, CvError::InputData { .. }));
    assert!(err.to_string().contains("sample_00"));
}

#[test]
fn test_unknown_covariate_rejected_before_running() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = CvConfig {
        covariates: vec!["age".to_string()],
        ..config(dir.path())
    };
    assert!(CrossValidationEngine::new(cfg, classification_dataset()).is_err());
    assert!(!dir.path().join("cv_results.json").exists());
}

#[test]
fn test_importance_marks_unselected_features() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let cfg = CvConfig {
        reduced_dim: ReducedDim::Count(3),
        ..config(dir.path())
    };
    let outcome = CrossValidationEngine::new(cfg, classification_dataset())
        .unwrap()
        .run()
        .unwrap();
    let state = ExperimentState::load(&outcome.results_path).unwrap();
    for record in state.accumulator.records() {
        let importance = record.feature_importance.as_ref().unwrap();
        assert_eq!(importance.len(), 10);
        assert_eq!(importance.iter().filter(|v| v.is_some()).count(), 3);
    }
}

#[test]
fn test_parallel_repetitions_match_sequential() {
    init_logging();
    let seq_dir = tempfile::tempdir().unwrap();
    let par_dir = tempfile::tempdir().unwrap();

    let sequential = CrossValidationEngine::new(config(seq_dir.path()), classification_dataset())
        .unwrap()
        .run()
        .unwrap();

    let cfg = CvConfig {
        num_workers: 4,
        parallel_inner_search: true,
        ..config(par_dir.path())
    };
    let mut engine = CrossValidationEngine::new(cfg, classification_dataset()).unwrap();
    if engine.workers() > 1 {
        assert!(!engine.inner_search_parallel());
    }
    let parallel = engine.run().unwrap();

    let a = ExperimentState::load(&sequential.results_path).unwrap();
    let b = ExperimentState::load(&parallel.results_path).unwrap();
    assert_eq!(a.accumulator.records(), b.accumulator.records());
}

#[test]
fn test_resume_from_checkpoint() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let cfg = CvConfig {
        checkpointing: true,
        ..config(dir.path())
    };
    let dataset = classification_dataset();
    let universe = dataset.sample_ids();

    // a previous run that stopped after repetition 0
    let runner = RepetitionRunner {
        config: &cfg,
        dataset: &dataset,
        factory: &DefaultPipelineFactory,
        universe: &universe,
        train_size: train_set_size(universe.len(), cfg.train_fraction),
        inner_parallel: false,
    };
    let mut records = runner.run(0).unwrap();
    records[0].metrics.insert("balanced_accuracy".to_string(), 0.123);
    let mut acc = ResultAccumulator::new(
        cfg.workflow,
        &cfg.scoring_metric(),
        cfg.num_repetitions,
        dataset.modality_ids(),
    );
    acc.commit(records).unwrap();
    ExperimentState::new(cfg.clone(), acc)
        .save(cfg.checkpoint_path())
        .unwrap();

    let outcome = CrossValidationEngine::new(cfg.clone(), dataset)
        .unwrap()
        .run()
        .unwrap();
    assert!(!outcome.reloaded);
    assert!(!cfg.checkpoint_path().exists());

    let state = ExperimentState::load(&outcome.results_path).unwrap();
    assert!(state.accumulator.is_complete());
    let kept = state.accumulator.get(0, "proteomics").unwrap();
    assert_eq!(kept.metrics["balanced_accuracy"], 0.123);
}

#[test]
fn test_incompatible_checkpoint_is_ignored() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let cfg = CvConfig {
        checkpointing: true,
        ..config(dir.path())
    };
    let other = ResultAccumulator::new(
        WorkflowKind::Classify,
        "balanced_accuracy",
        3,
        vec!["transcriptomics".to_string()],
    );
    ExperimentState::new(cfg.clone(), other)
        .save(cfg.checkpoint_path())
        .unwrap();

    let outcome = CrossValidationEngine::new(cfg, classification_dataset())
        .unwrap()
        .run()
        .unwrap();
    let state = ExperimentState::load(&outcome.results_path).unwrap();
    assert_eq!(state.accumulator.modality_ids().to_vec(), vec!["proteomics".to_string()]);
    assert_eq!(state.accumulator.len(), 5);
}

#[test]
fn test_regression_with_ridge() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();
    let targets: Vec<(SampleId, f64)> = (0..24).map(|i| (sample_id(i), i as f64 * 0.5)).collect();
    let features: HashMap<SampleId, Vec<f64>> = (0..24)
        .map(|i| {
            let t = i as f64 * 0.5;
            let noise = ((i * 5) % 7) as f64 / 70.0;
            (sample_id(i), vec![2.0 * t + noise, noise, 1.0 - noise])
        })
        .collect();
    let dataset = MultiDataset::with_targets(targets)
        .unwrap()
        .add_modality("metabolomics", features, false)
        .unwrap();

    let cfg = CvConfig {
        workflow: WorkflowKind::Regress,
        estimator: "ridge".to_string(),
        reduced_dim: ReducedDim::All,
        grid_search_level: GridSearchLevel::Light,
        make_visualizations: true,
        ..config(dir.path())
    };
    let outcome = CrossValidationEngine::new(cfg, dataset).unwrap().run().unwrap();

    let summary = outcome.summary.modality("metabolomics").unwrap();
    assert!(summary.metrics["r2"].median > 0.9);
    assert!(summary.confusion.is_none());
    assert!(!outcome.figures.is_empty());
    for figure in &outcome.figures {
        assert!(figure.exists());
    }
}
