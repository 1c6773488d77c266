//! Per-repetition, per-modality results and their persistence.
//!
//! The accumulator is append-only: a slot `(repetition, modality)` can be
//! filled once. Artifacts are JSON written through a temporary file and a
//! rename, so a reader never observes a half-written file.
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics, Statistics};

use crate::config::CvConfig;
use crate::data_handling::SampleId;
use crate::error::{CvError, Result};
use crate::pipeline::Params;
use crate::workflow::WorkflowKind;

/// Outcome of one modality in one repetition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResultRecord {
    pub repetition: usize,
    pub modality: String,
    /// Test sample ids, aligned with `predictions` and `truth`.
    pub test_ids: Vec<SampleId>,
    pub predictions: Vec<f64>,
    pub truth: Vec<f64>,
    pub metrics: BTreeMap<String, f64>,
    pub best_params: Params,
    /// One entry per original feature; `None` where unavailable.
    pub feature_importance: Option<Vec<Option<f64>>>,
}

impl ResultRecord {
    fn key(&self) -> (usize, &str) {
        (self.repetition, self.modality.as_str())
    }
}

/// Append-only store of [`ResultRecord`]s for one experiment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ResultAccumulator {
    workflow: WorkflowKind,
    metric: String,
    num_repetitions: usize,
    modality_ids: Vec<String>,
    /// Sorted by repetition, then modality.
    records: Vec<ResultRecord>,
}

impl ResultAccumulator {
    pub fn new(
        workflow: WorkflowKind,
        metric: &str,
        num_repetitions: usize,
        modality_ids: Vec<String>,
    ) -> Self {
        ResultAccumulator {
            workflow,
            metric: metric.to_string(),
            num_repetitions,
            modality_ids,
            records: Vec::new(),
        }
    }

    pub fn workflow(&self) -> WorkflowKind {
        self.workflow
    }

    pub fn metric(&self) -> &str {
        &self.metric
    }

    pub fn num_repetitions(&self) -> usize {
        self.num_repetitions
    }

    pub fn modality_ids(&self) -> &[String] {
        &self.modality_ids
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn position(&self, repetition: usize, modality: &str) -> std::result::Result<usize, usize> {
        self.records
            .binary_search_by(|r| r.key().cmp(&(repetition, modality)))
    }

    fn check_slot(&self, repetition: usize, modality: &str) -> Result<usize> {
        if repetition >= self.num_repetitions || !self.modality_ids.iter().any(|m| m == modality) {
            return Err(CvError::UnknownRecord {
                repetition,
                modality: modality.to_string(),
            });
        }
        match self.position(repetition, modality) {
            Ok(_) => Err(CvError::DuplicateRecord {
                repetition,
                modality: modality.to_string(),
            }),
            Err(pos) => Ok(pos),
        }
    }

    /// Store one record. Fails if its slot is unknown or already filled.
    pub fn record(&mut self, record: ResultRecord) -> Result<()> {
        let pos = self.check_slot(record.repetition, &record.modality)?;
        self.records.insert(pos, record);
        Ok(())
    }

    /// Store every record of a repetition, or none of them.
    pub fn commit(&mut self, records: Vec<ResultRecord>) -> Result<()> {
        for (i, record) in records.iter().enumerate() {
            self.check_slot(record.repetition, &record.modality)?;
            if records[..i].iter().any(|r| r.key() == record.key()) {
                return Err(CvError::DuplicateRecord {
                    repetition: record.repetition,
                    modality: record.modality.clone(),
                });
            }
        }
        for record in records {
            self.record(record)?;
        }
        Ok(())
    }

    pub fn get(&self, repetition: usize, modality: &str) -> Option<&ResultRecord> {
        self.position(repetition, modality)
            .ok()
            .map(|pos| &self.records[pos])
    }

    /// True once every modality has a record for `repetition`.
    pub fn is_repetition_complete(&self, repetition: usize) -> bool {
        self.modality_ids
            .iter()
            .all(|m| self.position(repetition, m).is_ok())
    }

    pub fn completed_repetitions(&self) -> Vec<usize> {
        (0..self.num_repetitions)
            .filter(|&rep| self.is_repetition_complete(rep))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.records.len() == self.num_repetitions * self.modality_ids.len()
            && (0..self.num_repetitions).all(|rep| self.is_repetition_complete(rep))
    }

    /// Drop records of repetitions that are missing a modality.
    pub fn retain_complete_repetitions(&mut self) -> usize {
        let complete: Vec<usize> = self.completed_repetitions();
        let before = self.records.len();
        self.records.retain(|r| complete.binary_search(&r.repetition).is_ok());
        before - self.records.len()
    }

    /// Records of one modality in repetition order.
    pub fn records_for(&self, modality: &str) -> Vec<&ResultRecord> {
        self.records.iter().filter(|r| r.modality == modality).collect()
    }

    /// Whether a checkpoint with this accumulator can be resumed under `other`.
    pub fn is_compatible_with(&self, other: &ResultAccumulator) -> bool {
        self.workflow == other.workflow
            && self.metric == other.metric
            && self.num_repetitions == other.num_repetitions
            && self.modality_ids == other.modality_ids
    }

    pub fn persist<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json_atomic(path.as_ref(), self)
    }

    pub fn reload<P: AsRef<Path>>(path: P) -> Result<Self> {
        read_json(path.as_ref())
    }

    /// Aggregate statistics; delegates to the workflow.
    pub fn summarize(&self) -> Summary {
        self.workflow.summarize(self)
    }

    /// Flat table with one row per record.
    pub fn export_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let metric_names: Vec<String> = self
            .records
            .iter()
            .flat_map(|r| r.metrics.keys().cloned())
            .collect::<std::collections::BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut wtr = csv::Writer::from_path(path).map_err(|e| CvError::persistence(path, e))?;
        let mut header = vec![
            "repetition".to_string(),
            "modality".to_string(),
            "num_test".to_string(),
            "best_params".to_string(),
        ];
        header.extend(metric_names.iter().cloned());
        wtr.write_record(&header)
            .map_err(|e| CvError::persistence(path, e))?;

        for record in &self.records {
            let mut row = vec![
                record.repetition.to_string(),
                record.modality.clone(),
                record.test_ids.len().to_string(),
                record.best_params.to_string(),
            ];
            for name in &metric_names {
                row.push(
                    record
                        .metrics
                        .get(name)
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                );
            }
            wtr.write_record(&row)
                .map_err(|e| CvError::persistence(path, e))?;
        }
        wtr.flush().map_err(|e| CvError::persistence(path, e))?;
        Ok(())
    }
}

/// Format version of the persisted experiment state.
pub const STATE_VERSION: u32 = 1;

/// Everything persisted for one experiment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ExperimentState {
    pub version: u32,
    pub config: CvConfig,
    pub accumulator: ResultAccumulator,
    pub created: DateTime<Utc>,
    pub completed: Option<DateTime<Utc>>,
}

impl ExperimentState {
    pub fn new(config: CvConfig, accumulator: ResultAccumulator) -> Self {
        ExperimentState {
            version: STATE_VERSION,
            config,
            accumulator,
            created: Utc::now(),
            completed: None,
        }
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_json_atomic(path.as_ref(), self)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let state: ExperimentState = read_json(path)?;
        if state.version != STATE_VERSION {
            return Err(CvError::persistence(
                path,
                anyhow::anyhow!(
                    "unsupported state version {} (expected {})",
                    state.version,
                    STATE_VERSION
                ),
            ));
        }
        Ok(state)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| CvError::persistence(path, e))?;
    }
    let tmp = temp_path(path);
    let file = File::create(&tmp).map_err(|e| CvError::persistence(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(|e| CvError::persistence(path, e))?;
    writer.flush().map_err(|e| CvError::persistence(path, e))?;
    drop(writer);
    fs::rename(&tmp, path).map_err(|e| CvError::persistence(path, e))?;
    log::trace!("Wrote {}", path.display());
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path).map_err(|e| CvError::persistence(path, e))?;
    serde_json::from_reader(BufReader::new(file)).map_err(|e| CvError::persistence(path, e))
}

/// Distribution of one metric across repetitions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetricStats {
    pub mean: f64,
    /// Sample standard deviation.
    pub std: f64,
    pub median: f64,
    /// 2.5th percentile.
    pub ci_low: f64,
    /// 97.5th percentile.
    pub ci_high: f64,
    pub min: f64,
    pub max: f64,
    pub count: usize,
}

impl MetricStats {
    /// Statistics of the finite values; `None` if there are none.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let values: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if values.is_empty() {
            return None;
        }
        let std = if values.len() > 1 {
            values.iter().std_dev()
        } else {
            0.0
        };
        let mut data = Data::new(values.clone());
        Some(MetricStats {
            mean: values.iter().mean(),
            std,
            median: data.median(),
            ci_low: data.quantile(0.025),
            ci_high: data.quantile(0.975),
            min: values.iter().fold(f64::INFINITY, |a, &b| a.min(b)),
            max: values.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b)),
            count: values.len(),
        })
    }
}

/// Confusion matrix summed over repetitions.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConfusionSummary {
    /// Class codes labelling rows (truth) and columns (prediction).
    pub classes: Vec<i64>,
    pub counts: Vec<Vec<usize>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModalitySummary {
    pub modality: String,
    pub num_repetitions: usize,
    pub metrics: BTreeMap<String, MetricStats>,
    /// Median over repetitions per original feature.
    pub median_importance: Option<Vec<Option<f64>>>,
    pub confusion: Option<ConfusionSummary>,
    /// Fraction of test appearances in which a sample was misclassified.
    pub misclassification_rate: Option<BTreeMap<SampleId, f64>>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Summary {
    pub workflow: WorkflowKind,
    pub metric: String,
    pub modalities: Vec<ModalitySummary>,
}

impl Summary {
    pub fn modality(&self, id: &str) -> Option<&ModalitySummary> {
        self.modalities.iter().find(|m| m.modality == id)
    }
}

/// Per-metric statistics over a set of records.
pub(crate) fn metric_stats(records: &[&ResultRecord]) -> BTreeMap<String, MetricStats> {
    let mut values: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for record in records {
        for (name, &value) in &record.metrics {
            values.entry(name.as_str()).or_default().push(value);
        }
    }
    values
        .into_iter()
        .filter_map(|(name, v)| MetricStats::from_values(&v).map(|s| (name.to_string(), s)))
        .collect()
}

/// Median importance per feature over the records that report one.
pub(crate) fn median_importance(records: &[&ResultRecord]) -> Option<Vec<Option<f64>>> {
    let vectors: Vec<&Vec<Option<f64>>> = records
        .iter()
        .filter_map(|r| r.feature_importance.as_ref())
        .collect();
    let num_features = vectors.first()?.len();
    let medians = (0..num_features)
        .map(|f| {
            let values: Vec<f64> = vectors
                .iter()
                .filter_map(|v| v.get(f).copied().flatten())
                .filter(|v| v.is_finite())
                .collect();
            if values.is_empty() {
                None
            } else {
                Some(Data::new(values).median())
            }
        })
        .collect();
    Some(medians)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{ParamValue, Stage};

    fn record(rep: usize, modality: &str) -> ResultRecord {
        ResultRecord {
            repetition: rep,
            modality: modality.to_string(),
            test_ids: vec!["a".to_string(), "b".to_string()],
            predictions: vec![0.0, 1.0],
            truth: vec![0.0, 0.0],
            metrics: vec![("accuracy".to_string(), 0.1 + rep as f64 / 3.0)]
                .into_iter()
                .collect(),
            best_params: Params(vec![(Stage::Reducer, "k".to_string(), ParamValue::Int(2))]),
            feature_importance: Some(vec![Some(0.3), None, Some(1.0 / 3.0)]),
        }
    }

    fn accumulator() -> ResultAccumulator {
        ResultAccumulator::new(
            WorkflowKind::Classify,
            "accuracy",
            3,
            vec!["m1".to_string(), "m2".to_string()],
        )
    }

    #[test]
    fn duplicate_slot_is_rejected() {
        let mut acc = accumulator();
        acc.record(record(0, "m1")).unwrap();
        let err = acc.record(record(0, "m1")).unwrap_err();
        assert!(matches!(err, CvError::DuplicateRecord { repetition: 0, .. }));
        assert!(matches!(
            acc.record(record(5, "m1")).unwrap_err(),
            CvError::UnknownRecord { .. }
        ));
        assert!(matches!(
            acc.record(record(1, "m3")).unwrap_err(),
            CvError::UnknownRecord { .. }
        ));
    }

    #[test]
    fn commit_is_all_or_nothing() {
        let mut acc = accumulator();
        acc.record(record(1, "m2")).unwrap();
        assert!(acc.commit(vec![record(1, "m1"), record(1, "m2")]).is_err());
        assert_eq!(acc.len(), 1);
        acc.commit(vec![record(0, "m2"), record(0, "m1")]).unwrap();
        assert!(acc.is_repetition_complete(0));
        assert!(!acc.is_repetition_complete(1));
        assert_eq!(acc.completed_repetitions(), vec![0]);
        // records are kept in (repetition, modality) order
        assert_eq!(acc.records()[0].modality, "m1");
    }

    #[test]
    fn retain_drops_partial_repetitions() {
        let mut acc = accumulator();
        acc.commit(vec![record(0, "m1"), record(0, "m2")]).unwrap();
        acc.record(record(2, "m1")).unwrap();
        assert_eq!(acc.retain_complete_repetitions(), 1);
        assert_eq!(acc.len(), 2);
    }

    #[test]
    fn persist_reload_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("acc.json");
        let mut acc = accumulator();
        for rep in 0..3 {
            acc.commit(vec![record(rep, "m1"), record(rep, "m2")]).unwrap();
        }
        acc.persist(&path).unwrap();
        let reloaded = ResultAccumulator::reload(&path).unwrap();
        assert_eq!(reloaded, acc);
        assert!(reloaded.is_complete());
        assert!(!temp_path(&path).exists());
    }

    #[test]
    fn reload_error_names_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        let err = ResultAccumulator::reload(&path).unwrap_err();
        match err {
            CvError::Persistence { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn export_csv_writes_one_row_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.csv");
        let mut acc = accumulator();
        acc.commit(vec![record(0, "m1"), record(0, "m2")]).unwrap();
        acc.export_csv(&path).unwrap();
        let mut rdr = csv::Reader::from_path(&path).unwrap();
        let headers = rdr.headers().unwrap().clone();
        assert_eq!(headers.get(4), Some("accuracy"));
        assert_eq!(rdr.records().count(), 2);
    }

    #[test]
    fn metric_stats_describe_distribution() {
        let stats = MetricStats::from_values(&[1.0, 2.0, 3.0, 4.0, f64::NAN]).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.mean, 2.5);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 4.0);
        assert!((stats.median - 2.5).abs() < 1e-12);
        assert!(stats.ci_low >= 1.0 && stats.ci_high <= 4.0);
        assert!(MetricStats::from_values(&[]).is_none());
    }

    #[test]
    fn median_importance_skips_unavailable() {
        let mut a = record(0, "m1");
        let mut b = record(1, "m1");
        a.feature_importance = Some(vec![Some(1.0), None, Some(2.0)]);
        b.feature_importance = Some(vec![Some(3.0), None, None]);
        let medians = median_importance(&[&a, &b]).unwrap();
        assert_eq!(medians, vec![Some(2.0), None, Some(2.0)]);
    }
}
