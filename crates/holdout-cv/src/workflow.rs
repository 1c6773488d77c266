//! Classification and regression flavours of the experiment.
//!
//! The kind is chosen once, with the configuration, and selects how test
//! predictions are scored, how records are summarized and which figures are
//! drawn.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::data_handling::SampleId;
use crate::error::{CvError, Result};
use crate::metrics;
use crate::pipeline::Params;
use crate::report::plots;
use crate::results::{
    median_importance, metric_stats, ConfusionSummary, ModalitySummary, ResultAccumulator,
    ResultRecord, Summary,
};

const CLASSIFY_METRICS: [&str; 2] = ["balanced_accuracy", "accuracy"];
const REGRESS_METRICS: [&str; 3] = ["r2", "neg_mean_absolute_error", "explained_variance"];

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowKind {
    #[default]
    Classify,
    Regress,
}

impl FromStr for WorkflowKind {
    type Err = CvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "classify" | "classification" => Ok(WorkflowKind::Classify),
            "regress" | "regression" => Ok(WorkflowKind::Regress),
            _ => Err(CvError::Config(format!(
                "Unknown workflow type: {}. Valid choices: classify, regress",
                s
            ))),
        }
    }
}

impl fmt::Display for WorkflowKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            WorkflowKind::Classify => "classify",
            WorkflowKind::Regress => "regress",
        };
        write!(f, "{}", name)
    }
}

/// Test-set outcome handed to [`WorkflowKind::evaluate_predictions`].
#[derive(Debug, Clone)]
pub struct Evaluation<'a> {
    pub repetition: usize,
    pub modality: &'a str,
    pub test_ids: &'a [SampleId],
    pub truth: &'a Array1<f64>,
    pub predictions: &'a Array1<f64>,
    pub best_params: Params,
    pub feature_importance: Option<Vec<Option<f64>>>,
}

impl WorkflowKind {
    pub fn default_metric(&self) -> &'static str {
        self.metric_names()[0]
    }

    /// Every metric computed for a record; the first is the default.
    pub fn metric_names(&self) -> &'static [&'static str] {
        match self {
            WorkflowKind::Classify => &CLASSIFY_METRICS,
            WorkflowKind::Regress => &REGRESS_METRICS,
        }
    }

    pub fn supports_metric(&self, metric: &str) -> bool {
        self.metric_names().contains(&metric)
    }

    /// Score the test predictions with every metric of this workflow and
    /// package them as a record. Non-finite scores are left out.
    pub fn evaluate_predictions(&self, eval: Evaluation<'_>) -> Result<ResultRecord> {
        if eval.truth.len() != eval.predictions.len() || eval.truth.len() != eval.test_ids.len() {
            return Err(CvError::input(
                eval.modality,
                format!(
                    "{} test ids, {} targets and {} predictions",
                    eval.test_ids.len(),
                    eval.truth.len(),
                    eval.predictions.len()
                ),
            ));
        }
        let mut scores = BTreeMap::new();
        for &name in self.metric_names() {
            let value = metrics::score(name, eval.truth, eval.predictions)?;
            if value.is_finite() {
                scores.insert(name.to_string(), value);
            } else {
                log::debug!(
                    "[rep {} / {}] {} is not finite, not recorded",
                    eval.repetition,
                    eval.modality,
                    name
                );
            }
        }
        Ok(ResultRecord {
            repetition: eval.repetition,
            modality: eval.modality.to_string(),
            test_ids: eval.test_ids.to_vec(),
            predictions: eval.predictions.to_vec(),
            truth: eval.truth.to_vec(),
            metrics: scores,
            best_params: eval.best_params,
            feature_importance: eval.feature_importance,
        })
    }

    /// Aggregate the accumulator per modality.
    pub fn summarize(&self, results: &ResultAccumulator) -> Summary {
        let modalities = results
            .modality_ids()
            .iter()
            .map(|modality| {
                let records = results.records_for(modality);
                let (confusion, misclassification_rate) = match self {
                    WorkflowKind::Classify => (
                        Some(summed_confusion(&records)),
                        Some(misclassification_rate(&records)),
                    ),
                    WorkflowKind::Regress => (None, None),
                };
                ModalitySummary {
                    modality: modality.clone(),
                    num_repetitions: records.len(),
                    metrics: metric_stats(&records),
                    median_importance: median_importance(&records),
                    confusion,
                    misclassification_rate,
                }
            })
            .collect();
        Summary {
            workflow: *self,
            metric: results.metric().to_string(),
            modalities,
        }
    }

    /// Write HTML figures into `out_dir` and return their paths.
    pub fn visualize(
        &self,
        summary: &Summary,
        results: &ResultAccumulator,
        out_dir: &Path,
    ) -> Result<Vec<PathBuf>> {
        let metric = summary.metric.as_str();
        let distributions: Vec<(String, Vec<f64>)> = results
            .modality_ids()
            .iter()
            .map(|m| {
                let values = results
                    .records_for(m)
                    .iter()
                    .filter_map(|r| r.metrics.get(metric).copied())
                    .collect();
                (m.clone(), values)
            })
            .collect();

        let mut written = Vec::new();
        let path = out_dir.join(format!("{}_distribution.html", metric));
        plots::write_plot(&plots::plot_metric_distribution(&distributions, metric), &path)?;
        written.push(path);

        for modality in &summary.modalities {
            if let Some(importance) = &modality.median_importance {
                let path = out_dir.join(format!("{}_feature_importance.html", file_stem(&modality.modality)));
                let plot = plots::plot_feature_importance(importance, &modality.modality);
                plots::write_plot(&plot, &path)?;
                written.push(path);
            }
        }

        match self {
            WorkflowKind::Classify => {
                let rates: Vec<(String, Vec<f64>)> = summary
                    .modalities
                    .iter()
                    .filter_map(|m| {
                        m.misclassification_rate
                            .as_ref()
                            .map(|r| (m.modality.clone(), r.values().copied().collect()))
                    })
                    .collect();
                let path = out_dir.join("misclassification_rate.html");
                plots::write_plot(&plots::plot_misclassification(&rates), &path)?;
                written.push(path);
            }
            WorkflowKind::Regress => {
                for modality in results.modality_ids() {
                    let records = results.records_for(modality);
                    let truth: Vec<f64> = records.iter().flat_map(|r| r.truth.iter().copied()).collect();
                    let predicted: Vec<f64> =
                        records.iter().flat_map(|r| r.predictions.iter().copied()).collect();
                    let path = out_dir.join(format!("{}_predicted_vs_true.html", file_stem(modality)));
                    let plot = plots::plot_predicted_vs_true(&truth, &predicted, modality);
                    plots::write_plot(&plot, &path)?;
                    written.push(path);
                }
            }
        }
        log::info!("Wrote {} figures to {}", written.len(), out_dir.display());
        Ok(written)
    }
}

/// Modality id usable as a file name: anything but ASCII alphanumerics, `-`,
/// `_` and `.` becomes `_`.
fn file_stem(modality: &str) -> String {
    modality
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn summed_confusion(records: &[&ResultRecord]) -> ConfusionSummary {
    let classes: Vec<i64> = records
        .iter()
        .flat_map(|r| r.truth.iter().chain(r.predictions.iter()))
        .map(|v| v.round() as i64)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mut counts = vec![vec![0usize; classes.len()]; classes.len()];
    for record in records {
        let truth = Array1::from_vec(record.truth.clone());
        let predicted = Array1::from_vec(record.predictions.clone());
        let cm = metrics::confusion_matrix(&truth, &predicted, &classes);
        for (row, cm_row) in counts.iter_mut().zip(cm) {
            for (cell, n) in row.iter_mut().zip(cm_row) {
                *cell += n;
            }
        }
    }
    ConfusionSummary { classes, counts }
}

fn misclassification_rate(records: &[&ResultRecord]) -> BTreeMap<SampleId, f64> {
    let mut tally: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for record in records {
        for ((id, t), p) in record.test_ids.iter().zip(&record.truth).zip(&record.predictions) {
            let entry = tally.entry(id.as_str()).or_insert((0, 0));
            entry.1 += 1;
            if t.round() as i64 != p.round() as i64 {
                entry.0 += 1;
            }
        }
    }
    tally
        .into_iter()
        .map(|(id, (wrong, seen))| (id.to_string(), wrong as f64 / seen as f64))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn evaluation<'a>(
        rep: usize,
        ids: &'a [SampleId],
        truth: &'a Array1<f64>,
        predictions: &'a Array1<f64>,
    ) -> Evaluation<'a> {
        Evaluation {
            repetition: rep,
            modality: "m",
            test_ids: ids,
            truth,
            predictions,
            best_params: Params::default(),
            feature_importance: None,
        }
    }

    #[test]
    fn metric_names_per_workflow() {
        assert_eq!(WorkflowKind::Classify.default_metric(), "balanced_accuracy");
        assert_eq!(WorkflowKind::Regress.default_metric(), "r2");
        assert!(!WorkflowKind::Classify.supports_metric("r2"));
        assert_eq!("Regression".parse::<WorkflowKind>().unwrap(), WorkflowKind::Regress);
        assert!("cluster".parse::<WorkflowKind>().is_err());
    }

    #[test]
    fn evaluate_records_all_metrics() {
        let ids: Vec<SampleId> = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        let truth = array![0.0, 0.0, 1.0, 1.0];
        let pred = array![0.0, 1.0, 1.0, 1.0];
        let record = WorkflowKind::Classify
            .evaluate_predictions(evaluation(3, &ids, &truth, &pred))
            .unwrap();
        assert_eq!(record.repetition, 3);
        assert_eq!(record.metrics["accuracy"], 0.75);
        assert_eq!(record.metrics["balanced_accuracy"], 0.75);
    }

    #[test]
    fn evaluate_rejects_misaligned_lengths() {
        let ids: Vec<SampleId> = vec!["a".into()];
        let truth = array![0.0, 1.0];
        let pred = array![0.0, 1.0];
        assert!(WorkflowKind::Classify
            .evaluate_predictions(evaluation(0, &ids, &truth, &pred))
            .is_err());
    }

    #[test]
    fn classification_summary_counts_errors_per_sample() {
        let mut acc =
            ResultAccumulator::new(WorkflowKind::Classify, "accuracy", 2, vec!["m".to_string()]);
        let ids: Vec<SampleId> = vec!["a".into(), "b".into()];
        let truth = array![0.0, 1.0];
        let first = array![0.0, 0.0];
        let second = array![1.0, 1.0];
        for (rep, pred) in [(0, &first), (1, &second)] {
            let record = WorkflowKind::Classify
                .evaluate_predictions(evaluation(rep, &ids, &truth, pred))
                .unwrap();
            acc.record(record).unwrap();
        }
        let summary = acc.summarize();
        let m = summary.modality("m").unwrap();
        assert_eq!(m.num_repetitions, 2);
        assert_eq!(m.metrics["accuracy"].mean, 0.5);
        let confusion = m.confusion.as_ref().unwrap();
        assert_eq!(confusion.classes, vec![0, 1]);
        assert_eq!(confusion.counts, vec![vec![1, 1], vec![1, 1]]);
        let rates = m.misclassification_rate.as_ref().unwrap();
        assert_eq!(rates["a"], 0.5);
        assert_eq!(rates["b"], 0.5);
    }

    #[test]
    fn visualize_writes_html() {
        let dir = tempfile::tempdir().unwrap();
        let mut acc = ResultAccumulator::new(WorkflowKind::Regress, "r2", 2, vec!["m".to_string()]);
        let ids: Vec<SampleId> = vec!["a".into(), "b".into(), "c".into()];
        let truth = array![1.0, 2.0, 3.0];
        let pred = array![1.1, 2.1, 2.7];
        for rep in 0..2 {
            let mut eval = evaluation(rep, &ids, &truth, &pred);
            eval.feature_importance = Some(vec![Some(0.5), None]);
            acc.record(WorkflowKind::Regress.evaluate_predictions(eval).unwrap())
                .unwrap();
        }
        let summary = acc.summarize();
        let paths = WorkflowKind::Regress
            .visualize(&summary, &acc, dir.path())
            .unwrap();
        assert_eq!(paths.len(), 3);
        for path in paths {
            let html = std::fs::read_to_string(&path).unwrap();
            assert!(html.to_lowercase().contains("plotly"));
        }
    }

    #[test]
    fn figure_names_stay_inside_out_dir() {
        assert_eq!(file_stem("omics/v2 (raw)"), "omics_v2__raw_");
        assert_eq!(file_stem("../up"), ".._up");

        let dir = tempfile::tempdir().unwrap();
        let mut acc =
            ResultAccumulator::new(WorkflowKind::Regress, "r2", 1, vec!["omics/v2".to_string()]);
        let ids: Vec<SampleId> = vec!["a".into(), "b".into(), "c".into()];
        let truth = array![1.0, 2.0, 3.0];
        let pred = array![1.2, 1.9, 3.1];
        let mut eval = evaluation(0, &ids, &truth, &pred);
        eval.modality = "omics/v2";
        eval.feature_importance = Some(vec![Some(1.0)]);
        acc.record(WorkflowKind::Regress.evaluate_predictions(eval).unwrap())
            .unwrap();
        let summary = acc.summarize();
        let paths = WorkflowKind::Regress
            .visualize(&summary, &acc, dir.path())
            .unwrap();
        assert_eq!(paths.len(), 3);
        for path in &paths {
            assert_eq!(path.parent().unwrap(), dir.path());
            assert!(path.exists());
        }
        assert!(dir.path().join("omics_v2_predicted_vs_true.html").exists());
        assert!(dir.path().join("omics_v2_feature_importance.html").exists());
    }
}
