//! Dataset collaborator: modalities, targets and covariates keyed by sample id.
//!
//! The engine only talks to [`DatasetCollection`]. [`MultiDataset`] is an
//! in-memory implementation for callers that already hold their feature
//! matrices (and for tests).
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{CvError, Result};

/// Opaque identifier shared by every modality.
pub type SampleId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CovariateKind {
    Numeric,
    Categorical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CovariateValue {
    Numeric(f64),
    Categorical(String),
}

impl CovariateValue {
    pub fn kind(&self) -> CovariateKind {
        match self {
            CovariateValue::Numeric(_) => CovariateKind::Numeric,
            CovariateValue::Categorical(_) => CovariateKind::Categorical,
        }
    }
}

/// Column-major covariate values for an ordered subset of samples.
#[derive(Debug, Clone, PartialEq)]
pub struct CovariateTable {
    pub names: Vec<String>,
    pub kinds: Vec<CovariateKind>,
    /// One column per covariate, rows follow the requested sample order.
    pub columns: Vec<Vec<CovariateValue>>,
}

impl CovariateTable {
    pub fn nrows(&self) -> usize {
        self.columns.first().map(|c| c.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Everything the engine needs to know about the input data.
pub trait DatasetCollection: Send + Sync {
    /// The fixed universe of sample ids.
    fn sample_ids(&self) -> Vec<SampleId>;

    fn modality_ids(&self) -> Vec<String>;

    fn num_features(&self, modality: &str) -> Result<usize>;

    /// Whether the modality is flagged as containing missing values.
    fn has_missing(&self, modality: &str) -> Result<bool>;

    /// Features and targets for `ids`, rows in the order given.
    fn subset(&self, modality: &str, ids: &[SampleId]) -> Result<(Array2<f64>, Array1<f64>)>;

    /// Covariate values common to all modalities, rows in the order given.
    fn covariates(&self, names: &[String], ids: &[SampleId]) -> Result<CovariateTable>;

    /// Number of samples per class label (classification only).
    fn target_sizes(&self) -> BTreeMap<String, usize>;
}

#[derive(Debug, Clone)]
struct Modality {
    features: HashMap<SampleId, Vec<f64>>,
    num_features: usize,
    missing: bool,
}

/// In-memory collection of modalities over one sample universe.
#[derive(Debug, Clone, Default)]
pub struct MultiDataset {
    ids: Vec<SampleId>,
    targets: HashMap<SampleId, f64>,
    class_names: BTreeMap<i64, String>,
    modalities: BTreeMap<String, Modality>,
    modality_order: Vec<String>,
    covariates: BTreeMap<String, (CovariateKind, HashMap<SampleId, CovariateValue>)>,
}

impl MultiDataset {
    /// Classification dataset. Labels are encoded as integer codes in sorted
    /// label order. Sample ids must be unique.
    pub fn with_class_labels<I, S, L>(labels: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, L)>,
        S: Into<SampleId>,
        L: Into<String>,
    {
        let labels: Vec<(SampleId, String)> = labels
            .into_iter()
            .map(|(id, label)| (id.into(), label.into()))
            .collect();
        let ids: Vec<SampleId> = labels.iter().map(|(id, _)| id.clone()).collect();
        ensure_unique_ids(&ids)?;

        let unique: BTreeSet<&String> = labels.iter().map(|(_, l)| l).collect();
        let codes: HashMap<&String, i64> = unique
            .iter()
            .enumerate()
            .map(|(code, &label)| (label, code as i64))
            .collect();
        let class_names = codes.iter().map(|(l, &c)| (c, (*l).clone())).collect();
        let targets = labels
            .iter()
            .map(|(id, l)| (id.clone(), codes[l] as f64))
            .collect();
        Ok(MultiDataset {
            ids,
            targets,
            class_names,
            ..Default::default()
        })
    }

    /// Regression dataset with continuous targets. Sample ids must be unique.
    pub fn with_targets<I, S>(targets: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<SampleId>,
    {
        let targets: Vec<(SampleId, f64)> = targets.into_iter().map(|(id, t)| (id.into(), t)).collect();
        let ids: Vec<SampleId> = targets.iter().map(|(id, _)| id.clone()).collect();
        ensure_unique_ids(&ids)?;
        Ok(MultiDataset {
            ids,
            targets: targets.into_iter().collect(),
            ..Default::default()
        })
    }

    /// Add a modality. Every sample of the universe must be present and all
    /// vectors must share one length.
    pub fn add_modality(
        mut self,
        name: &str,
        features: HashMap<SampleId, Vec<f64>>,
        missing: bool,
    ) -> Result<Self> {
        if self.modalities.contains_key(name) {
            return Err(CvError::input(name, "modality already exists"));
        }
        let num_features = features.values().next().map(|v| v.len()).unwrap_or(0);
        if num_features == 0 {
            return Err(CvError::input(name, "modality has no features"));
        }
        for id in &self.ids {
            match features.get(id) {
                None => return Err(CvError::input(name, format!("sample '{}' is missing", id))),
                Some(v) if v.len() != num_features => {
                    return Err(CvError::input(
                        name,
                        format!(
                            "sample '{}' has {} features, expected {}",
                            id,
                            v.len(),
                            num_features
                        ),
                    ))
                }
                Some(_) => {}
            }
        }
        self.modalities.insert(
            name.to_string(),
            Modality {
                features,
                num_features,
                missing,
            },
        );
        self.modality_order.push(name.to_string());
        Ok(self)
    }

    /// Add a covariate shared by all modalities.
    pub fn add_covariate(
        mut self,
        name: &str,
        kind: CovariateKind,
        values: HashMap<SampleId, CovariateValue>,
    ) -> Result<Self> {
        for id in &self.ids {
            match values.get(id) {
                None => {
                    return Err(CvError::input(
                        name,
                        format!("covariate value missing for sample '{}'", id),
                    ))
                }
                Some(v) if v.kind() != kind => {
                    return Err(CvError::input(
                        name,
                        format!("covariate value for sample '{}' is not {:?}", id, kind),
                    ))
                }
                Some(_) => {}
            }
        }
        self.covariates.insert(name.to_string(), (kind, values));
        Ok(self)
    }

    pub fn class_names(&self) -> &BTreeMap<i64, String> {
        &self.class_names
    }

    fn modality(&self, name: &str) -> Result<&Modality> {
        self.modalities
            .get(name)
            .ok_or_else(|| CvError::input(name, "unknown modality"))
    }
}

impl DatasetCollection for MultiDataset {
    fn sample_ids(&self) -> Vec<SampleId> {
        self.ids.clone()
    }

    fn modality_ids(&self) -> Vec<String> {
        self.modality_order.clone()
    }

    fn num_features(&self, modality: &str) -> Result<usize> {
        Ok(self.modality(modality)?.num_features)
    }

    fn has_missing(&self, modality: &str) -> Result<bool> {
        Ok(self.modality(modality)?.missing)
    }

    fn subset(&self, modality: &str, ids: &[SampleId]) -> Result<(Array2<f64>, Array1<f64>)> {
        let m = self.modality(modality)?;
        let mut data = Vec::with_capacity(ids.len() * m.num_features);
        let mut targets = Vec::with_capacity(ids.len());
        for id in ids {
            let row = m
                .features
                .get(id)
                .ok_or_else(|| CvError::input(modality, format!("unknown sample '{}'", id)))?;
            data.extend_from_slice(row);
            let target = self
                .targets
                .get(id)
                .ok_or_else(|| CvError::input(modality, format!("no target for sample '{}'", id)))?;
            targets.push(*target);
        }
        let x = Array2::from_shape_vec((ids.len(), m.num_features), data)
            .map_err(|e| CvError::input(modality, e.to_string()))?;
        Ok((x, Array1::from_vec(targets)))
    }

    fn covariates(&self, names: &[String], ids: &[SampleId]) -> Result<CovariateTable> {
        let mut kinds = Vec::with_capacity(names.len());
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let (kind, values) = self
                .covariates
                .get(name)
                .ok_or_else(|| CvError::input(name, "unknown covariate"))?;
            let column = ids
                .iter()
                .map(|id| {
                    values.get(id).cloned().ok_or_else(|| {
                        CvError::input(name, format!("covariate value missing for sample '{}'", id))
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            kinds.push(*kind);
            columns.push(column);
        }
        Ok(CovariateTable {
            names: names.to_vec(),
            kinds,
            columns,
        })
    }

    fn target_sizes(&self) -> BTreeMap<String, usize> {
        let mut sizes = BTreeMap::new();
        for target in self.targets.values() {
            let code = target.round() as i64;
            let label = self
                .class_names
                .get(&code)
                .cloned()
                .unwrap_or_else(|| code.to_string());
            *sizes.entry(label).or_insert(0) += 1;
        }
        sizes
    }
}

/// Fails on the first sample id that occurs more than once.
pub fn ensure_unique_ids(ids: &[SampleId]) -> Result<()> {
    let mut seen = HashSet::with_capacity(ids.len());
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(CvError::input(
                "targets",
                format!("sample id '{}' occurs more than once", id),
            ));
        }
    }
    Ok(())
}
