//! Scoring metrics and chance-level accuracy.
//!
//! Every scoring metric is oriented so that higher is better, which lets the
//! optimizer maximize without knowing which metric it was given.
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{CvError, Result};

/// Class codes are integer-valued floats.
fn class_of(v: f64) -> i64 {
    v.round() as i64
}

/// Fraction of predictions equal to the truth.
pub fn accuracy(truth: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    if truth.is_empty() {
        return f64::NAN;
    }
    let correct = truth
        .iter()
        .zip(predicted.iter())
        .filter(|(&t, &p)| class_of(t) == class_of(p))
        .count();
    correct as f64 / truth.len() as f64
}

/// Mean recall over the classes present in `truth`.
pub fn balanced_accuracy(truth: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    let mut per_class: BTreeMap<i64, (usize, usize)> = BTreeMap::new();
    for (&t, &p) in truth.iter().zip(predicted.iter()) {
        let entry = per_class.entry(class_of(t)).or_insert((0, 0));
        entry.1 += 1;
        if class_of(t) == class_of(p) {
            entry.0 += 1;
        }
    }
    if per_class.is_empty() {
        return f64::NAN;
    }
    let recall_sum: f64 = per_class
        .values()
        .map(|&(hit, total)| hit as f64 / total as f64)
        .sum();
    recall_sum / per_class.len() as f64
}

/// Confusion matrix over `classes`, rows are true classes and columns are
/// predicted classes. Pairs involving a class outside `classes` are ignored.
pub fn confusion_matrix(truth: &Array1<f64>, predicted: &Array1<f64>, classes: &[i64]) -> Vec<Vec<usize>> {
    let position: BTreeMap<i64, usize> = classes.iter().enumerate().map(|(i, &c)| (c, i)).collect();
    let mut matrix = vec![vec![0usize; classes.len()]; classes.len()];
    for (&t, &p) in truth.iter().zip(predicted.iter()) {
        if let (Some(&r), Some(&c)) = (position.get(&class_of(t)), position.get(&class_of(p))) {
            matrix[r][c] += 1;
        }
    }
    matrix
}

/// Coefficient of determination. A constant truth yields 1.0 for a perfect
/// prediction and 0.0 otherwise.
pub fn r2(truth: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    if truth.is_empty() {
        return f64::NAN;
    }
    let mean = truth.mean().unwrap_or(0.0);
    let ss_res: f64 = truth.iter().zip(predicted.iter()).map(|(t, p)| (t - p).powi(2)).sum();
    let ss_tot: f64 = truth.iter().map(|t| (t - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub fn neg_mean_absolute_error(truth: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    if truth.is_empty() {
        return f64::NAN;
    }
    let total: f64 = truth.iter().zip(predicted.iter()).map(|(t, p)| (t - p).abs()).sum();
    -total / truth.len() as f64
}

pub fn explained_variance(truth: &Array1<f64>, predicted: &Array1<f64>) -> f64 {
    if truth.is_empty() {
        return f64::NAN;
    }
    let n = truth.len() as f64;
    let residuals: Vec<f64> = truth.iter().zip(predicted.iter()).map(|(t, p)| t - p).collect();
    let res_mean = residuals.iter().sum::<f64>() / n;
    let res_var = residuals.iter().map(|r| (r - res_mean).powi(2)).sum::<f64>() / n;
    let mean = truth.sum() / n;
    let var = truth.iter().map(|t| (t - mean).powi(2)).sum::<f64>() / n;
    if var == 0.0 {
        return if res_var == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - res_var / var
}

/// Score `predicted` against `truth` with a named metric.
pub fn score(metric: &str, truth: &Array1<f64>, predicted: &Array1<f64>) -> Result<f64> {
    match metric {
        "balanced_accuracy" => Ok(balanced_accuracy(truth, predicted)),
        "accuracy" => Ok(accuracy(truth, predicted)),
        "r2" => Ok(r2(truth, predicted)),
        "neg_mean_absolute_error" => Ok(neg_mean_absolute_error(truth, predicted)),
        "explained_variance" => Ok(explained_variance(truth, predicted)),
        other => Err(CvError::Config(format!("Unknown scoring metric: {}", other))),
    }
}

/// How chance-level accuracy is estimated from the class sizes.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChanceMethod {
    /// One over the number of classes.
    #[default]
    Balanced,
    /// Sum of squared class proportions.
    Imbalanced,
    /// Proportion of the majority class.
    ZeroRule,
}

impl FromStr for ChanceMethod {
    type Err = CvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "balanced" => Ok(ChanceMethod::Balanced),
            "imbalanced" => Ok(ChanceMethod::Imbalanced),
            "zero_rule" | "zerorule" => Ok(ChanceMethod::ZeroRule),
            _ => Err(CvError::Config(format!(
                "Unknown chance accuracy method: {}. Valid choices: balanced, imbalanced, zero_rule",
                s
            ))),
        }
    }
}

impl fmt::Display for ChanceMethod {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ChanceMethod::Balanced => "balanced",
            ChanceMethod::Imbalanced => "imbalanced",
            ChanceMethod::ZeroRule => "zero_rule",
        };
        write!(f, "{}", name)
    }
}

/// Chance-level accuracy given the number of samples per class.
pub fn chance_accuracy(class_sizes: &BTreeMap<String, usize>, method: ChanceMethod) -> Result<f64> {
    let total: usize = class_sizes.values().sum();
    if class_sizes.is_empty() || total == 0 {
        return Err(CvError::Config(
            "Chance accuracy needs at least one labelled sample".to_string(),
        ));
    }
    let total = total as f64;
    let chance = match method {
        ChanceMethod::Balanced => 1.0 / class_sizes.len() as f64,
        ChanceMethod::Imbalanced => class_sizes
            .values()
            .map(|&n| (n as f64 / total).powi(2))
            .sum(),
        ChanceMethod::ZeroRule => class_sizes.values().copied().max().unwrap_or(0) as f64 / total,
    };
    Ok(chance)
}
