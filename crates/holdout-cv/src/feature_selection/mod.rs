//! Feature selection utilities.
//!
//! Selectors remember which original columns they kept, which is what lets
//! feature importances be mapped back onto the input features.
pub mod univariate_selection;
pub mod variance_threshold;

pub use univariate_selection::{FittedSelector, ScoreFunc, SelectKBest};
pub use variance_threshold::VarianceThreshold;
