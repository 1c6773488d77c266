//! Small numeric helpers shared by the transforms and the summaries.
//!
//! Only what the crate needs: interpolated quantiles on sorted data and a
//! dense least-squares solver for the deconfounding regressions.
pub mod linear;

pub use linear::{least_squares, with_intercept};

/// Linearly interpolated quantile of already sorted values, `q` in [0, 1].
///
/// Returns NaN for an empty slice.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}
