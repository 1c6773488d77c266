use anyhow::{anyhow, bail};
use faer::prelude::*;
use faer::{Mat, Side};
use ndarray::{s, Array2};

/// Smallest eigenvalue of `aᵀa`, relative to the largest, below which the
/// design is treated as rank deficient.
const SINGULAR_TOL: f64 = 1e-10;

/// Prepend a column of ones.
pub fn with_intercept(x: &Array2<f64>) -> Array2<f64> {
    let mut out = Array2::ones((x.nrows(), x.ncols() + 1));
    out.slice_mut(s![.., 1..]).assign(x);
    out
}

fn to_faer(a: &Array2<f64>) -> Mat<f64> {
    Mat::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn from_faer(m: &Mat<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

/// Solve `min ||a·b - y||` for every column of `y` through a Cholesky
/// factorisation of the normal equations. Fails when `aᵀa` is
/// numerically singular.
pub fn least_squares(a: &Array2<f64>, y: &Array2<f64>) -> anyhow::Result<Array2<f64>> {
    if a.nrows() != y.nrows() {
        bail!(
            "design matrix has {} rows but response has {}",
            a.nrows(),
            y.nrows()
        );
    }
    if a.nrows() < a.ncols() {
        bail!(
            "underdetermined system: {} samples for {} regressors",
            a.nrows(),
            a.ncols()
        );
    }
    let a = to_faer(a);
    let y = to_faer(y);
    let gram = a.transpose() * a.as_ref();
    let rhs = a.transpose() * y.as_ref();

    let eigenvalues = gram.selfadjoint_eigenvalues(Side::Lower);
    let largest = eigenvalues.iter().copied().fold(0.0f64, f64::max);
    let smallest = eigenvalues.iter().copied().fold(f64::INFINITY, f64::min);
    if !(smallest > SINGULAR_TOL * largest) {
        bail!("singular system: regressors are linearly dependent");
    }

    let chol = gram
        .cholesky(Side::Lower)
        .map_err(|_| anyhow!("singular system: regressors are linearly dependent"))?;
    let beta = from_faer(&chol.solve(rhs.as_ref()));
    if beta.iter().any(|v| !v.is_finite()) {
        bail!("singular system: solution is not finite");
    }
    Ok(beta)
}
