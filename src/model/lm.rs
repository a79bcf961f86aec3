//! Linear model fitting via OLS.

use crate::error::{HurdleError, Result};
use crate::model::CoreFit;
use nalgebra::{DMatrix, DVector};

/// Relative tolerance for treating a singular value as zero.
const RANK_TOL: f64 = 1e-10;

/// Relative residual norm below which a column counts as aliased.
const ALIAS_TOL: f64 = 1e-7;

/// Columns of `x` that are linearly independent of the columns before them.
///
/// Columns are taken left to right; one whose residual after projecting out
/// the kept columns is below `ALIAS_TOL` of its own norm is aliased, as is an
/// all-zero column.
pub fn estimable_columns(x: &DMatrix<f64>) -> Vec<usize> {
    let mut basis: Vec<DVector<f64>> = Vec::new();
    let mut keep = Vec::new();
    for j in 0..x.ncols() {
        let col: DVector<f64> = x.column(j).into_owned();
        let norm = col.norm();
        if norm == 0.0 {
            continue;
        }
        // Two passes of modified Gram-Schmidt for stability.
        let mut r = col;
        for _ in 0..2 {
            for q in &basis {
                let proj = q.dot(&r);
                r -= q * proj;
            }
        }
        let r_norm = r.norm();
        if r_norm > ALIAS_TOL * norm {
            basis.push(r / r_norm);
            keep.push(j);
        }
    }
    keep
}

/// Check that a design has full column rank and at least as many rows as columns.
///
/// An all-zero column (e.g. a factor level with no rows in the subset) is
/// reported by name.
pub fn check_design(x: &DMatrix<f64>, names: &[String]) -> Result<()> {
    let (n, p) = x.shape();
    if p == 0 {
        return Err(HurdleError::Fit("Design matrix has no columns".to_string()));
    }
    if n < p {
        return Err(HurdleError::Fit(format!(
            "Fewer observations ({}) than coefficients ({})",
            n, p
        )));
    }

    for j in 0..p {
        if x.column(j).iter().all(|&v| v == 0.0) {
            let name = names.get(j).map(|s| s.as_str()).unwrap_or("?");
            return Err(HurdleError::Fit(format!(
                "Coefficient '{}' is not estimable (column is all zero)",
                name
            )));
        }
    }

    let sv = x.clone().svd(false, false).singular_values;
    let max_sv = sv.max();
    let tol = RANK_TOL * max_sv * n.max(p) as f64;
    let rank = sv.iter().filter(|&&s| s > tol).count();
    if rank < p {
        return Err(HurdleError::Fit(format!(
            "Design matrix is rank deficient (rank {} < {} columns)",
            rank, p
        )));
    }
    Ok(())
}

/// Fit an ordinary least squares regression of `y` on `x`.
///
/// The covariance is `sigma^2 (X'X)^-1` with `sigma^2 = RSS / (n - p)`; it is
/// NaN when the fit is saturated. The log-likelihood uses the ML variance
/// estimate `RSS / n`.
pub fn fit_ols(y: &[f64], x: &DMatrix<f64>, names: &[String]) -> Result<CoreFit> {
    let n = y.len();
    if x.nrows() != n {
        return Err(HurdleError::DimensionMismatch {
            expected: n,
            actual: x.nrows(),
        });
    }
    check_design(x, names)?;
    let p = x.ncols();

    let xtx = x.transpose() * x;
    let xtx_inv = xtx.try_inverse().ok_or_else(|| {
        HurdleError::Numerical("Design matrix is singular (X'X not invertible)".to_string())
    })?;

    let y_vec = DVector::from_column_slice(y);
    let beta = &xtx_inv * (x.transpose() * &y_vec);
    let residuals = &y_vec - x * &beta;
    let rss: f64 = residuals.iter().map(|e| e * e).sum();

    let df_residual = n - p;
    let sigma2 = if df_residual > 0 {
        rss / df_residual as f64
    } else {
        f64::NAN
    };

    Ok(CoreFit {
        coefficients: beta.iter().cloned().collect(),
        covariance: xtx_inv * sigma2,
        log_likelihood: gaussian_log_likelihood(rss, n),
        df_residual,
        converged: true,
        iterations: 1,
        variance_components: vec![sigma2],
        aliased: vec![false; p],
    })
}

/// Gaussian log-likelihood at the ML variance estimate.
pub(crate) fn gaussian_log_likelihood(rss: f64, n: usize) -> f64 {
    let nf = n as f64;
    let sigma2_ml = (rss / nf).max(f64::MIN_POSITIVE);
    -0.5 * nf * ((2.0 * std::f64::consts::PI).ln() + sigma2_ml.ln() + 1.0)
}
