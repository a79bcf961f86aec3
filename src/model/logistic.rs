//! Logistic regression via IRLS.
//!
//! Fitted probabilities are clamped away from 0 and 1, so perfectly
//! separated data gives large but finite coefficients once the iteration
//! budget is spent rather than diverging.

use crate::error::{HurdleError, Result};
use crate::model::lm::check_design;
use crate::model::CoreFit;
use nalgebra::{DMatrix, DVector};

/// Minimum probability to avoid log(0).
const MIN_P: f64 = 1e-10;

/// Maximum probability.
const MAX_P: f64 = 1.0 - 1e-10;

#[inline]
pub(crate) fn inv_logit(eta: f64) -> f64 {
    (1.0 / (1.0 + (-eta).exp())).clamp(MIN_P, MAX_P)
}

/// Scale the rows of `x` by `sqrt(w)`.
pub(crate) fn weight_rows(x: &DMatrix<f64>, w: &DVector<f64>) -> DMatrix<f64> {
    let mut xw = x.clone();
    for i in 0..x.nrows() {
        let w_sqrt = w[i].sqrt();
        for j in 0..x.ncols() {
            xw[(i, j)] *= w_sqrt;
        }
    }
    xw
}

/// Check that a binary response only holds 0 and 1.
pub(crate) fn check_binary(y: &[f64]) -> Result<()> {
    match y.iter().find(|&&v| v != 0.0 && v != 1.0) {
        Some(bad) => Err(HurdleError::Fit(format!(
            "Binomial response must be 0 or 1, found {}",
            bad
        ))),
        None => Ok(()),
    }
}

/// Fit a logistic regression of a 0/1 response on `x`.
///
/// Non-convergence within `max_iter` is not an error; the last iterate is
/// returned with `converged = false`.
pub fn fit_logistic(
    y: &[f64],
    x: &DMatrix<f64>,
    names: &[String],
    max_iter: usize,
    tol: f64,
) -> Result<CoreFit> {
    let n = y.len();
    if x.nrows() != n {
        return Err(HurdleError::DimensionMismatch {
            expected: n,
            actual: x.nrows(),
        });
    }
    check_binary(y)?;
    check_design(x, names)?;
    let p = x.ncols();
    let y_vec = DVector::from_column_slice(y);

    // Start from the marginal log-odds on the first column.
    let p_mean = (y.iter().sum::<f64>() / n as f64).clamp(MIN_P, MAX_P);
    let mut beta = DVector::zeros(p);
    beta[0] = (p_mean / (1.0 - p_mean)).ln();

    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..max_iter {
        iterations = iter + 1;

        let eta = x * &beta;
        let mu = eta.map(inv_logit);
        let w = mu.map(|m| (m * (1.0 - m)).max(MIN_P));

        // Working response: z = eta + (y - mu) / w
        let z_work = DVector::from_fn(n, |i, _| eta[i] + (y_vec[i] - mu[i]) / w[i]);

        let xw = weight_rows(x, &w);
        let zw = DVector::from_fn(n, |i, _| z_work[i] * w[i].sqrt());

        let xtwx = xw.transpose() * &xw;
        let beta_new = xtwx
            .try_inverse()
            .map(|inv| inv * (xw.transpose() * zw))
            .ok_or_else(|| {
                HurdleError::Numerical("X'WX is singular in logistic IRLS".to_string())
            })?;

        let delta: f64 = (&beta_new - &beta).iter().map(|d| d.abs()).sum();
        let scale: f64 = beta.iter().map(|b| b.abs()).sum::<f64>().max(1.0);

        beta = beta_new;

        if delta / scale < tol {
            converged = true;
            break;
        }
    }

    if !converged {
        log::debug!(
            "Logistic IRLS did not converge after {} iterations",
            iterations
        );
    }

    let mu = (x * &beta).map(inv_logit);
    let w = mu.map(|m| (m * (1.0 - m)).max(MIN_P));
    let xw = weight_rows(x, &w);
    let covariance = (xw.transpose() * &xw).try_inverse().ok_or_else(|| {
        HurdleError::Numerical("Fisher information is singular".to_string())
    })?;

    Ok(CoreFit {
        coefficients: beta.iter().cloned().collect(),
        covariance,
        log_likelihood: bernoulli_log_likelihood(y, mu.as_slice()),
        df_residual: n - p,
        converged,
        iterations,
        variance_components: Vec::new(),
        aliased: vec![false; p],
    })
}

/// Bernoulli log-likelihood of 0/1 outcomes.
pub(crate) fn bernoulli_log_likelihood(y: &[f64], mu: &[f64]) -> f64 {
    y.iter()
        .zip(mu.iter())
        .map(|(&yi, &mi)| {
            let mi = mi.clamp(MIN_P, MAX_P);
            if yi > 0.5 {
                mi.ln()
            } else {
                (1.0 - mi).ln()
            }
        })
        .sum()
}
