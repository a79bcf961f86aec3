//! Linear Mixed Models (LMM) with one random intercept.
//!
//! Fits `y = Xβ + Zu + ε` where `u ~ N(0, τ²I)` and `ε ~ N(0, σ²W⁻¹)`, with
//! known prior weights `W` (all ones for a plain Gaussian fit). Variance
//! components are estimated by REML.
//!
//! Binomial responses are fit by penalized quasi-likelihood (PQL): the
//! logistic working response and IRLS weights are refit with the same
//! weighted LMM core until the fixed effects settle.

use crate::error::{HurdleError, Result};
use crate::model::lm::check_design;
use crate::model::logistic::{check_binary, inv_logit};
use crate::model::CoreFit;
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use serde::{Deserialize, Serialize};

/// Configuration for LMM fitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LmmConfig {
    /// Maximum iterations for REML estimation.
    pub max_iter: usize,
    /// Convergence tolerance for log-likelihood.
    pub tol: f64,
    /// Small ridge value for numerical stability.
    pub ridge: f64,
    /// Lower bound for variance components (prevents collapse to zero).
    pub var_lower_bound: f64,
    /// Maximum outer PQL iterations for binomial responses.
    pub pql_max_iter: usize,
    /// Convergence tolerance on the relative change of the fixed effects.
    pub pql_tol: f64,
}

impl Default for LmmConfig {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-6,
            ridge: 1e-8,
            var_lower_bound: 1e-10,
            pql_max_iter: 20,
            pql_tol: 1e-6,
        }
    }
}

/// Fit a Gaussian LMM with prior weights.
///
/// `z` is the random-intercept indicator matrix and `weights` the prior
/// weights of the observations. The returned log-likelihood is the REML
/// criterion; `variance_components` holds `[tau2, sigma2]`.
pub fn fit_lmm(
    y: &[f64],
    x: &DMatrix<f64>,
    names: &[String],
    z: &DMatrix<f64>,
    weights: &[f64],
    config: &LmmConfig,
) -> Result<CoreFit> {
    let n = y.len();
    if x.nrows() != n || z.nrows() != n || weights.len() != n {
        return Err(HurdleError::DimensionMismatch {
            expected: n,
            actual: x.nrows().min(z.nrows()).min(weights.len()),
        });
    }
    check_design(x, names)?;
    let p = x.ncols();
    if n <= p {
        return Err(HurdleError::Fit(
            "Model is saturated (n_samples <= n_fixed_effects)".to_string(),
        ));
    }

    let y_vec = DVector::from_column_slice(y);
    let w_inv = DVector::from_iterator(n, weights.iter().map(|&w| 1.0 / w.max(config.var_lower_bound)));
    let n_groups = z.ncols().max(1);

    let (mut sigma2, mut tau2) = initialize_variance_components(&y_vec, x, weights, config)?;

    let zzt = z * z.transpose();

    let mut log_reml_prev = f64::NEG_INFINITY;
    let mut converged = false;
    let mut iterations = 0;

    loop {
        iterations += 1;

        let v_chol = factor_v(&build_v_matrix(sigma2, tau2, &zzt, &w_inv, config.ridge))?;

        let v_inv_x = v_chol.solve(x);
        let v_inv_y = v_chol.solve(&y_vec);

        let xtvinvx = x.transpose() * &v_inv_x;
        let xtvinvx_inv = xtvinvx
            .clone()
            .try_inverse()
            .or_else(|| (&xtvinvx + DMatrix::identity(p, p) * config.ridge).try_inverse())
            .ok_or_else(|| HurdleError::Numerical("X'V^-1X is singular".to_string()))?;

        // GLS estimates: beta = (X'V^-1 X)^-1 X'V^-1 y
        let beta = &xtvinvx_inv * (x.transpose() * &v_inv_y);
        let residuals = &y_vec - x * &beta;

        // -0.5 * (log|V| + log|X'V^-1 X| + r'V^-1 r)
        let log_det_v = 2.0 * v_chol.l().diagonal().map(|d| d.ln()).sum();
        let log_det_xtvinvx = match xtvinvx.clone().cholesky() {
            Some(c) => 2.0 * c.l().diagonal().map(|d| d.ln()).sum(),
            None => f64::NAN,
        };
        let v_inv_r = v_chol.solve(&residuals);
        let log_reml = -0.5 * (log_det_v + log_det_xtvinvx + residuals.dot(&v_inv_r));

        if (log_reml - log_reml_prev).abs() < config.tol {
            converged = true;
        }
        log_reml_prev = log_reml;

        if converged || iterations >= config.max_iter {
            if !converged {
                log::debug!("REML did not converge after {} iterations", iterations);
            }
            return Ok(CoreFit {
                coefficients: beta.iter().cloned().collect(),
                covariance: xtvinvx_inv,
                log_likelihood: log_reml,
                df_residual: n - p,
                converged,
                iterations,
                variance_components: vec![tau2, sigma2],
                aliased: vec![false; p],
            });
        }

        let (new_tau2, new_sigma2) =
            update_variance_components(&v_inv_r, z, sigma2, tau2, n_groups, n - p, config);
        tau2 = new_tau2;
        sigma2 = new_sigma2;
    }
}

/// Fit a binomial mixed model by PQL.
///
/// PQL has no true likelihood, so `log_likelihood` is NaN.
pub fn fit_pql(
    y: &[f64],
    x: &DMatrix<f64>,
    names: &[String],
    z: &DMatrix<f64>,
    config: &LmmConfig,
) -> Result<CoreFit> {
    check_binary(y)?;
    let n = y.len();
    let p = x.ncols();

    // Start from the marginal log-odds, like the plain IRLS fit.
    let p_mean = (y.iter().sum::<f64>() / n.max(1) as f64).clamp(1e-10, 1.0 - 1e-10);
    let mut eta = DVector::from_element(n, (p_mean / (1.0 - p_mean)).ln());
    let mut beta_prev = DVector::<f64>::zeros(p);
    let mut last: Option<CoreFit> = None;

    for iter in 0..config.pql_max_iter {
        let mu = eta.map(inv_logit);
        let w: Vec<f64> = mu.iter().map(|m| (m * (1.0 - m)).max(1e-10)).collect();
        let z_work: Vec<f64> = (0..n).map(|i| eta[i] + (y[i] - mu[i]) / w[i]).collect();

        let fit = fit_lmm(&z_work, x, names, z, &w, config)?;
        let beta = DVector::from_column_slice(&fit.coefficients);

        // Linear predictor includes the BLUPs: u = tau2 Z' V^-1 r
        let tau2 = fit.variance_components[0];
        let sigma2 = fit.variance_components[1];
        let w_inv = DVector::from_iterator(n, w.iter().map(|wi| 1.0 / wi));
        let zzt = z * z.transpose();
        let v_chol = factor_v(&build_v_matrix(sigma2, tau2, &zzt, &w_inv, config.ridge))?;
        let residuals = DVector::from_column_slice(&z_work) - x * &beta;
        let blups = z.transpose() * v_chol.solve(&residuals) * tau2;
        eta = x * &beta + z * blups;

        let delta: f64 = (&beta - &beta_prev).iter().map(|d| d.abs()).sum();
        let scale: f64 = beta_prev.iter().map(|b| b.abs()).sum::<f64>().max(1.0);
        beta_prev = beta;

        let done = iter > 0 && delta / scale < config.pql_tol;
        last = Some(CoreFit {
            log_likelihood: f64::NAN,
            converged: done,
            iterations: iter + 1,
            ..fit
        });
        if done {
            break;
        }
    }

    let fit = last.ok_or_else(|| {
        HurdleError::InvalidParameter("pql_max_iter must be at least 1".to_string())
    })?;
    if !fit.converged {
        log::debug!("PQL did not converge after {} iterations", fit.iterations);
    }
    Ok(fit)
}

/// Build V = tau2*ZZ' + sigma2*W^-1
fn build_v_matrix(
    sigma2: f64,
    tau2: f64,
    zzt: &DMatrix<f64>,
    w_inv: &DVector<f64>,
    ridge: f64,
) -> DMatrix<f64> {
    let mut v = zzt * tau2;
    for i in 0..w_inv.len() {
        v[(i, i)] += sigma2 * w_inv[i] + ridge;
    }
    v
}

fn factor_v(v: &DMatrix<f64>) -> Result<Cholesky<f64, Dyn>> {
    let n = v.nrows();
    v.clone()
        .cholesky()
        .or_else(|| (v + DMatrix::identity(n, n) * 0.01).cholesky())
        .ok_or_else(|| HurdleError::Numerical("V is not positive definite".to_string()))
}

/// Initialize variance components from weighted OLS residuals.
fn initialize_variance_components(
    y: &DVector<f64>,
    x: &DMatrix<f64>,
    weights: &[f64],
    config: &LmmConfig,
) -> Result<(f64, f64)> {
    let n = y.len();
    let p = x.ncols();

    let w = DVector::from_column_slice(weights);
    let xw = crate::model::logistic::weight_rows(x, &w);
    let yw = DVector::from_fn(n, |i, _| y[i] * w[i].sqrt());

    let xtx = xw.transpose() * &xw;
    let xtx_inv = xtx
        .clone()
        .try_inverse()
        .or_else(|| (&xtx + DMatrix::identity(p, p) * config.ridge).try_inverse())
        .ok_or_else(|| HurdleError::Numerical("X'X is singular".to_string()))?;
    let beta_ols = &xtx_inv * (xw.transpose() * &yw);
    let residuals = &yw - &xw * beta_ols;
    let rss: f64 = residuals.iter().map(|r| r * r).sum();

    let df = n.saturating_sub(p).max(1);
    let sigma2 = (rss / df as f64).max(config.var_lower_bound);
    let tau2 = (0.1 * sigma2).max(config.var_lower_bound);

    Ok((sigma2, tau2))
}

/// Damped moment update of the variance components.
fn update_variance_components(
    v_inv_r: &DVector<f64>,
    z: &DMatrix<f64>,
    sigma2: f64,
    tau2: f64,
    n_groups: usize,
    df: usize,
    config: &LmmConfig,
) -> (f64, f64) {
    // Reduces to RSS / df when tau2 = 0 and W = I.
    let r_vinv_r = v_inv_r.iter().map(|x| x * x).sum::<f64>();
    let new_sigma2 = (sigma2 * sigma2 * r_vinv_r / df as f64).max(config.var_lower_bound);

    // Between-group variance of the BLUP scores.
    let ztr = z.transpose() * v_inv_r * tau2;
    let ss_between: f64 = ztr.iter().map(|u| u * u).sum();
    let new_tau2 = (ss_between / n_groups as f64).max(config.var_lower_bound);

    let alpha = 0.5;
    (
        (alpha * new_tau2 + (1.0 - alpha) * tau2).max(config.var_lower_bound),
        (alpha * new_sigma2 + (1.0 - alpha) * sigma2).max(config.var_lower_bound),
    )
}
