//! Regression backends and the hurdle model.

pub mod backend;
pub mod hurdle;
pub mod lm;
pub mod lmm;
pub mod logistic;

use crate::data::{DesignMatrix, Formula, LongTable};
use crate::error::Result;
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

pub use backend::{fit_design, GlmBackend, GlmConfig, MixedBackend};
pub use hurdle::{
    fit_hurdle, fit_hurdle_with, ContinuousModel, HurdleModel, HurdleOptions, POSITIVE_COLUMN,
};
pub use lmm::LmmConfig;

/// Response distribution of a sub-model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    /// Real-valued response, identity link.
    Gaussian,
    /// 0/1 response, logit link.
    Binomial,
}

/// Which kind of backend produced a model.
///
/// The kind decides the metric naming convention of Wald tables and whether
/// a drop-term likelihood ratio test is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Fixed-effects GLM.
    Plain,
    /// Random-intercept mixed model.
    MixedEffects,
}

impl BackendKind {
    /// Names this backend gives the statistic and p-value columns.
    pub fn metric_names(self) -> (&'static str, &'static str) {
        match self {
            BackendKind::Plain => ("Chisq", "Pr(>Chisq)"),
            BackendKind::MixedEffects => ("chisq", "Pr(> Chisq)"),
        }
    }

    /// Whether the backend supports the drop-term likelihood ratio test.
    pub fn supports_drop_term(self) -> bool {
        matches!(self, BackendKind::Plain)
    }
}

/// Raw output of a numeric fitting routine on a response and design.
#[derive(Debug, Clone)]
pub struct CoreFit {
    pub coefficients: Vec<f64>,
    pub covariance: DMatrix<f64>,
    pub log_likelihood: f64,
    pub df_residual: usize,
    pub converged: bool,
    pub iterations: usize,
    /// Variance parameters: `[sigma2]` for OLS, `[tau2, sigma2]` for mixed models.
    pub variance_components: Vec<f64>,
    /// Columns dropped as linearly dependent on earlier ones.
    pub aliased: Vec<bool>,
}

/// A fitted regression sub-model.
#[derive(Debug, Clone)]
pub struct FittedModel {
    /// Backend that produced the fit.
    pub backend: BackendKind,
    pub family: Family,
    /// Formula the model was fit with.
    pub formula: Formula,
    pub coefficient_names: Vec<String>,
    /// Estimates; NaN for aliased coefficients.
    pub coefficients: Vec<f64>,
    /// Covariance of the coefficient estimates (NaN rows and columns for
    /// aliased coefficients).
    pub covariance: DMatrix<f64>,
    /// Whether each coefficient was aliased and left out of the fit.
    pub aliased: Vec<bool>,
    pub df_residual: usize,
    /// Log-likelihood (REML criterion for Gaussian mixed fits, NaN for PQL).
    pub log_likelihood: f64,
    pub variance_components: Vec<f64>,
    pub converged: bool,
    pub iterations: usize,
    /// Fixed-effects design the model was fit on.
    pub design: DesignMatrix,
    /// Response values of the rows used.
    pub response: Vec<f64>,
}

impl FittedModel {
    pub(crate) fn from_core(
        backend: BackendKind,
        family: Family,
        formula: &Formula,
        design: DesignMatrix,
        response: Vec<f64>,
        core: CoreFit,
    ) -> Self {
        Self {
            backend,
            family,
            formula: formula.clone(),
            coefficient_names: design.coefficient_names().to_vec(),
            coefficients: core.coefficients,
            covariance: core.covariance,
            aliased: core.aliased,
            df_residual: core.df_residual,
            log_likelihood: core.log_likelihood,
            variance_components: core.variance_components,
            converged: core.converged,
            iterations: core.iterations,
            design,
            response,
        }
    }

    /// Number of observations used.
    pub fn n_obs(&self) -> usize {
        self.response.len()
    }

    /// Get coefficient by name.
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        let idx = self.coefficient_names.iter().position(|n| n == name)?;
        self.coefficients.get(idx).copied()
    }

    /// Standard errors from the covariance diagonal; NaN when aliased.
    pub fn std_errors(&self) -> Vec<f64> {
        (0..self.coefficients.len())
            .map(|j| {
                let v = self.covariance[(j, j)];
                if v.is_nan() {
                    f64::NAN
                } else {
                    v.max(0.0).sqrt()
                }
            })
            .collect()
    }

    /// Names of the aliased coefficients.
    pub fn aliased_coefficients(&self) -> Vec<&str> {
        self.coefficient_names
            .iter()
            .zip(&self.aliased)
            .filter(|(_, a)| **a)
            .map(|(n, _)| n.as_str())
            .collect()
    }

    /// Indices of the coefficients that were estimated.
    pub fn estimable(&self) -> Vec<usize> {
        (0..self.coefficients.len())
            .filter(|&j| !self.aliased.get(j).copied().unwrap_or(false))
            .collect()
    }

    /// No estimable coefficients or no residual degrees of freedom.
    pub fn is_degenerate(&self) -> bool {
        self.estimable().is_empty() || self.df_residual == 0
    }
}

/// A regression fitting routine.
///
/// Implementations fit `formula` on `data` (restricted to the rows where
/// `subset` is true) under the given family.
pub trait FitBackend: Send + Sync {
    /// Kind of models this backend produces.
    fn kind(&self) -> BackendKind;

    /// Fit one model.
    fn fit(
        &self,
        formula: &Formula,
        data: &LongTable,
        family: Family,
        subset: Option<&[bool]>,
    ) -> Result<FittedModel>;
}
