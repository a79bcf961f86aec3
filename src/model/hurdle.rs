//! Hurdle model for zero-inflated continuous data.
//!
//! A hurdle model is a two-part model:
//! 1. **Discrete component**: logistic regression for P(Y > 0) over all rows
//! 2. **Continuous component**: Gaussian regression for Y | Y > 0
//!
//! All zeros come from the discrete process. The continuous component is fit
//! on the positive rows only, so it frequently lacks data for some covariate
//! level; such a fit degrades to [`ContinuousModel::Degenerate`] instead of
//! failing. A discrete fit failure is an error.

use crate::data::{Formula, LongTable, Variable};
use crate::error::{HurdleError, Result};
use crate::model::{Family, FitBackend, FittedModel};
use serde::{Deserialize, Serialize};

/// Name of the derived positivity column used as the discrete response.
pub const POSITIVE_COLUMN: &str = ".positive";

/// Options for hurdle fitting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HurdleOptions {
    /// Suppress warnings about recovered continuous fit failures.
    pub silent: bool,
}

/// The continuous (magnitude) component of a hurdle model.
#[derive(Debug, Clone)]
pub enum ContinuousModel {
    /// Successfully fit model.
    Fitted(FittedModel),
    /// Placeholder for a failed fit: no coefficients and no residual df.
    Degenerate {
        /// Why the fit failed.
        reason: String,
    },
}

impl ContinuousModel {
    /// The fitted model, if any.
    pub fn fitted(&self) -> Option<&FittedModel> {
        match self {
            ContinuousModel::Fitted(m) => Some(m),
            ContinuousModel::Degenerate { .. } => None,
        }
    }

    /// No estimable coefficients or zero residual degrees of freedom.
    pub fn is_degenerate(&self) -> bool {
        match self {
            ContinuousModel::Fitted(m) => m.is_degenerate(),
            ContinuousModel::Degenerate { .. } => true,
        }
    }

    /// Residual degrees of freedom (0 for the placeholder).
    pub fn df_residual(&self) -> usize {
        self.fitted().map(|m| m.df_residual).unwrap_or(0)
    }

    /// Fitted coefficients (empty for the placeholder).
    pub fn coefficients(&self) -> &[f64] {
        self.fitted().map(|m| m.coefficients.as_slice()).unwrap_or(&[])
    }
}

/// A fitted hurdle model.
#[derive(Debug, Clone)]
pub struct HurdleModel {
    /// Logistic model of positivity over all rows.
    pub discrete: FittedModel,
    /// Gaussian model of the response over positive rows.
    pub continuous: ContinuousModel,
    /// Number of rows.
    pub n_obs: usize,
    /// Number of rows with a positive response.
    pub n_positive: usize,
}

impl HurdleModel {
    /// Fraction of rows with a positive response.
    pub fn positive_fraction(&self) -> f64 {
        if self.n_obs == 0 {
            return f64::NAN;
        }
        self.n_positive as f64 / self.n_obs as f64
    }
}

/// Fit a hurdle model with default options.
pub fn fit_hurdle(
    formula: &Formula,
    data: &LongTable,
    backend: &dyn FitBackend,
) -> Result<HurdleModel> {
    fit_hurdle_with(formula, data, backend, &HurdleOptions::default())
}

/// Fit a hurdle model.
///
/// # Errors
/// - `InvalidFormula` if the formula has no response.
/// - `MissingData` if the response or any predictor has missing values.
/// - Any error from the discrete fit.
pub fn fit_hurdle_with(
    formula: &Formula,
    data: &LongTable,
    backend: &dyn FitBackend,
    options: &HurdleOptions,
) -> Result<HurdleModel> {
    let response = formula.response().ok_or_else(|| HurdleError::InvalidFormula {
        formula: formula.to_string(),
        reason: "a hurdle model needs a response on the left-hand side".to_string(),
    })?;

    if data.has_column(POSITIVE_COLUMN) {
        return Err(HurdleError::InvalidParameter(format!(
            "Column name '{}' is reserved for the positivity indicator",
            POSITIVE_COLUMN
        )));
    }

    // Every column the model touches, grouping factors included.
    let shape = formula.shape_only();
    for column in std::iter::once(response).chain(shape.variables()) {
        let count = data.count_missing(column)?;
        if count > 0 {
            return Err(HurdleError::MissingData {
                column: column.to_string(),
                count,
            });
        }
    }

    let y = data.numeric_column(response)?;
    let positive: Vec<bool> = y.iter().map(|&v| v > 0.0).collect();
    let n_positive = positive.iter().filter(|&&p| p).count();

    let flags: Vec<Variable> = positive
        .iter()
        .map(|&p| Variable::Continuous(if p { 1.0 } else { 0.0 }))
        .collect();
    let table = data.clone().with_column(POSITIVE_COLUMN, flags)?;

    let continuous = match backend.fit(formula, &table, Family::Gaussian, Some(&positive)) {
        Ok(model) => ContinuousModel::Fitted(model),
        Err(e) => {
            if !options.silent {
                log::warn!(
                    "Continuous component of '{}' could not be fit ({} positive of {} rows): {}",
                    formula,
                    n_positive,
                    y.len(),
                    e
                );
            }
            ContinuousModel::Degenerate {
                reason: e.to_string(),
            }
        }
    };

    let discrete_formula = formula.with_response(POSITIVE_COLUMN);
    let discrete = backend.fit(&discrete_formula, &table, Family::Binomial, None)?;

    Ok(HurdleModel {
        discrete,
        continuous,
        n_obs: y.len(),
        n_positive,
    })
}
