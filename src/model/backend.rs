//! Concrete fitting backends.
//!
//! [`GlmBackend`] fits fixed-effects models (OLS or logistic IRLS).
//! [`MixedBackend`] fits one random intercept (REML or PQL).

use crate::data::{DesignMatrix, Formula, LongTable, RandomDesignMatrix};
use crate::error::{HurdleError, Result};
use crate::model::lm::{estimable_columns, fit_ols};
use crate::model::lmm::{fit_lmm, fit_pql, LmmConfig};
use crate::model::logistic::fit_logistic;
use crate::model::{BackendKind, CoreFit, Family, FitBackend, FittedModel};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};

/// Configuration for fixed-effects GLM fitting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GlmConfig {
    /// Maximum IRLS iterations.
    pub max_iter: usize,
    /// Convergence tolerance.
    pub tol: f64,
}

impl Default for GlmConfig {
    fn default() -> Self {
        Self {
            max_iter: 25,
            tol: 1e-8,
        }
    }
}

/// Fit a fixed-effects design with the core routine for `family`.
///
/// Columns that are linearly dependent on earlier ones are aliased: the model
/// is fit without them and they get NaN estimates and covariance entries.
/// Also used to refit reduced designs for likelihood ratio tests.
pub fn fit_design(
    family: Family,
    y: &[f64],
    design: &DesignMatrix,
    config: &GlmConfig,
) -> Result<CoreFit> {
    let p = design.n_coefficients();
    let keep = estimable_columns(design.matrix());
    if keep.len() == p {
        return fit_core(family, y, design.matrix(), design.coefficient_names(), config);
    }
    if keep.is_empty() {
        return Err(HurdleError::Fit(
            "Design matrix has no estimable columns".to_string(),
        ));
    }

    let names = design.coefficient_names();
    log::debug!(
        "Aliased coefficients dropped from the fit: {:?}",
        (0..p)
            .filter(|j| !keep.contains(j))
            .map(|j| names[j].as_str())
            .collect::<Vec<_>>()
    );
    let x = design.matrix().select_columns(&keep);
    let kept_names: Vec<String> = keep.iter().map(|&j| names[j].clone()).collect();
    let core = fit_core(family, y, &x, &kept_names, config)?;
    Ok(expand_aliased(core, &keep, p))
}

fn fit_core(
    family: Family,
    y: &[f64],
    x: &DMatrix<f64>,
    names: &[String],
    config: &GlmConfig,
) -> Result<CoreFit> {
    match family {
        Family::Gaussian => fit_ols(y, x, names),
        Family::Binomial => fit_logistic(y, x, names, config.max_iter, config.tol),
    }
}

/// Spread a fit on the `keep` columns back over all `p` coefficients.
fn expand_aliased(core: CoreFit, keep: &[usize], p: usize) -> CoreFit {
    let mut coefficients = vec![f64::NAN; p];
    let mut covariance = DMatrix::from_element(p, p, f64::NAN);
    let mut aliased = vec![true; p];
    for (a, &i) in keep.iter().enumerate() {
        coefficients[i] = core.coefficients[a];
        aliased[i] = false;
        for (b, &j) in keep.iter().enumerate() {
            covariance[(i, j)] = core.covariance[(a, b)];
        }
    }
    CoreFit {
        coefficients,
        covariance,
        aliased,
        ..core
    }
}

/// Restrict the table to `subset` and pull out the response.
fn prepare(
    formula: &Formula,
    data: &LongTable,
    subset: Option<&[bool]>,
) -> Result<(LongTable, Vec<f64>)> {
    let response = formula.response().ok_or_else(|| HurdleError::InvalidFormula {
        formula: formula.to_string(),
        reason: "model fitting needs a response".to_string(),
    })?;
    let table = match subset {
        Some(mask) => data.filter_rows(mask)?,
        None => data.clone(),
    };
    if table.n_rows() == 0 {
        return Err(HurdleError::EmptyData(format!(
            "No rows to fit '{}'",
            formula
        )));
    }
    let y = table.numeric_column(response)?;
    Ok((table, y))
}

/// Fixed-effects GLM backend.
#[derive(Debug, Clone, Default)]
pub struct GlmBackend {
    pub config: GlmConfig,
}

impl GlmBackend {
    pub fn new(config: GlmConfig) -> Self {
        Self { config }
    }
}

impl FitBackend for GlmBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Plain
    }

    fn fit(
        &self,
        formula: &Formula,
        data: &LongTable,
        family: Family,
        subset: Option<&[bool]>,
    ) -> Result<FittedModel> {
        if formula.has_random_effects() {
            return Err(HurdleError::InvalidParameter(format!(
                "Formula '{}' has grouping terms; use the mixed-effects backend",
                formula
            )));
        }
        let (table, y) = prepare(formula, data, subset)?;
        let design = DesignMatrix::from_formula(&table, formula)?;
        let core = fit_design(family, &y, &design, &self.config)?;
        Ok(FittedModel::from_core(
            self.kind(),
            family,
            formula,
            design,
            y,
            core,
        ))
    }
}

/// Random-intercept mixed model backend.
#[derive(Debug, Clone, Default)]
pub struct MixedBackend {
    pub config: LmmConfig,
}

impl MixedBackend {
    pub fn new(config: LmmConfig) -> Self {
        Self { config }
    }
}

impl FitBackend for MixedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::MixedEffects
    }

    fn fit(
        &self,
        formula: &Formula,
        data: &LongTable,
        family: Family,
        subset: Option<&[bool]>,
    ) -> Result<FittedModel> {
        let random_effect = match formula.random.as_slice() {
            [re] => re,
            [] => {
                return Err(HurdleError::InvalidParameter(format!(
                    "Formula '{}' has no grouping term for the mixed-effects backend",
                    formula
                )))
            }
            _ => {
                return Err(HurdleError::NotImplemented(
                    "Multiple random effects not yet supported".to_string(),
                ))
            }
        };

        let (table, y) = prepare(formula, data, subset)?;
        let design = DesignMatrix::from_formula(&table, &formula.fixed_only())?;
        let z = RandomDesignMatrix::from_table(&table, random_effect)?;

        let x = design.matrix();
        let names = design.coefficient_names();
        let core = match family {
            Family::Gaussian => fit_lmm(&y, x, names, &z.matrix, &vec![1.0; y.len()], &self.config)?,
            Family::Binomial => fit_pql(&y, x, names, &z.matrix, &self.config)?,
        };
        Ok(FittedModel::from_core(
            self.kind(),
            family,
            formula,
            design,
            y,
            core,
        ))
    }
}
