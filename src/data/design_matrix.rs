//! Design matrix construction from a long table and formula.

use crate::data::{Formula, LongTable, Term, Variable, VariableType};
use crate::error::{HurdleError, Result};
use nalgebra::DMatrix;
use std::collections::HashMap;

/// Column label used for the intercept, both as coefficient name and term.
pub const INTERCEPT: &str = "(Intercept)";

/// A design matrix for linear modeling.
///
/// Only the fixed-effect part of the formula is encoded; grouping terms are
/// handled by [`RandomDesignMatrix`](crate::data::RandomDesignMatrix).
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    /// The design matrix (rows × coefficients).
    matrix: DMatrix<f64>,
    /// Names of the coefficients (columns).
    coefficient_names: Vec<String>,
    /// Term label each column belongs to.
    assign: Vec<String>,
    /// Reference levels for categorical variables.
    reference_levels: HashMap<String, String>,
}

impl DesignMatrix {
    /// Create a design matrix directly from components.
    ///
    /// Every column is assigned to a term named after the coefficient.
    pub fn from_matrix(matrix: DMatrix<f64>, coefficient_names: Vec<String>) -> Self {
        let assign = coefficient_names.clone();
        Self {
            matrix,
            coefficient_names,
            assign,
            reference_levels: HashMap::new(),
        }
    }

    /// Build a design matrix from the fixed-effect terms of a formula.
    ///
    /// Categorical variables use treatment contrasts against their first
    /// observed level. Declared levels without rows get no column, and a
    /// factor with fewer than two observed levels is an error.
    pub fn from_formula(table: &LongTable, formula: &Formula) -> Result<Self> {
        let n_rows = table.n_rows();

        for term in &formula.terms {
            for var in term.variables() {
                if !table.has_column(var) {
                    return Err(HurdleError::MissingColumn(var.to_string()));
                }
            }
        }

        let mut reference_levels = HashMap::new();
        for var in formula.terms.iter().flat_map(|t| t.variables()) {
            if table.column_type(var) == Some(VariableType::Categorical) {
                let levels = observed_levels(table, var)?;
                if levels.len() < 2 {
                    return Err(HurdleError::Fit(format!(
                        "Factor '{}' has {} observed level(s); contrasts need at least 2",
                        var,
                        levels.len()
                    )));
                }
                reference_levels.insert(var.to_string(), levels[0].clone());
            }
        }

        let mut coefficient_names = Vec::new();
        let mut assign = Vec::new();
        let mut columns: Vec<Vec<f64>> = Vec::new();

        if formula.intercept {
            coefficient_names.push(INTERCEPT.to_string());
            assign.push(INTERCEPT.to_string());
            columns.push(vec![1.0; n_rows]);
        }

        // Without an intercept the first factor is coded with all its levels.
        let mut full_coding_available = !formula.intercept;

        for term in &formula.terms {
            let label = term.label();
            match term {
                Term::Intercept => {}
                Term::Main(var_name) => {
                    let full = full_coding_available
                        && table.column_type(var_name) == Some(VariableType::Categorical);
                    if full {
                        full_coding_available = false;
                    }
                    for (name, col) in Self::variable_columns(table, var_name, &reference_levels, full)? {
                        coefficient_names.push(name);
                        assign.push(label.clone());
                        columns.push(col);
                    }
                }
                Term::Interaction(var1, var2) => {
                    let cols1 = Self::variable_columns(table, var1, &reference_levels, false)?;
                    let cols2 = Self::variable_columns(table, var2, &reference_levels, false)?;

                    for (name1, col1) in &cols1 {
                        for (name2, col2) in &cols2 {
                            coefficient_names.push(format!("{}:{}", name1, name2));
                            assign.push(label.clone());
                            columns.push(col1.iter().zip(col2).map(|(a, b)| a * b).collect());
                        }
                    }
                }
            }
        }

        let matrix = DMatrix::from_fn(n_rows, columns.len(), |i, j| columns[j][i]);

        Ok(Self {
            matrix,
            coefficient_names,
            assign,
            reference_levels,
        })
    }

    /// Encoded columns for a single variable.
    fn variable_columns(
        table: &LongTable,
        var_name: &str,
        reference_levels: &HashMap<String, String>,
        full_coding: bool,
    ) -> Result<Vec<(String, Vec<f64>)>> {
        let values = table.column(var_name)?;
        let missing = values.iter().filter(|v| v.is_missing()).count();
        if missing > 0 {
            return Err(HurdleError::MissingData {
                column: var_name.to_string(),
                count: missing,
            });
        }

        match table.column_type(var_name) {
            Some(VariableType::Continuous) | None => {
                let col = values
                    .iter()
                    .map(|v| v.as_continuous().unwrap_or(0.0))
                    .collect();
                Ok(vec![(var_name.to_string(), col)])
            }
            Some(VariableType::Categorical) => {
                let ref_level = reference_levels.get(var_name);
                let result = observed_levels(table, var_name)?
                    .iter()
                    .filter(|level| full_coding || Some(*level) != ref_level)
                    .map(|level| {
                        let col = values
                            .iter()
                            .map(|v| match v {
                                Variable::Categorical(s) if s == level => 1.0,
                                _ => 0.0,
                            })
                            .collect();
                        (format!("{}{}", var_name, level), col)
                    })
                    .collect();
                Ok(result)
            }
        }
    }

    /// Get the design matrix.
    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Get coefficient names.
    pub fn coefficient_names(&self) -> &[String] {
        &self.coefficient_names
    }

    /// Term label of every column.
    pub fn assign(&self) -> &[String] {
        &self.assign
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of coefficients (columns).
    pub fn n_coefficients(&self) -> usize {
        self.matrix.ncols()
    }

    /// Get the reference level for a categorical variable.
    pub fn reference_level(&self, variable: &str) -> Option<&str> {
        self.reference_levels.get(variable).map(|s| s.as_str())
    }

    /// Get the index of a coefficient by name.
    pub fn coefficient_index(&self, name: &str) -> Option<usize> {
        self.coefficient_names.iter().position(|n| n == name)
    }

    /// Column indices belonging to a term label.
    pub fn columns_for_term(&self, label: &str) -> Vec<usize> {
        self.assign
            .iter()
            .enumerate()
            .filter(|(_, a)| a.as_str() == label)
            .map(|(i, _)| i)
            .collect()
    }

    /// Check if the matrix has an intercept.
    pub fn has_intercept(&self) -> bool {
        self.coefficient_names.first().map(|s| s.as_str()) == Some(INTERCEPT)
    }

    /// Copy of the design without the given columns.
    pub fn without_columns(&self, drop: &[usize]) -> Self {
        let keep: Vec<usize> = (0..self.n_coefficients())
            .filter(|j| !drop.contains(j))
            .collect();
        let matrix = DMatrix::from_fn(self.n_rows(), keep.len(), |i, j| self.matrix[(i, keep[j])]);
        Self {
            matrix,
            coefficient_names: keep.iter().map(|&j| self.coefficient_names[j].clone()).collect(),
            assign: keep.iter().map(|&j| self.assign[j].clone()).collect(),
            reference_levels: self.reference_levels.clone(),
        }
    }
}

/// Declared levels of a categorical column that occur in at least one row.
fn observed_levels(table: &LongTable, var_name: &str) -> Result<Vec<String>> {
    let values = table.column(var_name)?;
    Ok(table
        .levels(var_name)?
        .iter()
        .filter(|level| {
            values
                .iter()
                .any(|v| matches!(v, Variable::Categorical(s) if s == *level))
        })
        .cloned()
        .collect())
}
