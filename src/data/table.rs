//! Long-format observation tables.
//!
//! A [`LongTable`] holds one row per (sample, variable) observation: a
//! variable identifier column, a numeric response and any number of covariate
//! columns. Categorical columns carry a declared, ordered set of factor levels
//! that survives row subsetting, so a subset can have levels with no rows.

use crate::error::{HurdleError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// A single cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    /// Categorical value (one of the column's levels).
    Categorical(String),
    /// Continuous numeric value.
    Continuous(f64),
    /// Missing value.
    Missing,
}

impl Variable {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Variable::Missing)
    }

    /// Try to get as categorical string.
    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            Variable::Categorical(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as continuous f64.
    pub fn as_continuous(&self) -> Option<f64> {
        match self {
            Variable::Continuous(v) => Some(*v),
            _ => None,
        }
    }

    /// Render the value as a grouping key.
    pub fn key(&self) -> Option<String> {
        match self {
            Variable::Categorical(s) => Some(s.clone()),
            Variable::Continuous(v) => Some(v.to_string()),
            Variable::Missing => None,
        }
    }
}

impl From<f64> for Variable {
    fn from(v: f64) -> Self {
        if v.is_nan() {
            Variable::Missing
        } else {
            Variable::Continuous(v)
        }
    }
}

impl From<&str> for Variable {
    fn from(s: &str) -> Self {
        Variable::Categorical(s.to_string())
    }
}

/// Column type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    Categorical,
    Continuous,
}

fn is_na(raw: &str) -> bool {
    raw.is_empty() || raw == "NA" || raw == "na" || raw == "NaN"
}

/// Columnar long-format table.
#[derive(Debug, Clone, Default)]
pub struct LongTable {
    /// Column names in insertion order.
    column_names: Vec<String>,
    /// Column values.
    columns: HashMap<String, Vec<Variable>>,
    /// Type of each column.
    column_types: HashMap<String, VariableType>,
    /// Declared factor levels of categorical columns.
    levels: HashMap<String, Vec<String>>,
    /// Number of rows.
    n_rows: usize,
}

impl LongTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a table from a tab-separated file with a header row.
    ///
    /// Columns are inferred as continuous if every non-missing value parses
    /// as a number, otherwise categorical. Empty cells and `NA` are missing.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    /// Load a tab-separated table from any reader.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(true)
            .flexible(false)
            .from_reader(reader);

        let header: Vec<String> = rdr.headers()?.iter().map(|h| h.trim().to_string()).collect();
        if header.is_empty() {
            return Err(HurdleError::EmptyData("Table has no columns".to_string()));
        }

        let mut raw: Vec<Vec<String>> = vec![Vec::new(); header.len()];
        for record in rdr.records() {
            let record = record?;
            for (col_idx, field) in record.iter().enumerate() {
                raw[col_idx].push(field.trim().to_string());
            }
        }

        if raw[0].is_empty() {
            return Err(HurdleError::EmptyData("No rows in table".to_string()));
        }

        let mut table = LongTable::new();
        for (name, values) in header.into_iter().zip(raw) {
            let all_numeric = values
                .iter()
                .all(|v| is_na(v) || v.parse::<f64>().is_ok());
            let column: Vec<Variable> = values
                .iter()
                .map(|v| {
                    if is_na(v) {
                        Variable::Missing
                    } else if all_numeric {
                        v.parse::<f64>().map(Variable::Continuous).unwrap_or(Variable::Missing)
                    } else {
                        Variable::Categorical(v.clone())
                    }
                })
                .collect();
            table.add_column(&name, column)?;
        }

        Ok(table)
    }

    /// Add (or replace) a column, inferring its type from the values.
    ///
    /// Categorical columns get their distinct values, sorted, as levels.
    pub fn add_column(&mut self, name: &str, values: Vec<Variable>) -> Result<()> {
        if self.column_names.is_empty() {
            self.n_rows = values.len();
        } else if values.len() != self.n_rows {
            return Err(HurdleError::DimensionMismatch {
                expected: self.n_rows,
                actual: values.len(),
            });
        }

        let has_cat = values.iter().any(|v| matches!(v, Variable::Categorical(_)));
        let has_num = values.iter().any(|v| matches!(v, Variable::Continuous(_)));
        let var_type = match (has_cat, has_num) {
            (true, true) => {
                return Err(HurdleError::InvalidVariableType {
                    column: name.to_string(),
                    reason: "column mixes categorical and numeric values".to_string(),
                })
            }
            (true, false) => VariableType::Categorical,
            _ => VariableType::Continuous,
        };

        if var_type == VariableType::Categorical {
            let levels: BTreeSet<String> = values
                .iter()
                .filter_map(|v| v.as_categorical().map(String::from))
                .collect();
            self.levels.insert(name.to_string(), levels.into_iter().collect());
        } else {
            self.levels.remove(name);
        }

        if !self.columns.contains_key(name) {
            self.column_names.push(name.to_string());
        }
        self.columns.insert(name.to_string(), values);
        self.column_types.insert(name.to_string(), var_type);
        Ok(())
    }

    /// Builder form of [`add_column`](Self::add_column).
    pub fn with_column(mut self, name: &str, values: Vec<Variable>) -> Result<Self> {
        self.add_column(name, values)?;
        Ok(self)
    }

    /// Add a numeric column.
    pub fn add_numeric(&mut self, name: &str, values: &[f64]) -> Result<()> {
        self.add_column(name, values.iter().map(|&v| Variable::from(v)).collect())
    }

    /// Add a categorical column.
    pub fn add_categorical(&mut self, name: &str, values: &[&str]) -> Result<()> {
        self.add_column(name, values.iter().map(|&v| Variable::from(v)).collect())
    }

    /// Declare the ordered factor levels of a categorical column.
    ///
    /// The first level is the reference level. Every observed value must be
    /// among the declared levels; declared levels need not be observed.
    pub fn set_levels(&mut self, name: &str, levels: Vec<String>) -> Result<()> {
        if self.column_type(name) != Some(VariableType::Categorical) {
            return Err(HurdleError::InvalidVariableType {
                column: name.to_string(),
                reason: "levels can only be declared for categorical columns".to_string(),
            });
        }
        let values = self.column(name)?;
        if let Some(unknown) = values
            .iter()
            .filter_map(|v| v.as_categorical())
            .find(|v| !levels.iter().any(|l| l == v))
        {
            return Err(HurdleError::InvalidParameter(format!(
                "Value '{}' of column '{}' is not among the declared levels {:?}",
                unknown, name, levels
            )));
        }
        self.levels.insert(name.to_string(), levels);
        Ok(())
    }

    /// Override column types, re-interpreting values.
    ///
    /// Numeric values converted to categorical use their display form as the
    /// level; categorical values that do not parse as numbers become missing.
    pub fn with_column_types(mut self, types: &HashMap<String, VariableType>) -> Result<Self> {
        for (name, var_type) in types {
            if self.column_type(name) == Some(*var_type) {
                continue;
            }
            let values = self.column(name)?.to_vec();
            let converted: Vec<Variable> = values
                .into_iter()
                .map(|v| match (v, var_type) {
                    (Variable::Continuous(x), VariableType::Categorical) => {
                        Variable::Categorical(x.to_string())
                    }
                    (Variable::Categorical(s), VariableType::Continuous) => s
                        .trim()
                        .parse::<f64>()
                        .map(Variable::Continuous)
                        .unwrap_or(Variable::Missing),
                    (other, _) => other,
                })
                .collect();
            self.add_column(name, converted)?;
            // An all-missing column infers as continuous; keep the requested type.
            self.column_types.insert(name.clone(), *var_type);
            if *var_type == VariableType::Categorical {
                self.levels.entry(name.clone()).or_default();
            }
        }
        Ok(self)
    }

    /// Column names in order.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    /// Number of columns.
    pub fn n_columns(&self) -> usize {
        self.column_names.len()
    }

    /// Check if a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    /// Get all values of a column.
    pub fn column(&self, name: &str) -> Result<&[Variable]> {
        self.columns
            .get(name)
            .map(|v| v.as_slice())
            .ok_or_else(|| HurdleError::MissingColumn(name.to_string()))
    }

    /// Get a single cell.
    pub fn get(&self, row: usize, name: &str) -> Option<&Variable> {
        self.columns.get(name).and_then(|c| c.get(row))
    }

    /// Get the type of a column.
    pub fn column_type(&self, name: &str) -> Option<VariableType> {
        self.column_types.get(name).copied()
    }

    /// Declared levels of a categorical column.
    pub fn levels(&self, name: &str) -> Result<&[String]> {
        match self.column_type(name) {
            Some(VariableType::Categorical) => Ok(self
                .levels
                .get(name)
                .map(|l| l.as_slice())
                .unwrap_or(&[])),
            Some(VariableType::Continuous) => Err(HurdleError::InvalidVariableType {
                column: name.to_string(),
                reason: "continuous columns have no levels".to_string(),
            }),
            None => Err(HurdleError::MissingColumn(name.to_string())),
        }
    }

    /// Numeric values of a continuous column.
    ///
    /// Fails on a missing value; callers that need to report missingness
    /// should use [`count_missing`](Self::count_missing) first.
    pub fn numeric_column(&self, name: &str) -> Result<Vec<f64>> {
        let values = self.column(name)?;
        values
            .iter()
            .map(|v| match v {
                Variable::Continuous(x) => Ok(*x),
                Variable::Missing => Err(HurdleError::MissingData {
                    column: name.to_string(),
                    count: values.iter().filter(|v| v.is_missing()).count(),
                }),
                Variable::Categorical(_) => Err(HurdleError::InvalidVariableType {
                    column: name.to_string(),
                    reason: "expected a numeric column".to_string(),
                }),
            })
            .collect()
    }

    /// Number of missing values in a column.
    pub fn count_missing(&self, name: &str) -> Result<usize> {
        Ok(self.column(name)?.iter().filter(|v| v.is_missing()).count())
    }

    /// Keep only the rows at the given indices, in that order.
    ///
    /// Declared levels are preserved.
    pub fn subset_rows(&self, rows: &[usize]) -> Result<Self> {
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.n_rows) {
            return Err(HurdleError::InvalidParameter(format!(
                "Row index {} out of bounds for table with {} rows",
                bad, self.n_rows
            )));
        }
        let columns = self
            .columns
            .iter()
            .map(|(name, values)| {
                (name.clone(), rows.iter().map(|&r| values[r].clone()).collect())
            })
            .collect();
        Ok(Self {
            column_names: self.column_names.clone(),
            columns,
            column_types: self.column_types.clone(),
            levels: self.levels.clone(),
            n_rows: rows.len(),
        })
    }

    /// Keep the rows where `mask` is true.
    pub fn filter_rows(&self, mask: &[bool]) -> Result<Self> {
        if mask.len() != self.n_rows {
            return Err(HurdleError::DimensionMismatch {
                expected: self.n_rows,
                actual: mask.len(),
            });
        }
        let rows: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter(|(_, &keep)| keep)
            .map(|(i, _)| i)
            .collect();
        self.subset_rows(&rows)
    }

    /// Remove declared levels that no row uses.
    pub fn drop_unused_levels(&mut self) {
        for (name, levels) in self.levels.iter_mut() {
            if let Some(values) = self.columns.get(name) {
                let used: BTreeSet<&str> =
                    values.iter().filter_map(|v| v.as_categorical()).collect();
                levels.retain(|l| used.contains(l.as_str()));
            }
        }
    }

    /// Partition the rows by the value of `column`.
    ///
    /// Groups are keyed and ordered by the rendered column value. Every row
    /// lands in exactly one group; a missing key is an error.
    pub fn group_by(&self, column: &str) -> Result<BTreeMap<String, LongTable>> {
        let values = self.column(column)?;
        let mut rows_by_key: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (row, value) in values.iter().enumerate() {
            let key = value.key().ok_or_else(|| HurdleError::MissingData {
                column: column.to_string(),
                count: values.iter().filter(|v| v.is_missing()).count(),
            })?;
            rows_by_key.entry(key).or_default().push(row);
        }
        rows_by_key
            .into_iter()
            .map(|(key, rows)| Ok((key, self.subset_rows(&rows)?)))
            .collect()
    }
}
