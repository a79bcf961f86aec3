//! Grouping (random-effect) terms for mixed models.
//!
//! Supports lme4-style syntax:
//! - `(1 | subject)` - random intercept per subject
//! - `(1 + time | subject)` - random intercept and slope
//! - `(0 + time | subject)` - random slope only (no intercept)
//!
//! Only random intercepts can be turned into a design matrix.

use crate::data::{LongTable, Variable};
use crate::error::{HurdleError, Result};
use nalgebra::DMatrix;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single grouping term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomEffect {
    /// Terms in the random effect (e.g., ["1"] for intercept, ["1", "time"] for intercept + slope).
    pub terms: Vec<String>,
    /// Grouping variable (e.g., "donor").
    pub grouping: String,
    /// Whether to include a random intercept.
    pub has_intercept: bool,
}

impl RandomEffect {
    /// Parse a grouping term such as `(1 | donor)`.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();

        if !text.starts_with('(') || !text.ends_with(')') {
            return Err(HurdleError::FormulaParse(format!(
                "Random effect must be wrapped in parentheses: {}",
                text
            )));
        }

        let inner = text[1..text.len() - 1].trim();

        let (terms_str, grouping) = match inner.split('|').collect::<Vec<_>>()[..] {
            [terms, grouping] => (terms.trim(), grouping.trim().to_string()),
            _ => {
                return Err(HurdleError::FormulaParse(format!(
                    "Random effect must have exactly one '|': {}",
                    text
                )))
            }
        };

        if grouping.is_empty() {
            return Err(HurdleError::FormulaParse(
                "Random effect grouping variable cannot be empty".to_string(),
            ));
        }

        let mut terms = Vec::new();
        let mut has_intercept = true;

        for term in terms_str.split('+').map(|t| t.trim()) {
            match term {
                "" | "1" => continue,
                "0" | "-1" => has_intercept = false,
                other => terms.push(other.to_string()),
            }
        }

        if has_intercept {
            terms.insert(0, "1".to_string());
        }

        if terms.is_empty() {
            return Err(HurdleError::FormulaParse(
                "Random effect must have at least one term".to_string(),
            ));
        }

        Ok(Self {
            terms,
            grouping,
            has_intercept,
        })
    }

    /// Check if this is a random intercept only.
    pub fn is_intercept_only(&self) -> bool {
        self.terms.len() == 1 && self.terms[0] == "1"
    }
}

impl std::fmt::Display for RandomEffect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.has_intercept {
            write!(f, "({} | {})", self.terms.join(" + "), self.grouping)
        } else {
            write!(f, "(0 + {} | {})", self.terms.join(" + "), self.grouping)
        }
    }
}

/// Design matrix for a random intercept (Z matrix).
#[derive(Debug, Clone)]
pub struct RandomDesignMatrix {
    /// The Z matrix (rows × groups), one indicator column per group.
    pub matrix: DMatrix<f64>,
    /// Group index of each row.
    pub group_indices: Vec<usize>,
    /// Group labels, in order of first appearance.
    pub group_ids: Vec<String>,
    /// Number of groups.
    pub n_groups: usize,
}

impl RandomDesignMatrix {
    /// Build the Z matrix for a random intercept over all rows of `table`.
    pub fn from_table(table: &LongTable, random_effect: &RandomEffect) -> Result<Self> {
        if !random_effect.is_intercept_only() {
            return Err(HurdleError::NotImplemented(format!(
                "Random slopes are not supported; use (1 | {}) instead of {}",
                random_effect.grouping, random_effect
            )));
        }

        let column = table.column(&random_effect.grouping)?;
        let n_rows = column.len();

        let mut group_map: HashMap<String, usize> = HashMap::new();
        let mut group_ids: Vec<String> = Vec::new();
        let mut group_indices: Vec<usize> = Vec::with_capacity(n_rows);

        for val in column {
            let key = match val {
                Variable::Missing => {
                    return Err(HurdleError::MissingData {
                        column: random_effect.grouping.clone(),
                        count: column.iter().filter(|v| v.is_missing()).count(),
                    })
                }
                other => other.key().unwrap_or_default(),
            };
            let idx = match group_map.get(&key) {
                Some(&idx) => idx,
                None => {
                    let idx = group_ids.len();
                    group_map.insert(key.clone(), idx);
                    group_ids.push(key);
                    idx
                }
            };
            group_indices.push(idx);
        }

        let n_groups = group_ids.len();
        let mut z = DMatrix::zeros(n_rows, n_groups);
        for (row, &group) in group_indices.iter().enumerate() {
            z[(row, group)] = 1.0;
        }

        Ok(Self {
            matrix: z,
            group_indices,
            group_ids,
            n_groups,
        })
    }

    /// Number of rows.
    pub fn n_rows(&self) -> usize {
        self.matrix.nrows()
    }

    /// Number of observations in each group.
    pub fn observations_per_group(&self) -> Vec<usize> {
        let mut counts = vec![0usize; self.n_groups];
        for &idx in &self.group_indices {
            counts[idx] += 1;
        }
        counts
    }
}
