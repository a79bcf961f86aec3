//! Batch runner: fit and test a hurdle model for every variable.

use crate::batch::{BatchResult, BatchRow};
use crate::data::{Formula, LongTable};
use crate::error::{HurdleError, Result};
use crate::model::{fit_hurdle_with, FitBackend, GlmBackend, HurdleModel, HurdleOptions};
use crate::test::{test_hurdle_with, ChiSquaredTests, Hypothesis, HypothesisTests, TestType};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// What to do when one variable fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Return the first failure in variable-id order.
    #[default]
    Abort,
    /// Record failures per variable and keep going.
    Collect,
}

/// Batch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Column holding the variable (gene) id.
    pub id_column: String,
    pub test_type: TestType,
    /// Return the fitted models alongside the tests.
    pub keep_models: bool,
    /// Process variables on a rayon pool.
    pub parallel: bool,
    /// Pool size; 0 uses the rayon default.
    pub n_threads: usize,
    /// Drop unused factor levels from the whole table before grouping.
    ///
    /// Designs only code the levels a variable actually has, so this changes
    /// the declared level sets of the grouped tables but not the statistics.
    pub drop_unused_levels: bool,
    /// Suppress warnings about recovered failures.
    pub silent: bool,
    pub failure_policy: FailurePolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            id_column: "variable_id".to_string(),
            test_type: TestType::Wald,
            keep_models: false,
            parallel: true,
            n_threads: 0,
            drop_unused_levels: true,
            silent: false,
            failure_policy: FailurePolicy::Abort,
        }
    }
}

/// Computes the hypothesis of one variable from its fitted model.
pub type HypothesisFn = Arc<dyn Fn(&HurdleModel) -> Result<Hypothesis> + Send + Sync>;

/// Builder for batch runs.
///
/// # Example
/// ```ignore
/// let result = BatchRunner::new()
///     .test_type(TestType::Lrt)
///     .keep_models(true)
///     .run(&formula, &table, &Hypothesis::term("group"))?;
/// ```
#[derive(Clone)]
pub struct BatchRunner {
    config: BatchConfig,
    backend: Arc<dyn FitBackend>,
    tests: Arc<dyn HypothesisTests>,
    hypothesis_fn: Option<HypothesisFn>,
}

impl std::fmt::Debug for BatchRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRunner")
            .field("config", &self.config)
            .field("backend", &self.backend.kind())
            .field("hypothesis_fn", &self.hypothesis_fn.is_some())
            .finish()
    }
}

impl Default for BatchRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl BatchRunner {
    /// Runner with the GLM backend and chi-squared tests.
    pub fn new() -> Self {
        Self {
            config: BatchConfig::default(),
            backend: Arc::new(GlmBackend::default()),
            tests: Arc::new(ChiSquaredTests::default()),
            hypothesis_fn: None,
        }
    }

    /// Replace all settings.
    pub fn config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn FitBackend>) -> Self {
        self.backend = backend;
        self
    }

    pub fn tests(mut self, tests: Arc<dyn HypothesisTests>) -> Self {
        self.tests = tests;
        self
    }

    pub fn id_column(mut self, column: &str) -> Self {
        self.config.id_column = column.to_string();
        self
    }

    pub fn test_type(mut self, test_type: TestType) -> Self {
        self.config.test_type = test_type;
        self
    }

    pub fn keep_models(mut self, keep: bool) -> Self {
        self.config.keep_models = keep;
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.config.parallel = parallel;
        self
    }

    pub fn n_threads(mut self, n: usize) -> Self {
        self.config.n_threads = n;
        self
    }

    pub fn drop_unused_levels(mut self, drop: bool) -> Self {
        self.config.drop_unused_levels = drop;
        self
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.config.silent = silent;
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    /// Compute each variable's hypothesis from its fitted model instead of
    /// using the fixed one.
    pub fn hypothesis_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(&HurdleModel) -> Result<Hypothesis> + Send + Sync + 'static,
    {
        self.hypothesis_fn = Some(Arc::new(f));
        self
    }

    /// Current settings.
    pub fn settings(&self) -> &BatchConfig {
        &self.config
    }

    /// Fit and test every variable of `table`.
    pub fn run(
        &self,
        formula: &Formula,
        table: &LongTable,
        hypothesis: &Hypothesis,
    ) -> Result<BatchResult> {
        let mut table = table.clone();
        if self.config.drop_unused_levels {
            table.drop_unused_levels();
        }

        let groups = table.group_by(&self.config.id_column)?;
        if groups.is_empty() {
            return Err(HurdleError::EmptyData(format!(
                "No variables in column '{}'",
                self.config.id_column
            )));
        }
        log::info!(
            "Fitting {} variable(s) with {} test ({})",
            groups.len(),
            self.config.test_type,
            if self.config.parallel { "parallel" } else { "sequential" }
        );

        let groups: Vec<(String, LongTable)> = groups.into_iter().collect();
        let outcomes: Vec<(String, Result<(BatchRow, HurdleModel)>)> = if self.config.parallel {
            let work = || {
                groups
                    .par_iter()
                    .map(|(id, data)| (id.clone(), self.process(id, formula, data, hypothesis)))
                    .collect::<Vec<_>>()
            };
            if self.config.n_threads > 0 {
                let pool = rayon::ThreadPoolBuilder::new()
                    .num_threads(self.config.n_threads)
                    .build()
                    .map_err(|e| HurdleError::InvalidParameter(format!("Thread pool: {}", e)))?;
                pool.install(work)
            } else {
                work()
            }
        } else {
            groups
                .iter()
                .map(|(id, data)| (id.clone(), self.process(id, formula, data, hypothesis)))
                .collect()
        };

        let mut result = BatchResult {
            rows: Vec::with_capacity(outcomes.len()),
            models: self.config.keep_models.then(BTreeMap::new),
            failures: BTreeMap::new(),
        };

        for (id, outcome) in outcomes {
            match outcome {
                Ok((row, model)) => {
                    result.rows.push(row);
                    if let Some(models) = result.models.as_mut() {
                        models.insert(id, model);
                    }
                }
                Err(e) => match self.config.failure_policy {
                    FailurePolicy::Abort => return Err(HurdleError::for_variable(&id, e)),
                    FailurePolicy::Collect => {
                        if !self.config.silent {
                            log::warn!("Variable '{}' failed: {}", id, e);
                        }
                        result.failures.insert(id, e);
                    }
                },
            }
        }

        log::info!(
            "Finished {} variable(s), {} failure(s)",
            result.len(),
            result.failures.len()
        );
        Ok(result)
    }

    fn process(
        &self,
        id: &str,
        formula: &Formula,
        data: &LongTable,
        hypothesis: &Hypothesis,
    ) -> Result<(BatchRow, HurdleModel)> {
        let options = HurdleOptions {
            silent: self.config.silent,
        };
        let model = fit_hurdle_with(formula, data, self.backend.as_ref(), &options)?;
        let hypothesis = match &self.hypothesis_fn {
            Some(f) => f(&model)?,
            None => hypothesis.clone(),
        };
        let test = test_hurdle_with(
            &model,
            &hypothesis,
            self.config.test_type,
            self.tests.as_ref(),
            &options,
        )?;
        let row = BatchRow::from_test(id, &test)?;
        Ok((row, model))
    }
}

/// Fit and test every variable of `table` with the given backend.
pub fn run_batch(
    formula: &Formula,
    table: &LongTable,
    backend: Arc<dyn FitBackend>,
    hypothesis: &Hypothesis,
    config: &BatchConfig,
) -> Result<BatchResult> {
    BatchRunner::new()
        .backend(backend)
        .config(config.clone())
        .run(formula, table, hypothesis)
}
