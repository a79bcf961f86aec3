//! Composable Hurdle Model Library
//!
//! Two-part (hurdle) models for zero-inflated continuous data such as
//! single-cell expression: a logistic model of whether a value is positive,
//! and a gaussian model of the positive values. Each part is tested
//! separately and the two chi-squared statistics are summed.
//!
//! # Overview
//!
//! - **data**: Long-format tables, formulas and design matrices
//! - **model**: Regression backends (GLM, random-intercept mixed model) and the hurdle fit
//! - **test**: Wald and drop-term likelihood ratio tests, combined across the two parts
//! - **batch**: Per-variable fitting and testing across a table, in parallel
//!
//! # Example
//!
//! ```no_run
//! use composable_hurdle::prelude::*;
//!
//! let table = LongTable::from_tsv("cells.tsv").unwrap();
//! let formula = Formula::parse("expr ~ group").unwrap();
//!
//! let results = BatchRunner::new()
//!     .id_column("primerid")
//!     .test_type(TestType::Lrt)
//!     .run(&formula, &table, &Hypothesis::term("group"))
//!     .unwrap();
//!
//! results.to_tsv("hurdle_results.tsv").unwrap();
//! ```

pub mod batch;
pub mod data;
pub mod error;
pub mod model;
pub mod test;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::batch::{
        run_batch, AnalysisConfig, BackendConfig, BatchConfig, BatchResult, BatchRow,
        BatchRunner, FailurePolicy, TestSummary,
    };
    pub use crate::data::{DesignMatrix, Formula, LongTable, Term, Variable, VariableType};
    pub use crate::error::{HurdleError, Result};
    pub use crate::model::{
        fit_hurdle, fit_hurdle_with, BackendKind, ContinuousModel, Family, FitBackend,
        FittedModel, GlmBackend, GlmConfig, HurdleModel, HurdleOptions, LmmConfig, MixedBackend,
    };
    pub use crate::test::{
        drop_term_test, test_hurdle, test_hurdle_with, wald_test, AnovaTable, ChiSquaredTests,
        HurdleTestResult, Hypothesis, HypothesisTests, Metric, TestSource, TestType,
    };
}
