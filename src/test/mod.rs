//! Hypothesis tests for fitted models and their hurdle combination.

pub mod hurdle;
pub mod lrt;

pub use anova::{chisq_pvalue, AnovaTable};
pub use hurdle::{
    test_hurdle, test_hurdle_with, ChiSquaredTests, HurdleTestResult, HypothesisTests, Metric,
    MetricTable, TestSource, TestType,
};
pub use hypothesis::Hypothesis;
pub use lrt::drop_term_test;
pub use wald::{wald_statistic, wald_test};
