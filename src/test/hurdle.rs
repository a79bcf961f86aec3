//! Combined hypothesis tests on hurdle models.
//!
//! Each sub-model is tested separately. The two results are normalized to
//! the canonical metric names, reconciled to the same shape and summed into a
//! combined test whose p-value is recomputed from the summed statistic and
//! degrees of freedom.

use crate::error::{HurdleError, Result};
use crate::model::{BackendKind, FittedModel, GlmConfig, HurdleModel, HurdleOptions};
use crate::test::lrt::drop_term_test;
use crate::test::wald::wald_test;
use crate::test::{chisq_pvalue, AnovaTable, Hypothesis};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Test routines applied to each sub-model.
pub trait HypothesisTests: Send + Sync {
    /// Linear-hypothesis Wald table: rows (restricted, test); columns
    /// `Res.Df`, `Df` and the backend's statistic and p-value names.
    fn wald(&self, model: &FittedModel, hypothesis: &Hypothesis) -> Result<AnovaTable>;

    /// Drop-term table: rows (`<none>`, term); columns `Df`, `LRT`, `Pr(>Chi)`.
    fn drop_term(&self, model: &FittedModel, term: &str) -> Result<AnovaTable>;
}

/// Chi-squared Wald and likelihood ratio tests.
#[derive(Debug, Clone, Default)]
pub struct ChiSquaredTests {
    /// Settings for refitting reduced models.
    pub glm: GlmConfig,
}

impl HypothesisTests for ChiSquaredTests {
    fn wald(&self, model: &FittedModel, hypothesis: &Hypothesis) -> Result<AnovaTable> {
        wald_test(model, hypothesis)
    }

    fn drop_term(&self, model: &FittedModel, term: &str) -> Result<AnovaTable> {
        drop_term_test(model, term, &self.glm)
    }
}

/// Which test to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TestType {
    #[default]
    #[serde(rename = "wald", alias = "Wald")]
    Wald,
    #[serde(rename = "lrt", alias = "LRT")]
    Lrt,
}

impl FromStr for TestType {
    type Err = HurdleError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wald" => Ok(TestType::Wald),
            "lrt" => Ok(TestType::Lrt),
            _ => Err(HurdleError::InvalidTestType(s.to_string())),
        }
    }
}

impl std::fmt::Display for TestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TestType::Wald => write!(f, "Wald"),
            TestType::Lrt => write!(f, "LRT"),
        }
    }
}

/// A reported metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Metric {
    ResDf,
    Df,
    Chisq,
    PValue,
}

impl Metric {
    pub const ALL: [Metric; 4] = [Metric::ResDf, Metric::Df, Metric::Chisq, Metric::PValue];

    /// Canonical column name.
    pub fn name(self) -> &'static str {
        match self {
            Metric::ResDf => "Res.Df",
            Metric::Df => "Df",
            Metric::Chisq => "Chisq",
            Metric::PValue => "Pr(>Chisq)",
        }
    }

    /// Column name under a backend's convention.
    pub fn name_for(self, kind: BackendKind) -> &'static str {
        let (chisq, p) = kind.metric_names();
        match self {
            Metric::Chisq => chisq,
            Metric::PValue => p,
            other => other.name(),
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Which part of a hurdle test a value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestSource {
    Discrete,
    Continuous,
    Combined,
}

impl TestSource {
    pub const ALL: [TestSource; 3] = [
        TestSource::Discrete,
        TestSource::Continuous,
        TestSource::Combined,
    ];

    pub fn name(self) -> &'static str {
        match self {
            TestSource::Discrete => "discrete",
            TestSource::Continuous => "continuous",
            TestSource::Combined => "combined",
        }
    }
}

/// Metric values per hypothesis row, in [`Metric::ALL`] order. NaN is NA.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricTable {
    pub rows: Vec<[f64; 4]>,
}

impl MetricTable {
    /// Read a Wald table written in `kind`'s naming convention.
    pub fn from_wald(table: &AnovaTable, kind: BackendKind) -> Result<Self> {
        let columns = Metric::ALL
            .iter()
            .map(|m| {
                let name = m.name_for(kind);
                table.column(name).ok_or_else(|| {
                    HurdleError::InvalidParameter(format!(
                        "Test table lacks column '{}' (has {:?})",
                        name, table.column_names
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_columns(&columns, table.shape().0))
    }

    /// Read a drop-term table; residual df is NA.
    pub fn from_drop_term(table: &AnovaTable) -> Result<Self> {
        let n = table.shape().0;
        let columns = ["Df", "LRT", "Pr(>Chi)"]
            .iter()
            .map(|name| {
                table.column(name).ok_or_else(|| {
                    HurdleError::InvalidParameter(format!(
                        "Drop-term table lacks column '{}'",
                        name
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let mut all = vec![vec![f64::NAN; n]];
        all.extend(columns);
        Ok(Self::from_columns(&all, n))
    }

    fn from_columns(columns: &[Vec<f64>], n_rows: usize) -> Self {
        let rows = (0..n_rows)
            .map(|i| [columns[0][i], columns[1][i], columns[2][i], columns[3][i]])
            .collect();
        Self { rows }
    }

    /// Zeros with NA p-values.
    pub fn placeholder(n_rows: usize) -> Self {
        Self {
            rows: vec![[0.0, 0.0, 0.0, f64::NAN]; n_rows],
        }
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, row: usize, metric: Metric) -> Option<f64> {
        self.rows.get(row).map(|r| r[metric.index()])
    }

    /// Elementwise sums with the p-value recomputed from the summed
    /// statistic and df.
    pub fn combine(&self, other: &MetricTable) -> Self {
        let rows = self
            .rows
            .iter()
            .zip(&other.rows)
            .map(|(a, b)| {
                let res_df = a[0] + b[0];
                let df = a[1] + b[1];
                let chisq = a[2] + b[2];
                [res_df, df, chisq, chisq_pvalue(chisq, df)]
            })
            .collect();
        Self { rows }
    }
}

/// Result of a hurdle test, indexed by (row, metric, source).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HurdleTestResult {
    /// Hypothesis row names (row 0 is the restricted model).
    pub row_names: Vec<String>,
    pub test_type: TestType,
    pub discrete: MetricTable,
    pub continuous: MetricTable,
    pub combined: MetricTable,
    /// Why the continuous test was replaced by a placeholder, if it was.
    pub continuous_failure: Option<String>,
}

impl HurdleTestResult {
    /// Slice for one source.
    pub fn source(&self, source: TestSource) -> &MetricTable {
        match source {
            TestSource::Discrete => &self.discrete,
            TestSource::Continuous => &self.continuous,
            TestSource::Combined => &self.combined,
        }
    }

    /// Value at (row, metric, source).
    pub fn get(&self, row: usize, metric: Metric, source: TestSource) -> Option<f64> {
        self.source(source).get(row, metric)
    }

    pub fn n_rows(&self) -> usize {
        self.row_names.len()
    }
}

/// Test a hurdle model with the chi-squared tests and default options.
pub fn test_hurdle(
    model: &HurdleModel,
    hypothesis: &Hypothesis,
    test_type: TestType,
) -> Result<HurdleTestResult> {
    test_hurdle_with(
        model,
        hypothesis,
        test_type,
        &ChiSquaredTests::default(),
        &HurdleOptions::default(),
    )
}

/// Test both components of a hurdle model and combine them.
///
/// Continuous test failures are recovered with a zero/NA placeholder;
/// discrete test failures are errors.
///
/// # Errors
/// `UnsupportedLrt` for an LRT with anything but a single term, or on
/// models whose backend cannot drop terms.
pub fn test_hurdle_with(
    model: &HurdleModel,
    hypothesis: &Hypothesis,
    test_type: TestType,
    tests: &dyn HypothesisTests,
    options: &HurdleOptions,
) -> Result<HurdleTestResult> {
    let kind = model.discrete.backend;

    let (row_names, discrete, continuous) = match test_type {
        TestType::Wald => {
            let continuous = match model.continuous.fitted() {
                Some(m) => tests
                    .wald(m, hypothesis)
                    .and_then(|t| MetricTable::from_wald(&t, kind)),
                None => Err(degenerate_error(model)),
            };
            let disc_table = tests.wald(&model.discrete, hypothesis)?;
            let discrete = MetricTable::from_wald(&disc_table, kind)?;
            (disc_table.row_names, discrete, continuous)
        }
        TestType::Lrt => {
            let term = single_term(hypothesis)?;
            if !kind.supports_drop_term() {
                return Err(HurdleError::UnsupportedLrt(format!(
                    "{:?} models do not support dropping terms; use the Wald test",
                    kind
                )));
            }
            let continuous = match model.continuous.fitted() {
                Some(m) if m.df_residual > 0 => tests
                    .drop_term(m, term)
                    .and_then(|t| MetricTable::from_drop_term(&t)),
                Some(_) => Err(HurdleError::Fit(
                    "continuous model has no residual degrees of freedom".to_string(),
                )),
                None => Err(degenerate_error(model)),
            };
            let disc_table = tests.drop_term(&model.discrete, term)?;
            let discrete = MetricTable::from_drop_term(&disc_table)?;
            (disc_table.row_names, discrete, continuous)
        }
    };

    let (continuous, continuous_failure) = match continuous {
        Ok(t) if t.n_rows() == discrete.n_rows() => (t, None),
        Ok(t) => (
            MetricTable::placeholder(discrete.n_rows()),
            Some(format!(
                "continuous test has {} rows, discrete test has {}",
                t.n_rows(),
                discrete.n_rows()
            )),
        ),
        Err(e) => (MetricTable::placeholder(discrete.n_rows()), Some(e.to_string())),
    };
    if let Some(reason) = &continuous_failure {
        if !options.silent {
            log::debug!("Continuous {} test replaced by placeholder: {}", test_type, reason);
        }
    }

    let combined = discrete.combine(&continuous);

    Ok(HurdleTestResult {
        row_names,
        test_type,
        discrete,
        continuous,
        combined,
        continuous_failure,
    })
}

fn degenerate_error(model: &HurdleModel) -> HurdleError {
    match &model.continuous {
        crate::model::ContinuousModel::Degenerate { reason } => {
            HurdleError::Fit(format!("continuous model is degenerate: {}", reason))
        }
        crate::model::ContinuousModel::Fitted(_) => {
            HurdleError::Fit("continuous model is degenerate".to_string())
        }
    }
}

fn single_term(hypothesis: &Hypothesis) -> Result<&str> {
    match hypothesis {
        Hypothesis::Terms(terms) if terms.len() == 1 => Ok(terms[0].as_str()),
        Hypothesis::Terms(terms) => Err(HurdleError::UnsupportedLrt(format!(
            "only one term can be dropped at a time, got {}",
            terms.len()
        ))),
        Hypothesis::Contrast(_) => Err(HurdleError::UnsupportedLrt(
            "contrast hypotheses need the Wald test".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Formula, LongTable};
    use crate::model::{fit_hurdle_with, GlmBackend, MixedBackend};
    use approx::assert_relative_eq;

    fn gene_table(group1_zero: bool) -> LongTable {
        let group = [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let expr = if group1_zero {
            vec![2.1, 0.0, 1.8, 2.5, 2.0, 0.0, 0.0, 0.0, 0.0, 0.0]
        } else {
            vec![2.1, 0.0, 1.8, 2.5, 2.0, 4.0, 3.8, 0.0, 4.4, 0.0]
        };
        let mut table = LongTable::new();
        table.add_numeric("group", &group).unwrap();
        table.add_numeric("expr", &expr).unwrap();
        table
    }

    fn fit(group1_zero: bool) -> HurdleModel {
        fit_hurdle_with(
            &Formula::parse("expr ~ group").unwrap(),
            &gene_table(group1_zero),
            &GlmBackend::default(),
            &HurdleOptions { silent: true },
        )
        .unwrap()
    }

    #[test]
    fn test_test_type_parse() {
        assert_eq!("Wald".parse::<TestType>().unwrap(), TestType::Wald);
        assert_eq!("lrt".parse::<TestType>().unwrap(), TestType::Lrt);
        assert!(matches!(
            "score".parse::<TestType>(),
            Err(HurdleError::InvalidTestType(_))
        ));
    }

    #[test]
    fn test_wald_combined_is_sum() {
        let model = fit(false);
        let result = test_hurdle(&model, &Hypothesis::term("group"), TestType::Wald).unwrap();

        assert_eq!(result.n_rows(), 2);
        assert!(result.continuous_failure.is_none());
        for metric in [Metric::Df, Metric::Chisq] {
            let d = result.get(1, metric, TestSource::Discrete).unwrap();
            let c = result.get(1, metric, TestSource::Continuous).unwrap();
            let s = result.get(1, metric, TestSource::Combined).unwrap();
            assert_relative_eq!(s, d + c, epsilon = 1e-12);
        }
        let chisq = result.get(1, Metric::Chisq, TestSource::Combined).unwrap();
        let p = result.get(1, Metric::PValue, TestSource::Combined).unwrap();
        assert_eq!(result.get(1, Metric::Df, TestSource::Combined), Some(2.0));
        assert_relative_eq!(p, (-chisq / 2.0).exp(), epsilon = 1e-10);
    }

    #[test]
    fn test_untestable_continuous_gives_placeholder() {
        // group is constant among the positive rows, so its continuous
        // coefficient is aliased and cannot be tested.
        let model = fit(true);
        assert_eq!(
            model.continuous.fitted().unwrap().aliased_coefficients(),
            vec!["group"]
        );
        let result = test_hurdle(&model, &Hypothesis::term("group"), TestType::Wald).unwrap();

        assert!(result.continuous_failure.is_some());
        assert_eq!(result.continuous.n_rows(), result.discrete.n_rows());
        for row in 0..result.n_rows() {
            assert_eq!(result.get(row, Metric::Df, TestSource::Continuous), Some(0.0));
            assert_eq!(result.get(row, Metric::Chisq, TestSource::Continuous), Some(0.0));
            assert!(result.get(row, Metric::PValue, TestSource::Continuous).unwrap().is_nan());
        }

        let d_chisq = result.get(1, Metric::Chisq, TestSource::Discrete).unwrap();
        assert!(d_chisq.is_finite());
        assert_eq!(result.get(1, Metric::Chisq, TestSource::Combined), Some(d_chisq));
        assert!(result.get(1, Metric::PValue, TestSource::Combined).unwrap().is_finite());
    }

    #[test]
    fn test_lrt_rows_and_names() {
        let model = fit(false);
        let result = test_hurdle(&model, &Hypothesis::term("group"), TestType::Lrt).unwrap();
        assert_eq!(result.row_names, vec!["<none>", "group"]);
        assert!(result.get(1, Metric::ResDf, TestSource::Discrete).unwrap().is_nan());
        assert_eq!(result.get(1, Metric::Df, TestSource::Combined), Some(2.0));
        assert!(result.get(1, Metric::PValue, TestSource::Combined).unwrap().is_finite());
    }

    #[test]
    fn test_lrt_untestable_continuous() {
        let model = fit(true);
        let result = test_hurdle(&model, &Hypothesis::term("group"), TestType::Lrt).unwrap();
        assert!(result.continuous_failure.is_some());
        assert_eq!(result.get(1, Metric::Df, TestSource::Combined), Some(1.0));
    }

    #[test]
    fn test_lrt_multiple_terms_unsupported() {
        let model = fit(false);
        let hypothesis = Hypothesis::Terms(vec!["group".into(), "age".into()]);
        assert!(matches!(
            test_hurdle(&model, &hypothesis, TestType::Lrt),
            Err(HurdleError::UnsupportedLrt(_))
        ));
    }

    #[test]
    fn test_lrt_mixed_backend_unsupported() {
        let mut table = gene_table(false);
        let donors: Vec<&str> = (0..10).map(|i| ["d1", "d2"][i % 2]).collect();
        table.add_categorical("donor", &donors).unwrap();
        let model = fit_hurdle_with(
            &Formula::parse("expr ~ group + (1 | donor)").unwrap(),
            &table,
            &MixedBackend::default(),
            &HurdleOptions { silent: true },
        )
        .unwrap();
        assert!(matches!(
            test_hurdle(&model, &Hypothesis::term("group"), TestType::Lrt),
            Err(HurdleError::UnsupportedLrt(_))
        ));

        // Wald works and reports canonical names regardless of backend.
        let wald = test_hurdle(&model, &Hypothesis::term("group"), TestType::Wald).unwrap();
        assert!(wald.get(1, Metric::Chisq, TestSource::Discrete).unwrap().is_finite());
    }

    #[test]
    fn test_missing_term_in_discrete_propagates() {
        let model = fit(false);
        assert!(test_hurdle(&model, &Hypothesis::term("batch"), TestType::Wald).is_err());
    }

    #[test]
    fn test_mismatched_shape_is_replaced() {
        struct ShortContinuous;
        impl HypothesisTests for ShortContinuous {
            fn wald(&self, model: &FittedModel, hypothesis: &Hypothesis) -> Result<AnovaTable> {
                let table = wald_test(model, hypothesis)?;
                if model.family == crate::model::Family::Gaussian {
                    let row = table.to_matrix().row(1).iter().cloned().collect();
                    return AnovaTable::new(
                        vec!["2".into()],
                        table.column_names.clone(),
                        vec![row],
                    );
                }
                Ok(table)
            }
            fn drop_term(&self, model: &FittedModel, term: &str) -> Result<AnovaTable> {
                drop_term_test(model, term, &GlmConfig::default())
            }
        }

        let model = fit(false);
        let result = test_hurdle_with(
            &model,
            &Hypothesis::term("group"),
            TestType::Wald,
            &ShortContinuous,
            &HurdleOptions { silent: true },
        )
        .unwrap();
        assert!(result.continuous_failure.is_some());
        assert_eq!(result.continuous.n_rows(), 2);
        assert_eq!(result.get(1, Metric::Chisq, TestSource::Continuous), Some(0.0));
        assert!(result.get(1, Metric::PValue, TestSource::Continuous).unwrap().is_nan());
    }

    #[test]
    fn test_mixed_naming_is_normalized() {
        let table = AnovaTable::new(
            vec!["1".into(), "2".into()],
            vec!["Res.Df".into(), "Df".into(), "chisq".into(), "Pr(> Chisq)".into()],
            vec![vec![9.0, f64::NAN, f64::NAN, f64::NAN], vec![8.0, 1.0, 4.0, 0.0455]],
        )
        .unwrap();
        let m = MetricTable::from_wald(&table, BackendKind::MixedEffects).unwrap();
        assert_eq!(m.get(1, Metric::Chisq), Some(4.0));
        assert!(MetricTable::from_wald(&table, BackendKind::Plain).is_err());
    }
}
