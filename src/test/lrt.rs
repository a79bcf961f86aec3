//! Drop-term likelihood ratio test.
//!
//! The reduced model drops every column of one term from the fitted design
//! and is refit with the same core routine. The statistic
//! `2 * (LL_full - LL_reduced)` is compared to a chi-squared distribution
//! with df = number of dropped estimable columns.

use crate::data::INTERCEPT;
use crate::error::{HurdleError, Result};
use crate::model::{fit_design, FittedModel, GlmConfig};
use crate::test::{chisq_pvalue, AnovaTable};

/// Drop one term and compare log-likelihoods.
///
/// A term that is marginal to a higher-order term (a main effect that also
/// appears in an interaction) cannot be dropped on its own.
///
/// Rows `<none>` and the term; columns `Df`, `LRT`, `Pr(>Chi)`.
pub fn drop_term_test(model: &FittedModel, term: &str, config: &GlmConfig) -> Result<AnovaTable> {
    if !model.backend.supports_drop_term() {
        return Err(HurdleError::UnsupportedLrt(format!(
            "{:?} models do not support dropping terms",
            model.backend
        )));
    }
    if term == INTERCEPT {
        return Err(HurdleError::InvalidParameter(
            "Cannot drop the intercept; test a different term".to_string(),
        ));
    }

    let drop = model.design.columns_for_term(term);
    if drop.is_empty() {
        return Err(HurdleError::InvalidParameter(format!(
            "Term '{}' not found in '{}'",
            term, model.formula
        )));
    }
    if let Some(target) = model.formula.terms.iter().find(|t| t.label() == term) {
        let vars = target.variables();
        if let Some(outer) = model.formula.terms.iter().find(|t| {
            let other = t.variables();
            other.len() > vars.len() && vars.iter().all(|v| other.contains(v))
        }) {
            return Err(HurdleError::InvalidParameter(format!(
                "Term '{}' is marginal to '{}'; drop '{}' first",
                term,
                outer.label(),
                outer.label()
            )));
        }
    }
    let n_estimable = drop
        .iter()
        .filter(|&&j| !model.aliased.get(j).copied().unwrap_or(false))
        .count();
    if n_estimable == 0 {
        return Err(HurdleError::InvalidParameter(format!(
            "Term '{}' has no estimable coefficients; all are aliased",
            term
        )));
    }
    let reduced_design = model.design.without_columns(&drop);
    if reduced_design.n_coefficients() == 0 {
        return Err(HurdleError::InvalidParameter(format!(
            "Dropping '{}' leaves an empty model",
            term
        )));
    }

    let reduced = fit_design(model.family, &model.response, &reduced_design, config)?;

    let df = n_estimable as f64;
    let statistic = (2.0 * (model.log_likelihood - reduced.log_likelihood)).max(0.0);
    if !statistic.is_finite() {
        return Err(HurdleError::Numerical(format!(
            "Likelihood ratio statistic is not finite for term '{}'",
            term
        )));
    }

    AnovaTable::new(
        vec!["<none>".to_string(), term.to_string()],
        vec!["Df".to_string(), "LRT".to_string(), "Pr(>Chi)".to_string()],
        vec![
            vec![f64::NAN, f64::NAN, f64::NAN],
            vec![df, statistic, chisq_pvalue(statistic, df)],
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Formula, LongTable};
    use crate::model::lm::gaussian_log_likelihood;
    use crate::model::{Family, FitBackend, GlmBackend, MixedBackend};
    use approx::assert_relative_eq;

    fn table() -> LongTable {
        let mut table = LongTable::new();
        table
            .add_categorical("group", &["A", "A", "A", "B", "B", "B"])
            .unwrap();
        table
            .add_categorical("donor", &["d1", "d2", "d3", "d1", "d2", "d3"])
            .unwrap();
        table.add_numeric("expr", &[1.0, 1.2, 0.8, 3.0, 3.1, 2.9]).unwrap();
        table
    }

    #[test]
    fn test_gaussian_drop_term() {
        let formula = Formula::parse("expr ~ group").unwrap();
        let model = GlmBackend::default()
            .fit(&formula, &table(), Family::Gaussian, None)
            .unwrap();
        let result = drop_term_test(&model, "group", &GlmConfig::default()).unwrap();

        assert_eq!(result.row_names, vec!["<none>", "group"]);
        assert_eq!(result.column_names, vec!["Df", "LRT", "Pr(>Chi)"]);
        assert_eq!(result.get(1, "Df"), Some(1.0));

        // Reduced model is the grand mean: RSS = sum((y - 2)^2)
        let rss_full = 0.10;
        let rss_reduced: f64 = [1.0, 1.2, 0.8, 3.0, 3.1, 2.9]
            .iter()
            .map(|y: &f64| (y - 2.0).powi(2))
            .sum();
        let expected =
            2.0 * (gaussian_log_likelihood(rss_full, 6) - gaussian_log_likelihood(rss_reduced, 6));
        assert_relative_eq!(result.get(1, "LRT").unwrap(), expected, epsilon = 1e-8);
    }

    #[test]
    fn test_mixed_backend_unsupported() {
        let formula = Formula::parse("expr ~ group + (1 | donor)").unwrap();
        let model = MixedBackend::default()
            .fit(&formula, &table(), Family::Gaussian, None)
            .unwrap();
        assert!(matches!(
            drop_term_test(&model, "group", &GlmConfig::default()),
            Err(HurdleError::UnsupportedLrt(_))
        ));
    }

    #[test]
    fn test_marginal_term_rejected() {
        let mut data = table();
        data.add_numeric("age", &[30.0, 41.0, 25.0, 52.0, 38.0, 47.0]).unwrap();
        let formula = Formula::parse("expr ~ group * age").unwrap();
        let model = GlmBackend::default()
            .fit(&formula, &data, Family::Gaussian, None)
            .unwrap();

        let err = drop_term_test(&model, "group", &GlmConfig::default()).unwrap_err();
        assert!(err.to_string().contains("group:age"));
        assert!(drop_term_test(&model, "age", &GlmConfig::default()).is_err());

        let result = drop_term_test(&model, "group:age", &GlmConfig::default()).unwrap();
        assert_eq!(result.get(1, "Df"), Some(1.0));
    }

    #[test]
    fn test_aliased_columns_not_counted() {
        let mut data = table();
        data.add_numeric("dose", &[0.0, 0.0, 0.0, 1.0, 1.0, 1.0]).unwrap();
        data.add_numeric("zero", &[0.0; 6]).unwrap();

        // dose duplicates the group indicator
        let formula = Formula::parse("expr ~ group + dose").unwrap();
        let model = GlmBackend::default()
            .fit(&formula, &data, Family::Gaussian, None)
            .unwrap();
        assert!(drop_term_test(&model, "dose", &GlmConfig::default()).is_err());
        let result = drop_term_test(&model, "group", &GlmConfig::default()).unwrap();
        assert_eq!(result.get(1, "Df"), Some(1.0));

        let formula = Formula::parse("expr ~ group + zero").unwrap();
        let model = GlmBackend::default()
            .fit(&formula, &data, Family::Gaussian, None)
            .unwrap();
        assert!(drop_term_test(&model, "zero", &GlmConfig::default()).is_err());
    }

    #[test]
    fn test_unknown_term() {
        let formula = Formula::parse("expr ~ group").unwrap();
        let model = GlmBackend::default()
            .fit(&formula, &table(), Family::Gaussian, None)
            .unwrap();
        assert!(drop_term_test(&model, "age", &GlmConfig::default()).is_err());
        assert!(drop_term_test(&model, "(Intercept)", &GlmConfig::default()).is_err());
    }
}
