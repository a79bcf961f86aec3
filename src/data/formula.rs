//! Formula parsing for model specification.

use crate::data::RandomEffect;
use crate::error::{HurdleError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// A fixed-effect term in a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Term {
    /// Intercept term (constant).
    Intercept,
    /// Main effect of a variable.
    Main(String),
    /// Interaction between two variables.
    Interaction(String, String),
}

impl Term {
    /// Get the variable names involved in this term.
    pub fn variables(&self) -> Vec<&str> {
        match self {
            Term::Intercept => vec![],
            Term::Main(v) => vec![v.as_str()],
            Term::Interaction(v1, v2) => vec![v1.as_str(), v2.as_str()],
        }
    }

    /// Label used to refer to the term in hypotheses (`group`, `group:age`).
    pub fn label(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for Term {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Term::Intercept => write!(f, "1"),
            Term::Main(v) => write!(f, "{}", v),
            Term::Interaction(v1, v2) => write!(f, "{}:{}", v1, v2),
        }
    }
}

/// Check that a response is a bare column name, not an expression.
fn is_bare_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '.' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
}

/// A parsed model formula.
///
/// Supports R-style syntax with lme4-style grouping terms:
/// - `y ~ group` - intercept + group
/// - `y ~ group + age` - intercept + group + age
/// - `y ~ group * age` - intercept + group + age + group:age
/// - `y ~ 0 + group` - no intercept, group
/// - `y ~ group + (1 | subject)` - random intercept per subject
/// - `~ group` - no response (right-hand side only)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Formula {
    /// Response column, if the formula has a left-hand side.
    pub response: Option<String>,
    /// Whether to include an intercept.
    pub intercept: bool,
    /// Fixed-effect terms (excluding intercept).
    pub terms: Vec<Term>,
    /// Grouping (random-effect) terms.
    pub random: Vec<RandomEffect>,
}

impl Formula {
    /// Parse a formula string.
    ///
    /// # Examples
    /// ```
    /// use composable_hurdle::data::Formula;
    /// let f = Formula::parse("expr ~ group + age + (1 | donor)").unwrap();
    /// assert_eq!(f.response.as_deref(), Some("expr"));
    /// assert_eq!(f.terms.len(), 2);
    /// assert_eq!(f.random.len(), 1);
    /// ```
    pub fn parse(formula: &str) -> Result<Self> {
        let formula = formula.trim();

        let (lhs, rhs) = formula.split_once('~').ok_or_else(|| {
            HurdleError::FormulaParse(format!("Formula '{}' must contain '~'", formula))
        })?;

        let lhs = lhs.trim();
        let response = if lhs.is_empty() {
            None
        } else if is_bare_name(lhs) {
            Some(lhs.to_string())
        } else {
            return Err(HurdleError::InvalidFormula {
                formula: formula.to_string(),
                reason: format!(
                    "response '{}' must be a bare column name, not an expression",
                    lhs
                ),
            });
        };

        let rhs = rhs.trim();
        if rhs.is_empty() {
            return Err(HurdleError::FormulaParse(
                "Formula right-hand side is empty".to_string(),
            ));
        }
        if rhs.contains('~') {
            return Err(HurdleError::FormulaParse(
                "Formula must contain exactly one '~'".to_string(),
            ));
        }

        // Pull out grouping terms first
        let re = Regex::new(r"\([^)]+\|[^)]+\)")
            .map_err(|e| HurdleError::FormulaParse(e.to_string()))?;
        let random_strs: Vec<&str> = re.find_iter(rhs).map(|m| m.as_str()).collect();
        let random: Vec<RandomEffect> = random_strs
            .iter()
            .map(|s| RandomEffect::parse(s))
            .collect::<Result<Vec<_>>>()?;

        let mut fixed_str = rhs.to_string();
        for re_str in &random_strs {
            fixed_str = fixed_str.replace(re_str, "");
        }
        let fixed_str = fixed_str
            .split('+')
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" + ");
        let fixed_str = if fixed_str.is_empty() {
            "1".to_string()
        } else {
            fixed_str
        };

        let (intercept, terms) = parse_fixed(&fixed_str)?;

        Ok(Self {
            response,
            intercept,
            terms,
            random,
        })
    }

    /// Response column name, if any.
    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    /// Same right-hand side with a different response.
    pub fn with_response(&self, response: &str) -> Self {
        Self {
            response: Some(response.to_string()),
            ..self.clone()
        }
    }

    /// Fixed-effects part only.
    pub fn fixed_only(&self) -> Self {
        Self {
            random: Vec::new(),
            ..self.clone()
        }
    }

    /// Flatten grouping terms into plain additive terms.
    ///
    /// `y ~ a + (1 + t | g)` becomes `y ~ a + g + t`. The result names every
    /// column the model touches without needing mixed-model machinery.
    pub fn shape_only(&self) -> Self {
        let mut terms = self.terms.clone();
        for re in &self.random {
            let vars = std::iter::once(re.grouping.as_str())
                .chain(re.terms.iter().map(|t| t.as_str()).filter(|t| *t != "1"));
            for var in vars {
                let term = Term::Main(var.to_string());
                if !terms.contains(&term) {
                    terms.push(term);
                }
            }
        }
        Self {
            response: self.response.clone(),
            intercept: self.intercept,
            terms,
            random: Vec::new(),
        }
    }

    /// Labels of the fixed-effect terms, in order.
    pub fn term_labels(&self) -> Vec<String> {
        self.terms.iter().map(|t| t.label()).collect()
    }

    /// Check if a fixed-effect term with this label exists.
    pub fn has_term(&self, label: &str) -> bool {
        self.terms.iter().any(|t| t.label() == label)
    }

    /// Remove one fixed-effect term.
    pub fn without_term(&self, label: &str) -> Result<Self> {
        if !self.has_term(label) {
            return Err(HurdleError::InvalidParameter(format!(
                "Term '{}' not in formula '{}'",
                label, self
            )));
        }
        let terms: Vec<Term> = self
            .terms
            .iter()
            .filter(|t| t.label() != label)
            .cloned()
            .collect();
        Ok(Self {
            terms,
            ..self.clone()
        })
    }

    /// Get all predictor variable names (fixed and grouping), sorted.
    pub fn variables(&self) -> Vec<&str> {
        let mut vars: Vec<&str> = self.terms.iter().flat_map(|t| t.variables()).collect();
        for re in &self.random {
            vars.push(&re.grouping);
            vars.extend(re.terms.iter().map(|t| t.as_str()).filter(|t| *t != "1"));
        }
        vars.sort();
        vars.dedup();
        vars
    }

    /// Check if a variable is used in the fixed-effect terms.
    pub fn uses_variable(&self, name: &str) -> bool {
        self.terms.iter().any(|t| t.variables().contains(&name))
    }

    /// Check if the formula has any grouping terms.
    pub fn has_random_effects(&self) -> bool {
        !self.random.is_empty()
    }
}

/// Parse the fixed-effects right-hand side.
fn parse_fixed(rhs: &str) -> Result<(bool, Vec<Term>)> {
    let rhs = rhs.trim();

    let (intercept, rhs) = if rhs == "0" || rhs == "-1" {
        return Err(HurdleError::FormulaParse(
            "Formula must have at least one term".to_string(),
        ));
    } else if rhs.starts_with("0 +") || rhs.starts_with("0+") {
        (false, rhs.trim_start_matches('0').trim_start_matches(|c: char| c == '+' || c.is_whitespace()))
    } else if rhs.starts_with("-1 +") || rhs.starts_with("-1+") {
        (false, rhs.trim_start_matches("-1").trim_start_matches(|c: char| c == '+' || c.is_whitespace()))
    } else {
        (true, rhs)
    };

    let mut terms = Vec::new();
    for term_str in rhs.split('+').map(|s| s.trim()) {
        if term_str.is_empty() || term_str == "1" {
            continue;
        }

        if term_str.contains('*') {
            let (v1, v2) = split_pair(term_str, '*')?;
            let main1 = Term::Main(v1.clone());
            let main2 = Term::Main(v2.clone());
            if !terms.contains(&main1) {
                terms.push(main1);
            }
            if !terms.contains(&main2) {
                terms.push(main2);
            }
            terms.push(Term::Interaction(v1, v2));
        } else if term_str.contains(':') {
            let (v1, v2) = split_pair(term_str, ':')?;
            terms.push(Term::Interaction(v1, v2));
        } else {
            if !is_bare_name(term_str) {
                return Err(HurdleError::FormulaParse(format!(
                    "Unsupported term '{}'",
                    term_str
                )));
            }
            let term = Term::Main(term_str.to_string());
            if !terms.contains(&term) {
                terms.push(term);
            }
        }
    }

    if terms.is_empty() && !intercept {
        return Err(HurdleError::FormulaParse(
            "Formula must have at least one term".to_string(),
        ));
    }

    Ok((intercept, terms))
}

fn split_pair(term: &str, sep: char) -> Result<(String, String)> {
    let parts: Vec<&str> = term.split(sep).map(|s| s.trim()).collect();
    if parts.len() != 2 || !parts.iter().all(|p| is_bare_name(p)) {
        return Err(HurdleError::FormulaParse(format!(
            "Invalid interaction term: {}",
            term
        )));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

impl std::fmt::Display for Formula {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(response) = &self.response {
            write!(f, "{} ", response)?;
        }
        write!(f, "~ ")?;
        let mut parts: Vec<String> = Vec::new();
        if !self.intercept {
            parts.push("0".to_string());
        } else if self.terms.is_empty() {
            parts.push("1".to_string());
        }
        parts.extend(self.terms.iter().map(|t| t.to_string()));
        parts.extend(self.random.iter().map(|r| r.to_string()));
        write!(f, "{}", parts.join(" + "))
    }
}
