//! Error types for the composable-hurdle library.

use thiserror::Error;

/// Main error type for the library.
#[derive(Error, Debug)]
pub enum HurdleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Missing column '{0}'")]
    MissingColumn(String),

    #[error("Invalid variable type for column '{column}': {reason}")]
    InvalidVariableType { column: String, reason: String },

    #[error("Formula parse error: {0}")]
    FormulaParse(String),

    /// The response side of a formula is not a bare column name.
    #[error("Invalid formula '{formula}': {reason}")]
    InvalidFormula { formula: String, reason: String },

    /// Missing values in a column the model uses.
    #[error(
        "Missing data: column '{column}' has {count} missing value(s); \
         remove or impute them before fitting"
    )]
    MissingData { column: String, count: usize },

    #[error("Empty data: {0}")]
    EmptyData(String),

    #[error("Numerical error: {0}")]
    Numerical(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Model fit failed: {0}")]
    Fit(String),

    #[error("Invalid test type '{0}': expected 'Wald' or 'LRT'")]
    InvalidTestType(String),

    #[error("Unsupported likelihood ratio test: {0}")]
    UnsupportedLrt(String),

    /// A fatal error raised while processing one variable of a batch.
    #[error("Variable '{variable_id}': {source}")]
    Variable {
        variable_id: String,
        #[source]
        source: Box<HurdleError>,
    },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl HurdleError {
    /// Wrap an error with the variable it was raised for.
    pub fn for_variable(variable_id: &str, err: HurdleError) -> Self {
        HurdleError::Variable {
            variable_id: variable_id.to_string(),
            source: Box::new(err),
        }
    }
}

/// Result type alias for library operations.
pub type Result<T> = std::result::Result<T, HurdleError>;
