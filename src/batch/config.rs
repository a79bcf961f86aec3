//! Analysis configuration, loadable from YAML.

use crate::batch::{BatchConfig, BatchResult, BatchRunner};
use crate::data::{Formula, LongTable, VariableType};
use crate::error::{HurdleError, Result};
use crate::model::{FitBackend, GlmBackend, GlmConfig, LmmConfig, MixedBackend};
use crate::test::{ChiSquaredTests, Hypothesis};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Model backend and its fitting settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Fixed-effects GLM.
    Glm(GlmConfig),
    /// Random-intercept mixed model.
    Mixed(LmmConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Glm(GlmConfig::default())
    }
}

impl BackendConfig {
    pub fn build(&self) -> Arc<dyn FitBackend> {
        match self {
            BackendConfig::Glm(c) => Arc::new(GlmBackend::new(c.clone())),
            BackendConfig::Mixed(c) => Arc::new(MixedBackend::new(c.clone())),
        }
    }

    /// Settings for refitting reduced models in likelihood ratio tests.
    fn glm_config(&self) -> GlmConfig {
        match self {
            BackendConfig::Glm(c) => c.clone(),
            BackendConfig::Mixed(_) => GlmConfig::default(),
        }
    }
}

/// A complete analysis: input, model, hypothesis and batch settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Name of the analysis.
    #[serde(default = "default_name")]
    pub name: String,
    /// Long-format TSV input.
    pub input: PathBuf,
    /// TSV output; nothing is written when absent.
    #[serde(default)]
    pub output: Option<PathBuf>,
    /// Model formula, e.g. `expr ~ group + (1 | donor)`.
    pub formula: String,
    /// Comma-separated terms or coefficient names to test.
    #[serde(default)]
    pub hypothesis: Option<String>,
    /// Contrast rows keyed by coefficient name; overrides `hypothesis`.
    #[serde(default)]
    pub contrast: Option<Vec<BTreeMap<String, f64>>>,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    /// Column type overrides, e.g. a numeric batch label read as categorical.
    #[serde(default)]
    pub column_types: HashMap<String, VariableType>,
    /// Declared level order per categorical column; the first observed level
    /// of each variable is the reference.
    #[serde(default)]
    pub levels: HashMap<String, Vec<String>>,
}

fn default_name() -> String {
    "unnamed".to_string()
}

impl AnalysisConfig {
    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(HurdleError::from)
    }

    /// Load from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let yaml = std::fs::read_to_string(path)?;
        Self::from_yaml(&yaml)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(HurdleError::from)
    }

    pub fn parse_formula(&self) -> Result<Formula> {
        Formula::parse(&self.formula)
    }

    pub fn parse_hypothesis(&self) -> Result<Hypothesis> {
        if let Some(rows) = &self.contrast {
            return Ok(Hypothesis::Contrast(rows.clone()));
        }
        match &self.hypothesis {
            Some(h) => h.parse(),
            None => Err(HurdleError::InvalidParameter(
                "No hypothesis or contrast given".to_string(),
            )),
        }
    }

    /// Apply column types and level orders to a loaded table.
    pub fn prepare_table(&self, table: LongTable) -> Result<LongTable> {
        let mut table = table.with_column_types(&self.column_types)?;
        for (column, levels) in &self.levels {
            table.set_levels(column, levels.clone())?;
        }
        Ok(table)
    }

    /// Runner configured by this analysis.
    pub fn runner(&self) -> BatchRunner {
        BatchRunner::new()
            .config(self.batch.clone())
            .backend(self.backend.build())
            .tests(Arc::new(ChiSquaredTests {
                glm: self.backend.glm_config(),
            }))
    }

    /// Load the input, run the batch and write the output if configured.
    pub fn run(&self) -> Result<BatchResult> {
        log::info!("Running analysis '{}'", self.name);
        let formula = self.parse_formula()?;
        let hypothesis = self.parse_hypothesis()?;
        let table = self.prepare_table(LongTable::from_tsv(&self.input)?)?;
        log::debug!(
            "Loaded {} rows × {} columns from {}",
            table.n_rows(),
            table.n_columns(),
            self.input.display()
        );

        let result = self.runner().run(&formula, &table, &hypothesis)?;
        if let Some(output) = &self.output {
            result.to_tsv(output)?;
            log::info!("Wrote {} result(s) to {}", result.len(), output.display());
        }
        Ok(result)
    }
}
