//! Per-variable batch results.

use crate::error::{HurdleError, Result};
use crate::model::HurdleModel;
use crate::test::{HurdleTestResult, Metric, TestSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Row of a hurdle test result that carries the test (row 0 is the
/// restricted model). Results with more rows are rejected.
pub const TEST_ROW: usize = 1;

/// Df, statistic and p-value of one test source. NaN is NA.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TestSummary {
    pub df: f64,
    pub chisq: f64,
    pub p_value: f64,
}

impl TestSummary {
    fn from_test(test: &HurdleTestResult, source: TestSource) -> Result<Self> {
        let get = |metric: Metric| {
            test.get(TEST_ROW, metric, source).ok_or_else(|| {
                HurdleError::InvalidParameter(format!(
                    "Test result has {} row(s); expected a test row at index {}",
                    test.n_rows(),
                    TEST_ROW
                ))
            })
        };
        Ok(Self {
            df: get(Metric::Df)?,
            chisq: get(Metric::Chisq)?,
            p_value: get(Metric::PValue)?,
        })
    }

    /// Value of a metric; residual df is not kept.
    pub fn get(&self, metric: Metric) -> Option<f64> {
        match metric {
            Metric::Df => Some(self.df),
            Metric::Chisq => Some(self.chisq),
            Metric::PValue => Some(self.p_value),
            Metric::ResDf => None,
        }
    }
}

/// Extracted test of one variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchRow {
    pub variable_id: String,
    pub discrete: TestSummary,
    pub continuous: TestSummary,
    pub combined: TestSummary,
}

impl BatchRow {
    /// Extract the test row of a hurdle test.
    ///
    /// The test must have exactly two rows; a hypothesis table with several
    /// test rows does not fit one result row per variable.
    pub fn from_test(variable_id: &str, test: &HurdleTestResult) -> Result<Self> {
        if test.n_rows() != TEST_ROW + 1 {
            return Err(HurdleError::InvalidParameter(format!(
                "Test result for '{}' has {} row(s); expected {}",
                variable_id,
                test.n_rows(),
                TEST_ROW + 1
            )));
        }
        Ok(Self {
            variable_id: variable_id.to_string(),
            discrete: TestSummary::from_test(test, TestSource::Discrete)?,
            continuous: TestSummary::from_test(test, TestSource::Continuous)?,
            combined: TestSummary::from_test(test, TestSource::Combined)?,
        })
    }

    pub fn source(&self, source: TestSource) -> &TestSummary {
        match source {
            TestSource::Discrete => &self.discrete,
            TestSource::Continuous => &self.continuous,
            TestSource::Combined => &self.combined,
        }
    }
}

/// Results of a batch run, sorted by variable id.
#[derive(Debug, Default)]
pub struct BatchResult {
    pub rows: Vec<BatchRow>,
    /// Fitted models, when requested.
    pub models: Option<BTreeMap<String, HurdleModel>>,
    /// Variables that failed, under the collecting failure policy.
    pub failures: BTreeMap<String, HurdleError>,
}

#[derive(Serialize)]
struct BatchResultJson<'a> {
    rows: &'a [BatchRow],
    failures: BTreeMap<&'a str, String>,
}

fn fmt_value(v: f64) -> String {
    if v.is_nan() {
        "NA".to_string()
    } else {
        format!("{}", v)
    }
}

impl BatchResult {
    /// Number of variables with results.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Variable ids with results, sorted.
    pub fn variable_ids(&self) -> Vec<&str> {
        self.rows.iter().map(|r| r.variable_id.as_str()).collect()
    }

    /// Result row of a variable.
    pub fn row(&self, variable_id: &str) -> Option<&BatchRow> {
        self.rows
            .binary_search_by(|r| r.variable_id.as_str().cmp(variable_id))
            .ok()
            .map(|i| &self.rows[i])
    }

    /// Value at (variable, metric, source).
    pub fn get(&self, variable_id: &str, metric: Metric, source: TestSource) -> Option<f64> {
        self.row(variable_id)?.source(source).get(metric)
    }

    /// Kept model of a variable.
    pub fn model(&self, variable_id: &str) -> Option<&HurdleModel> {
        self.models.as_ref()?.get(variable_id)
    }

    /// Write the table as TSV (NA for missing values).
    pub fn write_tsv<W: Write>(&self, writer: &mut W) -> Result<()> {
        let mut header = vec!["variable_id".to_string()];
        for source in TestSource::ALL {
            for metric in ["df", "chisq", "p_value"] {
                header.push(format!("{}_{}", source.name(), metric));
            }
        }
        writeln!(writer, "{}", header.join("\t"))?;

        for r in &self.rows {
            let mut fields = vec![r.variable_id.clone()];
            for source in TestSource::ALL {
                let s = r.source(source);
                fields.extend([fmt_value(s.df), fmt_value(s.chisq), fmt_value(s.p_value)]);
            }
            writeln!(writer, "{}", fields.join("\t"))?;
        }
        Ok(())
    }

    /// Write the table to a TSV file.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        self.write_tsv(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    /// Rows and failure messages as pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        let json = BatchResultJson {
            rows: &self.rows,
            failures: self
                .failures
                .iter()
                .map(|(id, e)| (id.as_str(), e.to_string()))
                .collect(),
        };
        Ok(serde_json::to_string_pretty(&json)?)
    }
}
