//! hurdle - hurdle model testing CLI
//!
//! Fits a hurdle model per variable of a long-format table and writes the
//! discrete, continuous and combined tests as TSV.

use clap::{Parser, Subcommand, ValueEnum};
use composable_hurdle::batch::{AnalysisConfig, BackendConfig, BatchConfig, FailurePolicy};
use composable_hurdle::data::VariableType;
use composable_hurdle::error::Result;
use composable_hurdle::model::{GlmConfig, LmmConfig};
use composable_hurdle::test::TestType;
use log::LevelFilter;
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliTest {
    Wald,
    Lrt,
}

impl From<CliTest> for TestType {
    fn from(t: CliTest) -> Self {
        match t {
            CliTest::Wald => TestType::Wald,
            CliTest::Lrt => TestType::Lrt,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliBackend {
    /// Fixed-effects GLM
    Glm,
    /// Random-intercept mixed model
    Mixed,
}

/// Hurdle model tests for zero-inflated expression data
#[derive(Parser)]
#[command(name = "hurdle")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an analysis from a YAML configuration file
    Run {
        /// Path to analysis configuration YAML
        #[arg(short, long)]
        config: PathBuf,

        /// Output path for results TSV (overrides the configuration)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Fit and test every variable of a long-format TSV
    Test {
        /// Path to long-format TSV
        #[arg(short, long)]
        input: PathBuf,

        /// Model formula (e.g., "expr ~ group + (1 | donor)")
        #[arg(short, long)]
        formula: String,

        /// Comma-separated terms to test (e.g., "group")
        #[arg(short = 't', long)]
        hypothesis: String,

        /// Column holding the variable id
        #[arg(long, default_value = "variable_id")]
        id_column: String,

        /// Test type
        #[arg(long, value_enum, default_value = "wald")]
        test: CliTest,

        /// Model backend
        #[arg(long, value_enum, default_value = "glm")]
        backend: CliBackend,

        /// Columns to read as categorical (comma-separated)
        #[arg(long, value_delimiter = ',')]
        categorical: Vec<String>,

        /// Number of worker threads (0 = all cores)
        #[arg(long, default_value = "0")]
        threads: usize,

        /// Record failing variables instead of stopping at the first one
        #[arg(long)]
        keep_going: bool,

        /// Output path for results TSV
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print an example configuration YAML
    Example,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Run { config, output } => cmd_run(&config, output),

        Commands::Test {
            input,
            formula,
            hypothesis,
            id_column,
            test,
            backend,
            categorical,
            threads,
            keep_going,
            output,
        } => {
            let backend = match backend {
                CliBackend::Glm => BackendConfig::Glm(GlmConfig::default()),
                CliBackend::Mixed => BackendConfig::Mixed(LmmConfig::default()),
            };
            let config = AnalysisConfig {
                name: "cli".to_string(),
                input,
                output: Some(output),
                formula,
                hypothesis: Some(hypothesis),
                contrast: None,
                backend,
                batch: BatchConfig {
                    id_column,
                    test_type: test.into(),
                    n_threads: threads,
                    failure_policy: if keep_going {
                        FailurePolicy::Collect
                    } else {
                        FailurePolicy::Abort
                    },
                    ..BatchConfig::default()
                },
                column_types: categorical
                    .into_iter()
                    .map(|c| (c, VariableType::Categorical))
                    .collect(),
                levels: HashMap::new(),
            };
            run_config(&config)
        }

        Commands::Example => cmd_example(),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Run an analysis from configuration
fn cmd_run(config_path: &PathBuf, output: Option<PathBuf>) -> Result<()> {
    eprintln!("Loading configuration from {:?}...", config_path);
    let mut config = AnalysisConfig::from_file(config_path)?;
    if output.is_some() {
        config.output = output;
    }
    run_config(&config)
}

fn run_config(config: &AnalysisConfig) -> Result<()> {
    let result = config.run()?;

    eprintln!("Done! {} variable(s) tested", result.len());
    if !result.failures.is_empty() {
        eprintln!("  {} variable(s) failed:", result.failures.len());
        for (id, e) in &result.failures {
            eprintln!("    {}: {}", id, e);
        }
    }
    if config.output.is_none() {
        result.write_tsv(&mut std::io::stdout().lock())?;
    }
    Ok(())
}

fn cmd_example() -> Result<()> {
    let config = AnalysisConfig {
        name: "example".to_string(),
        input: PathBuf::from("cells.tsv"),
        output: Some(PathBuf::from("hurdle_results.tsv")),
        formula: "expr ~ group + (1 | donor)".to_string(),
        hypothesis: Some("group".to_string()),
        contrast: None,
        backend: BackendConfig::Mixed(LmmConfig::default()),
        batch: BatchConfig {
            id_column: "primerid".to_string(),
            ..BatchConfig::default()
        },
        column_types: HashMap::from([(
            "donor".to_string(),
            VariableType::Categorical,
        )]),
        levels: HashMap::from([(
            "group".to_string(),
            vec!["ctl".to_string(), "trt".to_string()],
        )]),
    };
    print!("{}", config.to_yaml()?);
    Ok(())
}
