//! DOMD Guardian CLI - Command-line interface for schema-driven dataset cleaning
//!
//! CDD Principle: Application Layer - CLI coordinates user interactions with domain services
//! - Translates user commands to cleaner operations
//! - Handles external concerns like file I/O, process exit codes, and terminal output
//! - Library errors gain file context here through anyhow

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use domd_guardian::{
    dataset, DomdCleaner, EngineConfig, OutputFormat, ReplaySuggestionService, ReportFormatter,
    ReportOptions, Schema,
};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// DOMD Guardian - Schema-driven dataset validation and remediation
#[derive(Parser)]
#[command(name = "domd-guardian")]
#[command(version = "0.1.0")]
#[command(about = "Validate, partition and remediate tabular datasets against a DOMD schema")]
#[command(long_about = "DOMD Guardian normalizes a CSV dataset column by column according to a schema document, splits it into clean and unclean rows, records every anomaly, and escalates batches it cannot clean through a chain of fallback strategies.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Clean a dataset and write the output files
    Run {
        /// DOMD schema document (JSON)
        #[arg(short, long)]
        schema: PathBuf,

        /// Input dataset (CSV with headers)
        input: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        /// Directory of recorded suggestion-service responses
        #[arg(long)]
        replay: Option<PathBuf>,

        /// Rows per batch (overrides the configuration)
        #[arg(long)]
        batch_size: Option<usize>,

        /// Output format for the summary
        #[arg(short, long, value_enum, default_value = "human")]
        format: OutputFormatArg,

        /// Maximum number of anomalies to list in the summary
        #[arg(long, default_value = "20")]
        max_anomalies: usize,

        /// Exit with status 2 when any row ends up unclean
        #[arg(long)]
        strict: bool,
    },

    /// Print per-column statistics of a dataset
    Profile {
        /// DOMD schema document (JSON)
        #[arg(short, long)]
        schema: PathBuf,

        /// Input dataset (CSV with headers)
        input: PathBuf,
    },

    /// Validate a schema document
    ValidateSchema {
        /// Schema file to validate
        schema_file: PathBuf,
    },

    /// Validate configuration file
    ValidateConfig {
        /// Configuration file to validate
        config_file: Option<PathBuf>,
    },

    /// Explain the handlers resolved for each schema column
    Handlers {
        /// DOMD schema document (JSON)
        schema_file: PathBuf,
    },
}

#[derive(Copy, Clone, ValueEnum, PartialEq)]
enum OutputFormatArg {
    Human,
    Json,
}

impl From<OutputFormatArg> for OutputFormat {
    fn from(arg: OutputFormatArg) -> Self {
        match arg {
            OutputFormatArg::Human => OutputFormat::Human,
            OutputFormatArg::Json => OutputFormat::Json,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose, cli.log_json);

    if cli.no_color {
        colored::control::set_override(false);
    }

    match run_command(cli).await {
        Ok(exit_code) => process::exit(exit_code),
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            process::exit(1);
        }
    }
}

async fn run_command(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run {
            schema,
            input,
            output,
            replay,
            batch_size,
            format,
            max_anomalies,
            strict,
        } => {
            let options = RunOptions {
                replay,
                batch_size,
                format: format.into(),
                report: ReportOptions { use_colors: !cli.no_color, max_anomalies: Some(max_anomalies) },
                strict,
            };
            run_clean(cli.config, &schema, &input, &output, options).await
        }
        Commands::Profile { schema, input } => run_profile(cli.config, &schema, &input),
        Commands::ValidateSchema { schema_file } => run_validate_schema(&schema_file),
        Commands::ValidateConfig { config_file } => {
            run_validate_config(config_file.or(cli.config))
        }
        Commands::Handlers { schema_file } => run_handlers(cli.config, &schema_file),
    }
}

struct RunOptions {
    replay: Option<PathBuf>,
    batch_size: Option<usize>,
    format: OutputFormat,
    report: ReportOptions,
    strict: bool,
}

/// Explicit `--config`, else a default config file in the working directory, else defaults
fn load_config(config_path: Option<PathBuf>) -> Result<EngineConfig> {
    match config_path {
        Some(path) => EngineConfig::load_from_file(&path)
            .with_context(|| format!("loading configuration {}", path.display())),
        None => EngineConfig::discover(".").context("discovering configuration"),
    }
}

fn load_cleaner(config_path: Option<PathBuf>, schema_path: &Path) -> Result<DomdCleaner> {
    let config = load_config(config_path)?;
    let schema = Schema::load_from_file(schema_path)
        .with_context(|| format!("loading schema {}", schema_path.display()))?;
    Ok(DomdCleaner::new_with_config(schema, config)?)
}

async fn run_clean(
    config_path: Option<PathBuf>,
    schema_path: &Path,
    input: &Path,
    output: &Path,
    options: RunOptions,
) -> Result<i32> {
    let mut config = load_config(config_path)?;
    if let Some(size) = options.batch_size {
        config.engine.batch_size = Some(size);
    }

    let schema = Schema::load_from_file(schema_path)
        .with_context(|| format!("loading schema {}", schema_path.display()))?;
    let mut cleaner = DomdCleaner::new_with_config(schema, config)?
        .with_report_formatter(ReportFormatter::new(options.report));

    if let Some(dir) = options.replay {
        tracing::info!("Replaying suggestion responses from {}", dir.display());
        cleaner = cleaner.with_suggestions(Arc::new(ReplaySuggestionService::new(dir)));
    }

    let outcome = cleaner
        .clean_file(input)
        .await
        .with_context(|| format!("cleaning {}", input.display()))?;

    let written = cleaner
        .write_outputs(&outcome, output)
        .with_context(|| format!("writing outputs to {}", output.display()))?;

    cleaner.write_report(&outcome, options.format, std::io::stdout().lock())?;
    if options.format == OutputFormat::Human {
        for path in written {
            println!("  wrote {}", path.display());
        }
    }

    if options.strict && !outcome.partition.unclean.is_empty() {
        Ok(2)
    } else {
        Ok(0)
    }
}

fn run_profile(config_path: Option<PathBuf>, schema_path: &Path, input: &Path) -> Result<i32> {
    let cleaner = load_cleaner(config_path, schema_path)?;
    let data = dataset::read_csv(input).with_context(|| format!("reading {}", input.display()))?;

    let profiles = cleaner.profile(&data);
    let json = serde_json::to_string_pretty(&profiles).context("serializing profile")?;
    println!("{json}");
    Ok(0)
}

fn run_validate_schema(schema_file: &Path) -> Result<i32> {
    match Schema::load_from_file(schema_file) {
        Ok(schema) => {
            println!("{} Schema is valid: {}", "✓".green(), schema_file.display());
            println!(
                "  {} columns, primary key ({})",
                schema.columns().len(),
                schema.primary_key().join(", ")
            );
            for key in schema.primary_key() {
                if schema.column(key).is_err() {
                    println!("  {} key column '{}' is not declared", "!".yellow(), key);
                }
            }
            Ok(0)
        }
        Err(e) => {
            eprintln!("{} Schema is invalid: {}", "✗".red(), e);
            Ok(1)
        }
    }
}

fn run_validate_config(config_file: Option<PathBuf>) -> Result<i32> {
    let path = config_file.unwrap_or_else(|| PathBuf::from("domd_guardian.yaml"));

    if !path.exists() {
        eprintln!("Configuration file not found: {}", path.display());
        return Ok(1);
    }

    match EngineConfig::load_from_file(&path) {
        Ok(config) => {
            println!("{} Configuration is valid: {}", "✓".green(), path.display());
            println!("  version {}", config.version);
            println!(
                "  batch size: {}",
                config.engine.batch_size.map_or("whole dataset".to_string(), |s| s.to_string())
            );
            println!("  fallback rules: {}", config.fallback.rules.len());
            println!("  fingerprint: {}", config.fingerprint());
            Ok(0)
        }
        Err(e) => {
            eprintln!("{} Configuration is invalid: {}", "✗".red(), e);
            Ok(1)
        }
    }
}

fn run_handlers(config_path: Option<PathBuf>, schema_file: &Path) -> Result<i32> {
    let cleaner = load_cleaner(config_path, schema_file)?;
    let pipeline = cleaner.handler_pipeline();

    for (spec, plan) in cleaner.schema().columns().iter().zip(pipeline.plans()) {
        println!("{} ({})", spec.name.bold(), spec.describe());
        if let Some(fault) = &plan.fault {
            println!("  {} {}", "fault:".red(), fault);
        } else if plan.handlers.is_empty() {
            println!("  {}", "no handlers; any value passes".dimmed());
        }
        for handler in &plan.handlers {
            println!("  {:<9} {}", handler.name(), handler.describe());
        }
    }

    Ok(0)
}

fn init_logging(verbose: bool, json: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}
