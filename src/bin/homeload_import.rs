//! homeload-import: Load a listing CSV into the property database
//!
//! Usage:
//!   # Default paths: data/fake_data.csv, "data/Field Config.xlsx", homeload.db
//!   homeload-import
//!
//!   # Explicit inputs, empty the target tables first
//!   homeload-import --data listings.csv --field-config fields.xlsx --truncate
//!
//!   # Print the run report as JSON
//!   homeload-import --report

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

use anyhow::{Context, Result};
use clap::Parser;
use homeload::source::{read_dataset, read_field_config};
use homeload::{LoadConfig, LoadError, Pipeline, RunOptions, SqliteStore};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "homeload-import")]
#[command(about = "Import a property listing dataset into a relational database", long_about = None)]
struct Args {
    /// Listing dataset (CSV)
    #[arg(long, default_value = "data/fake_data.csv")]
    data: PathBuf,

    /// Field configuration: workbook or CSV with `Column Name` and `Target Table`
    #[arg(long, default_value = "data/Field Config.xlsx")]
    field_config: PathBuf,

    /// Worksheet holding the field configuration
    #[arg(long, default_value = "Sheet1")]
    sheet: String,

    /// SQLite database file; the schema must already exist
    #[arg(long, default_value = "homeload.db")]
    database: PathBuf,

    /// JSON load configuration overriding the built-in defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Empty the property, lead and child tables before loading (reviewers are kept)
    #[arg(long)]
    truncate: bool,

    /// Print the run report as JSON on stdout
    #[arg(long)]
    report: bool,

    /// Log level when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = match &args.config {
        Some(path) => LoadConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => LoadConfig::default(),
    };

    let dataset = read_dataset(&args.data, &config)
        .with_context(|| format!("Failed to read dataset {}", args.data.display()))?;
    let entries = read_field_config(&args.field_config, Some(&args.sheet)).with_context(|| {
        format!("Failed to read field configuration {}", args.field_config.display())
    })?;

    let mut store = SqliteStore::open(&args.database)
        .map_err(LoadError::Connection)
        .with_context(|| format!("Failed to open database {}", args.database.display()))?;
    let options = RunOptions {
        truncate: args.truncate,
    };

    let report = {
        let mut pipeline = Pipeline::new(&config, &mut store);
        pipeline
            .run(&dataset, &entries, options)
            .context("Import failed")?
    };

    info!(
        rows = report.source_rows,
        properties = report.properties_inserted,
        reused = report.properties_reused,
        reviewers = report.reviewers_upserted,
        "import finished"
    );
    for (table, rows) in &report.dependents {
        info!(table = %table, rows, "dependent rows inserted");
    }

    if args.report {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}
