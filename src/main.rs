// src/main.rs
use anyhow::{Context, Result};
use chanmap::{
    config::RunConfig,
    input::InputSet,
    output::{self, OutputFormat, DEFAULT_OUTPUT},
    pipeline::{self, RunReport},
    process::aggregate::Aggregate,
};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "chanmap")]
#[command(about = "Map channel ids in report exports to the assets that reference them")]
struct Args {
    /// Reference table (xlsx/xls/ods or delimited text): channel id, channel name
    #[arg(short, long)]
    reference: PathBuf,

    /// ZIP archive of report CSVs; takes precedence over CSV paths
    #[arg(short, long)]
    zip: Option<PathBuf>,

    /// Report CSV files
    csv: Vec<PathBuf>,

    /// Output file (default: channel_asset_mapping.csv, or .parquet with --format parquet)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Csv)]
    format: OutputFormat,

    /// Also write a JSON run report here
    #[arg(long)]
    report: Option<PathBuf>,

    /// YAML file with run settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Rows per batch
    #[arg(long)]
    chunk_size: Option<usize>,

    /// Leading rows to drop from every report file
    #[arg(long)]
    skip_rows: Option<usize>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // ─── 1) init logging ─────────────────────────────────────────────
    let default_level = if args.verbose { "debug" } else { "info" };
    let env = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt::Subscriber::builder().with_env_filter(env).init();

    // ─── 2) settings: file, then flags ───────────────────────────────
    let mut config = match &args.config {
        Some(path) => RunConfig::from_yaml_file(path)?,
        None => RunConfig::default(),
    };
    if let Some(n) = args.chunk_size {
        config.chunk_size = n;
    }
    if let Some(n) = args.skip_rows {
        config.skip_rows = n;
    }
    config.validate().context("invalid settings")?;

    // ─── 3) collect inputs ───────────────────────────────────────────
    let inputs = match &args.zip {
        Some(zip) => {
            if !args.csv.is_empty() {
                warn!(
                    ignored = args.csv.len(),
                    "both a ZIP and CSV files were given; using the ZIP"
                );
            }
            InputSet::from_zip(zip, config.max_files)?
        }
        None => InputSet::from_paths(&args.csv, config.max_files)?,
    };
    info!(files = inputs.len(), "processing inputs");

    // ─── 4) run ──────────────────────────────────────────────────────
    let report = pipeline::run(&config, &args.reference, &inputs)?;

    // ─── 5) write results ────────────────────────────────────────────
    match &report.aggregate {
        Aggregate::NoMatches => {
            println!("No matches found in any input file; nothing written.");
        }
        Aggregate::Table(table) => {
            let path = args.output.clone().unwrap_or_else(|| {
                PathBuf::from(DEFAULT_OUTPUT).with_extension(args.format.extension())
            });
            output::write_table(table, &path, args.format)?;
            print_summary(&report, &path.display().to_string());
        }
    }

    if let Some(path) = &args.report {
        output::write_report(&report, path)?;
    }

    let failed = report.failed_files();
    if failed > 0 {
        warn!(failed, "some files could not be processed");
    }
    Ok(())
}

fn print_summary(report: &RunReport, written_to: &str) {
    let summary = report.summary();
    println!("Results written to {}", written_to);
    println!("  Total mappings:      {}", summary.total);
    println!("  Unique asset IDs:    {}", summary.unique_values);
    println!("  Unique channel IDs:  {}", summary.unique_identifiers);
    let failed = report.failed_files();
    if failed > 0 {
        println!("  Files failed:        {} of {}", failed, report.files.len());
    }
}
