//! StockGraph CLI — fetch quotes, cluster a universe, print the default universe.
//!
//! Commands:
//! - `fetch` — download one security's daily history and print it as a frame
//! - `cluster` — run the full pipeline from a TOML config and write artifacts
//! - `universe` — print the built-in KRX universe as TOML

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use stockgraph_core::data::{
    fetch_with_retry, series_frame, NaverDailySource, QuoteSource, RetryPolicy, SourceConfig,
    TracingProgress, Universe,
};
use stockgraph_core::domain::SecurityId;
use stockgraph_runner::{
    default_start_date, run_pipeline, save_artifacts, PipelineConfig, PipelineResult,
};

#[derive(Parser)]
#[command(
    name = "stockgraph",
    about = "StockGraph CLI — correlation-structure clustering of equities"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one security's daily history and print it.
    Fetch {
        /// Six-digit security code (e.g. 005930).
        code: String,

        /// Start date (YYYY.MM.DD or YYYY-MM-DD). Defaults to 2017.01.01.
        #[arg(long)]
        start: Option<String>,

        /// Print every row instead of the head and tail.
        #[arg(long, default_value_t = false)]
        all: bool,
    },
    /// Cluster a universe and write the result artifacts.
    Cluster {
        /// Path to a TOML pipeline config. Defaults to the built-in universe.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Start date override (YYYY.MM.DD or YYYY-MM-DD).
        #[arg(long)]
        start: Option<String>,

        /// Fetch with this many concurrent requests.
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Output directory for result.json and the CSV exports.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,
    },
    /// Print the built-in universe as TOML.
    Universe,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Fetch { code, start, all } => run_fetch(&code, start.as_deref(), all),
        Commands::Cluster {
            config,
            start,
            max_concurrency,
            output_dir,
        } => run_cluster(config, start.as_deref(), max_concurrency, output_dir),
        Commands::Universe => {
            print!("{}", Universe::default_krx().to_toml()?);
            Ok(())
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).compact())
        .init();
}

/// Accepts the listing's `YYYY.MM.DD` as well as ISO dates.
fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s, "%Y.%m.%d")
        .or_else(|_| NaiveDate::parse_from_str(s, "%Y-%m-%d"))
        .with_context(|| format!("invalid date '{s}', expected YYYY.MM.DD or YYYY-MM-DD"))
}

fn run_fetch(code: &str, start: Option<&str>, all: bool) -> Result<()> {
    let start = start.map(parse_date).transpose()?.unwrap_or_else(default_start_date);
    let source = NaverDailySource::http(&SourceConfig::default())?;

    let series = fetch_with_retry(&source, &SecurityId::new(code), start, &RetryPolicy::default())?;
    if series.is_empty() {
        bail!("no trading days for {code} on or after {start}");
    }

    if all {
        for bar in series.bars() {
            println!(
                "{} {:>12.2} {:>12.2} {:>12.2} {:>12.2} {:>14.0}",
                bar.trading_date, bar.close, bar.open, bar.high, bar.low, bar.volume
            );
        }
    } else {
        println!("{}", series_frame(&series)?);
    }
    println!(
        "{} trading days from {} to {}",
        series.len(),
        series.first_date().unwrap_or(start),
        series.last_date().unwrap_or(start)
    );
    Ok(())
}

fn run_cluster(
    config_path: Option<PathBuf>,
    start: Option<&str>,
    max_concurrency: Option<usize>,
    output_dir: PathBuf,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => PipelineConfig::from_file(&path)?,
        None => PipelineConfig::default(),
    };
    if let Some(start) = start {
        config.start_date = parse_date(start)?;
    }
    if let Some(n) = max_concurrency {
        config.fetch.max_concurrency = n;
    }

    let source = NaverDailySource::http(&config.source)?;
    let result = run_pipeline(&config, &source as &dyn QuoteSource, &TracingProgress)
        .with_context(|| format!("pipeline failed for {} securities", config.universe.len()))?;

    print_summary(&result);
    save_artifacts(&result, &output_dir)?;
    println!("Artifacts saved to: {}", output_dir.display());
    Ok(())
}

fn print_summary(result: &PipelineResult) {
    println!(
        "{} securities over {} trading days, alpha = {:.3e}",
        result.securities.len(),
        result.dates.len(),
        result.alpha
    );
    for (i, members) in result.clusters().iter().enumerate() {
        println!("Cluster {}: {}", i + 1, members.join(", "));
    }
    for skipped in &result.skipped {
        println!("Skipped {} after {} attempt(s): {}", skipped.id, skipped.attempts, skipped.cause);
    }
    println!("{} partial-correlation edges", result.edges.len());
}
