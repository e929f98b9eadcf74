//! nemfuture CLI: source catalogs, raw tables, settled and forecast prices,
//! and forecast-vs-settled comparisons.
//!
//! Commands:
//! - `sources`: print a table's unified source catalog as JSON lines
//! - `table`: fetch raw rows as of a moment, over a range, or latest
//! - `prices`: settled 5/30-minute prices for a window
//! - `forecasts`: predispatch forecasts issued within a window
//! - `compare`: one day of forecasts reconciled against settlement

use anyhow::{bail, Context, Result};
use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use nemfuture_core::domain::{ActualPoint, ForecastPoint, Market, SettledPrice, Tier};
use nemfuture_core::export;
use nemfuture_core::source::LogProgress;
use nemfuture_core::time;
use nemfuture_core::transform::WidePrices;
use nemfuture_core::{Engine, EngineConfig, ReconcileOptions, SourceQuery};

#[derive(Parser)]
#[command(
    name = "nemfuture",
    version,
    about = "NEM forecast and settlement price retrieval and reconciliation"
)]
struct Cli {
    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the configured number of concurrent downloads.
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the unified source catalog of a table as JSON lines.
    Sources {
        /// Logical table name (e.g. PREDISPATCHPRICE, TRADINGPRICE).
        #[arg(long)]
        table: String,

        /// Only show records from one tier: historical, rolling or current.
        #[arg(long, value_parser = parse_tier)]
        tier: Option<Tier>,
    },
    /// Fetch raw rows of a table.
    ///
    /// With --as-of, the revision nearest-preceding that moment; with
    /// --start and --end, every row in the window; otherwise the latest.
    Table {
        #[arg(long)]
        table: String,

        /// Moment to answer for (YYYY-MM-DD HH:MM[:SS] or YYYY/MM/DD ...).
        #[arg(long, value_parser = parse_timestamp)]
        as_of: Option<NaiveDateTime>,

        #[arg(long, value_parser = parse_timestamp)]
        start: Option<NaiveDateTime>,

        #[arg(long, value_parser = parse_timestamp)]
        end: Option<NaiveDateTime>,

        /// Write CSV here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Settled prices for (start, end].
    Prices {
        #[arg(long, value_parser = parse_timestamp)]
        start: NaiveDateTime,

        #[arg(long, value_parser = parse_timestamp)]
        end: NaiveDateTime,

        /// One column per market and region instead of one row per price.
        #[arg(long, default_value_t = false)]
        wide: bool,

        /// Write CSV here instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Forecasts issued and targeted within [start, end].
    Forecasts {
        #[arg(long, value_parser = parse_timestamp)]
        start: NaiveDateTime,

        #[arg(long, value_parser = parse_timestamp)]
        end: NaiveDateTime,

        /// One column per market and region instead of one row per price.
        #[arg(long, default_value_t = false)]
        wide: bool,

        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Reconcile one day of forecasts against settlement.
    Compare {
        /// Calendar day (YYYY-MM-DD).
        #[arg(long)]
        date: NaiveDate,

        /// Region to compare: NSW, QLD, SA, TAS, VIC, AVG or MAINLAND_AVG.
        #[arg(long)]
        region: String,

        /// Market: Energy (default) or an FCAS market such as RAISEREG.
        #[arg(long, default_value = "Energy")]
        market: Market,

        /// Drop intervals before each frame's issue time.
        #[arg(long, default_value_t = false)]
        strict: bool,

        /// Write to this file: `.parquet` for Parquet, anything else for CSV.
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, String> {
    time::parse_field(raw).ok_or_else(|| format!("unrecognised timestamp '{raw}'"))
}

fn parse_tier(raw: &str) -> Result<Tier, String> {
    match raw.to_ascii_lowercase().as_str() {
        "historical" | "historical_archive" | "archive" => Ok(Tier::HistoricalArchive),
        "rolling" | "rolling_archive" | "daily" => Ok(Tier::RollingArchive),
        "current" | "recent" => Ok(Tier::Current),
        other => Err(format!("unknown tier '{other}'")),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let engine = build_engine(cli.config.as_deref(), cli.workers)?;

    match cli.command {
        Commands::Sources { table, tier } => run_sources(&engine, &table, tier),
        Commands::Table {
            table,
            as_of,
            start,
            end,
            output,
        } => run_table(&engine, &table, SourceQuery::from_parts(as_of, start, end), output),
        Commands::Prices {
            start,
            end,
            wide,
            output,
        } => run_prices(&engine, start, end, wide, output),
        Commands::Forecasts {
            start,
            end,
            wide,
            output,
        } => run_forecasts(&engine, start, end, wide, output),
        Commands::Compare {
            date,
            region,
            market,
            strict,
            output,
        } => run_compare(&engine, date, region, market, strict, output),
    }
}

fn build_engine(config: Option<&Path>, workers: Option<usize>) -> Result<Engine> {
    let mut config = match config {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(n) = workers {
        config.fetch.workers = n;
    }
    Ok(Engine::new(config)?.with_progress(Arc::new(LogProgress)))
}

/// Stdout, or a buffered file when `output` is given.
fn sink(output: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("creating {}", path.display()))?,
        )),
        None => Box::new(io::stdout().lock()),
    })
}

fn run_sources(engine: &Engine, table: &str, tier: Option<Tier>) -> Result<()> {
    let catalog = engine.catalog(table, &engine.cancel_token())?;
    let mut out = sink(None)?;
    let mut shown = 0usize;
    for record in catalog.records().iter().filter(|r| tier.map_or(true, |t| r.tier == t)) {
        serde_json::to_writer(&mut out, record)?;
        writeln!(out)?;
        shown += 1;
    }
    out.flush()?;
    tracing::info!(table, records = catalog.len(), documents = catalog.urls().len(), shown, "catalog listed");
    Ok(())
}

fn run_table(engine: &Engine, table: &str, query: SourceQuery, output: Option<PathBuf>) -> Result<()> {
    let rows = engine.table(table, query, &engine.cancel_token())?;
    if rows.is_empty() {
        tracing::warn!(table, ?query, "no rows matched");
    }
    export::write_table_csv(&rows, sink(output.as_deref())?)?;
    Ok(())
}

fn settled_prices(points: &[ActualPoint]) -> Vec<SettledPrice> {
    points
        .iter()
        .map(|p| SettledPrice {
            interval5: p.interval5,
            region: p.region.clone(),
            market: p.market,
            price: p.settled_5min,
        })
        .collect()
}

fn run_prices(
    engine: &Engine,
    start: NaiveDateTime,
    end: NaiveDateTime,
    wide: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    if end <= start {
        bail!("--end must be after --start");
    }
    let settlement = engine.settlement_prices(start, end, &engine.cancel_token())?;
    let out = sink(output.as_deref())?;

    if wide {
        let prices = settled_prices(settlement.points());
        export::write_wide_csv(&WidePrices::from_settled(&prices), out)?;
        return Ok(());
    }

    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["interval5", "interval30", "region", "market", "settled_5min", "settled_30min"])?;
    for p in settlement.points() {
        writer.write_record([
            time::format_field(p.interval5),
            time::format_field(p.interval30),
            p.region.clone(),
            p.market.to_string(),
            p.settled_5min.to_string(),
            p.settled_30min.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn run_forecasts(
    engine: &Engine,
    start: NaiveDateTime,
    end: NaiveDateTime,
    wide: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    if end <= start {
        bail!("--end must be after --start");
    }
    let points: Vec<ForecastPoint> = engine.forecast_prices(start, end, &engine.cancel_token())?;
    let out = sink(output.as_deref())?;

    if wide {
        export::write_wide_csv(&WidePrices::from_forecasts(&points), out)?;
        return Ok(());
    }

    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(["issued_at", "target_interval", "region", "market", "price"])?;
    for p in &points {
        writer.write_record([
            time::format_field(p.issued_at),
            time::format_field(p.target_interval),
            p.region.clone(),
            p.market.to_string(),
            p.price.map(|v| v.to_string()).unwrap_or_default(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

fn run_compare(
    engine: &Engine,
    date: NaiveDate,
    region: String,
    market: Market,
    strict: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let mut options = ReconcileOptions::for_region(region.to_ascii_uppercase()).with_market(market);
    if strict {
        options = options.strict();
    }

    let series = engine.compare_day(date, &options, &engine.cancel_token())?;
    if series.is_empty() {
        tracing::warn!(%date, region, %market, "nothing to compare");
    }

    match output {
        Some(path) if path.extension().is_some_and(|e| e.eq_ignore_ascii_case("parquet")) => {
            export::write_parquet(&export::series_frame(&series)?, &path)?;
        }
        other => export::write_series_csv(&series, sink(other.as_deref())?)?,
    }

    let stats = engine.cache_stats();
    tracing::info!(
        frames = series.issue_times().len(),
        rows = series.len(),
        downloads = stats.downloads,
        cache_hits = stats.hits,
        "comparison done"
    );
    Ok(())
}
