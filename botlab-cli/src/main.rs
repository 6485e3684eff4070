//! botlab CLI: run, validate and plan batch backtests.
//!
//! Commands:
//! - `run`: execute a batch from a TOML config and persist its summaries
//! - `validate`: parse the config, expand grids and aggregate inputs without loading data
//! - `plan`: print the chunk plan and the window table of a batch

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use botlab_core::bot::{BotBlueprint, InstanceSpec};
use botlab_core::data::StreamResolver;
use botlab_core::domain::Precision;
use botlab_core::input::{aggregate, Aggregation, Consumer, FieldKind, InputDecl};
use botlab_core::loader::ChunkPlan;
use botlab_runner::config::DataSource;
use botlab_runner::{
    BatchConfig, BatchController, BatchOutcome, BatchReport, CsvJournalSink, CsvResolver, FanoutSink, JsonlSink,
    validate_instances, PrecisionKind, SyntheticResolver,
};

#[derive(Parser)]
#[command(name = "botlab", about = "botlab CLI: batch backtesting of trading bots")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a batch from a TOML config file.
    Run {
        /// Path to the batch TOML config.
        config: PathBuf,

        /// Override the CSV data directory from the config.
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Override the synthetic data seed from the config.
        #[arg(long)]
        seed: Option<u64>,

        /// Output directory; each batch writes into a subdirectory named by its id.
        #[arg(long, default_value = "results")]
        output_dir: PathBuf,

        /// Skip the per-instance journal CSVs.
        #[arg(long, default_value_t = false)]
        no_journals: bool,

        /// Number of instances to print, best AD score first.
        #[arg(long, default_value_t = 20)]
        top: usize,
    },
    /// Parse and validate a config, expand grids and aggregate inputs.
    Validate {
        /// Path to the batch TOML config.
        config: PathBuf,
    },
    /// Print the chunk plan and window table of a batch.
    Plan {
        /// Path to the batch TOML config.
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            data_dir,
            seed,
            output_dir,
            no_journals,
            top,
        } => run_batch_cmd(&config, data_dir, seed, &output_dir, !no_journals, top),
        Commands::Validate { config } => run_validate(&config),
        Commands::Plan { config } => run_plan(&config),
    }
}

fn load_config(path: &Path) -> Result<(BatchConfig, Vec<InstanceSpec>)> {
    let config = BatchConfig::from_file(path).with_context(|| format!("loading {}", path.display()))?;
    let specs = config.instance_specs()?;
    Ok((config, specs))
}

// ── run ──────────────────────────────────────────────────────────────

fn run_batch_cmd(
    config_path: &Path,
    data_dir: Option<PathBuf>,
    seed: Option<u64>,
    output_dir: &Path,
    journals: bool,
    top: usize,
) -> Result<()> {
    let (mut config, specs) = load_config(config_path)?;
    if let Some(dir) = data_dir {
        config.data.dir = dir;
    }
    if let Some(seed) = seed {
        config.data.seed = seed;
    }
    if config.data.source == DataSource::Csv && !config.data.dir.is_dir() {
        bail!("data directory '{}' does not exist", config.data.dir.display());
    }

    match config.batch.precision {
        PrecisionKind::F64 => run_typed::<f64>(&config, specs, output_dir, journals, top),
        PrecisionKind::Decimal => run_typed::<Decimal>(&config, specs, output_dir, journals, top),
    }
}

fn run_typed<P: Precision>(
    config: &BatchConfig,
    specs: Vec<InstanceSpec>,
    output_dir: &Path,
    journals: bool,
    top: usize,
) -> Result<()> {
    let resolver: Box<dyn StreamResolver<P>> = match config.data.source {
        DataSource::Csv => Box::new(CsvResolver::new(config.data.dir.clone())),
        DataSource::Synthetic => Box::new(SyntheticResolver::new(config.data.seed)),
    };

    let batch_id = config.batch_id();
    let run_dir = output_dir.join(&batch_id[..12]);
    let mut sink = FanoutSink::new().with(JsonlSink::new(run_dir.join("summaries.jsonl")));
    if journals {
        sink = sink.with(CsvJournalSink::new(run_dir.join("journals")));
    }

    let controller = BatchController::new(config, specs, resolver.as_ref()).with_sink(Arc::new(sink));
    let handle = controller.handle();
    let updates = handle.subscribe();
    let reporter = thread::spawn(move || {
        for p in updates {
            info!(
                state = ?p.state,
                bars = p.completed_bars,
                total = p.total_bars,
                pct = format!("{:.1}", p.fraction() * 100.0),
                "progress"
            );
        }
    });

    let outcome = controller.run();
    drop(handle);
    let _ = reporter.join();

    match outcome? {
        BatchOutcome::Completed(report) => {
            std::fs::create_dir_all(&run_dir)?;
            let json = serde_json::to_string_pretty(&report).context("serializing batch report")?;
            std::fs::write(run_dir.join("report.json"), json)?;
            print_report(&report, top);
            println!("Results saved to: {}", run_dir.display());
        }
        BatchOutcome::Cancelled { at, bars_processed } => {
            println!("Batch cancelled before {at} after {bars_processed} bars");
        }
    }
    Ok(())
}

fn print_report<P: Precision>(report: &BatchReport<P>, top: usize) {
    println!();
    println!("=== Batch {} ===", report.batch_id);
    println!(
        "Bars: {}  Instances: {}  Windows: {} (from {} declared inputs)  Wall time: {:.2?}",
        report.bars_processed,
        report.summaries.len(),
        report.windows_created,
        report.inputs_declared,
        report.wall_time
    );
    println!();
    println!(
        "{:<32} {:>7} {:>14} {:>14} {:>8} {:>9} {:>8}",
        "Instance", "Trades", "Realized", "Equity", "MaxDD%", "AnnRet%", "AD"
    );
    println!("{}", "-".repeat(98));

    let mut ranked: Vec<_> = report.summaries.iter().collect();
    ranked.sort_by(|a, b| b.ad_score.total_cmp(&a.ad_score));
    for s in ranked.into_iter().take(top) {
        let name = if s.aborted {
            format!("{} (aborted)", s.instance)
        } else {
            s.instance.clone()
        };
        println!(
            "{:<32} {:>7} {:>14.2} {:>14.2} {:>8.2} {:>9.2} {:>8.3}",
            name,
            s.trades.total(),
            s.realized_profit.to_f64(),
            s.final_equity.to_f64(),
            s.max_equity_drawdown_pct.to_f64() * 100.0,
            s.annualized_return * 100.0,
            s.ad_score
        );
    }
}

// ── validate / plan ──────────────────────────────────────────────────

fn aggregate_specs(config: &BatchConfig, specs: &[InstanceSpec]) -> Result<Aggregation<f64>> {
    validate_instances::<f64>(config.batch.timeframe, specs)?;
    let consumers: Vec<Consumer> = specs
        .iter()
        .map(|s| Consumer::new(s.market.clone(), vec![InputDecl::own(FieldKind::Ohlcv, 1)]))
        .chain(
            specs
                .iter()
                .map(|s| Consumer::new(s.market.clone(), BotBlueprint::<f64>::inputs(&s.params))),
        )
        .collect();
    Ok(aggregate::<f64>(&consumers, config.batch.timeframe, config.batch.gap_fill)?)
}

fn run_validate(config_path: &Path) -> Result<()> {
    let (config, specs) = load_config(config_path)?;
    let agg = aggregate_specs(&config, &specs)?;

    println!("Config OK: {}", config_path.display());
    println!("Batch id: {}", config.batch_id());
    println!(
        "Range: {} .. {} ({} bars of {})",
        config.batch.start,
        config.batch.end,
        config.batch.timeframe.bars_between(config.batch.start, config.batch.end).unwrap_or(0),
        config.batch.timeframe
    );
    println!("Instances: {} ({} explicit, {} grids)", specs.len(), config.instances.len(), config.grids.len());
    println!("Windows: {} (from {} declared inputs)", agg.arena.len(), agg.declared);
    Ok(())
}

fn run_plan(config_path: &Path) -> Result<()> {
    let (config, specs) = load_config(config_path)?;
    let b = &config.batch;
    let plan = ChunkPlan::new(b.start, b.end, b.timeframe, b.chunk)?;
    let agg = aggregate_specs(&config, &specs)?;

    println!("Chunks ({}, {}):", b.chunk, plan.len());
    println!("{:<4} {:<27} {:<27} {:>6}", "#", "Start", "End", "Bars");
    println!("{}", "-".repeat(67));
    for (i, chunk) in plan.chunks().iter().enumerate() {
        println!(
            "{:<4} {:<27} {:<27} {:>6}",
            i,
            chunk.start.to_rfc3339(),
            chunk.end.to_rfc3339(),
            chunk.bars(b.timeframe)
        );
    }

    println!();
    println!("Windows ({}):", agg.arena.len());
    println!("{:<4} {:<48} {:>8} {:>14}", "#", "Input", "Capacity", "Gap");
    println!("{}", "-".repeat(77));
    for handle in agg.arena.handles() {
        let (Some(identity), Some(slot), Some(gap)) =
            (agg.arena.identity(handle), agg.arena.slot(handle), agg.arena.gap_fill(handle))
        else {
            continue;
        };
        println!(
            "{:<4} {:<48} {:>8} {:>14}",
            handle.0,
            identity.key(),
            slot.capacity(),
            format!("{gap:?}")
        );
    }
    Ok(())
}
