//! tilelog CLI - build a log with concurrent backends, then recover it

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tilelog_core::workload::{check_recovery, prepare_log_file, Engine, WorkloadConfig};
use tilelog_core::LoggingType;
use tracing::info;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(name = "tilelog")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(flatten)]
    workload: WorkloadArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a fresh log by running the workload
    Build,
    /// Recover an existing log into an empty table
    Recover,
    /// Build, then recover
    Run,
}

#[derive(Args)]
struct WorkloadArgs {
    /// JSON file with workload settings; flags override it
    #[arg(global = true, long)]
    config: Option<PathBuf>,

    /// Logging type (aries, alternative)
    #[arg(global = true, short, long, value_parser = parse_logging_type)]
    logging_type: Option<LoggingType>,

    /// Insert transactions per backend
    #[arg(global = true, short, long)]
    tuple_count: Option<usize>,

    /// Concurrent backend threads
    #[arg(global = true, short, long)]
    backend_count: Option<usize>,

    /// Varchar columns per tuple
    #[arg(global = true, short = 'z', long)]
    column_count: Option<usize>,

    /// Deletes per backend after the updates
    #[arg(global = true, long)]
    deletes: Option<usize>,

    /// Abort every n-th insert transaction
    #[arg(global = true, long)]
    abort_every: Option<usize>,

    /// Transactions per backend left without COMMIT
    #[arg(global = true, long)]
    unfinished: Option<usize>,

    /// Fail if the recovered tuple count is not the expected one
    #[arg(global = true, short, long)]
    check_tuple_count: bool,

    /// Replay every logged transaction as committed
    #[arg(global = true, short, long)]
    redo_all_logs: bool,

    /// Directory for the log file
    #[arg(global = true, short, long)]
    dir: Option<PathBuf>,
}

fn parse_logging_type(s: &str) -> Result<LoggingType, String> {
    LoggingType::parse(s).ok_or_else(|| format!("unknown logging type: {}", s))
}

impl WorkloadArgs {
    fn load(&self) -> anyhow::Result<WorkloadConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = fs::read_to_string(path)
                    .with_context(|| format!("cannot read config {:?}", path))?;
                serde_json::from_str(&text)
                    .with_context(|| format!("invalid config {:?}", path))?
            }
            None => WorkloadConfig::default(),
        };

        if let Some(v) = self.logging_type {
            config.logging_type = v;
        }
        if let Some(v) = self.tuple_count {
            config.tuple_count = v;
        }
        if let Some(v) = self.backend_count {
            config.backend_count = v;
        }
        if let Some(v) = self.column_count {
            config.column_count = v;
        }
        if let Some(v) = self.deletes {
            config.deletes_per_backend = v;
        }
        if let Some(v) = self.abort_every {
            config.abort_every = v;
        }
        if let Some(v) = self.unfinished {
            config.unfinished_per_backend = v;
        }
        if let Some(v) = &self.dir {
            config.log_dir = v.clone();
        }
        config.check_tuple_count |= self.check_tuple_count;
        config.redo_all |= self.redo_all_logs;
        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = cli.workload.load()?;
    info!("Workload: {}", serde_json::to_string(&config)?);

    let engine = Engine::new(&config);
    match cli.command {
        Commands::Build => build(&engine, &config),
        Commands::Recover => recover(&engine, &config),
        Commands::Run => {
            build(&engine, &config)?;
            recover(&engine, &config)
        }
    }
}

fn build(engine: &Engine, config: &WorkloadConfig) -> anyhow::Result<()> {
    let report = prepare_log_file(engine, config).context("building the log failed")?;
    println!(
        "built {:?}: {} committed, {} aborted, {} unfinished, {} live tuples",
        config.log_file(),
        report.committed,
        report.aborted,
        report.unfinished,
        report.live_tuples
    );
    Ok(())
}

fn recover(engine: &Engine, config: &WorkloadConfig) -> anyhow::Result<()> {
    let report = check_recovery(engine, config).context("recovery failed")?;
    println!(
        "recovered {:?}: {} records, {} transactions committed, {} skipped, {} tuples live",
        config.log_file(),
        report.stats.records_read,
        report.stats.committed_transactions,
        report.stats.skipped_transactions,
        report.recovered_tuples
    );

    if config.check_tuple_count && !report.is_consistent() {
        bail!(
            "tuple count mismatch: recovered {}, expected {}",
            report.recovered_tuples,
            report.expected_tuples
        );
    }
    Ok(())
}
