//! Tableload - parallel bulk loader

use anyhow::{Context, Result};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use tableload_common::logging::{init_logging, LogConfig, LogLevel};
use tableload_ingest::config::{LoadConfig, StoreConfig, StoreKind};
use tableload_ingest::progress::{ProgressBarReporter, ProgressReporter, TracingReporter};
use tableload_ingest::store::{HttpStoreFactory, MemoryStore, Store, StoreFactory};
use tableload_ingest::Orchestrator;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "tableload")]
#[command(author, version, about = "Load synthetic order records into a table store in parallel")]
struct Cli {
    /// Partition key prefix (keys look like {prefix}_{batch / 50})
    partition_key_prefix: Option<String>,

    /// Maximum number of batches in flight at once
    #[arg(short = 'w', long)]
    max_workers: Option<usize>,

    /// Number of 100-record batches to load
    #[arg(short = 'n', long)]
    num_batches: Option<usize>,

    /// Store backend
    #[arg(long, value_enum)]
    store: Option<StoreKind>,

    /// Table gateway URL (http store)
    #[arg(long)]
    endpoint: Option<String>,

    /// Target table name
    #[arg(short, long)]
    table: Option<String>,

    /// Share of submits the memory store answers with backpressure
    #[arg(long)]
    throttle_rate: Option<f64>,

    /// Write the final run report to this JSON file
    #[arg(long)]
    report: Option<PathBuf>,

    /// Disable the progress bar
    #[arg(long)]
    no_progress: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    };

    // Environment variables take precedence over the flag
    let log_config = LogConfig::builder()
        .level(log_level)
        .log_file_prefix("tableload")
        .build()
        .merge_env()?;

    let _log_guard = init_logging(&log_config)?;

    let mut load_config = LoadConfig::from_env()?;
    let mut store_config = StoreConfig::from_env()?;
    apply_overrides(&cli, &mut load_config, &mut store_config);

    load_config.validate()?;
    store_config.validate()?;

    let reporter: Arc<dyn ProgressReporter> = if cli.no_progress || !std::io::stdout().is_terminal() {
        Arc::new(TracingReporter)
    } else {
        Arc::new(ProgressBarReporter::new(load_config.num_batches as u64))
    };

    info!(store = %store_config.kind, table = %store_config.table_name, "Using store");

    match store_config.kind {
        StoreKind::Memory => {
            let store = MemoryStore::with_throttle(store_config.throttle_rate);
            let factory = store.connector(store_config.table_name.clone());
            execute(factory, load_config, &store_config, reporter, cli.report.as_deref()).await?;
            info!(rows = store.row_count(&store_config.table_name), "Rows in memory table");
        },
        StoreKind::Http => {
            let factory = HttpStoreFactory::new(&store_config)?;
            execute(factory, load_config, &store_config, reporter, cli.report.as_deref()).await?;
        },
    }

    Ok(())
}

fn apply_overrides(cli: &Cli, load: &mut LoadConfig, store: &mut StoreConfig) {
    if let Some(prefix) = &cli.partition_key_prefix {
        load.partition_key_prefix = prefix.clone();
    }
    if let Some(max_workers) = cli.max_workers {
        load.max_workers = max_workers;
    }
    if let Some(num_batches) = cli.num_batches {
        load.num_batches = num_batches;
    }
    if let Some(kind) = cli.store {
        store.kind = kind;
    }
    if let Some(endpoint) = &cli.endpoint {
        store.endpoint = endpoint.clone();
    }
    if let Some(table) = &cli.table {
        store.table_name = table.clone();
    }
    if let Some(rate) = cli.throttle_rate {
        store.throttle_rate = rate;
    }
}

async fn execute<F: StoreFactory>(
    factory: F,
    load_config: LoadConfig,
    store_config: &StoreConfig,
    reporter: Arc<dyn ProgressReporter>,
    report_path: Option<&std::path::Path>,
) -> Result<()> {
    let table = &store_config.table_name;
    let provisioned = match factory.connect() {
        Ok(mut client) => client.ensure_container_exists(table).await,
        Err(e) => Err(e),
    };
    match provisioned {
        Ok(true) => info!(table = %table, "Table created"),
        Ok(false) => info!(table = %table, "Table already exists"),
        Err(e) => warn!(table = %table, "Table creation skipped: {}", e),
    }

    let orchestrator = Orchestrator::new(load_config, factory, reporter);

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, no new batches will start");
            cancel.cancel();
        }
    });

    let report = orchestrator.run().await?;

    if let Some(path) = report_path {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write run report to {}", path.display()))?;
        info!(path = %path.display(), "Run report written");
    }

    Ok(())
}
