//! `bulk-load`: loads a CSV file into the configured destination.

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use loader::LoaderRegistry;
use loader_config::shared::LoaderSettings;
use loader_config::{load_config, load_config_from_file};
use loader_telemetry::metrics::init_metrics;
use loader_telemetry::tracing::init_tracing;
use tracing::{error, info};

mod source;

#[derive(Debug, Parser)]
#[command(name = "bulk-load", version, about, arg_required_else_help = true)]
struct Args {
    /// CSV file to load.
    #[arg(long)]
    input: PathBuf,
    /// Existing destination table, optionally schema-qualified.
    #[arg(long)]
    table: String,
    /// Settings file. Defaults to `configuration/base.yaml` plus the overlay
    /// of `APP_ENVIRONMENT`.
    #[arg(long)]
    config: Option<PathBuf>,
    /// The first row of the input is data, not column names.
    #[arg(long)]
    no_header: bool,
    /// Address to serve Prometheus metrics on while loading.
    #[arg(long)]
    metrics_listen: Option<SocketAddr>,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let settings = match &args.config {
        Some(path) => load_config_from_file::<LoaderSettings>(path)?,
        None => load_config::<LoaderSettings>()?,
    };

    let _log_flusher = init_tracing(env!("CARGO_BIN_NAME"))?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(args, settings))?;

    Ok(())
}

async fn async_main(args: Args, settings: LoaderSettings) -> anyhow::Result<()> {
    if let Err(err) = run(args, settings).await {
        error!("bulk load failed: {err:#}");
        return Err(err);
    }

    Ok(())
}

async fn run(args: Args, settings: LoaderSettings) -> anyhow::Result<()> {
    if let Some(addr) = args.metrics_listen {
        init_metrics(addr)?;
    }

    let registry = LoaderRegistry::with_builtin_backends();
    let mut loader = registry.create(&settings.destination_descriptor())?;

    let input = File::open(&args.input)?;
    let source = source::read_csv(BufReader::new(input), !args.no_header)?;
    info!(
        input = %args.input.display(),
        rows = source.num_rows(),
        columns = source.num_columns(),
        "read input"
    );

    loader.connect().await?;
    let result = loader.load(&source, &args.table).await;
    loader.close().await?;
    let result = result?;

    info!(
        table = %args.table,
        rows = result.rows_loaded,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "bulk load finished"
    );

    Ok(())
}
