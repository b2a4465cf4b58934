use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use txstream::commands::{handle_serve, handle_sort_csv};
use txstream::config::Settings;
use txstream::log_format::CompactFormat;

#[derive(Parser)]
#[command(name = "txstream", about = "Transaction stream aggregation pipeline", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline: importer, aggregator, archiver and the HTTP API
    Serve,
    /// Sort a transactions CSV by timestamp, as the importer expects
    SortCsv {
        /// Unsorted input file
        #[arg(long)]
        input: PathBuf,
        /// Where to write the sorted file
        #[arg(long)]
        output: PathBuf,
    },
}

fn init_logging() {
    // LOG_LEVEL carries a plain level ("debug") or a full filter spec.
    let filter = std::env::var("LOG_LEVEL")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .event_format(CompactFormat)
        .init();
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env for local / docker parity
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Serve => match Settings::load() {
            Ok(settings) => handle_serve(settings).await,
            Err(e) => Err(e),
        },
        Commands::SortCsv { input, output } => handle_sort_csv(&input, &output),
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        std::process::exit(1);
    }
}
