use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use otel_recall::telemetry::Kind;
use otel_recall::{cli, config, server};

#[derive(Parser)]
#[command(
    name = "otel-recall",
    version,
    about = "OTLP telemetry ingestion with similar-incident search"
)]
struct Cli {
    /// Config file (default: ~/.otel-recall/config.toml)
    #[arg(long, global = true)]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the OTLP receiver and the query API
    Serve,
    /// Search stored telemetry for similar incidents
    Search {
        /// Free-text description of the incident
        query: String,
        /// traces, logs or metrics
        #[arg(long, default_value = "traces")]
        kind: Kind,
        #[arg(long)]
        limit: Option<usize>,
        /// Only return telemetry from this cluster
        #[arg(long)]
        cluster: Option<String>,
    },
    /// Show per-collection statistics
    Stats,
    /// Check database integrity, schema version and embedding model
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::Config::load_from(path)?,
        None => config::Config::load()?,
    };

    // Log to stderr so command output on stdout stays clean.
    let filter =
        EnvFilter::try_new(&config.server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => server::serve(config).await?,
        Command::Search {
            query,
            kind,
            limit,
            cluster,
        } => cli::search::search(&config, &query, kind, limit, cluster.as_deref()).await?,
        Command::Stats => cli::stats::stats(&config).await?,
        Command::Doctor => cli::doctor::doctor(&config)?,
    }

    Ok(())
}
