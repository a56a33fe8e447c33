use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use filebalancer::config::Config;
use filebalancer::error::{BalancerErrorTrait, Error};
use filebalancer::service::BalancerService;

mod commands;

#[derive(Parser)]
#[command(
    name = "filebalancer",
    version,
    about = "Count-based file rebalancer for a fixed pool of storage nodes",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file (defaults to FILEBALANCER_* environment variables)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format (text, json)
    #[arg(long, global = true)]
    log_format: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduling loop until Ctrl-C
    Serve,

    /// Print the current plan without acting on it
    Diagnostics,

    /// Run one scheduling cycle now
    RunOnce,

    /// Mark a node drained
    Drain {
        /// Node id
        node: String,

        /// Why the node is being drained
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Return a drained node to service
    Undrain {
        /// Node id
        node: String,
    },

    /// Copy a local file into the pool
    Ingest {
        /// File to ingest
        path: PathBuf,

        /// Place the file on this node instead of the least-loaded one
        #[arg(short, long)]
        node: Option<String>,
    },

    /// List file records
    Files,

    /// List audit records, newest first
    Operations {
        /// Maximum number of records
        #[arg(short, long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref())?;

    // Initialize tracing/logging
    let log_format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| config.logging.format.clone());
    setup_tracing(&log_format, &config.logging.level, cli.verbose)?;

    tracing::info!(nodes = ?config.node_ids(), "filebalancer starting");

    if let Err(err) = run(cli.command, config).await {
        report_failure(&err);
        return Err(err);
    }

    Ok(())
}

async fn run(command: Commands, config: Config) -> Result<()> {
    let service = BalancerService::from_config(config).await?;

    match command {
        Commands::Serve => {
            tracing::info!("Starting serve command");
            commands::serve(service).await?;
        }

        Commands::Diagnostics => commands::diagnostics(&service)?,

        Commands::RunOnce => {
            tracing::info!("Starting run-once command");
            commands::run_once(&service).await?;
        }

        Commands::Drain { node, reason } => {
            tracing::info!(node = %node, reason = ?reason, "Starting drain command");
            commands::drain(&service, &node, reason.as_deref())?;
        }

        Commands::Undrain { node } => {
            tracing::info!(node = %node, "Starting undrain command");
            commands::undrain(&service, &node)?;
        }

        Commands::Ingest { path, node } => {
            tracing::info!(path = %path.display(), node = ?node, "Starting ingest command");
            commands::ingest(&service, path, node.as_deref()).await?;
        }

        Commands::Files => commands::files(&service)?,

        Commands::Operations { limit } => commands::operations(&service, limit)?,
    }

    Ok(())
}

/// Log a failed command with the category of the underlying balancer error
fn report_failure(err: &anyhow::Error) {
    match err.chain().find_map(|cause| cause.downcast_ref::<Error>()) {
        Some(cause) => tracing::error!(
            category = cause.category().as_str(),
            recoverable = cause.is_recoverable(),
            error = %err,
            "Command failed"
        ),
        None => tracing::error!(error = %err, "Command failed"),
    }
}

fn setup_tracing(format: &str, level: &str, verbose: bool) -> Result<()> {
    let env_filter = if verbose {
        tracing_subscriber::EnvFilter::new("filebalancer=debug,info")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("filebalancer={level},warn")))
    };

    match format {
        "json" => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty().with_writer(std::io::stderr))
                .init();
        }
    }

    Ok(())
}
