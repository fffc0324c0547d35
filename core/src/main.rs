use clap::Parser;
use relaymq::{BrokerConfig, BrokerServer, RelaymqError, Result};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

/// Command-line flags override `RELAYMQ_*` environment settings, which override defaults
#[derive(Parser, Debug)]
#[command(name = "relaymq")]
#[command(about = "A single-node exchange/queue message broker")]
struct Args {
    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long)]
    data_dir: Option<String>,

    #[arg(long)]
    virtual_host: Option<String>,

    /// Consumer delivery pool size
    #[arg(long)]
    worker_threads: Option<usize>,

    #[arg(short, long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn apply(self, mut config: BrokerConfig) -> BrokerConfig {
        if let Some(host) = self.host {
            config.host = host;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(data_dir) = self.data_dir {
            config.data_dir = data_dir;
        }
        if let Some(virtual_host) = self.virtual_host {
            config.virtual_host = virtual_host;
        }
        if let Some(worker_threads) = self.worker_threads {
            config.worker_threads = worker_threads;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(parse_log_level(&args.log_level))
        .init();

    let config = args.apply(BrokerConfig::from_env()?);
    config.validate().map_err(RelaymqError::Config)?;

    info!("Starting RelayMQ broker on {}", config.bind_address());
    info!("Virtual host: {}", config.virtual_host);
    info!("Data directory: {}", config.data_dir);
    info!("Delivery workers: {}", config.worker_threads);

    let server = Arc::new(BrokerServer::bind(config).await?);

    let run_server = Arc::clone(&server);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = run_server.run().await {
            error!("Server error: {}", e);
        }
    });

    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            server.shutdown();
        }
        _ = server_handle => {
            info!("Server task completed");
        }
    }

    info!("RelayMQ shut down successfully");
    Ok(())
}

fn parse_log_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => {
            warn!("Invalid log level '{}', defaulting to 'info'", level);
            tracing::Level::INFO
        }
    }
}
