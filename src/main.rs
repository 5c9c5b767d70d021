use std::net::SocketAddr;

use anyhow::Result;
use clap::Parser;
use nskv::config::Config;
use nskv::server::Server;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line overrides for the environment configuration
#[derive(Debug, Parser)]
#[command(name = "nskv", version, about = "Namespaced rate limiting, job queue and cache service")]
struct Cli {
    /// Address to listen on
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Redis connection URL
    #[arg(long)]
    redis_url: Option<String>,

    /// Store backend: redis or memory
    #[arg(long)]
    backend: Option<String>,

    /// Log level for the nskv crate
    #[arg(long)]
    log_level: Option<String>,

    /// API requests per minute per client, 0 disables
    #[arg(long)]
    api_rate_limit: Option<u64>,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(bind) = self.bind {
            config.bind_addr = bind;
        }
        if let Some(redis_url) = self.redis_url {
            config.redis_url = redis_url;
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }
        if let Some(limit) = self.api_rate_limit {
            config.api_rate_limit = limit;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let mut config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    Cli::parse().apply(&mut config);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("nskv={},tower_http=debug", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting nskv service");
    tracing::info!(
        "Configuration: bind_addr={}, backend={}, api_rate_limit={}",
        config.bind_addr,
        config.backend,
        config.api_rate_limit
    );

    let server = Server::new(config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server.run().await
}
