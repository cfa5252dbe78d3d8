//! Streamgate binary - standalone HTTP stream transport server.
//!
//! Runs the transport with the built-in null dispatcher (answers `ping`,
//! rejects other methods). Real deployments embed the library and wire
//! their own dispatcher and auth validator.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use streamgate::dispatch::NullDispatcher;
use streamgate::{HttpStreamTransport, ResponseMode, TransportConfig};
use tracing::{error, info};

/// Command-line configuration. The base config is loaded from the
/// `STREAMGATE_*` environment variables (which also cover the CORS block
/// and queue capacity); any flag given here overrides its env counterpart.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on [default: 8080]
    #[arg(short, long)]
    port: Option<u16>,

    /// Endpoint path for transport communication [default: /mcp]
    #[arg(long)]
    endpoint: Option<String>,

    /// Response delivery mode for new sessions (stream|batch) [default: stream]
    #[arg(long)]
    response_mode: Option<String>,

    /// Batch collection window in milliseconds, 0 flushes on first message
    /// [default: 30000]
    #[arg(long)]
    batch_timeout_ms: Option<u64>,

    /// Maximum raw message size in bytes [default: 4194304]
    #[arg(long)]
    max_message_size: Option<usize>,

    /// Ping frequency in milliseconds, 0 disables liveness enforcement
    /// [default: 30000]
    #[arg(long)]
    ping_frequency_ms: Option<u64>,

    /// Ping ack timeout in milliseconds [default: 10000]
    #[arg(long)]
    ping_timeout_ms: Option<u64>,

    /// Static API key required in the x-api-key header
    #[arg(long)]
    api_key: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<TransportConfig, streamgate::TransportError> {
        let mut config = TransportConfig::from_env()?;
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(endpoint) = self.endpoint {
            config.endpoint = endpoint;
        }
        if let Some(mode) = self.response_mode {
            config.response_mode = mode.parse::<ResponseMode>()?;
        }
        if let Some(ms) = self.batch_timeout_ms {
            config.batch_timeout = Duration::from_millis(ms);
        }
        if let Some(bytes) = self.max_message_size {
            config.max_message_size = bytes;
        }
        if let Some(ms) = self.ping_frequency_ms {
            config.ping_frequency = Duration::from_millis(ms);
        }
        if let Some(ms) = self.ping_timeout_ms {
            config.ping_timeout = Duration::from_millis(ms);
        }
        if let Some(key) = self.api_key {
            config.api_key = Some(key);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match Cli::parse().into_config() {
        Ok(config) => config,
        Err(err) => {
            error!(%err, "invalid configuration");
            return Err(err.into());
        }
    };

    let transport = HttpStreamTransport::new(config, Arc::new(NullDispatcher));
    let shutdown = transport.shutdown_token();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            shutdown.cancel();
        }
    });

    transport.bind_and_serve().await?;
    Ok(())
}
