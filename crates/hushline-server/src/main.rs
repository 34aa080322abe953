//! Hushline relay binary.
//!
//! # Usage
//!
//! ```bash
//! # Listen on 0.0.0.0:3000 with 15 minute sessions
//! hushline-server
//!
//! # Port from the environment, shorter sessions
//! PORT=8080 hushline-server --session-duration-secs 300 --warning-lead-secs 20
//! ```

use std::time::Duration;

use clap::Parser;
use hushline_core::SessionConfig;
use hushline_server::{DriverConfig, Server, ServerRuntimeConfig};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Ephemeral end-to-end encrypted session relay
#[derive(Parser, Debug)]
#[command(name = "hushline-server")]
#[command(about = "Ephemeral WebSocket relay for end-to-end encrypted sessions")]
#[command(version)]
struct Args {
    /// Interface to bind to
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Session lifetime in seconds, reset by each accepted extension
    #[arg(long, default_value_t = 900)]
    session_duration_secs: u64,

    /// How long before expiry members are asked to extend
    #[arg(long, default_value_t = 30)]
    warning_lead_secs: u64,

    /// Maximum accepted extensions per session
    #[arg(long, default_value_t = 3)]
    max_extensions: u32,

    /// Maximum concurrent connections
    #[arg(long, default_value_t = 10_000)]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let session = SessionConfig {
        session_duration: Duration::from_secs(args.session_duration_secs),
        warning_lead: Duration::from_secs(args.warning_lead_secs),
        max_extensions: args.max_extensions,
    };

    let config = ServerRuntimeConfig {
        bind_address: format!("{}:{}", args.host, args.port),
        driver: DriverConfig { max_connections: args.max_connections, session },
        ..Default::default()
    };

    tracing::info!(
        bind = %config.bind_address,
        session_secs = args.session_duration_secs,
        warning_secs = args.warning_lead_secs,
        max_extensions = args.max_extensions,
        "hushline relay starting"
    );

    let server = Server::bind(config).await?;
    server.run().await?;

    Ok(())
}
