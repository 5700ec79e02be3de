//! quic-exchange
//!
//! One request/response exchange over QUIC with TLS 1.3.
//!
//! # Architecture Overview
//!
//! ```text
//!     client                                           server
//!     ──────                                           ──────
//!     exchange::run_client                             exchange::Server::run
//!        │                                                │
//!        ▼                                                ▼
//!     net::Dialer ── handshake (TLS 1.3, ALPN) ──▶     net::Listener
//!        │                                                │
//!        ▼                                                ▼
//!     net::Stream ── payload + end-of-stream ───▶      Handler
//!        ◀────────── response + end-of-stream ────        │
//!        │                                                ▼
//!     Connection::close                            ConnectionTracker / drain
//!
//!     Cross-cutting: config (TOML), observability (tracing, metrics),
//!                    lifecycle (startup, signals, shutdown)
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use quic_exchange::config::{load_config, ExchangeConfig};
use quic_exchange::exchange::{run_client, ClientOptions, EchoHandler, Server, ServerOptions};
use quic_exchange::lifecycle::{signals, startup, Shutdown};
use quic_exchange::net::TransportSettings;
use quic_exchange::observability::logging::init_logging;
use quic_exchange::observability::metrics::init_metrics;

#[derive(Parser)]
#[command(name = "quic-exchange")]
#[command(about = "Request/response exchange over QUIC", long_about = None)]
struct Cli {
    /// TOML configuration file; every field has a default.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send the configured payload and print the response
    Client {
        server_address: Option<String>,
        ca_path: Option<String>,
    },
    /// Echo every request until interrupted
    Server {
        bind_address: Option<String>,
        cert_path: Option<String>,
        key_path: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ExchangeConfig::default(),
    };
    init_logging(&config.observability)?;

    tracing::info!("quic-exchange v{} starting", env!("CARGO_PKG_VERSION"));

    let settings = TransportSettings::from(&config.transport);
    match cli.command {
        Commands::Client {
            server_address,
            ca_path,
        } => {
            if let Some(address) = server_address {
                config.client.server_address = address;
            }
            if ca_path.is_some() {
                config.client.ca_path = ca_path;
            }

            let remote = startup::server_address(&config.client)?;
            let anchor = startup::load_trust_anchor(&config.client)?;
            let options = ClientOptions::from_config(&config.client, settings);

            let response = run_client(remote, &anchor, config.client.payload.as_bytes(), &options).await?;
            println!("{}", String::from_utf8_lossy(&response));
        }
        Commands::Server {
            bind_address,
            cert_path,
            key_path,
        } => {
            if let Some(address) = bind_address {
                config.listener.bind_address = address;
            }
            if cert_path.is_some() {
                config.listener.cert_path = cert_path;
            }
            if key_path.is_some() {
                config.listener.key_path = key_path;
            }

            let addr = startup::bind_address(&config.listener)?;
            let identity = startup::load_identity(&config.listener)?;
            let options = ServerOptions::from_config(&config.listener, settings);

            if config.observability.metrics_enabled {
                init_metrics(config.observability.metrics_address.parse()?)?;
            }

            let server = Server::bind(addr, &identity, options, EchoHandler)?;
            tracing::info!(
                address = %server.local_addr()?,
                max_connections = config.listener.max_connections,
                "Listening for connections"
            );

            let shutdown = Shutdown::new();
            let signal = shutdown.subscribe();
            signals::spawn_signal_handler(shutdown);
            server.run(signal).await;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
