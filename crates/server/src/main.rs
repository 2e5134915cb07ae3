//! gridvoice server entry point

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;

use gridvoice_core::constants::net::{DEFAULT_HOST, DEFAULT_PORT};
use gridvoice_server::levels::LevelRegistry;
use gridvoice_server::session;
use gridvoice_server::state::ServerState;
use gridvoice_server::storage::IdentityStore;
use gridvoice_server::{renegotiate, routing};
use gridvoice_transport::RtcConfig;

#[derive(Parser)]
#[command(name = "gridvoice-server", about = "Spatial voice server for a 2D ASCII world")]
struct Cli {
    /// Host to bind the signalling listener to
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Port to bind the signalling listener to
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Directory containing one subdirectory per level
    #[arg(long, default_value = "./levels")]
    levels_dir: PathBuf,

    /// Directory for player identities and state
    #[arg(long, default_value = "./data")]
    data_dir: PathBuf,

    /// Additional STUN/TURN server URL (repeatable)
    #[arg(long = "ice-server")]
    ice_servers: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    tracing::info!("starting gridvoice server v{}", env!("CARGO_PKG_VERSION"));

    let levels = LevelRegistry::load(&cli.levels_dir)
        .with_context(|| format!("loading levels from {}", cli.levels_dir.display()))?;
    let store = IdentityStore::open(&cli.data_dir)
        .with_context(|| format!("opening data directory {}", cli.data_dir.display()))?;

    let mut rtc = RtcConfig::default();
    if !cli.ice_servers.is_empty() {
        rtc.ice_servers = cli.ice_servers.clone();
    }

    let state = ServerState::new(levels, store, rtc).context("initialising server state")?;

    let routing_loop = routing::spawn_loop(state.clone());
    let renegotiation_loop = renegotiate::spawn_loop(state.clone());

    let listener = TcpListener::bind((cli.host.as_str(), cli.port))
        .await
        .with_context(|| format!("binding {}:{}", cli.host, cli.port))?;
    tracing::info!(host = %cli.host, port = cli.port, "listening");

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, addr)) => {
                        tracing::debug!(%addr, "connection accepted");
                        tokio::spawn(session::handle_connection(state.clone(), socket));
                    }
                    Err(e) => tracing::warn!(error = %e, "accept failed"),
                }
            }
            _ = shutdown_signal() => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    routing_loop.abort();
    renegotiation_loop.abort();
    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gridvoice=info".into());
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
