//! gridvoice client entry point
//!
//! Headless by default: it joins the world, keeps position and audio
//! routing alive, and logs what happens. Rendering and OS audio front-ends
//! build on the library instead.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use gridvoice_client::playback::NullSinkFactory;
use gridvoice_client::{identity, ClientConfig, ClientError, GameClient};
use gridvoice_core::constants::net::{DEFAULT_HOST, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "gridvoice-client", about = "Headless gridvoice client")]
struct Cli {
    /// Server host
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Server port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Player name
    #[arg(long)]
    name: String,

    /// Write logs to this file instead of stderr
    #[arg(long)]
    log: Option<PathBuf>,

    /// Use a bot identity under ~/.gridvoice/bots/<name>/ instead of the
    /// personal one
    #[arg(long)]
    bot: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_tracing(cli.log.as_deref()) {
        eprintln!("failed to set up logging: {e}");
        std::process::exit(1);
    }

    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<(), ClientError> {
    let identity_path = if cli.bot {
        identity::bot_identity_path(&cli.name)?
    } else {
        identity::default_identity_path()?
    };
    let keypair = identity::load_or_create(&identity_path)?;
    let cache_root = identity::app_dir()?.join("cache");

    let (client, handle) = GameClient::connect(ClientConfig {
        host: cli.host,
        port: cli.port,
        name: cli.name,
        identity: keypair,
        cache_root,
        sink_factory: Arc::new(NullSinkFactory),
        ice_servers: Vec::new(),
    })
    .await?;

    let quitter = handle.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, quitting");
            quitter.quit();
        }
    });

    client.run().await
}

fn init_tracing(log_file: Option<&std::path::Path>) -> std::io::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gridvoice=info".into());
    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(file)
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}
