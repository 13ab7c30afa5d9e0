//! tungo: expose a local HTTP server through a tungo tunnel.
//!
//! Usage:
//!   tungo http <PORT>   Create an HTTP tunnel to 127.0.0.1:<PORT>

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tungo_client::{Events, Options, TunnelClient};

#[derive(Parser)]
#[command(name = "tungo")]
#[command(author = "Tungo Contributors")]
#[command(version)]
#[command(about = "Expose a local HTTP server through a tungo tunnel", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an HTTP tunnel to a local port
    Http {
        /// Local port to expose
        port: u16,

        /// Request a specific subdomain
        #[arg(short, long)]
        subdomain: Option<String>,

        /// Rendezvous server URL (overrides the configured default)
        #[arg(long)]
        server: Option<String>,

        /// Shared secret for authenticated tunnels
        #[arg(long, env = "TUNGO_SECRET")]
        secret: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_level = if cli.verbose { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{log_level},tungo_cli=info").into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    match cli.command {
        Commands::Http { port, subdomain, server, secret } => run_http(port, subdomain, server, secret, log_level).await,
    }
}

async fn run_http(
    port: u16,
    subdomain: Option<String>,
    server: Option<String>,
    secret: Option<String>,
    log_level: &str,
) -> Result<()> {
    let config = config::Config::load().unwrap_or_default();
    let server_url = server.unwrap_or(config.server_url);

    let mut builder = Options::builder(port).server_url(server_url).log_level(log_level);
    if let Some(subdomain) = subdomain {
        builder = builder.subdomain(subdomain);
    }
    if let Some(secret) = secret {
        builder = builder.secret_key(secret);
    }
    let options = builder.build().context("invalid tunnel configuration")?;

    let events = Events::builder()
        .on_connect(move |info| println!("tunnel live: {} -> 127.0.0.1:{port}", info.url))
        .on_disconnect(|reason| tracing::warn!(reason = %reason, "tunnel disconnected"))
        .on_reconnect(|attempt| tracing::info!(attempt, "reconnecting"))
        .on_status(|status| tracing::debug!(status, "status changed"))
        .on_error(|error| tracing::error!(error = %error, "tunnel error"))
        .build();

    let client = TunnelClient::new(options, events)?;
    client.start().await.context("failed to establish tunnel")?;

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    client.stop().await;
    Ok(())
}
