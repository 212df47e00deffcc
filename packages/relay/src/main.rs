use anyhow::Context;
use clap::Parser;
use sheetsync_relay::{router, Hub};
use tracing_subscriber::EnvFilter;

/// SheetSync relay - fans sheet edits out to everyone in the room
#[derive(Parser, Debug)]
#[command(name = "sheetsync-relay")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address to bind
    #[arg(long, env = "SHEETSYNC_HOST", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "SHEETSYNC_PORT", default_value_t = 8080)]
    port: u16,

    /// Log filter, e.g. `info` or `sheetsync_relay=debug`
    #[arg(long, default_value = "info")]
    log: String,

    /// Frames buffered per room before slow members lag
    #[arg(long, default_value_t = sheetsync_relay::DEFAULT_CAPACITY)]
    capacity: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log))
        .context("Invalid log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let listener = tokio::net::TcpListener::bind((cli.host.as_str(), cli.port))
        .await
        .with_context(|| format!("Failed to bind {}:{}", cli.host, cli.port))?;
    tracing::info!(addr = %listener.local_addr()?, "Relay listening");

    axum::serve(listener, router(Hub::new(cli.capacity))).await?;
    Ok(())
}
