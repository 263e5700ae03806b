//! ferry-get — fetch one file from a ferryd server.
//!
//! Usage: ferry-get <filename> [server_addr]
//!
//! The server address falls back to the configured `client.server_addr`.
//! Exit status is zero only for a verified, persisted file.

use std::net::SocketAddr;

use anyhow::{Context, Result};

use ferry_core::config::FerryConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = FerryConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        FerryConfig::default()
    });
    config.validate().context("invalid configuration")?;

    let mut args = std::env::args().skip(1);
    let filename = args
        .next()
        .context("usage: ferry-get <filename> [server_addr]")?;
    let server_addr = args
        .next()
        .unwrap_or_else(|| config.client.server_addr.clone());
    let server: SocketAddr = server_addr
        .parse()
        .with_context(|| format!("invalid server address '{server_addr}'"))?;

    let path = ferry_session::download(
        server,
        &config.transfer,
        &filename,
        &config.client.output_dir,
    )
    .await
    .with_context(|| format!("download of '{filename}' from {server} failed"))?;

    println!("{}", path.display());
    Ok(())
}
