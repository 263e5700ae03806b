//! ferryd — Ferry file server daemon.
//!
//! Binds the configured UDP address and serves one stop-and-wait delivery
//! session per requesting peer out of the served root directory.

use anyhow::{Context, Result};
use tokio::net::UdpSocket;

use ferry_core::config::FerryConfig;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    if let Err(e) = FerryConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = FerryConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        FerryConfig::default()
    });
    config.validate().context("invalid configuration")?;

    std::fs::create_dir_all(&config.server.root_path).with_context(|| {
        format!(
            "cannot create served root {}",
            config.server.root_path.display()
        )
    })?;

    let socket = UdpSocket::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.server.listen_addr))?;

    ferry_session::serve(socket, config).await
}
