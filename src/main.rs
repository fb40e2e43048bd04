//! # kiki
//!
//! Relay server binary: loads settings, installs logging and metrics, and
//! serves until Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use kiki_server::settings::{Settings, load_settings, load_settings_from_path};
use kiki_server::{RelayServer, logging, metrics};
use tracing::info;

/// Time allowed for open connections to close after Ctrl-C.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Real-time message relay server.
#[derive(Parser, Debug)]
#[command(name = "kiki", version, about = "Real-time message relay server")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Settings file (default `~/.kiki/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log filter when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn load(&self) -> Result<Settings> {
        let mut settings = match &self.config {
            Some(path) => load_settings_from_path(path)
                .with_context(|| format!("Failed to load settings from {}", path.display()))?,
            None => load_settings().context("Failed to load settings")?,
        };
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.log_level.clone_from(level);
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.load()?;

    logging::init_subscriber(&settings.log_level);
    let metrics_handle = metrics::install_recorder().context("Failed to install metrics")?;

    let server = RelayServer::new(settings.server).with_metrics(metrics_handle);
    let (addr, handle) = server.listen().await.context("Failed to start server")?;
    info!(%addr, "kiki ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutdown requested");

    server
        .shutdown()
        .graceful_shutdown(vec![handle], Some(SHUTDOWN_TIMEOUT))
        .await;
    info!("kiki stopped");
    Ok(())
}
