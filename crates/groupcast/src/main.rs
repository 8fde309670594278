//! # groupcast
//!
//! Broker binary: loads settings, opens the membership store, and serves
//! the WebSocket endpoint until ctrl-c.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use groupcast_core::{InMemoryMembershipStore, MembershipStore};
use groupcast_settings::{GroupcastSettings, StoreBackend, StoreSettings};
use groupcast_store::{ConnectionConfig, SqliteMembershipStore};
use groupcast_server::{GroupcastServer, ServerConfig};

/// Group-scoped WebSocket broadcast broker.
#[derive(Parser, Debug)]
#[command(name = "groupcast", about = "Group-scoped WebSocket broadcast broker")]
struct Cli {
    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Membership store backend: `sqlite` or `memory`.
    #[arg(long, value_parser = parse_backend)]
    store: Option<StoreBackend>,

    /// Path to the `SQLite` membership database.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Default log filter when `RUST_LOG` is unset.
    #[arg(long)]
    log_level: Option<String>,

    /// Emit JSON log lines.
    #[arg(long)]
    log_json: bool,

    /// Settings file (default `~/.groupcast/settings.json`).
    #[arg(long)]
    settings: Option<PathBuf>,
}

impl Cli {
    /// Apply command-line flags on top of loaded settings.
    fn apply(&self, settings: &mut GroupcastSettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(backend) = self.store {
            settings.store.backend = backend;
        }
        if let Some(ref path) = self.db_path {
            settings.store.path = path.to_string_lossy().into_owned();
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

fn parse_backend(value: &str) -> std::result::Result<StoreBackend, String> {
    StoreBackend::parse(value).ok_or_else(|| format!("unknown store backend: {value}"))
}

/// Open the configured membership store.
fn open_store(settings: &StoreSettings) -> Result<Arc<dyn MembershipStore>> {
    match settings.backend {
        StoreBackend::Memory => {
            tracing::warn!("using in-memory membership store; memberships are lost on restart");
            Ok(Arc::new(InMemoryMembershipStore::new()))
        }
        StoreBackend::Sqlite => {
            let path = settings.resolved_path();
            let config = ConnectionConfig {
                pool_size: settings.pool_size,
                busy_timeout_ms: settings.busy_timeout_ms,
                ..ConnectionConfig::default()
            };
            let store = SqliteMembershipStore::file(&path, &config)
                .with_context(|| format!("Failed to open membership store: {}", path.display()))?;
            // Connection ids do not outlive the process that issued them.
            let _ = store.purge().context("Failed to purge stale memberships")?;
            tracing::info!(path = %path.display(), "membership store opened");
            Ok(Arc::new(store))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args
        .settings
        .clone()
        .unwrap_or_else(groupcast_settings::settings_path);
    let mut settings = groupcast_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings: {}", settings_path.display()))?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    groupcast_core::logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let metrics_handle = groupcast_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let store = open_store(&settings.store)?;

    let server = GroupcastServer::new(
        ServerConfig::from(&settings.server),
        store,
        Duration::from_millis(settings.fanout.push_timeout_ms),
        metrics_handle,
    );

    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("groupcast listening on ws://{addr}/ws");

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    tracing::info!("Shutting down...");
    server.shutdown().graceful_shutdown(vec![handle], None).await;

    tracing::info!("Shutdown complete");
    Ok(())
}
