//! hdecd — bridge daemon for Heidelberg Energy Control wallboxes.
//!
//! Serves the go-e compatible HTTP API described in the crate docs. On
//! shutdown every wallbox's remote watchdog is disabled (best-effort) so the
//! boxes keep charging while the bridge is away.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use hdec_bridge::{config, http, Fleet};

#[derive(Debug, Parser)]
#[command(
    name = "hdecd",
    version,
    about = "Modbus RTU to go-e compatible HTTP bridge for Heidelberg Energy Control wallboxes"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "hdec-bridge.toml")]
    config: PathBuf,
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "cannot listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let cfg = config::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let _log_guard = config::init_logging(&cfg.logging)?;

    info!(
        device = %cfg.wallbox.device,
        instances = cfg.wallbox.instances,
        "starting wallbox bridge"
    );
    let fleet = Arc::new(Fleet::open(&cfg));
    let app = http::router(Arc::clone(&fleet), cfg.server.assets_dir.clone());

    let addr = format!("{}:{}", cfg.server.host, cfg.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, "listening; stop with ctrl-c");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    // Best-effort: leave no box waiting on a master that is gone.
    for client_id in fleet.client_ids() {
        let mut wallbox = fleet.adapter(client_id).lock().await;
        if !wallbox.set_watchdog_timeout(0).await {
            warn!(client_id, "could not disable remote watchdog at shutdown");
        }
    }
    info!("server stopped");
    Ok(())
}
