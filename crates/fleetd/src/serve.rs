//! `fleetd serve`: simulator plus REST API until Ctrl-C.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{info, warn};

use fleetshift_api::{build_router, ApiState};

use crate::{join_task, seed};

pub async fn run(config_path: &Path, listen: Option<String>) -> anyhow::Result<()> {
    info!("fleetd starting");

    // ── Initialize subsystems ──────────────────────────────────

    let seeded = seed::load(config_path)?;
    let listen = listen.unwrap_or_else(|| seeded.config.server.listen.clone());
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid listen address {listen}"))?;

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // ── Start background tasks ─────────────────────────────────

    let sim_handle = seeded.sim.clone().spawn(shutdown_rx);
    info!(tick_ms = seeded.config.simulator.tick_ms, "cluster simulator started");

    // ── Start API server ───────────────────────────────────────

    let state = ApiState::new(Arc::new(seeded.cluster.clone()), seeded.config.rollout.clone());
    let router = build_router(state);

    info!(%addr, "API server starting");
    let listener = tokio::net::TcpListener::bind(addr).await?;

    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for Ctrl-C");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    join_task(sim_handle, "cluster simulator").await;
    info!("fleetd stopped");
    Ok(())
}
