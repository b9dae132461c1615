// =============================================================================
// hldesk — Main Entry Point
// =============================================================================
//
// Funding-rate aggregation backend: polls one primary venue (Hyperliquid)
// and three CEXes, computes cross-venue spreads, and drives the paper
// trading and AI trader simulations over the resulting stream.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod aggregator;
mod ai;
mod analytics;
mod api;
mod app_state;
mod paper;
mod poll_loop;
mod rate_cache;
mod sampler;
mod store;
mod types;
mod valuation;
mod venues;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;

/// Cadence of the equity snapshot sampler.
const SNAPSHOT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & logging ─────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        hldesk backend — Starting Up                     ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::from_env());
    info!(
        store = state.store.is_some(),
        paper = state.paper_engine.is_some(),
        ai = state.ai_engine.is_some(),
        "subsystems wired"
    );

    // ── 3. Poll loop (30s: aggregate → cache → writer + paper engine) ────
    let poll_state = state.clone();
    tokio::spawn(async move {
        poll_loop::run(poll_state).await;
    });

    // ── 4. Hourly equity snapshot sampler ────────────────────────────────
    let sampler_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SNAPSHOT_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so the cache has data.
        interval.tick().await;
        loop {
            interval.tick().await;
            let Some(store) = sampler_state.store.clone().filter(|s| !s.read_only()) else {
                continue;
            };
            let agg = sampler_state.cache.get().await;
            if let Err(e) = sampler::run_snapshot_job(&store, &agg).await {
                error!(error = %e, "hourly snapshot job failed");
            }
        }
    });

    // ── 5. HTTP server ───────────────────────────────────────────────────
    let port = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse::<u16>().ok())
        .unwrap_or(3001);
    let bind_addr = format!("0.0.0.0:{port}");

    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "API server listening");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping");
    info!("hldesk backend shut down complete.");
    Ok(())
}
