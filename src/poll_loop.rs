// =============================================================================
// Poll Loop — fixed-interval market-to-simulation driver
// =============================================================================
//
// Every 30 seconds: aggregate all venues, push the result into the cache,
// then spawn the snapshot writer and the paper-trading run without awaiting
// either. The loop itself only ever waits on the aggregation; downstream
// errors are logged and the next tick proceeds regardless. A paper run
// still in flight causes the new run to be skipped (cycles for one
// portfolio are never concurrent), and missed ticks are coalesced.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::app_state::AppState;

pub const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

/// Run forever. The first tick fires immediately, which doubles as the
/// startup aggregation.
pub async fn run(state: Arc<AppState>) {
    info!(interval_s = POLL_INTERVAL.as_secs(), "poll loop starting");

    let mut interval = tokio::time::interval(POLL_INTERVAL);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;

        let agg = state.cache.refresh().await;

        // ── Snapshot writer: fire-and-forget ─────────────────────────────
        if let Some(store) = state.store.clone().filter(|s| !s.read_only()) {
            if !agg.all_rates.is_empty() {
                let rates = agg.all_rates.clone();
                tokio::spawn(async move {
                    if let Err(e) = store.save_rates(&rates).await {
                        error!(error = %e, "funding snapshot persistence failed");
                    }
                });
            }
        }

        // ── Paper trading: fire-and-forget, never overlapping ────────────
        if let Some(engine) = state.paper_engine.clone() {
            if state.trading_in_flight.swap(true, Ordering::SeqCst) {
                debug!("previous paper run still in flight; skipping this tick");
            } else {
                let state = state.clone();
                tokio::spawn(async move {
                    engine.run_all(&agg).await;
                    state.trading_in_flight.store(false, Ordering::SeqCst);
                });
            }
        }
    }
}
