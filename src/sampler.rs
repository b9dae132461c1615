// =============================================================================
// Snapshot Sampler — hourly equity snapshots for portfolios and agents
// =============================================================================
//
// Triggered on an hourly cadence (and on demand via the internal endpoint).
// For every portfolio and every agent: mark-to-market the book against the
// current aggregate and append one equity snapshot row. Funding is already
// realized in cash; it is reported separately for attribution.

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::store::models::EquitySnapshot;
use crate::store::Store;
use crate::types::AggregatedResult;
use crate::valuation::{mark_to_market, OpenLeg};

/// Snapshot every portfolio and agent once. Returns the number of rows
/// written.
pub async fn run_snapshot_job(store: &Store, agg: &AggregatedResult) -> Result<usize> {
    let now = Utc::now();
    let mut written = 0usize;

    // ── Paper portfolios ─────────────────────────────────────────────────
    let portfolios = store.all_portfolios().await?;
    let mut rows = Vec::with_capacity(portfolios.len());
    for portfolio in &portfolios {
        let positions = match store.open_positions(&portfolio.id).await {
            Ok(p) => p,
            Err(e) => {
                warn!(portfolio = %portfolio.id, error = %e, "snapshot skipped");
                continue;
            }
        };
        let legs: Vec<OpenLeg> = positions.iter().map(Into::into).collect();
        let mtm = mark_to_market(portfolio.cash_balance, &legs, agg);
        rows.push(EquitySnapshot {
            owner_id: portfolio.id.clone(),
            snapshot_at: now,
            total_value: mtm.total_value,
            cash_balance: portfolio.cash_balance,
            unrealized_pnl: mtm.unrealized_pnl,
            funding_collected: mtm.funding_collected,
            open_positions: mtm.open_positions,
        });
    }
    written += rows.len();
    store.insert_snapshots("paper_snapshots", &rows).await?;

    // ── AI traders ───────────────────────────────────────────────────────
    let traders = store.traders().await?;
    let mut rows = Vec::with_capacity(traders.len());
    for trader in &traders {
        let positions = match store.open_ai_positions(&trader.id).await {
            Ok(p) => p,
            Err(e) => {
                warn!(trader = %trader.name, error = %e, "snapshot skipped");
                continue;
            }
        };
        let legs: Vec<OpenLeg> = positions.iter().map(Into::into).collect();
        let mtm = mark_to_market(trader.cash_balance, &legs, agg);
        rows.push(EquitySnapshot {
            owner_id: trader.id.clone(),
            snapshot_at: now,
            total_value: mtm.total_value,
            cash_balance: trader.cash_balance,
            unrealized_pnl: mtm.unrealized_pnl,
            funding_collected: mtm.funding_collected,
            open_positions: mtm.open_positions,
        });
    }
    written += rows.len();
    store.insert_snapshots("ai_snapshots", &rows).await?;

    info!(rows = written, "equity snapshots written");
    Ok(written)
}
