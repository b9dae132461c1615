// =============================================================================
// Paper-Trading Engine — per-portfolio state machine
// =============================================================================
//
// Runs every active portfolio exactly once per poll cycle, in three
// sequential phases against a single aggregate snapshot:
//
//   1. Funding accrual — whole elapsed hours, sub-hour residual preserved
//   2. Exits           — stop-loss first, then the strategy rule
//   3. Entries         — strategy candidates under size/count/cash gates
//
// The in-memory cash balance is the source of truth for the cycle and is
// persisted once at the end. A failure inside one portfolio is logged and
// the engine continues with the next.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::strategy::{select_candidates, should_exit, Strategy, StrategyConfig};
use crate::store::models::{Portfolio, Position, Transaction, TransactionType};
use crate::store::Store;
use crate::types::AggregatedResult;

/// Taker fee charged on both entry and exit, as a fraction of notional.
pub const FEE_RATE: f64 = 0.0005;

/// Smallest notional worth opening.
pub const MIN_POSITION_SIZE: f64 = 100.0;

// =============================================================================
// Pure accounting
// =============================================================================

/// Signed price move as a fraction of entry: positive when the position is
/// in profit. `sign` is +1 for shorts, -1 for longs. Used for both stop-loss
/// checks and close accounting, in both engines.
pub fn price_pct(sign: f64, entry_price: f64, mark: f64) -> f64 {
    sign * (entry_price - mark) / entry_price
}

/// Outcome of one funding accrual step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FundingAccrual {
    pub earned: f64,
    pub hours: i64,
    pub advanced_to: DateTime<Utc>,
}

/// Accrue funding for the whole hours elapsed since `last_funding_at`.
///
/// Advances by exactly `hours` so any sub-hour remainder carries into the
/// next cycle. Returns `None` when less than a full hour has elapsed.
pub fn accrue_funding(
    size_usd: f64,
    sign: f64,
    rate_8h: f64,
    last_funding_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Option<FundingAccrual> {
    let hours = (now - last_funding_at).num_hours();
    if hours <= 0 {
        return None;
    }
    let hourly_rate = rate_8h / 8.0;
    let earned = size_usd * hourly_rate * hours as f64 * sign;
    Some(FundingAccrual {
        earned,
        hours,
        advanced_to: last_funding_at + Duration::hours(hours),
    })
}

/// Everything a close changes, computed up-front.
///
/// Funding was already credited to cash hour-by-hour in phase 1, so the cash
/// credit excludes it while the reported realized P&L includes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CloseOutcome {
    pub price_return: f64,
    pub exit_fee: f64,
    pub realized_pnl: f64,
    pub cash_credit: f64,
}

pub fn close_outcome(
    sign: f64,
    entry_price: f64,
    mark: f64,
    size_usd: f64,
    total_funding_collected: f64,
) -> CloseOutcome {
    let price_return = price_pct(sign, entry_price, mark) * size_usd;
    let exit_fee = size_usd * FEE_RATE;
    CloseOutcome {
        price_return,
        exit_fee,
        realized_pnl: price_return + total_funding_collected - exit_fee,
        cash_credit: size_usd + price_return - exit_fee,
    }
}

/// Why a position leaves the book this cycle, if at all. The stop-loss is
/// checked first: when both it and the strategy rule hold on the same
/// cycle, the recorded reason is `stop_loss`.
pub fn exit_reason(
    strategy: Strategy,
    cfg: &StrategyConfig,
    pos: &Position,
    mark: f64,
    spread: &crate::types::FundingSpread,
) -> Option<&'static str> {
    if price_pct(pos.side.sign(), pos.entry_price, mark) < -cfg.stop_loss_pct {
        return Some("stop_loss");
    }
    if should_exit(strategy, cfg, pos.side, spread) {
        return Some("strategy_exit");
    }
    None
}

/// Size a new entry against the per-position cap and remaining cash.
/// Returns `(size, fee)`, or `None` when the affordable size is below the
/// minimum or cash cannot cover size plus fee.
pub fn entry_size(max_position_size: f64, cash_balance: f64) -> Option<(f64, f64)> {
    let size = max_position_size.min(cash_balance - max_position_size * FEE_RATE);
    if size < MIN_POSITION_SIZE {
        return None;
    }
    let fee = size * FEE_RATE;
    if cash_balance < size + fee {
        return None;
    }
    Some((size, fee))
}

// =============================================================================
// Engine
// =============================================================================

pub struct PaperTradingEngine {
    store: Arc<Store>,
}

impl PaperTradingEngine {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Drive every active portfolio once against `agg`.
    pub async fn run_all(&self, agg: &AggregatedResult) {
        if agg.spreads.is_empty() {
            warn!("empty aggregate; skipping paper cycle");
            return;
        }

        let portfolios = match self.store.active_portfolios().await {
            Ok(p) => p,
            Err(e) => {
                error!(error = %e, "failed to load active portfolios");
                return;
            }
        };

        for portfolio in &portfolios {
            if let Err(e) = self.run_cycle(portfolio, agg).await {
                error!(
                    portfolio = %portfolio.id,
                    strategy = %portfolio.strategy_name,
                    error = %e,
                    "paper cycle failed; continuing with next portfolio"
                );
            }
        }
    }

    /// One full cycle for one portfolio.
    pub async fn run_cycle(&self, portfolio: &Portfolio, agg: &AggregatedResult) -> Result<()> {
        let Some(strategy) = Strategy::parse(&portfolio.strategy_name) else {
            warn!(
                portfolio = %portfolio.id,
                strategy = %portfolio.strategy_name,
                "unknown strategy; skipping portfolio"
            );
            return Ok(());
        };
        let cfg = StrategyConfig::parse(strategy, &portfolio.strategy_config);
        let now = Utc::now();

        let mut cash = portfolio.cash_balance;
        let mut positions = self.store.open_positions(&portfolio.id).await?;

        // ── Phase 1: funding accrual ─────────────────────────────────────
        for pos in positions.iter_mut() {
            let Some(spread) = agg.spread_for(&pos.asset) else {
                continue;
            };
            let Some(accrual) = accrue_funding(
                pos.size_usd,
                pos.side.sign(),
                spread.primary.rate_8h,
                pos.last_funding_at,
                now,
            ) else {
                continue;
            };

            pos.total_funding_collected += accrual.earned;
            pos.last_funding_at = accrual.advanced_to;
            self.store
                .update_position_funding(&pos.id, pos.total_funding_collected, pos.last_funding_at)
                .await?;
            self.store
                .insert_transaction(&Transaction {
                    id: Uuid::new_v4().to_string(),
                    portfolio_id: portfolio.id.clone(),
                    position_id: Some(pos.id.clone()),
                    tx_type: TransactionType::Funding,
                    asset: pos.asset.clone(),
                    amount: accrual.earned,
                    description: format!(
                        "funding {}h on {} {} @ {:.6}/8h",
                        accrual.hours, pos.side, pos.asset, spread.primary.rate_8h
                    ),
                    created_at: now,
                })
                .await?;
            cash += accrual.earned;

            info!(
                portfolio = %portfolio.id,
                asset = %pos.asset,
                hours = accrual.hours,
                earned = accrual.earned,
                "funding accrued"
            );
        }

        // ── Phase 2: exits ───────────────────────────────────────────────
        let mut remaining: Vec<Position> = Vec::with_capacity(positions.len());
        for pos in positions {
            let Some(spread) = agg.spread_for(&pos.asset) else {
                remaining.push(pos);
                continue;
            };
            let Some(mark) = spread.primary.mark_price.filter(|m| *m > 0.0) else {
                remaining.push(pos);
                continue;
            };

            let Some(reason) = exit_reason(strategy, &cfg, &pos, mark, spread) else {
                remaining.push(pos);
                continue;
            };

            let outcome = close_outcome(
                pos.side.sign(),
                pos.entry_price,
                mark,
                pos.size_usd,
                pos.total_funding_collected,
            );
            self.store
                .close_position(
                    &pos.id,
                    mark,
                    outcome.realized_pnl,
                    pos.fees_paid + outcome.exit_fee,
                    now,
                )
                .await?;
            self.store
                .insert_transaction(&Transaction {
                    id: Uuid::new_v4().to_string(),
                    portfolio_id: portfolio.id.clone(),
                    position_id: Some(pos.id.clone()),
                    tx_type: TransactionType::Close,
                    asset: pos.asset.clone(),
                    amount: outcome.cash_credit,
                    description: format!(
                        "close {} {} @ {} ({})",
                        pos.side, pos.asset, mark, reason
                    ),
                    created_at: now,
                })
                .await?;
            cash += outcome.cash_credit;

            info!(
                portfolio = %portfolio.id,
                asset = %pos.asset,
                reason,
                realized_pnl = outcome.realized_pnl,
                "position closed"
            );
        }

        // ── Phase 3: entries ─────────────────────────────────────────────
        let total_value: f64 = cash + remaining.iter().map(|p| p.size_usd).sum::<f64>();
        let max_position_size = total_value * cfg.max_position_size_pct;

        if remaining.len() < cfg.max_positions && cash >= max_position_size * 0.5 {
            let mut open_assets: HashSet<String> =
                remaining.iter().map(|p| p.asset.clone()).collect();
            let mut open_count = remaining.len();

            for (spread, side) in select_candidates(strategy, &cfg, &agg.spreads) {
                if open_count >= cfg.max_positions {
                    break;
                }
                if open_assets.contains(&spread.asset) {
                    continue;
                }
                let Some(mark) = spread.primary.mark_price.filter(|m| *m > 0.0) else {
                    continue;
                };
                // Cash only shrinks inside the loop, so a failed sizing check
                // ends the entry phase.
                let Some((size, fee)) = entry_size(max_position_size, cash) else {
                    break;
                };

                let position = Position {
                    id: Uuid::new_v4().to_string(),
                    portfolio_id: portfolio.id.clone(),
                    asset: spread.asset.clone(),
                    side,
                    size_usd: size,
                    entry_rate_8h: spread.primary.rate_8h,
                    entry_spread: spread.max_spread,
                    entry_price: mark,
                    total_funding_collected: 0.0,
                    last_funding_at: now,
                    opened_at: now,
                    is_open: true,
                    exit_price: None,
                    realized_pnl: None,
                    closed_at: None,
                    fees_paid: fee,
                };
                self.store.insert_position(&position).await?;
                self.store
                    .insert_transaction(&Transaction {
                        id: Uuid::new_v4().to_string(),
                        portfolio_id: portfolio.id.clone(),
                        position_id: Some(position.id.clone()),
                        tx_type: TransactionType::Open,
                        asset: spread.asset.clone(),
                        amount: -size,
                        description: format!("open {} {} @ {}", side, spread.asset, mark),
                        created_at: now,
                    })
                    .await?;
                self.store
                    .insert_transaction(&Transaction {
                        id: Uuid::new_v4().to_string(),
                        portfolio_id: portfolio.id.clone(),
                        position_id: Some(position.id.clone()),
                        tx_type: TransactionType::Fee,
                        asset: spread.asset.clone(),
                        amount: -fee,
                        description: format!("entry fee {} {}", side, spread.asset),
                        created_at: now,
                    })
                    .await?;

                cash -= size + fee;
                open_assets.insert(spread.asset.clone());
                open_count += 1;

                info!(
                    portfolio = %portfolio.id,
                    asset = %spread.asset,
                    side = %side,
                    size,
                    entry_price = mark,
                    "position opened"
                );
            }
        }

        self.store
            .update_portfolio_cash(&portfolio.id, cash)
            .await?;
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn funding_accrues_whole_hours_and_keeps_residual() {
        // 2h30m elapsed at rate_8h = 0.0008 on a 10_000 short:
        // hourly = 0.0001, earned = 10000 * 0.0001 * 2 = 2.00.
        let now = Utc::now();
        let last = now - Duration::minutes(150);
        let accrual =
            accrue_funding(10_000.0, 1.0, 0.0008, last, now).unwrap();

        assert_eq!(accrual.hours, 2);
        assert!((accrual.earned - 2.0).abs() < EPS);
        // Advanced by exactly 2h: the 30m residual survives.
        assert_eq!(accrual.advanced_to, last + Duration::hours(2));
        assert_eq!(now - accrual.advanced_to, Duration::minutes(30));
    }

    #[test]
    fn funding_skips_under_one_hour() {
        let now = Utc::now();
        let last = now - Duration::minutes(59);
        assert!(accrue_funding(10_000.0, 1.0, 0.0008, last, now).is_none());
    }

    #[test]
    fn funding_sign_flips_for_longs() {
        let now = Utc::now();
        let last = now - Duration::hours(1);
        let short = accrue_funding(1000.0, 1.0, 0.0008, last, now).unwrap();
        let long = accrue_funding(1000.0, -1.0, 0.0008, last, now).unwrap();
        assert!(short.earned > 0.0);
        assert!((short.earned + long.earned).abs() < EPS);
    }

    #[test]
    fn second_accrual_against_same_clock_is_idempotent() {
        let now = Utc::now();
        let last = now - Duration::minutes(150);
        let first = accrue_funding(10_000.0, 1.0, 0.0008, last, now).unwrap();
        // Re-running with the advanced watermark and an unchanged clock
        // accrues nothing.
        assert!(accrue_funding(10_000.0, 1.0, 0.0008, first.advanced_to, now).is_none());
    }

    #[test]
    fn stop_loss_price_pct_is_signed_per_side() {
        // Long SOL entered at 100, mark 80: -20%, breaches a 15% stop.
        let pct = price_pct(-1.0, 100.0, 80.0);
        assert!((pct + 0.20).abs() < EPS);
        assert!(pct < -0.15);

        // The same move is +20% for a short.
        let pct = price_pct(1.0, 100.0, 80.0);
        assert!((pct - 0.20).abs() < EPS);
    }

    #[test]
    fn stop_loss_wins_when_strategy_exit_also_holds() {
        use crate::store::models::PositionSide;
        use crate::types::{FundingRate, FundingSpread, Venue};
        use std::collections::HashMap;

        let cfg = StrategyConfig::parse(Strategy::Aggressive, &serde_json::json!({}));
        let pos = Position {
            id: "p1".to_string(),
            portfolio_id: "pf1".to_string(),
            asset: "SOL".to_string(),
            side: PositionSide::LongPerp,
            size_usd: 1_000.0,
            entry_rate_8h: 0.001,
            entry_spread: 0.05,
            entry_price: 100.0,
            total_funding_collected: 0.0,
            last_funding_at: Utc::now(),
            opened_at: Utc::now(),
            is_open: true,
            exit_price: None,
            realized_pnl: None,
            closed_at: None,
            fees_paid: 0.5,
        };
        // Spread has collapsed (strategy exit holds) AND price is down 20%
        // (stop-loss holds): the stop-loss reason must be recorded.
        let spread = FundingSpread {
            asset: "SOL".to_string(),
            primary: FundingRate {
                asset: "SOL".to_string(),
                venue: Venue::Hyperliquid,
                rate_8h: 0.001,
                rate_raw: 0.000125,
                next_funding_time: 0,
                open_interest: None,
                mark_price: Some(80.0),
                change_24h: None,
                volume_24h: None,
                observed_at: 0,
            },
            cex_rates: HashMap::new(),
            best_cex: None,
            best_cex_rate: 0.0,
            max_spread: 0.001,
        };
        assert_eq!(
            exit_reason(Strategy::Aggressive, &cfg, &pos, 80.0, &spread),
            Some("stop_loss")
        );
        // With the price back at entry only the strategy rule fires.
        assert_eq!(
            exit_reason(Strategy::Aggressive, &cfg, &pos, 100.0, &spread),
            Some("strategy_exit")
        );
    }

    #[test]
    fn close_outcome_excludes_funding_from_cash_credit() {
        // Short 10_000 at 100, mark unchanged, 5.0 funding collected.
        let outcome = close_outcome(1.0, 100.0, 100.0, 10_000.0, 5.0);
        assert!((outcome.price_return).abs() < EPS);
        assert!((outcome.exit_fee - 5.0).abs() < EPS);
        // Realized P&L reports the funding...
        assert!((outcome.realized_pnl - 0.0).abs() < EPS);
        // ...but the cash credit does not re-pay it.
        assert!((outcome.cash_credit - 9_995.0).abs() < EPS);
    }

    #[test]
    fn close_outcome_short_profits_from_price_drop() {
        let outcome = close_outcome(1.0, 100.0, 90.0, 1_000.0, 0.0);
        assert!((outcome.price_return - 100.0).abs() < EPS);
        assert!((outcome.realized_pnl - 99.5).abs() < EPS);
        assert!((outcome.cash_credit - 1_099.5).abs() < EPS);
    }

    #[test]
    fn entry_sizing_gates() {
        // cash=5000, total=5000, cap = 1000: full-size entry fits.
        let (size, fee) = entry_size(1_000.0, 5_000.0).unwrap();
        assert!((size - 1_000.0).abs() < EPS);
        assert!((fee - 0.5).abs() < EPS);

        // Nearly broke: affordable size under the minimum.
        assert!(entry_size(1_000.0, 60.0).is_none());
    }

    #[test]
    fn entry_cash_flow_matches_expected_balance() {
        // The aggressive scenario: cash 5000, cap 1000.
        let cash = 5_000.0_f64;
        let (size, fee) = entry_size(1_000.0, cash).unwrap();
        let after = cash - size - fee;
        assert!((after - 3_999.5).abs() < EPS);
    }

    #[test]
    fn accrue_then_close_keeps_cash_identity() {
        // Open a 10_000 short at 100 with 2h funding then a flat close: total
        // cash received must be funding + size - exit fee, with no funding
        // double-count on close.
        let now = Utc::now();
        let last = now - Duration::hours(2);
        let accrual =
            accrue_funding(10_000.0, 1.0, 0.0008, last, now).unwrap();
        let funding = accrual.earned;

        let outcome = close_outcome(1.0, 100.0, 100.0, 10_000.0, funding);
        let cash_in = funding + outcome.cash_credit;
        assert!((cash_in - (10_000.0 + funding - 5.0)).abs() < EPS);
        assert!((outcome.realized_pnl - (funding - 5.0)).abs() < EPS);
    }
}
