// =============================================================================
// Valuation — mark-to-market over open positions
// =============================================================================
//
// Both engines, the snapshot sampler, and the read API value a book the same
// way: each open leg is worth its notional plus the signed price move since
// entry, priced off the primary venue's current mark. Funding is already
// realized into cash and reported separately for attribution.

use crate::store::models::{AiPosition, Position};
use crate::types::AggregatedResult;

/// One open position reduced to what valuation needs.
#[derive(Debug, Clone)]
pub struct OpenLeg {
    pub asset: String,
    /// +1 short, -1 long.
    pub sign: f64,
    pub size_usd: f64,
    pub entry_price: f64,
    pub funding_collected: f64,
}

impl From<&Position> for OpenLeg {
    fn from(pos: &Position) -> Self {
        Self {
            asset: pos.asset.clone(),
            sign: pos.side.sign(),
            size_usd: pos.size_usd,
            entry_price: pos.entry_price,
            funding_collected: pos.total_funding_collected,
        }
    }
}

impl From<&AiPosition> for OpenLeg {
    fn from(pos: &AiPosition) -> Self {
        Self {
            asset: pos.asset.clone(),
            sign: pos.direction.sign(),
            size_usd: pos.size_usd,
            entry_price: pos.entry_price,
            funding_collected: pos.funding_collected,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MarkToMarket {
    /// cash + Σ (size + unrealized price P&L) over open legs.
    pub total_value: f64,
    pub unrealized_pnl: f64,
    pub funding_collected: f64,
    pub open_positions: i64,
}

/// Value a book against the current aggregate. A leg whose asset has no
/// usable mark right now is carried at entry (zero unrealized).
pub fn mark_to_market(cash_balance: f64, legs: &[OpenLeg], agg: &AggregatedResult) -> MarkToMarket {
    let mut total_value = cash_balance;
    let mut unrealized_pnl = 0.0;
    let mut funding_collected = 0.0;

    for leg in legs {
        let mark = agg
            .spread_for(&leg.asset)
            .and_then(|s| s.primary.mark_price)
            .filter(|m| *m > 0.0)
            .unwrap_or(leg.entry_price);
        let unrealized =
            leg.sign * (leg.entry_price - mark) / leg.entry_price * leg.size_usd;

        total_value += leg.size_usd + unrealized;
        unrealized_pnl += unrealized;
        funding_collected += leg.funding_collected;
    }

    MarkToMarket {
        total_value,
        unrealized_pnl,
        funding_collected,
        open_positions: legs.len() as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FundingRate, FundingSpread, Venue};
    use std::collections::HashMap;

    fn agg_with_mark(asset: &str, mark: f64) -> AggregatedResult {
        AggregatedResult {
            spreads: vec![FundingSpread {
                asset: asset.to_string(),
                primary: FundingRate {
                    asset: asset.to_string(),
                    venue: Venue::Hyperliquid,
                    rate_8h: 0.0004,
                    rate_raw: 0.00005,
                    next_funding_time: 0,
                    open_interest: None,
                    mark_price: Some(mark),
                    change_24h: None,
                    volume_24h: None,
                    observed_at: 0,
                },
                cex_rates: HashMap::new(),
                best_cex: None,
                best_cex_rate: 0.0,
                max_spread: 0.0,
            }],
            all_rates: Vec::new(),
            timestamp: 0,
        }
    }

    fn leg(asset: &str, sign: f64, size: f64, entry: f64, funding: f64) -> OpenLeg {
        OpenLeg {
            asset: asset.to_string(),
            sign,
            size_usd: size,
            entry_price: entry,
            funding_collected: funding,
        }
    }

    #[test]
    fn total_value_identity_holds() {
        // Short 1000 at 100, mark now 90: +100 unrealized.
        let agg = agg_with_mark("BTC", 90.0);
        let legs = vec![leg("BTC", 1.0, 1_000.0, 100.0, 3.0)];
        let mtm = mark_to_market(500.0, &legs, &agg);

        assert!((mtm.unrealized_pnl - 100.0).abs() < 1e-9);
        assert!((mtm.total_value - (500.0 + 1_000.0 + 100.0)).abs() < 1e-9);
        assert_eq!(mtm.funding_collected, 3.0);
        assert_eq!(mtm.open_positions, 1);
    }

    #[test]
    fn unknown_asset_carried_at_entry() {
        let agg = agg_with_mark("BTC", 90.0);
        let legs = vec![leg("DELISTED", -1.0, 2_000.0, 50.0, 0.0)];
        let mtm = mark_to_market(0.0, &legs, &agg);
        assert_eq!(mtm.unrealized_pnl, 0.0);
        assert!((mtm.total_value - 2_000.0).abs() < 1e-9);
    }

    #[test]
    fn empty_book_is_just_cash() {
        let agg = agg_with_mark("BTC", 90.0);
        let mtm = mark_to_market(1_234.5, &[], &agg);
        assert_eq!(mtm.total_value, 1_234.5);
        assert_eq!(mtm.open_positions, 0);
    }
}
