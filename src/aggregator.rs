// =============================================================================
// Aggregator — concurrent venue fan-out + cross-venue spread construction
// =============================================================================
//
// All adapters run concurrently and the aggregator waits for every one to
// settle; there is no short-circuit. A failing CEX contributes nothing and
// the rest of the data is used. A failing primary yields an empty result so
// the poll loop keeps running.
//
// Spread convention: for each asset listed on the primary venue, `best_cex`
// is the CEX whose rate has the largest absolute value, and
// `max_spread = primary.rate_8h - best_cex.rate_8h`.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tracing::{error, info, warn};

use crate::types::{now_ms, AggregatedResult, FundingRate, FundingSpread, Venue};
use crate::venues::{
    BinanceAdapter, BybitAdapter, HyperliquidAdapter, OkxAdapter, VenueAdapter,
};

pub struct Aggregator {
    primary: Arc<dyn VenueAdapter>,
    cex: Vec<Arc<dyn VenueAdapter>>,
}

impl Aggregator {
    /// Build the production adapter set: Hyperliquid primary plus the
    /// Binance / Bybit / OKX CEX trio.
    pub fn new() -> Self {
        Self {
            primary: Arc::new(HyperliquidAdapter::new()),
            cex: vec![
                Arc::new(BinanceAdapter::new()),
                Arc::new(BybitAdapter::new()),
                Arc::new(OkxAdapter::new()),
            ],
        }
    }

    /// Poll every venue once and merge the results.
    pub async fn aggregate(&self) -> AggregatedResult {
        let primary_fut = self.primary.fetch();
        let cex_fut = join_all(self.cex.iter().map(|adapter| {
            let adapter = adapter.clone();
            async move { (adapter.venue(), adapter.fetch().await) }
        }));

        let (primary_result, cex_results) = tokio::join!(primary_fut, cex_fut);

        let primary_rates = match primary_result {
            Ok(rates) => rates,
            Err(e) => {
                error!(error = %e, "primary venue fetch failed; returning empty aggregate");
                return AggregatedResult::empty(now_ms());
            }
        };

        let mut cex_lists: Vec<Vec<FundingRate>> = Vec::with_capacity(self.cex.len());
        for (venue, result) in cex_results {
            match result {
                Ok(rates) => cex_lists.push(rates),
                Err(e) => {
                    warn!(venue = %venue, error = %e, "cex fetch failed; contributing no data");
                    cex_lists.push(Vec::new());
                }
            }
        }

        let result = merge(primary_rates, cex_lists);
        info!(
            spreads = result.spreads.len(),
            rates = result.all_rates.len(),
            "aggregation complete"
        );
        result
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Merge one primary rate list with any number of CEX lists into the final
/// aggregate. Pure so the spread math is testable without the network.
pub fn merge(primary_rates: Vec<FundingRate>, cex_lists: Vec<Vec<FundingRate>>) -> AggregatedResult {
    // Index CEX rates by (venue, asset) for O(1) lookups per primary asset.
    let mut by_venue: HashMap<Venue, HashMap<String, FundingRate>> = HashMap::new();
    for list in &cex_lists {
        for rate in list {
            by_venue
                .entry(rate.venue)
                .or_default()
                .insert(rate.asset.clone(), rate.clone());
        }
    }

    let mut spreads: Vec<FundingSpread> = primary_rates
        .iter()
        .map(|primary| {
            let mut cex_rates = HashMap::new();
            for venue in Venue::CEX {
                if let Some(rate) = by_venue.get(&venue).and_then(|m| m.get(&primary.asset)) {
                    cex_rates.insert(venue, rate.clone());
                }
            }

            let best = cex_rates
                .values()
                .max_by(|a, b| {
                    a.rate_8h
                        .abs()
                        .partial_cmp(&b.rate_8h.abs())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .cloned();

            let (best_cex, best_cex_rate, max_spread) = match best {
                Some(rate) => (
                    Some(rate.venue),
                    rate.rate_8h,
                    primary.rate_8h - rate.rate_8h,
                ),
                None => (None, 0.0, 0.0),
            };

            FundingSpread {
                asset: primary.asset.clone(),
                primary: primary.clone(),
                cex_rates,
                best_cex,
                best_cex_rate,
                max_spread,
            }
        })
        .collect();

    spreads.sort_by(|a, b| {
        b.max_spread
            .abs()
            .partial_cmp(&a.max_spread.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut all_rates = primary_rates;
    for list in cex_lists {
        all_rates.extend(list);
    }

    AggregatedResult {
        spreads,
        all_rates,
        timestamp: now_ms(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rate(asset: &str, venue: Venue, rate_8h: f64) -> FundingRate {
        FundingRate {
            asset: asset.to_string(),
            venue,
            rate_8h,
            rate_raw: rate_8h,
            next_funding_time: 0,
            open_interest: None,
            mark_price: None,
            change_24h: None,
            volume_24h: None,
            observed_at: 0,
        }
    }

    #[test]
    fn best_cex_has_largest_absolute_rate() {
        // Primary HYPE +0.006 vs Bybit +0.0001 and OKX -0.005: OKX wins on
        // absolute value and the spread crosses the sign.
        let result = merge(
            vec![rate("HYPE", Venue::Hyperliquid, 0.006)],
            vec![
                vec![rate("HYPE", Venue::Bybit, 0.0001)],
                vec![rate("HYPE", Venue::Okx, -0.005)],
            ],
        );

        let spread = &result.spreads[0];
        assert_eq!(spread.best_cex, Some(Venue::Okx));
        assert_eq!(spread.best_cex_rate, -0.005);
        assert!((spread.max_spread - 0.011).abs() < 1e-12);
    }

    #[test]
    fn asset_missing_on_cex_yields_none() {
        let result = merge(
            vec![rate("FARTCOIN", Venue::Hyperliquid, 0.002)],
            vec![vec![rate("BTC", Venue::Binance, 0.0001)]],
        );

        let spread = &result.spreads[0];
        assert_eq!(spread.best_cex, None);
        assert_eq!(spread.best_cex_rate, 0.0);
        assert_eq!(spread.max_spread, 0.0);
        assert!(spread.cex_rates.is_empty());
    }

    #[test]
    fn spreads_sorted_by_absolute_spread_descending() {
        let result = merge(
            vec![
                rate("A", Venue::Hyperliquid, 0.001),
                rate("B", Venue::Hyperliquid, -0.009),
                rate("C", Venue::Hyperliquid, 0.004),
            ],
            vec![vec![
                rate("A", Venue::Binance, 0.0005),
                rate("B", Venue::Binance, 0.0001),
                rate("C", Venue::Binance, -0.0002),
            ]],
        );

        let order: Vec<&str> = result.spreads.iter().map(|s| s.asset.as_str()).collect();
        assert_eq!(order, vec!["B", "C", "A"]);
    }

    #[test]
    fn spreads_exist_only_for_primary_assets() {
        let result = merge(
            vec![rate("BTC", Venue::Hyperliquid, 0.0004)],
            vec![vec![
                rate("BTC", Venue::Binance, 0.0001),
                rate("DOGE", Venue::Binance, 0.03),
            ]],
        );

        assert_eq!(result.spreads.len(), 1);
        assert_eq!(result.spreads[0].asset, "BTC");
        // DOGE still appears in the concatenated rate list.
        assert_eq!(result.all_rates.len(), 3);
    }

    #[test]
    fn all_rates_concatenates_every_venue() {
        let result = merge(
            vec![rate("BTC", Venue::Hyperliquid, 0.0004)],
            vec![
                vec![rate("BTC", Venue::Binance, 0.0001)],
                vec![rate("BTC", Venue::Bybit, 0.0002)],
                Vec::new(),
            ],
        );
        assert_eq!(result.all_rates.len(), 3);
    }
}
