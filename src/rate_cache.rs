// =============================================================================
// Rate Cache — the only process-wide mutable state
// =============================================================================
//
// Holds the most recent aggregate behind an atomic pointer swap. Readers
// never block: `get` clones the Arc and only falls into a recompute when the
// cached value is older than the TTL. The recompute path is guarded by an
// async mutex so a burst of stale readers triggers exactly one refresh.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use tracing::debug;

use crate::aggregator::Aggregator;
use crate::types::{now_ms, AggregatedResult};

/// How long a cached aggregate stays fresh. Matches the poll interval, so
/// under a healthy poll loop `get` never recomputes.
pub const CACHE_TTL_MS: i64 = 30_000;

pub struct RateCache {
    aggregator: Aggregator,
    current: ArcSwap<AggregatedResult>,
    /// Wall-clock insertion time of `current`, epoch ms. 0 = never filled.
    last_fetch_ms: AtomicI64,
    refresh: tokio::sync::Mutex<()>,
}

impl RateCache {
    pub fn new(aggregator: Aggregator) -> Self {
        Self {
            aggregator,
            current: ArcSwap::from_pointee(AggregatedResult::empty(0)),
            last_fetch_ms: AtomicI64::new(0),
            refresh: tokio::sync::Mutex::new(()),
        }
    }

    /// Unconditional write from the poll loop.
    pub fn update(&self, result: AggregatedResult) {
        self.current.store(Arc::new(result));
        self.last_fetch_ms.store(now_ms(), Ordering::SeqCst);
    }

    /// Aggregate now and publish the result. The poll loop's per-tick path.
    pub async fn refresh(&self) -> Arc<AggregatedResult> {
        let result = self.aggregator.aggregate().await;
        self.update(result);
        self.current.load_full()
    }

    /// Return the cached aggregate, recomputing first if it is stale.
    pub async fn get(&self) -> Arc<AggregatedResult> {
        if self.age_ms() <= CACHE_TTL_MS {
            return self.current.load_full();
        }

        let _guard = self.refresh.lock().await;
        // A concurrent stale reader may have refreshed while we waited.
        if self.age_ms() <= CACHE_TTL_MS {
            return self.current.load_full();
        }

        debug!(age_ms = self.age_ms(), "rate cache stale; recomputing");
        let result = self.aggregator.aggregate().await;
        self.update(result);
        self.current.load_full()
    }

    /// Age of the cached value in milliseconds.
    pub fn age_ms(&self) -> i64 {
        let last = self.last_fetch_ms.load(Ordering::SeqCst);
        if last == 0 {
            return i64::MAX;
        }
        now_ms().saturating_sub(last)
    }

    /// Wall-clock insertion time of the cached value, epoch ms.
    pub fn last_fetch_ms(&self) -> i64 {
        self.last_fetch_ms.load(Ordering::SeqCst)
    }

    /// Number of assets in the cached spread list.
    pub fn asset_count(&self) -> usize {
        self.current.load().spreads.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::merge;
    use crate::types::{FundingRate, Venue};

    fn sample_result() -> AggregatedResult {
        let primary = vec![FundingRate {
            asset: "BTC".to_string(),
            venue: Venue::Hyperliquid,
            rate_8h: 0.0004,
            rate_raw: 0.00005,
            next_funding_time: 0,
            open_interest: None,
            mark_price: Some(50_000.0),
            change_24h: None,
            volume_24h: None,
            observed_at: 0,
        }];
        merge(primary, vec![])
    }

    #[tokio::test]
    async fn get_within_ttl_returns_updated_value() {
        let cache = RateCache::new(Aggregator::new());
        cache.update(sample_result());

        let first = cache.get().await;
        let second = cache.get().await;
        // Same Arc: no recompute happened inside the TTL.
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.spreads.len(), 1);
    }

    #[test]
    fn empty_cache_reports_max_age() {
        let cache = RateCache::new(Aggregator::new());
        assert_eq!(cache.age_ms(), i64::MAX);
        assert_eq!(cache.last_fetch_ms(), 0);
        assert_eq!(cache.asset_count(), 0);
    }

    #[test]
    fn update_refreshes_age_and_count() {
        let cache = RateCache::new(Aggregator::new());
        cache.update(sample_result());
        assert!(cache.age_ms() < CACHE_TTL_MS);
        assert!(cache.last_fetch_ms() > 0);
        assert_eq!(cache.asset_count(), 1);
    }
}
