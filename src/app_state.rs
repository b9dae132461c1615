// =============================================================================
// Central Application State — hldesk backend
// =============================================================================
//
// Ties the subsystems together behind one `Arc<AppState>` shared by the
// HTTP handlers and the background loops. The rate cache is the only
// process-wide mutable state; everything else is wiring.
//
// The store (and with it both simulation engines) is optional: without
// Supabase credentials the service still polls, caches, and serves market
// reads, while simulation persistence is disabled and store-backed reads
// degrade to empty.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use tracing::warn;

use crate::aggregator::Aggregator;
use crate::ai::{AiTraderEngine, OpenRouterClient};
use crate::paper::PaperTradingEngine;
use crate::rate_cache::RateCache;
use crate::store::Store;

pub struct AppState {
    pub cache: Arc<RateCache>,
    pub store: Option<Arc<Store>>,
    pub paper_engine: Option<Arc<PaperTradingEngine>>,
    pub ai_engine: Option<Arc<AiTraderEngine>>,
    /// Set while a paper-trading run is in flight so a slow cycle is
    /// coalesced rather than overlapped by the next poll tick.
    pub trading_in_flight: AtomicBool,
}

impl AppState {
    /// Build the full subsystem graph from the environment.
    pub fn from_env() -> Self {
        let cache = Arc::new(RateCache::new(Aggregator::new()));
        let store = Store::from_env().map(Arc::new);

        let (paper_engine, ai_engine) = match &store {
            Some(s) if !s.read_only() => (
                Some(Arc::new(PaperTradingEngine::new(s.clone()))),
                Some(Arc::new(AiTraderEngine::new(
                    s.clone(),
                    OpenRouterClient::from_env(),
                ))),
            ),
            Some(_) => {
                warn!("store is read-only; simulation engines disabled");
                (None, None)
            }
            None => {
                warn!("no store configured; simulation engines disabled");
                (None, None)
            }
        };

        Self {
            cache,
            store,
            paper_engine,
            ai_engine,
            trading_in_flight: AtomicBool::new(false),
        }
    }
}
