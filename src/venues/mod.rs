// =============================================================================
// Venue Adapters — one HTTP venue each, normalized to canonical rate records
// =============================================================================
//
// Every adapter exposes a single operation: fetch the venue's full set of
// USDT-margined perpetuals and normalize them into `FundingRate` records.
// Normalization covers three venue-specific conventions:
//
//   1. Symbol: strip the venue's USDT suffix to obtain the canonical asset.
//   2. Rate: convert the native funding rate to an 8-hour equivalent.
//   3. Filtering: USDT-margined perpetual contracts only.
//
// Adapters are stateless and idempotent; each owns its own reqwest client
// with a 10-second timeout so a slow venue can never starve the poll loop.

pub mod binance;
pub mod bybit;
pub mod hyperliquid;
pub mod okx;

pub use binance::BinanceAdapter;
pub use bybit::BybitAdapter;
pub use hyperliquid::HyperliquidAdapter;
pub use okx::OkxAdapter;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{FundingRate, Venue};

/// Uniform contract the aggregator depends on.
#[async_trait]
pub trait VenueAdapter: Send + Sync {
    /// Which venue this adapter polls.
    fn venue(&self) -> Venue;

    /// Fetch and normalize the venue's current funding data.
    ///
    /// Fails with a transport error if the endpoint returns non-success or
    /// an unparseable payload.
    async fn fetch(&self) -> Result<Vec<FundingRate>>;
}

/// Build the shared per-adapter HTTP client.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(10))
        .build()
        .expect("failed to build reqwest client for venue adapter")
}

/// Strip a plain `USDT` suffix ("BTCUSDT" -> "BTC").
///
/// Returns `None` for symbols that are not USDT-margined perps, which the
/// caller treats as a filter.
pub(crate) fn strip_usdt(symbol: &str) -> Option<String> {
    let base = symbol.strip_suffix("USDT")?;
    // Underscore variants ("BTC_USDT") appear on some venues.
    let base = base.strip_suffix('_').unwrap_or(base);
    if base.is_empty() {
        return None;
    }
    Some(base.to_uppercase())
}

/// Strip an OKX-style `-USDT-SWAP` suffix ("BTC-USDT-SWAP" -> "BTC").
pub(crate) fn strip_usdt_swap(inst_id: &str) -> Option<String> {
    let base = inst_id.strip_suffix("-USDT-SWAP")?;
    if base.is_empty() {
        return None;
    }
    Some(base.to_uppercase())
}

/// Read a numeric field that the venue may encode as a JSON string.
pub(crate) fn num_field(v: &serde_json::Value, key: &str) -> Option<f64> {
    match &v[key] {
        serde_json::Value::Number(n) => n.as_f64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Read an integer field that the venue may encode as a JSON string.
pub(crate) fn int_field(v: &serde_json::Value, key: &str) -> Option<i64> {
    match &v[key] {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_usdt_handles_plain_and_underscore() {
        assert_eq!(strip_usdt("BTCUSDT"), Some("BTC".to_string()));
        assert_eq!(strip_usdt("ETH_USDT"), Some("ETH".to_string()));
        assert_eq!(strip_usdt("BTCUSDC"), None);
        assert_eq!(strip_usdt("USDT"), None);
    }

    #[test]
    fn strip_usdt_swap_handles_okx_instruments() {
        assert_eq!(strip_usdt_swap("BTC-USDT-SWAP"), Some("BTC".to_string()));
        assert_eq!(strip_usdt_swap("SOL-USDT-SWAP"), Some("SOL".to_string()));
        assert_eq!(strip_usdt_swap("BTC-USD-SWAP"), None);
        assert_eq!(strip_usdt_swap("-USDT-SWAP"), None);
    }

    #[test]
    fn num_field_accepts_strings_and_numbers() {
        let v = serde_json::json!({ "a": "0.0005", "b": 0.25, "c": true });
        assert_eq!(num_field(&v, "a"), Some(0.0005));
        assert_eq!(num_field(&v, "b"), Some(0.25));
        assert_eq!(num_field(&v, "c"), None);
        assert_eq!(num_field(&v, "missing"), None);
    }

    #[test]
    fn int_field_accepts_strings_and_numbers() {
        let v = serde_json::json!({ "a": "1700000000000", "b": 42 });
        assert_eq!(int_field(&v, "a"), Some(1_700_000_000_000));
        assert_eq!(int_field(&v, "b"), Some(42));
    }
}
