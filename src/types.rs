// =============================================================================
// Shared market types used across the hldesk engine
// =============================================================================

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A venue we poll funding data from. `Hyperliquid` is the primary venue;
/// the other three are the configured CEX set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Hyperliquid,
    Binance,
    Bybit,
    Okx,
}

impl Venue {
    /// The three CEX venues compared against the primary.
    pub const CEX: [Venue; 3] = [Venue::Binance, Venue::Bybit, Venue::Okx];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hyperliquid => "hyperliquid",
            Self::Binance => "binance",
            Self::Bybit => "bybit",
            Self::Okx => "okx",
        }
    }

    /// Parse a venue name as stored in `funding_snapshots.venue`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "hyperliquid" => Some(Self::Hyperliquid),
            "binance" => Some(Self::Binance),
            "bybit" => Some(Self::Bybit),
            "okx" => Some(Self::Okx),
            _ => None,
        }
    }
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One funding observation: a single asset on a single venue at one instant.
///
/// `rate_8h` is always normalized to an 8-hour equivalent regardless of the
/// venue's native convention (Hyperliquid publishes per-hour, the CEX set
/// per-8h). `rate_raw` preserves the native value.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingRate {
    pub asset: String,
    pub venue: Venue,
    pub rate_8h: f64,
    pub rate_raw: f64,
    /// Next funding event, epoch milliseconds.
    pub next_funding_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_interest: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mark_price: Option<f64>,
    /// 24h price change in percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub change_24h: Option<f64>,
    /// 24h notional volume in USD.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume_24h: Option<f64>,
    /// When the adapter returned this observation, epoch milliseconds.
    pub observed_at: i64,
}

/// Cross-venue view for one asset, keyed on the primary venue's listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FundingSpread {
    pub asset: String,
    /// The Hyperliquid rate. Spreads only exist for assets listed there.
    pub primary: FundingRate,
    /// Zero to three CEX rates, keyed by venue.
    pub cex_rates: HashMap<Venue, FundingRate>,
    /// The CEX whose rate has the largest absolute value, or `"none"`.
    #[serde(serialize_with = "venue_or_none")]
    pub best_cex: Option<Venue>,
    /// Signed `rate_8h` of `best_cex` (0 when no CEX data).
    pub best_cex_rate: f64,
    /// `primary.rate_8h - best_cex_rate` (0 when no CEX data).
    pub max_spread: f64,
}

fn venue_or_none<S: serde::Serializer>(v: &Option<Venue>, s: S) -> Result<S::Ok, S::Error> {
    match v {
        Some(venue) => s.serialize_str(venue.as_str()),
        None => s.serialize_str("none"),
    }
}

/// The merged output of one aggregation pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedResult {
    /// Sorted by `|max_spread|` descending.
    pub spreads: Vec<FundingSpread>,
    /// Every venue's full rate list, concatenated.
    pub all_rates: Vec<FundingRate>,
    /// When this aggregate was produced, epoch milliseconds.
    pub timestamp: i64,
}

impl AggregatedResult {
    /// An empty aggregate stamped `timestamp`. Returned when the primary
    /// venue cannot be reached so the poll loop keeps running.
    pub fn empty(timestamp: i64) -> Self {
        Self {
            spreads: Vec::new(),
            all_rates: Vec::new(),
            timestamp,
        }
    }

    /// Find the spread for `asset` (case-insensitive).
    pub fn spread_for(&self, asset: &str) -> Option<&FundingSpread> {
        let upper = asset.to_uppercase();
        self.spreads.iter().find(|s| s.asset == upper)
    }
}

/// Current epoch time in milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
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
    fn venue_roundtrips_through_serde() {
        let json = serde_json::to_string(&Venue::Hyperliquid).unwrap();
        assert_eq!(json, "\"hyperliquid\"");
        let back: Venue = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Venue::Hyperliquid);
    }

    #[test]
    fn venue_parse_is_case_insensitive() {
        assert_eq!(Venue::parse("OKX"), Some(Venue::Okx));
        assert_eq!(Venue::parse("Bybit"), Some(Venue::Bybit));
        assert_eq!(Venue::parse("deribit"), None);
    }

    #[test]
    fn best_cex_serializes_none_as_string() {
        let spread = FundingSpread {
            asset: "BTC".to_string(),
            primary: rate("BTC", Venue::Hyperliquid, 0.0004),
            cex_rates: HashMap::new(),
            best_cex: None,
            best_cex_rate: 0.0,
            max_spread: 0.0,
        };
        let v = serde_json::to_value(&spread).unwrap();
        assert_eq!(v["bestCex"], "none");
    }

    #[test]
    fn spread_lookup_is_case_insensitive() {
        let agg = AggregatedResult {
            spreads: vec![FundingSpread {
                asset: "ETH".to_string(),
                primary: rate("ETH", Venue::Hyperliquid, 0.0001),
                cex_rates: HashMap::new(),
                best_cex: None,
                best_cex_rate: 0.0,
                max_spread: 0.0,
            }],
            all_rates: Vec::new(),
            timestamp: 0,
        };
        assert!(agg.spread_for("eth").is_some());
        assert!(agg.spread_for("BTC").is_none());
    }
}
