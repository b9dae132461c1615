// =============================================================================
// Hyperliquid Adapter — primary venue
// =============================================================================
//
// One POST to the info endpoint returns the whole universe plus per-asset
// context in a parallel array. Hyperliquid funding is per-hour, so
// `rate_8h = funding * 8`. This adapter is the only one that populates
// mark price, 24h change, 24h volume, and USD open interest — the
// downstream engines mark-to-market exclusively off primary data.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::{int_field, num_field, VenueAdapter};
use crate::types::{now_ms, FundingRate, Venue};

const INFO_URL: &str = "https://api.hyperliquid.xyz/info";

/// Per-hour native rate to 8-hour equivalent.
const PER_HOUR_TO_8H: f64 = 8.0;

pub struct HyperliquidAdapter {
    client: reqwest::Client,
}

impl HyperliquidAdapter {
    pub fn new() -> Self {
        Self {
            client: super::http_client(),
        }
    }
}

impl Default for HyperliquidAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for HyperliquidAdapter {
    fn venue(&self) -> Venue {
        Venue::Hyperliquid
    }

    async fn fetch(&self) -> Result<Vec<FundingRate>> {
        let resp = self
            .client
            .post(INFO_URL)
            .json(&serde_json::json!({ "type": "metaAndAssetCtxs" }))
            .send()
            .await
            .context("POST hyperliquid metaAndAssetCtxs")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse hyperliquid response body")?;

        if !status.is_success() {
            anyhow::bail!("hyperliquid info returned {}: {}", status, body);
        }

        // Response is a tuple: [meta, ctxs] with universe[i] matching ctxs[i].
        let universe = body[0]["universe"]
            .as_array()
            .context("hyperliquid response missing meta.universe")?;
        let ctxs = body[1]
            .as_array()
            .context("hyperliquid response missing asset contexts")?;

        let observed_at = now_ms();
        // Hourly funding: fall back to the next top-of-hour when the venue
        // omits nextFundingTime.
        const HOUR_MS: i64 = 3_600_000;
        let next_hour = (observed_at / HOUR_MS + 1) * HOUR_MS;

        let mut rates = Vec::with_capacity(universe.len());
        for (meta, ctx) in universe.iter().zip(ctxs.iter()) {
            let Some(name) = meta["name"].as_str() else {
                continue;
            };
            if meta["isDelisted"].as_bool().unwrap_or(false) {
                continue;
            }
            let Some(funding) = num_field(ctx, "funding") else {
                continue;
            };

            let mark_price = num_field(ctx, "markPx");
            let prev_day = num_field(ctx, "prevDayPx");
            let change_24h = match (mark_price, prev_day) {
                (Some(mark), Some(prev)) if prev > 0.0 => Some((mark - prev) / prev * 100.0),
                _ => None,
            };
            // Open interest is reported in coin units; convert to USD.
            let open_interest = match (num_field(ctx, "openInterest"), mark_price) {
                (Some(oi), Some(mark)) => Some(oi * mark),
                _ => None,
            };

            rates.push(FundingRate {
                asset: name.to_uppercase(),
                venue: Venue::Hyperliquid,
                rate_8h: funding * PER_HOUR_TO_8H,
                rate_raw: funding,
                next_funding_time: int_field(ctx, "nextFundingTime").unwrap_or(next_hour),
                open_interest,
                mark_price,
                change_24h,
                volume_24h: num_field(ctx, "dayNtlVlm"),
                observed_at,
            });
        }

        debug!(count = rates.len(), "hyperliquid funding fetched");
        Ok(rates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_hour_rate_normalizes_to_8h() {
        // A per-hour reading of 0.00005 must become exactly 0.0004.
        let rate_raw = 0.00005_f64;
        let rate_8h = rate_raw * PER_HOUR_TO_8H;
        assert_eq!(rate_8h, 0.0004);
    }
}
