// =============================================================================
// Binance Futures Adapter
// =============================================================================
//
// One GET to the premium index endpoint covers every perpetual. Binance
// funding is already per-8h, so the raw rate passes through unchanged.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::{int_field, num_field, strip_usdt, VenueAdapter};
use crate::types::{now_ms, FundingRate, Venue};

const PREMIUM_INDEX_URL: &str = "https://fapi.binance.com/fapi/v1/premiumIndex";

pub struct BinanceAdapter {
    client: reqwest::Client,
}

impl BinanceAdapter {
    pub fn new() -> Self {
        Self {
            client: super::http_client(),
        }
    }
}

impl Default for BinanceAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for BinanceAdapter {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    async fn fetch(&self) -> Result<Vec<FundingRate>> {
        let resp = self
            .client
            .get(PREMIUM_INDEX_URL)
            .send()
            .await
            .context("GET binance premiumIndex")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse binance premiumIndex body")?;

        if !status.is_success() {
            anyhow::bail!("binance premiumIndex returned {}: {}", status, body);
        }

        let entries = body
            .as_array()
            .context("binance premiumIndex response is not an array")?;

        let observed_at = now_ms();
        let mut rates = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(symbol) = entry["symbol"].as_str() else {
                continue;
            };
            let Some(asset) = strip_usdt(symbol) else {
                continue;
            };
            let Some(rate_raw) = num_field(entry, "lastFundingRate") else {
                continue;
            };

            rates.push(FundingRate {
                asset,
                venue: Venue::Binance,
                rate_8h: rate_raw,
                rate_raw,
                next_funding_time: int_field(entry, "nextFundingTime").unwrap_or(0),
                open_interest: None,
                mark_price: num_field(entry, "markPrice"),
                change_24h: None,
                volume_24h: None,
                observed_at,
            });
        }

        debug!(count = rates.len(), "binance funding fetched");
        Ok(rates)
    }
}
