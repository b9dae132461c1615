// =============================================================================
// Bybit Adapter
// =============================================================================
//
// The linear tickers endpoint bundles funding with mark price and USD open
// interest in a single call. Bybit funding is per-8h.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use super::{int_field, num_field, strip_usdt, VenueAdapter};
use crate::types::{now_ms, FundingRate, Venue};

const TICKERS_URL: &str = "https://api.bybit.com/v5/market/tickers?category=linear";

pub struct BybitAdapter {
    client: reqwest::Client,
}

impl BybitAdapter {
    pub fn new() -> Self {
        Self {
            client: super::http_client(),
        }
    }
}

impl Default for BybitAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for BybitAdapter {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    async fn fetch(&self) -> Result<Vec<FundingRate>> {
        let resp = self
            .client
            .get(TICKERS_URL)
            .send()
            .await
            .context("GET bybit linear tickers")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse bybit tickers body")?;

        if !status.is_success() {
            anyhow::bail!("bybit tickers returned {}: {}", status, body);
        }
        if body["retCode"].as_i64() != Some(0) {
            anyhow::bail!("bybit tickers error: {}", body["retMsg"]);
        }

        let list = body["result"]["list"]
            .as_array()
            .context("bybit tickers response missing result.list")?;

        let observed_at = now_ms();
        let mut rates = Vec::with_capacity(list.len());
        for entry in list {
            let Some(symbol) = entry["symbol"].as_str() else {
                continue;
            };
            let Some(asset) = strip_usdt(symbol) else {
                continue;
            };
            // Spot-style tickers in the linear list carry no funding rate.
            let Some(rate_raw) = num_field(entry, "fundingRate") else {
                continue;
            };

            rates.push(FundingRate {
                asset,
                venue: Venue::Bybit,
                rate_8h: rate_raw,
                rate_raw,
                next_funding_time: int_field(entry, "nextFundingTime").unwrap_or(0),
                open_interest: num_field(entry, "openInterestValue"),
                mark_price: num_field(entry, "markPrice"),
                change_24h: None,
                volume_24h: num_field(entry, "turnover24h"),
                observed_at,
            });
        }

        debug!(count = rates.len(), "bybit funding fetched");
        Ok(rates)
    }
}
