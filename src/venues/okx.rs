// =============================================================================
// OKX Adapter — per-instrument funding fan-out
// =============================================================================
//
// OKX has no bulk funding endpoint: one call lists the USDT swap
// instruments, then funding is fetched per instrument. Requests run in
// parallel batches of 20; an instrument whose request fails is skipped so
// a handful of flaky symbols never sinks the whole venue. OKX funding is
// per-8h.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::future::join_all;
use tracing::{debug, warn};

use super::{int_field, num_field, strip_usdt_swap, VenueAdapter};
use crate::types::{now_ms, FundingRate, Venue};

const INSTRUMENTS_URL: &str = "https://www.okx.com/api/v5/public/instruments?instType=SWAP";
const FUNDING_RATE_URL: &str = "https://www.okx.com/api/v5/public/funding-rate";

/// Per-instrument requests issued concurrently per batch.
const BATCH_SIZE: usize = 20;

pub struct OkxAdapter {
    client: reqwest::Client,
}

impl OkxAdapter {
    pub fn new() -> Self {
        Self {
            client: super::http_client(),
        }
    }

    /// List the live USDT-margined swap instrument ids.
    async fn list_instruments(&self) -> Result<Vec<String>> {
        let resp = self
            .client
            .get(INSTRUMENTS_URL)
            .send()
            .await
            .context("GET okx instruments")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse okx instruments body")?;

        if !status.is_success() {
            anyhow::bail!("okx instruments returned {}: {}", status, body);
        }
        if body["code"].as_str() != Some("0") {
            anyhow::bail!("okx instruments error: {}", body["msg"]);
        }

        let data = body["data"]
            .as_array()
            .context("okx instruments response missing data")?;

        let instruments = data
            .iter()
            .filter(|inst| inst["state"].as_str() == Some("live"))
            .filter_map(|inst| inst["instId"].as_str())
            .filter(|id| strip_usdt_swap(id).is_some())
            .map(str::to_string)
            .collect();

        Ok(instruments)
    }

    /// Fetch the current funding rate for one instrument.
    async fn fetch_one(&self, inst_id: &str, observed_at: i64) -> Result<FundingRate> {
        let resp = self
            .client
            .get(FUNDING_RATE_URL)
            .query(&[("instId", inst_id)])
            .send()
            .await
            .with_context(|| format!("GET okx funding-rate for {inst_id}"))?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .with_context(|| format!("failed to parse okx funding-rate body for {inst_id}"))?;

        if !status.is_success() {
            anyhow::bail!("okx funding-rate for {} returned {}: {}", inst_id, status, body);
        }

        let entry = body["data"]
            .as_array()
            .and_then(|d| d.first())
            .with_context(|| format!("okx funding-rate for {inst_id} returned no data"))?;

        let asset = strip_usdt_swap(inst_id)
            .with_context(|| format!("unexpected okx instrument id {inst_id}"))?;
        let rate_raw = num_field(entry, "fundingRate")
            .with_context(|| format!("okx funding-rate for {inst_id} missing fundingRate"))?;

        Ok(FundingRate {
            asset,
            venue: Venue::Okx,
            rate_8h: rate_raw,
            rate_raw,
            next_funding_time: int_field(entry, "nextFundingTime").unwrap_or(0),
            open_interest: None,
            mark_price: None,
            change_24h: None,
            volume_24h: None,
            observed_at,
        })
    }
}

impl Default for OkxAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VenueAdapter for OkxAdapter {
    fn venue(&self) -> Venue {
        Venue::Okx
    }

    async fn fetch(&self) -> Result<Vec<FundingRate>> {
        let instruments = self.list_instruments().await?;
        let observed_at = now_ms();

        let mut rates = Vec::with_capacity(instruments.len());
        let mut skipped = 0usize;

        for batch in instruments.chunks(BATCH_SIZE) {
            let results = join_all(batch.iter().map(|id| self.fetch_one(id, observed_at))).await;
            for (inst_id, result) in batch.iter().zip(results) {
                match result {
                    Ok(rate) => rates.push(rate),
                    Err(e) => {
                        skipped += 1;
                        warn!(instrument = %inst_id, error = %e, "okx funding fetch skipped");
                    }
                }
            }
        }

        debug!(count = rates.len(), skipped, "okx funding fetched");
        Ok(rates)
    }
}
