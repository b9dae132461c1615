// =============================================================================
// Store — Supabase PostgREST client
// =============================================================================
//
// Thin typed layer over the PostgREST HTTP API. Built from SUPABASE_URL plus
// the service-role key; falls back to the anon key in read-only mode, and is
// absent entirely when neither is configured (simulation persistence
// disabled, reads degrade to empty).
//
// SECURITY: keys travel only in headers and are never logged.

pub mod models;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderValue};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use self::models::{
    AiDecision, AiPosition, AiTrader, EquitySnapshot, FundingSnapshotRow, Portfolio, Position,
    Transaction,
};

use crate::types::{FundingRate, Venue};

/// Rows per bulk insert; PostgREST handles larger bodies but this keeps
/// request sizes predictable.
const INSERT_CHUNK: usize = 500;

/// Hard cap on history reads.
const HISTORY_LIMIT: usize = 1000;

pub struct Store {
    base_url: String,
    client: reqwest::Client,
    read_only: bool,
}

impl Store {
    /// Build from the environment. Returns `None` when `SUPABASE_URL` or
    /// every key is missing.
    pub fn from_env() -> Option<Self> {
        let url = std::env::var("SUPABASE_URL").ok()?;
        let (key, read_only) = match std::env::var("SUPABASE_SERVICE_ROLE_KEY") {
            Ok(k) if !k.is_empty() => (k, false),
            _ => match std::env::var("SUPABASE_ANON_KEY") {
                Ok(k) if !k.is_empty() => (k, true),
                _ => return None,
            },
        };

        if read_only {
            warn!("store running with anon key; writes are disabled");
        }
        Some(Self::new(url, key, read_only))
    }

    pub fn new(url: impl Into<String>, key: String, read_only: bool) -> Self {
        let mut headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&key) {
            headers.insert("apikey", val);
        }
        if let Ok(val) = HeaderValue::from_str(&format!("Bearer {key}")) {
            headers.insert("Authorization", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .expect("failed to build reqwest client for store");

        let url = url.into();
        info!(read_only, "store client initialised");
        Self {
            base_url: format!("{}/rest/v1", url.trim_end_matches('/')),
            client,
            read_only,
        }
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    // -------------------------------------------------------------------------
    // Generic PostgREST operations
    // -------------------------------------------------------------------------

    async fn select<T: DeserializeOwned>(&self, table: &str, query: &str) -> Result<Vec<T>> {
        let url = format!("{}/{}?{}", self.base_url, table, query);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {table} from store"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("store GET {} returned {}: {}", table, status, body);
        }

        resp.json()
            .await
            .with_context(|| format!("failed to parse store rows from {table}"))
    }

    async fn insert<T: Serialize + ?Sized>(&self, table: &str, rows: &T) -> Result<()> {
        if self.read_only {
            anyhow::bail!("store is read-only; cannot insert into {table}");
        }

        let url = format!("{}/{}", self.base_url, table);
        let resp = self
            .client
            .post(&url)
            .header("Prefer", "return=minimal")
            .json(rows)
            .send()
            .await
            .with_context(|| format!("POST {table} to store"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("store POST {} returned {}: {}", table, status, body);
        }
        Ok(())
    }

    async fn update(&self, table: &str, filter: &str, patch: &serde_json::Value) -> Result<()> {
        if self.read_only {
            anyhow::bail!("store is read-only; cannot update {table}");
        }

        let url = format!("{}/{}?{}", self.base_url, table, filter);
        let resp = self
            .client
            .patch(&url)
            .header("Prefer", "return=minimal")
            .json(patch)
            .send()
            .await
            .with_context(|| format!("PATCH {table} in store"))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("store PATCH {} returned {}: {}", table, status, body);
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // funding_snapshots
    // -------------------------------------------------------------------------

    /// Persist one polled batch in chunks. Called fire-and-forget from the
    /// poll loop; the caller logs and swallows the error.
    pub async fn save_rates(&self, rates: &[FundingRate]) -> Result<usize> {
        let rows: Vec<FundingSnapshotRow> = rates.iter().map(Into::into).collect();
        for chunk in rows.chunks(INSERT_CHUNK) {
            self.insert("funding_snapshots", chunk).await?;
        }
        debug!(rows = rows.len(), "funding snapshots persisted");
        Ok(rows.len())
    }

    /// Raw history rows, newest first, capped at 1000.
    pub async fn funding_history(
        &self,
        asset: &str,
        venue: Option<Venue>,
        from_ms: Option<i64>,
        to_ms: Option<i64>,
    ) -> Result<Vec<FundingSnapshotRow>> {
        let query = history_query(asset, venue, from_ms, to_ms);
        self.select("funding_snapshots", &query).await
    }

    // -------------------------------------------------------------------------
    // paper_portfolios
    // -------------------------------------------------------------------------

    pub async fn active_portfolios(&self) -> Result<Vec<Portfolio>> {
        self.select("paper_portfolios", "select=*&is_active=eq.true&order=created_at.asc")
            .await
    }

    pub async fn all_portfolios(&self) -> Result<Vec<Portfolio>> {
        self.select("paper_portfolios", "select=*&order=created_at.asc")
            .await
    }

    pub async fn portfolio(&self, id: &str) -> Result<Option<Portfolio>> {
        let rows: Vec<Portfolio> = self
            .select("paper_portfolios", &format!("select=*&id=eq.{id}"))
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn update_portfolio_cash(&self, id: &str, cash_balance: f64) -> Result<()> {
        self.update(
            "paper_portfolios",
            &format!("id=eq.{id}"),
            &serde_json::json!({ "cash_balance": cash_balance }),
        )
        .await
    }

    // -------------------------------------------------------------------------
    // paper_positions
    // -------------------------------------------------------------------------

    pub async fn open_positions(&self, portfolio_id: &str) -> Result<Vec<Position>> {
        self.select(
            "paper_positions",
            &format!("select=*&portfolio_id=eq.{portfolio_id}&is_open=eq.true&order=opened_at.asc"),
        )
        .await
    }

    pub async fn closed_positions(&self, portfolio_id: &str, limit: usize) -> Result<Vec<Position>> {
        self.select(
            "paper_positions",
            &format!(
                "select=*&portfolio_id=eq.{portfolio_id}&is_open=eq.false&order=closed_at.desc&limit={limit}"
            ),
        )
        .await
    }

    pub async fn insert_position(&self, position: &Position) -> Result<()> {
        self.insert("paper_positions", &[position]).await
    }

    pub async fn update_position_funding(
        &self,
        id: &str,
        total_funding_collected: f64,
        last_funding_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        self.update(
            "paper_positions",
            &format!("id=eq.{id}"),
            &serde_json::json!({
                "total_funding_collected": total_funding_collected,
                "last_funding_at": last_funding_at.to_rfc3339(),
            }),
        )
        .await
    }

    pub async fn close_position(
        &self,
        id: &str,
        exit_price: f64,
        realized_pnl: f64,
        fees_paid: f64,
        closed_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        self.update(
            "paper_positions",
            &format!("id=eq.{id}"),
            &serde_json::json!({
                "is_open": false,
                "exit_price": exit_price,
                "realized_pnl": realized_pnl,
                "fees_paid": fees_paid,
                "closed_at": closed_at.to_rfc3339(),
            }),
        )
        .await
    }

    // -------------------------------------------------------------------------
    // paper_transactions
    // -------------------------------------------------------------------------

    pub async fn insert_transaction(&self, tx: &Transaction) -> Result<()> {
        self.insert("paper_transactions", &[tx]).await
    }

    pub async fn transactions(&self, portfolio_id: &str, limit: usize) -> Result<Vec<Transaction>> {
        self.select(
            "paper_transactions",
            &format!(
                "select=*&portfolio_id=eq.{portfolio_id}&order=created_at.desc&limit={limit}"
            ),
        )
        .await
    }

    // -------------------------------------------------------------------------
    // paper_snapshots / ai_snapshots
    // -------------------------------------------------------------------------

    pub async fn insert_snapshots(&self, table: &str, rows: &[EquitySnapshot]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.insert(table, rows).await
    }

    pub async fn snapshots_since(
        &self,
        table: &str,
        since: chrono::DateTime<chrono::Utc>,
    ) -> Result<Vec<EquitySnapshot>> {
        self.select(
            table,
            &format!(
                "select=*&snapshot_at=gte.{}&order=snapshot_at.asc",
                since.format("%Y-%m-%dT%H:%M:%SZ")
            ),
        )
        .await
    }

    // -------------------------------------------------------------------------
    // ai_traders
    // -------------------------------------------------------------------------

    pub async fn traders(&self) -> Result<Vec<AiTrader>> {
        self.select("ai_traders", "select=*&order=name.asc").await
    }

    pub async fn active_trader_by_name(&self, name: &str) -> Result<Option<AiTrader>> {
        let rows: Vec<AiTrader> = self
            .select(
                "ai_traders",
                &format!("select=*&name=eq.{name}&is_active=eq.true"),
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn trader_by_name(&self, name: &str) -> Result<Option<AiTrader>> {
        let rows: Vec<AiTrader> = self
            .select("ai_traders", &format!("select=*&name=eq.{name}"))
            .await?;
        Ok(rows.into_iter().next())
    }

    pub async fn update_trader_cash(&self, id: &str, cash_balance: f64) -> Result<()> {
        self.update(
            "ai_traders",
            &format!("id=eq.{id}"),
            &serde_json::json!({ "cash_balance": cash_balance }),
        )
        .await
    }

    // -------------------------------------------------------------------------
    // ai_positions
    // -------------------------------------------------------------------------

    pub async fn open_ai_positions(&self, trader_id: &str) -> Result<Vec<AiPosition>> {
        self.select(
            "ai_positions",
            &format!("select=*&trader_id=eq.{trader_id}&is_open=eq.true&order=opened_at.asc"),
        )
        .await
    }

    pub async fn insert_ai_position(&self, position: &AiPosition) -> Result<()> {
        self.insert("ai_positions", &[position]).await
    }

    pub async fn update_ai_position_funding(
        &self,
        id: &str,
        funding_collected: f64,
        last_funding_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        self.update(
            "ai_positions",
            &format!("id=eq.{id}"),
            &serde_json::json!({
                "funding_collected": funding_collected,
                "last_funding_at": last_funding_at.to_rfc3339(),
            }),
        )
        .await
    }

    pub async fn close_ai_position(
        &self,
        id: &str,
        exit_price: f64,
        realized_pnl: f64,
        closed_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<()> {
        self.update(
            "ai_positions",
            &format!("id=eq.{id}"),
            &serde_json::json!({
                "is_open": false,
                "exit_price": exit_price,
                "realized_pnl": realized_pnl,
                "closed_at": closed_at.to_rfc3339(),
            }),
        )
        .await
    }

    // -------------------------------------------------------------------------
    // ai_decisions
    // -------------------------------------------------------------------------

    pub async fn insert_decision(&self, decision: &AiDecision) -> Result<()> {
        self.insert("ai_decisions", &[decision]).await
    }

    pub async fn decisions(&self, trader_id: &str, limit: usize) -> Result<Vec<AiDecision>> {
        self.select(
            "ai_decisions",
            &format!("select=*&trader_id=eq.{trader_id}&order=created_at.desc&limit={limit}"),
        )
        .await
    }
}

/// Build the PostgREST query string for a history read.
fn history_query(asset: &str, venue: Option<Venue>, from_ms: Option<i64>, to_ms: Option<i64>) -> String {
    let mut query = format!("select=*&asset=eq.{}", asset.to_uppercase());
    if let Some(v) = venue {
        query.push_str(&format!("&venue=eq.{v}"));
    }
    if let Some(from) = from_ms {
        query.push_str(&format!("&observed_at=gte.{from}"));
    }
    if let Some(to) = to_ms {
        query.push_str(&format!("&observed_at=lte.{to}"));
    }
    query.push_str(&format!("&order=observed_at.desc&limit={HISTORY_LIMIT}"));
    query
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_query_with_all_filters() {
        let q = history_query("btc", Some(Venue::Binance), Some(100), Some(200));
        assert_eq!(
            q,
            "select=*&asset=eq.BTC&venue=eq.binance&observed_at=gte.100&observed_at=lte.200&order=observed_at.desc&limit=1000"
        );
    }

    #[test]
    fn history_query_minimal() {
        let q = history_query("ETH", None, None, None);
        assert_eq!(q, "select=*&asset=eq.ETH&order=observed_at.desc&limit=1000");
    }
}
