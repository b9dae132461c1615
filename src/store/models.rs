// =============================================================================
// Store row models — one struct per persisted table
// =============================================================================
//
// Field names match the snake_case PostgREST columns one-to-one, so every
// struct round-trips through the store unchanged. Timestamps on rows are
// `DateTime<Utc>` (timestamptz columns); market observation times stay
// epoch-millisecond integers to match the venue payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{FundingRate, Venue};

// ---------------------------------------------------------------------------
// funding_snapshots
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingSnapshotRow {
    pub asset: String,
    pub venue: Venue,
    pub rate_8h: f64,
    pub rate_raw: f64,
    pub next_funding_time: i64,
    #[serde(default)]
    pub open_interest: Option<f64>,
    #[serde(default)]
    pub mark_price: Option<f64>,
    pub observed_at: i64,
}

impl From<&FundingRate> for FundingSnapshotRow {
    fn from(rate: &FundingRate) -> Self {
        Self {
            asset: rate.asset.clone(),
            venue: rate.venue,
            rate_8h: rate.rate_8h,
            rate_raw: rate.rate_raw,
            next_funding_time: rate.next_funding_time,
            open_interest: rate.open_interest,
            mark_price: rate.mark_price,
            observed_at: rate.observed_at,
        }
    }
}

// ---------------------------------------------------------------------------
// paper_portfolios
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub id: String,
    pub strategy_name: String,
    /// Opaque per-strategy tuning knobs; parsed by `paper::strategy`.
    #[serde(default)]
    pub strategy_config: serde_json::Value,
    pub cash_balance: f64,
    pub initial_balance: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// paper_positions
// ---------------------------------------------------------------------------

/// Which side of the perp the portfolio holds. A `short_perp` collects
/// positive funding; a `long_perp` pays it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    ShortPerp,
    LongPerp,
}

impl PositionSide {
    /// +1 for shorts, -1 for longs: the sign applied to both funding accrual
    /// and price return.
    pub fn sign(&self) -> f64 {
        match self {
            Self::ShortPerp => 1.0,
            Self::LongPerp => -1.0,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShortPerp => write!(f, "short_perp"),
            Self::LongPerp => write!(f, "long_perp"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub portfolio_id: String,
    pub asset: String,
    pub side: PositionSide,
    /// Immutable notional in USD.
    pub size_usd: f64,
    pub entry_rate_8h: f64,
    pub entry_spread: f64,
    /// Mark price at open.
    pub entry_price: f64,
    /// Signed cumulative funding credited to this position.
    pub total_funding_collected: f64,
    pub last_funding_at: DateTime<Utc>,
    pub opened_at: DateTime<Utc>,
    pub is_open: bool,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub realized_pnl: Option<f64>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    pub fees_paid: f64,
}

// ---------------------------------------------------------------------------
// paper_transactions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Open,
    Close,
    Fee,
    Funding,
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Close => write!(f, "close"),
            Self::Fee => write!(f, "fee"),
            Self::Funding => write!(f, "funding"),
        }
    }
}

/// Append-only audit log entry. Signed `amount`: cash-in positive, cash-out
/// negative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub portfolio_id: String,
    #[serde(default)]
    pub position_id: Option<String>,
    #[serde(rename = "type")]
    pub tx_type: TransactionType,
    pub asset: String,
    pub amount: f64,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// paper_snapshots / ai_snapshots
// ---------------------------------------------------------------------------

/// Hourly equity sample for one portfolio or agent. The owning table
/// (`paper_snapshots` vs `ai_snapshots`) decides what `owner_id` refers to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EquitySnapshot {
    pub owner_id: String,
    pub snapshot_at: DateTime<Utc>,
    pub total_value: f64,
    pub cash_balance: f64,
    pub unrealized_pnl: f64,
    pub funding_collected: f64,
    pub open_positions: i64,
}

// ---------------------------------------------------------------------------
// ai_traders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiTrader {
    pub id: String,
    pub name: String,
    /// OpenRouter model slug this agent consults.
    pub model: String,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub persona: Option<String>,
    pub cash_balance: f64,
    pub is_active: bool,
}

// ---------------------------------------------------------------------------
// ai_positions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Long,
    Short,
}

impl TradeDirection {
    /// Funding / price-return sign: shorts collect positive funding.
    pub fn sign(&self) -> f64 {
        match self {
            Self::Short => 1.0,
            Self::Long => -1.0,
        }
    }
}

impl std::fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiPosition {
    pub id: String,
    pub trader_id: String,
    pub asset: String,
    pub direction: TradeDirection,
    pub size_usd: f64,
    pub entry_price: f64,
    pub entry_rate_8h: f64,
    pub funding_collected: f64,
    pub last_funding_at: DateTime<Utc>,
    pub opened_at: DateTime<Utc>,
    pub is_open: bool,
    #[serde(default)]
    pub exit_price: Option<f64>,
    #[serde(default)]
    pub realized_pnl: Option<f64>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// ai_decisions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiAction {
    OpenLong,
    OpenShort,
    Close,
    Hold,
}

impl AiAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open_long" => Some(Self::OpenLong),
            "open_short" => Some(Self::OpenShort),
            "close" => Some(Self::Close),
            "hold" => Some(Self::Hold),
            _ => None,
        }
    }
}

impl std::fmt::Display for AiAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenLong => write!(f, "open_long"),
            Self::OpenShort => write!(f, "open_short"),
            Self::Close => write!(f, "close"),
            Self::Hold => write!(f, "hold"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiDecision {
    pub id: String,
    pub trader_id: String,
    pub action: AiAction,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub size_usd: Option<f64>,
    pub reasoning: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn side_signs_match_funding_convention() {
        assert_eq!(PositionSide::ShortPerp.sign(), 1.0);
        assert_eq!(PositionSide::LongPerp.sign(), -1.0);
        assert_eq!(TradeDirection::Short.sign(), 1.0);
        assert_eq!(TradeDirection::Long.sign(), -1.0);
    }

    #[test]
    fn position_side_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&PositionSide::ShortPerp).unwrap(),
            "\"short_perp\""
        );
        let back: PositionSide = serde_json::from_str("\"long_perp\"").unwrap();
        assert_eq!(back, PositionSide::LongPerp);
    }

    #[test]
    fn transaction_type_field_renames_to_type() {
        let tx = Transaction {
            id: "t1".to_string(),
            portfolio_id: "p1".to_string(),
            position_id: None,
            tx_type: TransactionType::Funding,
            asset: "BTC".to_string(),
            amount: 2.0,
            description: "funding".to_string(),
            created_at: Utc::now(),
        };
        let v = serde_json::to_value(&tx).unwrap();
        assert_eq!(v["type"], "funding");
        assert!(v.get("tx_type").is_none());
    }

    #[test]
    fn ai_action_parses_only_known_values() {
        assert_eq!(AiAction::parse("open_long"), Some(AiAction::OpenLong));
        assert_eq!(AiAction::parse("hold"), Some(AiAction::Hold));
        assert_eq!(AiAction::parse("buy"), None);
        assert_eq!(AiAction::parse("OPEN_LONG"), None);
    }
}
